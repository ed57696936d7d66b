//! Connection byte accounting.
//!
//! Counts bytes per direction into host counter metrics. Traffic always
//! continues; the filter only observes.

use crate::config::{decode_settings, ConfigError, FilterName};
use log::{debug, info};
use proxyvm_core::{
    Action, ContextHandle, FilterKind, HookResult, Host, MetricHandle, MetricKind, PeerType,
    RootContext, TcpContext,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CounterSettings {
    pub downstream_metric: String,
    /// Upstream bytes are only counted when a metric name is configured.
    pub upstream_metric: Option<String>,
}

impl Default for CounterSettings {
    fn default() -> Self {
        Self {
            downstream_metric: "tcp.downstream_bytes".to_string(),
            upstream_metric: None,
        }
    }
}

pub struct ByteCounterRoot {
    settings: CounterSettings,
    downstream: Option<MetricHandle>,
    upstream: Option<MetricHandle>,
}

impl ByteCounterRoot {
    pub fn from_settings(settings: &Value) -> Result<Self, ConfigError> {
        Ok(Self {
            settings: decode_settings(FilterName::ByteCounter, settings)?,
            downstream: None,
            upstream: None,
        })
    }
}

impl RootContext for ByteCounterRoot {
    fn on_plugin_start(&mut self, host: &Host, _config_len: usize) -> HookResult<bool> {
        self.downstream = Some(host.define_metric(
            MetricKind::Counter,
            &self.settings.downstream_metric,
        )?);
        self.upstream = match &self.settings.upstream_metric {
            Some(name) => Some(host.define_metric(MetricKind::Counter, name)?),
            None => None,
        };
        info!(
            "event=metrics_defined module=byte_counter status=ok downstream={} upstream={}",
            self.settings.downstream_metric,
            self.settings.upstream_metric.as_deref().unwrap_or("-")
        );
        Ok(true)
    }

    fn child_kind(&self) -> Option<FilterKind> {
        Some(FilterKind::Tcp)
    }

    fn create_tcp_context(&mut self, _handle: ContextHandle) -> Option<Box<dyn TcpContext>> {
        Some(Box::new(ByteCounter {
            downstream_metric: self.downstream,
            upstream_metric: self.upstream,
            downstream_bytes: 0,
            upstream_bytes: 0,
        }))
    }
}

pub struct ByteCounter {
    downstream_metric: Option<MetricHandle>,
    upstream_metric: Option<MetricHandle>,
    downstream_bytes: u64,
    upstream_bytes: u64,
}

fn count(host: &Host, metric: Option<MetricHandle>, data_size: usize) -> HookResult<u64> {
    let bytes = u64::try_from(data_size).unwrap_or(u64::MAX);
    if let Some(metric) = metric {
        host.increment_metric(metric, i64::try_from(bytes).unwrap_or(i64::MAX))?;
    }
    Ok(bytes)
}

impl TcpContext for ByteCounter {
    fn on_downstream_data(
        &mut self,
        host: &Host,
        data_size: usize,
        _end_of_stream: bool,
    ) -> HookResult<Action> {
        self.downstream_bytes += count(host, self.downstream_metric, data_size)?;
        Ok(Action::Continue)
    }

    fn on_upstream_data(
        &mut self,
        host: &Host,
        data_size: usize,
        _end_of_stream: bool,
    ) -> HookResult<Action> {
        if self.upstream_metric.is_some() {
            self.upstream_bytes += count(host, self.upstream_metric, data_size)?;
        }
        Ok(Action::Continue)
    }

    fn on_downstream_close(&mut self, _host: &Host, peer: PeerType) -> HookResult<()> {
        debug!(
            "event=connection_close module=byte_counter status=ok peer={:?} downstream_bytes={}",
            peer, self.downstream_bytes
        );
        Ok(())
    }

    fn on_log(&mut self, _host: &Host) -> HookResult<()> {
        info!(
            "event=connection_summary module=byte_counter status=ok downstream_bytes={} upstream_bytes={}",
            self.downstream_bytes, self.upstream_bytes
        );
        Ok(())
    }
}

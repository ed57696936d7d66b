//! Queue-relayed request accounting.
//!
//! # Responsibility
//! - Publish one record per finished HTTP exchange to a shared queue.
//! - Drain the queue from the root and fold the records into a shared counter
//!   updated with compare-and-swap.
//! - Defer plugin shutdown until every drained record has been counted.
//!
//! # Invariants
//! - Records are never dropped silently: malformed ones are logged and skipped.
//! - A counter update that keeps losing the CAS race stays pending locally and
//!   is retried on the next tick or queue event.

use crate::config::{decode_settings, ConfigError, FilterName};
use log::{info, warn};
use proxyvm_core::{
    Action, ContextHandle, FilterKind, HookError, HookResult, Host, HostError, HttpContext, MapType,
    QueueHandle, RootContext,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

const MAX_CAS_ATTEMPTS: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelaySettings {
    pub queue: String,
    pub counter_key: String,
    /// Report period; `0` disables the timer.
    pub tick_ms: u64,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            queue: "request_log".to_string(),
            counter_key: "relay.requests".to_string(),
            tick_ms: 0,
        }
    }
}

/// One finished exchange as published on the queue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeRecord {
    pub method: String,
    pub path: String,
    pub status: String,
}

pub struct QueueRelayRoot {
    settings: RelaySettings,
    queue: Option<QueueHandle>,
    /// Drained records not yet folded into the shared counter.
    pending: u64,
    shutting_down: bool,
}

impl QueueRelayRoot {
    pub fn from_settings(settings: &Value) -> Result<Self, ConfigError> {
        let settings: RelaySettings = decode_settings(FilterName::QueueRelay, settings)?;
        if settings.queue.trim().is_empty() {
            return Err(ConfigError::settings(
                FilterName::QueueRelay,
                "queue name cannot be empty",
            ));
        }
        Ok(Self {
            settings,
            queue: None,
            pending: 0,
            shutting_down: false,
        })
    }

    /// Dequeues until the queue reports `Empty`.
    fn drain(&mut self, host: &Host, queue: QueueHandle) -> HookResult<()> {
        loop {
            let message = match host.dequeue_shared_queue(queue) {
                Ok(message) => message,
                Err(HostError::Empty) => return Ok(()),
                Err(err) => return Err(err.into()),
            };
            match serde_json::from_slice::<ExchangeRecord>(message.as_bytes()) {
                Ok(_) => self.pending += 1,
                Err(err) => warn!(
                    "event=relay_record module=queue_relay status=skipped bytes={} error={}",
                    message.len(),
                    err
                ),
            }
        }
    }

    /// Adds `pending` to the shared counter. Returns whether it landed.
    fn flush(&mut self, host: &Host) -> HookResult<bool> {
        if self.pending == 0 {
            return Ok(true);
        }
        for _ in 0..MAX_CAS_ATTEMPTS {
            let (current, cas) = match host.get_shared_data(&self.settings.counter_key) {
                Ok(shared) => (parse_counter(shared.value.as_bytes())?, shared.cas),
                Err(HostError::NotFound) => (0, None),
                Err(err) => return Err(err.into()),
            };
            let next = current.saturating_add(self.pending);
            match host.set_shared_data(
                &self.settings.counter_key,
                next.to_string().as_bytes(),
                cas,
            ) {
                Ok(()) => {
                    self.pending = 0;
                    return Ok(true);
                }
                Err(HostError::CasMismatch) => continue,
                Err(err) => return Err(err.into()),
            }
        }
        warn!(
            "event=relay_flush module=queue_relay status=retry pending={}",
            self.pending
        );
        Ok(false)
    }

    fn total(&self, host: &Host) -> HookResult<u64> {
        match host.get_shared_data(&self.settings.counter_key) {
            Ok(shared) => parse_counter(shared.value.as_bytes()),
            Err(HostError::NotFound) => Ok(0),
            Err(err) => Err(err.into()),
        }
    }
}

fn parse_counter(bytes: &[u8]) -> HookResult<u64> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|text| text.trim().parse().ok())
        .ok_or_else(|| HookError::extension("shared counter is not a decimal number"))
}

impl RootContext for QueueRelayRoot {
    fn on_plugin_start(&mut self, host: &Host, _config_len: usize) -> HookResult<bool> {
        self.queue = Some(host.register_shared_queue(&self.settings.queue)?);
        if self.settings.tick_ms > 0 {
            host.set_tick_period(Duration::from_millis(self.settings.tick_ms))?;
        }
        Ok(true)
    }

    fn on_queue_ready(&mut self, host: &Host, queue: QueueHandle) -> HookResult<()> {
        if self.queue != Some(queue) {
            return Ok(());
        }
        self.drain(host, queue)?;
        self.flush(host)?;
        Ok(())
    }

    fn on_tick(&mut self, host: &Host) -> HookResult<()> {
        let landed = self.flush(host)?;
        if self.shutting_down && landed {
            self.shutting_down = false;
            host.done()?;
            info!("event=relay_shutdown module=queue_relay status=ok deferred=true");
            return Ok(());
        }
        info!(
            "event=relay_report module=queue_relay status=ok total={} pending={}",
            self.total(host)?,
            self.pending
        );
        Ok(())
    }

    /// Drains what is left; shutdown waits for a pending flush to land.
    fn on_plugin_done(&mut self, host: &Host) -> HookResult<bool> {
        if let Some(queue) = self.queue {
            self.drain(host, queue)?;
        }
        if self.flush(host)? {
            return Ok(true);
        }
        self.shutting_down = true;
        if self.settings.tick_ms == 0 {
            host.set_tick_period(Duration::from_secs(1))?;
        }
        Ok(false)
    }

    fn child_kind(&self) -> Option<FilterKind> {
        Some(FilterKind::Http)
    }

    fn create_http_context(&mut self, handle: ContextHandle) -> Option<Box<dyn HttpContext>> {
        Some(Box::new(QueueRelay {
            handle,
            queue: self.queue,
            record: ExchangeRecord::default(),
        }))
    }
}

pub struct QueueRelay {
    handle: ContextHandle,
    queue: Option<QueueHandle>,
    record: ExchangeRecord,
}

impl HttpContext for QueueRelay {
    fn on_request_headers(
        &mut self,
        host: &Host,
        _num_headers: usize,
        _end_of_stream: bool,
    ) -> HookResult<Action> {
        let headers = host.get_fields(MapType::HttpRequestHeaders)?;
        self.record.method = headers.get(":method").unwrap_or_default().to_string();
        self.record.path = headers.get(":path").unwrap_or_default().to_string();
        Ok(Action::Continue)
    }

    fn on_response_headers(
        &mut self,
        host: &Host,
        _num_headers: usize,
        _end_of_stream: bool,
    ) -> HookResult<Action> {
        self.record.status = host
            .get_field(MapType::HttpResponseHeaders, ":status")?
            .unwrap_or_default();
        Ok(Action::Continue)
    }

    fn on_log(&mut self, host: &Host) -> HookResult<()> {
        let Some(queue) = self.queue else {
            warn!(
                "event=relay_publish module=queue_relay status=skipped context={} reason=no_queue",
                self.handle
            );
            return Ok(());
        };
        let bytes = serde_json::to_vec(&self.record)
            .map_err(|err| HookError::extension(format!("exchange record: {err}")))?;
        host.enqueue_shared_queue(queue, &bytes)?;
        Ok(())
    }
}

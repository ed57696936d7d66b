//! Configuration-driven root selection.
//!
//! The module ships every filter; the plugin configuration picks one per root
//! context. Until a configuration arrives the root is inert.

use crate::auth_gate::AuthGateRoot;
use crate::body_echo::BodyEchoRoot;
use crate::byte_counter::ByteCounterRoot;
use crate::config::{parse_plugin_config, ConfigError, FilterName, PluginConfig};
use crate::header_rewrite::HeaderRewriteRoot;
use crate::queue_relay::QueueRelayRoot;
use log::{error, info};
use proxyvm_core::{
    BufferType, CalloutResponse, ContextHandle, FactoryError, FilterKind, HookError, HookResult,
    Host, HostError, HttpContext, QueueHandle, RootContext, RootFactory, TcpContext,
};
use std::sync::Arc;

/// Builds the root context a parsed configuration names.
pub fn build_root(config: &PluginConfig) -> Result<Box<dyn RootContext>, ConfigError> {
    let root: Box<dyn RootContext> = match config.filter {
        FilterName::BodyEcho => Box::new(BodyEchoRoot::from_settings(&config.settings)?),
        FilterName::ByteCounter => Box::new(ByteCounterRoot::from_settings(&config.settings)?),
        FilterName::AuthGate => Box::new(AuthGateRoot::from_settings(&config.settings)?),
        FilterName::HeaderRewrite => Box::new(HeaderRewriteRoot::from_settings(&config.settings)?),
        FilterName::QueueRelay => Box::new(QueueRelayRoot::from_settings(&config.settings)?),
    };
    Ok(root)
}

/// Root that becomes whichever filter its plugin configuration names.
pub struct SelectorRoot {
    handle: ContextHandle,
    active: Option<(FilterName, Box<dyn RootContext>)>,
}

impl SelectorRoot {
    pub fn new(handle: ContextHandle) -> Self {
        Self {
            handle,
            active: None,
        }
    }

    pub fn active_filter(&self) -> Option<FilterName> {
        self.active.as_ref().map(|(name, _)| *name)
    }

    fn configure(&mut self, host: &Host, config_len: usize) -> Result<FilterName, ConfigError> {
        let bytes = match host.get_buffer(BufferType::PluginConfiguration, 0, config_len) {
            Ok(buffer) => buffer.into_vec(),
            Err(HostError::NotFound) => Vec::new(),
            Err(err) => return Err(ConfigError::Malformed(err.to_string())),
        };
        let config = parse_plugin_config(&bytes)?;
        let root = build_root(&config)?;
        self.active = Some((config.filter, root));
        Ok(config.filter)
    }

    fn active_mut(&mut self) -> Option<&mut Box<dyn RootContext>> {
        self.active.as_mut().map(|(_, root)| root)
    }
}

impl RootContext for SelectorRoot {
    /// Reconfiguration replaces the active filter; a rejected configuration
    /// leaves the root inert.
    fn on_plugin_start(&mut self, host: &Host, config_len: usize) -> HookResult<bool> {
        self.active = None;
        let filter = match self.configure(host, config_len) {
            Ok(filter) => filter,
            Err(err) => {
                error!(
                    "event=plugin_configure module=selector status=error context={} error={}",
                    self.handle, err
                );
                return Err(HookError::extension(err.to_string()));
            }
        };
        info!(
            "event=plugin_configure module=selector status=ok context={} filter={}",
            self.handle, filter
        );
        match self.active_mut() {
            Some(root) => root.on_plugin_start(host, config_len),
            None => Ok(false),
        }
    }

    fn on_plugin_done(&mut self, host: &Host) -> HookResult<bool> {
        match self.active_mut() {
            Some(root) => root.on_plugin_done(host),
            None => Ok(true),
        }
    }

    fn on_tick(&mut self, host: &Host) -> HookResult<()> {
        match self.active_mut() {
            Some(root) => root.on_tick(host),
            None => Ok(()),
        }
    }

    fn on_queue_ready(&mut self, host: &Host, queue: QueueHandle) -> HookResult<()> {
        match self.active_mut() {
            Some(root) => root.on_queue_ready(host, queue),
            None => Ok(()),
        }
    }

    fn on_callout_response(&mut self, host: &Host, response: &CalloutResponse) -> HookResult<()> {
        match self.active_mut() {
            Some(root) => root.on_callout_response(host, response),
            None => Ok(()),
        }
    }

    fn on_log(&mut self, host: &Host) -> HookResult<()> {
        match self.active_mut() {
            Some(root) => root.on_log(host),
            None => Ok(()),
        }
    }

    fn child_kind(&self) -> Option<FilterKind> {
        self.active.as_ref().and_then(|(_, root)| root.child_kind())
    }

    fn create_http_context(&mut self, handle: ContextHandle) -> Option<Box<dyn HttpContext>> {
        self.active_mut()?.create_http_context(handle)
    }

    fn create_tcp_context(&mut self, handle: ContextHandle) -> Option<Box<dyn TcpContext>> {
        self.active_mut()?.create_tcp_context(handle)
    }

    fn on_delete(&mut self, host: &Host) {
        if let Some(root) = self.active_mut() {
            root.on_delete(host);
        }
    }
}

/// Factory handing every root context a fresh selector.
pub fn selector_factory() -> RootFactory {
    Arc::new(|handle| Box::new(SelectorRoot::new(handle)) as Box<dyn RootContext>)
}

/// Registers the selector as this module's root factory.
pub fn register() -> Result<(), FactoryError> {
    proxyvm_ffi::set_root_factory(|handle| {
        Box::new(SelectorRoot::new(handle)) as Box<dyn RootContext>
    })
}

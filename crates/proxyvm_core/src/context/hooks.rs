//! Hook tables per context kind.
//!
//! Every hook has a neutral default, so an extension implements only the
//! events it cares about. The dispatcher never special-cases a missing hook.

use crate::abi::PeerType;
use crate::context::{ContextHandle, FilterKind};
use crate::error::HookResult;
use crate::flow::{Action, CalloutResponse, Resolution};
use crate::marshal::{Host, QueueHandle};

/// Hooks of a root context: one per plugin configuration.
pub trait RootContext {
    /// VM-wide startup; `config_len` bytes of VM configuration are readable.
    fn on_vm_start(&mut self, _host: &Host, _config_len: usize) -> HookResult<bool> {
        Ok(true)
    }

    /// Plugin (re)configuration; `config_len` bytes of plugin configuration
    /// are readable.
    fn on_plugin_start(&mut self, _host: &Host, _config_len: usize) -> HookResult<bool> {
        Ok(true)
    }

    /// Shutdown request. Returning `false` defers shutdown until the root
    /// calls `Host::done`.
    fn on_plugin_done(&mut self, _host: &Host) -> HookResult<bool> {
        Ok(true)
    }

    fn on_tick(&mut self, _host: &Host) -> HookResult<()> {
        Ok(())
    }

    fn on_queue_ready(&mut self, _host: &Host, _queue: QueueHandle) -> HookResult<()> {
        Ok(())
    }

    /// Response to a callout the root issued from a timer or queue event.
    fn on_callout_response(&mut self, _host: &Host, _response: &CalloutResponse) -> HookResult<()> {
        Ok(())
    }

    fn on_log(&mut self, _host: &Host) -> HookResult<()> {
        Ok(())
    }

    /// Kind of filter context this root hands out; `None` hands out nothing.
    fn child_kind(&self) -> Option<FilterKind> {
        None
    }

    /// `None` means "no context for this kind", distinct from an inert one.
    fn create_http_context(&mut self, _handle: ContextHandle) -> Option<Box<dyn HttpContext>> {
        None
    }

    fn create_tcp_context(&mut self, _handle: ContextHandle) -> Option<Box<dyn TcpContext>> {
        None
    }

    fn on_delete(&mut self, _host: &Host) {}
}

/// Hooks of one HTTP exchange.
pub trait HttpContext {
    fn on_request_headers(
        &mut self,
        _host: &Host,
        _num_headers: usize,
        _end_of_stream: bool,
    ) -> HookResult<Action> {
        Ok(Action::Continue)
    }

    fn on_request_body(
        &mut self,
        _host: &Host,
        _body_size: usize,
        _end_of_stream: bool,
    ) -> HookResult<Action> {
        Ok(Action::Continue)
    }

    fn on_request_trailers(&mut self, _host: &Host, _num_trailers: usize) -> HookResult<Action> {
        Ok(Action::Continue)
    }

    fn on_response_headers(
        &mut self,
        _host: &Host,
        _num_headers: usize,
        _end_of_stream: bool,
    ) -> HookResult<Action> {
        Ok(Action::Continue)
    }

    fn on_response_body(
        &mut self,
        _host: &Host,
        _body_size: usize,
        _end_of_stream: bool,
    ) -> HookResult<Action> {
        Ok(Action::Continue)
    }

    fn on_response_trailers(&mut self, _host: &Host, _num_trailers: usize) -> HookResult<Action> {
        Ok(Action::Continue)
    }

    fn on_callout_response(
        &mut self,
        _host: &Host,
        _response: &CalloutResponse,
    ) -> HookResult<Resolution> {
        Ok(Resolution::Resume)
    }

    /// Fires once per exchange after both directions are known.
    fn on_log(&mut self, _host: &Host) -> HookResult<()> {
        Ok(())
    }

    fn on_delete(&mut self, _host: &Host) {}
}

/// Hooks of one TCP connection.
pub trait TcpContext {
    fn on_new_connection(&mut self, _host: &Host) -> HookResult<Action> {
        Ok(Action::Continue)
    }

    fn on_downstream_data(
        &mut self,
        _host: &Host,
        _data_size: usize,
        _end_of_stream: bool,
    ) -> HookResult<Action> {
        Ok(Action::Continue)
    }

    fn on_downstream_close(&mut self, _host: &Host, _peer: PeerType) -> HookResult<()> {
        Ok(())
    }

    fn on_upstream_data(
        &mut self,
        _host: &Host,
        _data_size: usize,
        _end_of_stream: bool,
    ) -> HookResult<Action> {
        Ok(Action::Continue)
    }

    fn on_upstream_close(&mut self, _host: &Host, _peer: PeerType) -> HookResult<()> {
        Ok(())
    }

    fn on_callout_response(
        &mut self,
        _host: &Host,
        _response: &CalloutResponse,
    ) -> HookResult<Resolution> {
        Ok(Resolution::Resume)
    }

    fn on_log(&mut self, _host: &Host) -> HookResult<()> {
        Ok(())
    }

    fn on_delete(&mut self, _host: &Host) {}
}

/// HTTP context with every hook left at its default.
#[derive(Debug, Default)]
pub struct InertHttpContext;

impl HttpContext for InertHttpContext {}

/// TCP context with every hook left at its default.
#[derive(Debug, Default)]
pub struct InertTcpContext;

impl TcpContext for InertTcpContext {}

//! Host event routing.
//!
//! # Responsibility
//! - Create root and filter contexts under host-assigned handles.
//! - Route every host-initiated event to the addressed context's hook.
//! - Record callouts per (context, phase) and settle them on response,
//!   routed by ticket rather than by the addressed handle.
//!
//! # Invariants
//! - A failing hook aborts its event only; the registry stays intact.
//! - Tickets issued during an event inherit that event's stream phase.
//! - Deleting a context purges its outstanding tickets; its delete hook
//!   cannot issue new ones.
//!
//! # See also
//! - `crate::flow` for the Continue/Pause and Resolution contracts.

use crate::abi::{HostAbi, PeerType};
use crate::context::{
    Context, ContextHandle, ContextKind, ContextRegistry, FilterKind, RootFactory,
};
use crate::error::{DispatchError, DispatchResult, HookError, HookResult, ProtocolViolation};
use crate::flow::{Action, CalloutLedger, CalloutResponse, Resolution, StreamPhase};
use crate::logging;
use crate::marshal::{CalloutTicket, Host, QueueHandle};
use log::{debug, info, warn};
use std::rc::Rc;

const CALLOUT_RESPONSE_EVENT: &str = "on_http_call_response";

/// Result of a context-creation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created(ContextKind),
    /// The root produced no context for this handle.
    Declined,
}

/// Per-VM event router.
pub struct Dispatcher {
    host: Host,
    factory: RootFactory,
    registry: ContextRegistry,
    callouts: CalloutLedger,
}

impl Dispatcher {
    /// Builds a dispatcher and binds the log sink to `abi`.
    pub fn new(abi: Rc<dyn HostAbi>, factory: RootFactory) -> Self {
        logging::attach_host(Rc::clone(&abi));
        Self {
            host: Host::new(abi),
            factory,
            registry: ContextRegistry::new(),
            callouts: CalloutLedger::new(),
        }
    }

    pub fn host(&self) -> &Host {
        &self.host
    }

    pub fn registry(&self) -> &ContextRegistry {
        &self.registry
    }

    pub fn outstanding_callouts(&self) -> usize {
        self.callouts.len()
    }

    /// `proxy_on_context_create`: a reserved `parent` creates a root.
    pub fn on_context_create(
        &mut self,
        handle: ContextHandle,
        parent: ContextHandle,
    ) -> DispatchResult<CreateOutcome> {
        if parent.is_reserved() {
            self.create_root(handle)?;
            Ok(CreateOutcome::Created(ContextKind::Root))
        } else {
            self.create_filter(handle, parent)
        }
    }

    pub fn create_root(&mut self, handle: ContextHandle) -> DispatchResult<()> {
        self.ensure_free(handle)?;
        let root = (self.factory)(handle);
        self.registry.insert(handle, None, Context::Root(root))?;
        info!(
            "event=context_create module=dispatch status=ok kind=root context={}",
            handle
        );
        Ok(())
    }

    /// Asks the root at `root` for a filter context of its child kind.
    pub fn create_filter(
        &mut self,
        handle: ContextHandle,
        root: ContextHandle,
    ) -> DispatchResult<CreateOutcome> {
        self.ensure_free(handle)?;
        let parent = self.registry.root_mut(root)?;
        let created = match parent.child_kind() {
            Some(FilterKind::Http) => parent.create_http_context(handle).map(Context::Http),
            Some(FilterKind::Tcp) => parent.create_tcp_context(handle).map(Context::Tcp),
            None => None,
        };
        let Some(context) = created else {
            debug!(
                "event=context_create module=dispatch status=declined context={} root={}",
                handle, root
            );
            return Ok(CreateOutcome::Declined);
        };
        let kind = context.kind();
        self.registry.insert(handle, Some(root), context)?;
        debug!(
            "event=context_create module=dispatch status=ok kind={} context={} root={}",
            kind, handle, root
        );
        Ok(CreateOutcome::Created(kind))
    }

    pub fn on_vm_start(&mut self, handle: ContextHandle, config_len: usize) -> DispatchResult<bool> {
        let result = self
            .registry
            .root_mut(handle)?
            .on_vm_start(&self.host, config_len);
        self.settle(handle, "on_vm_start", StreamPhase::Background, result)
    }

    /// `proxy_on_configure`.
    pub fn on_plugin_start(
        &mut self,
        handle: ContextHandle,
        config_len: usize,
    ) -> DispatchResult<bool> {
        let result = self
            .registry
            .root_mut(handle)?
            .on_plugin_start(&self.host, config_len);
        self.settle(handle, "on_plugin_start", StreamPhase::Background, result)
    }

    /// `proxy_on_done`: filters are always done; roots may defer.
    pub fn on_done(&mut self, handle: ContextHandle) -> DispatchResult<bool> {
        let result = match self.registry.get_mut(handle)? {
            Context::Root(root) => root.on_plugin_done(&self.host),
            Context::Http(_) | Context::Tcp(_) => Ok(true),
        };
        self.settle(handle, "on_done", StreamPhase::Background, result)
    }

    pub fn on_tick(&mut self, handle: ContextHandle) -> DispatchResult<()> {
        let result = self.registry.root_mut(handle)?.on_tick(&self.host);
        self.settle(handle, "on_tick", StreamPhase::Background, result)
    }

    pub fn on_queue_ready(&mut self, handle: ContextHandle, queue: QueueHandle) -> DispatchResult<()> {
        let result = self
            .registry
            .root_mut(handle)?
            .on_queue_ready(&self.host, queue);
        self.settle(handle, "on_queue_ready", StreamPhase::Background, result)
    }

    pub fn on_request_headers(
        &mut self,
        handle: ContextHandle,
        num_headers: usize,
        end_of_stream: bool,
    ) -> DispatchResult<Action> {
        let result = self
            .registry
            .http_mut(handle)?
            .on_request_headers(&self.host, num_headers, end_of_stream);
        self.settle(handle, "on_request_headers", StreamPhase::HttpRequest, result)
    }

    pub fn on_request_body(
        &mut self,
        handle: ContextHandle,
        body_size: usize,
        end_of_stream: bool,
    ) -> DispatchResult<Action> {
        let result = self
            .registry
            .http_mut(handle)?
            .on_request_body(&self.host, body_size, end_of_stream);
        self.settle(handle, "on_request_body", StreamPhase::HttpRequest, result)
    }

    pub fn on_request_trailers(
        &mut self,
        handle: ContextHandle,
        num_trailers: usize,
    ) -> DispatchResult<Action> {
        let result = self
            .registry
            .http_mut(handle)?
            .on_request_trailers(&self.host, num_trailers);
        self.settle(handle, "on_request_trailers", StreamPhase::HttpRequest, result)
    }

    pub fn on_response_headers(
        &mut self,
        handle: ContextHandle,
        num_headers: usize,
        end_of_stream: bool,
    ) -> DispatchResult<Action> {
        let result = self
            .registry
            .http_mut(handle)?
            .on_response_headers(&self.host, num_headers, end_of_stream);
        self.settle(handle, "on_response_headers", StreamPhase::HttpResponse, result)
    }

    pub fn on_response_body(
        &mut self,
        handle: ContextHandle,
        body_size: usize,
        end_of_stream: bool,
    ) -> DispatchResult<Action> {
        let result = self
            .registry
            .http_mut(handle)?
            .on_response_body(&self.host, body_size, end_of_stream);
        self.settle(handle, "on_response_body", StreamPhase::HttpResponse, result)
    }

    pub fn on_response_trailers(
        &mut self,
        handle: ContextHandle,
        num_trailers: usize,
    ) -> DispatchResult<Action> {
        let result = self
            .registry
            .http_mut(handle)?
            .on_response_trailers(&self.host, num_trailers);
        self.settle(handle, "on_response_trailers", StreamPhase::HttpResponse, result)
    }

    pub fn on_new_connection(&mut self, handle: ContextHandle) -> DispatchResult<Action> {
        let result = self
            .registry
            .tcp_mut(handle)?
            .on_new_connection(&self.host);
        self.settle(handle, "on_new_connection", StreamPhase::Downstream, result)
    }

    pub fn on_downstream_data(
        &mut self,
        handle: ContextHandle,
        data_size: usize,
        end_of_stream: bool,
    ) -> DispatchResult<Action> {
        let result = self
            .registry
            .tcp_mut(handle)?
            .on_downstream_data(&self.host, data_size, end_of_stream);
        self.settle(handle, "on_downstream_data", StreamPhase::Downstream, result)
    }

    pub fn on_upstream_data(
        &mut self,
        handle: ContextHandle,
        data_size: usize,
        end_of_stream: bool,
    ) -> DispatchResult<Action> {
        let result = self
            .registry
            .tcp_mut(handle)?
            .on_upstream_data(&self.host, data_size, end_of_stream);
        self.settle(handle, "on_upstream_data", StreamPhase::Upstream, result)
    }

    pub fn on_downstream_close(&mut self, handle: ContextHandle, peer: PeerType) -> DispatchResult<()> {
        let result = self
            .registry
            .tcp_mut(handle)?
            .on_downstream_close(&self.host, peer);
        self.settle(handle, "on_downstream_close", StreamPhase::Background, result)
    }

    pub fn on_upstream_close(&mut self, handle: ContextHandle, peer: PeerType) -> DispatchResult<()> {
        let result = self
            .registry
            .tcp_mut(handle)?
            .on_upstream_close(&self.host, peer);
        self.settle(handle, "on_upstream_close", StreamPhase::Background, result)
    }

    /// Delivers a callout response to the context that issued `ticket`.
    ///
    /// The ticket alone names the issuer; hosts commonly address the response
    /// to the root context, so `handle` is informational. The ticket's
    /// recorded phase decides what `Resume` and `Respond` act on, whatever the
    /// exchange is doing now.
    pub fn on_http_call_response(
        &mut self,
        handle: ContextHandle,
        ticket: CalloutTicket,
        num_headers: usize,
        body_size: usize,
        num_trailers: usize,
    ) -> DispatchResult<()> {
        let pending = self.callouts.consume(ticket)?;
        let issuer = pending.context;
        if issuer != handle {
            debug!(
                "event=callout_route module=dispatch status=ok ticket={} addressed={} issuer={}",
                ticket, handle, issuer
            );
        }
        let phase = pending.phase;
        let response = CalloutResponse {
            ticket,
            phase,
            num_headers,
            body_size,
            num_trailers,
        };
        let result = match self.registry.get_mut(issuer)? {
            Context::Root(root) => root
                .on_callout_response(&self.host, &response)
                .map(|()| None),
            Context::Http(http) => http.on_callout_response(&self.host, &response).map(Some),
            Context::Tcp(tcp) => tcp.on_callout_response(&self.host, &response).map(Some),
        };
        match self.settle(issuer, CALLOUT_RESPONSE_EVENT, phase, result)? {
            Some(resolution) => self.apply_resolution(issuer, ticket, phase, resolution),
            None => Ok(()),
        }
    }

    pub fn on_log(&mut self, handle: ContextHandle) -> DispatchResult<()> {
        let result = match self.registry.get_mut(handle)? {
            Context::Root(root) => root.on_log(&self.host),
            Context::Http(http) => http.on_log(&self.host),
            Context::Tcp(tcp) => tcp.on_log(&self.host),
        };
        self.settle(handle, "on_log", StreamPhase::Background, result)
    }

    /// Runs the context's final hook, then erases the handle and drops its
    /// tickets. Callouts are refused while the hook runs.
    pub fn on_delete(&mut self, handle: ContextHandle) -> DispatchResult<()> {
        let context = self.registry.get_mut(handle)?;
        let kind = context.kind();
        self.host.set_tearing_down(true);
        match context {
            Context::Root(root) => root.on_delete(&self.host),
            Context::Http(http) => http.on_delete(&self.host),
            Context::Tcp(tcp) => tcp.on_delete(&self.host),
        }
        self.host.set_tearing_down(false);
        self.registry.remove(handle)?;

        let purged = self.callouts.purge(handle);
        debug!(
            "event=context_delete module=dispatch status=ok kind={} context={} purged_callouts={}",
            kind, handle, purged
        );
        Ok(())
    }

    fn ensure_free(&self, handle: ContextHandle) -> Result<(), ProtocolViolation> {
        if handle.is_reserved() {
            return Err(ProtocolViolation::InvalidHandle);
        }
        if self.registry.contains(handle) {
            return Err(ProtocolViolation::HandleInUse(handle));
        }
        Ok(())
    }

    /// Closes one hook invocation: records callouts it issued, classifies its
    /// failure.
    fn settle<T>(
        &mut self,
        handle: ContextHandle,
        event: &'static str,
        phase: StreamPhase,
        result: HookResult<T>,
    ) -> DispatchResult<T> {
        for ticket in self.host.take_issued_callouts() {
            if let Err(violation) = self.callouts.register(ticket, handle, phase) {
                warn!(
                    "event=callout_register module=dispatch status=error context={} error={}",
                    handle, violation
                );
            }
        }
        result.map_err(|error| {
            warn!(
                "event=hook_failed module=dispatch status=error hook={} context={} phase={} error={}",
                event, handle, phase, error
            );
            DispatchError::Hook {
                handle,
                event,
                error,
            }
        })
    }

    fn apply_resolution(
        &mut self,
        handle: ContextHandle,
        ticket: CalloutTicket,
        phase: StreamPhase,
        resolution: Resolution,
    ) -> DispatchResult<()> {
        let applied = match resolution {
            Resolution::Resume => match phase.stream() {
                Some(stream) => self.host.continue_stream(stream),
                None => Ok(()),
            },
            Resolution::Respond(response) => match phase {
                StreamPhase::HttpRequest | StreamPhase::HttpResponse => {
                    self.host.send_local_response(&response)
                }
                StreamPhase::Downstream | StreamPhase::Upstream => match phase.stream() {
                    Some(stream) => self.host.close_stream(stream),
                    None => Ok(()),
                },
                StreamPhase::Background => {
                    warn!(
                        "event=callout_respond module=dispatch status=ignored context={} ticket={} reason=no_stream",
                        handle, ticket
                    );
                    Ok(())
                }
            },
            Resolution::Hold => {
                if self.callouts.outstanding_for(handle) == 0 {
                    warn!(
                        "event=callout_hold module=dispatch status=stalled context={} ticket={} phase={}",
                        handle, ticket, phase
                    );
                }
                Ok(())
            }
        };
        applied.map_err(|error| DispatchError::Hook {
            handle,
            event: CALLOUT_RESPONSE_EVENT,
            error: HookError::Host(error),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{CreateOutcome, Dispatcher};
    use crate::abi::memory::MemoryHost;
    use crate::abi::{MapType, StreamType};
    use crate::context::{
        ContextHandle, ContextKind, FilterKind, HttpContext, RootContext, RootFactory,
    };
    use crate::error::{DispatchError, HookError, HookResult, ProtocolViolation};
    use crate::flow::{Action, CalloutResponse, LocalResponse, Resolution};
    use crate::marshal::{CalloutTicket, FieldCollection, Host};
    use std::rc::Rc;
    use std::sync::Arc;
    use std::time::Duration;

    struct GateRoot {
        declines: bool,
    }

    impl RootContext for GateRoot {
        fn child_kind(&self) -> Option<FilterKind> {
            Some(FilterKind::Http)
        }

        fn create_http_context(&mut self, _handle: ContextHandle) -> Option<Box<dyn HttpContext>> {
            if self.declines {
                None
            } else {
                Some(Box::new(Gate))
            }
        }
    }

    struct Gate;

    fn callout_headers() -> FieldCollection {
        FieldCollection::from_pairs(vec![
            (":method".to_string(), "GET".to_string()),
            (":path".to_string(), "/check".to_string()),
            (":authority".to_string(), "authz".to_string()),
        ])
    }

    impl HttpContext for Gate {
        fn on_request_headers(
            &mut self,
            host: &Host,
            _num_headers: usize,
            _end_of_stream: bool,
        ) -> HookResult<Action> {
            host.dispatch_http_call(
                "authz",
                &callout_headers(),
                None,
                &FieldCollection::new(),
                Duration::from_secs(1),
            )?;
            Ok(Action::Pause)
        }

        fn on_response_headers(
            &mut self,
            host: &Host,
            _num_headers: usize,
            _end_of_stream: bool,
        ) -> HookResult<Action> {
            if host.get_field(MapType::HttpResponseHeaders, "x-fail")?.is_some() {
                return Err(HookError::extension("forced failure"));
            }
            Ok(Action::Continue)
        }

        fn on_callout_response(
            &mut self,
            host: &Host,
            _response: &CalloutResponse,
        ) -> HookResult<Resolution> {
            let verdict = host.get_field(MapType::HttpCallResponseHeaders, "verdict")?;
            Ok(match verdict.as_deref() {
                Some("deny") => Resolution::Respond(LocalResponse::new(403)),
                Some("hold") => Resolution::Hold,
                _ => Resolution::Resume,
            })
        }
    }

    fn factory(declines: bool) -> RootFactory {
        Arc::new(move |_| Box::new(GateRoot { declines }) as Box<dyn RootContext>)
    }

    fn dispatcher(declines: bool) -> (Rc<MemoryHost>, Dispatcher) {
        let memory = Rc::new(MemoryHost::new());
        let dispatcher = Dispatcher::new(memory.clone(), factory(declines));
        (memory, dispatcher)
    }

    fn handle(raw: u32) -> ContextHandle {
        ContextHandle::new(raw)
    }

    #[test]
    fn creates_root_then_filter() {
        let (_memory, mut dispatcher) = dispatcher(false);
        assert_eq!(
            dispatcher.on_context_create(handle(1), handle(0)),
            Ok(CreateOutcome::Created(ContextKind::Root))
        );
        assert_eq!(
            dispatcher.on_context_create(handle(2), handle(1)),
            Ok(CreateOutcome::Created(ContextKind::HttpFilter))
        );
        assert_eq!(dispatcher.registry().len(), 2);
    }

    #[test]
    fn declined_filter_is_not_registered() {
        let (_memory, mut dispatcher) = dispatcher(true);
        dispatcher.create_root(handle(1)).expect("root");
        assert_eq!(
            dispatcher.create_filter(handle(2), handle(1)),
            Ok(CreateOutcome::Declined)
        );
        assert!(!dispatcher.registry().contains(handle(2)));
    }

    #[test]
    fn live_handle_cannot_be_created_twice() {
        let (_memory, mut dispatcher) = dispatcher(false);
        dispatcher.create_root(handle(1)).expect("root");
        assert_eq!(
            dispatcher.create_root(handle(1)),
            Err(DispatchError::Protocol(ProtocolViolation::HandleInUse(
                handle(1)
            )))
        );
    }

    #[test]
    fn events_for_wrong_kind_are_protocol_violations() {
        let (_memory, mut dispatcher) = dispatcher(false);
        dispatcher.create_root(handle(1)).expect("root");
        let err = dispatcher
            .on_request_headers(handle(1), 0, false)
            .expect_err("root has no request hooks");
        assert!(err.is_protocol_violation());
        let err = dispatcher.on_tick(handle(9)).expect_err("unknown context");
        assert_eq!(
            err,
            DispatchError::Protocol(ProtocolViolation::UnknownContext(handle(9)))
        );
    }

    #[test]
    fn callout_resume_continues_issuing_phase() {
        let (memory, mut dispatcher) = dispatcher(false);
        dispatcher.create_root(handle(1)).expect("root");
        dispatcher.create_filter(handle(2), handle(1)).expect("filter");

        assert_eq!(
            dispatcher.on_request_headers(handle(2), 3, false),
            Ok(Action::Pause)
        );
        assert_eq!(dispatcher.outstanding_callouts(), 1);
        let ticket = memory.callouts()[0].token;

        memory.stage_callout_response(vec![("verdict", "allow")], b"");
        dispatcher
            .on_http_call_response(handle(2), CalloutTicket::new(ticket), 1, 0, 0)
            .expect("response");
        assert_eq!(memory.continued_streams(), vec![StreamType::HttpRequest]);
        assert_eq!(dispatcher.outstanding_callouts(), 0);
    }

    #[test]
    fn deny_resolution_sends_local_response() {
        let (memory, mut dispatcher) = dispatcher(false);
        dispatcher.create_root(handle(1)).expect("root");
        dispatcher.create_filter(handle(2), handle(1)).expect("filter");
        dispatcher
            .on_request_headers(handle(2), 3, false)
            .expect("headers");
        let ticket = memory.callouts()[0].token;

        memory.stage_callout_response(vec![("verdict", "deny")], b"");
        dispatcher
            .on_http_call_response(handle(2), CalloutTicket::new(ticket), 1, 0, 0)
            .expect("response");
        assert_eq!(memory.local_responses()[0].status_code, 403);
        assert!(memory.continued_streams().is_empty());
    }

    #[test]
    fn ticket_routes_to_issuer_whatever_the_addressed_context() {
        let (memory, mut dispatcher) = dispatcher(false);
        dispatcher.create_root(handle(1)).expect("root");
        dispatcher.create_filter(handle(2), handle(1)).expect("filter");
        dispatcher.create_filter(handle(3), handle(1)).expect("filter");
        dispatcher
            .on_request_headers(handle(2), 3, false)
            .expect("headers");
        let ticket = CalloutTicket::new(memory.callouts()[0].token);

        memory.stage_callout_response(vec![("verdict", "allow")], b"");
        dispatcher
            .on_http_call_response(handle(1), ticket, 1, 0, 0)
            .expect("delivered under the root id");
        assert_eq!(memory.continued_streams(), vec![StreamType::HttpRequest]);

        let err = dispatcher
            .on_http_call_response(handle(3), ticket, 1, 0, 0)
            .expect_err("already answered");
        assert_eq!(
            err,
            DispatchError::Protocol(ProtocolViolation::UnknownTicket(ticket))
        );
        let err = dispatcher
            .on_http_call_response(handle(2), CalloutTicket::new(77), 0, 0, 0)
            .expect_err("never issued");
        assert!(err.is_protocol_violation());
        assert_eq!(dispatcher.outstanding_callouts(), 0);
    }

    #[test]
    fn hook_failure_keeps_context_alive() {
        let (memory, mut dispatcher) = dispatcher(false);
        dispatcher.create_root(handle(1)).expect("root");
        dispatcher.create_filter(handle(2), handle(1)).expect("filter");
        memory.set_map(MapType::HttpResponseHeaders, vec![("x-fail", "1")]);

        let err = dispatcher
            .on_response_headers(handle(2), 1, false)
            .expect_err("hook fails");
        assert!(matches!(
            err,
            DispatchError::Hook {
                event: "on_response_headers",
                ..
            }
        ));
        assert!(dispatcher.registry().contains(handle(2)));
        assert_eq!(dispatcher.on_done(handle(2)), Ok(true));
    }

    #[test]
    fn delete_purges_outstanding_tickets() {
        let (_memory, mut dispatcher) = dispatcher(false);
        dispatcher.create_root(handle(1)).expect("root");
        dispatcher.create_filter(handle(2), handle(1)).expect("filter");
        dispatcher
            .on_request_headers(handle(2), 3, false)
            .expect("headers");
        assert_eq!(dispatcher.outstanding_callouts(), 1);

        dispatcher.on_delete(handle(2)).expect("delete");
        assert_eq!(dispatcher.outstanding_callouts(), 0);
        assert_eq!(
            dispatcher.on_log(handle(2)),
            Err(DispatchError::Protocol(ProtocolViolation::UnknownContext(
                handle(2)
            )))
        );

        // Callouts are refused only while a delete hook runs.
        dispatcher.create_filter(handle(3), handle(1)).expect("filter");
        assert_eq!(
            dispatcher.on_request_headers(handle(3), 3, false),
            Ok(Action::Pause)
        );
        assert_eq!(dispatcher.outstanding_callouts(), 1);
    }
}

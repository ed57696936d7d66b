use proxyvm_core::{
    Action, ContextHandle, DispatchError, Dispatcher, FilterKind, HookResult, Host, HttpContext,
    MemoryHost, ProtocolViolation, RootContext, RootFactory, TcpContext,
};
use std::collections::BTreeSet;
use std::rc::Rc;
use std::sync::Arc;

struct MixedRoot {
    kind: FilterKind,
}

struct Passthrough;

impl HttpContext for Passthrough {
    fn on_request_headers(
        &mut self,
        _host: &Host,
        _num_headers: usize,
        _end_of_stream: bool,
    ) -> HookResult<Action> {
        Ok(Action::Continue)
    }
}

struct Counter;

impl TcpContext for Counter {}

impl RootContext for MixedRoot {
    fn child_kind(&self) -> Option<FilterKind> {
        Some(self.kind)
    }

    fn create_http_context(&mut self, _handle: ContextHandle) -> Option<Box<dyn HttpContext>> {
        Some(Box::new(Passthrough))
    }

    fn create_tcp_context(&mut self, _handle: ContextHandle) -> Option<Box<dyn TcpContext>> {
        Some(Box::new(Counter))
    }
}

fn dispatcher(kind: FilterKind) -> Dispatcher {
    let factory: RootFactory =
        Arc::new(move |_| Box::new(MixedRoot { kind }) as Box<dyn RootContext>);
    Dispatcher::new(Rc::new(MemoryHost::new()), factory)
}

fn handle(raw: u32) -> ContextHandle {
    ContextHandle::new(raw)
}

#[test]
fn create_dispatch_delete_sequence_keeps_handles_unique() {
    let mut dispatcher = dispatcher(FilterKind::Http);
    dispatcher.create_root(handle(1)).expect("root");

    let mut live = BTreeSet::new();
    for raw in 2..12 {
        dispatcher
            .create_filter(handle(raw), handle(1))
            .expect("filter creation");
        assert!(live.insert(raw));
        if raw % 3 == 0 {
            dispatcher.on_delete(handle(raw)).expect("delete");
            live.remove(&raw);
        }
    }

    let registered: BTreeSet<u32> = dispatcher
        .registry()
        .handles()
        .into_iter()
        .map(ContextHandle::raw)
        .filter(|raw| *raw != 1)
        .collect();
    assert_eq!(registered, live);

    for raw in 2..12 {
        let outcome = dispatcher.on_request_headers(handle(raw), 0, true);
        if live.contains(&raw) {
            assert_eq!(outcome, Ok(Action::Continue));
        } else {
            assert_eq!(
                outcome,
                Err(DispatchError::Protocol(ProtocolViolation::UnknownContext(
                    handle(raw)
                )))
            );
        }
    }
}

#[test]
fn never_created_handle_is_a_protocol_violation() {
    let mut dispatcher = dispatcher(FilterKind::Tcp);
    let err = dispatcher
        .on_downstream_data(handle(40), 10, false)
        .expect_err("never created");
    assert!(err.is_protocol_violation());
    let err = dispatcher.on_delete(handle(40)).expect_err("never created");
    assert!(err.is_protocol_violation());
}

#[test]
fn deleted_handle_can_be_reassigned_by_host() {
    let mut dispatcher = dispatcher(FilterKind::Tcp);
    dispatcher.create_root(handle(1)).expect("root");
    dispatcher.create_filter(handle(2), handle(1)).expect("tcp");
    assert_eq!(dispatcher.on_new_connection(handle(2)), Ok(Action::Continue));
    dispatcher.on_delete(handle(2)).expect("delete");

    dispatcher
        .create_filter(handle(2), handle(1))
        .expect("handle reuse");
    assert_eq!(
        dispatcher.on_downstream_data(handle(2), 5, true),
        Ok(Action::Continue)
    );
}

#[test]
fn filter_events_reach_only_their_kind() {
    let mut dispatcher = dispatcher(FilterKind::Tcp);
    dispatcher.create_root(handle(1)).expect("root");
    dispatcher.create_filter(handle(2), handle(1)).expect("tcp");

    let err = dispatcher
        .on_request_headers(handle(2), 1, false)
        .expect_err("tcp context has no http hooks");
    assert!(matches!(
        err,
        DispatchError::Protocol(ProtocolViolation::KindMismatch { .. })
    ));
    assert_eq!(dispatcher.on_done(handle(2)), Ok(true));
}

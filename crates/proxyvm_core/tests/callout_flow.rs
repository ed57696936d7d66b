use proxyvm_core::{
    Action, CalloutResponse, CalloutTicket, ContextHandle, Dispatcher, FieldCollection,
    FilterKind, HookError, HookResult, Host, HttpContext, LocalResponse, MemoryHost, Resolution,
    RootContext, RootFactory, StreamPhase, StreamType, TcpContext,
};
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

fn call_headers(path: &str) -> FieldCollection {
    FieldCollection::from_pairs(vec![
        (":method", "GET"),
        (":path", path),
        (":authority", "sidecar"),
    ])
}

fn dispatch(host: &Host, path: &str) -> HookResult<CalloutTicket> {
    Ok(host.dispatch_http_call(
        "sidecar",
        &call_headers(path),
        None,
        &FieldCollection::new(),
        Duration::from_millis(500),
    )?)
}

/// Issues one callout per direction.
struct BothPhases;

impl HttpContext for BothPhases {
    fn on_request_headers(
        &mut self,
        host: &Host,
        _num_headers: usize,
        _end_of_stream: bool,
    ) -> HookResult<Action> {
        dispatch(host, "/request")?;
        Ok(Action::Pause)
    }

    fn on_response_headers(
        &mut self,
        host: &Host,
        _num_headers: usize,
        _end_of_stream: bool,
    ) -> HookResult<Action> {
        dispatch(host, "/response")?;
        Ok(Action::Pause)
    }

    fn on_callout_response(
        &mut self,
        _host: &Host,
        response: &CalloutResponse,
    ) -> HookResult<Resolution> {
        match response.phase {
            StreamPhase::HttpRequest | StreamPhase::HttpResponse => Ok(Resolution::Resume),
            other => Err(HookError::extension(format!("unexpected phase {other}"))),
        }
    }
}

/// Fans out two callouts and resumes only once both have answered.
#[derive(Default)]
struct FanOut {
    answered: usize,
}

impl HttpContext for FanOut {
    fn on_request_headers(
        &mut self,
        host: &Host,
        _num_headers: usize,
        _end_of_stream: bool,
    ) -> HookResult<Action> {
        dispatch(host, "/a")?;
        dispatch(host, "/b")?;
        Ok(Action::Pause)
    }

    fn on_callout_response(
        &mut self,
        _host: &Host,
        _response: &CalloutResponse,
    ) -> HookResult<Resolution> {
        self.answered += 1;
        if self.answered < 2 {
            Ok(Resolution::Hold)
        } else {
            Ok(Resolution::Resume)
        }
    }
}

struct Guard;

impl TcpContext for Guard {
    fn on_new_connection(&mut self, host: &Host) -> HookResult<Action> {
        dispatch(host, "/conn")?;
        Ok(Action::Pause)
    }

    fn on_callout_response(
        &mut self,
        _host: &Host,
        _response: &CalloutResponse,
    ) -> HookResult<Resolution> {
        Ok(Resolution::Respond(LocalResponse::new(403)))
    }
}

#[derive(Clone, Copy)]
enum Shape {
    BothPhases,
    FanOut,
    Guard,
}

struct ShapeRoot {
    shape: Shape,
}

impl RootContext for ShapeRoot {
    fn child_kind(&self) -> Option<FilterKind> {
        match self.shape {
            Shape::Guard => Some(FilterKind::Tcp),
            Shape::BothPhases | Shape::FanOut => Some(FilterKind::Http),
        }
    }

    fn create_http_context(&mut self, _handle: ContextHandle) -> Option<Box<dyn HttpContext>> {
        match self.shape {
            Shape::BothPhases => Some(Box::new(BothPhases)),
            Shape::FanOut => Some(Box::<FanOut>::default()),
            Shape::Guard => None,
        }
    }

    fn create_tcp_context(&mut self, _handle: ContextHandle) -> Option<Box<dyn TcpContext>> {
        Some(Box::new(Guard))
    }
}

struct Harness {
    memory: Rc<MemoryHost>,
    dispatcher: Dispatcher,
}

fn harness(shape: Shape) -> Harness {
    let memory = Rc::new(MemoryHost::new());
    let factory: RootFactory =
        Arc::new(move |_| Box::new(ShapeRoot { shape }) as Box<dyn RootContext>);
    let mut dispatcher = Dispatcher::new(memory.clone(), factory);
    dispatcher.create_root(ContextHandle::new(1)).expect("root");
    dispatcher
        .create_filter(ContextHandle::new(2), ContextHandle::new(1))
        .expect("filter");
    Harness { memory, dispatcher }
}

fn respond(harness: &mut Harness, token: u32) {
    respond_under(harness, ContextHandle::new(2), token);
}

fn respond_under(harness: &mut Harness, addressed: ContextHandle, token: u32) {
    harness
        .memory
        .stage_callout_response(vec![(":status", "200")], b"");
    harness
        .dispatcher
        .on_http_call_response(addressed, CalloutTicket::new(token), 1, 0, 0)
        .expect("callout response");
}

#[test]
fn out_of_order_responses_resume_their_own_phase() {
    let mut harness = harness(Shape::BothPhases);
    let ctx = ContextHandle::new(2);
    assert_eq!(
        harness.dispatcher.on_request_headers(ctx, 3, false),
        Ok(Action::Pause)
    );
    assert_eq!(
        harness.dispatcher.on_response_headers(ctx, 2, false),
        Ok(Action::Pause)
    );
    let callouts = harness.memory.callouts();
    assert_eq!(callouts.len(), 2);
    assert_eq!(callouts[0].headers[1].1, "/request");

    respond(&mut harness, callouts[1].token);
    assert_eq!(
        harness.memory.continued_streams(),
        vec![StreamType::HttpResponse]
    );
    respond(&mut harness, callouts[0].token);
    assert_eq!(
        harness.memory.continued_streams(),
        vec![StreamType::HttpResponse, StreamType::HttpRequest]
    );
    assert_eq!(harness.dispatcher.outstanding_callouts(), 0);
}

#[test]
fn responses_addressed_to_the_root_reach_the_issuing_filter() {
    let mut harness = harness(Shape::BothPhases);
    let ctx = ContextHandle::new(2);
    harness
        .dispatcher
        .on_request_headers(ctx, 3, false)
        .expect("headers");
    harness
        .dispatcher
        .on_response_headers(ctx, 2, false)
        .expect("response headers");
    let callouts = harness.memory.callouts();

    respond_under(&mut harness, ContextHandle::new(1), callouts[0].token);
    assert_eq!(
        harness.memory.continued_streams(),
        vec![StreamType::HttpRequest]
    );
    respond_under(&mut harness, ContextHandle::new(1), callouts[1].token);
    assert_eq!(
        harness.memory.continued_streams(),
        vec![StreamType::HttpRequest, StreamType::HttpResponse]
    );
    assert_eq!(harness.dispatcher.outstanding_callouts(), 0);
}

#[test]
fn held_exchange_resumes_once_after_last_answer() {
    let mut harness = harness(Shape::FanOut);
    harness
        .dispatcher
        .on_request_headers(ContextHandle::new(2), 1, true)
        .expect("headers");
    let callouts = harness.memory.callouts();
    assert_eq!(harness.dispatcher.outstanding_callouts(), 2);

    respond(&mut harness, callouts[0].token);
    assert!(harness.memory.continued_streams().is_empty());
    respond(&mut harness, callouts[1].token);
    assert_eq!(
        harness.memory.continued_streams(),
        vec![StreamType::HttpRequest]
    );
}

#[test]
fn tcp_respond_closes_the_issuing_stream() {
    let mut harness = harness(Shape::Guard);
    assert_eq!(
        harness.dispatcher.on_new_connection(ContextHandle::new(2)),
        Ok(Action::Pause)
    );
    let token = harness.memory.callouts()[0].token;
    respond(&mut harness, token);
    assert_eq!(harness.memory.closed_streams(), vec![StreamType::Downstream]);
    assert!(harness.memory.local_responses().is_empty());
}

#[test]
fn callout_headers_arrive_at_the_host_in_order() {
    let mut harness = harness(Shape::FanOut);
    harness
        .dispatcher
        .on_request_headers(ContextHandle::new(2), 0, true)
        .expect("headers");
    let callouts = harness.memory.callouts();
    let callout = &callouts[1];
    assert_eq!(callout.upstream, "sidecar");
    assert_eq!(callout.timeout_ms, 500);
    assert_eq!(callout.headers, call_headers("/b").into_pairs());
}

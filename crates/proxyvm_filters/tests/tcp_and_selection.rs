use proxyvm_core::{
    init_logging, Action, BufferType, ContextHandle, CreateOutcome, ContextKind, DispatchError,
    Dispatcher, HookError, LogLevel, MemoryHost, PeerType, ProtocolViolation,
};
use proxyvm_filters::selector_factory;
use std::rc::Rc;

const ROOT: ContextHandle = ContextHandle::new(1);
const CONNECTION: ContextHandle = ContextHandle::new(7);

fn dispatcher(memory: &Rc<MemoryHost>, config: &str) -> Dispatcher {
    init_logging(LogLevel::Trace).expect("logging");
    memory.set_buffer(BufferType::PluginConfiguration, config);
    let mut dispatcher = Dispatcher::new(memory.clone(), selector_factory());
    dispatcher.create_root(ROOT).expect("root");
    dispatcher
}

#[test]
fn byte_counter_accumulates_downstream_bytes() {
    let memory = Rc::new(MemoryHost::new());
    let config = r#"{"filter":"byte_counter"}"#;
    let mut dispatcher = dispatcher(&memory, config);
    assert_eq!(dispatcher.on_plugin_start(ROOT, config.len()), Ok(true));
    assert_eq!(
        dispatcher.on_context_create(CONNECTION, ROOT),
        Ok(CreateOutcome::Created(ContextKind::TcpFilter))
    );

    assert_eq!(dispatcher.on_new_connection(CONNECTION), Ok(Action::Continue));
    assert_eq!(
        dispatcher.on_downstream_data(CONNECTION, 100, false),
        Ok(Action::Continue)
    );
    assert_eq!(
        dispatcher.on_downstream_data(CONNECTION, 50, true),
        Ok(Action::Continue)
    );
    assert_eq!(
        dispatcher.on_upstream_data(CONNECTION, 80, true),
        Ok(Action::Continue)
    );
    assert_eq!(memory.metric_value("tcp.downstream_bytes"), Some(150));

    dispatcher
        .on_downstream_close(CONNECTION, PeerType::Remote)
        .expect("closed");
    dispatcher.on_log(CONNECTION).expect("summary");
    assert!(memory.logged("downstream_bytes=150 upstream_bytes=0"));
    dispatcher.on_delete(CONNECTION).expect("deleted");
}

#[test]
fn byte_counter_counts_upstream_when_configured() {
    let memory = Rc::new(MemoryHost::new());
    let config = r#"{"filter":"byte_counter","settings":{"upstream_metric":"tcp.up"}}"#;
    let mut dispatcher = dispatcher(&memory, config);
    dispatcher
        .on_plugin_start(ROOT, config.len())
        .expect("configured");
    dispatcher
        .on_context_create(CONNECTION, ROOT)
        .expect("connection");

    dispatcher
        .on_upstream_data(CONNECTION, 64, false)
        .expect("upstream");
    assert_eq!(memory.metric_value("tcp.up"), Some(64));
    assert_eq!(memory.metric_value("tcp.downstream_bytes"), Some(0));
}

#[test]
fn unknown_filter_name_fails_configuration() {
    let memory = Rc::new(MemoryHost::new());
    let config = r#"{"filter":"rate_limit"}"#;
    let mut dispatcher = dispatcher(&memory, config);
    let err = dispatcher
        .on_plugin_start(ROOT, config.len())
        .expect_err("unknown filter");
    assert!(matches!(
        err,
        DispatchError::Hook {
            event: "on_plugin_start",
            error: HookError::Extension(_),
            ..
        }
    ));

    // An unconfigured root hands out no filter contexts.
    assert_eq!(
        dispatcher.on_context_create(CONNECTION, ROOT),
        Ok(CreateOutcome::Declined)
    );
    assert_eq!(
        dispatcher.on_downstream_data(CONNECTION, 1, false),
        Err(DispatchError::Protocol(ProtocolViolation::UnknownContext(
            CONNECTION
        )))
    );
}

#[test]
fn empty_configuration_is_rejected() {
    let memory = Rc::new(MemoryHost::new());
    let mut dispatcher = dispatcher(&memory, "  ");
    let err = dispatcher
        .on_plugin_start(ROOT, 2)
        .expect_err("empty configuration");
    assert!(err.to_string().contains("empty"));
    assert!(memory.logged("event=plugin_configure module=selector status=error"));
}

#[test]
fn reconfiguration_switches_the_active_filter() {
    let memory = Rc::new(MemoryHost::new());
    let first = r#"{"filter":"byte_counter"}"#;
    let mut dispatcher = dispatcher(&memory, first);
    dispatcher.on_plugin_start(ROOT, first.len()).expect("first");
    assert_eq!(
        dispatcher.on_context_create(CONNECTION, ROOT),
        Ok(CreateOutcome::Created(ContextKind::TcpFilter))
    );

    let second = r#"{"filter":"body_echo"}"#;
    memory.set_buffer(BufferType::PluginConfiguration, second);
    dispatcher.on_plugin_start(ROOT, second.len()).expect("second");
    assert_eq!(
        dispatcher.on_context_create(ContextHandle::new(8), ROOT),
        Ok(CreateOutcome::Created(ContextKind::HttpFilter))
    );
    assert!(memory.logged("filter=body_echo"));
}

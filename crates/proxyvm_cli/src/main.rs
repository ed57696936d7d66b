//! Native replay harness for the bundled filters.
//!
//! # Responsibility
//! - Drive one configured filter through a scripted event sequence against an
//!   in-memory host.
//! - Print one line per event plus a JSON summary of host-side effects.
//!
//! Without arguments it prints the runtime and ABI versions.

mod script;

use proxyvm_core::{
    BufferType, CalloutTicket, ContextHandle, DispatchError, Dispatcher, MapType, MemoryHost,
    QueueHandle, StreamType,
};
use script::{Pairs, Script, ScriptError, ScriptEvent};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt::Display;
use std::path::PathBuf;
use std::process::ExitCode;
use std::rc::Rc;

const ROOT: ContextHandle = ContextHandle::new(1);

#[derive(Debug, Serialize)]
struct Summary {
    filter: String,
    failed_events: usize,
    local_responses: Vec<ResponseSummary>,
    continued_streams: Vec<StreamType>,
    closed_streams: Vec<StreamType>,
    callouts_issued: usize,
    done_calls: usize,
    host_logs: Vec<String>,
}

#[derive(Debug, Serialize)]
struct ResponseSummary {
    status: u32,
    details: String,
    body: String,
}

struct Replay {
    memory: Rc<MemoryHost>,
    dispatcher: Dispatcher,
    live: BTreeSet<ContextHandle>,
    answered: usize,
    failed: usize,
}

impl Replay {
    fn start(script: &Script) -> Result<Self, ScriptError> {
        let config = script.plugin_config()?;
        let memory = Rc::new(MemoryHost::new());
        memory.set_buffer(BufferType::PluginConfiguration, &config);
        let mut dispatcher = Dispatcher::new(memory.clone(), proxyvm_filters::selector_factory());
        let _ = proxyvm_core::init_logging(proxyvm_core::default_log_level());
        dispatcher
            .create_root(ROOT)
            .map_err(|err| ScriptError::Invalid(err.to_string()))?;
        match dispatcher.on_plugin_start(ROOT, config.len()) {
            Ok(true) => {}
            Ok(false) => return Err(ScriptError::Invalid("filter rejected its settings".into())),
            Err(err) => return Err(ScriptError::Invalid(err.to_string())),
        }
        Ok(Self {
            memory,
            dispatcher,
            live: BTreeSet::new(),
            answered: 0,
            failed: 0,
        })
    }

    /// Creates the filter context on first mention.
    fn ensure(&mut self, raw: u32) -> Result<ContextHandle, DispatchError> {
        let handle = ContextHandle::new(raw);
        if self.live.insert(handle) {
            self.dispatcher.on_context_create(handle, ROOT)?;
        }
        Ok(handle)
    }

    fn run(&mut self, event: &ScriptEvent) -> (String, Result<String, DispatchError>) {
        match event {
            ScriptEvent::RequestHeaders {
                context,
                headers,
                end_of_stream,
            } => (
                format!("request_headers context={context}"),
                self.headers(*context, MapType::HttpRequestHeaders, headers, *end_of_stream),
            ),
            ScriptEvent::ResponseHeaders {
                context,
                headers,
                end_of_stream,
            } => (
                format!("response_headers context={context}"),
                self.headers(*context, MapType::HttpResponseHeaders, headers, *end_of_stream),
            ),
            ScriptEvent::RequestBody {
                context,
                chunk,
                end_of_stream,
            } => (
                format!("request_body context={context}"),
                self.data(*context, BufferType::HttpRequestBody, chunk, *end_of_stream),
            ),
            ScriptEvent::ResponseBody {
                context,
                chunk,
                end_of_stream,
            } => (
                format!("response_body context={context}"),
                self.data(*context, BufferType::HttpResponseBody, chunk, *end_of_stream),
            ),
            ScriptEvent::NewConnection { context } => (
                format!("new_connection context={context}"),
                self.ensure(*context).and_then(|handle| {
                    self.dispatcher.on_new_connection(handle).map(debug_string)
                }),
            ),
            ScriptEvent::DownstreamData {
                context,
                chunk,
                end_of_stream,
            } => (
                format!("downstream_data context={context}"),
                self.data(*context, BufferType::DownstreamData, chunk, *end_of_stream),
            ),
            ScriptEvent::UpstreamData {
                context,
                chunk,
                end_of_stream,
            } => (
                format!("upstream_data context={context}"),
                self.data(*context, BufferType::UpstreamData, chunk, *end_of_stream),
            ),
            ScriptEvent::CalloutResponse {
                context,
                status,
                body,
            } => (
                format!("callout_response context={context}"),
                self.callout_response(*context, status, body),
            ),
            ScriptEvent::QueueReady { queue } => (
                format!("queue_ready queue={queue}"),
                self.dispatcher
                    .on_queue_ready(ROOT, QueueHandle::new(*queue))
                    .map(|()| "ok".to_string()),
            ),
            ScriptEvent::Tick => (
                "tick".to_string(),
                self.dispatcher.on_tick(ROOT).map(|()| "ok".to_string()),
            ),
            ScriptEvent::Log { context } => (
                format!("log context={context}"),
                self.dispatcher
                    .on_log(ContextHandle::new(*context))
                    .map(|()| "ok".to_string()),
            ),
            ScriptEvent::Delete { context } => {
                let handle = ContextHandle::new(*context);
                self.live.remove(&handle);
                (
                    format!("delete context={context}"),
                    self.dispatcher.on_delete(handle).map(|()| "ok".to_string()),
                )
            }
            ScriptEvent::Done => (
                "done".to_string(),
                self.dispatcher
                    .on_done(ROOT)
                    .map(|done| format!("done={done}")),
            ),
        }
    }

    fn headers(
        &mut self,
        context: u32,
        kind: MapType,
        headers: &Pairs,
        end_of_stream: bool,
    ) -> Result<String, DispatchError> {
        let handle = self.ensure(context)?;
        self.memory.set_map(kind, headers.iter().cloned());
        let count = headers.len();
        let action = match kind {
            MapType::HttpResponseHeaders => {
                self.dispatcher
                    .on_response_headers(handle, count, end_of_stream)?
            }
            _ => self
                .dispatcher
                .on_request_headers(handle, count, end_of_stream)?,
        };
        Ok(debug_string(action))
    }

    fn data(
        &mut self,
        context: u32,
        kind: BufferType,
        chunk: &str,
        end_of_stream: bool,
    ) -> Result<String, DispatchError> {
        let handle = self.ensure(context)?;
        let action = match kind {
            BufferType::HttpRequestBody | BufferType::HttpResponseBody => {
                self.memory.append_buffer(kind, chunk);
                if kind == BufferType::HttpRequestBody {
                    self.dispatcher
                        .on_request_body(handle, chunk.len(), end_of_stream)?
                } else {
                    self.dispatcher
                        .on_response_body(handle, chunk.len(), end_of_stream)?
                }
            }
            BufferType::UpstreamData => {
                self.memory.set_buffer(kind, chunk);
                self.dispatcher
                    .on_upstream_data(handle, chunk.len(), end_of_stream)?
            }
            _ => {
                self.memory.set_buffer(kind, chunk);
                self.dispatcher
                    .on_downstream_data(handle, chunk.len(), end_of_stream)?
            }
        };
        Ok(debug_string(action))
    }

    fn callout_response(
        &mut self,
        context: u32,
        status: &str,
        body: &str,
    ) -> Result<String, DispatchError> {
        let Some(callout) = self.memory.callouts().get(self.answered).cloned() else {
            return Ok("no_callout".to_string());
        };
        self.answered += 1;
        self.memory
            .stage_callout_response(vec![(":status", status)], body);
        self.dispatcher.on_http_call_response(
            ContextHandle::new(context),
            CalloutTicket::new(callout.token),
            1,
            body.len(),
            0,
        )?;
        Ok(format!("ticket={}", callout.token))
    }

    fn summary(&self, filter: &str) -> Summary {
        Summary {
            filter: filter.to_string(),
            failed_events: self.failed,
            local_responses: self
                .memory
                .local_responses()
                .into_iter()
                .map(|response| ResponseSummary {
                    status: response.status_code,
                    details: response.details,
                    body: String::from_utf8_lossy(&response.body).into_owned(),
                })
                .collect(),
            continued_streams: self.memory.continued_streams(),
            closed_streams: self.memory.closed_streams(),
            callouts_issued: self.memory.callouts().len(),
            done_calls: self.memory.done_calls(),
            host_logs: self
                .memory
                .logs()
                .into_iter()
                .map(|(level, message)| format!("[{}] {}", level.as_str(), message))
                .collect(),
        }
    }
}

fn debug_string(value: impl std::fmt::Debug) -> String {
    format!("{value:?}")
}

fn fail(err: impl Display) -> ExitCode {
    eprintln!("proxyvm: {err}");
    ExitCode::FAILURE
}

fn main() -> ExitCode {
    let Some(path) = std::env::args_os().nth(1).map(PathBuf::from) else {
        println!("proxyvm runtime version={}", proxyvm_core::runtime_version());
        println!("proxyvm abi version={}", proxyvm_core::ABI_VERSION);
        return ExitCode::SUCCESS;
    };

    let script = match script::load(&path) {
        Ok(script) => script,
        Err(err) => return fail(err),
    };
    let mut replay = match Replay::start(&script) {
        Ok(replay) => replay,
        Err(err) => return fail(err),
    };

    for event in &script.events {
        let (label, outcome) = replay.run(event);
        match outcome {
            Ok(outcome) => println!("{label} outcome={outcome}"),
            Err(err) => {
                replay.failed += 1;
                println!("{label} outcome=error error={err}");
            }
        }
    }

    match serde_json::to_string_pretty(&replay.summary(&script.filter)) {
        Ok(summary) => {
            println!("{summary}");
            ExitCode::SUCCESS
        }
        Err(err) => fail(err),
    }
}

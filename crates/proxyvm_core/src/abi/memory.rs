//! In-process host for native execution and tests.
//!
//! # Responsibility
//! - Implement every `HostAbi` operation against plain in-memory state.
//! - Expose inspection helpers so callers can assert what the guest asked for.
//!
//! # Invariants
//! - Returned bytes are always allocated through `abi::alloc`, exactly like a
//!   real host calling `proxy_on_memory_allocate`.
//! - State borrows never span a call back into guest code.

use crate::abi::alloc::ReturnData;
use crate::abi::{BufferType, HostAbi, LogLevel, MapType, MetricKind, Status, StreamType};
use crate::marshal::FieldCollection;
use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};

/// One outbound call issued by the guest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCallout {
    pub token: u32,
    pub upstream: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub trailers: Vec<(String, String)>,
    pub timeout_ms: u32,
}

/// One local response synthesized by the guest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedResponse {
    pub status_code: u32,
    pub details: String,
    pub body: Vec<u8>,
    pub headers: Vec<(String, String)>,
    pub grpc_status: i32,
}

#[derive(Debug)]
struct MemoryMetric {
    kind: MetricKind,
    name: String,
    value: u64,
}

#[derive(Debug)]
struct MemoryQueue {
    vm_id: String,
    name: String,
    messages: VecDeque<Vec<u8>>,
}

#[derive(Debug)]
struct MemoryState {
    vm_id: String,
    log_level: LogLevel,
    now_nanos: u64,
    tick_period_ms: Option<u32>,
    buffers: HashMap<BufferType, Vec<u8>>,
    maps: HashMap<MapType, FieldCollection>,
    properties: HashMap<Vec<u8>, Vec<u8>>,
    shared_data: HashMap<Vec<u8>, (Vec<u8>, u32)>,
    queues: Vec<MemoryQueue>,
    metrics: Vec<MemoryMetric>,
    next_token: u32,
    callouts: Vec<RecordedCallout>,
    responses: Vec<RecordedResponse>,
    continued: Vec<StreamType>,
    closed: Vec<StreamType>,
    logs: Vec<(LogLevel, String)>,
    done_calls: usize,
}

impl Default for MemoryState {
    fn default() -> Self {
        Self {
            vm_id: String::new(),
            log_level: LogLevel::Trace,
            now_nanos: 0,
            tick_period_ms: None,
            buffers: HashMap::new(),
            maps: HashMap::new(),
            properties: HashMap::new(),
            shared_data: HashMap::new(),
            queues: Vec::new(),
            metrics: Vec::new(),
            next_token: 1,
            callouts: Vec::new(),
            responses: Vec::new(),
            continued: Vec::new(),
            closed: Vec::new(),
            logs: Vec::new(),
            done_calls: 0,
        }
    }
}

/// Host implementation backed by in-memory collections.
#[derive(Debug, Default)]
pub struct MemoryHost {
    state: RefCell<MemoryState>,
}

impl MemoryHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Host with a VM id, used when resolving queues by `(vm_id, name)`.
    pub fn with_vm_id(vm_id: impl Into<String>) -> Self {
        let host = Self::default();
        host.state.borrow_mut().vm_id = vm_id.into();
        host
    }

    pub fn set_buffer(&self, kind: BufferType, bytes: impl AsRef<[u8]>) {
        self.state
            .borrow_mut()
            .buffers
            .insert(kind, bytes.as_ref().to_vec());
    }

    /// Appends bytes, the way the proxy buffers a paused body.
    pub fn append_buffer(&self, kind: BufferType, bytes: impl AsRef<[u8]>) {
        self.state
            .borrow_mut()
            .buffers
            .entry(kind)
            .or_default()
            .extend_from_slice(bytes.as_ref());
    }

    pub fn set_map<I, K, V>(&self, kind: MapType, pairs: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.state
            .borrow_mut()
            .maps
            .insert(kind, FieldCollection::from_pairs(pairs));
    }

    pub fn map(&self, kind: MapType) -> Vec<(String, String)> {
        self.state
            .borrow()
            .maps
            .get(&kind)
            .cloned()
            .map(FieldCollection::into_pairs)
            .unwrap_or_default()
    }

    /// Stages the headers and body a callout response callback will read.
    pub fn stage_callout_response<I, K, V>(&self, headers: I, body: impl AsRef<[u8]>)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.set_map(MapType::HttpCallResponseHeaders, headers);
        self.set_buffer(BufferType::HttpCallResponseBody, body);
    }

    pub fn shared_data(&self, key: &str) -> Option<(Vec<u8>, u32)> {
        self.state.borrow().shared_data.get(key.as_bytes()).cloned()
    }

    pub fn queue_len(&self, queue_id: u32) -> Option<usize> {
        let state = self.state.borrow();
        queue_index(&state, queue_id).map(|index| state.queues[index].messages.len())
    }

    /// Pushes a message as if another VM enqueued it.
    pub fn push_queue_message(&self, queue_id: u32, bytes: impl AsRef<[u8]>) -> bool {
        let mut state = self.state.borrow_mut();
        match queue_index(&state, queue_id) {
            Some(index) => {
                state.queues[index]
                    .messages
                    .push_back(bytes.as_ref().to_vec());
                true
            }
            None => false,
        }
    }

    pub fn metric_value(&self, name: &str) -> Option<u64> {
        self.state
            .borrow()
            .metrics
            .iter()
            .find(|metric| metric.name == name)
            .map(|metric| metric.value)
    }

    pub fn callouts(&self) -> Vec<RecordedCallout> {
        self.state.borrow().callouts.clone()
    }

    pub fn local_responses(&self) -> Vec<RecordedResponse> {
        self.state.borrow().responses.clone()
    }

    pub fn continued_streams(&self) -> Vec<StreamType> {
        self.state.borrow().continued.clone()
    }

    pub fn closed_streams(&self) -> Vec<StreamType> {
        self.state.borrow().closed.clone()
    }

    pub fn tick_period_ms(&self) -> Option<u32> {
        self.state.borrow().tick_period_ms
    }

    pub fn logs(&self) -> Vec<(LogLevel, String)> {
        self.state.borrow().logs.clone()
    }

    pub fn logged(&self, needle: &str) -> bool {
        self.state
            .borrow()
            .logs
            .iter()
            .any(|(_, message)| message.contains(needle))
    }

    pub fn done_calls(&self) -> usize {
        self.state.borrow().done_calls
    }
}

impl HostAbi for MemoryHost {
    fn log(&self, level: LogLevel, message: &[u8]) -> Status {
        self.state
            .borrow_mut()
            .logs
            .push((level, String::from_utf8_lossy(message).into_owned()));
        Status::Ok
    }

    fn get_log_level(&self, level: &mut u32) -> Status {
        *level = self.state.borrow().log_level.as_raw();
        Status::Ok
    }

    fn get_current_time_nanos(&self, nanos: &mut u64) -> Status {
        *nanos = self.state.borrow().now_nanos;
        Status::Ok
    }

    fn set_tick_period(&self, millis: u32) -> Status {
        self.state.borrow_mut().tick_period_ms = (millis != 0).then_some(millis);
        Status::Ok
    }

    fn get_buffer_bytes(
        &self,
        kind: BufferType,
        start: usize,
        max_size: usize,
        ret: &mut ReturnData,
    ) -> Status {
        let state = self.state.borrow();
        let Some(buffer) = state.buffers.get(&kind) else {
            return Status::NotFound;
        };
        if start > buffer.len() {
            return Status::BadArgument;
        }
        let end = start.saturating_add(max_size).min(buffer.len());
        if end > start {
            ret.fill_copy(&buffer[start..end]);
        }
        Status::Ok
    }

    fn set_buffer_bytes(
        &self,
        kind: BufferType,
        start: usize,
        size: usize,
        bytes: &[u8],
    ) -> Status {
        let mut state = self.state.borrow_mut();
        let buffer = state.buffers.entry(kind).or_default();
        if start > buffer.len() {
            return Status::BadArgument;
        }
        let end = start.saturating_add(size).min(buffer.len());
        buffer.splice(start..end, bytes.iter().copied());
        Status::Ok
    }

    fn get_map_pairs(&self, kind: MapType, ret: &mut ReturnData) -> Status {
        let state = self.state.borrow();
        if let Some(fields) = state.maps.get(&kind) {
            if !fields.is_empty() {
                ret.fill_copy(&fields.encode());
            }
        }
        Status::Ok
    }

    fn set_map_pairs(&self, kind: MapType, serialized: &[u8]) -> Status {
        match FieldCollection::decode(serialized) {
            Ok(fields) => {
                self.state.borrow_mut().maps.insert(kind, fields);
                Status::Ok
            }
            Err(_) => Status::SerializationFailure,
        }
    }

    fn get_map_value(&self, kind: MapType, key: &[u8], ret: &mut ReturnData) -> Status {
        let state = self.state.borrow();
        let Ok(key) = std::str::from_utf8(key) else {
            return Status::BadArgument;
        };
        match state.maps.get(&kind).and_then(|fields| fields.get(key)) {
            Some(value) => {
                ret.fill_copy(value.as_bytes());
                Status::Ok
            }
            None => Status::NotFound,
        }
    }

    fn add_map_value(&self, kind: MapType, key: &[u8], value: &[u8]) -> Status {
        let (Ok(key), Ok(value)) = (std::str::from_utf8(key), std::str::from_utf8(value)) else {
            return Status::BadArgument;
        };
        self.state
            .borrow_mut()
            .maps
            .entry(kind)
            .or_default()
            .add(key, value);
        Status::Ok
    }

    fn replace_map_value(&self, kind: MapType, key: &[u8], value: &[u8]) -> Status {
        let (Ok(key), Ok(value)) = (std::str::from_utf8(key), std::str::from_utf8(value)) else {
            return Status::BadArgument;
        };
        self.state
            .borrow_mut()
            .maps
            .entry(kind)
            .or_default()
            .replace(key, value);
        Status::Ok
    }

    fn remove_map_value(&self, kind: MapType, key: &[u8]) -> Status {
        let Ok(key) = std::str::from_utf8(key) else {
            return Status::BadArgument;
        };
        if let Some(fields) = self.state.borrow_mut().maps.get_mut(&kind) {
            fields.remove(key);
        }
        Status::Ok
    }

    fn get_property(&self, path: &[u8], ret: &mut ReturnData) -> Status {
        match self.state.borrow().properties.get(path) {
            Some(value) => {
                if !value.is_empty() {
                    ret.fill_copy(value);
                }
                Status::Ok
            }
            None => Status::NotFound,
        }
    }

    fn set_property(&self, path: &[u8], value: &[u8]) -> Status {
        self.state
            .borrow_mut()
            .properties
            .insert(path.to_vec(), value.to_vec());
        Status::Ok
    }

    fn get_shared_data(&self, key: &[u8], ret: &mut ReturnData, cas: &mut u32) -> Status {
        match self.state.borrow().shared_data.get(key) {
            Some((value, version)) => {
                if !value.is_empty() {
                    ret.fill_copy(value);
                }
                *cas = *version;
                Status::Ok
            }
            None => Status::NotFound,
        }
    }

    fn set_shared_data(&self, key: &[u8], value: &[u8], cas: u32) -> Status {
        let mut state = self.state.borrow_mut();
        let current = state.shared_data.get(key).map(|(_, version)| *version);
        if cas != 0 && current != Some(cas) {
            return Status::CasMismatch;
        }
        let next = current.map_or(1, |version| version.wrapping_add(1).max(1));
        state
            .shared_data
            .insert(key.to_vec(), (value.to_vec(), next));
        Status::Ok
    }

    fn register_shared_queue(&self, name: &[u8], queue_id: &mut u32) -> Status {
        let Ok(name) = std::str::from_utf8(name) else {
            return Status::BadArgument;
        };
        let mut state = self.state.borrow_mut();
        let vm_id = state.vm_id.clone();
        let index = match state
            .queues
            .iter()
            .position(|queue| queue.vm_id == vm_id && queue.name == name)
        {
            Some(index) => index,
            None => {
                state.queues.push(MemoryQueue {
                    vm_id,
                    name: name.to_string(),
                    messages: VecDeque::new(),
                });
                state.queues.len() - 1
            }
        };
        *queue_id = index as u32 + 1;
        Status::Ok
    }

    fn resolve_shared_queue(&self, vm_id: &[u8], name: &[u8], queue_id: &mut u32) -> Status {
        let (Ok(vm_id), Ok(name)) = (std::str::from_utf8(vm_id), std::str::from_utf8(name)) else {
            return Status::BadArgument;
        };
        match self
            .state
            .borrow()
            .queues
            .iter()
            .position(|queue| queue.vm_id == vm_id && queue.name == name)
        {
            Some(index) => {
                *queue_id = index as u32 + 1;
                Status::Ok
            }
            None => Status::NotFound,
        }
    }

    fn enqueue_shared_queue(&self, queue_id: u32, bytes: &[u8]) -> Status {
        let mut state = self.state.borrow_mut();
        match queue_index(&state, queue_id) {
            Some(index) => {
                state.queues[index].messages.push_back(bytes.to_vec());
                Status::Ok
            }
            None => Status::NotFound,
        }
    }

    fn dequeue_shared_queue(&self, queue_id: u32, ret: &mut ReturnData) -> Status {
        let mut state = self.state.borrow_mut();
        let Some(index) = queue_index(&state, queue_id) else {
            return Status::NotFound;
        };
        match state.queues[index].messages.pop_front() {
            Some(message) => {
                if !message.is_empty() {
                    ret.fill_copy(&message);
                }
                Status::Ok
            }
            None => Status::Empty,
        }
    }

    fn continue_stream(&self, stream: StreamType) -> Status {
        self.state.borrow_mut().continued.push(stream);
        Status::Ok
    }

    fn close_stream(&self, stream: StreamType) -> Status {
        self.state.borrow_mut().closed.push(stream);
        Status::Ok
    }

    fn send_local_response(
        &self,
        status_code: u32,
        details: &[u8],
        body: &[u8],
        headers: &[u8],
        grpc_status: i32,
    ) -> Status {
        let Ok(headers) = FieldCollection::decode(headers) else {
            return Status::SerializationFailure;
        };
        self.state.borrow_mut().responses.push(RecordedResponse {
            status_code,
            details: String::from_utf8_lossy(details).into_owned(),
            body: body.to_vec(),
            headers: headers.into_pairs(),
            grpc_status,
        });
        Status::Ok
    }

    fn dispatch_http_call(
        &self,
        upstream: &[u8],
        headers: &[u8],
        body: &[u8],
        trailers: &[u8],
        timeout_ms: u32,
        token: &mut u32,
    ) -> Status {
        let (Ok(headers), Ok(trailers)) = (
            FieldCollection::decode(headers),
            FieldCollection::decode(trailers),
        ) else {
            return Status::SerializationFailure;
        };
        if upstream.is_empty()
            || [":method", ":path", ":authority"]
                .iter()
                .any(|pseudo| headers.get(pseudo).is_none())
        {
            return Status::BadArgument;
        }
        let mut state = self.state.borrow_mut();
        let issued = state.next_token;
        state.next_token = issued.wrapping_add(1).max(1);
        state.callouts.push(RecordedCallout {
            token: issued,
            upstream: String::from_utf8_lossy(upstream).into_owned(),
            headers: headers.into_pairs(),
            body: body.to_vec(),
            trailers: trailers.into_pairs(),
            timeout_ms,
        });
        *token = issued;
        Status::Ok
    }

    fn define_metric(&self, kind: MetricKind, name: &[u8], metric_id: &mut u32) -> Status {
        let Ok(name) = std::str::from_utf8(name) else {
            return Status::BadArgument;
        };
        let mut state = self.state.borrow_mut();
        let index = match state
            .metrics
            .iter()
            .position(|metric| metric.name == name && metric.kind == kind)
        {
            Some(index) => index,
            None => {
                state.metrics.push(MemoryMetric {
                    kind,
                    name: name.to_string(),
                    value: 0,
                });
                state.metrics.len() - 1
            }
        };
        *metric_id = index as u32 + 1;
        Status::Ok
    }

    fn increment_metric(&self, metric_id: u32, offset: i64) -> Status {
        let mut state = self.state.borrow_mut();
        let Some(metric) = metric_slot(&mut state, metric_id) else {
            return Status::NotFound;
        };
        match metric.kind {
            MetricKind::Counter if offset < 0 => Status::BadArgument,
            MetricKind::Histogram => Status::BadArgument,
            _ => {
                metric.value = metric.value.wrapping_add_signed(offset);
                Status::Ok
            }
        }
    }

    fn record_metric(&self, metric_id: u32, value: u64) -> Status {
        let mut state = self.state.borrow_mut();
        let Some(metric) = metric_slot(&mut state, metric_id) else {
            return Status::NotFound;
        };
        if metric.kind == MetricKind::Counter {
            return Status::BadArgument;
        }
        metric.value = value;
        Status::Ok
    }

    fn get_metric(&self, metric_id: u32, value: &mut u64) -> Status {
        let mut state = self.state.borrow_mut();
        match metric_slot(&mut state, metric_id) {
            Some(metric) => {
                *value = metric.value;
                Status::Ok
            }
            None => Status::NotFound,
        }
    }

    fn done(&self) -> Status {
        self.state.borrow_mut().done_calls += 1;
        Status::Ok
    }
}

fn queue_index(state: &MemoryState, queue_id: u32) -> Option<usize> {
    let index = (queue_id as usize).checked_sub(1)?;
    (index < state.queues.len()).then_some(index)
}

fn metric_slot(state: &mut MemoryState, metric_id: u32) -> Option<&mut MemoryMetric> {
    let index = (metric_id as usize).checked_sub(1)?;
    state.metrics.get_mut(index)
}

//! Typed, ownership-safe host operations.

use crate::abi::{
    BufferType, HostAbi, LogLevel, MapType, MetricKind, ReturnData, Status, StreamType,
};
use crate::error::{HostError, HostResult};
use crate::flow::LocalResponse;
use crate::marshal::{CalloutTicket, CasToken, FieldCollection, MetricHandle, OwnedBuffer, QueueHandle};
use log::debug;
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Shared-data entry read from the host.
#[derive(Debug)]
pub struct SharedValue {
    pub value: OwnedBuffer,
    /// Token to pass back to `set_shared_data` for a conditional write.
    pub cas: Option<CasToken>,
}

/// Guest-side view of every host capability.
///
/// Each method invokes one raw host call, maps a non-`Ok` status to a
/// [`HostError`], and adopts returned memory into owned values. Callouts
/// dispatched through this type are remembered until the dispatcher collects
/// them at the end of the current event.
pub struct Host {
    abi: Rc<dyn HostAbi>,
    issued_callouts: RefCell<Vec<CalloutTicket>>,
    tearing_down: Cell<bool>,
}

impl Host {
    pub fn new(abi: Rc<dyn HostAbi>) -> Self {
        Self {
            abi,
            issued_callouts: RefCell::new(Vec::new()),
            tearing_down: Cell::new(false),
        }
    }

    pub fn log(&self, level: LogLevel, message: &str) -> HostResult<()> {
        check("log", self.abi.log(level, message.as_bytes()))
    }

    pub fn log_level(&self) -> HostResult<LogLevel> {
        let mut raw = 0u32;
        check("get_log_level", self.abi.get_log_level(&mut raw))?;
        Ok(LogLevel::from_raw(raw))
    }

    pub fn current_time(&self) -> HostResult<SystemTime> {
        let mut nanos = 0u64;
        check("get_current_time", self.abi.get_current_time_nanos(&mut nanos))?;
        Ok(UNIX_EPOCH + Duration::from_nanos(nanos))
    }

    /// Arms the root tick timer; `Duration::ZERO` disarms it.
    pub fn set_tick_period(&self, period: Duration) -> HostResult<()> {
        let millis = u32::try_from(period.as_millis()).unwrap_or(u32::MAX);
        check("set_tick_period", self.abi.set_tick_period(millis))
    }

    /// Reads `max_size` bytes of a host buffer starting at `start`.
    ///
    /// Callers pass the size reported by the triggering event; the host never
    /// returns more than asked for.
    pub fn get_buffer(
        &self,
        kind: BufferType,
        start: usize,
        max_size: usize,
    ) -> HostResult<OwnedBuffer> {
        let mut slot = ReturnData::new();
        check(
            "get_buffer_bytes",
            self.abi.get_buffer_bytes(kind, start, max_size, &mut slot),
        )?;
        Ok(OwnedBuffer::adopt(&mut slot))
    }

    /// Replaces `size` bytes at `start` of a host buffer with `bytes`.
    pub fn set_buffer(
        &self,
        kind: BufferType,
        start: usize,
        size: usize,
        bytes: &[u8],
    ) -> HostResult<()> {
        check(
            "set_buffer_bytes",
            self.abi.set_buffer_bytes(kind, start, size, bytes),
        )
    }

    pub fn get_fields(&self, kind: MapType) -> HostResult<FieldCollection> {
        let mut slot = ReturnData::new();
        check("get_map_pairs", self.abi.get_map_pairs(kind, &mut slot))?;
        let raw = OwnedBuffer::adopt(&mut slot);
        FieldCollection::decode(&raw)
    }

    /// Replaces the whole host collection with `fields`.
    pub fn set_fields(&self, kind: MapType, fields: &FieldCollection) -> HostResult<()> {
        check("set_map_pairs", self.abi.set_map_pairs(kind, &fields.encode()))
    }

    /// Reads a single value; an absent key is `None`, not an error.
    pub fn get_field(&self, kind: MapType, key: &str) -> HostResult<Option<String>> {
        let mut slot = ReturnData::new();
        match check(
            "get_map_value",
            self.abi.get_map_value(kind, key.as_bytes(), &mut slot),
        ) {
            Ok(()) => {}
            Err(HostError::NotFound) => return Ok(None),
            Err(err) => return Err(err),
        }
        let raw = OwnedBuffer::adopt(&mut slot);
        raw.as_str().map(|value| Some(value.to_string()))
    }

    pub fn add_field(&self, kind: MapType, key: &str, value: &str) -> HostResult<()> {
        check(
            "add_map_value",
            self.abi
                .add_map_value(kind, key.as_bytes(), value.as_bytes()),
        )
    }

    pub fn replace_field(&self, kind: MapType, key: &str, value: &str) -> HostResult<()> {
        check(
            "replace_map_value",
            self.abi
                .replace_map_value(kind, key.as_bytes(), value.as_bytes()),
        )
    }

    pub fn remove_field(&self, kind: MapType, key: &str) -> HostResult<()> {
        check(
            "remove_map_value",
            self.abi.remove_map_value(kind, key.as_bytes()),
        )
    }

    /// Looks up a host property such as `["request", "path"]`.
    pub fn get_property(&self, path: &[&str]) -> HostResult<Option<OwnedBuffer>> {
        let mut slot = ReturnData::new();
        match check(
            "get_property",
            self.abi.get_property(&encode_path(path), &mut slot),
        ) {
            Ok(()) => Ok(Some(OwnedBuffer::adopt(&mut slot))),
            Err(HostError::NotFound) => Ok(None),
            Err(err) => Err(err),
        }
    }

    pub fn set_property(&self, path: &[&str], value: &[u8]) -> HostResult<()> {
        check(
            "set_property",
            self.abi.set_property(&encode_path(path), value),
        )
    }

    /// Reads a shared-data entry; a key never written yields `NotFound`.
    pub fn get_shared_data(&self, key: &str) -> HostResult<SharedValue> {
        let mut slot = ReturnData::new();
        let mut cas = 0u32;
        check(
            "get_shared_data",
            self.abi.get_shared_data(key.as_bytes(), &mut slot, &mut cas),
        )?;
        Ok(SharedValue {
            value: OwnedBuffer::adopt(&mut slot),
            cas: (cas != 0).then(|| CasToken::new(cas)),
        })
    }

    /// Writes a shared-data entry, conditionally when `cas` is set.
    ///
    /// A stale token yields `CasMismatch`; re-read and retry.
    pub fn set_shared_data(
        &self,
        key: &str,
        value: &[u8],
        cas: Option<CasToken>,
    ) -> HostResult<()> {
        check(
            "set_shared_data",
            self.abi.set_shared_data(
                key.as_bytes(),
                value,
                cas.map(CasToken::raw).unwrap_or(0),
            ),
        )
    }

    pub fn register_shared_queue(&self, name: &str) -> HostResult<QueueHandle> {
        let mut raw = 0u32;
        check(
            "register_shared_queue",
            self.abi.register_shared_queue(name.as_bytes(), &mut raw),
        )?;
        Ok(QueueHandle::new(raw))
    }

    pub fn resolve_shared_queue(&self, vm_id: &str, name: &str) -> HostResult<QueueHandle> {
        let mut raw = 0u32;
        check(
            "resolve_shared_queue",
            self.abi
                .resolve_shared_queue(vm_id.as_bytes(), name.as_bytes(), &mut raw),
        )?;
        Ok(QueueHandle::new(raw))
    }

    pub fn enqueue_shared_queue(&self, queue: QueueHandle, bytes: &[u8]) -> HostResult<()> {
        check(
            "enqueue_shared_queue",
            self.abi.enqueue_shared_queue(queue.raw(), bytes),
        )
    }

    /// Pops one message; an empty queue yields `Empty` and stays untouched.
    pub fn dequeue_shared_queue(&self, queue: QueueHandle) -> HostResult<OwnedBuffer> {
        let mut slot = ReturnData::new();
        check(
            "dequeue_shared_queue",
            self.abi.dequeue_shared_queue(queue.raw(), &mut slot),
        )?;
        Ok(OwnedBuffer::adopt(&mut slot))
    }

    /// Issues an outbound call and returns its ticket.
    ///
    /// The current event's dispatcher records the ticket together with the
    /// stream phase that issued it.
    pub fn dispatch_http_call(
        &self,
        upstream: &str,
        headers: &FieldCollection,
        body: Option<&[u8]>,
        trailers: &FieldCollection,
        timeout: Duration,
    ) -> HostResult<CalloutTicket> {
        // A context being deleted can never receive the response.
        if self.tearing_down.get() {
            debug!(
                "event=host_call module=marshal status=refused op=dispatch_http_call reason=teardown"
            );
            return Err(HostError::BadArgument);
        }
        let mut token = 0u32;
        let timeout_ms = u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX);
        check(
            "dispatch_http_call",
            self.abi.dispatch_http_call(
                upstream.as_bytes(),
                &headers.encode(),
                body.unwrap_or_default(),
                &trailers.encode(),
                timeout_ms,
                &mut token,
            ),
        )?;
        let ticket = CalloutTicket::new(token);
        self.issued_callouts.borrow_mut().push(ticket);
        Ok(ticket)
    }

    /// Terminates the current HTTP exchange with a synthesized response.
    pub fn send_local_response(&self, response: &LocalResponse) -> HostResult<()> {
        check(
            "send_local_response",
            self.abi.send_local_response(
                response.status_code,
                response.details.as_bytes(),
                &response.body,
                &response.headers.encode(),
                response.grpc_status.unwrap_or(-1),
            ),
        )
    }

    pub fn resume_http_request(&self) -> HostResult<()> {
        self.continue_stream(StreamType::HttpRequest)
    }

    pub fn resume_http_response(&self) -> HostResult<()> {
        self.continue_stream(StreamType::HttpResponse)
    }

    pub fn continue_stream(&self, stream: StreamType) -> HostResult<()> {
        check("continue_stream", self.abi.continue_stream(stream))
    }

    pub fn close_stream(&self, stream: StreamType) -> HostResult<()> {
        check("close_stream", self.abi.close_stream(stream))
    }

    pub fn define_metric(&self, kind: MetricKind, name: &str) -> HostResult<MetricHandle> {
        let mut raw = 0u32;
        check(
            "define_metric",
            self.abi.define_metric(kind, name.as_bytes(), &mut raw),
        )?;
        Ok(MetricHandle::new(raw))
    }

    pub fn increment_metric(&self, metric: MetricHandle, offset: i64) -> HostResult<()> {
        check(
            "increment_metric",
            self.abi.increment_metric(metric.raw(), offset),
        )
    }

    pub fn record_metric(&self, metric: MetricHandle, value: u64) -> HostResult<()> {
        check("record_metric", self.abi.record_metric(metric.raw(), value))
    }

    pub fn get_metric(&self, metric: MetricHandle) -> HostResult<u64> {
        let mut value = 0u64;
        check("get_metric", self.abi.get_metric(metric.raw(), &mut value))?;
        Ok(value)
    }

    /// Tells the host a deferred `on_plugin_done` has finished draining.
    pub fn done(&self) -> HostResult<()> {
        check("done", self.abi.done())
    }

    /// Marks the span of an `on_delete` hook; callouts are refused inside it.
    pub(crate) fn set_tearing_down(&self, tearing_down: bool) {
        self.tearing_down.set(tearing_down);
    }

    pub(crate) fn take_issued_callouts(&self) -> Vec<CalloutTicket> {
        std::mem::take(&mut *self.issued_callouts.borrow_mut())
    }
}

fn check(op: &'static str, status: Status) -> HostResult<()> {
    status.into_result().map_err(|err| {
        debug!(
            "event=host_call module=marshal status=error op={} code={} error={}",
            op,
            status.as_raw(),
            err
        );
        err
    })
}

fn encode_path(path: &[&str]) -> Vec<u8> {
    path.join("\0").into_bytes()
}

#[cfg(test)]
mod tests {
    use super::{encode_path, Host};
    use crate::abi::memory::MemoryHost;
    use crate::abi::{BufferType, MapType, MetricKind};
    use crate::error::HostError;
    use crate::marshal::FieldCollection;
    use std::rc::Rc;
    use std::time::Duration;

    fn host() -> (Rc<MemoryHost>, Host) {
        let memory = Rc::new(MemoryHost::new());
        let host = Host::new(memory.clone());
        (memory, host)
    }

    #[test]
    fn property_paths_are_nul_joined() {
        assert_eq!(encode_path(&["request", "path"]), b"request\0path".to_vec());
    }

    #[test]
    fn replace_then_read_back_preserves_order() {
        let (_memory, host) = host();
        let fields = FieldCollection::from_pairs([
            ("z-last", "1"),
            ("a-first", "2"),
            ("z-last", "3"),
        ]);
        host.set_fields(MapType::HttpRequestHeaders, &fields)
            .expect("set fields");
        let read = host
            .get_fields(MapType::HttpRequestHeaders)
            .expect("get fields");
        assert_eq!(read, fields);
    }

    #[test]
    fn single_value_reads_map_absence_to_none() {
        let (memory, host) = host();
        memory.set_map(MapType::HttpRequestHeaders, [(":path", "/ping")]);
        assert_eq!(
            host.get_field(MapType::HttpRequestHeaders, ":path")
                .expect("get field"),
            Some("/ping".to_string())
        );
        assert_eq!(
            host.get_field(MapType::HttpRequestHeaders, "x-missing")
                .expect("get field"),
            None
        );
    }

    #[test]
    fn buffer_reads_are_bounded_by_requested_size() {
        let (memory, host) = host();
        memory.set_buffer(BufferType::HttpRequestBody, b"0123456789");
        let slice = host
            .get_buffer(BufferType::HttpRequestBody, 2, 3)
            .expect("get buffer");
        assert_eq!(slice.as_bytes(), b"234");
    }

    #[test]
    fn metrics_round_trip_through_handles() {
        let (_memory, host) = host();
        let metric = host
            .define_metric(MetricKind::Counter, "requests_total")
            .expect("define");
        host.increment_metric(metric, 3).expect("increment");
        host.increment_metric(metric, 4).expect("increment");
        assert_eq!(host.get_metric(metric).expect("get"), 7);
        assert_eq!(
            host.increment_metric(metric, -1),
            Err(HostError::BadArgument)
        );
    }

    #[test]
    fn dispatched_callouts_are_collected_once() {
        let (_memory, host) = host();
        let headers = FieldCollection::from_pairs([
            (":method", "GET"),
            (":path", "/check"),
            (":authority", "auth"),
        ]);
        let ticket = host
            .dispatch_http_call(
                "auth",
                &headers,
                None,
                &FieldCollection::new(),
                Duration::from_millis(200),
            )
            .expect("dispatch");
        assert_eq!(host.take_issued_callouts(), vec![ticket]);
        assert!(host.take_issued_callouts().is_empty());
    }

    #[test]
    fn callouts_without_pseudo_headers_are_rejected() {
        let (_memory, host) = host();
        let err = host
            .dispatch_http_call(
                "auth",
                &FieldCollection::new(),
                None,
                &FieldCollection::new(),
                Duration::from_millis(200),
            )
            .expect_err("missing pseudo headers");
        assert_eq!(err, HostError::BadArgument);
        assert!(host.take_issued_callouts().is_empty());
    }
}

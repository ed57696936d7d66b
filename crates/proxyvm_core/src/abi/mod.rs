//! Raw host-call surface of the proxy-wasm ABI.
//!
//! # Responsibility
//! - Describe every guest-invoked host operation as one `HostAbi` method.
//! - Define status codes and wire enums shared with the host.
//!
//! # Invariants
//! - Every operation returns a `Status`; data only flows back through
//!   out-parameters.
//! - Host-allocated bytes arrive in a `ReturnData` slot and are released by
//!   the slot unless the marshalling layer adopts them.
//!
//! # See also
//! - `crate::marshal` for the typed, ownership-safe wrapper.

pub mod alloc;
pub mod memory;
mod status;
mod types;

pub use alloc::ReturnData;
pub use status::Status;
pub use types::{BufferType, LogLevel, MapType, MetricKind, PeerType, StreamType};

/// Raw, fallible host operations.
///
/// Implementations: the wasm import table in `proxyvm_ffi` and the in-process
/// [`memory::MemoryHost`]. Byte arguments are passed exactly as they cross
/// the ABI (serialized maps, NUL-joined property paths).
pub trait HostAbi {
    fn log(&self, level: LogLevel, message: &[u8]) -> Status;
    fn get_log_level(&self, level: &mut u32) -> Status;
    fn get_current_time_nanos(&self, nanos: &mut u64) -> Status;
    fn set_tick_period(&self, millis: u32) -> Status;

    fn get_buffer_bytes(
        &self,
        kind: BufferType,
        start: usize,
        max_size: usize,
        ret: &mut ReturnData,
    ) -> Status;
    fn set_buffer_bytes(&self, kind: BufferType, start: usize, size: usize, bytes: &[u8])
        -> Status;

    fn get_map_pairs(&self, kind: MapType, ret: &mut ReturnData) -> Status;
    fn set_map_pairs(&self, kind: MapType, serialized: &[u8]) -> Status;
    fn get_map_value(&self, kind: MapType, key: &[u8], ret: &mut ReturnData) -> Status;
    fn add_map_value(&self, kind: MapType, key: &[u8], value: &[u8]) -> Status;
    fn replace_map_value(&self, kind: MapType, key: &[u8], value: &[u8]) -> Status;
    fn remove_map_value(&self, kind: MapType, key: &[u8]) -> Status;

    fn get_property(&self, path: &[u8], ret: &mut ReturnData) -> Status;
    fn set_property(&self, path: &[u8], value: &[u8]) -> Status;

    fn get_shared_data(&self, key: &[u8], ret: &mut ReturnData, cas: &mut u32) -> Status;
    fn set_shared_data(&self, key: &[u8], value: &[u8], cas: u32) -> Status;

    fn register_shared_queue(&self, name: &[u8], queue_id: &mut u32) -> Status;
    fn resolve_shared_queue(&self, vm_id: &[u8], name: &[u8], queue_id: &mut u32) -> Status;
    fn enqueue_shared_queue(&self, queue_id: u32, bytes: &[u8]) -> Status;
    fn dequeue_shared_queue(&self, queue_id: u32, ret: &mut ReturnData) -> Status;

    fn continue_stream(&self, stream: StreamType) -> Status;
    fn close_stream(&self, stream: StreamType) -> Status;
    fn send_local_response(
        &self,
        status_code: u32,
        details: &[u8],
        body: &[u8],
        headers: &[u8],
        grpc_status: i32,
    ) -> Status;

    #[allow(clippy::too_many_arguments)]
    fn dispatch_http_call(
        &self,
        upstream: &[u8],
        headers: &[u8],
        body: &[u8],
        trailers: &[u8],
        timeout_ms: u32,
        token: &mut u32,
    ) -> Status;

    fn define_metric(&self, kind: MetricKind, name: &[u8], metric_id: &mut u32) -> Status;
    fn increment_metric(&self, metric_id: u32, offset: i64) -> Status;
    fn record_metric(&self, metric_id: u32, value: u64) -> Status;
    fn get_metric(&self, metric_id: u32, value: &mut u64) -> Status;

    fn done(&self) -> Status;
}

//! Host import table.
//!
//! On wasm targets every `HostAbi` method maps onto one `proxy_*` import.
//! Native builds have no import table; they install a runtime explicitly.

use proxyvm_core::HostAbi;
use std::rc::Rc;

#[cfg(target_arch = "wasm32")]
pub(crate) fn default_host() -> Option<Rc<dyn HostAbi>> {
    Some(Rc::new(WasmHost))
}

#[cfg(not(target_arch = "wasm32"))]
pub(crate) fn default_host() -> Option<Rc<dyn HostAbi>> {
    None
}

#[cfg(target_arch = "wasm32")]
pub use wasm::WasmHost;

#[cfg(target_arch = "wasm32")]
mod wasm {
    use proxyvm_core::abi::ReturnData;
    use proxyvm_core::{
        BufferType, HostAbi, LogLevel, MapType, MetricKind, Status, StreamType,
    };

    extern "C" {
        fn proxy_log(level: u32, message_data: *const u8, message_size: usize) -> u32;
        fn proxy_get_log_level(return_level: *mut u32) -> u32;
        fn proxy_get_current_time_nanoseconds(return_time: *mut u64) -> u32;
        fn proxy_set_tick_period_milliseconds(period: u32) -> u32;
        fn proxy_get_buffer_bytes(
            buffer_type: u32,
            start: usize,
            max_size: usize,
            return_buffer_data: *mut *mut u8,
            return_buffer_size: *mut usize,
        ) -> u32;
        fn proxy_set_buffer_bytes(
            buffer_type: u32,
            start: usize,
            size: usize,
            buffer_data: *const u8,
            buffer_size: usize,
        ) -> u32;
        fn proxy_get_header_map_pairs(
            map_type: u32,
            return_map_data: *mut *mut u8,
            return_map_size: *mut usize,
        ) -> u32;
        fn proxy_set_header_map_pairs(map_type: u32, map_data: *const u8, map_size: usize) -> u32;
        fn proxy_get_header_map_value(
            map_type: u32,
            key_data: *const u8,
            key_size: usize,
            return_value_data: *mut *mut u8,
            return_value_size: *mut usize,
        ) -> u32;
        fn proxy_add_header_map_value(
            map_type: u32,
            key_data: *const u8,
            key_size: usize,
            value_data: *const u8,
            value_size: usize,
        ) -> u32;
        fn proxy_replace_header_map_value(
            map_type: u32,
            key_data: *const u8,
            key_size: usize,
            value_data: *const u8,
            value_size: usize,
        ) -> u32;
        fn proxy_remove_header_map_value(map_type: u32, key_data: *const u8, key_size: usize)
            -> u32;
        fn proxy_get_property(
            path_data: *const u8,
            path_size: usize,
            return_value_data: *mut *mut u8,
            return_value_size: *mut usize,
        ) -> u32;
        fn proxy_set_property(
            path_data: *const u8,
            path_size: usize,
            value_data: *const u8,
            value_size: usize,
        ) -> u32;
        fn proxy_get_shared_data(
            key_data: *const u8,
            key_size: usize,
            return_value_data: *mut *mut u8,
            return_value_size: *mut usize,
            return_cas: *mut u32,
        ) -> u32;
        fn proxy_set_shared_data(
            key_data: *const u8,
            key_size: usize,
            value_data: *const u8,
            value_size: usize,
            cas: u32,
        ) -> u32;
        fn proxy_register_shared_queue(
            name_data: *const u8,
            name_size: usize,
            return_id: *mut u32,
        ) -> u32;
        fn proxy_resolve_shared_queue(
            vm_id_data: *const u8,
            vm_id_size: usize,
            name_data: *const u8,
            name_size: usize,
            return_id: *mut u32,
        ) -> u32;
        fn proxy_enqueue_shared_queue(
            queue_id: u32,
            value_data: *const u8,
            value_size: usize,
        ) -> u32;
        fn proxy_dequeue_shared_queue(
            queue_id: u32,
            return_value_data: *mut *mut u8,
            return_value_size: *mut usize,
        ) -> u32;
        fn proxy_continue_stream(stream_type: u32) -> u32;
        fn proxy_close_stream(stream_type: u32) -> u32;
        fn proxy_send_local_response(
            status_code: u32,
            status_code_details_data: *const u8,
            status_code_details_size: usize,
            body_data: *const u8,
            body_size: usize,
            headers_data: *const u8,
            headers_size: usize,
            grpc_status: i32,
        ) -> u32;
        fn proxy_http_call(
            upstream_data: *const u8,
            upstream_size: usize,
            headers_data: *const u8,
            headers_size: usize,
            body_data: *const u8,
            body_size: usize,
            trailers_data: *const u8,
            trailers_size: usize,
            timeout: u32,
            return_token: *mut u32,
        ) -> u32;
        fn proxy_define_metric(
            metric_type: u32,
            name_data: *const u8,
            name_size: usize,
            return_id: *mut u32,
        ) -> u32;
        fn proxy_increment_metric(metric_id: u32, offset: i64) -> u32;
        fn proxy_record_metric(metric_id: u32, value: u64) -> u32;
        fn proxy_get_metric(metric_id: u32, return_value: *mut u64) -> u32;
        fn proxy_done() -> u32;
    }

    /// `HostAbi` backed by the proxy's import table.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct WasmHost;

    // SAFETY (all calls below): pointers come from live slices or from
    // `ReturnData` slots that outlive the call; the host only writes through
    // out-parameters and allocates returned blocks via
    // `proxy_on_memory_allocate`.
    impl HostAbi for WasmHost {
        fn log(&self, level: LogLevel, message: &[u8]) -> Status {
            Status::from_raw(unsafe { proxy_log(level.as_raw(), message.as_ptr(), message.len()) })
        }

        fn get_log_level(&self, level: &mut u32) -> Status {
            Status::from_raw(unsafe { proxy_get_log_level(level) })
        }

        fn get_current_time_nanos(&self, nanos: &mut u64) -> Status {
            Status::from_raw(unsafe { proxy_get_current_time_nanoseconds(nanos) })
        }

        fn set_tick_period(&self, millis: u32) -> Status {
            Status::from_raw(unsafe { proxy_set_tick_period_milliseconds(millis) })
        }

        fn get_buffer_bytes(
            &self,
            kind: BufferType,
            start: usize,
            max_size: usize,
            ret: &mut ReturnData,
        ) -> Status {
            let (data, size) = ret.out_params();
            Status::from_raw(unsafe {
                proxy_get_buffer_bytes(kind.as_raw(), start, max_size, data, size)
            })
        }

        fn set_buffer_bytes(
            &self,
            kind: BufferType,
            start: usize,
            size: usize,
            bytes: &[u8],
        ) -> Status {
            Status::from_raw(unsafe {
                proxy_set_buffer_bytes(kind.as_raw(), start, size, bytes.as_ptr(), bytes.len())
            })
        }

        fn get_map_pairs(&self, kind: MapType, ret: &mut ReturnData) -> Status {
            let (data, size) = ret.out_params();
            Status::from_raw(unsafe { proxy_get_header_map_pairs(kind.as_raw(), data, size) })
        }

        fn set_map_pairs(&self, kind: MapType, serialized: &[u8]) -> Status {
            Status::from_raw(unsafe {
                proxy_set_header_map_pairs(kind.as_raw(), serialized.as_ptr(), serialized.len())
            })
        }

        fn get_map_value(&self, kind: MapType, key: &[u8], ret: &mut ReturnData) -> Status {
            let (data, size) = ret.out_params();
            Status::from_raw(unsafe {
                proxy_get_header_map_value(kind.as_raw(), key.as_ptr(), key.len(), data, size)
            })
        }

        fn add_map_value(&self, kind: MapType, key: &[u8], value: &[u8]) -> Status {
            Status::from_raw(unsafe {
                proxy_add_header_map_value(
                    kind.as_raw(),
                    key.as_ptr(),
                    key.len(),
                    value.as_ptr(),
                    value.len(),
                )
            })
        }

        fn replace_map_value(&self, kind: MapType, key: &[u8], value: &[u8]) -> Status {
            Status::from_raw(unsafe {
                proxy_replace_header_map_value(
                    kind.as_raw(),
                    key.as_ptr(),
                    key.len(),
                    value.as_ptr(),
                    value.len(),
                )
            })
        }

        fn remove_map_value(&self, kind: MapType, key: &[u8]) -> Status {
            Status::from_raw(unsafe {
                proxy_remove_header_map_value(kind.as_raw(), key.as_ptr(), key.len())
            })
        }

        fn get_property(&self, path: &[u8], ret: &mut ReturnData) -> Status {
            let (data, size) = ret.out_params();
            Status::from_raw(unsafe { proxy_get_property(path.as_ptr(), path.len(), data, size) })
        }

        fn set_property(&self, path: &[u8], value: &[u8]) -> Status {
            Status::from_raw(unsafe {
                proxy_set_property(path.as_ptr(), path.len(), value.as_ptr(), value.len())
            })
        }

        fn get_shared_data(&self, key: &[u8], ret: &mut ReturnData, cas: &mut u32) -> Status {
            let (data, size) = ret.out_params();
            Status::from_raw(unsafe {
                proxy_get_shared_data(key.as_ptr(), key.len(), data, size, cas)
            })
        }

        fn set_shared_data(&self, key: &[u8], value: &[u8], cas: u32) -> Status {
            Status::from_raw(unsafe {
                proxy_set_shared_data(key.as_ptr(), key.len(), value.as_ptr(), value.len(), cas)
            })
        }

        fn register_shared_queue(&self, name: &[u8], queue_id: &mut u32) -> Status {
            Status::from_raw(unsafe {
                proxy_register_shared_queue(name.as_ptr(), name.len(), queue_id)
            })
        }

        fn resolve_shared_queue(&self, vm_id: &[u8], name: &[u8], queue_id: &mut u32) -> Status {
            Status::from_raw(unsafe {
                proxy_resolve_shared_queue(
                    vm_id.as_ptr(),
                    vm_id.len(),
                    name.as_ptr(),
                    name.len(),
                    queue_id,
                )
            })
        }

        fn enqueue_shared_queue(&self, queue_id: u32, bytes: &[u8]) -> Status {
            Status::from_raw(unsafe {
                proxy_enqueue_shared_queue(queue_id, bytes.as_ptr(), bytes.len())
            })
        }

        fn dequeue_shared_queue(&self, queue_id: u32, ret: &mut ReturnData) -> Status {
            let (data, size) = ret.out_params();
            Status::from_raw(unsafe { proxy_dequeue_shared_queue(queue_id, data, size) })
        }

        fn continue_stream(&self, stream: StreamType) -> Status {
            Status::from_raw(unsafe { proxy_continue_stream(stream.as_raw()) })
        }

        fn close_stream(&self, stream: StreamType) -> Status {
            Status::from_raw(unsafe { proxy_close_stream(stream.as_raw()) })
        }

        fn send_local_response(
            &self,
            status_code: u32,
            details: &[u8],
            body: &[u8],
            headers: &[u8],
            grpc_status: i32,
        ) -> Status {
            Status::from_raw(unsafe {
                proxy_send_local_response(
                    status_code,
                    details.as_ptr(),
                    details.len(),
                    body.as_ptr(),
                    body.len(),
                    headers.as_ptr(),
                    headers.len(),
                    grpc_status,
                )
            })
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
            Status::from_raw(unsafe {
                proxy_http_call(
                    upstream.as_ptr(),
                    upstream.len(),
                    headers.as_ptr(),
                    headers.len(),
                    body.as_ptr(),
                    body.len(),
                    trailers.as_ptr(),
                    trailers.len(),
                    timeout_ms,
                    token,
                )
            })
        }

        fn define_metric(&self, kind: MetricKind, name: &[u8], metric_id: &mut u32) -> Status {
            Status::from_raw(unsafe {
                proxy_define_metric(kind.as_raw(), name.as_ptr(), name.len(), metric_id)
            })
        }

        fn increment_metric(&self, metric_id: u32, offset: i64) -> Status {
            Status::from_raw(unsafe { proxy_increment_metric(metric_id, offset) })
        }

        fn record_metric(&self, metric_id: u32, value: u64) -> Status {
            Status::from_raw(unsafe { proxy_record_metric(metric_id, value) })
        }

        fn get_metric(&self, metric_id: u32, value: &mut u64) -> Status {
            Status::from_raw(unsafe { proxy_get_metric(metric_id, value) })
        }

        fn done(&self) -> Status {
            Status::from_raw(unsafe { proxy_done() })
        }
    }
}

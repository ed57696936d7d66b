//! Guest entry points invoked by the host.
//!
//! # FFI contract
//! - Every export receives flat scalars only.
//! - No export panics; failures are logged and answered neutrally:
//!   `Continue` for stream events, `false` for start events, `true` for done.

use crate::runtime::dispatch;
use log::warn;
use proxyvm_core::abi::alloc;
use proxyvm_core::{
    default_log_level, init_logging, Action, CalloutTicket, ContextHandle, PeerType, QueueHandle,
};

const CONTINUE: u32 = 0;

fn handle(context_id: u32) -> ContextHandle {
    ContextHandle::new(context_id)
}

fn action(outcome: Action) -> u32 {
    outcome.as_raw()
}

/// ABI version marker the host probes for.
#[no_mangle]
pub extern "C" fn proxy_abi_version_0_2_1() {}

/// Allocates guest memory for data the host returns.
///
/// # FFI contract
/// - The block stays live until the guest adopts or releases it.
#[no_mangle]
pub extern "C" fn proxy_on_memory_allocate(size: usize) -> *mut u8 {
    alloc::allocate(size)
}

/// Creates a root (`parent_context_id == 0`) or filter context.
#[no_mangle]
pub extern "C" fn proxy_on_context_create(context_id: u32, parent_context_id: u32) {
    dispatch("proxy_on_context_create", (), |dispatcher| {
        dispatcher
            .on_context_create(handle(context_id), handle(parent_context_id))
            .map(|_| ())
    });
}

/// Starts the VM: binds logging at the host's level, then runs the root hook.
#[no_mangle]
pub extern "C" fn proxy_on_vm_start(context_id: u32, vm_configuration_size: usize) -> bool {
    dispatch("proxy_on_vm_start", false, |dispatcher| {
        let level = dispatcher
            .host()
            .log_level()
            .unwrap_or_else(|_| default_log_level());
        if let Err(err) = init_logging(level) {
            warn!(
                "event=vm_logging_init module=ffi status=error error={}",
                err
            );
        }
        dispatcher.on_vm_start(handle(context_id), vm_configuration_size)
    })
}

#[no_mangle]
pub extern "C" fn proxy_on_configure(context_id: u32, plugin_configuration_size: usize) -> bool {
    dispatch("proxy_on_configure", false, |dispatcher| {
        dispatcher.on_plugin_start(handle(context_id), plugin_configuration_size)
    })
}

#[no_mangle]
pub extern "C" fn proxy_on_tick(context_id: u32) {
    dispatch("proxy_on_tick", (), |dispatcher| {
        dispatcher.on_tick(handle(context_id))
    });
}

#[no_mangle]
pub extern "C" fn proxy_on_queue_ready(context_id: u32, queue_id: u32) {
    dispatch("proxy_on_queue_ready", (), |dispatcher| {
        dispatcher.on_queue_ready(handle(context_id), QueueHandle::new(queue_id))
    });
}

#[no_mangle]
pub extern "C" fn proxy_on_request_headers(
    context_id: u32,
    num_headers: usize,
    end_of_stream: bool,
) -> u32 {
    dispatch("proxy_on_request_headers", CONTINUE, |dispatcher| {
        dispatcher
            .on_request_headers(handle(context_id), num_headers, end_of_stream)
            .map(action)
    })
}

#[no_mangle]
pub extern "C" fn proxy_on_request_body(
    context_id: u32,
    body_size: usize,
    end_of_stream: bool,
) -> u32 {
    dispatch("proxy_on_request_body", CONTINUE, |dispatcher| {
        dispatcher
            .on_request_body(handle(context_id), body_size, end_of_stream)
            .map(action)
    })
}

#[no_mangle]
pub extern "C" fn proxy_on_request_trailers(context_id: u32, num_trailers: usize) -> u32 {
    dispatch("proxy_on_request_trailers", CONTINUE, |dispatcher| {
        dispatcher
            .on_request_trailers(handle(context_id), num_trailers)
            .map(action)
    })
}

#[no_mangle]
pub extern "C" fn proxy_on_response_headers(
    context_id: u32,
    num_headers: usize,
    end_of_stream: bool,
) -> u32 {
    dispatch("proxy_on_response_headers", CONTINUE, |dispatcher| {
        dispatcher
            .on_response_headers(handle(context_id), num_headers, end_of_stream)
            .map(action)
    })
}

#[no_mangle]
pub extern "C" fn proxy_on_response_body(
    context_id: u32,
    body_size: usize,
    end_of_stream: bool,
) -> u32 {
    dispatch("proxy_on_response_body", CONTINUE, |dispatcher| {
        dispatcher
            .on_response_body(handle(context_id), body_size, end_of_stream)
            .map(action)
    })
}

#[no_mangle]
pub extern "C" fn proxy_on_response_trailers(context_id: u32, num_trailers: usize) -> u32 {
    dispatch("proxy_on_response_trailers", CONTINUE, |dispatcher| {
        dispatcher
            .on_response_trailers(handle(context_id), num_trailers)
            .map(action)
    })
}

#[no_mangle]
pub extern "C" fn proxy_on_http_call_response(
    context_id: u32,
    token_id: u32,
    num_headers: usize,
    body_size: usize,
    num_trailers: usize,
) {
    dispatch("proxy_on_http_call_response", (), |dispatcher| {
        dispatcher.on_http_call_response(
            handle(context_id),
            CalloutTicket::new(token_id),
            num_headers,
            body_size,
            num_trailers,
        )
    });
}

#[no_mangle]
pub extern "C" fn proxy_on_new_connection(context_id: u32) -> u32 {
    dispatch("proxy_on_new_connection", CONTINUE, |dispatcher| {
        dispatcher.on_new_connection(handle(context_id)).map(action)
    })
}

#[no_mangle]
pub extern "C" fn proxy_on_downstream_data(
    context_id: u32,
    data_size: usize,
    end_of_stream: bool,
) -> u32 {
    dispatch("proxy_on_downstream_data", CONTINUE, |dispatcher| {
        dispatcher
            .on_downstream_data(handle(context_id), data_size, end_of_stream)
            .map(action)
    })
}

#[no_mangle]
pub extern "C" fn proxy_on_upstream_data(
    context_id: u32,
    data_size: usize,
    end_of_stream: bool,
) -> u32 {
    dispatch("proxy_on_upstream_data", CONTINUE, |dispatcher| {
        dispatcher
            .on_upstream_data(handle(context_id), data_size, end_of_stream)
            .map(action)
    })
}

#[no_mangle]
pub extern "C" fn proxy_on_downstream_connection_close(context_id: u32, peer_type: u32) {
    dispatch("proxy_on_downstream_connection_close", (), |dispatcher| {
        dispatcher.on_downstream_close(handle(context_id), PeerType::from_raw(peer_type))
    });
}

#[no_mangle]
pub extern "C" fn proxy_on_upstream_connection_close(context_id: u32, peer_type: u32) {
    dispatch("proxy_on_upstream_connection_close", (), |dispatcher| {
        dispatcher.on_upstream_close(handle(context_id), PeerType::from_raw(peer_type))
    });
}

#[no_mangle]
pub extern "C" fn proxy_on_log(context_id: u32) {
    dispatch("proxy_on_log", (), |dispatcher| {
        dispatcher.on_log(handle(context_id))
    });
}

/// Asks a context whether it can be torn down now.
///
/// # FFI contract
/// - `false` means the root will call `proxy_done` once it has drained.
#[no_mangle]
pub extern "C" fn proxy_on_done(context_id: u32) -> bool {
    dispatch("proxy_on_done", true, |dispatcher| {
        dispatcher.on_done(handle(context_id))
    })
}

#[no_mangle]
pub extern "C" fn proxy_on_delete(context_id: u32) {
    dispatch("proxy_on_delete", (), |dispatcher| {
        dispatcher.on_delete(handle(context_id))
    });
}

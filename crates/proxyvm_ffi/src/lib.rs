//! proxy-wasm ABI surface of the guest runtime.
//!
//! # Responsibility
//! - Export every `proxy_on_*` entry point the host invokes.
//! - Bind the host's import table to `proxyvm_core::HostAbi`.
//! - Hold one dispatcher per VM instance.
//!
//! # Invariants
//! - Exported functions never panic across the ABI boundary.
//! - Failed events answer the host with a neutral value.

mod exports;
mod host;
mod runtime;

pub use exports::*;
pub use runtime::{install_runtime, runtime_installed, set_root_factory, uninstall_runtime};

#[cfg(target_arch = "wasm32")]
pub use host::WasmHost;

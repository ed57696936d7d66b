//! Bundled proxy-wasm filters.
//!
//! One module binary carries every filter; each root context becomes the
//! filter its plugin configuration names. See [`selector`] for the
//! configuration contract.

pub mod auth_gate;
pub mod body_echo;
pub mod byte_counter;
pub mod config;
pub mod header_rewrite;
pub mod queue_relay;
pub mod selector;

pub use config::{parse_plugin_config, ConfigError, FilterName, PluginConfig};
pub use selector::{build_root, register, selector_factory, SelectorRoot};

// Re-exported so the host finds the `proxy_on_*` entry points in this binary.
pub use proxyvm_ffi::*;

/// Module initialization export; the host calls it before any event.
#[cfg(target_arch = "wasm32")]
#[cfg_attr(target_os = "wasi", export_name = "_initialize")]
#[cfg_attr(not(target_os = "wasi"), export_name = "_start")]
pub extern "C" fn initialize() {
    if let Err(err) = register() {
        log::warn!("event=module_init module=filters status=error error={}", err);
    }
}

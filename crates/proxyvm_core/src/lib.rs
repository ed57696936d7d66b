//! Guest-side runtime for proxy-wasm extensions.
//! This crate owns the host-call contract, context lifecycle and flow control;
//! it knows nothing about any particular extension.

pub mod abi;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod flow;
pub mod logging;
pub mod marshal;

pub use abi::memory::MemoryHost;
pub use abi::{BufferType, HostAbi, LogLevel, MapType, MetricKind, PeerType, Status, StreamType};
pub use context::{
    install_root_factory, installed_root_factory, ContextHandle, ContextKind, FactoryError,
    FilterKind, HttpContext, RootContext, RootFactory, TcpContext,
};
pub use dispatch::{CreateOutcome, Dispatcher};
pub use error::{
    DispatchError, DispatchResult, HookError, HookResult, HostError, HostResult,
    ProtocolViolation,
};
pub use flow::{Action, CalloutResponse, LocalResponse, Resolution, StreamPhase};
pub use logging::{default_log_level, init_logging, logging_status};
pub use marshal::{
    CalloutTicket, CasToken, FieldCollection, Host, MetricHandle, OwnedBuffer, QueueHandle,
    SharedValue,
};

/// proxy-wasm ABI revision the exports implement.
pub const ABI_VERSION: &str = "0.2.1";

/// Returns the runtime crate version.
pub fn runtime_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

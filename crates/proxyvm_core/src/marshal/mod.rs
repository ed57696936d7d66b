//! Marshalling layer between extensions and the raw ABI.
//!
//! # Responsibility
//! - Turn host status codes into `HostError` values.
//! - Adopt host memory into owned buffers and decoded field collections.
//!
//! # Invariants
//! - Every host-sourced block is released exactly once, on every exit path.
//! - `FieldCollection::encode` is deterministic and matches the host layout.
//!
//! # See also
//! - `crate::abi` for the raw surface this layer wraps.

mod buffer;
mod fields;
mod handles;
mod host;

pub use buffer::OwnedBuffer;
pub use fields::FieldCollection;
pub use handles::{CalloutTicket, CasToken, MetricHandle, QueueHandle};
pub use host::{Host, SharedValue};

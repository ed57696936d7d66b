//! Error taxonomy for the guest runtime.
//!
//! # Responsibility
//! - Classify host-call failures (`HostError`).
//! - Name host/guest desync conditions (`ProtocolViolation`).
//! - Carry hook failures out of one event without touching runtime state.
//!
//! # Invariants
//! - `NotFound`, `Empty` and `CasMismatch` describe optional or racing shared
//!   state and are recoverable; everything else is a defect for the current
//!   event.
//! - A `DispatchError` never implies registry corruption: the failing event is
//!   dropped, other contexts keep running.

use crate::context::{ContextHandle, ContextKind};
use crate::marshal::CalloutTicket;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Classified failure of one host call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostError {
    NotFound,
    Empty,
    BadArgument,
    SerializationError,
    CasMismatch,
    InternalFailure,
}

impl HostError {
    /// Whether callers may handle this locally and skip optional behavior.
    pub fn is_recoverable(self) -> bool {
        matches!(self, Self::NotFound | Self::Empty | Self::CasMismatch)
    }
}

impl Display for HostError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound => write!(f, "host state not found"),
            Self::Empty => write!(f, "host state is empty"),
            Self::BadArgument => write!(f, "host rejected the call arguments"),
            Self::SerializationError => write!(f, "host data could not be (de)serialized"),
            Self::CasMismatch => write!(f, "compare-and-swap token is stale"),
            Self::InternalFailure => write!(f, "host reported an internal failure"),
        }
    }
}

impl Error for HostError {}

pub type HostResult<T> = Result<T, HostError>;

/// Host/guest desync: the host addressed something the guest does not track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolViolation {
    InvalidHandle,
    UnknownContext(ContextHandle),
    HandleInUse(ContextHandle),
    KindMismatch {
        handle: ContextHandle,
        expected: ContextKind,
        actual: ContextKind,
    },
    UnknownTicket(CalloutTicket),
    DuplicateTicket(CalloutTicket),
}

impl Display for ProtocolViolation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidHandle => write!(f, "context handle 0 is reserved"),
            Self::UnknownContext(handle) => write!(f, "context not found: {handle}"),
            Self::HandleInUse(handle) => write!(f, "context handle already live: {handle}"),
            Self::KindMismatch {
                handle,
                expected,
                actual,
            } => write!(
                f,
                "context {handle} is a {actual} context, expected {expected}"
            ),
            Self::UnknownTicket(ticket) => write!(f, "callout ticket not outstanding: {ticket}"),
            Self::DuplicateTicket(ticket) => {
                write!(f, "callout ticket already outstanding: {ticket}")
            }
        }
    }
}

impl Error for ProtocolViolation {}

/// Failure raised by an extension hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookError {
    Host(HostError),
    Extension(String),
}

impl HookError {
    pub fn extension(message: impl Into<String>) -> Self {
        Self::Extension(message.into())
    }
}

impl Display for HookError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Host(err) => write!(f, "host call failed: {err}"),
            Self::Extension(message) => write!(f, "extension failed: {message}"),
        }
    }
}

impl Error for HookError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Host(err) => Some(err),
            Self::Extension(_) => None,
        }
    }
}

impl From<HostError> for HookError {
    fn from(value: HostError) -> Self {
        Self::Host(value)
    }
}

pub type HookResult<T> = Result<T, HookError>;

/// Outcome of one host event that did not complete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    Protocol(ProtocolViolation),
    Hook {
        handle: ContextHandle,
        event: &'static str,
        error: HookError,
    },
}

impl DispatchError {
    pub fn is_protocol_violation(&self) -> bool {
        matches!(self, Self::Protocol(_))
    }
}

impl Display for DispatchError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Protocol(err) => write!(f, "protocol violation: {err}"),
            Self::Hook {
                handle,
                event,
                error,
            } => write!(f, "{event} aborted for context {handle}: {error}"),
        }
    }
}

impl Error for DispatchError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Protocol(err) => Some(err),
            Self::Hook { error, .. } => Some(error),
        }
    }
}

impl From<ProtocolViolation> for DispatchError {
    fn from(value: ProtocolViolation) -> Self {
        Self::Protocol(value)
    }
}

pub type DispatchResult<T> = Result<T, DispatchError>;

#[cfg(test)]
mod tests {
    use super::{DispatchError, HookError, HostError, ProtocolViolation};
    use crate::context::{ContextHandle, ContextKind};
    use std::error::Error;

    #[test]
    fn recoverable_classification_matches_optional_state() {
        assert!(HostError::NotFound.is_recoverable());
        assert!(HostError::Empty.is_recoverable());
        assert!(HostError::CasMismatch.is_recoverable());
        assert!(!HostError::BadArgument.is_recoverable());
        assert!(!HostError::InternalFailure.is_recoverable());
    }

    #[test]
    fn hook_error_keeps_host_source() {
        let err = HookError::from(HostError::BadArgument);
        assert!(err.source().is_some());
        assert!(err.to_string().contains("rejected"));
    }

    #[test]
    fn protocol_violation_messages_name_the_handle() {
        let err = DispatchError::from(ProtocolViolation::KindMismatch {
            handle: ContextHandle::new(7),
            expected: ContextKind::HttpFilter,
            actual: ContextKind::Root,
        });
        assert!(err.is_protocol_violation());
        let message = err.to_string();
        assert!(message.contains("7"));
        assert!(message.contains("root"));
    }
}

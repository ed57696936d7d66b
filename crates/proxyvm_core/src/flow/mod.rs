//! Cooperative flow control.
//!
//! # Responsibility
//! - Define the Continue/Pause signal returned by stream-bearing hooks.
//! - Describe how a callout response settles the exchange it paused.
//! - Correlate outstanding callout tickets with their issuing phase.
//!
//! # Invariants
//! - Pause state lives in the extension; the runtime only tracks tickets.
//! - A ticket is consumed by exactly one response callback.
//! - A response resumes the phase that issued the ticket, never the phase
//!   that happens to be current.

mod callout;

pub use callout::{CalloutLedger, PendingCallout};

use crate::abi::StreamType;
use crate::marshal::{CalloutTicket, FieldCollection};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Signal returned to the host by stream-bearing callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Forward held data and keep iterating the filter chain.
    Continue,
    /// Hold the exchange at its current phase.
    Pause,
}

impl Action {
    pub fn as_raw(self) -> u32 {
        match self {
            Self::Continue => 0,
            Self::Pause => 1,
        }
    }
}

/// Phase of the event during which a callout was issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamPhase {
    HttpRequest,
    HttpResponse,
    Downstream,
    Upstream,
    /// Root timers, queue delivery, logging: nothing to resume.
    Background,
}

impl StreamPhase {
    /// Stream to continue or close when settling this phase.
    pub fn stream(self) -> Option<StreamType> {
        match self {
            Self::HttpRequest => Some(StreamType::HttpRequest),
            Self::HttpResponse => Some(StreamType::HttpResponse),
            Self::Downstream => Some(StreamType::Downstream),
            Self::Upstream => Some(StreamType::Upstream),
            Self::Background => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::HttpRequest => "http_request",
            Self::HttpResponse => "http_response",
            Self::Downstream => "downstream",
            Self::Upstream => "upstream",
            Self::Background => "background",
        }
    }
}

impl Display for StreamPhase {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Response synthesized by the guest instead of forwarding upstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalResponse {
    pub status_code: u32,
    pub headers: FieldCollection,
    pub body: Vec<u8>,
    /// Free-form detail string surfaced in host access logs.
    pub details: String,
    pub grpc_status: Option<i32>,
}

impl LocalResponse {
    pub fn new(status_code: u32) -> Self {
        Self {
            status_code,
            headers: FieldCollection::new(),
            body: Vec::new(),
            details: String::new(),
            grpc_status: None,
        }
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.add(key, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = details.into();
        self
    }
}

/// How a callout response settles the exchange its ticket paused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Continue the stream of the phase that issued the ticket.
    Resume,
    /// Terminate the exchange: HTTP phases get this local response,
    /// connection phases close their stream.
    Respond(LocalResponse),
    /// Stay paused; another outstanding callout will settle the phase.
    Hold,
}

/// Metadata of one callout response, delivered by ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalloutResponse {
    pub ticket: CalloutTicket,
    /// Phase recorded when the ticket was issued.
    pub phase: StreamPhase,
    pub num_headers: usize,
    pub body_size: usize,
    pub num_trailers: usize,
}

#[cfg(test)]
mod tests {
    use super::{Action, LocalResponse, StreamPhase};
    use crate::abi::StreamType;

    #[test]
    fn action_raw_values_match_the_abi() {
        assert_eq!(Action::Continue.as_raw(), 0);
        assert_eq!(Action::Pause.as_raw(), 1);
    }

    #[test]
    fn phases_serialize_as_snake_case() {
        let encoded = serde_json::to_string(&[StreamPhase::HttpRequest, StreamPhase::Downstream])
            .expect("phases");
        assert_eq!(encoded, r#"["http_request","downstream"]"#);
        let action: Action = serde_json::from_str(r#""pause""#).expect("action");
        assert_eq!(action, Action::Pause);
    }

    #[test]
    fn background_phase_has_no_stream() {
        assert_eq!(StreamPhase::Background.stream(), None);
        assert_eq!(
            StreamPhase::HttpResponse.stream(),
            Some(StreamType::HttpResponse)
        );
    }

    #[test]
    fn local_response_builder_keeps_header_order() {
        let response = LocalResponse::new(403)
            .with_header("content-type", "text/plain")
            .with_header("x-denied-by", "gate")
            .with_body("denied")
            .with_details("auth_denied");
        assert_eq!(response.status_code, 403);
        assert_eq!(response.headers.len(), 2);
        assert_eq!(response.body, b"denied");
        assert_eq!(response.details, "auth_denied");
    }
}

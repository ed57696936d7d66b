//! Wire-level enums shared with the host.

use serde::{Deserialize, Serialize};

/// Host log severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Critical,
}

impl LogLevel {
    pub fn as_raw(self) -> u32 {
        match self {
            Self::Trace => 0,
            Self::Debug => 1,
            Self::Info => 2,
            Self::Warn => 3,
            Self::Error => 4,
            Self::Critical => 5,
        }
    }

    /// Decodes a host-reported level; unknown values clamp to `Critical`.
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            0 => Self::Trace,
            1 => Self::Debug,
            2 => Self::Info,
            3 => Self::Warn,
            4 => Self::Error,
            _ => Self::Critical,
        }
    }

    /// Stable lowercase label (`trace|debug|info|warn|error|critical`).
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
            Self::Critical => "critical",
        }
    }
}

/// Host-side byte buffers the guest can read or overwrite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BufferType {
    HttpRequestBody,
    HttpResponseBody,
    DownstreamData,
    UpstreamData,
    HttpCallResponseBody,
    GrpcReceiveBuffer,
    VmConfiguration,
    PluginConfiguration,
}

impl BufferType {
    pub fn as_raw(self) -> u32 {
        match self {
            Self::HttpRequestBody => 0,
            Self::HttpResponseBody => 1,
            Self::DownstreamData => 2,
            Self::UpstreamData => 3,
            Self::HttpCallResponseBody => 4,
            Self::GrpcReceiveBuffer => 5,
            Self::VmConfiguration => 6,
            Self::PluginConfiguration => 7,
        }
    }
}

/// Host-side key/value collections (header and trailer maps).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MapType {
    HttpRequestHeaders,
    HttpRequestTrailers,
    HttpResponseHeaders,
    HttpResponseTrailers,
    GrpcReceiveInitialMetadata,
    GrpcReceiveTrailingMetadata,
    HttpCallResponseHeaders,
    HttpCallResponseTrailers,
}

impl MapType {
    pub fn as_raw(self) -> u32 {
        match self {
            Self::HttpRequestHeaders => 0,
            Self::HttpRequestTrailers => 1,
            Self::HttpResponseHeaders => 2,
            Self::HttpResponseTrailers => 3,
            Self::GrpcReceiveInitialMetadata => 4,
            Self::GrpcReceiveTrailingMetadata => 5,
            Self::HttpCallResponseHeaders => 6,
            Self::HttpCallResponseTrailers => 7,
        }
    }
}

/// Host metric flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Counter,
    Gauge,
    Histogram,
}

impl MetricKind {
    pub fn as_raw(self) -> u32 {
        match self {
            Self::Counter => 0,
            Self::Gauge => 1,
            Self::Histogram => 2,
        }
    }
}

/// Which side closed a TCP connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerType {
    Unknown,
    Local,
    Remote,
}

impl PeerType {
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            1 => Self::Local,
            2 => Self::Remote,
            _ => Self::Unknown,
        }
    }
}

/// Stream addressed by continue/close host calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamType {
    HttpRequest,
    HttpResponse,
    Downstream,
    Upstream,
}

impl StreamType {
    pub fn as_raw(self) -> u32 {
        match self {
            Self::HttpRequest => 0,
            Self::HttpResponse => 1,
            Self::Downstream => 2,
            Self::Upstream => 3,
        }
    }
}

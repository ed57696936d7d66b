//! Replay script format.
//!
//! A script names one bundled filter, its settings, and the host events to
//! drive through it. Filter contexts are created on first mention under root
//! context `1`.

use serde::Deserialize;
use serde_json::Value;
use std::fmt::{Display, Formatter};
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct Script {
    pub filter: String,
    #[serde(default)]
    pub settings: Value,
    #[serde(default)]
    pub events: Vec<ScriptEvent>,
}

impl Script {
    /// Plugin configuration buffer handed to the root context.
    pub fn plugin_config(&self) -> Result<Vec<u8>, ScriptError> {
        let config = serde_json::json!({
            "filter": self.filter,
            "settings": self.settings,
        });
        serde_json::to_vec(&config).map_err(|err| ScriptError::Invalid(err.to_string()))
    }
}

pub type Pairs = Vec<(String, String)>;

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ScriptEvent {
    RequestHeaders {
        context: u32,
        headers: Pairs,
        #[serde(default)]
        end_of_stream: bool,
    },
    /// `chunk` is appended to what the host already buffered.
    RequestBody {
        context: u32,
        chunk: String,
        #[serde(default)]
        end_of_stream: bool,
    },
    ResponseHeaders {
        context: u32,
        headers: Pairs,
        #[serde(default)]
        end_of_stream: bool,
    },
    ResponseBody {
        context: u32,
        chunk: String,
        #[serde(default)]
        end_of_stream: bool,
    },
    NewConnection {
        context: u32,
    },
    DownstreamData {
        context: u32,
        chunk: String,
        #[serde(default)]
        end_of_stream: bool,
    },
    UpstreamData {
        context: u32,
        chunk: String,
        #[serde(default)]
        end_of_stream: bool,
    },
    /// Answers the oldest callout not yet answered.
    CalloutResponse {
        context: u32,
        #[serde(default = "default_status")]
        status: String,
        #[serde(default)]
        body: String,
    },
    QueueReady {
        queue: u32,
    },
    Tick,
    Log {
        context: u32,
    },
    Delete {
        context: u32,
    },
    Done,
}

fn default_status() -> String {
    "200".to_string()
}

#[derive(Debug)]
pub enum ScriptError {
    Io(String),
    Invalid(String),
}

impl Display for ScriptError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(message) => write!(f, "cannot read script: {message}"),
            Self::Invalid(message) => write!(f, "invalid script: {message}"),
        }
    }
}

impl std::error::Error for ScriptError {}

pub fn load(path: &Path) -> Result<Script, ScriptError> {
    let raw = std::fs::read(path).map_err(|err| ScriptError::Io(err.to_string()))?;
    serde_json::from_slice(&raw).map_err(|err| ScriptError::Invalid(err.to_string()))
}

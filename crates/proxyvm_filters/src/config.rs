//! Plugin configuration parsing.
//!
//! # Responsibility
//! - Decode the plugin configuration buffer into a filter choice plus its
//!   settings document.
//! - Map settings documents onto per-filter typed settings.
//!
//! # Invariants
//! - Missing `settings` means "all defaults", never an error.
//! - Parsing never panics; every failure is a `ConfigError`.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Filters this module can be configured as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterName {
    BodyEcho,
    ByteCounter,
    AuthGate,
    HeaderRewrite,
    QueueRelay,
}

impl FilterName {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BodyEcho => "body_echo",
            Self::ByteCounter => "byte_counter",
            Self::AuthGate => "auth_gate",
            Self::HeaderRewrite => "header_rewrite",
            Self::QueueRelay => "queue_relay",
        }
    }
}

impl Display for FilterName {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Top-level plugin configuration document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginConfig {
    pub filter: FilterName,
    #[serde(default)]
    pub settings: Value,
}

/// Configuration failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    Empty,
    Malformed(String),
    Settings { filter: FilterName, message: String },
}

impl ConfigError {
    pub fn settings(filter: FilterName, message: impl Into<String>) -> Self {
        Self::Settings {
            filter,
            message: message.into(),
        }
    }
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "plugin configuration is empty"),
            Self::Malformed(message) => write!(f, "plugin configuration is malformed: {message}"),
            Self::Settings { filter, message } => {
                write!(f, "invalid settings for `{filter}`: {message}")
            }
        }
    }
}

impl Error for ConfigError {}

impl From<serde_json::Error> for ConfigError {
    fn from(value: serde_json::Error) -> Self {
        Self::Malformed(value.to_string())
    }
}

/// Parses the raw plugin configuration buffer.
pub fn parse_plugin_config(bytes: &[u8]) -> Result<PluginConfig, ConfigError> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Err(ConfigError::Empty);
    }
    Ok(serde_json::from_slice(bytes)?)
}

/// Decodes one filter's settings; `null` yields the defaults.
pub fn decode_settings<T>(filter: FilterName, settings: &Value) -> Result<T, ConfigError>
where
    T: DeserializeOwned + Default,
{
    if settings.is_null() {
        return Ok(T::default());
    }
    T::deserialize(settings).map_err(|err| ConfigError::settings(filter, err.to_string()))
}

//! Request-body echo.
//!
//! Buffers the request body while the host accumulates it, then answers the
//! exchange locally with the complete body.

use crate::config::{decode_settings, ConfigError, FilterName};
use proxyvm_core::{
    Action, BufferType, ContextHandle, FilterKind, HookResult, Host, HttpContext, LocalResponse,
    RootContext,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::rc::Rc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EchoSettings {
    pub status: u32,
    pub content_type: String,
}

impl Default for EchoSettings {
    fn default() -> Self {
        Self {
            status: 200,
            content_type: "application/octet-stream".to_string(),
        }
    }
}

pub struct BodyEchoRoot {
    settings: Rc<EchoSettings>,
}

impl BodyEchoRoot {
    pub fn from_settings(settings: &Value) -> Result<Self, ConfigError> {
        let settings: EchoSettings = decode_settings(FilterName::BodyEcho, settings)?;
        Ok(Self {
            settings: Rc::new(settings),
        })
    }
}

impl RootContext for BodyEchoRoot {
    fn child_kind(&self) -> Option<FilterKind> {
        Some(FilterKind::Http)
    }

    fn create_http_context(&mut self, _handle: ContextHandle) -> Option<Box<dyn HttpContext>> {
        Some(Box::new(BodyEcho {
            settings: Rc::clone(&self.settings),
            buffered: 0,
        }))
    }
}

pub struct BodyEcho {
    settings: Rc<EchoSettings>,
    /// Bytes the host holds for this request so far.
    buffered: usize,
}

impl BodyEcho {
    fn respond(&self, host: &Host, body: Vec<u8>) -> HookResult<Action> {
        let response = LocalResponse::new(self.settings.status)
            .with_header("content-type", self.settings.content_type.as_str())
            .with_header("content-length", body.len().to_string())
            .with_body(body)
            .with_details("body_echo");
        host.send_local_response(&response)?;
        Ok(Action::Pause)
    }
}

impl HttpContext for BodyEcho {
    fn on_request_headers(
        &mut self,
        host: &Host,
        _num_headers: usize,
        end_of_stream: bool,
    ) -> HookResult<Action> {
        if end_of_stream {
            return self.respond(host, Vec::new());
        }
        Ok(Action::Continue)
    }

    /// `body_size` is the size of this chunk; pausing keeps earlier chunks
    /// buffered on the host.
    fn on_request_body(
        &mut self,
        host: &Host,
        body_size: usize,
        end_of_stream: bool,
    ) -> HookResult<Action> {
        self.buffered += body_size;
        if !end_of_stream {
            return Ok(Action::Pause);
        }
        let body = if self.buffered == 0 {
            Vec::new()
        } else {
            host.get_buffer(BufferType::HttpRequestBody, 0, self.buffered)?
                .into_vec()
        };
        self.respond(host, body)
    }
}

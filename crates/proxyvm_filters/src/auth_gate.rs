//! External authorization gate.
//!
//! # Responsibility
//! - Pause each request while an authorization service decides on it.
//! - Optionally report each response status to an audit service before the
//!   response is released.
//!
//! # Invariants
//! - The request is released only by an explicit `allow`.
//! - A decision body that is not valid JSON fails the event; the exchange stays
//!   paused until the host times it out.

use crate::config::{decode_settings, ConfigError, FilterName};
use log::{debug, info};
use proxyvm_core::{
    Action, BufferType, CalloutResponse, ContextHandle, FieldCollection, FilterKind, HookError,
    HookResult, Host, HttpContext, LocalResponse, MapType, Resolution, RootContext, StreamPhase,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::rc::Rc;
use std::time::Duration;

/// Request headers copied onto the authorization call.
const FORWARDED_HEADERS: &[&str] = &["authorization", "cookie", "x-forwarded-for"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    /// Cluster name of the authorization service.
    pub upstream: String,
    pub authority: String,
    pub path: String,
    pub timeout_ms: u64,
    pub deny_status: u32,
    /// Audit endpoint path; `None` disables the response-phase call.
    pub audit_path: Option<String>,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            upstream: "authz".to_string(),
            authority: "authz.local".to_string(),
            path: "/check".to_string(),
            timeout_ms: 500,
            deny_status: 403,
            audit_path: None,
        }
    }
}

/// Body returned by the authorization service.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Decision {
    pub allow: bool,
    #[serde(default)]
    pub reason: Option<String>,
}

pub struct AuthGateRoot {
    settings: Rc<AuthSettings>,
}

impl AuthGateRoot {
    pub fn from_settings(settings: &Value) -> Result<Self, ConfigError> {
        let settings: AuthSettings = decode_settings(FilterName::AuthGate, settings)?;
        if settings.upstream.trim().is_empty() {
            return Err(ConfigError::settings(
                FilterName::AuthGate,
                "upstream cannot be empty",
            ));
        }
        Ok(Self {
            settings: Rc::new(settings),
        })
    }
}

impl RootContext for AuthGateRoot {
    fn child_kind(&self) -> Option<FilterKind> {
        Some(FilterKind::Http)
    }

    fn create_http_context(&mut self, handle: ContextHandle) -> Option<Box<dyn HttpContext>> {
        Some(Box::new(AuthGate {
            handle,
            settings: Rc::clone(&self.settings),
            path: String::new(),
        }))
    }
}

pub struct AuthGate {
    handle: ContextHandle,
    settings: Rc<AuthSettings>,
    path: String,
}

impl AuthGate {
    fn call(&self, host: &Host, headers: FieldCollection, body: Option<&[u8]>) -> HookResult<()> {
        let ticket = host.dispatch_http_call(
            &self.settings.upstream,
            &headers,
            body,
            &FieldCollection::new(),
            Duration::from_millis(self.settings.timeout_ms),
        )?;
        debug!(
            "event=callout_issued module=auth_gate status=ok context={} ticket={}",
            self.handle, ticket
        );
        Ok(())
    }

    fn base_headers(&self, method: &str, path: &str) -> FieldCollection {
        let mut headers = FieldCollection::new();
        headers.add(":method", method);
        headers.add(":path", path);
        headers.add(":authority", self.settings.authority.as_str());
        headers
    }

    fn decide(&self, host: &Host, response: &CalloutResponse) -> HookResult<Resolution> {
        let body = if response.body_size == 0 {
            Vec::new()
        } else {
            host.get_buffer(BufferType::HttpCallResponseBody, 0, response.body_size)?
                .into_vec()
        };
        let decision: Decision = serde_json::from_slice(&body).map_err(|err| {
            HookError::extension(format!("malformed authorization decision: {err}"))
        })?;
        if decision.allow {
            return Ok(Resolution::Resume);
        }

        let reason = decision.reason.unwrap_or_else(|| "denied".to_string());
        info!(
            "event=request_denied module=auth_gate status=denied context={} path={} reason={}",
            self.handle, self.path, reason
        );
        Ok(Resolution::Respond(
            LocalResponse::new(self.settings.deny_status)
                .with_header("content-type", "text/plain")
                .with_body(reason)
                .with_details("auth_denied"),
        ))
    }
}

impl HttpContext for AuthGate {
    fn on_request_headers(
        &mut self,
        host: &Host,
        _num_headers: usize,
        _end_of_stream: bool,
    ) -> HookResult<Action> {
        let request = host.get_fields(MapType::HttpRequestHeaders)?;
        self.path = request.get(":path").unwrap_or("/").to_string();

        let mut headers = self.base_headers("POST", &self.settings.path);
        headers.add("x-original-path", self.path.as_str());
        if let Some(method) = request.get(":method") {
            headers.add("x-original-method", method);
        }
        for name in FORWARDED_HEADERS {
            if let Some(value) = request.get(name) {
                headers.add(*name, value);
            }
        }
        self.call(host, headers, None)?;
        Ok(Action::Pause)
    }

    fn on_response_headers(
        &mut self,
        host: &Host,
        _num_headers: usize,
        _end_of_stream: bool,
    ) -> HookResult<Action> {
        let Some(audit_path) = self.settings.audit_path.as_deref() else {
            return Ok(Action::Continue);
        };
        let status = host
            .get_field(MapType::HttpResponseHeaders, ":status")?
            .unwrap_or_default();
        let record = serde_json::json!({ "path": self.path, "status": status });
        let body = serde_json::to_vec(&record)
            .map_err(|err| HookError::extension(format!("audit record: {err}")))?;
        let mut headers = self.base_headers("POST", audit_path);
        headers.add("content-type", "application/json");
        self.call(host, headers, Some(&body))?;
        Ok(Action::Pause)
    }

    fn on_callout_response(
        &mut self,
        host: &Host,
        response: &CalloutResponse,
    ) -> HookResult<Resolution> {
        match response.phase {
            StreamPhase::HttpRequest => self.decide(host, response),
            // Audit answers never block the response.
            _ => Ok(Resolution::Resume),
        }
    }
}

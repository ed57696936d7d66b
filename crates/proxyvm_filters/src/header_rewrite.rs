//! Header rewriting.
//!
//! Request headers are rewritten wholesale: read, edited in guest memory and
//! written back in one call. Response headers are edited per key through the
//! host's single-value operations.

use crate::config::{decode_settings, ConfigError, FilterName};
use log::debug;
use once_cell::sync::Lazy;
use proxyvm_core::{
    Action, ContextHandle, FilterKind, HookResult, Host, HttpContext, MapType, RootContext,
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::rc::Rc;
use uuid::Uuid;

static HEADER_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^:?[a-z0-9!#$%&'*+.^_`|~-]+$").expect("valid header name regex"));

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RewriteSettings {
    /// Request headers to set, replacing any existing value.
    pub set_request: BTreeMap<String, String>,
    /// Patterns matched against request header names; matches are dropped.
    pub strip_request: Vec<String>,
    /// Header that receives a fresh UUID when the request lacks one.
    pub request_id_header: Option<String>,
    pub set_response: BTreeMap<String, String>,
    pub remove_response: Vec<String>,
}

/// Settings compiled once per configuration.
#[derive(Debug)]
pub struct RewriteRules {
    settings: RewriteSettings,
    strip: Vec<Regex>,
}

impl RewriteRules {
    pub fn compile(settings: RewriteSettings) -> Result<Self, ConfigError> {
        let names = settings
            .set_request
            .keys()
            .chain(settings.set_response.keys())
            .chain(settings.remove_response.iter())
            .chain(settings.request_id_header.iter());
        for name in names {
            if !HEADER_NAME_RE.is_match(name) {
                return Err(ConfigError::settings(
                    FilterName::HeaderRewrite,
                    format!("invalid header name `{name}`"),
                ));
            }
        }
        let strip = settings
            .strip_request
            .iter()
            .map(|pattern| {
                Regex::new(pattern).map_err(|err| {
                    ConfigError::settings(
                        FilterName::HeaderRewrite,
                        format!("invalid strip pattern `{pattern}`: {err}"),
                    )
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { settings, strip })
    }

    fn strips(&self, name: &str) -> bool {
        self.strip.iter().any(|pattern| pattern.is_match(name))
    }
}

pub struct HeaderRewriteRoot {
    rules: Rc<RewriteRules>,
}

impl HeaderRewriteRoot {
    pub fn from_settings(settings: &Value) -> Result<Self, ConfigError> {
        let settings: RewriteSettings = decode_settings(FilterName::HeaderRewrite, settings)?;
        Ok(Self {
            rules: Rc::new(RewriteRules::compile(settings)?),
        })
    }
}

impl RootContext for HeaderRewriteRoot {
    fn child_kind(&self) -> Option<FilterKind> {
        Some(FilterKind::Http)
    }

    fn create_http_context(&mut self, handle: ContextHandle) -> Option<Box<dyn HttpContext>> {
        Some(Box::new(HeaderRewrite {
            handle,
            rules: Rc::clone(&self.rules),
        }))
    }
}

pub struct HeaderRewrite {
    handle: ContextHandle,
    rules: Rc<RewriteRules>,
}

impl HttpContext for HeaderRewrite {
    fn on_request_headers(
        &mut self,
        host: &Host,
        _num_headers: usize,
        _end_of_stream: bool,
    ) -> HookResult<Action> {
        let mut headers = host.get_fields(MapType::HttpRequestHeaders)?;
        let before = headers.len();
        headers.retain(|name, _| !self.rules.strips(name));
        let stripped = before - headers.len();

        for (name, value) in &self.rules.settings.set_request {
            headers.replace(name, value.as_str());
        }
        if let Some(name) = &self.rules.settings.request_id_header {
            if headers.get(name).is_none() {
                headers.add(name.as_str(), Uuid::new_v4().to_string());
            }
        }

        host.set_fields(MapType::HttpRequestHeaders, &headers)?;
        debug!(
            "event=request_rewrite module=header_rewrite status=ok context={} stripped={} total={}",
            self.handle,
            stripped,
            headers.len()
        );
        Ok(Action::Continue)
    }

    fn on_response_headers(
        &mut self,
        host: &Host,
        _num_headers: usize,
        _end_of_stream: bool,
    ) -> HookResult<Action> {
        for name in &self.rules.settings.remove_response {
            host.remove_field(MapType::HttpResponseHeaders, name)?;
        }
        for (name, value) in &self.rules.settings.set_response {
            host.replace_field(MapType::HttpResponseHeaders, name, value)?;
        }
        Ok(Action::Continue)
    }
}

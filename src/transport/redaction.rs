//! Built-in redaction interceptor.
//!
//! Rewrites credential-bearing request headers, replaces configured field
//! values inside JSON request bodies (recursively through objects and
//! arrays), and applies configured regex replacements over string bodies.
//! Binary bodies pass through untouched. On the response side only headers
//! are rewritten; a streaming body is never consumed or buffered.
//!
//! Redaction is idempotent: running it twice produces the same output as
//! running it once. Disabled mode is a no-op that returns its input.

use regex::Regex;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::transport::RequestBody;
use crate::transport::interceptor::{InterceptorContext, ResponseView};

/// Configuration for the redaction interceptor.
#[derive(Debug, Clone)]
pub struct RedactionConfig {
    pub enabled: bool,
    /// JSON field names whose values are replaced, matched case-insensitively.
    pub field_names: Vec<String>,
    /// Regex replacements applied to string bodies.
    pub patterns: Vec<String>,
    pub placeholder: String,
}

impl Default for RedactionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            field_names: vec![
                "password".into(),
                "token".into(),
                "api_key".into(),
                "apiKey".into(),
                "secret".into(),
            ],
            patterns: Vec::new(),
            placeholder: "***".into(),
        }
    }
}

/// The redaction interceptor itself. Construct once, register via
/// [`Redactor::redact_request`] / [`Redactor::redact_response`].
#[derive(Debug, Clone)]
pub struct Redactor {
    config: RedactionConfig,
    patterns: Vec<Regex>,
}

impl Redactor {
    pub fn new(config: RedactionConfig) -> Result<Self> {
        let patterns = config
            .patterns
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|e| Error::validation(format!("bad redaction pattern {p:?}: {e}")))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { config, patterns })
    }

    pub fn enabled(&self) -> bool {
        self.config.enabled
    }

    /// Request-side redaction: headers, JSON fields, regex patterns.
    pub fn redact_request(&self, mut ctx: InterceptorContext) -> InterceptorContext {
        if !self.config.enabled {
            return ctx;
        }

        for (name, value) in ctx.request.headers.iter_mut() {
            if is_credential_header(name) {
                *value = self.config.placeholder.clone();
            }
        }

        if let Some(body) = ctx.request.body.take() {
            ctx.request.body = Some(self.redact_body(body, is_json_request(&ctx)));
        }
        ctx
    }

    /// Response-side redaction: header rewrite only. The body — buffered or
    /// streaming — is returned exactly as received.
    pub fn redact_response(&self, mut view: ResponseView) -> ResponseView {
        if !self.config.enabled {
            return view;
        }
        for (name, value) in view.headers.iter_mut() {
            if is_credential_header(name) {
                *value = self.config.placeholder.clone();
            }
        }
        view
    }

    fn redact_body(&self, body: RequestBody, json: bool) -> RequestBody {
        let text = match body {
            RequestBody::Text(text) => text,
            // Binary bodies pass through.
            bytes @ RequestBody::Bytes(_) => return bytes,
        };

        let text = if json {
            match serde_json::from_str::<Value>(&text) {
                Ok(mut value) => {
                    self.redact_json(&mut value);
                    value.to_string()
                }
                Err(_) => text,
            }
        } else {
            text
        };

        let mut text = text;
        for pattern in &self.patterns {
            text = pattern
                .replace_all(&text, self.config.placeholder.as_str())
                .into_owned();
        }
        RequestBody::Text(text)
    }

    fn redact_json(&self, value: &mut Value) {
        match value {
            Value::Object(map) => {
                for (key, sub) in map.iter_mut() {
                    if self.matches_field(key) {
                        *sub = Value::String(self.config.placeholder.clone());
                    } else {
                        self.redact_json(sub);
                    }
                }
            }
            Value::Array(items) => {
                for item in items.iter_mut() {
                    self.redact_json(item);
                }
            }
            _ => {}
        }
    }

    fn matches_field(&self, key: &str) -> bool {
        self.config
            .field_names
            .iter()
            .any(|name| name.eq_ignore_ascii_case(key))
    }
}

fn is_credential_header(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower == "authorization"
        || lower == "proxy-authorization"
        || lower == "cookie"
        || lower == "set-cookie"
        || lower.contains("api-key")
        || lower.contains("api_key")
}

fn is_json_request(ctx: &InterceptorContext) -> bool {
    ctx.request
        .headers
        .iter()
        .any(|(k, v)| k.eq_ignore_ascii_case("content-type") && v.contains("json"))
}

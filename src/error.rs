//! Error types for the LLM bridge.
//!
//! Every failure surfaced by this crate is one of the variants of [`Error`].
//! The taxonomy separates problems the caller can fix ([`Error::Validation`],
//! [`Error::Auth`]) from transient conditions worth retrying
//! ([`Error::RateLimit`], [`Error::Transport`], [`Error::Timeout`],
//! retryable [`Error::Provider`] statuses) and from terminal outcomes
//! ([`Error::Cancelled`], [`Error::Interceptor`]).
//!
//! Provider-shaped variants carry an [`ErrorContext`] with the provider id
//! and version, the HTTP status, a header snapshot with sensitive values
//! masked, and the vendor error code when one was present. Secret material
//! (bearer tokens, `sk-…`, `sk-ant-…`, `AIza…`, `ya29.…`) is truncated to a
//! short prefix before it can reach a message or a log line.

use std::collections::BTreeMap;
use std::sync::OnceLock;
use std::time::SystemTime;

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Which phase of a call was in flight when the caller cancelled it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelStage {
    /// Cancelled during a non-streaming `chat` call.
    Execution,
    /// Cancelled while consuming a delta stream.
    Streaming,
    /// Cancelled while a tool handler was running.
    ToolExecution,
    /// Cancelled while the retry policy was waiting out a delay.
    RetryDelay,
}

impl std::fmt::Display for CancelStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CancelStage::Execution => "execution",
            CancelStage::Streaming => "streaming",
            CancelStage::ToolExecution => "tool-execution",
            CancelStage::RetryDelay => "retry-delay",
        };
        write!(f, "{s}")
    }
}

/// Which side of the transport pipeline an interceptor belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterceptorDirection {
    Request,
    Response,
}

impl std::fmt::Display for InterceptorDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InterceptorDirection::Request => write!(f, "request"),
            InterceptorDirection::Response => write!(f, "response"),
        }
    }
}

/// Phase within a single interceptor invocation that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterceptorPhase {
    /// The interceptor rejected its input before running.
    Validation,
    /// The interceptor body itself returned an error.
    Execution,
    /// The interceptor returned a context the chain could not thread forward.
    ContextThreading,
}

impl std::fmt::Display for InterceptorPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            InterceptorPhase::Validation => "validation",
            InterceptorPhase::Execution => "execution",
            InterceptorPhase::ContextThreading => "context-threading",
        };
        write!(f, "{s}")
    }
}

/// Machine-readable codes for bridge-level failures that do not fit the
/// HTTP-shaped variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeCode {
    ModelNotRegistered,
    ProviderNotRegistered,
    ProviderConfigMissing,
    ProviderPluginUnmapped,
    ToolsNotEnabled,
    ToolSystemNotInitialized,
    InvalidConfig,
    RegistrationFailed,
    NotInitialized,
}

impl std::fmt::Display for BridgeCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BridgeCode::ModelNotRegistered => "MODEL_NOT_REGISTERED",
            BridgeCode::ProviderNotRegistered => "PROVIDER_NOT_REGISTERED",
            BridgeCode::ProviderConfigMissing => "PROVIDER_CONFIG_MISSING",
            BridgeCode::ProviderPluginUnmapped => "PROVIDER_PLUGIN_UNMAPPED",
            BridgeCode::ToolsNotEnabled => "TOOLS_NOT_ENABLED",
            BridgeCode::ToolSystemNotInitialized => "TOOL_SYSTEM_NOT_INITIALIZED",
            BridgeCode::InvalidConfig => "INVALID_CONFIG",
            BridgeCode::RegistrationFailed => "REGISTRATION_FAILED",
            BridgeCode::NotInitialized => "NOT_INITIALIZED",
        };
        write!(f, "{s}")
    }
}

/// Redacted diagnostic context attached to provider-shaped errors.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ErrorContext {
    /// Provider plugin id, e.g. `openai`.
    pub provider: Option<String>,
    /// Provider plugin version, e.g. `responses-v1`.
    pub version: Option<String>,
    /// HTTP status of the failed response, when one arrived.
    pub status: Option<u16>,
    /// Response headers with sensitive values masked to `***`.
    pub headers: BTreeMap<String, String>,
    /// Vendor-reported error code, e.g. `authentication_error`.
    pub vendor_code: Option<String>,
    /// Wall-clock capture time, for correlation with transport logs.
    pub timestamp: Option<SystemTime>,
}

impl ErrorContext {
    /// Build a context for a provider, stamping the current time.
    pub fn for_provider(id: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            provider: Some(id.into()),
            version: Some(version.into()),
            timestamp: Some(SystemTime::now()),
            ..Default::default()
        }
    }

    /// Record the HTTP status and a masked copy of the response headers.
    pub fn with_response(mut self, status: u16, headers: &BTreeMap<String, String>) -> Self {
        self.status = Some(status);
        self.headers = mask_headers(headers);
        self
    }

    /// Record the vendor-supplied error code.
    pub fn with_vendor_code(mut self, code: impl Into<String>) -> Self {
        self.vendor_code = Some(code.into());
        self
    }
}

/// Main error type for the bridge
#[derive(Error, Debug)]
pub enum Error {
    /// Input violated a schema: a config, a request, a tool definition, or a
    /// content part.
    #[error("validation error: {0}")]
    Validation(String),

    /// The vendor rejected the supplied credentials.
    #[error("authentication rejected: {message}")]
    Auth {
        message: String,
        context: ErrorContext,
    },

    /// The vendor throttled the request.
    #[error("rate limited: {message}")]
    RateLimit {
        message: String,
        /// Parsed `Retry-After`, in milliseconds, when the vendor sent one.
        retry_after_ms: Option<u64>,
        context: ErrorContext,
    },

    /// A local or vendor-reported deadline elapsed.
    #[error("timeout: {message}")]
    Timeout {
        message: String,
        context: ErrorContext,
    },

    /// Network, DNS, TLS, or connection-reset failure.
    #[error("transport failure: {0}")]
    Transport(String),

    /// Malformed SSE framing, malformed streamed JSON, or a truncated stream.
    #[error("streaming failure: {0}")]
    Streaming(String),

    /// 5xx, unknown vendor status, or a generic upstream failure.
    #[error("provider failure: {message}")]
    Provider {
        message: String,
        status: Option<u16>,
        context: ErrorContext,
    },

    /// An interceptor threw or returned an unusable context.
    #[error("{direction} interceptor #{index} failed during {phase}: {message}")]
    Interceptor {
        direction: InterceptorDirection,
        index: usize,
        phase: InterceptorPhase,
        message: String,
    },

    /// The call's cancellation source fired.
    #[error("cancelled during {stage}")]
    Cancelled { stage: CancelStage },

    /// Bridge-level failure identified by a [`BridgeCode`].
    #[error("{code}: {message}")]
    Bridge { code: BridgeCode, message: String },
}

impl Error {
    /// Create a new validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    /// Create a new auth error with empty context
    pub fn auth(msg: impl Into<String>) -> Self {
        Error::Auth {
            message: redact_secrets(&msg.into()),
            context: ErrorContext::default(),
        }
    }

    /// Create a new transport error
    pub fn transport(msg: impl Into<String>) -> Self {
        Error::Transport(redact_secrets(&msg.into()))
    }

    /// Create a new streaming error
    pub fn streaming(msg: impl Into<String>) -> Self {
        Error::Streaming(msg.into())
    }

    /// Create a new provider error without response context
    pub fn provider(msg: impl Into<String>) -> Self {
        Error::Provider {
            message: redact_secrets(&msg.into()),
            status: None,
            context: ErrorContext::default(),
        }
    }

    /// Create a new timeout error
    pub fn timeout(msg: impl Into<String>) -> Self {
        Error::Timeout {
            message: msg.into(),
            context: ErrorContext::default(),
        }
    }

    /// Create a cancellation error for the given stage
    pub fn cancelled(stage: CancelStage) -> Self {
        Error::Cancelled { stage }
    }

    /// Create a bridge error with the given code
    pub fn bridge(code: BridgeCode, msg: impl Into<String>) -> Self {
        Error::Bridge {
            code,
            message: msg.into(),
        }
    }

    /// The machine-readable bridge code, when this is a bridge error.
    pub fn bridge_code(&self) -> Option<BridgeCode> {
        match self {
            Error::Bridge { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Whether the retry policy may consider this error transient.
    ///
    /// `Validation`, `Auth`, `Cancelled`, `Interceptor`, and `Bridge` are
    /// surfaced immediately; everything else is a retry candidate (subject
    /// to the policy's status-code allowlist for `Provider` errors).
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::RateLimit { .. }
            | Error::Transport(_)
            | Error::Timeout { .. }
            | Error::Provider { .. }
            | Error::Streaming(_) => true,
            Error::Validation(_)
            | Error::Auth { .. }
            | Error::Cancelled { .. }
            | Error::Interceptor { .. }
            | Error::Bridge { .. } => false,
        }
    }

    /// HTTP status associated with this error, when one is known.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Provider { status, .. } => *status,
            Error::Auth { context, .. }
            | Error::RateLimit { context, .. }
            | Error::Timeout { context, .. } => context.status,
            _ => None,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Error::timeout(e.to_string())
        } else {
            Error::transport(e.to_string())
        }
    }
}

/// Header names whose values must never appear in diagnostics.
fn is_sensitive_header(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower == "authorization"
        || lower == "cookie"
        || lower == "set-cookie"
        || lower == "proxy-authorization"
        || lower.contains("api-key")
        || lower.contains("api_key")
}

/// Copy a header map, masking sensitive values to `***`.
pub fn mask_headers(headers: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    headers
        .iter()
        .map(|(k, v)| {
            if is_sensitive_header(k) {
                (k.clone(), "***".to_string())
            } else {
                (k.clone(), v.clone())
            }
        })
        .collect()
}

fn secret_patterns() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| {
        // Longest alternatives first so `sk-ant-` wins over `sk-`.
        regex::Regex::new(
            r"(?i)(Bearer\s+[A-Za-z0-9._~+/=-]{8,})|(sk-ant-[A-Za-z0-9_-]{8,})|(sk-[A-Za-z0-9_-]{8,})|(AIza[A-Za-z0-9_-]{8,})|(ya29\.[A-Za-z0-9._-]{8,})",
        )
        .expect("secret pattern compiles")
    })
}

/// Truncate known secret shapes inside `text` to a short prefix plus `***`.
pub fn redact_secrets(text: &str) -> String {
    secret_patterns()
        .replace_all(text, |caps: &regex::Captures<'_>| {
            let m = caps.get(0).map(|m| m.as_str()).unwrap_or_default();
            let keep = m.chars().take(10).collect::<String>();
            format!("{keep}***")
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_validation() {
        let err = Error::validation("model id must be qualified");
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(
            err.to_string(),
            "validation error: model id must be qualified"
        );
    }

    #[test]
    fn test_error_bridge_display() {
        let err = Error::bridge(BridgeCode::ModelNotRegistered, "openai:gpt-4o");
        assert_eq!(err.to_string(), "MODEL_NOT_REGISTERED: openai:gpt-4o");
        assert_eq!(err.bridge_code(), Some(BridgeCode::ModelNotRegistered));
    }

    #[test]
    fn test_error_interceptor_display() {
        let err = Error::Interceptor {
            direction: InterceptorDirection::Request,
            index: 2,
            phase: InterceptorPhase::ContextThreading,
            message: "context dropped correlation id".into(),
        };
        assert_eq!(
            err.to_string(),
            "request interceptor #2 failed during context-threading: context dropped correlation id"
        );
    }

    #[test]
    fn test_error_cancelled_stage() {
        assert_eq!(
            Error::cancelled(CancelStage::Streaming).to_string(),
            "cancelled during streaming"
        );
        assert_eq!(
            Error::cancelled(CancelStage::Execution).to_string(),
            "cancelled during execution"
        );
    }

    #[test]
    fn test_retryability_split() {
        assert!(Error::transport("connection reset").is_retryable());
        assert!(Error::timeout("deadline elapsed").is_retryable());
        assert!(
            Error::RateLimit {
                message: "429".into(),
                retry_after_ms: Some(1000),
                context: ErrorContext::default(),
            }
            .is_retryable()
        );
        assert!(!Error::validation("bad request").is_retryable());
        assert!(!Error::auth("401").is_retryable());
        assert!(!Error::cancelled(CancelStage::Execution).is_retryable());
        assert!(!Error::bridge(BridgeCode::InvalidConfig, "nope").is_retryable());
    }

    #[test]
    fn test_mask_headers() {
        let mut headers = BTreeMap::new();
        headers.insert("Authorization".to_string(), "Bearer sk-abc123def456".into());
        headers.insert("x-goog-api-key".to_string(), "AIzaSyExample".into());
        headers.insert("content-type".to_string(), "application/json".into());

        let masked = mask_headers(&headers);
        assert_eq!(masked["Authorization"], "***");
        assert_eq!(masked["x-goog-api-key"], "***");
        assert_eq!(masked["content-type"], "application/json");
    }

    #[test]
    fn test_redact_secrets_truncates_known_prefixes() {
        let msg = "key sk-abcdefghijklmnop rejected";
        let redacted = redact_secrets(msg);
        assert!(!redacted.contains("sk-abcdefghijklmnop"));
        assert!(redacted.contains("***"));
        assert!(redacted.starts_with("key sk-"));

        let msg = "used sk-ant-api03-zzzzzzzz and AIzaSyD1234567890 and ya29.a0AfH6SMB1234";
        let redacted = redact_secrets(msg);
        assert!(!redacted.contains("zzzzzzzz"));
        assert!(!redacted.contains("1234567890"));
        assert!(!redacted.contains("AfH6SMB"));
    }

    #[test]
    fn test_redact_secrets_leaves_plain_text() {
        let msg = "model not found: gpt-4o-2024-08-06";
        assert_eq!(redact_secrets(msg), msg);
    }

    #[test]
    fn test_auth_constructor_redacts() {
        let err = Error::auth("bad key sk-live-abcdefghijkl");
        assert!(!err.to_string().contains("abcdefghijkl"));
    }

    #[test]
    fn test_error_context_builder() {
        let mut headers = BTreeMap::new();
        headers.insert("authorization".to_string(), "Bearer tok".into());
        headers.insert("retry-after".to_string(), "20".into());

        let ctx = ErrorContext::for_provider("anthropic", "2023-06-01")
            .with_response(429, &headers)
            .with_vendor_code("rate_limit_error");

        assert_eq!(ctx.provider.as_deref(), Some("anthropic"));
        assert_eq!(ctx.version.as_deref(), Some("2023-06-01"));
        assert_eq!(ctx.status, Some(429));
        assert_eq!(ctx.headers["authorization"], "***");
        assert_eq!(ctx.headers["retry-after"], "20");
        assert_eq!(ctx.vendor_code.as_deref(), Some("rate_limit_error"));
        assert!(ctx.timestamp.is_some());
    }

    #[test]
    fn test_status_accessor() {
        let err = Error::Provider {
            message: "upstream".into(),
            status: Some(503),
            context: ErrorContext::default(),
        };
        assert_eq!(err.status(), Some(503));
        assert_eq!(Error::transport("reset").status(), None);
    }
}

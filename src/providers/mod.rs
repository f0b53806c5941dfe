//! Provider plugin abstraction.
//!
//! A [`ProviderPlugin`] adapts the unified request/response shapes to one
//! vendor's wire protocol: it translates a [`ChatRequest`] into an
//! [`HttpRequest`], parses the vendor's response (buffered or streamed)
//! back into unified types, normalizes vendor errors into the shared
//! taxonomy, and classifies termination.
//!
//! Plugins are stateless. Credentials, the transport, and the cancellation
//! handle are passed into each call as parameters; the client façade owns
//! the registries and memoizes per-`(id, version)` initialization.
//!
//! Termination classification is deliberately centralized: every plugin
//! maps its native finish-reason vocabulary through
//! [`signal_from_finish_reason`], so `stop`, `end_turn`, and `STOP` all
//! become [`TerminationReason::NaturalCompletion`] with the same confidence
//! no matter which vendor produced them.

pub mod anthropic;
pub mod gemini;
pub mod openai;
pub mod registry;
pub mod xai;

use std::collections::HashMap;
use std::pin::Pin;
use std::time::{SystemTime, UNIX_EPOCH};

use futures::Stream;
use serde_json::Value;

use crate::cancel::CancellationHandle;
use crate::config::ProviderConfig;
use crate::error::{Error, Result};
use crate::transport::{ByteStream, HttpRequest, HttpResponse};
use crate::types::{ChatRequest, Message, ModelCapabilities, StreamDelta, Usage};

/// A lazily produced sequence of unified deltas.
pub type DeltaStream = Pin<Box<dyn Stream<Item = Result<StreamDelta>> + Send>>;

/// Why a response ended, unified across vendors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TerminationReason {
    NaturalCompletion,
    TokenLimitReached,
    ContentFiltered,
    ToolUseRequired,
    Cancelled,
    Error,
    Unknown,
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TerminationReason::NaturalCompletion => "natural_completion",
            TerminationReason::TokenLimitReached => "token_limit_reached",
            TerminationReason::ContentFiltered => "content_filtered",
            TerminationReason::ToolUseRequired => "tool_use_required",
            TerminationReason::Cancelled => "cancelled",
            TerminationReason::Error => "error",
            TerminationReason::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

/// How sure the classifier is about its mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Confidence {
    Low,
    Medium,
    High,
}

/// The unified answer to "is this response finished, and why".
#[derive(Debug, Clone, PartialEq)]
pub struct TerminationSignal {
    pub should_terminate: bool,
    /// Which field drove the classification, e.g. `finishReason` or `finished`.
    pub source: String,
    /// The vendor's raw value, verbatim.
    pub raw_value: String,
    pub reason: TerminationReason,
    pub confidence: Confidence,
    pub message: String,
    pub metadata: HashMap<String, Value>,
}

/// A parsed, non-streaming chat response.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatResponse {
    pub id: String,
    pub message: Message,
    pub usage: Option<Usage>,
    /// Vendor finish reason, verbatim.
    pub finish_reason: Option<String>,
    pub metadata: HashMap<String, Value>,
}

/// What [`ProviderPlugin::detect_termination`] classifies: a streamed delta
/// or a final response.
#[derive(Debug, Clone, Copy)]
pub enum TerminationFrame<'a> {
    Delta(&'a StreamDelta),
    Final(&'a ChatResponse),
}

/// One vendor adapter. See the module docs for the division of labor
/// between plugins and the client façade.
pub trait ProviderPlugin: Send + Sync {
    /// Registry id, e.g. `openai`.
    fn id(&self) -> &str;

    /// Registry version, e.g. `responses-v1`.
    fn version(&self) -> &str;

    /// Validate a provider config against this plugin's requirements.
    /// Idempotent; the client memoizes the call per `(id, version)`.
    fn initialize(&self, config: &ProviderConfig) -> Result<()>;

    /// Whether this plugin serves the given (unqualified) model name.
    fn supports_model(&self, model_name: &str) -> bool;

    /// Deterministically translate a unified request into the vendor wire
    /// shape. When `capabilities.temperature` is false the vendor body must
    /// omit temperature regardless of the request value.
    fn translate_request(
        &self,
        request: &ChatRequest,
        config: &ProviderConfig,
        capabilities: Option<&ModelCapabilities>,
    ) -> Result<HttpRequest>;

    /// Parse a complete (non-streaming) vendor response.
    fn parse_response(&self, response: &HttpResponse) -> Result<ChatResponse>;

    /// Parse a streamed body into unified deltas. Exactly one delta carries
    /// `finished = true` and it is the last.
    fn parse_stream(&self, bytes: ByteStream, cancel: CancellationHandle) -> DeltaStream;

    /// Map a failed vendor response onto the shared error taxonomy.
    fn normalize_error(&self, response: &HttpResponse) -> Error;

    /// Classify a delta or final response.
    fn detect_termination(&self, frame: TerminationFrame<'_>) -> TerminationSignal;
}

/// Map a canonical plugin string onto its registry key, e.g.
/// `openai-responses-v1` → `("openai", "responses-v1")`.
pub fn plugin_key(plugin_string: &str) -> Option<(&str, &str)> {
    match plugin_string.split_once('-') {
        Some((id, version)) if !id.is_empty() && !version.is_empty() => Some((id, version)),
        _ => None,
    }
}

/// Cross-vendor finish-reason vocabulary, applied by every plugin.
///
/// `raw` is the vendor value when one was present; `finished` is whether
/// the vendor marked the response complete by other means.
pub fn signal_from_finish_reason(raw: Option<&str>, finished: bool) -> TerminationSignal {
    let (reason, confidence, known) = match raw {
        Some(value) => match value {
            "stop" | "end_turn" | "STOP" | "stop_sequence" => {
                (TerminationReason::NaturalCompletion, Confidence::High, true)
            }
            "length" | "max_tokens" | "MAX_TOKENS" => {
                (TerminationReason::TokenLimitReached, Confidence::High, true)
            }
            "content_filter" | "SAFETY" | "RECITATION" | "refusal" => {
                (TerminationReason::ContentFiltered, Confidence::High, true)
            }
            "tool_calls" | "tool_use" | "function_call" => {
                (TerminationReason::ToolUseRequired, Confidence::High, true)
            }
            _ => (TerminationReason::Unknown, Confidence::Medium, false),
        },
        None => (TerminationReason::Unknown, Confidence::Low, false),
    };

    let should_terminate = raw.is_some() && known || finished;
    let source = if raw.is_some() { "finishReason" } else { "finished" };
    let raw_value = raw.unwrap_or_default().to_string();
    let message = match raw {
        Some(value) if known => format!("vendor reported {value:?}"),
        Some(value) => format!("unrecognized finish reason {value:?}"),
        None if finished => "stream finished without a finish reason".to_string(),
        None => "response still in progress".to_string(),
    };

    TerminationSignal {
        should_terminate,
        source: source.to_string(),
        raw_value,
        reason,
        confidence,
        message,
        metadata: HashMap::new(),
    }
}

/// A tool call extracted from an assistant message, normalized for the
/// tool router.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedToolCall {
    pub id: String,
    pub name: String,
    pub parameters: Value,
    pub metadata: HashMap<String, Value>,
}

/// Extract tool calls from a final assistant message: native `ToolUse`
/// content parts plus OpenAI-style `metadata.tool_calls` entries. Malformed
/// argument strings are logged and skipped, never raised.
pub fn extract_tool_calls(message: &Message, provider_id: &str) -> Vec<ExtractedToolCall> {
    let timestamp = now_millis();
    let mut calls = Vec::new();

    for part in &message.content {
        if let crate::types::ContentPart::ToolUse { id, name, input } = part {
            calls.push(ExtractedToolCall {
                id: id.clone(),
                name: name.clone(),
                parameters: input.clone(),
                metadata: call_metadata(provider_id, timestamp),
            });
        }
    }

    let metadata_calls = message
        .metadata
        .as_ref()
        .and_then(|m| m.get("tool_calls"))
        .and_then(|v| v.as_array());
    if let Some(entries) = metadata_calls {
        for entry in entries {
            let id = entry.get("id").and_then(|v| v.as_str()).unwrap_or_default();
            let function = entry.get("function");
            let name = function
                .and_then(|f| f.get("name"))
                .and_then(|v| v.as_str())
                .unwrap_or_default();
            if id.is_empty() || name.is_empty() {
                log::warn!("skipping metadata tool call without id or name: {entry}");
                continue;
            }
            // Already extracted as a native part?
            if calls.iter().any(|c| c.id == id) {
                continue;
            }
            let arguments = function.and_then(|f| f.get("arguments"));
            let parameters = match arguments {
                Some(Value::String(text)) => match serde_json::from_str::<Value>(text) {
                    Ok(parsed) => parsed,
                    Err(e) => {
                        log::warn!("skipping tool call {id}: malformed arguments ({e})");
                        continue;
                    }
                },
                Some(value) => value.clone(),
                None => Value::Object(serde_json::Map::new()),
            };
            calls.push(ExtractedToolCall {
                id: id.to_string(),
                name: name.to_string(),
                parameters,
                metadata: call_metadata(provider_id, timestamp),
            });
        }
    }

    calls
}

fn call_metadata(provider_id: &str, timestamp: u64) -> HashMap<String, Value> {
    let mut metadata = HashMap::new();
    metadata.insert("providerId".to_string(), Value::from(provider_id));
    metadata.insert("timestamp".to_string(), Value::from(timestamp));
    metadata
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Response id for streams whose vendor never sent one.
pub fn synthesize_stream_id() -> String {
    format!("stream-{}-{:08x}", now_millis(), rand::random::<u32>())
}

/// Shared HTTP-status normalization used by every plugin after the vendor
/// envelope has been consulted.
pub(crate) fn normalize_status(
    status: u16,
    message: String,
    context: crate::error::ErrorContext,
    retry_after_ms: Option<u64>,
) -> Error {
    match status {
        401 | 403 => Error::Auth {
            message: crate::error::redact_secrets(&message),
            context,
        },
        429 => Error::RateLimit {
            message: crate::error::redact_secrets(&message),
            retry_after_ms,
            context,
        },
        408 => Error::Timeout { message, context },
        _ => Error::Provider {
            message: crate::error::redact_secrets(&message),
            status: Some(status),
            context,
        },
    }
}

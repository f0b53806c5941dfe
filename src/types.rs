//! Core type definitions for the LLM bridge.
//!
//! This module holds the unified, provider-agnostic shapes that every other
//! subsystem works in terms of:
//!
//! - [`Message`], [`Role`] and [`ContentPart`]: the conversation model. A
//!   message is an ordered sequence of typed content parts; tool calls and
//!   tool results are first-class parts rather than stringly metadata.
//! - [`ChatRequest`] and [`ChatRequestBuilder`]: what callers hand to the
//!   client façade. The builder validates on `build()` so malformed requests
//!   never reach a provider plugin.
//! - [`StreamDelta`]: one increment of a streamed response. Exactly one delta
//!   per response carries `finished = true`, and it is the last.
//! - [`ModelInfo`] / [`ModelCapabilities`]: catalog metadata that routing and
//!   request translation consult (e.g. a model that does not support
//!   temperature has the field omitted from the vendor body).
//! - [`ToolDefinition`]: a named tool with a structural JSON-schema input.
//!
//! Provider plugins parse vendor wire formats **at the boundary** and produce
//! these types; nothing downstream re-inspects vendor JSON.

use std::collections::HashMap;
use std::time::SystemTime;

use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cancel::CancellationHandle;
use crate::error::{Error, Result};

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        };
        write!(f, "{s}")
    }
}

/// Image formats accepted inside [`ContentPart::Image`].
pub const IMAGE_MIME_TYPES: &[&str] = &[
    "image/jpeg",
    "image/png",
    "image/gif",
    "image/webp",
    "image/svg+xml",
];

/// Document formats accepted inside [`ContentPart::Document`].
pub const DOCUMENT_MIME_TYPES: &[&str] = &[
    "application/pdf",
    "text/plain",
    "text/markdown",
    "text/csv",
    "application/json",
    "application/msword",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
];

/// A structured error carried inside a failed [`ContentPart::ToolResult`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResultError {
    pub code: String,
    pub message: String,
}

/// One typed piece of message content.
///
/// Serialized with an adjacent `type` tag so vendor translation layers can
/// match on it without guessing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    /// Plain text. Must be non-empty and not all whitespace.
    Text { text: String },

    /// Base64-encoded image data.
    Image {
        data: String,
        mime_type: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        alt: Option<String>,
    },

    /// Base64-encoded document data.
    Document {
        data: String,
        mime_type: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },

    /// Source code, optionally annotated with a language and filename.
    Code {
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        language: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        filename: Option<String>,
    },

    /// A tool invocation requested by the model.
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },

    /// The outcome of executing a tool call.
    ToolResult {
        call_id: String,
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        output: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<ToolResultError>,
    },
}

impl ContentPart {
    /// Convenience constructor for a text part.
    pub fn text(text: impl Into<String>) -> Self {
        ContentPart::Text { text: text.into() }
    }

    /// Validate this part against the shared content rules.
    pub fn validate(&self) -> Result<()> {
        match self {
            ContentPart::Text { text } => {
                if text.trim().is_empty() {
                    return Err(Error::validation("text part must not be empty"));
                }
            }
            ContentPart::Image { data, mime_type, .. } => {
                if !IMAGE_MIME_TYPES.contains(&mime_type.as_str()) {
                    return Err(Error::validation(format!(
                        "unsupported image mime type: {mime_type}"
                    )));
                }
                validate_base64(data, "image")?;
            }
            ContentPart::Document { data, mime_type, .. } => {
                if !DOCUMENT_MIME_TYPES.contains(&mime_type.as_str()) {
                    return Err(Error::validation(format!(
                        "unsupported document mime type: {mime_type}"
                    )));
                }
                validate_base64(data, "document")?;
            }
            ContentPart::Code { text, .. } => {
                if text.trim().is_empty() {
                    return Err(Error::validation("code part must not be empty"));
                }
            }
            ContentPart::ToolUse { id, name, .. } => {
                if id.is_empty() {
                    return Err(Error::validation("tool use id must not be empty"));
                }
                if name.is_empty() {
                    return Err(Error::validation("tool use name must not be empty"));
                }
            }
            ContentPart::ToolResult { call_id, success, error, .. } => {
                if call_id.is_empty() {
                    return Err(Error::validation("tool result call_id must not be empty"));
                }
                if !success && error.is_none() {
                    return Err(Error::validation(
                        "failed tool result must carry an error",
                    ));
                }
            }
        }
        Ok(())
    }
}

fn validate_base64(data: &str, what: &str) -> Result<()> {
    base64::engine::general_purpose::STANDARD
        .decode(data)
        .map(|_| ())
        .map_err(|e| Error::validation(format!("{what} data is not valid base64: {e}")))
}

/// One conversation message: a role plus an ordered sequence of content parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Vec<ContentPart>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, Value>>,
}

impl Message {
    pub fn new(role: Role, content: Vec<ContentPart>) -> Self {
        Self {
            role,
            content,
            metadata: None,
        }
    }

    /// A user message with a single text part.
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, vec![ContentPart::text(text)])
    }

    /// A system message with a single text part.
    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, vec![ContentPart::text(text)])
    }

    /// An assistant message with the given parts.
    pub fn assistant(content: Vec<ContentPart>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// An assistant message with a single text part.
    pub fn assistant_text(text: impl Into<String>) -> Self {
        Self::assistant(vec![ContentPart::text(text)])
    }

    /// A tool message carrying one or more tool results.
    pub fn tool_results(results: Vec<ContentPart>) -> Self {
        Self::new(Role::Tool, results)
    }

    /// Attach a metadata entry, creating the map on first use.
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value);
        self
    }

    /// All text content concatenated in order.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|part| match part {
                ContentPart::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    /// The `ToolUse` parts of this message, in order.
    pub fn tool_uses(&self) -> Vec<&ContentPart> {
        self.content
            .iter()
            .filter(|p| matches!(p, ContentPart::ToolUse { .. }))
            .collect()
    }

    /// Validate the message: non-empty content, each part valid.
    pub fn validate(&self) -> Result<()> {
        if self.content.is_empty() {
            return Err(Error::validation(format!(
                "{} message must have at least one content part",
                self.role
            )));
        }
        for part in &self.content {
            part.validate()?;
        }
        Ok(())
    }
}

/// Validate a whole conversation, including the tool-coverage invariant:
/// every assistant `ToolUse` id must be answered by a later tool result.
pub fn validate_messages(messages: &[Message]) -> Result<()> {
    if messages.is_empty() {
        return Err(Error::validation("request must contain at least one message"));
    }
    for message in messages {
        message.validate()?;
    }

    let mut pending: Vec<&str> = Vec::new();
    for message in messages {
        for part in &message.content {
            match part {
                ContentPart::ToolUse { id, .. } if message.role == Role::Assistant => {
                    pending.push(id);
                }
                ContentPart::ToolResult { call_id, .. } => {
                    pending.retain(|id| id != call_id);
                }
                _ => {}
            }
        }
    }
    // Calls from the final assistant message may still be unanswered: that is
    // exactly the state in which the agent loop dispatches tools.
    let last_assistant_ids: Vec<&str> = messages
        .iter()
        .rev()
        .find(|m| m.role == Role::Assistant)
        .map(|m| {
            m.content
                .iter()
                .filter_map(|p| match p {
                    ContentPart::ToolUse { id, .. } => Some(id.as_str()),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default();
    let unanswered: Vec<&str> = pending
        .into_iter()
        .filter(|id| !last_assistant_ids.contains(id))
        .collect();
    if !unanswered.is_empty() {
        return Err(Error::validation(format!(
            "assistant tool calls missing results: {}",
            unanswered.join(", ")
        )));
    }
    Ok(())
}

/// Token accounting reported by a provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
}

/// A named tool the model may invoke.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Structural JSON schema for the tool's parameters.
    pub input_schema: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Value>,
    /// Provider-specific overrides, keyed by provider id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hints: Option<HashMap<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, Value>>,
}

impl ToolDefinition {
    pub fn new(name: impl Into<String>, input_schema: Value) -> Self {
        Self {
            name: name.into(),
            description: None,
            input_schema,
            output_schema: None,
            hints: None,
            metadata: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Validate the definition: identifier-shaped name, structural schema.
    pub fn validate(&self) -> Result<()> {
        validate_tool_name(&self.name)?;
        validate_schema_shape(&self.input_schema)?;
        if let Some(schema) = &self.output_schema {
            validate_schema_shape(schema)?;
        }
        Ok(())
    }
}

/// Tool names must match `[a-zA-Z_][a-zA-Z0-9_]*`.
pub fn validate_tool_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(Error::validation(format!(
            "tool name must match [a-zA-Z_][a-zA-Z0-9_]*: {name:?}"
        )))
    }
}

const SCHEMA_TYPES: &[&str] = &[
    "object", "string", "number", "integer", "boolean", "array", "null",
];

/// Check that a value is a structurally plausible JSON schema: an object
/// whose `type`, `properties`, `required`, `items`, and `enum` members have
/// the shapes a validator can work with.
pub fn validate_schema_shape(schema: &Value) -> Result<()> {
    let obj = schema
        .as_object()
        .ok_or_else(|| Error::validation("schema must be a JSON object"))?;

    if let Some(ty) = obj.get("type") {
        let name = ty
            .as_str()
            .ok_or_else(|| Error::validation("schema `type` must be a string"))?;
        if !SCHEMA_TYPES.contains(&name) {
            return Err(Error::validation(format!("unknown schema type: {name}")));
        }
    }
    if let Some(props) = obj.get("properties") {
        let map = props
            .as_object()
            .ok_or_else(|| Error::validation("schema `properties` must be an object"))?;
        for (key, sub) in map {
            validate_schema_shape(sub)
                .map_err(|e| Error::validation(format!("property {key:?}: {e}")))?;
        }
    }
    if let Some(required) = obj.get("required") {
        let list = required
            .as_array()
            .ok_or_else(|| Error::validation("schema `required` must be an array"))?;
        if !list.iter().all(|v| v.is_string()) {
            return Err(Error::validation("schema `required` entries must be strings"));
        }
    }
    if let Some(items) = obj.get("items") {
        validate_schema_shape(items)?;
    }
    if let Some(en) = obj.get("enum") {
        if !en.is_array() {
            return Err(Error::validation("schema `enum` must be an array"));
        }
    }
    Ok(())
}

/// Validate `value` against a structural schema subset: `type`,
/// `properties`, `required`, `items`, and `enum`.
pub fn validate_against_schema(value: &Value, schema: &Value) -> Result<()> {
    let obj = match schema.as_object() {
        Some(o) => o,
        None => return Ok(()),
    };

    if let Some(en) = obj.get("enum").and_then(|e| e.as_array()) {
        if !en.contains(value) {
            return Err(Error::validation(format!(
                "value {value} not in enum {en:?}"
            )));
        }
        return Ok(());
    }

    if let Some(ty) = obj.get("type").and_then(|t| t.as_str()) {
        let matches = match ty {
            "object" => value.is_object(),
            "string" => value.is_string(),
            "number" => value.is_number(),
            "integer" => value.is_i64() || value.is_u64(),
            "boolean" => value.is_boolean(),
            "array" => value.is_array(),
            "null" => value.is_null(),
            _ => true,
        };
        if !matches {
            return Err(Error::validation(format!(
                "expected {ty}, got {value}"
            )));
        }
    }

    if let Some(required) = obj.get("required").and_then(|r| r.as_array()) {
        let map = value.as_object();
        for key in required.iter().filter_map(|k| k.as_str()) {
            if map.is_none_or(|m| !m.contains_key(key)) {
                return Err(Error::validation(format!("missing required field {key:?}")));
            }
        }
    }

    if let (Some(props), Some(map)) = (
        obj.get("properties").and_then(|p| p.as_object()),
        value.as_object(),
    ) {
        for (key, sub_schema) in props {
            if let Some(sub_value) = map.get(key) {
                validate_against_schema(sub_value, sub_schema)
                    .map_err(|e| Error::validation(format!("field {key:?}: {e}")))?;
            }
        }
    }

    if let (Some(items), Some(list)) = (obj.get("items"), value.as_array()) {
        for (i, item) in list.iter().enumerate() {
            validate_against_schema(item, items)
                .map_err(|e| Error::validation(format!("item {i}: {e}")))?;
        }
    }

    Ok(())
}

/// Budgets for the multi-turn agent loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiTurnOptions {
    /// Maximum request/response rounds, in `[1, 1000]`.
    pub max_iterations: u32,
    /// Wall-clock budget for the whole conversation, in milliseconds.
    pub timeout_ms: u64,
    /// Budget for a single iteration; must be below `timeout_ms`.
    pub iteration_timeout_ms: u64,
}

impl Default for MultiTurnOptions {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            timeout_ms: 10 * 60 * 1000,
            iteration_timeout_ms: 60 * 1000,
        }
    }
}

impl MultiTurnOptions {
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 || self.max_iterations > 1000 {
            return Err(Error::validation("max_iterations must be in [1, 1000]"));
        }
        if self.timeout_ms > 24 * 60 * 60 * 1000 {
            return Err(Error::validation("timeout_ms must be at most 24 hours"));
        }
        if self.iteration_timeout_ms >= self.timeout_ms {
            return Err(Error::validation(
                "iteration_timeout_ms must be below timeout_ms",
            ));
        }
        Ok(())
    }
}

/// A unified chat request. Build one with [`ChatRequest::builder`].
#[derive(Debug, Clone)]
pub struct ChatRequest {
    /// Qualified model id, `provider:modelName`.
    pub model: String,
    pub messages: Vec<Message>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
    pub top_p: Option<f64>,
    pub frequency_penalty: Option<f64>,
    pub presence_penalty: Option<f64>,
    pub tools: Option<Vec<ToolDefinition>>,
    pub stream: bool,
    pub multi_turn: Option<MultiTurnOptions>,
    /// Caller-supplied cancellation handle; combined with the per-call timer.
    pub cancel: Option<CancellationHandle>,
    /// Named provider config to use, default `"default"`.
    pub provider_config: String,
    pub options: Option<HashMap<String, Value>>,
}

impl ChatRequest {
    pub fn builder(model: impl Into<String>) -> ChatRequestBuilder {
        ChatRequestBuilder::new(model)
    }

    /// Split the qualified model id into `(provider, model_name)`.
    pub fn split_model(&self) -> Result<(&str, &str)> {
        split_qualified_model(&self.model)
    }
}

/// Split `provider:modelName`; unqualified ids are rejected.
pub fn split_qualified_model(model: &str) -> Result<(&str, &str)> {
    match model.split_once(':') {
        Some((provider, name)) if !provider.is_empty() && !name.is_empty() => {
            Ok((provider, name))
        }
        _ => Err(Error::validation(format!(
            "model id must be qualified as provider:modelName, got {model:?}"
        ))),
    }
}

/// Builder for [`ChatRequest`] with validation on `build()`.
#[derive(Debug, Clone, Default)]
pub struct ChatRequestBuilder {
    model: String,
    messages: Vec<Message>,
    temperature: Option<f64>,
    max_tokens: Option<u32>,
    top_p: Option<f64>,
    frequency_penalty: Option<f64>,
    presence_penalty: Option<f64>,
    tools: Option<Vec<ToolDefinition>>,
    stream: bool,
    multi_turn: Option<MultiTurnOptions>,
    cancel: Option<CancellationHandle>,
    provider_config: Option<String>,
    options: Option<HashMap<String, Value>>,
}

impl ChatRequestBuilder {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Default::default()
        }
    }

    pub fn message(mut self, message: Message) -> Self {
        self.messages.push(message);
        self
    }

    pub fn messages(mut self, messages: Vec<Message>) -> Self {
        self.messages = messages;
        self
    }

    pub fn temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn top_p(mut self, top_p: f64) -> Self {
        self.top_p = Some(top_p);
        self
    }

    pub fn frequency_penalty(mut self, penalty: f64) -> Self {
        self.frequency_penalty = Some(penalty);
        self
    }

    pub fn presence_penalty(mut self, penalty: f64) -> Self {
        self.presence_penalty = Some(penalty);
        self
    }

    pub fn tool(mut self, tool: ToolDefinition) -> Self {
        self.tools.get_or_insert_with(Vec::new).push(tool);
        self
    }

    pub fn tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    pub fn multi_turn(mut self, options: MultiTurnOptions) -> Self {
        self.multi_turn = Some(options);
        self
    }

    pub fn cancel(mut self, handle: CancellationHandle) -> Self {
        self.cancel = Some(handle);
        self
    }

    pub fn provider_config(mut self, name: impl Into<String>) -> Self {
        self.provider_config = Some(name.into());
        self
    }

    pub fn option(mut self, key: impl Into<String>, value: Value) -> Self {
        self.options
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value);
        self
    }

    /// Validate and produce the request.
    pub fn build(self) -> Result<ChatRequest> {
        split_qualified_model(&self.model)?;
        validate_messages(&self.messages)?;

        if let Some(t) = self.temperature {
            if !(0.0..=2.0).contains(&t) {
                return Err(Error::validation("temperature must be in [0.0, 2.0]"));
            }
        }
        if let Some(p) = self.top_p {
            if !(0.0..=1.0).contains(&p) {
                return Err(Error::validation("top_p must be in [0.0, 1.0]"));
            }
        }
        if let Some(tools) = &self.tools {
            for tool in tools {
                tool.validate()?;
            }
        }
        if let Some(mt) = &self.multi_turn {
            mt.validate()?;
        }

        Ok(ChatRequest {
            model: self.model,
            messages: self.messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            top_p: self.top_p,
            frequency_penalty: self.frequency_penalty,
            presence_penalty: self.presence_penalty,
            tools: self.tools,
            stream: self.stream,
            multi_turn: self.multi_turn,
            cancel: self.cancel,
            provider_config: self
                .provider_config
                .unwrap_or_else(|| "default".to_string()),
            options: self.options,
        })
    }
}

/// One increment of a streamed response.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamDelta {
    /// Stable response id; vendor-provided or synthesized.
    pub id: String,
    /// The partial message for this chunk. Non-terminal deltas carry only
    /// the incremental content; the terminal delta has empty content.
    pub delta: Message,
    pub finished: bool,
    pub usage: Option<Usage>,
    /// Carries `finishReason`, `eventType`, and provider-raw termination data.
    pub metadata: HashMap<String, Value>,
}

impl StreamDelta {
    pub fn content(id: impl Into<String>, parts: Vec<ContentPart>) -> Self {
        Self {
            id: id.into(),
            delta: Message::assistant(parts),
            finished: false,
            usage: None,
            metadata: HashMap::new(),
        }
    }

    pub fn terminal(id: impl Into<String>, usage: Option<Usage>) -> Self {
        Self {
            id: id.into(),
            delta: Message::assistant(Vec::new()),
            finished: true,
            usage,
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// The normalized finish reason, when recorded in metadata.
    pub fn finish_reason(&self) -> Option<&str> {
        self.metadata.get("finishReason").and_then(|v| v.as_str())
    }
}

/// What a model can do, consulted during translation and routing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelCapabilities {
    pub temperature: bool,
    pub streaming: bool,
    pub tools: bool,
    pub max_context_tokens: u64,
    pub supports_images: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supports_documents: Option<bool>,
}

impl Default for ModelCapabilities {
    fn default() -> Self {
        Self {
            temperature: true,
            streaming: true,
            tools: true,
            max_context_tokens: 128_000,
            supports_images: false,
            supports_documents: None,
        }
    }
}

/// Catalog entry for one model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    /// Qualified id, `provider:modelName`.
    pub id: String,
    pub provider: String,
    pub capabilities: ModelCapabilities,
    /// Canonical plugin string, e.g. `openai-responses-v1`.
    pub provider_plugin: String,
}

impl ModelInfo {
    pub fn validate(&self) -> Result<()> {
        split_qualified_model(&self.id)?;
        if self.provider.is_empty() {
            return Err(Error::validation("model provider must not be empty"));
        }
        if self.provider_plugin.is_empty() {
            return Err(Error::validation("model provider_plugin must not be empty"));
        }
        Ok(())
    }
}

/// Registry metadata for a provider plugin.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderPluginInfo {
    pub id: String,
    pub version: String,
    pub registered_at: SystemTime,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_role_serde_lowercase() {
        assert_eq!(serde_json::to_string(&Role::Assistant).unwrap(), "\"assistant\"");
        let role: Role = serde_json::from_str("\"tool\"").unwrap();
        assert_eq!(role, Role::Tool);
    }

    #[test]
    fn test_content_part_text_validation() {
        assert!(ContentPart::text("hello").validate().is_ok());
        assert!(ContentPart::text("").validate().is_err());
        assert!(ContentPart::text("   \n\t").validate().is_err());
    }

    #[test]
    fn test_content_part_image_validation() {
        let ok = ContentPart::Image {
            data: base64::engine::general_purpose::STANDARD.encode(b"png-bytes"),
            mime_type: "image/png".into(),
            alt: None,
        };
        assert!(ok.validate().is_ok());

        let bad_mime = ContentPart::Image {
            data: base64::engine::general_purpose::STANDARD.encode(b"x"),
            mime_type: "image/tiff".into(),
            alt: None,
        };
        assert!(bad_mime.validate().is_err());

        let bad_data = ContentPart::Image {
            data: "not-base64!!!".into(),
            mime_type: "image/png".into(),
            alt: None,
        };
        assert!(bad_data.validate().is_err());
    }

    #[test]
    fn test_content_part_serde_tagging() {
        let part = ContentPart::ToolUse {
            id: "call_1".into(),
            name: "get_weather".into(),
            input: json!({"location": "Paris"}),
        };
        let value = serde_json::to_value(&part).unwrap();
        assert_eq!(value["type"], "tool_use");
        assert_eq!(value["name"], "get_weather");

        let back: ContentPart = serde_json::from_value(value).unwrap();
        assert_eq!(back, part);
    }

    #[test]
    fn test_failed_tool_result_requires_error() {
        let part = ContentPart::ToolResult {
            call_id: "call_1".into(),
            success: false,
            output: None,
            error: None,
        };
        assert!(part.validate().is_err());
    }

    #[test]
    fn test_message_text_concatenation() {
        let msg = Message::assistant(vec![
            ContentPart::text("Hello"),
            ContentPart::ToolUse {
                id: "c1".into(),
                name: "t".into(),
                input: json!({}),
            },
            ContentPart::text(" world"),
        ]);
        assert_eq!(msg.text(), "Hello world");
        assert_eq!(msg.tool_uses().len(), 1);
    }

    #[test]
    fn test_validate_messages_tool_coverage() {
        let covered = vec![
            Message::user("weather?"),
            Message::assistant(vec![ContentPart::ToolUse {
                id: "c1".into(),
                name: "get_weather".into(),
                input: json!({}),
            }]),
            Message::tool_results(vec![ContentPart::ToolResult {
                call_id: "c1".into(),
                success: true,
                output: Some(json!({"temp": 20})),
                error: None,
            }]),
        ];
        assert!(validate_messages(&covered).is_ok());

        // A dangling call from a *non-final* assistant message is an error.
        let dangling = vec![
            Message::user("weather?"),
            Message::assistant(vec![ContentPart::ToolUse {
                id: "c1".into(),
                name: "get_weather".into(),
                input: json!({}),
            }]),
            Message::assistant_text("moving on"),
        ];
        assert!(validate_messages(&dangling).is_err());

        // Calls from the final assistant message may be pending.
        let pending = vec![
            Message::user("weather?"),
            Message::assistant(vec![ContentPart::ToolUse {
                id: "c1".into(),
                name: "get_weather".into(),
                input: json!({}),
            }]),
        ];
        assert!(validate_messages(&pending).is_ok());
    }

    #[test]
    fn test_split_qualified_model() {
        assert_eq!(
            split_qualified_model("openai:gpt-4o-2024-08-06").unwrap(),
            ("openai", "gpt-4o-2024-08-06")
        );
        assert!(split_qualified_model("gpt-4o").is_err());
        assert!(split_qualified_model(":gpt-4o").is_err());
        assert!(split_qualified_model("openai:").is_err());
    }

    #[test]
    fn test_chat_request_builder_validation() {
        let req = ChatRequest::builder("anthropic:claude-sonnet-4")
            .message(Message::user("hi"))
            .temperature(0.7)
            .build()
            .unwrap();
        assert_eq!(req.provider_config, "default");
        assert!(!req.stream);

        assert!(
            ChatRequest::builder("unqualified")
                .message(Message::user("hi"))
                .build()
                .is_err()
        );
        assert!(
            ChatRequest::builder("openai:gpt-4o")
                .build()
                .is_err(),
            "empty message list must be rejected"
        );
        assert!(
            ChatRequest::builder("openai:gpt-4o")
                .message(Message::user("hi"))
                .temperature(3.0)
                .build()
                .is_err()
        );
    }

    #[test]
    fn test_multi_turn_options_validation() {
        assert!(MultiTurnOptions::default().validate().is_ok());
        assert!(
            MultiTurnOptions {
                max_iterations: 0,
                ..Default::default()
            }
            .validate()
            .is_err()
        );
        assert!(
            MultiTurnOptions {
                iteration_timeout_ms: 600_000,
                timeout_ms: 600_000,
                ..Default::default()
            }
            .validate()
            .is_err()
        );
        assert!(
            MultiTurnOptions {
                timeout_ms: 25 * 60 * 60 * 1000,
                ..Default::default()
            }
            .validate()
            .is_err()
        );
    }

    #[test]
    fn test_tool_name_validation() {
        assert!(validate_tool_name("get_weather").is_ok());
        assert!(validate_tool_name("_private").is_ok());
        assert!(validate_tool_name("tool2").is_ok());
        assert!(validate_tool_name("2tool").is_err());
        assert!(validate_tool_name("").is_err());
        assert!(validate_tool_name("bad-name").is_err());
    }

    #[test]
    fn test_schema_shape_validation() {
        let schema = json!({
            "type": "object",
            "properties": {
                "location": {"type": "string"},
                "days": {"type": "integer"}
            },
            "required": ["location"]
        });
        assert!(validate_schema_shape(&schema).is_ok());
        assert!(validate_schema_shape(&json!("not a schema")).is_err());
        assert!(validate_schema_shape(&json!({"type": "tuple"})).is_err());
        assert!(validate_schema_shape(&json!({"required": [1]})).is_err());
    }

    #[test]
    fn test_validate_against_schema() {
        let schema = json!({
            "type": "object",
            "properties": {
                "location": {"type": "string"},
                "unit": {"enum": ["celsius", "fahrenheit"]}
            },
            "required": ["location"]
        });
        assert!(validate_against_schema(&json!({"location": "Paris"}), &schema).is_ok());
        assert!(
            validate_against_schema(&json!({"location": "Paris", "unit": "celsius"}), &schema)
                .is_ok()
        );
        assert!(validate_against_schema(&json!({}), &schema).is_err());
        assert!(validate_against_schema(&json!({"location": 4}), &schema).is_err());
        assert!(
            validate_against_schema(&json!({"location": "Paris", "unit": "kelvin"}), &schema)
                .is_err()
        );
    }

    #[test]
    fn test_stream_delta_helpers() {
        let delta = StreamDelta::content("resp-1", vec![ContentPart::text("Hi")]);
        assert!(!delta.finished);
        assert_eq!(delta.delta.text(), "Hi");

        let terminal = StreamDelta::terminal("resp-1", Some(Usage::default()))
            .with_metadata("finishReason", json!("stop"));
        assert!(terminal.finished);
        assert!(terminal.delta.content.is_empty());
        assert_eq!(terminal.finish_reason(), Some("stop"));
    }

    #[test]
    fn test_model_info_validation() {
        let info = ModelInfo {
            id: "openai:gpt-4o".into(),
            provider: "openai".into(),
            capabilities: ModelCapabilities::default(),
            provider_plugin: "openai-responses-v1".into(),
        };
        assert!(info.validate().is_ok());

        let bad = ModelInfo {
            id: "gpt-4o".into(),
            ..info
        };
        assert!(bad.validate().is_err());
    }
}

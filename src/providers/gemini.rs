//! Google Gemini v1 plugin.
//!
//! Wire contract: `POST {base_url}/models/{model}:generateContent` for
//! buffered calls and `:streamGenerateContent?alt=sse` for streaming, both
//! authenticated with the `x-goog-api-key` header. Messages become
//! `contents` entries with `user` / `model` roles; system messages are
//! lifted into `systemInstruction`; tool calls appear as `functionCall`
//! parts and results return as `functionResponse` parts (keyed by function
//! name, so translation resolves each call id back to its name).
//!
//! Gemini reports `finishReason: "STOP"` even when the model is asking for
//! a tool, so termination detection inspects the parts: `STOP` plus a
//! `functionCall` classifies as tool use.

use std::collections::HashMap;

use serde_json::{Value, json};

use crate::cancel::CancellationHandle;
use crate::config::ProviderConfig;
use crate::error::{CancelStage, Error, ErrorContext, Result};
use crate::providers::{
    ChatResponse, Confidence, DeltaStream, ProviderPlugin, TerminationFrame, TerminationReason,
    TerminationSignal, normalize_status, signal_from_finish_reason, synthesize_stream_id,
};
use crate::sse::parse_sse;
use crate::transport::retry::parse_retry_after;
use crate::transport::{ByteStream, HttpRequest, HttpResponse};
use crate::types::{
    ChatRequest, ContentPart, Message, ModelCapabilities, Role, StreamDelta, Usage,
};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

#[derive(Debug, Default)]
pub struct GeminiPlugin;

impl GeminiPlugin {
    pub fn new() -> Self {
        Self
    }

    fn context(&self, response: &HttpResponse) -> ErrorContext {
        ErrorContext::for_provider(self.id(), self.version())
            .with_response(response.status, &response.headers)
    }
}

impl ProviderPlugin for GeminiPlugin {
    fn id(&self) -> &str {
        "google"
    }

    fn version(&self) -> &str {
        "gemini-v1"
    }

    fn initialize(&self, config: &ProviderConfig) -> Result<()> {
        match &config.api_key {
            Some(key) if !key.trim().is_empty() => {}
            _ => return Err(Error::validation("gemini config requires api_key")),
        }
        if let Some(url) = &config.base_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(Error::validation("gemini base_url must be http(s)"));
            }
        }
        Ok(())
    }

    fn supports_model(&self, model_name: &str) -> bool {
        model_name.starts_with("gemini")
    }

    fn translate_request(
        &self,
        request: &ChatRequest,
        config: &ProviderConfig,
        capabilities: Option<&ModelCapabilities>,
    ) -> Result<HttpRequest> {
        let (_, model_name) = request.split_model()?;
        let base_url = config.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL);
        let verb = if request.stream {
            "streamGenerateContent?alt=sse"
        } else {
            "generateContent"
        };
        let url = format!(
            "{}/models/{}:{}",
            base_url.trim_end_matches('/'),
            model_name,
            verb
        );

        // functionResponse parts are keyed by name, not call id.
        let call_names: HashMap<&str, &str> = request
            .messages
            .iter()
            .flat_map(|m| &m.content)
            .filter_map(|part| match part {
                ContentPart::ToolUse { id, name, .. } => Some((id.as_str(), name.as_str())),
                _ => None,
            })
            .collect();

        let system = request
            .messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.text())
            .collect::<Vec<_>>()
            .join("\n\n");

        let contents: Vec<Value> = request
            .messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| to_gemini_content(m, &call_names))
            .collect::<Result<_>>()?;

        let mut generation_config = serde_json::Map::new();
        let supports_temperature = capabilities.is_none_or(|c| c.temperature);
        if supports_temperature {
            if let Some(temperature) = request.temperature {
                generation_config.insert("temperature".into(), json!(temperature));
            }
        }
        if let Some(max_tokens) = request.max_tokens {
            generation_config.insert("maxOutputTokens".into(), json!(max_tokens));
        }
        if let Some(top_p) = request.top_p {
            generation_config.insert("topP".into(), json!(top_p));
        }

        let mut body = json!({"contents": contents});
        if !system.is_empty() {
            body["systemInstruction"] = json!({"parts": [{"text": system}]});
        }
        if !generation_config.is_empty() {
            body["generationConfig"] = Value::Object(generation_config);
        }
        if let Some(tools) = &request.tools {
            if !tools.is_empty() {
                let declarations: Vec<Value> = tools
                    .iter()
                    .map(|t| {
                        json!({
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.input_schema,
                        })
                    })
                    .collect();
                body["tools"] = json!([{"functionDeclarations": declarations}]);
            }
        }

        let mut http = HttpRequest::post(url)
            .header("x-goog-api-key", config.api_key.as_deref().unwrap_or_default())
            .json(&body);
        for (name, value) in &config.headers {
            http = http.header(name, value);
        }
        Ok(http)
    }

    fn parse_response(&self, response: &HttpResponse) -> Result<ChatResponse> {
        let body = response.body_json()?;
        let candidate = body
            .pointer("/candidates/0")
            .cloned()
            .unwrap_or_default();

        let mut parts = Vec::new();
        for (i, part) in candidate
            .pointer("/content/parts")
            .and_then(|p| p.as_array())
            .into_iter()
            .flatten()
            .enumerate()
        {
            if let Some(text) = part.get("text").and_then(|t| t.as_str()) {
                if !text.is_empty() {
                    parts.push(ContentPart::text(text));
                }
            }
            if let Some(call) = part.get("functionCall") {
                parts.push(function_call_part(call, i));
            }
        }

        let finish_reason = candidate
            .get("finishReason")
            .and_then(|r| r.as_str())
            .map(str::to_string);
        let usage = body.get("usageMetadata").map(parse_usage);

        let mut metadata = HashMap::new();
        if let Some(reason) = &finish_reason {
            metadata.insert("finishReason".to_string(), Value::from(reason.as_str()));
        }
        if let Some(ratings) = candidate.get("safetyRatings") {
            metadata.insert("safetyRatings".to_string(), ratings.clone());
        }

        Ok(ChatResponse {
            id: body
                .get("responseId")
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .unwrap_or_else(synthesize_stream_id),
            message: Message::assistant(parts),
            usage,
            finish_reason,
            metadata,
        })
    }

    fn parse_stream(&self, bytes: ByteStream, cancel: CancellationHandle) -> DeltaStream {
        struct State {
            events: std::pin::Pin<Box<dyn futures::Stream<Item = Result<crate::sse::SseEvent>> + Send>>,
            cancel: CancellationHandle,
            response_id: String,
            usage: Option<Usage>,
            finish_reason: Option<String>,
            call_index: usize,
            stopped: bool,
        }

        let state = State {
            events: parse_sse(bytes),
            cancel,
            response_id: synthesize_stream_id(),
            usage: None,
            finish_reason: None,
            call_index: 0,
            stopped: false,
        };

        Box::pin(futures::stream::unfold(state, |mut state| async move {
            use futures::StreamExt;
            loop {
                if state.stopped {
                    return None;
                }
                if state.cancel.is_cancelled() {
                    state.stopped = true;
                    return Some((Err(Error::cancelled(CancelStage::Streaming)), state));
                }

                let event = match state.events.next().await {
                    Some(Ok(event)) => event,
                    Some(Err(e)) => {
                        state.stopped = true;
                        return Some((Err(e), state));
                    }
                    None => {
                        // Gemini's terminator is simply the absence of
                        // further chunks.
                        state.stopped = true;
                        let mut delta =
                            StreamDelta::terminal(state.response_id.clone(), state.usage);
                        if let Some(reason) = state.finish_reason.take() {
                            delta = delta.with_metadata("finishReason", Value::from(reason));
                        }
                        return Some((Ok(delta), state));
                    }
                };
                if event.data.is_empty() || event.is_done() {
                    continue;
                }

                let chunk: Value = match serde_json::from_str(&event.data) {
                    Ok(value) => value,
                    Err(e) => {
                        state.stopped = true;
                        return Some((
                            Err(Error::streaming(format!(
                                "malformed stream chunk {:?}: {e}",
                                event.data
                            ))),
                            state,
                        ));
                    }
                };

                if let Some(error) = chunk.get("error") {
                    state.stopped = true;
                    let message = error
                        .get("message")
                        .and_then(|m| m.as_str())
                        .unwrap_or("vendor reported a stream error");
                    return Some((Err(Error::provider(message)), state));
                }

                if let Some(id) = chunk.get("responseId").and_then(|v| v.as_str()) {
                    state.response_id = id.to_string();
                }
                if let Some(usage) = chunk.get("usageMetadata") {
                    state.usage = Some(parse_usage(usage));
                }

                let candidate = chunk.pointer("/candidates/0").cloned().unwrap_or_default();
                if let Some(reason) = candidate.get("finishReason").and_then(|r| r.as_str()) {
                    state.finish_reason = Some(reason.to_string());
                }

                let mut parts = Vec::new();
                for part in candidate
                    .pointer("/content/parts")
                    .and_then(|p| p.as_array())
                    .into_iter()
                    .flatten()
                {
                    if let Some(text) = part.get("text").and_then(|t| t.as_str()) {
                        if !text.is_empty() {
                            parts.push(ContentPart::text(text));
                        }
                    }
                    if let Some(call) = part.get("functionCall") {
                        parts.push(function_call_part(call, state.call_index));
                        state.call_index += 1;
                    }
                }
                if !parts.is_empty() {
                    let delta = StreamDelta::content(state.response_id.clone(), parts)
                        .with_metadata("eventType", Value::from("chunk"));
                    return Some((Ok(delta), state));
                }
                // Keep-alive or metadata-only chunk.
            }
        }))
    }

    fn normalize_error(&self, response: &HttpResponse) -> Error {
        let mut context = self.context(response);
        let body = response.body_json().ok();
        let status_name = body
            .as_ref()
            .and_then(|b| b.pointer("/error/status"))
            .and_then(|s| s.as_str())
            .map(str::to_string);
        let message = body
            .as_ref()
            .and_then(|b| b.pointer("/error/message"))
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| format!("gemini returned status {}", response.status));
        if let Some(name) = &status_name {
            context = context.with_vendor_code(name.clone());
        }

        match status_name.as_deref() {
            Some("UNAUTHENTICATED") | Some("PERMISSION_DENIED") => Error::Auth {
                message: crate::error::redact_secrets(&message),
                context,
            },
            Some("RESOURCE_EXHAUSTED") => Error::RateLimit {
                message: crate::error::redact_secrets(&message),
                retry_after_ms: response.header("retry-after").and_then(parse_retry_after),
                context,
            },
            Some("DEADLINE_EXCEEDED") => Error::Timeout { message, context },
            _ => {
                let retry_after = response.header("retry-after").and_then(parse_retry_after);
                normalize_status(response.status, message, context, retry_after)
            }
        }
    }

    fn detect_termination(&self, frame: TerminationFrame<'_>) -> TerminationSignal {
        let (raw, finished, has_function_call) = match frame {
            TerminationFrame::Final(response) => (
                response.finish_reason.clone(),
                true,
                !response.message.tool_uses().is_empty(),
            ),
            TerminationFrame::Delta(delta) => (
                delta.finish_reason().map(str::to_string),
                delta.finished,
                !delta.delta.tool_uses().is_empty(),
            ),
        };

        // STOP plus a functionCall part means the model wants a tool.
        if raw.as_deref() == Some("STOP") && has_function_call {
            let mut signal = signal_from_finish_reason(raw.as_deref(), finished);
            signal.reason = TerminationReason::ToolUseRequired;
            signal.confidence = Confidence::High;
            signal.message = "STOP with a pending functionCall part".to_string();
            return signal;
        }
        signal_from_finish_reason(raw.as_deref(), finished)
    }
}

/// Gemini function calls carry no id; synthesize a stable one per position.
fn function_call_part(call: &Value, index: usize) -> ContentPart {
    ContentPart::ToolUse {
        id: format!("gemini-call-{index}"),
        name: call
            .get("name")
            .and_then(|n| n.as_str())
            .unwrap_or_default()
            .to_string(),
        input: call.get("args").cloned().unwrap_or_else(|| json!({})),
    }
}

fn to_gemini_content(message: &Message, call_names: &HashMap<&str, &str>) -> Result<Value> {
    let role = match message.role {
        Role::Assistant => "model",
        Role::User | Role::Tool => "user",
        Role::System => {
            return Err(Error::validation(
                "system messages must be lifted before translation",
            ));
        }
    };

    let mut parts = Vec::new();
    for part in &message.content {
        let value = match part {
            ContentPart::Text { text } => json!({"text": text}),
            ContentPart::Code { text, language, .. } => {
                let fenced = match language {
                    Some(lang) => format!("```{lang}\n{text}\n```"),
                    None => format!("```\n{text}\n```"),
                };
                json!({"text": fenced})
            }
            ContentPart::Image { data, mime_type, .. }
            | ContentPart::Document { data, mime_type, .. } => json!({
                "inlineData": {"mimeType": mime_type, "data": data}
            }),
            ContentPart::ToolUse { name, input, .. } => json!({
                "functionCall": {"name": name, "args": input}
            }),
            ContentPart::ToolResult { call_id, success, output, error } => {
                let name = call_names.get(call_id.as_str()).copied().ok_or_else(|| {
                    Error::validation(format!(
                        "tool result {call_id:?} has no matching functionCall"
                    ))
                })?;
                let response = if *success {
                    output.clone().unwrap_or(Value::Null)
                } else {
                    json!({"error": error})
                };
                json!({
                    "functionResponse": {"name": name, "response": {"content": response}}
                })
            }
        };
        parts.push(value);
    }
    Ok(json!({"role": role, "parts": parts}))
}

fn parse_usage(usage: &Value) -> Usage {
    Usage {
        prompt_tokens: usage
            .get("promptTokenCount")
            .and_then(|v| v.as_u64())
            .unwrap_or_default(),
        completion_tokens: usage
            .get("candidatesTokenCount")
            .and_then(|v| v.as_u64())
            .unwrap_or_default(),
        total_tokens: usage.get("totalTokenCount").and_then(|v| v.as_u64()),
    }
}

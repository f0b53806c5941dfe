//! OpenAI Responses v1 plugin.
//!
//! Wire contract: `POST {base_url}/responses` with bearer auth and optional
//! `OpenAI-Organization` / `OpenAI-Project` headers. Conversation messages
//! become `input` items; tool calls round-trip as `function_call` /
//! `function_call_output` items. Streaming uses the same endpoint with
//! `stream: true`; recognized events are `response.created`,
//! `response.output_text.delta`, `response.completed`, and `error`, closed
//! by the `data: [DONE]` sentinel.

use std::collections::HashMap;

use serde_json::{Value, json};

use crate::cancel::CancellationHandle;
use crate::config::ProviderConfig;
use crate::error::{CancelStage, Error, ErrorContext, Result};
use crate::providers::{
    ChatResponse, DeltaStream, ProviderPlugin, TerminationFrame, TerminationSignal,
    normalize_status, signal_from_finish_reason, synthesize_stream_id,
};
use crate::sse::{SseEvent, parse_sse};
use crate::transport::retry::parse_retry_after;
use crate::transport::{ByteStream, HttpRequest, HttpResponse};
use crate::types::{
    ChatRequest, ContentPart, Message, ModelCapabilities, Role, StreamDelta, Usage,
};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Model name prefixes this plugin serves.
const MODEL_PREFIXES: &[&str] = &["gpt-", "o1", "o3", "o4", "chatgpt-"];

#[derive(Debug, Default)]
pub struct OpenAiPlugin;

impl OpenAiPlugin {
    pub fn new() -> Self {
        Self
    }

    fn context(&self, response: &HttpResponse) -> ErrorContext {
        ErrorContext::for_provider(self.id(), self.version())
            .with_response(response.status, &response.headers)
    }
}

impl ProviderPlugin for OpenAiPlugin {
    fn id(&self) -> &str {
        "openai"
    }

    fn version(&self) -> &str {
        "responses-v1"
    }

    fn initialize(&self, config: &ProviderConfig) -> Result<()> {
        match &config.api_key {
            Some(key) if !key.trim().is_empty() => {}
            _ => return Err(Error::validation("openai config requires api_key")),
        }
        if let Some(url) = &config.base_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(Error::validation("openai base_url must be http(s)"));
            }
        }
        Ok(())
    }

    fn supports_model(&self, model_name: &str) -> bool {
        MODEL_PREFIXES.iter().any(|p| model_name.starts_with(p))
    }

    fn translate_request(
        &self,
        request: &ChatRequest,
        config: &ProviderConfig,
        capabilities: Option<&ModelCapabilities>,
    ) -> Result<HttpRequest> {
        let (_, model_name) = request.split_model()?;
        let base_url = config.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL);

        let input: Vec<Value> = request.messages.iter().flat_map(to_input_items).collect();

        let mut body = json!({
            "model": model_name,
            "input": input,
            "stream": request.stream,
        });
        let supports_temperature = capabilities.is_none_or(|c| c.temperature);
        if supports_temperature {
            if let Some(temperature) = request.temperature {
                body["temperature"] = json!(temperature);
            }
        }
        if let Some(max_tokens) = request.max_tokens {
            body["max_output_tokens"] = json!(max_tokens);
        }
        if let Some(top_p) = request.top_p {
            body["top_p"] = json!(top_p);
        }
        if let Some(tools) = &request.tools {
            if !tools.is_empty() {
                body["tools"] = Value::Array(
                    tools
                        .iter()
                        .map(|t| {
                            json!({
                                "type": "function",
                                "function": {
                                    "name": t.name,
                                    "description": t.description,
                                    "parameters": t.input_schema,
                                }
                            })
                        })
                        .collect(),
                );
            }
        }

        let mut http = HttpRequest::post(format!("{}/responses", base_url.trim_end_matches('/')))
            .header(
                "authorization",
                format!("Bearer {}", config.api_key.as_deref().unwrap_or_default()),
            )
            .json(&body);
        if let Some(org) = &config.organization {
            http = http.header("OpenAI-Organization", org);
        }
        if let Some(project) = &config.project {
            http = http.header("OpenAI-Project", project);
        }
        for (name, value) in &config.headers {
            http = http.header(name, value);
        }
        Ok(http)
    }

    fn parse_response(&self, response: &HttpResponse) -> Result<ChatResponse> {
        let body = response.body_json()?;
        let id = body
            .get("id")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        let mut parts = Vec::new();
        let mut saw_function_call = false;
        for item in body.get("output").and_then(|o| o.as_array()).into_iter().flatten() {
            match item.get("type").and_then(|t| t.as_str()) {
                Some("message") => {
                    for piece in item.get("content").and_then(|c| c.as_array()).into_iter().flatten()
                    {
                        if piece.get("type").and_then(|t| t.as_str()) == Some("output_text") {
                            if let Some(text) = piece.get("text").and_then(|t| t.as_str()) {
                                if !text.is_empty() {
                                    parts.push(ContentPart::text(text));
                                }
                            }
                        }
                    }
                }
                Some("function_call") => {
                    saw_function_call = true;
                    parts.push(parse_function_call_item(item)?);
                }
                _ => {}
            }
        }

        let finish_reason = derive_finish_reason(&body, saw_function_call);
        let usage = body.get("usage").map(parse_usage);

        let mut metadata = HashMap::new();
        if let Some(status) = body.get("status").and_then(|s| s.as_str()) {
            metadata.insert("providerStatus".to_string(), Value::from(status));
        }
        if let Some(reason) = &finish_reason {
            metadata.insert("finishReason".to_string(), Value::from(reason.as_str()));
        }

        Ok(ChatResponse {
            id,
            message: Message::assistant(parts),
            usage,
            finish_reason,
            metadata,
        })
    }

    fn parse_stream(&self, bytes: ByteStream, cancel: CancellationHandle) -> DeltaStream {
        struct State {
            events: std::pin::Pin<Box<dyn futures::Stream<Item = Result<SseEvent>> + Send>>,
            cancel: CancellationHandle,
            response_id: String,
            usage: Option<Usage>,
            finish_reason: Option<String>,
            stopped: bool,
        }

        let state = State {
            events: parse_sse(bytes),
            cancel,
            response_id: synthesize_stream_id(),
            usage: None,
            finish_reason: None,
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
                        // Truncated stream: still close the delta sequence.
                        state.stopped = true;
                        return Some((Ok(terminal_delta(&state.response_id, state.usage, state.finish_reason.take())), state));
                    }
                };

                if event.data.is_empty() {
                    continue;
                }
                if event.is_done() {
                    state.stopped = true;
                    return Some((Ok(terminal_delta(&state.response_id, state.usage, state.finish_reason.take())), state));
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

                let event_type = chunk
                    .get("type")
                    .and_then(|t| t.as_str())
                    .or(event.event.as_deref())
                    .unwrap_or_default()
                    .to_string();

                match event_type.as_str() {
                    "error" => {
                        state.stopped = true;
                        let message = chunk
                            .pointer("/error/message")
                            .and_then(|m| m.as_str())
                            .unwrap_or("vendor reported a stream error");
                        return Some((Err(Error::provider(message)), state));
                    }
                    "response.created" => {
                        if let Some(id) = chunk.pointer("/response/id").and_then(|v| v.as_str()) {
                            state.response_id = id.to_string();
                        }
                    }
                    "response.output_text.delta" => {
                        if let Some(text) = chunk.get("delta").and_then(|d| d.as_str()) {
                            if !text.is_empty() {
                                let delta = StreamDelta::content(
                                    state.response_id.clone(),
                                    vec![ContentPart::text(text)],
                                )
                                .with_metadata("eventType", Value::from(event_type.as_str()));
                                return Some((Ok(delta), state));
                            }
                        }
                    }
                    "response.completed" => {
                        let response = chunk.get("response").cloned().unwrap_or_default();
                        if let Some(usage) = response.get("usage") {
                            state.usage = Some(parse_usage(usage));
                        }
                        let mut tool_parts = Vec::new();
                        for item in response
                            .get("output")
                            .and_then(|o| o.as_array())
                            .into_iter()
                            .flatten()
                        {
                            if item.get("type").and_then(|t| t.as_str()) == Some("function_call") {
                                match parse_function_call_item(item) {
                                    Ok(part) => tool_parts.push(part),
                                    Err(e) => {
                                        state.stopped = true;
                                        return Some((Err(e), state));
                                    }
                                }
                            }
                        }
                        state.finish_reason =
                            derive_finish_reason(&response, !tool_parts.is_empty());
                        if !tool_parts.is_empty() {
                            let delta =
                                StreamDelta::content(state.response_id.clone(), tool_parts)
                                    .with_metadata("eventType", Value::from(event_type.as_str()));
                            return Some((Ok(delta), state));
                        }
                    }
                    // Keep-alives and unrecognized event types are skipped.
                    _ => {}
                }
            }
        }))
    }

    fn normalize_error(&self, response: &HttpResponse) -> Error {
        let mut context = self.context(response);
        let body = response.body_json().ok();
        let message = body
            .as_ref()
            .and_then(|b| b.pointer("/error/message"))
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| format!("openai returned status {}", response.status));
        if let Some(code) = body
            .as_ref()
            .and_then(|b| b.pointer("/error/type"))
            .and_then(|c| c.as_str())
        {
            context = context.with_vendor_code(code);
        }
        let retry_after = response.header("retry-after").and_then(parse_retry_after);
        normalize_status(response.status, message, context, retry_after)
    }

    fn detect_termination(&self, frame: TerminationFrame<'_>) -> TerminationSignal {
        match frame {
            TerminationFrame::Final(response) => {
                signal_from_finish_reason(response.finish_reason.as_deref(), true)
            }
            TerminationFrame::Delta(delta) => {
                signal_from_finish_reason(delta.finish_reason(), delta.finished)
            }
        }
    }
}

fn terminal_delta(id: &str, usage: Option<Usage>, finish_reason: Option<String>) -> StreamDelta {
    let mut delta = StreamDelta::terminal(id, usage);
    if let Some(reason) = finish_reason {
        delta = delta.with_metadata("finishReason", Value::from(reason));
    }
    delta
}

/// Map one unified message to Responses-API input items.
fn to_input_items(message: &Message) -> Vec<Value> {
    let role = match message.role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    };

    let mut items = Vec::new();
    let mut text_parts: Vec<Value> = Vec::new();

    for part in &message.content {
        match part {
            ContentPart::Text { text } => {
                text_parts.push(json!({"type": "input_text", "text": text}));
            }
            ContentPart::Code { text, language, .. } => {
                let fenced = match language {
                    Some(lang) => format!("```{lang}\n{text}\n```"),
                    None => format!("```\n{text}\n```"),
                };
                text_parts.push(json!({"type": "input_text", "text": fenced}));
            }
            ContentPart::Image { data, mime_type, .. } => {
                text_parts.push(json!({
                    "type": "input_image",
                    "image_url": format!("data:{mime_type};base64,{data}"),
                }));
            }
            ContentPart::Document { data, mime_type, name } => {
                text_parts.push(json!({
                    "type": "input_file",
                    "filename": name.clone().unwrap_or_else(|| "document".into()),
                    "file_data": format!("data:{mime_type};base64,{data}"),
                }));
            }
            ContentPart::ToolUse { id, name, input } => {
                items.push(json!({
                    "type": "function_call",
                    "call_id": id,
                    "name": name,
                    "arguments": input.to_string(),
                }));
            }
            ContentPart::ToolResult { call_id, success, output, error } => {
                let output_text = if *success {
                    output.clone().unwrap_or(Value::Null).to_string()
                } else {
                    json!({"error": error}).to_string()
                };
                items.push(json!({
                    "type": "function_call_output",
                    "call_id": call_id,
                    "output": output_text,
                }));
            }
        }
    }

    if !text_parts.is_empty() {
        // A single text part collapses to a plain string, the common case.
        let content = if text_parts.len() == 1
            && text_parts[0].get("type").and_then(|t| t.as_str()) == Some("input_text")
        {
            text_parts[0]["text"].clone()
        } else {
            Value::Array(text_parts)
        };
        items.insert(0, json!({"type": "message", "role": role, "content": content}));
    }
    items
}

fn parse_function_call_item(item: &Value) -> Result<ContentPart> {
    let id = item
        .get("call_id")
        .or_else(|| item.get("id"))
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    let name = item
        .get("name")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    let input = match item.get("arguments") {
        Some(Value::String(text)) if !text.is_empty() => serde_json::from_str(text)
            .map_err(|e| Error::validation(format!("function call arguments: {e}")))?,
        Some(Value::String(_)) | None => json!({}),
        Some(value) => value.clone(),
    };
    if id.is_empty() || name.is_empty() {
        return Err(Error::validation("function call item missing call_id or name"));
    }
    Ok(ContentPart::ToolUse { id, name, input })
}

fn derive_finish_reason(response: &Value, saw_function_call: bool) -> Option<String> {
    if let Some(reason) = response.get("finish_reason").and_then(|r| r.as_str()) {
        return Some(reason.to_string());
    }
    if saw_function_call {
        return Some("tool_calls".to_string());
    }
    match response.get("status").and_then(|s| s.as_str()) {
        Some("completed") => Some("stop".to_string()),
        Some("incomplete") => {
            match response
                .pointer("/incomplete_details/reason")
                .and_then(|r| r.as_str())
            {
                Some("max_output_tokens") => Some("length".to_string()),
                Some("content_filter") => Some("content_filter".to_string()),
                other => other.map(str::to_string),
            }
        }
        _ => None,
    }
}

fn parse_usage(usage: &Value) -> Usage {
    Usage {
        prompt_tokens: usage
            .get("input_tokens")
            .or_else(|| usage.get("prompt_tokens"))
            .and_then(|v| v.as_u64())
            .unwrap_or_default(),
        completion_tokens: usage
            .get("output_tokens")
            .or_else(|| usage.get("completion_tokens"))
            .and_then(|v| v.as_u64())
            .unwrap_or_default(),
        total_tokens: usage.get("total_tokens").and_then(|v| v.as_u64()),
    }
}

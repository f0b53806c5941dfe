//! Anthropic Messages plugin, API version `2023-06-01`.
//!
//! Wire contract: `POST {base_url}/messages` with `x-api-key` and
//! `anthropic-version` headers. System messages are lifted into the
//! top-level `system` field, tool results travel in user-role messages,
//! and `max_tokens` is mandatory (defaulted when the request omits it).
//!
//! Streaming is event-per-type: `message_start` carries the response id,
//! `content_block_delta` carries `text_delta` / `input_json_delta`
//! increments, `content_block_stop` closes a block (emitting the assembled
//! `tool_use` part), `message_delta` carries the `stop_reason` and final
//! usage, and `message_stop` terminates the stream.

use std::collections::HashMap;

use serde_json::{Value, json};

use crate::cancel::CancellationHandle;
use crate::config::ProviderConfig;
use crate::error::{CancelStage, Error, ErrorContext, Result};
use crate::providers::{
    ChatResponse, DeltaStream, ProviderPlugin, TerminationFrame, TerminationSignal,
    normalize_status, signal_from_finish_reason, synthesize_stream_id,
};
use crate::sse::parse_sse;
use crate::transport::retry::parse_retry_after;
use crate::transport::{ByteStream, HttpRequest, HttpResponse};
use crate::types::{
    ChatRequest, ContentPart, Message, ModelCapabilities, Role, StreamDelta, Usage,
};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const DEFAULT_API_VERSION: &str = "2023-06-01";
/// Anthropic requires `max_tokens`; used when the request leaves it unset.
const DEFAULT_MAX_TOKENS: u32 = 4096;

#[derive(Debug, Default)]
pub struct AnthropicPlugin;

impl AnthropicPlugin {
    pub fn new() -> Self {
        Self
    }

    fn context(&self, response: &HttpResponse) -> ErrorContext {
        ErrorContext::for_provider(self.id(), self.version())
            .with_response(response.status, &response.headers)
    }
}

impl ProviderPlugin for AnthropicPlugin {
    fn id(&self) -> &str {
        "anthropic"
    }

    fn version(&self) -> &str {
        "2023-06-01"
    }

    fn initialize(&self, config: &ProviderConfig) -> Result<()> {
        match &config.api_key {
            Some(key) if !key.trim().is_empty() => {}
            _ => return Err(Error::validation("anthropic config requires api_key")),
        }
        if let Some(url) = &config.base_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(Error::validation("anthropic base_url must be http(s)"));
            }
        }
        Ok(())
    }

    fn supports_model(&self, model_name: &str) -> bool {
        model_name.starts_with("claude")
    }

    fn translate_request(
        &self,
        request: &ChatRequest,
        config: &ProviderConfig,
        capabilities: Option<&ModelCapabilities>,
    ) -> Result<HttpRequest> {
        let (_, model_name) = request.split_model()?;
        let base_url = config.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL);

        // System messages are lifted out of the message list.
        let system = request
            .messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.text())
            .collect::<Vec<_>>()
            .join("\n\n");

        let messages: Vec<Value> = request
            .messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(to_anthropic_message)
            .collect::<Result<_>>()?;

        let mut body = json!({
            "model": model_name,
            "max_tokens": request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "messages": messages,
        });
        if !system.is_empty() {
            body["system"] = Value::String(system);
        }
        if request.stream {
            body["stream"] = Value::Bool(true);
        }
        let supports_temperature = capabilities.is_none_or(|c| c.temperature);
        if supports_temperature {
            if let Some(temperature) = request.temperature {
                body["temperature"] = json!(temperature);
            }
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
                                "name": t.name,
                                "description": t.description,
                                "input_schema": t.input_schema,
                            })
                        })
                        .collect(),
                );
            }
        }

        let mut http = HttpRequest::post(format!("{}/messages", base_url.trim_end_matches('/')))
            .header("x-api-key", config.api_key.as_deref().unwrap_or_default())
            .header(
                "anthropic-version",
                config.api_version.as_deref().unwrap_or(DEFAULT_API_VERSION),
            )
            .json(&body);
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
        for block in body.get("content").and_then(|c| c.as_array()).into_iter().flatten() {
            match block.get("type").and_then(|t| t.as_str()) {
                Some("text") => {
                    if let Some(text) = block.get("text").and_then(|t| t.as_str()) {
                        if !text.is_empty() {
                            parts.push(ContentPart::text(text));
                        }
                    }
                }
                Some("tool_use") => {
                    parts.push(ContentPart::ToolUse {
                        id: block
                            .get("id")
                            .and_then(|v| v.as_str())
                            .unwrap_or_default()
                            .to_string(),
                        name: block
                            .get("name")
                            .and_then(|v| v.as_str())
                            .unwrap_or_default()
                            .to_string(),
                        input: block.get("input").cloned().unwrap_or_else(|| json!({})),
                    });
                }
                _ => {}
            }
        }

        let finish_reason = body
            .get("stop_reason")
            .and_then(|r| r.as_str())
            .map(str::to_string);
        let usage = body.get("usage").map(parse_usage);

        let mut metadata = HashMap::new();
        if let Some(reason) = &finish_reason {
            metadata.insert("finishReason".to_string(), Value::from(reason.as_str()));
        }
        if let Some(sequence) = body.get("stop_sequence").filter(|s| !s.is_null()) {
            metadata.insert("stopSequence".to_string(), sequence.clone());
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
        #[derive(Default)]
        struct ToolBlock {
            id: String,
            name: String,
            partial_json: String,
        }

        struct State {
            events: std::pin::Pin<Box<dyn futures::Stream<Item = Result<crate::sse::SseEvent>> + Send>>,
            cancel: CancellationHandle,
            response_id: String,
            usage: Option<Usage>,
            stop_reason: Option<String>,
            tool_blocks: HashMap<u64, ToolBlock>,
            stopped: bool,
        }

        let state = State {
            events: parse_sse(bytes),
            cancel,
            response_id: synthesize_stream_id(),
            usage: None,
            stop_reason: None,
            tool_blocks: HashMap::new(),
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
                        state.stopped = true;
                        let delta = terminal_delta(
                            &state.response_id,
                            state.usage,
                            state.stop_reason.take(),
                        );
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
                    "message_start" => {
                        if let Some(id) = chunk.pointer("/message/id").and_then(|v| v.as_str()) {
                            state.response_id = id.to_string();
                        }
                        if let Some(usage) = chunk.pointer("/message/usage") {
                            state.usage = Some(parse_usage(usage));
                        }
                    }
                    "content_block_start" => {
                        let index = chunk.get("index").and_then(|i| i.as_u64()).unwrap_or(0);
                        let block = chunk.get("content_block").cloned().unwrap_or_default();
                        if block.get("type").and_then(|t| t.as_str()) == Some("tool_use") {
                            state.tool_blocks.insert(
                                index,
                                ToolBlock {
                                    id: block
                                        .get("id")
                                        .and_then(|v| v.as_str())
                                        .unwrap_or_default()
                                        .to_string(),
                                    name: block
                                        .get("name")
                                        .and_then(|v| v.as_str())
                                        .unwrap_or_default()
                                        .to_string(),
                                    partial_json: String::new(),
                                },
                            );
                        }
                    }
                    "content_block_delta" => {
                        let index = chunk.get("index").and_then(|i| i.as_u64()).unwrap_or(0);
                        let delta = chunk.get("delta").cloned().unwrap_or_default();
                        match delta.get("type").and_then(|t| t.as_str()) {
                            Some("text_delta") => {
                                if let Some(text) = delta.get("text").and_then(|t| t.as_str()) {
                                    if !text.is_empty() {
                                        let out = StreamDelta::content(
                                            state.response_id.clone(),
                                            vec![ContentPart::text(text)],
                                        )
                                        .with_metadata("eventType", Value::from(event_type.as_str()));
                                        return Some((Ok(out), state));
                                    }
                                }
                            }
                            Some("input_json_delta") => {
                                if let Some(fragment) =
                                    delta.get("partial_json").and_then(|p| p.as_str())
                                {
                                    state
                                        .tool_blocks
                                        .entry(index)
                                        .or_default()
                                        .partial_json
                                        .push_str(fragment);
                                }
                            }
                            _ => {}
                        }
                    }
                    "content_block_stop" => {
                        let index = chunk.get("index").and_then(|i| i.as_u64()).unwrap_or(0);
                        if let Some(block) = state.tool_blocks.remove(&index) {
                            let input: Value = if block.partial_json.is_empty() {
                                json!({})
                            } else {
                                match serde_json::from_str(&block.partial_json) {
                                    Ok(value) => value,
                                    Err(e) => {
                                        state.stopped = true;
                                        return Some((
                                            Err(Error::streaming(format!(
                                                "malformed tool input for {}: {e}",
                                                block.name
                                            ))),
                                            state,
                                        ));
                                    }
                                }
                            };
                            let out = StreamDelta::content(
                                state.response_id.clone(),
                                vec![ContentPart::ToolUse {
                                    id: block.id,
                                    name: block.name,
                                    input,
                                }],
                            )
                            .with_metadata("eventType", Value::from(event_type.as_str()));
                            return Some((Ok(out), state));
                        }
                    }
                    "message_delta" => {
                        if let Some(reason) =
                            chunk.pointer("/delta/stop_reason").and_then(|r| r.as_str())
                        {
                            state.stop_reason = Some(reason.to_string());
                        }
                        if let Some(usage) = chunk.get("usage") {
                            let mut merged = state.usage.unwrap_or_default();
                            if let Some(output) =
                                usage.get("output_tokens").and_then(|v| v.as_u64())
                            {
                                merged.completion_tokens = output;
                            }
                            if let Some(input) = usage.get("input_tokens").and_then(|v| v.as_u64())
                            {
                                merged.prompt_tokens = input;
                            }
                            state.usage = Some(merged);
                        }
                    }
                    "message_stop" => {
                        state.stopped = true;
                        let delta = terminal_delta(
                            &state.response_id,
                            state.usage,
                            state.stop_reason.take(),
                        );
                        return Some((Ok(delta), state));
                    }
                    // `ping` and future event types are skipped.
                    _ => {}
                }
            }
        }))
    }

    fn normalize_error(&self, response: &HttpResponse) -> Error {
        let mut context = self.context(response);
        let body = response.body_json().ok();
        let vendor_type = body
            .as_ref()
            .and_then(|b| b.pointer("/error/type"))
            .and_then(|t| t.as_str())
            .map(str::to_string);
        let message = body
            .as_ref()
            .and_then(|b| b.pointer("/error/message"))
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| format!("anthropic returned status {}", response.status));
        if let Some(code) = &vendor_type {
            context = context.with_vendor_code(code.clone());
        }

        // The envelope type is authoritative when present.
        if vendor_type.as_deref() == Some("authentication_error") {
            return Error::Auth {
                message: crate::error::redact_secrets(&message),
                context,
            };
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

fn terminal_delta(id: &str, usage: Option<Usage>, stop_reason: Option<String>) -> StreamDelta {
    let mut delta = StreamDelta::terminal(id, usage);
    if let Some(reason) = stop_reason {
        delta = delta.with_metadata("finishReason", Value::from(reason));
    }
    delta
}

/// Map one unified message to the Anthropic message shape. Tool results
/// travel in user-role messages.
fn to_anthropic_message(message: &Message) -> Result<Value> {
    let mut blocks = Vec::new();
    for part in &message.content {
        let block = match part {
            ContentPart::Text { text } => json!({"type": "text", "text": text}),
            ContentPart::Code { text, language, .. } => {
                let fenced = match language {
                    Some(lang) => format!("```{lang}\n{text}\n```"),
                    None => format!("```\n{text}\n```"),
                };
                json!({"type": "text", "text": fenced})
            }
            ContentPart::Image { data, mime_type, .. } => json!({
                "type": "image",
                "source": {"type": "base64", "media_type": mime_type, "data": data},
            }),
            ContentPart::Document { data, mime_type, .. } => json!({
                "type": "document",
                "source": {"type": "base64", "media_type": mime_type, "data": data},
            }),
            ContentPart::ToolUse { id, name, input } => json!({
                "type": "tool_use", "id": id, "name": name, "input": input,
            }),
            ContentPart::ToolResult { call_id, success, output, error } => {
                let content = if *success {
                    output.clone().unwrap_or(Value::Null).to_string()
                } else {
                    error
                        .as_ref()
                        .map(|e| format!("{}: {}", e.code, e.message))
                        .unwrap_or_else(|| "tool failed".to_string())
                };
                json!({
                    "type": "tool_result",
                    "tool_use_id": call_id,
                    "content": content,
                    "is_error": !success,
                })
            }
        };
        blocks.push(block);
    }

    let role = match message.role {
        Role::Assistant => "assistant",
        // Tool results are user-authored turns on this API.
        Role::User | Role::Tool => "user",
        Role::System => {
            return Err(Error::validation(
                "system messages must be lifted before translation",
            ));
        }
    };
    Ok(json!({"role": role, "content": blocks}))
}

fn parse_usage(usage: &Value) -> Usage {
    let prompt = usage
        .get("input_tokens")
        .and_then(|v| v.as_u64())
        .unwrap_or_default();
    let completion = usage
        .get("output_tokens")
        .and_then(|v| v.as_u64())
        .unwrap_or_default();
    Usage {
        prompt_tokens: prompt,
        completion_tokens: completion,
        total_tokens: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{Confidence, TerminationReason};
    use futures::StreamExt;
    use std::collections::BTreeMap;

    fn config() -> ProviderConfig {
        ProviderConfig::with_api_key("sk-ant-test")
    }

    fn response(status: u16, body: Value) -> HttpResponse {
        HttpResponse {
            status,
            status_text: String::new(),
            headers: BTreeMap::new(),
            body: body.to_string().into_bytes(),
        }
    }

    fn byte_stream(text: &str) -> ByteStream {
        let chunk: Result<Vec<u8>> = Ok(text.as_bytes().to_vec());
        Box::pin(futures::stream::iter(vec![chunk]))
    }

    #[test]
    fn test_supports_model() {
        let plugin = AnthropicPlugin::new();
        assert!(plugin.supports_model("claude-sonnet-4-20250514"));
        assert!(!plugin.supports_model("gpt-4o"));
    }

    #[test]
    fn test_translate_lifts_system_and_requires_max_tokens() {
        let plugin = AnthropicPlugin::new();
        let request = ChatRequest::builder("anthropic:claude-sonnet-4-20250514")
            .message(Message::system("Be terse."))
            .message(Message::user("Hello"))
            .build()
            .unwrap();
        let http = plugin.translate_request(&request, &config(), None).unwrap();
        assert_eq!(http.url, "https://api.anthropic.com/v1/messages");
        assert_eq!(http.headers["x-api-key"], "sk-ant-test");
        assert_eq!(http.headers["anthropic-version"], "2023-06-01");

        let body: Value = serde_json::from_str(http.body.unwrap().as_text().unwrap()).unwrap();
        assert_eq!(body["system"], "Be terse.");
        assert_eq!(body["max_tokens"], DEFAULT_MAX_TOKENS);
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["role"], "user");
    }

    #[test]
    fn test_tool_results_become_user_turns() {
        let plugin = AnthropicPlugin::new();
        let request = ChatRequest::builder("anthropic:claude-sonnet-4")
            .messages(vec![
                Message::user("weather?"),
                Message::assistant(vec![ContentPart::ToolUse {
                    id: "toolu_1".into(),
                    name: "get_weather".into(),
                    input: json!({"location": "SF"}),
                }]),
                Message::tool_results(vec![ContentPart::ToolResult {
                    call_id: "toolu_1".into(),
                    success: true,
                    output: Some(json!({"temp": 18})),
                    error: None,
                }]),
            ])
            .build()
            .unwrap();
        let http = plugin.translate_request(&request, &config(), None).unwrap();
        let body: Value = serde_json::from_str(http.body.unwrap().as_text().unwrap()).unwrap();
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages[2]["role"], "user");
        assert_eq!(messages[2]["content"][0]["type"], "tool_result");
        assert_eq!(messages[2]["content"][0]["tool_use_id"], "toolu_1");
    }

    #[test]
    fn test_parse_tool_use_completion() {
        // S3: tool use fixture.
        let plugin = AnthropicPlugin::new();
        let body = json!({
            "id": "msg_tool",
            "content": [
                {"type": "text", "text": "I'll check the weather."},
                {"type": "tool_use", "id": "toolu_9", "name": "get_weather",
                 "input": {"location": "San Francisco, CA"}}
            ],
            "stop_reason": "tool_use",
            "usage": {"input_tokens": 30, "output_tokens": 50}
        });
        let parsed = plugin.parse_response(&response(200, body)).unwrap();
        assert_eq!(parsed.finish_reason.as_deref(), Some("tool_use"));
        let uses = parsed.message.tool_uses();
        assert_eq!(uses.len(), 1);
        match uses[0] {
            ContentPart::ToolUse { name, input, .. } => {
                assert_eq!(name, "get_weather");
                assert_eq!(input["location"], "San Francisco, CA");
            }
            _ => unreachable!(),
        }

        let signal = plugin.detect_termination(TerminationFrame::Final(&parsed));
        assert_eq!(signal.reason, TerminationReason::ToolUseRequired);
        assert_eq!(signal.confidence, Confidence::High);
    }

    #[tokio::test]
    async fn test_stream_token_limit_sequence() {
        // S2: streaming that ends at max_tokens.
        let plugin = AnthropicPlugin::new();
        let sse = "\
event: message_start\n\
data: {\"type\":\"message_start\",\"message\":{\"id\":\"msg_1\",\"usage\":{\"input_tokens\":10,\"output_tokens\":1}}}\n\n\
event: content_block_delta\n\
data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"Once upon\"}}\n\n\
event: message_delta\n\
data: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"max_tokens\"},\"usage\":{\"output_tokens\":4096}}\n\n\
event: message_stop\n\
data: {\"type\":\"message_stop\"}\n\n";

        let deltas: Vec<StreamDelta> = plugin
            .parse_stream(byte_stream(sse), CancellationHandle::new())
            .map(|d| d.unwrap())
            .collect()
            .await;

        assert_eq!(deltas.len(), 2);
        assert_eq!(deltas[0].delta.text(), "Once upon");
        let terminal = &deltas[1];
        assert!(terminal.finished);
        assert_eq!(terminal.finish_reason(), Some("max_tokens"));
        assert_eq!(terminal.usage.unwrap().completion_tokens, 4096);
        assert_eq!(terminal.id, "msg_1");

        let signal = plugin.detect_termination(TerminationFrame::Delta(terminal));
        assert_eq!(signal.reason, TerminationReason::TokenLimitReached);
        assert_eq!(signal.confidence, Confidence::High);
    }

    #[tokio::test]
    async fn test_stream_tool_use_blocks_assembled() {
        let plugin = AnthropicPlugin::new();
        let sse = "\
data: {\"type\":\"message_start\",\"message\":{\"id\":\"msg_2\",\"usage\":{\"input_tokens\":5,\"output_tokens\":1}}}\n\n\
data: {\"type\":\"content_block_start\",\"index\":0,\"content_block\":{\"type\":\"tool_use\",\"id\":\"toolu_5\",\"name\":\"get_weather\"}}\n\n\
data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"input_json_delta\",\"partial_json\":\"{\\\"loc\"}}\n\n\
data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"input_json_delta\",\"partial_json\":\"ation\\\":\\\"SF\\\"}\"}}\n\n\
data: {\"type\":\"content_block_stop\",\"index\":0}\n\n\
data: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"tool_use\"},\"usage\":{\"output_tokens\":20}}\n\n\
data: {\"type\":\"message_stop\"}\n\n";

        let deltas: Vec<StreamDelta> = plugin
            .parse_stream(byte_stream(sse), CancellationHandle::new())
            .map(|d| d.unwrap())
            .collect()
            .await;

        assert_eq!(deltas.len(), 2);
        match &deltas[0].delta.content[0] {
            ContentPart::ToolUse { id, name, input } => {
                assert_eq!(id, "toolu_5");
                assert_eq!(name, "get_weather");
                assert_eq!(input["location"], "SF");
            }
            other => panic!("expected tool use, got {other:?}"),
        }
        assert_eq!(deltas[1].finish_reason(), Some("tool_use"));
    }

    #[tokio::test]
    async fn test_stream_malformed_tool_json_raises() {
        let plugin = AnthropicPlugin::new();
        let sse = "\
data: {\"type\":\"content_block_start\",\"index\":0,\"content_block\":{\"type\":\"tool_use\",\"id\":\"t\",\"name\":\"f\"}}\n\n\
data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"input_json_delta\",\"partial_json\":\"{oops\"}}\n\n\
data: {\"type\":\"content_block_stop\",\"index\":0}\n\n";
        let results: Vec<_> = plugin
            .parse_stream(byte_stream(sse), CancellationHandle::new())
            .collect()
            .await;
        assert!(matches!(
            results[0].as_ref().unwrap_err(),
            Error::Streaming(_)
        ));
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn test_normalize_error_vendor_envelope() {
        let plugin = AnthropicPlugin::new();
        // 403 with authentication_error envelope still maps to Auth.
        let err = plugin.normalize_error(&response(
            403,
            json!({"error": {"type": "authentication_error", "message": "bad x-api-key"}}),
        ));
        assert!(matches!(err, Error::Auth { .. }));

        let err = plugin.normalize_error(&response(
            529,
            json!({"error": {"type": "overloaded_error", "message": "overloaded"}}),
        ));
        assert!(matches!(err, Error::Provider { status: Some(529), .. }));
    }

    #[test]
    fn test_detect_termination_natural() {
        let plugin = AnthropicPlugin::new();
        let parsed = plugin
            .parse_response(&response(
                200,
                json!({
                    "id": "msg_3",
                    "content": [{"type": "text", "text": "done"}],
                    "stop_reason": "end_turn",
                    "usage": {"input_tokens": 1, "output_tokens": 1}
                }),
            ))
            .unwrap();
        let signal = plugin.detect_termination(TerminationFrame::Final(&parsed));
        assert_eq!(signal.reason, TerminationReason::NaturalCompletion);
        assert_eq!(signal.raw_value, "end_turn");
    }
}

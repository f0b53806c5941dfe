//! xAI v1 plugin.
//!
//! xAI exposes an OpenAI-compatible chat-completions surface at
//! `POST {base_url}/chat/completions` with bearer auth. Unlike the
//! Responses API, tool calls stream as indexed `tool_calls` deltas whose
//! JSON argument strings arrive in fragments; the parser accumulates them
//! per index and emits assembled `ToolUse` parts when a `finish_reason`
//! arrives.

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

const DEFAULT_BASE_URL: &str = "https://api.x.ai/v1";

#[derive(Debug, Default)]
pub struct XaiPlugin;

impl XaiPlugin {
    pub fn new() -> Self {
        Self
    }

    fn context(&self, response: &HttpResponse) -> ErrorContext {
        ErrorContext::for_provider(self.id(), self.version())
            .with_response(response.status, &response.headers)
    }
}

impl ProviderPlugin for XaiPlugin {
    fn id(&self) -> &str {
        "xai"
    }

    fn version(&self) -> &str {
        "v1"
    }

    fn initialize(&self, config: &ProviderConfig) -> Result<()> {
        match &config.api_key {
            Some(key) if !key.trim().is_empty() => {}
            _ => return Err(Error::validation("xai config requires api_key")),
        }
        if let Some(url) = &config.base_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(Error::validation("xai base_url must be http(s)"));
            }
        }
        Ok(())
    }

    fn supports_model(&self, model_name: &str) -> bool {
        model_name.starts_with("grok")
    }

    fn translate_request(
        &self,
        request: &ChatRequest,
        config: &ProviderConfig,
        capabilities: Option<&ModelCapabilities>,
    ) -> Result<HttpRequest> {
        let (_, model_name) = request.split_model()?;
        let base_url = config.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL);

        let messages: Vec<Value> = request.messages.iter().flat_map(to_chat_messages).collect();

        let mut body = json!({
            "model": model_name,
            "messages": messages,
            "stream": request.stream,
        });
        if request.stream {
            body["stream_options"] = json!({"include_usage": true});
        }
        let supports_temperature = capabilities.is_none_or(|c| c.temperature);
        if supports_temperature {
            if let Some(temperature) = request.temperature {
                body["temperature"] = json!(temperature);
            }
        }
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        if let Some(top_p) = request.top_p {
            body["top_p"] = json!(top_p);
        }
        if let Some(penalty) = request.frequency_penalty {
            body["frequency_penalty"] = json!(penalty);
        }
        if let Some(penalty) = request.presence_penalty {
            body["presence_penalty"] = json!(penalty);
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

        let mut http = HttpRequest::post(format!(
            "{}/chat/completions",
            base_url.trim_end_matches('/')
        ))
        .header(
            "authorization",
            format!("Bearer {}", config.api_key.as_deref().unwrap_or_default()),
        )
        .json(&body);
        for (name, value) in &config.headers {
            http = http.header(name, value);
        }
        Ok(http)
    }

    fn parse_response(&self, response: &HttpResponse) -> Result<ChatResponse> {
        let body = response.body_json()?;
        let choice = body.pointer("/choices/0").cloned().unwrap_or_default();
        let message = choice.get("message").cloned().unwrap_or_default();

        let mut parts = Vec::new();
        if let Some(text) = message.get("content").and_then(|c| c.as_str()) {
            if !text.is_empty() {
                parts.push(ContentPart::text(text));
            }
        }
        for call in message
            .get("tool_calls")
            .and_then(|t| t.as_array())
            .into_iter()
            .flatten()
        {
            let arguments = call
                .pointer("/function/arguments")
                .and_then(|a| a.as_str())
                .unwrap_or("{}");
            let input: Value = serde_json::from_str(arguments)
                .map_err(|e| Error::validation(format!("tool call arguments: {e}")))?;
            parts.push(ContentPart::ToolUse {
                id: call
                    .get("id")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
                name: call
                    .pointer("/function/name")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
                input,
            });
        }

        let finish_reason = choice
            .get("finish_reason")
            .and_then(|r| r.as_str())
            .map(str::to_string);
        let usage = body.get("usage").map(parse_usage);

        let mut metadata = HashMap::new();
        if let Some(reason) = &finish_reason {
            metadata.insert("finishReason".to_string(), Value::from(reason.as_str()));
        }

        Ok(ChatResponse {
            id: body
                .get("id")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            message: Message::assistant(parts),
            usage,
            finish_reason,
            metadata,
        })
    }

    fn parse_stream(&self, bytes: ByteStream, cancel: CancellationHandle) -> DeltaStream {
        #[derive(Default)]
        struct PartialCall {
            id: String,
            name: String,
            arguments: String,
        }

        struct State {
            events: std::pin::Pin<Box<dyn futures::Stream<Item = Result<crate::sse::SseEvent>> + Send>>,
            cancel: CancellationHandle,
            response_id: String,
            usage: Option<Usage>,
            finish_reason: Option<String>,
            calls: HashMap<u64, PartialCall>,
            pending: Option<StreamDelta>,
            stopped: bool,
        }

        impl State {
            /// Assemble accumulated tool-call fragments into parts.
            fn flush_calls(&mut self) -> Result<Vec<ContentPart>> {
                let mut indices: Vec<u64> = self.calls.keys().copied().collect();
                indices.sort_unstable();
                let mut parts = Vec::new();
                for index in indices {
                    let Some(call) = self.calls.remove(&index) else {
                        continue;
                    };
                    if call.id.is_empty() || call.name.is_empty() {
                        continue;
                    }
                    let input: Value = if call.arguments.is_empty() {
                        json!({})
                    } else {
                        serde_json::from_str(&call.arguments).map_err(|e| {
                            Error::streaming(format!(
                                "malformed tool arguments for {}: {e}",
                                call.name
                            ))
                        })?
                    };
                    parts.push(ContentPart::ToolUse {
                        id: call.id,
                        name: call.name,
                        input,
                    });
                }
                Ok(parts)
            }
        }

        let state = State {
            events: parse_sse(bytes),
            cancel,
            response_id: synthesize_stream_id(),
            usage: None,
            finish_reason: None,
            calls: HashMap::new(),
            pending: None,
            stopped: false,
        };

        Box::pin(futures::stream::unfold(state, |mut state| async move {
            use futures::StreamExt;
            loop {
                if state.stopped {
                    return None;
                }
                if let Some(delta) = state.pending.take() {
                    return Some((Ok(delta), state));
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
                        let mut delta =
                            StreamDelta::terminal(state.response_id.clone(), state.usage);
                        if let Some(reason) = state.finish_reason.take() {
                            delta = delta.with_metadata("finishReason", Value::from(reason));
                        }
                        return Some((Ok(delta), state));
                    }
                };
                if event.data.is_empty() {
                    continue;
                }
                if event.is_done() {
                    state.stopped = true;
                    let mut delta = StreamDelta::terminal(state.response_id.clone(), state.usage);
                    if let Some(reason) = state.finish_reason.take() {
                        delta = delta.with_metadata("finishReason", Value::from(reason));
                    }
                    return Some((Ok(delta), state));
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

                if let Some(id) = chunk.get("id").and_then(|v| v.as_str()) {
                    state.response_id = id.to_string();
                }
                if let Some(usage) = chunk.get("usage").filter(|u| !u.is_null()) {
                    state.usage = Some(parse_usage(usage));
                }

                let choice = chunk.pointer("/choices/0").cloned().unwrap_or_default();
                let delta = choice.get("delta").cloned().unwrap_or_default();

                for call in delta
                    .get("tool_calls")
                    .and_then(|t| t.as_array())
                    .into_iter()
                    .flatten()
                {
                    let index = call.get("index").and_then(|i| i.as_u64()).unwrap_or(0);
                    let entry = state.calls.entry(index).or_default();
                    if let Some(id) = call.get("id").and_then(|v| v.as_str()) {
                        entry.id = id.to_string();
                    }
                    if let Some(name) = call.pointer("/function/name").and_then(|v| v.as_str()) {
                        entry.name = name.to_string();
                    }
                    if let Some(args) = call
                        .pointer("/function/arguments")
                        .and_then(|v| v.as_str())
                    {
                        entry.arguments.push_str(args);
                    }
                }

                let mut out: Option<StreamDelta> = None;
                if let Some(text) = delta.get("content").and_then(|c| c.as_str()) {
                    if !text.is_empty() {
                        out = Some(StreamDelta::content(
                            state.response_id.clone(),
                            vec![ContentPart::text(text)],
                        ));
                    }
                }

                if let Some(reason) = choice.get("finish_reason").and_then(|r| r.as_str()) {
                    state.finish_reason = Some(reason.to_string());
                    match state.flush_calls() {
                        Ok(parts) if !parts.is_empty() => {
                            let calls_delta =
                                StreamDelta::content(state.response_id.clone(), parts);
                            match out.take() {
                                Some(text_delta) => {
                                    state.pending = Some(calls_delta);
                                    return Some((Ok(text_delta), state));
                                }
                                None => return Some((Ok(calls_delta), state)),
                            }
                        }
                        Ok(_) => {}
                        Err(e) => {
                            state.stopped = true;
                            return Some((Err(e), state));
                        }
                    }
                }

                if let Some(delta) = out {
                    return Some((Ok(delta), state));
                }
            }
        }))
    }

    fn normalize_error(&self, response: &HttpResponse) -> Error {
        let mut context = self.context(response);
        let body = response.body_json().ok();
        let message = body
            .as_ref()
            .and_then(|b| {
                b.pointer("/error/message")
                    .or_else(|| b.get("error"))
                    .and_then(|m| m.as_str())
            })
            .map(str::to_string)
            .unwrap_or_else(|| format!("xai returned status {}", response.status));
        if let Some(code) = body
            .as_ref()
            .and_then(|b| b.pointer("/error/code"))
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

/// Map one unified message onto chat-completions messages. Tool results
/// become `tool`-role messages keyed by `tool_call_id`.
fn to_chat_messages(message: &Message) -> Vec<Value> {
    let role = match message.role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    };

    let mut text = String::new();
    let mut tool_calls = Vec::new();
    let mut results = Vec::new();

    for part in &message.content {
        match part {
            ContentPart::Text { text: t } => text.push_str(t),
            ContentPart::Code { text: t, language, .. } => {
                let fenced = match language {
                    Some(lang) => format!("```{lang}\n{t}\n```"),
                    None => format!("```\n{t}\n```"),
                };
                text.push_str(&fenced);
            }
            ContentPart::Image { mime_type, alt, .. } => {
                // Grok models are text-only here; surface an annotated
                // reference instead of silently dropping the part.
                text.push_str(&format!(
                    "[image:{} {}]",
                    mime_type,
                    alt.as_deref().unwrap_or("")
                ));
            }
            ContentPart::Document { name, .. } => {
                text.push_str(&format!(
                    "[document:{}]",
                    name.as_deref().unwrap_or("attachment")
                ));
            }
            ContentPart::ToolUse { id, name, input } => {
                tool_calls.push(json!({
                    "id": id,
                    "type": "function",
                    "function": {"name": name, "arguments": input.to_string()},
                }));
            }
            ContentPart::ToolResult { call_id, success, output, error } => {
                let content = if *success {
                    output.clone().unwrap_or(Value::Null).to_string()
                } else {
                    json!({"error": error}).to_string()
                };
                results.push(json!({
                    "role": "tool",
                    "tool_call_id": call_id,
                    "content": content,
                }));
            }
        }
    }

    let mut messages = Vec::new();
    if !text.is_empty() || !tool_calls.is_empty() {
        let mut msg = json!({"role": role, "content": text});
        if !tool_calls.is_empty() {
            msg["tool_calls"] = Value::Array(tool_calls);
        }
        messages.push(msg);
    }
    messages.extend(results);
    messages
}

fn parse_usage(usage: &Value) -> Usage {
    Usage {
        prompt_tokens: usage
            .get("prompt_tokens")
            .and_then(|v| v.as_u64())
            .unwrap_or_default(),
        completion_tokens: usage
            .get("completion_tokens")
            .and_then(|v| v.as_u64())
            .unwrap_or_default(),
        total_tokens: usage.get("total_tokens").and_then(|v| v.as_u64()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::TerminationReason;
    use futures::StreamExt;
    use std::collections::BTreeMap;

    fn config() -> ProviderConfig {
        ProviderConfig::with_api_key("xai-test")
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
    fn test_translate_request() {
        let plugin = XaiPlugin::new();
        let request = ChatRequest::builder("xai:grok-3")
            .message(Message::system("be helpful"))
            .message(Message::user("hi"))
            .stream(true)
            .build()
            .unwrap();
        let http = plugin.translate_request(&request, &config(), None).unwrap();
        assert_eq!(http.url, "https://api.x.ai/v1/chat/completions");
        let body: Value = serde_json::from_str(http.body.unwrap().as_text().unwrap()).unwrap();
        assert_eq!(body["model"], "grok-3");
        assert_eq!(body["stream"], true);
        assert_eq!(body["stream_options"]["include_usage"], true);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["role"], "user");
    }

    #[test]
    fn test_parse_response_with_tool_calls() {
        let plugin = XaiPlugin::new();
        let body = json!({
            "id": "cmpl-1",
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": "Let me look that up.",
                    "tool_calls": [{
                        "id": "call_7",
                        "type": "function",
                        "function": {"name": "search", "arguments": "{\"q\":\"rust\"}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {"prompt_tokens": 9, "completion_tokens": 14, "total_tokens": 23}
        });
        let parsed = plugin.parse_response(&response(200, body)).unwrap();
        assert_eq!(parsed.message.tool_uses().len(), 1);
        assert_eq!(parsed.finish_reason.as_deref(), Some("tool_calls"));
        let signal = plugin.detect_termination(TerminationFrame::Final(&parsed));
        assert_eq!(signal.reason, TerminationReason::ToolUseRequired);
    }

    #[tokio::test]
    async fn test_stream_text_then_done() {
        let plugin = XaiPlugin::new();
        let sse = "\
data: {\"id\":\"cmpl-2\",\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n\n\
data: {\"id\":\"cmpl-2\",\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}],\"usage\":{\"prompt_tokens\":1,\"completion_tokens\":1}}\n\n\
data: [DONE]\n\n";
        let deltas: Vec<StreamDelta> = plugin
            .parse_stream(byte_stream(sse), CancellationHandle::new())
            .map(|d| d.unwrap())
            .collect()
            .await;
        assert_eq!(deltas.len(), 2);
        assert_eq!(deltas[0].delta.text(), "Hi");
        assert!(deltas[1].finished);
        assert_eq!(deltas[1].finish_reason(), Some("stop"));
        assert_eq!(deltas[1].id, "cmpl-2");
    }

    #[tokio::test]
    async fn test_stream_tool_call_fragments_assembled() {
        let plugin = XaiPlugin::new();
        let sse = "\
data: {\"id\":\"cmpl-3\",\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"id\":\"call_1\",\"function\":{\"name\":\"search\",\"arguments\":\"{\\\"q\"}}]}}]}\n\n\
data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"function\":{\"arguments\":\"\\\":\\\"rust\\\"}\"}}]}}]}\n\n\
data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"tool_calls\"}]}\n\n\
data: [DONE]\n\n";
        let deltas: Vec<StreamDelta> = plugin
            .parse_stream(byte_stream(sse), CancellationHandle::new())
            .map(|d| d.unwrap())
            .collect()
            .await;
        assert_eq!(deltas.len(), 2);
        match &deltas[0].delta.content[0] {
            ContentPart::ToolUse { id, name, input } => {
                assert_eq!(id, "call_1");
                assert_eq!(name, "search");
                assert_eq!(input["q"], "rust");
            }
            other => panic!("expected tool use, got {other:?}"),
        }
        assert!(deltas[1].finished);
        assert_eq!(deltas[1].finish_reason(), Some("tool_calls"));
    }

    #[test]
    fn test_normalize_error() {
        let plugin = XaiPlugin::new();
        let err = plugin.normalize_error(&response(
            401,
            json!({"error": {"message": "invalid key", "code": "unauthorized"}}),
        ));
        assert!(matches!(err, Error::Auth { .. }));
    }
}

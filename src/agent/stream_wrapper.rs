//! Inline tool execution for streamed responses.
//!
//! [`wrap_with_tools`] is a pure transform over a delta stream. Content
//! deltas pass through untouched while the wrapper remembers any `ToolUse`
//! parts it sees. When the terminal delta arrives and tool calls are
//! pending, the wrapper holds the terminal back, executes the tools, emits
//! one synthesized delta surfacing the results (in original call order),
//! and only then releases the terminal — so the invariant that exactly one
//! delta has `finished = true`, and that it is the last, still holds. The
//! underlying stream is never drained past its terminal delta.

use std::sync::Arc;

use serde_json::Value;

use crate::cancel::CancellationHandle;
use crate::error::{CancelStage, Error};
use crate::providers::{DeltaStream, ExtractedToolCall};
use crate::tools::ToolRouter;
use crate::types::{ContentPart, StreamDelta};

/// Wrap a delta stream with inline tool execution.
pub fn wrap_with_tools(
    inner: DeltaStream,
    router: Arc<ToolRouter>,
    provider_id: String,
    cancel: CancellationHandle,
) -> DeltaStream {
    enum Phase {
        /// Forwarding deltas from the vendor stream.
        Streaming,
        /// Tool results emitted; terminal delta queued.
        Draining(Vec<StreamDelta>),
        Done,
    }

    struct State {
        inner: DeltaStream,
        router: Arc<ToolRouter>,
        provider_id: String,
        cancel: CancellationHandle,
        pending_calls: Vec<ExtractedToolCall>,
        phase: Phase,
    }

    let state = State {
        inner,
        router,
        provider_id,
        cancel,
        pending_calls: Vec::new(),
        phase: Phase::Streaming,
    };

    Box::pin(futures::stream::unfold(state, |mut state| async move {
        use futures::StreamExt;
        loop {
            match std::mem::replace(&mut state.phase, Phase::Done) {
                Phase::Done => return None,
                Phase::Draining(mut queue) => {
                    if queue.is_empty() {
                        return None;
                    }
                    let delta = queue.remove(0);
                    if !queue.is_empty() {
                        state.phase = Phase::Draining(queue);
                    }
                    return Some((Ok(delta), state));
                }
                Phase::Streaming => {
                    state.phase = Phase::Streaming;
                    if state.cancel.is_cancelled() {
                        state.phase = Phase::Done;
                        return Some((Err(Error::cancelled(CancelStage::Streaming)), state));
                    }
                    let delta = match state.inner.next().await {
                        Some(Ok(delta)) => delta,
                        Some(Err(e)) => {
                            state.phase = Phase::Done;
                            return Some((Err(e), state));
                        }
                        None => {
                            state.phase = Phase::Done;
                            return None;
                        }
                    };

                    if !delta.finished {
                        // Remember tool calls as they stream past.
                        for part in &delta.delta.content {
                            if let ContentPart::ToolUse { id, name, input } = part {
                                state.pending_calls.push(ExtractedToolCall {
                                    id: id.clone(),
                                    name: name.clone(),
                                    parameters: input.clone(),
                                    metadata: std::collections::HashMap::from([(
                                        "providerId".to_string(),
                                        Value::from(state.provider_id.as_str()),
                                    )]),
                                });
                            }
                        }
                        return Some((Ok(delta), state));
                    }

                    // Terminal delta. Without pending calls it passes through.
                    if state.pending_calls.is_empty() {
                        state.phase = Phase::Done;
                        return Some((Ok(delta), state));
                    }

                    let calls = std::mem::take(&mut state.pending_calls);
                    let results = state.router.execute_all(&calls, &state.cancel).await;
                    if state.cancel.is_cancelled() {
                        state.phase = Phase::Done;
                        return Some((Err(Error::cancelled(CancelStage::ToolExecution)), state));
                    }

                    let parts: Vec<ContentPart> = results
                        .into_iter()
                        .map(|result| result.into_content_part())
                        .collect();
                    let results_delta = StreamDelta::content(delta.id.clone(), parts)
                        .with_metadata("eventType", Value::from("tool_results"));

                    state.phase = Phase::Draining(vec![delta]);
                    return Some((Ok(results_delta), state));
                }
            }
        }
    }))
}

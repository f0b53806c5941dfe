//! Multi-turn agent loop.
//!
//! Drives a conversation until it terminates: send the conversation, inspect
//! the assistant's reply, dispatch any tool calls, append the results, and
//! go again. Budgets are enforced by [`IterationManager`]: iteration count,
//! whole-conversation wall clock, per-iteration wall clock, and the call's
//! cancellation handle. Tool calls from one assistant message execute
//! concurrently (bounded by the router) but their results are appended in
//! original call order.
//!
//! The loop is generic over the "run one model round" operation so it holds
//! no reference back to the client; the client façade passes a closure that
//! performs routing, translation, transport, and parsing.

pub mod iteration;
pub mod stream_wrapper;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::cancel::CancellationHandle;
use crate::error::{CancelStage, Error, Result};
use crate::providers::{ChatResponse, TerminationReason, TerminationSignal, extract_tool_calls};
use crate::tools::ToolRouter;
use crate::types::{Message, MultiTurnOptions};

pub use iteration::{IterationManager, IterationMetrics, IterationOutcome, LoopTermination};

/// Final state of a completed agent loop.
#[derive(Debug, Clone)]
pub struct AgentOutcome {
    /// The last assistant message.
    pub message: Message,
    /// The full conversation, including tool-result messages.
    pub conversation: Vec<Message>,
    pub metrics: IterationMetrics,
    pub termination: LoopTermination,
}

/// The agent loop driver. One instance serves one conversation.
pub struct AgentLoop {
    router: Arc<ToolRouter>,
    options: MultiTurnOptions,
    cancel: CancellationHandle,
    provider_id: String,
}

impl AgentLoop {
    pub fn new(
        router: Arc<ToolRouter>,
        options: MultiTurnOptions,
        cancel: CancellationHandle,
        provider_id: impl Into<String>,
    ) -> Self {
        Self {
            router,
            options,
            cancel,
            provider_id: provider_id.into(),
        }
    }

    /// Run the conversation to termination. `turn` performs one model
    /// round-trip over the current conversation.
    pub async fn run<F, Fut>(&self, initial: Vec<Message>, mut turn: F) -> Result<AgentOutcome>
    where
        F: FnMut(Vec<Message>) -> Fut,
        Fut: Future<Output = Result<(ChatResponse, TerminationSignal)>>,
    {
        let mut manager = IterationManager::new(
            self.options.max_iterations,
            Duration::from_millis(self.options.timeout_ms),
            self.cancel.clone(),
        );
        let iteration_timeout = Duration::from_millis(self.options.iteration_timeout_ms);
        let mut conversation = initial;

        loop {
            let iteration = manager.start_iteration()?;
            log::debug!("agent iteration {iteration} starting");

            let round = tokio::select! {
                result = tokio::time::timeout(iteration_timeout, turn(conversation.clone())) => result,
                _ = self.cancel.cancelled() => {
                    manager.terminate(LoopTermination::Cancelled);
                    return Err(Error::cancelled(CancelStage::Execution));
                }
            };
            let (response, signal) = match round {
                Ok(Ok(pair)) => pair,
                Ok(Err(e)) => {
                    manager.terminate(LoopTermination::NaturalCompletion);
                    return Err(e);
                }
                Err(_) => {
                    manager.terminate(LoopTermination::Timeout);
                    return Err(Error::timeout(format!(
                        "iteration {iteration} exceeded {}ms",
                        self.options.iteration_timeout_ms
                    )));
                }
            };

            let mut assistant = response.message.clone();
            if let Some(reason) = &response.finish_reason {
                assistant = assistant
                    .with_metadata("finishReason", serde_json::Value::from(reason.as_str()));
            }
            conversation.push(assistant.clone());

            let outcome = manager.complete_iteration()?;

            // Inspecting: does the assistant want tools?
            let tool_calls = if signal.reason == TerminationReason::ToolUseRequired {
                extract_tool_calls(&assistant, &self.provider_id)
            } else {
                Vec::new()
            };

            if tool_calls.is_empty() {
                if signal.reason == TerminationReason::ToolUseRequired {
                    log::warn!(
                        "iteration {iteration} signalled tool use but no calls were extractable"
                    );
                }
                let termination = LoopTermination::NaturalCompletion;
                manager.terminate(termination);
                return Ok(AgentOutcome {
                    message: assistant,
                    conversation,
                    metrics: manager.metrics(),
                    termination,
                });
            }

            if !outcome.can_continue {
                let termination = outcome
                    .termination_reason
                    .unwrap_or(LoopTermination::MaxIterations);
                log::debug!(
                    "agent loop stopping before tool dispatch: {termination} after iteration {iteration}"
                );
                return Ok(AgentOutcome {
                    message: assistant,
                    conversation,
                    metrics: manager.metrics(),
                    termination,
                });
            }

            // ToolDispatch: run all calls, append results in call order.
            let results = self.router.execute_all(&tool_calls, &self.cancel).await;
            if self.cancel.is_cancelled() {
                manager.terminate(LoopTermination::Cancelled);
                return Err(Error::cancelled(CancelStage::ToolExecution));
            }
            let parts = results
                .into_iter()
                .map(|result| result.into_content_part())
                .collect();
            conversation.push(Message::tool_results(parts));
        }
    }
}

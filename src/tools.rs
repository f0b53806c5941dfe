//! Tool registry and execution router.
//!
//! Tools are named handlers with a structural JSON-schema input. The model
//! requests an invocation, the router validates the parameters against the
//! registered schema, runs the handler under the configured timeout and
//! concurrency cap, and returns a structured result — success or failure,
//! never a panic or a raised error. Handler failures are opaque
//! `anyhow::Error`s so application tools can use whatever error types they
//! like.
//!
//! Concurrency: the router holds a fair semaphore sized by
//! `max_concurrent_tools`; excess calls queue FIFO. When the agent loop
//! fans out a batch of calls they run concurrently but their results are
//! returned in original call order.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde_json::{Value, json};
use tokio::sync::Semaphore;

use crate::cancel::CancellationHandle;
use crate::config::ToolsConfig;
use crate::error::{Error, Result};
use crate::providers::ExtractedToolCall;
use crate::types::{ContentPart, ToolDefinition, ToolResultError, validate_against_schema};

/// Context handed to every tool handler.
#[derive(Debug, Clone)]
pub struct ToolExecutionContext {
    /// The id of the tool call being served.
    pub call_id: String,
    /// Cancellation handle for the enclosing call; long-running handlers
    /// should observe it.
    pub cancel: CancellationHandle,
    /// Call metadata (provider id, timestamp) from extraction.
    pub metadata: HashMap<String, Value>,
}

/// Async tool handler: structured parameters in, structured value out.
pub type ToolHandler = Arc<
    dyn Fn(
            Value,
            ToolExecutionContext,
        ) -> Pin<Box<dyn Future<Output = anyhow::Result<Value>> + Send>>
        + Send
        + Sync,
>;

struct RegisteredTool {
    definition: ToolDefinition,
    handler: ToolHandler,
}

/// Holds tool definitions and handlers. Mutated only via
/// [`ToolRegistry::register`]; execution is read-only.
#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, RegisteredTool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. The definition is validated and duplicate names are
    /// rejected.
    pub fn register<F, Fut>(&self, definition: ToolDefinition, handler: F) -> Result<()>
    where
        F: Fn(Value, ToolExecutionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        definition.validate()?;
        let mut tools = self.tools.write().expect("tool registry lock");
        if tools.contains_key(&definition.name) {
            return Err(Error::validation(format!(
                "tool {:?} is already registered",
                definition.name
            )));
        }
        tools.insert(
            definition.name.clone(),
            RegisteredTool {
                definition,
                handler: Arc::new(move |params, ctx| Box::pin(handler(params, ctx))),
            },
        );
        Ok(())
    }

    pub fn has(&self, name: &str) -> bool {
        self.tools
            .read()
            .expect("tool registry lock")
            .contains_key(name)
    }

    /// Definitions of every registered tool, sorted by name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let tools = self.tools.read().expect("tool registry lock");
        let mut definitions: Vec<ToolDefinition> =
            tools.values().map(|t| t.definition.clone()).collect();
        definitions.sort_by(|a, b| a.name.cmp(&b.name));
        definitions
    }

    fn lookup(&self, name: &str) -> Option<(ToolDefinition, ToolHandler)> {
        self.tools
            .read()
            .expect("tool registry lock")
            .get(name)
            .map(|t| (t.definition.clone(), Arc::clone(&t.handler)))
    }

    /// Activate bundled tools by name.
    pub fn register_builtins(&self, names: &[String]) -> Result<()> {
        for name in names {
            match name.as_str() {
                "echo" => {
                    self.register(
                        ToolDefinition::new(
                            "echo",
                            json!({
                                "type": "object",
                                "properties": {"text": {"type": "string"}},
                                "required": ["text"]
                            }),
                        )
                        .with_description("Return the input text unchanged."),
                        |params, _ctx| async move { Ok(json!({"text": params["text"]})) },
                    )?;
                }
                other => {
                    return Err(Error::validation(format!("unknown builtin tool {other:?}")));
                }
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tools = self.tools.read().expect("tool registry lock");
        f.debug_struct("ToolRegistry")
            .field("tools", &tools.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Outcome of one tool execution. Failures are values, not errors.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolExecutionResult {
    pub call_id: String,
    pub success: bool,
    pub output: Option<Value>,
    pub error: Option<ToolResultError>,
}

impl ToolExecutionResult {
    fn ok(call_id: &str, output: Value) -> Self {
        Self {
            call_id: call_id.to_string(),
            success: true,
            output: Some(output),
            error: None,
        }
    }

    fn fail(call_id: &str, code: &str, message: impl Into<String>) -> Self {
        Self {
            call_id: call_id.to_string(),
            success: false,
            output: None,
            error: Some(ToolResultError {
                code: code.to_string(),
                message: message.into(),
            }),
        }
    }

    /// Convert into the content part appended to the conversation.
    pub fn into_content_part(self) -> ContentPart {
        ContentPart::ToolResult {
            call_id: self.call_id,
            success: self.success,
            output: self.output,
            error: self.error,
        }
    }
}

/// Executes tool calls under timeout and concurrency budgets.
pub struct ToolRouter {
    registry: Arc<ToolRegistry>,
    semaphore: Arc<Semaphore>,
    execution_timeout: Duration,
}

impl ToolRouter {
    pub fn new(registry: Arc<ToolRegistry>, config: &ToolsConfig) -> Self {
        Self {
            registry,
            semaphore: Arc::new(Semaphore::new(config.max_concurrent_tools)),
            execution_timeout: Duration::from_millis(config.execution_timeout_ms),
        }
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Execute a single tool call. Never raises; every failure mode is
    /// encoded in the result.
    pub async fn execute(
        &self,
        call: &ExtractedToolCall,
        ctx: ToolExecutionContext,
    ) -> ToolExecutionResult {
        let Some((definition, handler)) = self.registry.lookup(&call.name) else {
            return ToolExecutionResult::fail(
                &call.id,
                "TOOL_NOT_FOUND",
                format!("no tool registered under {:?}", call.name),
            );
        };

        if let Err(e) = validate_against_schema(&call.parameters, &definition.input_schema) {
            return ToolExecutionResult::fail(&call.id, "VALIDATION_ERROR", e.to_string());
        }

        // Fair semaphore: waiters are served FIFO.
        let permit = match Arc::clone(&self.semaphore).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                return ToolExecutionResult::fail(
                    &call.id,
                    "EXECUTION_FAILED",
                    "tool router is shut down",
                );
            }
        };

        let cancel = ctx.cancel.clone();
        let run = handler(call.parameters.clone(), ctx);
        let outcome = tokio::select! {
            result = tokio::time::timeout(self.execution_timeout, run) => match result {
                Ok(Ok(output)) => ToolExecutionResult::ok(&call.id, output),
                Ok(Err(e)) => ToolExecutionResult::fail(&call.id, "EXECUTION_FAILED", e.to_string()),
                Err(_) => ToolExecutionResult::fail(
                    &call.id,
                    "TIMEOUT",
                    format!(
                        "tool {:?} exceeded {}ms",
                        call.name,
                        self.execution_timeout.as_millis()
                    ),
                ),
            },
            _ = cancel.cancelled() => {
                ToolExecutionResult::fail(&call.id, "CANCELLED", "call was cancelled")
            }
        };
        drop(permit);
        outcome
    }

    /// Execute a batch concurrently (bounded by the semaphore) and return
    /// results in original call order.
    pub async fn execute_all(
        &self,
        calls: &[ExtractedToolCall],
        cancel: &CancellationHandle,
    ) -> Vec<ToolExecutionResult> {
        let futures = calls.iter().map(|call| {
            let ctx = ToolExecutionContext {
                call_id: call.id.clone(),
                cancel: cancel.clone(),
                metadata: call.metadata.clone(),
            };
            self.execute(call, ctx)
        });
        futures::future::join_all(futures).await
    }
}

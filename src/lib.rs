//! # llm-bridge
//!
//! A provider-agnostic Rust client for LLM chat APIs. One request shape, one
//! delta shape, one error taxonomy — across OpenAI (Responses v1), Anthropic
//! (Messages 2023-06-01), Google Gemini (v1), and xAI (v1).
//!
//! ## Key features
//!
//! - **Unified chat**: a single [`ChatRequest`] / [`Message`] model with
//!   typed content parts (text, images, documents, code, tool calls,
//!   tool results)
//! - **Streaming**: vendor SSE streams normalized into one [`StreamDelta`]
//!   sequence with a single, final terminal delta
//! - **Tool calling**: a registry + router with schema validation, timeouts,
//!   bounded concurrency, and ordered results
//! - **Agent loop**: multi-turn driving with iteration/time budgets and
//!   inline tool interruption for streamed responses
//! - **Transport pipeline**: interceptor chain, credential redaction, and a
//!   retry policy with Retry-After support and typed backoff
//!
//! ## Example
//!
//! ```rust,no_run
//! use llm_bridge::{BridgeClient, BridgeConfig, ChatRequest, Message, ModelSeed, ProviderConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = BridgeConfig::builder()
//!         .provider("anthropic", ProviderConfig::with_api_key(std::env::var("ANTHROPIC_API_KEY")?))
//!         .model_seed(ModelSeed::Builtin)
//!         .build()?;
//!     let client = BridgeClient::new(config)?;
//!
//!     let request = ChatRequest::builder("anthropic:claude-sonnet-4-20250514")
//!         .message(Message::user("What's the capital of France?"))
//!         .build()?;
//!     let reply = client.chat(request).await?;
//!     println!("{}", reply.text());
//!     Ok(())
//! }
//! ```
//!
//! Streaming returns a `futures::Stream` of deltas:
//!
//! ```rust,no_run
//! # use llm_bridge::{BridgeClient, BridgeConfig, ChatRequest, Message, ModelSeed, ProviderConfig};
//! use futures::StreamExt;
//!
//! # async fn example(client: BridgeClient) -> Result<(), Box<dyn std::error::Error>> {
//! let request = ChatRequest::builder("openai:gpt-4o-2024-08-06")
//!     .message(Message::user("Tell me a story"))
//!     .stream(true)
//!     .build()?;
//! let mut deltas = client.stream(request).await?;
//! while let Some(delta) = deltas.next().await {
//!     print!("{}", delta?.delta.text());
//! }
//! # Ok(())
//! # }
//! ```

/// Multi-turn agent loop: iteration accounting, tool fan-out, and the
/// streaming tool-interruption wrapper.
pub mod agent;

/// Cancellation handles shared across every layer of one call.
pub mod cancel;

/// The client façade binding registries, transport, and the agent loop.
mod client;

/// Bridge configuration: provider credentials, timeouts, tools, rate
/// limiting, retry.
pub mod config;

/// The error taxonomy and redaction helpers.
mod error;

/// Provider plugins: the vendor adapters and the plugin/model registries.
pub mod providers;

/// Server-sent-events framing.
pub mod sse;

/// Tool registry and execution router.
pub mod tools;

/// HTTP transport, interceptor chain, redaction, and retry policy.
pub mod transport;

/// Unified request/response/message types and shared validators.
pub mod types;

// --- Core client API ---

pub use client::BridgeClient;

// --- Configuration ---

pub use config::{
    BridgeConfig, BridgeConfigBuilder, McpServerConfig, McpToolFailureStrategy, ModelSeed,
    ProviderConfig, RateLimitPolicy, RateLimitScope, ToolsConfig,
};

// --- Error handling ---

pub use error::{
    BridgeCode, CancelStage, Error, ErrorContext, InterceptorDirection, InterceptorPhase, Result,
};

// --- Core types ---

pub use types::{
    ChatRequest, ChatRequestBuilder, ContentPart, Message, ModelCapabilities, ModelInfo,
    MultiTurnOptions, Role, StreamDelta, ToolDefinition, Usage,
};

// --- Provider surface ---

pub use providers::{
    ChatResponse, Confidence, DeltaStream, ProviderPlugin, TerminationReason, TerminationSignal,
};

// --- Cancellation ---

pub use cancel::CancellationHandle;

/// The most commonly used types, importable in one line with
/// `use llm_bridge::prelude::*;`.
pub mod prelude {
    pub use crate::{
        BridgeClient, BridgeConfig, CancellationHandle, ChatRequest, ContentPart, Error, Message,
        ModelSeed, MultiTurnOptions, ProviderConfig, Result, Role, StreamDelta, ToolDefinition,
    };
}

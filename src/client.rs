//! Client façade.
//!
//! [`BridgeClient`] binds the registries, the transport, the retry policy,
//! and the agent loop behind two entry points: [`BridgeClient::chat`] for
//! buffered calls and [`BridgeClient::stream`] for delta streams.
//!
//! A call flows: validate → rate limit → route (model → plugin → provider
//! config, §4.6) → translate → interceptor chain → transport (with retry) →
//! parse → optionally the agent loop. The per-call cancellation source is
//! the disjunction of the caller's handle and an internal timer sized by
//! the effective timeout (provider config first, then the client default);
//! both are released when the call completes, success or not.
//!
//! The bundled vendor plugins are registered at construction; additional
//! or replacement plugins go through [`BridgeClient::register_provider`]
//! before the client starts serving requests.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde_json::Value;

use crate::agent::stream_wrapper::wrap_with_tools;
use crate::agent::{AgentLoop, AgentOutcome};
use crate::cancel::{CancellationHandle, LinkGuard};
use crate::config::{BridgeConfig, ProviderConfig, RateLimitScope, TIMEOUT_RANGE_MS};
use crate::error::{BridgeCode, CancelStage, Error, Result};
use crate::providers::registry::{ModelRegistry, ProviderRegistry};
use crate::providers::{
    ChatResponse, DeltaStream, ProviderPlugin, TerminationFrame, TerminationReason, plugin_key,
};
use crate::tools::{ToolRegistry, ToolRouter};
use crate::transport::interceptor::{InterceptorChain, InterceptorContext, ResponseView};
use crate::transport::redaction::{RedactionConfig, Redactor};
use crate::transport::retry::{RetryContext, RetryPolicy};
use crate::transport::{HttpResponse, ReqwestTransport, Transport};
use crate::types::{
    ChatRequest, Message, ModelCapabilities, ModelInfo, ProviderPluginInfo, ToolDefinition,
    validate_messages,
};

/// Everything routing resolved for one request.
struct ResolvedRoute {
    plugin: Arc<dyn ProviderPlugin>,
    provider_config: ProviderConfig,
    model: ModelInfo,
    config_name: String,
}

/// Token bucket per scope key; fails fast when empty.
struct RateLimiter {
    max_rps: f64,
    burst: f64,
    scope: RateLimitScope,
    buckets: Mutex<HashMap<String, (f64, Instant)>>,
}

impl RateLimiter {
    fn new(max_rps: u32, burst: u32, scope: RateLimitScope) -> Self {
        Self {
            max_rps: max_rps as f64,
            burst: burst as f64,
            scope,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    fn scope_key(&self, provider: &str, model: &str, config_name: &str) -> String {
        match self.scope {
            RateLimitScope::Global => "global".to_string(),
            RateLimitScope::Provider => provider.to_string(),
            RateLimitScope::ProviderModel => format!("{provider}:{model}"),
            RateLimitScope::ProviderModelKey => format!("{provider}:{model}:{config_name}"),
        }
    }

    fn try_acquire(&self, key: &str) -> bool {
        let mut buckets = self.buckets.lock().expect("rate limiter lock");
        let now = Instant::now();
        let (tokens, last) = buckets
            .entry(key.to_string())
            .or_insert((self.burst, now));
        let refill = now.duration_since(*last).as_secs_f64() * self.max_rps;
        *tokens = (*tokens + refill).min(self.burst);
        *last = now;
        if *tokens >= 1.0 {
            *tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// The provider-agnostic chat client.
pub struct BridgeClient {
    config: BridgeConfig,
    transport: Arc<dyn Transport>,
    providers: ProviderRegistry,
    models: ModelRegistry,
    tools: Arc<ToolRegistry>,
    tool_router: Arc<ToolRouter>,
    retry: RetryPolicy,
    interceptors: InterceptorChain,
    redactor: Redactor,
    rate_limiter: Option<RateLimiter>,
    /// Plugins initialized so far, keyed by `(id, version)`. Held across
    /// the `initialize` call so concurrent first use cannot double-init.
    initialized: Mutex<HashSet<(String, String)>>,
}

impl BridgeClient {
    /// Build a client over the production HTTP transport.
    pub fn new(config: BridgeConfig) -> Result<Self> {
        Self::with_transport(config, Arc::new(ReqwestTransport::new()))
    }

    /// Build a client over a caller-supplied transport (tests use this to
    /// replay recorded vendor fixtures).
    pub fn with_transport(config: BridgeConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        config.validate()?;

        let providers = ProviderRegistry::new();
        providers.register(Arc::new(crate::providers::openai::OpenAiPlugin::new()))?;
        providers.register(Arc::new(crate::providers::anthropic::AnthropicPlugin::new()))?;
        providers.register(Arc::new(crate::providers::gemini::GeminiPlugin::new()))?;
        providers.register(Arc::new(crate::providers::xai::XaiPlugin::new()))?;

        let models = ModelRegistry::from_seed(&config.model_seed)?;

        let tools = Arc::new(ToolRegistry::new());
        if config.tools.enabled {
            tools.register_builtins(&config.tools.builtin_tools)?;
        }
        let tool_router = Arc::new(ToolRouter::new(Arc::clone(&tools), &config.tools));

        let retry = RetryPolicy::new(config.retry_policy.clone())?;
        let redactor = Redactor::new(RedactionConfig::default())?;
        let rate_limiter = config.rate_limit_policy.as_ref().and_then(|policy| {
            if policy.enabled {
                Some(RateLimiter::new(
                    policy.max_rps.unwrap_or(1),
                    policy.effective_burst().max(1),
                    policy.scope,
                ))
            } else {
                None
            }
        });

        Ok(Self {
            config,
            transport,
            providers,
            models,
            tools,
            tool_router,
            retry,
            interceptors: InterceptorChain::new(),
            redactor,
            rate_limiter,
            initialized: Mutex::new(HashSet::new()),
        })
    }

    // ---- registration surface -------------------------------------------

    /// Register (or replace) a provider plugin.
    pub fn register_provider(&self, plugin: Arc<dyn ProviderPlugin>) -> Result<()> {
        self.providers.register(plugin)
    }

    /// Register a model catalog entry.
    pub fn register_model(&self, model: ModelInfo) -> Result<()> {
        self.models.register(model)
    }

    /// Register an application tool.
    pub fn register_tool<F, Fut>(&self, definition: ToolDefinition, handler: F) -> Result<()>
    where
        F: Fn(Value, crate::tools::ToolExecutionContext) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        if !self.config.tools.enabled {
            return Err(Error::bridge(
                BridgeCode::ToolsNotEnabled,
                "tool subsystem is disabled in the client config",
            ));
        }
        self.tools.register(definition, handler)
    }

    /// Append a request interceptor. Call during setup, before serving.
    pub fn add_request_interceptor<F, Fut>(&mut self, interceptor: F)
    where
        F: Fn(InterceptorContext) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<InterceptorContext>> + Send + 'static,
    {
        self.interceptors.add_request(interceptor);
    }

    /// Append a response interceptor. Call during setup, before serving.
    pub fn add_response_interceptor<F, Fut>(&mut self, interceptor: F)
    where
        F: Fn(InterceptorContext, ResponseView) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<ResponseView>> + Send + 'static,
    {
        self.interceptors.add_response(interceptor);
    }

    // ---- read-only surface ----------------------------------------------

    pub fn list_available_providers(&self) -> Vec<ProviderPluginInfo> {
        self.providers.list(None)
    }

    pub fn list_available_models(&self) -> Vec<ModelInfo> {
        self.models.list(None)
    }

    pub fn get_model_capabilities(&self, qualified_id: &str) -> Option<ModelCapabilities> {
        self.models.get(qualified_id).map(|m| m.capabilities)
    }

    /// Read-only snapshot of the configuration.
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    // ---- routing ---------------------------------------------------------

    /// Resolve the request's model to a plugin and a provider config.
    fn route(&self, request: &ChatRequest) -> Result<ResolvedRoute> {
        let (_, model_name) = request.split_model()?;

        let model = self.models.get(&request.model).ok_or_else(|| {
            Error::bridge(
                BridgeCode::ModelNotRegistered,
                format!("model {:?} is not in the registry", request.model),
            )
        })?;

        let (plugin_id, plugin_version) =
            plugin_key(&model.provider_plugin).ok_or_else(|| {
                Error::bridge(
                    BridgeCode::ProviderPluginUnmapped,
                    format!(
                        "model {:?} names unmapped plugin {:?}",
                        model.id, model.provider_plugin
                    ),
                )
            })?;

        let plugin = self.providers.get(plugin_id, plugin_version).ok_or_else(|| {
            Error::bridge(
                BridgeCode::ProviderNotRegistered,
                format!("provider plugin {plugin_id}@{plugin_version} is not registered"),
            )
        })?;
        if !plugin.supports_model(model_name) {
            log::warn!(
                "model {model_name:?} is outside {plugin_id}@{plugin_version}'s advertised set"
            );
        }

        let provider_config = self
            .config
            .provider_config(plugin_id, &request.provider_config)
            .ok_or_else(|| {
                Error::bridge(
                    BridgeCode::ProviderConfigMissing,
                    format!(
                        "no config {:?} for provider {plugin_id:?}",
                        request.provider_config
                    ),
                )
            })?
            .clone();

        self.ensure_initialized(&plugin, &provider_config)?;
        log::debug!(
            "routed {} via {plugin_id}@{plugin_version} (config {:?})",
            request.model,
            request.provider_config
        );

        Ok(ResolvedRoute {
            plugin,
            provider_config,
            model,
            config_name: request.provider_config.clone(),
        })
    }

    /// Initialize a plugin at most once per `(id, version)`.
    fn ensure_initialized(
        &self,
        plugin: &Arc<dyn ProviderPlugin>,
        config: &ProviderConfig,
    ) -> Result<()> {
        let key = (plugin.id().to_string(), plugin.version().to_string());
        let mut initialized = self.initialized.lock().expect("init set lock");
        if !initialized.contains(&key) {
            plugin.initialize(config)?;
            initialized.insert(key);
        }
        Ok(())
    }

    /// Provider-config timeout wins over the client default; both clamp to
    /// the allowed range.
    fn effective_timeout(&self, provider_config: &ProviderConfig) -> Duration {
        let (min, max) = TIMEOUT_RANGE_MS;
        let ms = provider_config
            .timeout_ms
            .unwrap_or(self.config.timeout_ms)
            .clamp(min, max);
        Duration::from_millis(ms)
    }

    fn check_rate_limit(&self, route: &ResolvedRoute) -> Result<()> {
        if let Some(limiter) = &self.rate_limiter {
            let key = limiter.scope_key(
                route.plugin.id(),
                &route.model.id,
                &route.config_name,
            );
            if !limiter.try_acquire(&key) {
                return Err(Error::RateLimit {
                    message: format!("client-side rate limit exceeded for {key:?}"),
                    retry_after_ms: None,
                    context: Default::default(),
                });
            }
        }
        Ok(())
    }

    /// Map a cancellation surfaced by lower layers onto the caller-visible
    /// error: the caller's own handle yields `Cancelled`, the internal
    /// deadline yields `Timeout`.
    fn map_cancel(
        &self,
        error: Error,
        caller: Option<&CancellationHandle>,
        stage: CancelStage,
        timeout: Duration,
    ) -> Error {
        match error {
            Error::Cancelled { .. } => {
                if caller.is_some_and(|handle| handle.is_cancelled()) {
                    Error::cancelled(stage)
                } else {
                    Error::timeout(format!("call exceeded {}ms", timeout.as_millis()))
                }
            }
            other => other,
        }
    }

    // ---- one HTTP round (shared by chat and the agent loop) --------------

    /// Translate, thread interceptors, fetch with retry, and parse.
    async fn model_round(
        &self,
        route: &ResolvedRoute,
        request: &ChatRequest,
        cancel: &CancellationHandle,
    ) -> Result<ChatResponse> {
        let http_request =
            route
                .plugin
                .translate_request(request, &route.provider_config, Some(&route.model.capabilities))?;
        if self.redactor.enabled() && log::log_enabled!(log::Level::Debug) {
            let preview = self
                .redactor
                .redact_request(InterceptorContext::new(http_request.clone(), 0));
            log::debug!("dispatching {} {}", preview.request.method, preview.request.url);
        }

        let mut attempt: u32 = 0;
        loop {
            let ctx = InterceptorContext::new(http_request.clone(), attempt);
            let ctx = self.interceptors.run_request(ctx).await?;

            let (error, response) = match self.transport.fetch(ctx.request.clone(), cancel).await {
                Ok(response) => {
                    let view = ResponseView {
                        status: response.status,
                        headers: response.headers.clone(),
                        body: Some(response.body.clone()),
                    };
                    let view = self.interceptors.run_response(&ctx, view).await?;
                    let response = HttpResponse {
                        status: view.status,
                        status_text: response.status_text,
                        headers: view.headers,
                        body: view.body.unwrap_or(response.body),
                    };
                    if response.is_success() {
                        return route.plugin.parse_response(&response);
                    }
                    (route.plugin.normalize_error(&response), Some(response))
                }
                Err(e @ Error::Cancelled { .. }) => return Err(e),
                Err(e) => (e, None),
            };

            let decision = self.retry.should_retry(&RetryContext {
                attempt,
                last_error: &error,
                last_response: response.as_ref(),
                cancel,
            });
            if !decision.retry {
                return Err(error);
            }
            log::debug!(
                "retrying after {}ms (attempt {}): {}",
                decision.delay_ms,
                attempt,
                decision.reason
            );
            self.retry.delay(decision.delay_ms, cancel).await?;
            attempt += 1;
        }
    }

    // ---- public entry points --------------------------------------------

    /// Execute a chat request and return the final assistant message.
    ///
    /// Without `multi_turn`, a response that requests tools is returned
    /// unchanged; tool-aware continuation requires multi-turn mode.
    pub async fn chat(&self, request: ChatRequest) -> Result<Message> {
        validate_messages(&request.messages)?;
        let route = self.route(&request)?;
        self.check_rate_limit(&route)?;

        let timeout = self.effective_timeout(&route.provider_config);
        let parents: Vec<CancellationHandle> = request.cancel.iter().cloned().collect();
        let (cancel, _guard) = CancellationHandle::linked(parents, Some(timeout));

        let result = match &request.multi_turn {
            None => {
                let mut single = request.clone();
                single.stream = false;
                self.model_round(&route, &single, &cancel)
                    .await
                    .map(|response| finalize_message(&route, response))
            }
            Some(options) => {
                if !self.config.tools.enabled {
                    return Err(Error::bridge(
                        BridgeCode::ToolsNotEnabled,
                        "multi_turn requires the tool subsystem",
                    ));
                }
                let agent = AgentLoop::new(
                    Arc::clone(&self.tool_router),
                    options.clone(),
                    cancel.clone(),
                    route.plugin.id(),
                );
                let outcome: Result<AgentOutcome> = agent
                    .run(request.messages.clone(), |messages| {
                        let mut turn_request = request.clone();
                        turn_request.messages = messages;
                        turn_request.stream = false;
                        let route = &route;
                        let cancel = cancel.clone();
                        async move {
                            let response =
                                self.model_round(route, &turn_request, &cancel).await?;
                            let signal = route
                                .plugin
                                .detect_termination(TerminationFrame::Final(&response));
                            Ok((response, signal))
                        }
                    })
                    .await;
                outcome.map(|outcome| {
                    let mut message = outcome.message;
                    attach_metadata(
                        &mut message,
                        "terminationReason",
                        Value::from(outcome.termination.to_string()),
                    );
                    attach_metadata(
                        &mut message,
                        "iterations",
                        Value::from(outcome.metrics.iterations),
                    );
                    message
                })
            }
        };

        result.map_err(|e| {
            self.map_cancel(e, request.cancel.as_ref(), CancelStage::Execution, timeout)
        })
    }

    /// Execute a streaming chat request and return the delta stream. When
    /// tools are enabled and the request carries tool definitions, the
    /// stream is wrapped for inline tool interruption.
    pub async fn stream(&self, request: ChatRequest) -> Result<DeltaStream> {
        validate_messages(&request.messages)?;
        let route = self.route(&request)?;
        self.check_rate_limit(&route)?;
        if !route.model.capabilities.streaming {
            return Err(Error::validation(format!(
                "model {:?} does not support streaming",
                route.model.id
            )));
        }

        let timeout = self.effective_timeout(&route.provider_config);
        let parents: Vec<CancellationHandle> = request.cancel.iter().cloned().collect();
        let (cancel, guard) = CancellationHandle::linked(parents, Some(timeout));

        let mut streaming_request = request.clone();
        streaming_request.stream = true;

        let connect = self
            .connect_stream(&route, &streaming_request, &cancel)
            .await;
        let bytes = match connect {
            Ok(bytes) => bytes,
            Err(e) => {
                return Err(self.map_cancel(
                    e,
                    request.cancel.as_ref(),
                    CancelStage::Streaming,
                    timeout,
                ));
            }
        };

        let deltas = route.plugin.parse_stream(bytes, cancel.clone());
        let deltas = if self.config.tools.enabled && request.tools.is_some() {
            wrap_with_tools(
                deltas,
                Arc::clone(&self.tool_router),
                route.plugin.id().to_string(),
                cancel.clone(),
            )
        } else {
            deltas
        };

        // The guard (and with it the deadline timer) lives until the caller
        // drops the stream; caller cancellation maps to Cancelled, deadline
        // to Timeout.
        let caller = request.cancel.clone();
        let mapped = MappedStream {
            inner: deltas,
            caller,
            timeout,
            _guard: guard,
        };
        Ok(Box::pin(mapped))
    }

    /// Open the streaming HTTP call, retrying failed connections.
    async fn connect_stream(
        &self,
        route: &ResolvedRoute,
        request: &ChatRequest,
        cancel: &CancellationHandle,
    ) -> Result<crate::transport::ByteStream> {
        let http_request =
            route
                .plugin
                .translate_request(request, &route.provider_config, Some(&route.model.capabilities))?;

        let mut attempt: u32 = 0;
        loop {
            let ctx = InterceptorContext::new(http_request.clone(), attempt);
            let ctx = self.interceptors.run_request(ctx).await?;

            let (error, response) = match self.transport.stream(ctx.request.clone(), cancel).await {
                Ok((status, headers, bytes)) => {
                    // Response interceptors see the head only; the byte
                    // stream is handed on untouched.
                    let view = ResponseView {
                        status,
                        headers: headers.clone(),
                        body: None,
                    };
                    let view = self.interceptors.run_response(&ctx, view).await?;
                    if (200..300).contains(&view.status) {
                        return Ok(bytes);
                    }
                    // Error responses are finite; drain them for the vendor
                    // envelope.
                    let body = collect_bytes(bytes).await;
                    let response = HttpResponse {
                        status: view.status,
                        status_text: String::new(),
                        headers: view.headers,
                        body,
                    };
                    (route.plugin.normalize_error(&response), Some(response))
                }
                Err(e @ Error::Cancelled { .. }) => return Err(e),
                Err(e) => (e, None),
            };

            let decision = self.retry.should_retry(&RetryContext {
                attempt,
                last_error: &error,
                last_response: response.as_ref(),
                cancel,
            });
            if !decision.retry {
                return Err(error);
            }
            self.retry.delay(decision.delay_ms, cancel).await?;
            attempt += 1;
        }
    }
}

/// Delta stream that owns the call's cancellation guard and maps
/// cancellation errors for the caller.
struct MappedStream {
    inner: DeltaStream,
    caller: Option<CancellationHandle>,
    timeout: Duration,
    _guard: LinkGuard,
}

impl futures::Stream for MappedStream {
    type Item = Result<crate::types::StreamDelta>;

    fn poll_next(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match this.inner.as_mut().poll_next(cx) {
            std::task::Poll::Ready(Some(Err(Error::Cancelled { .. }))) => {
                let mapped = if this
                    .caller
                    .as_ref()
                    .is_some_and(|handle| handle.is_cancelled())
                {
                    Error::cancelled(CancelStage::Streaming)
                } else {
                    Error::timeout(format!("call exceeded {}ms", this.timeout.as_millis()))
                };
                std::task::Poll::Ready(Some(Err(mapped)))
            }
            other => other,
        }
    }
}

async fn collect_bytes(mut bytes: crate::transport::ByteStream) -> Vec<u8> {
    use futures::StreamExt;
    let mut collected = Vec::new();
    while let Some(Ok(chunk)) = bytes.next().await {
        collected.extend_from_slice(&chunk);
    }
    collected
}

fn attach_metadata(message: &mut Message, key: &str, value: Value) {
    message
        .metadata
        .get_or_insert_with(HashMap::new)
        .insert(key.to_string(), value);
}

/// Stamp response-level metadata onto the returned message.
fn finalize_message(route: &ResolvedRoute, response: ChatResponse) -> Message {
    let signal = route
        .plugin
        .detect_termination(TerminationFrame::Final(&response));
    let mut message = response.message;
    attach_metadata(&mut message, "responseId", Value::from(response.id));
    attach_metadata(
        &mut message,
        "terminationReason",
        Value::from(signal.reason.to_string()),
    );
    if let Some(reason) = response.finish_reason {
        attach_metadata(&mut message, "finishReason", Value::from(reason));
    }
    if let Some(usage) = response.usage {
        attach_metadata(
            &mut message,
            "usage",
            serde_json::to_value(usage).unwrap_or(Value::Null),
        );
    }
    if signal.reason == TerminationReason::ToolUseRequired {
        log::debug!("single-turn response requests tools; returning message unchanged");
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RateLimitPolicy, ToolsConfig};

    fn config() -> BridgeConfig {
        BridgeConfig::builder()
            .provider("openai", ProviderConfig::with_api_key("sk-test"))
            .provider("anthropic", ProviderConfig::with_api_key("sk-ant-test"))
            .model_seed(crate::config::ModelSeed::Builtin)
            .build()
            .unwrap()
    }

    #[test]
    fn test_client_registers_bundled_plugins() {
        let client = BridgeClient::new(config()).unwrap();
        let providers = client.list_available_providers();
        let ids: Vec<&str> = providers.iter().map(|p| p.id.as_str()).collect();
        assert!(ids.contains(&"openai"));
        assert!(ids.contains(&"anthropic"));
        assert!(ids.contains(&"google"));
        assert!(ids.contains(&"xai"));
    }

    #[test]
    fn test_model_capabilities_lookup() {
        let client = BridgeClient::new(config()).unwrap();
        let caps = client
            .get_model_capabilities("openai:gpt-4o-2024-08-06")
            .unwrap();
        assert!(caps.streaming);
        assert!(client.get_model_capabilities("openai:nonexistent").is_none());
    }

    #[test]
    fn test_effective_timeout_resolution() {
        let client = BridgeClient::new(config()).unwrap();
        let default_config = ProviderConfig::default();
        assert_eq!(
            client.effective_timeout(&default_config),
            Duration::from_millis(30_000)
        );

        let custom = ProviderConfig::default().timeout_ms(5_000);
        assert_eq!(client.effective_timeout(&custom), Duration::from_millis(5_000));
    }

    #[test]
    fn test_register_tool_requires_enabled_subsystem() {
        let disabled = BridgeConfig::builder()
            .provider("openai", ProviderConfig::with_api_key("sk-test"))
            .tools(ToolsConfig {
                enabled: false,
                ..Default::default()
            })
            .build()
            .unwrap();
        let client = BridgeClient::new(disabled).unwrap();
        let err = client
            .register_tool(
                ToolDefinition::new("echo2", serde_json::json!({"type": "object"})),
                |params, _ctx| async move { Ok(params) },
            )
            .unwrap_err();
        assert_eq!(err.bridge_code(), Some(BridgeCode::ToolsNotEnabled));
    }

    #[test]
    fn test_rate_limiter_buckets() {
        let limiter = RateLimiter::new(1, 2, RateLimitScope::Provider);
        assert!(limiter.try_acquire("openai"));
        assert!(limiter.try_acquire("openai"));
        // Burst exhausted, refill is ~0 in this instant.
        assert!(!limiter.try_acquire("openai"));
        // Other scope keys are independent.
        assert!(limiter.try_acquire("anthropic"));
    }

    #[test]
    fn test_rate_limiter_scope_keys() {
        let limiter = RateLimiter::new(1, 1, RateLimitScope::ProviderModelKey);
        assert_eq!(
            limiter.scope_key("openai", "openai:gpt-4o", "default"),
            "openai:openai:gpt-4o:default"
        );
        let global = RateLimiter::new(1, 1, RateLimitScope::Global);
        assert_eq!(global.scope_key("a", "b", "c"), "global");
    }

    #[test]
    fn test_rate_limit_policy_wired_in() {
        let config = BridgeConfig::builder()
            .provider("openai", ProviderConfig::with_api_key("sk-test"))
            .rate_limit_policy(RateLimitPolicy {
                enabled: true,
                max_rps: Some(100),
                burst: None,
                scope: RateLimitScope::Global,
            })
            .build()
            .unwrap();
        let client = BridgeClient::new(config).unwrap();
        assert!(client.rate_limiter.is_some());
        assert_eq!(client.rate_limiter.as_ref().unwrap().burst, 200.0);
    }
}

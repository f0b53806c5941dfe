//! Bridge configuration.
//!
//! [`BridgeConfig`] is the single configuration object handed to the client
//! façade. It carries per-provider credential blocks (multi-named, selected
//! per request via `ChatRequest::provider_config`), the default per-call
//! timeout, model-catalog seeding, the tool subsystem settings, the rate
//! limit policy, and the retry policy. Everything is validated up front by
//! [`BridgeConfig::validate`] — a config that constructs a client has no
//! latent range errors left to discover mid-call.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::transport::retry::RetryPolicyConfig;
use crate::types::{ModelInfo, split_qualified_model, validate_tool_name};

/// Default per-call timeout, milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
/// Allowed range for per-call and per-tool timeouts, milliseconds.
pub const TIMEOUT_RANGE_MS: (u64, u64) = (1_000, 300_000);

/// Credentials and endpoint settings for one provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Overrides the plugin's default endpoint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// `OpenAI-Organization` header value.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization: Option<String>,
    /// `OpenAI-Project` header value.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    /// Vendor API version override (e.g. the `anthropic-version` header).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
    /// Per-provider call timeout; wins over the client default.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Extra headers injected verbatim into every request.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
    /// Plugin-specific settings the core does not interpret.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub extra: HashMap<String, Value>,
}

impl ProviderConfig {
    pub fn with_api_key(api_key: impl Into<String>) -> Self {
        Self {
            api_key: Some(api_key.into()),
            ..Default::default()
        }
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn timeout_ms(mut self, ms: u64) -> Self {
        self.timeout_ms = Some(ms);
        self
    }
}

/// How the model registry is populated at client construction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelSeed {
    /// No seeding; the caller registers models explicitly.
    #[default]
    None,
    /// The embedded catalog.
    Builtin,
    /// Caller-supplied catalog entries, validated on construction.
    Data(Vec<ModelInfo>),
}

/// One MCP tool-server entry. Exactly one of `url` and `command` must be
/// set; names must be unique across the list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct McpServerConfig {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
}

/// What to do when an MCP-provided tool starts failing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum McpToolFailureStrategy {
    #[default]
    ImmediateUnregister,
    MarkUnavailable,
}

/// Tool subsystem settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Gates the entire tool subsystem.
    pub enabled: bool,
    /// Names of bundled tools to activate.
    #[serde(default)]
    pub builtin_tools: Vec<String>,
    /// Per-execution timeout, in `[1_000, 300_000]` ms.
    pub execution_timeout_ms: u64,
    /// Concurrent tool executions, in `[1, 10]`; excess calls queue FIFO.
    pub max_concurrent_tools: usize,
    #[serde(default)]
    pub mcp_servers: Vec<McpServerConfig>,
    #[serde(default)]
    pub mcp_tool_failure_strategy: McpToolFailureStrategy,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            builtin_tools: Vec::new(),
            execution_timeout_ms: 30_000,
            max_concurrent_tools: 5,
            mcp_servers: Vec::new(),
            mcp_tool_failure_strategy: McpToolFailureStrategy::default(),
        }
    }
}

impl ToolsConfig {
    pub fn validate(&self) -> Result<()> {
        let (min, max) = TIMEOUT_RANGE_MS;
        if !(min..=max).contains(&self.execution_timeout_ms) {
            return Err(Error::validation(format!(
                "tools.execution_timeout_ms must be in [{min}, {max}]"
            )));
        }
        if !(1..=10).contains(&self.max_concurrent_tools) {
            return Err(Error::validation(
                "tools.max_concurrent_tools must be in [1, 10]",
            ));
        }
        for name in &self.builtin_tools {
            validate_tool_name(name)?;
        }

        let mut seen = Vec::new();
        for server in &self.mcp_servers {
            if server.name.is_empty() {
                return Err(Error::validation("mcp server name must not be empty"));
            }
            if seen.contains(&&server.name) {
                return Err(Error::validation(format!(
                    "mcp server names must be unique: {:?}",
                    server.name
                )));
            }
            seen.push(&server.name);

            match (&server.url, &server.command) {
                (Some(_), Some(_)) => {
                    return Err(Error::validation(format!(
                        "mcp server {:?} must set url or command, not both",
                        server.name
                    )));
                }
                (None, None) => {
                    return Err(Error::validation(format!(
                        "mcp server {:?} must set either url or command",
                        server.name
                    )));
                }
                (Some(url), None) => {
                    if !url.starts_with("http://") && !url.starts_with("https://") {
                        return Err(Error::validation(format!(
                            "mcp server {:?} url must be http(s), got {url:?}",
                            server.name
                        )));
                    }
                }
                (None, Some(command)) => {
                    if command.trim().is_empty() {
                        return Err(Error::validation(format!(
                            "mcp server {:?} command must not be empty",
                            server.name
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

/// Which bucket a rate-limited request is counted against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RateLimitScope {
    #[default]
    #[serde(rename = "global")]
    Global,
    #[serde(rename = "provider")]
    Provider,
    #[serde(rename = "provider:model")]
    ProviderModel,
    #[serde(rename = "provider:model:key")]
    ProviderModelKey,
}

/// Client-side request throttling.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RateLimitPolicy {
    pub enabled: bool,
    /// Required when enabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_rps: Option<u32>,
    /// Bucket capacity; defaults to `2 × max_rps`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub burst: Option<u32>,
    #[serde(default)]
    pub scope: RateLimitScope,
}

impl RateLimitPolicy {
    pub fn validate(&self) -> Result<()> {
        if self.enabled {
            match self.max_rps {
                None | Some(0) => {
                    return Err(Error::validation(
                        "rate_limit_policy.max_rps is required when enabled",
                    ));
                }
                Some(_) => {}
            }
            if self.burst == Some(0) {
                return Err(Error::validation("rate_limit_policy.burst must be positive"));
            }
        }
        Ok(())
    }

    /// Effective bucket capacity.
    pub fn effective_burst(&self) -> u32 {
        self.burst
            .unwrap_or_else(|| self.max_rps.unwrap_or(0).saturating_mul(2))
    }
}

/// Top-level client configuration. Build with [`BridgeConfig::builder`].
#[derive(Debug, Clone, Default)]
pub struct BridgeConfig {
    /// Provider used when a request omits qualification. Unqualified model
    /// ids are still rejected; this only informs catalog helpers.
    pub default_provider: Option<String>,
    /// Provider id → named config blocks. The `"default"` name is what
    /// requests use unless they select another.
    pub providers: HashMap<String, HashMap<String, ProviderConfig>>,
    pub default_model: Option<String>,
    /// Default per-call timeout, milliseconds.
    pub timeout_ms: u64,
    pub model_seed: ModelSeed,
    pub tools: ToolsConfig,
    pub rate_limit_policy: Option<RateLimitPolicy>,
    pub retry_policy: RetryPolicyConfig,
}

impl BridgeConfig {
    pub fn builder() -> BridgeConfigBuilder {
        BridgeConfigBuilder::default()
    }

    /// The named config block for a provider.
    pub fn provider_config(&self, provider: &str, name: &str) -> Option<&ProviderConfig> {
        self.providers.get(provider).and_then(|named| named.get(name))
    }

    pub fn validate(&self) -> Result<()> {
        let (min, max) = TIMEOUT_RANGE_MS;
        if !(min..=max).contains(&self.timeout_ms) {
            return Err(Error::validation(format!(
                "timeout must be in [{min}, {max}] ms"
            )));
        }

        for (provider, named) in &self.providers {
            if provider.trim().is_empty() {
                return Err(Error::validation("provider name must not be empty"));
            }
            if named.is_empty() {
                return Err(Error::validation(format!(
                    "provider {provider:?} has no config blocks"
                )));
            }
            for (name, config) in named {
                if name.trim().is_empty() {
                    return Err(Error::validation(format!(
                        "provider {provider:?} has an empty config name"
                    )));
                }
                if let Some(ms) = config.timeout_ms {
                    if !(min..=max).contains(&ms) {
                        return Err(Error::validation(format!(
                            "provider {provider:?} config {name:?} timeout must be in [{min}, {max}] ms"
                        )));
                    }
                }
            }
        }

        if let Some(default_provider) = &self.default_provider {
            if !self.providers.contains_key(default_provider) {
                return Err(Error::validation(format!(
                    "default_provider {default_provider:?} has no config in providers"
                )));
            }
        }
        if let Some(model) = &self.default_model {
            split_qualified_model(model)?;
        }
        if let ModelSeed::Data(models) = &self.model_seed {
            for model in models {
                model.validate()?;
            }
        }

        self.tools.validate()?;
        if let Some(policy) = &self.rate_limit_policy {
            policy.validate()?;
        }
        self.retry_policy.validate()?;
        Ok(())
    }
}

/// Builder for [`BridgeConfig`]; `build()` validates.
#[derive(Debug, Clone, Default)]
pub struct BridgeConfigBuilder {
    config: BridgeConfig,
}

impl BridgeConfigBuilder {
    /// Register a provider's `"default"` config block.
    pub fn provider(self, id: impl Into<String>, config: ProviderConfig) -> Self {
        self.named_provider(id, "default", config)
    }

    /// Register a named config block for a provider.
    pub fn named_provider(
        mut self,
        id: impl Into<String>,
        name: impl Into<String>,
        config: ProviderConfig,
    ) -> Self {
        self.config
            .providers
            .entry(id.into())
            .or_default()
            .insert(name.into(), config);
        self
    }

    pub fn default_provider(mut self, id: impl Into<String>) -> Self {
        self.config.default_provider = Some(id.into());
        self
    }

    pub fn default_model(mut self, model: impl Into<String>) -> Self {
        self.config.default_model = Some(model.into());
        self
    }

    pub fn timeout_ms(mut self, ms: u64) -> Self {
        self.config.timeout_ms = ms;
        self
    }

    pub fn model_seed(mut self, seed: ModelSeed) -> Self {
        self.config.model_seed = seed;
        self
    }

    pub fn tools(mut self, tools: ToolsConfig) -> Self {
        self.config.tools = tools;
        self
    }

    pub fn rate_limit_policy(mut self, policy: RateLimitPolicy) -> Self {
        self.config.rate_limit_policy = Some(policy);
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicyConfig) -> Self {
        self.config.retry_policy = policy;
        self
    }

    pub fn build(mut self) -> Result<BridgeConfig> {
        if self.config.timeout_ms == 0 {
            self.config.timeout_ms = DEFAULT_TIMEOUT_MS;
        }
        self.config.validate()?;
        Ok(self.config)
    }
}

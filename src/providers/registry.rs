//! Provider and model registries.
//!
//! [`ProviderRegistry`] keys plugins by `(id, version)` so multiple versions
//! of one vendor adapter can coexist; `get_latest` resolves the most
//! recently registered version of an id. Registering over an existing key
//! logs a warning and overwrites.
//!
//! [`ModelRegistry`] maps qualified ids (`provider:modelName`) to catalog
//! entries. It can start empty, be seeded from the embedded catalog, or be
//! seeded from caller-supplied data; a path-based loader is deliberately
//! not part of the core.
//!
//! Both registries are populated during setup and read-only on the request
//! path; mutation takes the write side of an `RwLock`.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::SystemTime;

use crate::config::ModelSeed;
use crate::error::{Error, Result};
use crate::providers::ProviderPlugin;
use crate::types::{ModelCapabilities, ModelInfo, ProviderPluginInfo, split_qualified_model};

struct RegisteredPlugin {
    plugin: Arc<dyn ProviderPlugin>,
    info: ProviderPluginInfo,
    /// Monotonic registration sequence, used by `get_latest`.
    order: u64,
}

/// In-memory plugin registry keyed by `(id, version)`.
#[derive(Default)]
pub struct ProviderRegistry {
    entries: RwLock<HashMap<(String, String), RegisteredPlugin>>,
    counter: RwLock<u64>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plugin. A duplicate `(id, version)` key overwrites the
    /// previous registration with a warning.
    pub fn register(&self, plugin: Arc<dyn ProviderPlugin>) -> Result<()> {
        let id = plugin.id().to_string();
        let version = plugin.version().to_string();
        if id.trim().is_empty() || version.trim().is_empty() {
            return Err(Error::validation(
                "provider plugin id and version must not be empty",
            ));
        }

        let mut counter = self.counter.write().expect("registry lock");
        *counter += 1;
        let order = *counter;
        drop(counter);

        let key = (id.clone(), version.clone());
        let mut entries = self.entries.write().expect("registry lock");
        if entries.contains_key(&key) {
            log::warn!("overwriting provider plugin {id}@{version}");
        }
        entries.insert(
            key,
            RegisteredPlugin {
                plugin,
                info: ProviderPluginInfo {
                    id,
                    version,
                    registered_at: SystemTime::now(),
                },
                order,
            },
        );
        Ok(())
    }

    /// Remove one version, or every version of an id.
    pub fn unregister(&self, id: &str, version: Option<&str>) -> bool {
        let mut entries = self.entries.write().expect("registry lock");
        match version {
            Some(version) => entries
                .remove(&(id.to_string(), version.to_string()))
                .is_some(),
            None => {
                let before = entries.len();
                entries.retain(|(entry_id, _), _| entry_id != id);
                entries.len() != before
            }
        }
    }

    pub fn get(&self, id: &str, version: &str) -> Option<Arc<dyn ProviderPlugin>> {
        self.entries
            .read()
            .expect("registry lock")
            .get(&(id.to_string(), version.to_string()))
            .map(|entry| Arc::clone(&entry.plugin))
    }

    /// The most recently registered version of an id.
    pub fn get_latest(&self, id: &str) -> Option<Arc<dyn ProviderPlugin>> {
        self.entries
            .read()
            .expect("registry lock")
            .values()
            .filter(|entry| entry.info.id == id)
            .max_by_key(|entry| entry.order)
            .map(|entry| Arc::clone(&entry.plugin))
    }

    /// Metadata for every registration, optionally filtered by id.
    pub fn list(&self, id: Option<&str>) -> Vec<ProviderPluginInfo> {
        let entries = self.entries.read().expect("registry lock");
        let mut infos: Vec<(u64, ProviderPluginInfo)> = entries
            .values()
            .filter(|entry| id.is_none_or(|id| entry.info.id == id))
            .map(|entry| (entry.order, entry.info.clone()))
            .collect();
        infos.sort_by_key(|(order, _)| *order);
        infos.into_iter().map(|(_, info)| info).collect()
    }

    pub fn has(&self, id: &str, version: Option<&str>) -> bool {
        let entries = self.entries.read().expect("registry lock");
        match version {
            Some(version) => entries.contains_key(&(id.to_string(), version.to_string())),
            None => entries.values().any(|entry| entry.info.id == id),
        }
    }
}

/// Model catalog keyed by qualified id.
#[derive(Default)]
pub struct ModelRegistry {
    entries: RwLock<HashMap<String, ModelInfo>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from a seeding mode.
    pub fn from_seed(seed: &ModelSeed) -> Result<Self> {
        let registry = Self::new();
        match seed {
            ModelSeed::None => {}
            ModelSeed::Builtin => {
                for model in builtin_models() {
                    registry.register(model)?;
                }
            }
            ModelSeed::Data(models) => {
                for model in models {
                    registry.register(model.clone())?;
                }
            }
        }
        Ok(registry)
    }

    pub fn register(&self, model: ModelInfo) -> Result<()> {
        model.validate()?;
        let (provider, _) = split_qualified_model(&model.id)?;
        if provider != model.provider {
            return Err(Error::validation(format!(
                "model id {:?} does not match provider {:?}",
                model.id, model.provider
            )));
        }
        self.entries
            .write()
            .expect("model registry lock")
            .insert(model.id.clone(), model);
        Ok(())
    }

    pub fn get(&self, qualified_id: &str) -> Option<ModelInfo> {
        self.entries
            .read()
            .expect("model registry lock")
            .get(qualified_id)
            .cloned()
    }

    pub fn list(&self, provider: Option<&str>) -> Vec<ModelInfo> {
        let entries = self.entries.read().expect("model registry lock");
        let mut models: Vec<ModelInfo> = entries
            .values()
            .filter(|model| provider.is_none_or(|p| model.provider == p))
            .cloned()
            .collect();
        models.sort_by(|a, b| a.id.cmp(&b.id));
        models
    }

    pub fn len(&self) -> usize {
        self.entries.read().expect("model registry lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn model(
    id: &str,
    provider: &str,
    plugin: &str,
    temperature: bool,
    images: bool,
    context: u64,
) -> ModelInfo {
    ModelInfo {
        id: id.to_string(),
        provider: provider.to_string(),
        capabilities: ModelCapabilities {
            temperature,
            streaming: true,
            tools: true,
            max_context_tokens: context,
            supports_images: images,
            supports_documents: None,
        },
        provider_plugin: plugin.to_string(),
    }
}

/// The embedded model catalog.
pub fn builtin_models() -> Vec<ModelInfo> {
    vec![
        model("openai:gpt-4o-2024-08-06", "openai", "openai-responses-v1", true, true, 128_000),
        model("openai:gpt-4o-mini", "openai", "openai-responses-v1", true, true, 128_000),
        // Reasoning models reject sampling parameters.
        model("openai:o1", "openai", "openai-responses-v1", false, true, 200_000),
        model(
            "anthropic:claude-opus-4-20250514",
            "anthropic",
            "anthropic-2023-06-01",
            true,
            true,
            200_000,
        ),
        model(
            "anthropic:claude-sonnet-4-20250514",
            "anthropic",
            "anthropic-2023-06-01",
            true,
            true,
            200_000,
        ),
        model(
            "anthropic:claude-3-5-haiku-20241022",
            "anthropic",
            "anthropic-2023-06-01",
            true,
            true,
            200_000,
        ),
        model("google:gemini-2.0-flash", "google", "google-gemini-v1", true, true, 1_000_000),
        model("google:gemini-1.5-pro", "google", "google-gemini-v1", true, true, 2_000_000),
        model("xai:grok-3", "xai", "xai-v1", true, false, 131_072),
        model("xai:grok-3-mini", "xai", "xai-v1", true, false, 131_072),
    ]
}

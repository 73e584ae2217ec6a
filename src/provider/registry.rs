// ABOUTME: Provider registry — builds the configured adapters and resolves a model id to one.
// ABOUTME: Lookup order: model catalog, model-name prefix, then the first registered backend.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{AnthropicProvider, OllamaProvider, OpenAiProvider, Provider, ProviderKind};
use crate::config::LlmConfig;

/// Fallback prefix matching for models missing from the catalog.
const MODEL_PREFIXES: &[(&str, ProviderKind)] = &[
    ("claude-", ProviderKind::Anthropic),
    ("gpt-", ProviderKind::OpenAi),
    ("o1", ProviderKind::OpenAi),
    ("o3", ProviderKind::OpenAi),
    ("o4", ProviderKind::OpenAi),
];

/// A model catalog entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelEntry {
    pub provider: ProviderKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error(
        "No provider available for model \"{model}\". Configure an API key in the config file or environment variables."
    )]
    NoProvider { model: String },
}

/// The set of reachable backends plus the model catalog.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: BTreeMap<ProviderKind, Arc<dyn Provider>>,
    models: BTreeMap<String, ModelEntry>,
}

impl ProviderRegistry {
    pub fn new(models: BTreeMap<String, ModelEntry>) -> Self {
        Self {
            providers: BTreeMap::new(),
            models,
        }
    }

    /// Register adapters for every backend the config can reach.
    ///
    /// Keyed backends need a credential; Ollama is local and always registered.
    pub fn from_config(config: &LlmConfig) -> Self {
        let mut registry = Self::new(config.models.clone());

        if let Some(key) = config.anthropic_api_key.as_deref().filter(|k| !k.is_empty()) {
            let mut provider = AnthropicProvider::new(key);
            if let Some(url) = config.anthropic_base_url.as_deref().filter(|s| !s.is_empty()) {
                provider = provider.with_base_url(url);
            }
            registry.register(Arc::new(provider));
        }
        if let Some(key) = config.openai_api_key.as_deref().filter(|k| !k.is_empty()) {
            let mut provider = OpenAiProvider::new(key);
            if let Some(url) = config.openai_base_url.as_deref().filter(|s| !s.is_empty()) {
                provider = provider.with_base_url(url);
            }
            registry.register(Arc::new(provider));
        }
        registry.register(Arc::new(OllamaProvider::new(Some(&config.ollama_host))));

        tracing::debug!(providers = ?registry.list(), "provider registry built");
        registry
    }

    /// Add or replace the adapter for its backend.
    pub fn register(&mut self, provider: Arc<dyn Provider>) {
        self.providers.insert(provider.kind(), provider);
    }

    pub fn get(&self, kind: ProviderKind) -> Option<Arc<dyn Provider>> {
        self.providers.get(&kind).cloned()
    }

    /// Resolve the adapter that should serve `model`.
    pub fn for_model(&self, model: &str) -> Result<Arc<dyn Provider>, ProviderError> {
        if let Some(provider) = self
            .models
            .get(model)
            .and_then(|entry| self.providers.get(&entry.provider))
        {
            return Ok(provider.clone());
        }

        for (prefix, kind) in MODEL_PREFIXES {
            if model.starts_with(prefix) {
                if let Some(provider) = self.providers.get(kind) {
                    return Ok(provider.clone());
                }
            }
        }

        ProviderKind::ALL
            .iter()
            .find_map(|kind| self.providers.get(kind).cloned())
            .ok_or_else(|| ProviderError::NoProvider {
                model: model.to_string(),
            })
    }

    pub fn model_entry(&self, model: &str) -> Option<&ModelEntry> {
        self.models.get(model)
    }

    /// Catalog grouped by backend as `(model id, label)` pairs.
    pub fn catalog(&self) -> BTreeMap<ProviderKind, Vec<(String, String)>> {
        let mut grouped: BTreeMap<ProviderKind, Vec<(String, String)>> = BTreeMap::new();
        for (id, entry) in &self.models {
            let label = entry.label.clone().unwrap_or_else(|| id.clone());
            grouped
                .entry(entry.provider)
                .or_default()
                .push((id.clone(), label));
        }
        grouped
    }

    pub fn list(&self) -> Vec<ProviderKind> {
        self.providers.keys().copied().collect()
    }
}

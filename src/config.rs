// ABOUTME: Configuration loading for localclaw.
// ABOUTME: Reads ~/.localclaw/config.toml, .mcp.json, and environment overrides.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;
use thiserror::Error;

use crate::provider::{ModelEntry, ProviderKind};

/// Values that parse but can't be used.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("compaction.threshold_ratio must be in (0, 1], got {0}")]
    InvalidThresholdRatio(f64),
    #[error("compaction.keep_recent must be at least 1")]
    ZeroKeepRecent,
    #[error("llm.max_tokens must be greater than 0")]
    ZeroMaxTokens,
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub llm: LlmConfig,
    pub permissions: PermissionsConfig,
    pub compaction: CompactionConfig,
    pub mcp_servers: BTreeMap<String, McpServerConfig>,
}

/// LLM backend configuration and model catalog.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub default_model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub anthropic_api_key: Option<String>,
    pub anthropic_base_url: Option<String>,
    pub openai_api_key: Option<String>,
    pub openai_base_url: Option<String>,
    pub ollama_host: String,
    pub models: BTreeMap<String, ModelEntry>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            default_model: "claude-3-haiku-20240307".to_string(),
            max_tokens: 8192,
            temperature: 0.0,
            anthropic_api_key: None,
            anthropic_base_url: None,
            openai_api_key: None,
            openai_base_url: None,
            ollama_host: crate::provider::ollama::DEFAULT_HOST.to_string(),
            models: default_models(),
        }
    }
}

fn default_models() -> BTreeMap<String, ModelEntry> {
    let entries: &[(&str, ProviderKind, &str)] = &[
        ("claude-sonnet-4-20250514", ProviderKind::Anthropic, "Claude Sonnet 4"),
        ("claude-opus-4-20250514", ProviderKind::Anthropic, "Claude Opus 4"),
        ("claude-3-haiku-20240307", ProviderKind::Anthropic, "Claude Haiku 3"),
        ("gpt-4o", ProviderKind::OpenAi, "GPT-4o"),
        ("gpt-4o-mini", ProviderKind::OpenAi, "GPT-4o Mini"),
        ("o3", ProviderKind::OpenAi, "o3"),
        ("o4-mini", ProviderKind::OpenAi, "o4 Mini"),
        ("llama3", ProviderKind::Ollama, "Llama 3"),
        ("mistral", ProviderKind::Ollama, "Mistral"),
        ("codellama", ProviderKind::Ollama, "Code Llama"),
    ];
    entries
        .iter()
        .map(|(id, provider, label)| {
            (
                id.to_string(),
                ModelEntry {
                    provider: *provider,
                    label: Some(label.to_string()),
                    max_tokens: None,
                },
            )
        })
        .collect()
}

/// Timeouts around permission prompts and tool execution.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PermissionsConfig {
    pub approval_timeout_seconds: u64,
    pub tool_timeout_seconds: u64,
}

impl Default for PermissionsConfig {
    fn default() -> Self {
        Self {
            approval_timeout_seconds: 120,
            tool_timeout_seconds: 300,
        }
    }
}

/// When and how aggressively to summarize history.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CompactionConfig {
    pub enabled: bool,
    /// Fraction of the model's context window that triggers compression.
    pub threshold_ratio: f64,
    /// Messages kept verbatim after compression.
    pub keep_recent: usize,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold_ratio: 0.8,
            keep_recent: crate::agent::compaction::DEFAULT_KEEP_RECENT,
        }
    }
}

/// One external tool server process.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct McpServerConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// MCP server configuration from .mcp.json.
#[derive(Debug, Deserialize)]
struct McpConfigFile {
    #[serde(rename = "mcpServers", default)]
    mcp_servers: BTreeMap<String, McpServerConfig>,
}

impl Config {
    /// Load config from ~/.localclaw/config.toml and apply environment overrides.
    pub fn load() -> anyhow::Result<Self> {
        let mut config = Self::load_from(&Self::config_path())?;
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load from an explicit path, falling back to defaults when it's absent.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("invalid config file {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("invalid config file {}", path.display()))?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let ratio = self.compaction.threshold_ratio;
        if !(ratio > 0.0 && ratio <= 1.0) {
            return Err(ConfigError::InvalidThresholdRatio(ratio));
        }
        if self.compaction.keep_recent == 0 {
            return Err(ConfigError::ZeroKeepRecent);
        }
        if self.llm.max_tokens == 0 {
            return Err(ConfigError::ZeroMaxTokens);
        }
        Ok(())
    }

    /// Environment variables take precedence over file values.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.is_empty());
        if let Some(key) = non_empty("ANTHROPIC_API_KEY") {
            self.llm.anthropic_api_key = Some(key);
        }
        if let Some(key) = non_empty("OPENAI_API_KEY") {
            self.llm.openai_api_key = Some(key);
        }
        if let Some(host) = non_empty("OLLAMA_HOST") {
            self.llm.ollama_host = host;
        }
        if let Some(model) = non_empty("DEFAULT_MODEL") {
            self.llm.default_model = model;
        }
    }

    /// Max tokens for `model`: catalog override or the global default.
    pub fn max_tokens_for(&self, model: &str) -> u32 {
        self.llm
            .models
            .get(model)
            .and_then(|m| m.max_tokens)
            .unwrap_or(self.llm.max_tokens)
    }

    /// Config servers merged with .mcp.json servers; config-file entries win on name clashes.
    pub fn all_mcp_servers(&self) -> anyhow::Result<BTreeMap<String, McpServerConfig>> {
        let mut servers = load_mcp_configs()?;
        servers.extend(self.mcp_servers.clone());
        Ok(servers)
    }

    pub fn base_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".localclaw")
    }

    /// Path to the config file.
    pub fn config_path() -> PathBuf {
        Self::base_dir().join("config.toml")
    }

    /// Directory holding saved conversation sessions.
    pub fn sessions_dir() -> PathBuf {
        Self::base_dir().join("sessions")
    }
}

/// Load MCP server configs from .mcp.json.
pub fn load_mcp_configs() -> anyhow::Result<BTreeMap<String, McpServerConfig>> {
    let Some(path) = find_mcp_config() else {
        return Ok(BTreeMap::new());
    };
    parse_mcp_file(&path)
}

fn parse_mcp_file(path: &Path) -> anyhow::Result<BTreeMap<String, McpServerConfig>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let config: McpConfigFile = serde_json::from_str(&content)
        .with_context(|| format!("invalid MCP config {}", path.display()))?;
    Ok(config.mcp_servers)
}

fn find_mcp_config() -> Option<PathBuf> {
    let local = PathBuf::from(".mcp.json");
    if local.exists() {
        return Some(local);
    }

    if let Some(home) = dirs::home_dir() {
        let global = home.join(".mcp.json");
        if global.exists() {
            return Some(global);
        }
    }

    None
}

//! Configuration loading, validation, and management for Codeforge.
//!
//! Loads configuration from `~/.codeforge/config.toml` with environment
//! variable overrides. Validates all settings at startup. Credentials can
//! additionally be loaded from a plain-text key file, one key per line.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.codeforge/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key. Additional keys can come from the credentials file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Base URL of the OpenAI-compatible endpoint
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Default model
    #[serde(default = "default_model")]
    pub model: String,

    /// Default temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens per LLM response (also the budgeter's output reserve)
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Total context window of the model, in tokens
    #[serde(default = "default_max_context")]
    pub max_context: usize,

    /// Agent loop settings
    #[serde(default)]
    pub agent: AgentConfig,

    /// Context retrieval settings
    #[serde(default)]
    pub context: ContextConfig,
}

fn default_base_url() -> String {
    "https://openrouter.ai/api/v1".into()
}
fn default_model() -> String {
    "qwen/qwen3-coder".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    8192
}
fn default_max_context() -> usize {
    262_144
}
fn default_true() -> bool {
    true
}

fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_context", &self.max_context)
            .field("agent", &self.agent)
            .field("context", &self.context)
            .finish()
    }
}

/// Agent loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Hard cap on assistant turns per task
    #[serde(default = "default_step_cap")]
    pub step_cap: u32,

    /// Maximum provider attempts per request (including the first)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Whether to stream responses
    #[serde(default = "default_true")]
    pub streaming: bool,
}

fn default_step_cap() -> u32 {
    50
}
fn default_max_attempts() -> u32 {
    5
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            step_cap: default_step_cap(),
            max_attempts: default_max_attempts(),
            streaming: true,
        }
    }
}

/// Context retrieval settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Files always included whole in the assembled context
    #[serde(default)]
    pub mandatory_files: Vec<String>,

    /// Files included when the budget allows, ranked by relevance
    #[serde(default)]
    pub optional_files: Vec<String>,

    /// Per-file cap on index tokens
    #[serde(default = "default_max_index_tokens")]
    pub max_index_tokens: usize,

    /// Per-file cap on bytes read while indexing
    #[serde(default = "default_max_read_bytes")]
    pub max_read_bytes: u64,
}

fn default_max_index_tokens() -> usize {
    800
}
fn default_max_read_bytes() -> u64 {
    200_000
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            mandatory_files: vec![],
            optional_files: vec![],
            max_index_tokens: default_max_index_tokens(),
            max_read_bytes: default_max_read_bytes(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.codeforge/config.toml).
    ///
    /// Also checks environment variables:
    /// - `CODEFORGE_API_KEY` (falls back to `OPENROUTER_API_KEY`, then
    ///   `OPENAI_API_KEY`)
    /// - `CODEFORGE_BASE_URL`
    /// - `CODEFORGE_MODEL`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;

        // Environment variable overrides (highest priority)
        if let Ok(key) = std::env::var("CODEFORGE_API_KEY") {
            config.api_key = Some(key);
        } else if config.api_key.is_none() {
            config.api_key = std::env::var("OPENROUTER_API_KEY")
                .ok()
                .or_else(|| std::env::var("OPENAI_API_KEY").ok());
        }

        if let Ok(url) = std::env::var("CODEFORGE_BASE_URL") {
            config.base_url = url;
        }

        if let Ok(model) = std::env::var("CODEFORGE_MODEL") {
            config.model = model;
        }

        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".codeforge")
    }

    /// All API credentials, in rotation order.
    ///
    /// The key file (~/.codeforge/credentials) contributes one key per
    /// line; the configured/env key, if present, comes first.
    pub fn credentials(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.api_key.iter().cloned().collect();
        let file = Self::config_dir().join("credentials");
        keys.extend(load_key_file(&file));
        keys
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.temperature < 0.0 || self.temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.max_context == 0 {
            return Err(ConfigError::ValidationError(
                "max_context must be greater than 0".into(),
            ));
        }

        if self.max_tokens as usize >= self.max_context {
            return Err(ConfigError::ValidationError(
                "max_tokens must be smaller than max_context".into(),
            ));
        }

        if self.agent.step_cap == 0 {
            return Err(ConfigError::ValidationError(
                "agent.step_cap must be greater than 0".into(),
            ));
        }

        if self.agent.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_attempts must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Generate a default config TOML string (for first-run onboarding).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_base_url(),
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            max_context: default_max_context(),
            agent: AgentConfig::default(),
            context: ContextConfig::default(),
        }
    }
}

/// Parse a plain-text key file: one key per line, blank lines and lines
/// starting with '#' skipped. A missing file yields no keys.
pub fn load_key_file(path: &Path) -> Vec<String> {
    let Ok(content) = std::fs::read_to_string(path) else {
        return vec![];
    };
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(String::from)
        .collect()
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

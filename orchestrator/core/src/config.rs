//! Orchestrator Configuration
//!
//! Loaded from a TOML file under the user config directory, overridable
//! through environment variables, with builder-style setters for embedders
//! that configure in code.
//!
//! Precedence: defaults < config file < environment < explicit setters.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

const CONFIG_DIR: &str = "chat-orchestrator";
const CONFIG_FILE: &str = "config.toml";

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file exists but could not be read
    #[error("failed to read config file {path}: {source}")]
    Read {
        /// Offending path
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Config file is not valid TOML
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        /// Offending path
        path: PathBuf,
        /// Underlying TOML error
        #[source]
        source: toml::de::Error,
    },
}

/// Tunable parameters of the orchestration core
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Model identifier sent to the backend
    pub model: String,
    /// Sampling temperature
    pub temperature: f32,
    /// API key; usually supplied via `OPENAI_API_KEY` instead
    pub api_key: Option<String>,
    /// Custom API base URL (proxies, compatible servers)
    pub base_url: Option<String>,
    /// System prompt prepended to every request
    pub system_prompt: Option<String>,
    /// Hard cap on tool-driven continuations per user turn
    pub max_tool_iterations: u32,
    /// Per-subscriber fragment queue depth in the token pipeline
    pub pipeline_demand: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4".to_string(),
            temperature: 0.7,
            api_key: None,
            base_url: None,
            system_prompt: None,
            max_tool_iterations: 8,
            pipeline_demand: 64,
        }
    }
}

impl OrchestratorConfig {
    /// Load from the default config file, then apply environment overrides
    ///
    /// A missing config file is fine; defaults apply.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match Self::default_path() {
            Some(path) if path.exists() => Self::from_file(&path)?,
            _ => Self::default(),
        };
        config.apply_env();
        Ok(config)
    }

    /// Load from a specific TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Default config file location (`<config dir>/chat-orchestrator/config.toml`)
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(CONFIG_DIR).join(CONFIG_FILE))
    }

    /// Apply environment variable overrides
    fn apply_env(&mut self) {
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            if !key.is_empty() {
                self.api_key = Some(key);
            }
        }
        if let Ok(url) = std::env::var("OPENAI_BASE_URL") {
            if !url.is_empty() {
                self.base_url = Some(url);
            }
        }
        if let Ok(model) = std::env::var("ORCHESTRATOR_MODEL") {
            if !model.is_empty() {
                self.model = model;
            }
        }
    }

    /// Set the model
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set the temperature
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature.clamp(0.0, 2.0);
        self
    }

    /// Set the system prompt
    #[must_use]
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Set the tool-iteration cap
    #[must_use]
    pub fn with_max_tool_iterations(mut self, max: u32) -> Self {
        self.max_tool_iterations = max.max(1);
        self
    }
}

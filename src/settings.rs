//! Configuration loading
//!
//! Handles loading configuration from embedded defaults, files, and environment.

use anyhow::{Context, Result};
use config::{Config, Environment, File, FileFormat};
use parley_core::EngineConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Embedded default configuration (compiled into binary)
pub const DEFAULT_CONFIG: &str = include_str!("../config/default.toml");

/// Binary configuration: the engine sections plus the local processor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSettings {
    /// Engine configuration
    #[serde(flatten)]
    pub engine: EngineConfig,
    /// Local model endpoint for confidential prompts
    #[serde(default)]
    pub local: LocalSettings,
}

/// Local model endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalSettings {
    /// Route confidential prompts to the local model
    #[serde(default = "default_local_enabled")]
    pub enabled: bool,
    /// Ollama base URL
    #[serde(default = "default_local_url")]
    pub base_url: String,
    /// Model name
    #[serde(default = "default_local_model")]
    pub model: String,
    /// Request timeout, in seconds
    #[serde(default = "default_local_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LocalSettings {
    fn default() -> Self {
        Self {
            enabled: default_local_enabled(),
            base_url: default_local_url(),
            model: default_local_model(),
            timeout_secs: default_local_timeout_secs(),
        }
    }
}

impl LocalSettings {
    /// Request timeout
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_local_enabled() -> bool {
    true
}

fn default_local_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_local_model() -> String {
    "llama3.2".to_string()
}

fn default_local_timeout_secs() -> u64 {
    120
}

/// Load configuration from files and environment
pub fn load_settings(explicit: Option<&Path>) -> Result<AppSettings> {
    let mut builder = Config::builder()
        // 1. Embedded defaults (always available)
        .add_source(File::from_str(DEFAULT_CONFIG, FileFormat::Toml))
        // 2. Local overrides (optional)
        .add_source(File::with_name("config/local").required(false));

    // 3. Explicit file
    if let Some(path) = explicit {
        builder = builder.add_source(File::from(path).required(true));
    }

    // 4. Environment variables (highest priority), PARLEY_DISPATCH__MAX_RETRIES style
    let config = builder
        .add_source(
            Environment::with_prefix("PARLEY")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .context("Failed to build configuration")?;

    let settings: AppSettings = config
        .try_deserialize()
        .context("Failed to deserialize configuration")?;
    settings
        .engine
        .validate()
        .context("Invalid engine configuration")?;
    Ok(settings)
}

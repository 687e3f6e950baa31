//! TOML Configuration File Support
//!
//! Centralized configuration loading, from a TOML file at
//! `~/.config/switchboard/switchboard.toml`.
//!
//! # Configuration Priority
//!
//! Configuration values are loaded with the following priority (highest first):
//! 1. CLI arguments (via [`ConfigOverrides`])
//! 2. Environment variables
//! 3. TOML configuration file
//! 4. Default values
//!
//! # Example Configuration
//!
//! ```toml
//! [backend]
//! base_url = "http://127.0.0.1:11434/v1"
//! api_key = "ollama"
//! request_timeout_secs = 600
//!
//! [router]
//! model = "qwen3:1.7b"
//! timeout_secs = 30
//! continuation_phrases = ["more like that"]
//!
//! [server]
//! listen = "127.0.0.1:11435"
//! channel_capacity = 64
//!
//! # First entry is the default specialist
//! [[specialists]]
//! name = "chat"
//! description = "General conversation"
//! model = "qwen3:latest"
//! temperature = 0.3
//! ```
//!
//! # Environment Variables
//!
//! | Variable | Overrides |
//! |---|---|
//! | `SWITCHBOARD_LLM_BASE_URL` | `backend.base_url` |
//! | `SWITCHBOARD_LLM_API_KEY` | `backend.api_key` |
//! | `SWITCHBOARD_LLM_TIMEOUT` | `backend.request_timeout_secs` |
//! | `SWITCHBOARD_ROUTE_MODEL` | `router.model` |
//! | `SWITCHBOARD_ROUTE_TIMEOUT` | `router.timeout_secs` |
//! | `SWITCHBOARD_LISTEN` | `server.listen` |

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::pipeline::PipelineConfig;
use crate::routing::RouterConfig;
use crate::specialist::LlmSpecialistConfig;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Tracks where a configuration value came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from command-line argument
    Cli,
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Default value
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// Backend section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendToml {
    /// OpenAI-compatible base URL
    pub base_url: Option<String>,

    /// Bearer token
    pub api_key: Option<String>,

    /// Request timeout in seconds
    pub request_timeout_secs: Option<u64>,
}

/// Router section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterToml {
    /// Classifier model
    pub model: Option<String>,

    /// Classifier timeout in seconds
    pub timeout_secs: Option<u64>,

    /// Extra continuation phrases
    pub continuation_phrases: Option<Vec<String>>,
}

/// Server section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerToml {
    /// Listen address, `host:port`
    pub listen: Option<String>,

    /// Frame buffer per request
    pub channel_capacity: Option<usize>,
}

/// One `[[specialists]]` entry
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SpecialistToml {
    /// Routing name
    pub name: String,

    /// Capability description for the classifier
    #[serde(default)]
    pub description: String,

    /// Backend model
    pub model: String,

    /// System prompt
    #[serde(default)]
    pub system_prompt: Option<String>,

    /// Sampling temperature
    #[serde(default)]
    pub temperature: Option<f32>,
}

/// Root TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SwitchboardToml {
    /// Backend configuration
    pub backend: BackendToml,

    /// Router configuration
    pub router: RouterToml,

    /// Server configuration
    pub server: ServerToml,

    /// Specialists, default first
    pub specialists: Vec<SpecialistToml>,
}

// =============================================================================
// Resolved Configuration
// =============================================================================

/// Chat-model backend settings
#[derive(Clone, Debug, PartialEq)]
pub struct BackendConfig {
    /// OpenAI-compatible base URL
    pub base_url: String,
    /// Bearer token; empty disables the header
    pub api_key: String,
    /// Per-request timeout
    pub request_timeout: Duration,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:11434/v1".to_string(),
            api_key: "ollama".to_string(),
            request_timeout: Duration::from_secs(600),
        }
    }
}

/// HTTP surface settings
#[derive(Clone, Debug, PartialEq)]
pub struct ServerConfig {
    /// Listen address
    pub listen: SocketAddr,
    /// Frame buffer per request
    pub channel_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 11435)),
            channel_capacity: PipelineConfig::default().channel_capacity,
        }
    }
}

/// Specialists used when the file configures none
#[must_use]
pub fn builtin_specialists() -> Vec<LlmSpecialistConfig> {
    vec![
        LlmSpecialistConfig {
            name: "chat".to_string(),
            description: "General conversation, questions, writing and anything uncertain"
                .to_string(),
            model: "qwen3:latest".to_string(),
            system_prompt: Some(
                "You are a friendly personal assistant. Answer clearly and concisely.".to_string(),
            ),
            temperature: 0.3,
        },
        LlmSpecialistConfig {
            name: "vision".to_string(),
            description: "Understanding and describing images, photos and screenshots".to_string(),
            model: "qwen3-vl:4b".to_string(),
            system_prompt: Some(
                "You are a visual assistant. Describe and analyse the images you are given."
                    .to_string(),
            ),
            temperature: 0.2,
        },
        LlmSpecialistConfig {
            name: "code".to_string(),
            description: "Writing, explaining, reviewing and debugging code".to_string(),
            model: "qwen3-coder-plus".to_string(),
            system_prompt: Some(
                "You are a senior software engineer. Prefer working code over prose.".to_string(),
            ),
            temperature: 0.1,
        },
    ]
}

/// Centralized configuration for switchboard
///
/// Use [`load_config`] to load configuration with proper priority handling.
#[derive(Clone, Debug)]
pub struct SwitchboardConfig {
    /// Backend configuration
    pub backend: BackendConfig,

    /// Router configuration
    pub router: RouterConfig,

    /// Server configuration
    pub server: ServerConfig,

    /// Specialists, default first
    pub specialists: Vec<LlmSpecialistConfig>,

    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,

    /// Source of configuration values
    source: ConfigSource,
}

impl Default for SwitchboardConfig {
    fn default() -> Self {
        Self {
            backend: BackendConfig::default(),
            router: RouterConfig::default(),
            server: ServerConfig::default(),
            specialists: builtin_specialists(),
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl SwitchboardConfig {
    /// Create a new configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the primary source of this configuration
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Set the configuration source
    pub fn set_source(&mut self, source: ConfigSource) {
        self.source = source;
    }

    /// Pipeline settings derived from the server section
    #[must_use]
    pub fn pipeline(&self) -> PipelineConfig {
        PipelineConfig {
            channel_capacity: self.server.channel_capacity,
            ..PipelineConfig::default()
        }
    }

    /// Check values that would make the process useless
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] describing the first problem.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::ValidationError(msg));

        if self.backend.base_url.trim().is_empty() {
            return invalid("backend.base_url is empty".to_string());
        }
        if self.backend.request_timeout.is_zero() {
            return invalid("backend.request_timeout_secs must be positive".to_string());
        }
        if self.router.model.trim().is_empty() {
            return invalid("router.model is empty".to_string());
        }
        if self.router.timeout.is_zero() {
            return invalid("router.timeout_secs must be positive".to_string());
        }
        if self.server.channel_capacity == 0 {
            return invalid("server.channel_capacity must be positive".to_string());
        }
        if self.specialists.is_empty() {
            return invalid("no specialists configured".to_string());
        }

        for (i, specialist) in self.specialists.iter().enumerate() {
            if specialist.name.trim().is_empty() {
                return invalid(format!("specialist #{i} has an empty name"));
            }
            if specialist.model.trim().is_empty() {
                return invalid(format!("specialist {} has an empty model", specialist.name));
            }
            if self.specialists[..i]
                .iter()
                .any(|earlier| earlier.name == specialist.name)
            {
                return invalid(format!("duplicate specialist name: {}", specialist.name));
            }
        }

        Ok(())
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/switchboard/switchboard.toml` or
/// `~/.config/switchboard/switchboard.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("switchboard").join("switchboard.toml"))
}

/// Load configuration from all sources with proper priority
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed, or if
/// the result does not validate. A missing config file is not an error.
pub fn load_config() -> Result<SwitchboardConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path
///
/// # Arguments
///
/// * `path` - Optional path to the configuration file. If `None`, only defaults
///   and environment variables are used.
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed, or
/// if the result does not validate.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<SwitchboardConfig, ConfigError> {
    let mut config = SwitchboardConfig::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: SwitchboardToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, &toml_config)?;
            config.config_file_path = Some(config_path.clone());
            config.source = ConfigSource::File;

            tracing::info!(
                path = %config_path.display(),
                specialists = config.specialists.len(),
                "Loaded configuration from file"
            );
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    apply_env_config(&mut config, |key| std::env::var(key).ok());
    config.validate()?;

    Ok(config)
}

/// Apply TOML configuration values to the config struct
fn apply_toml_config(
    config: &mut SwitchboardConfig,
    toml: &SwitchboardToml,
) -> Result<(), ConfigError> {
    if let Some(ref url) = toml.backend.base_url {
        config.backend.base_url.clone_from(url);
    }
    if let Some(ref key) = toml.backend.api_key {
        config.backend.api_key.clone_from(key);
    }
    if let Some(secs) = toml.backend.request_timeout_secs {
        config.backend.request_timeout = Duration::from_secs(secs);
    }

    if let Some(ref model) = toml.router.model {
        config.router.model.clone_from(model);
    }
    if let Some(secs) = toml.router.timeout_secs {
        config.router.timeout = Duration::from_secs(secs);
    }
    if let Some(ref phrases) = toml.router.continuation_phrases {
        config.router.continuation_phrases.clone_from(phrases);
    }

    if let Some(ref listen) = toml.server.listen {
        config.server.listen = listen.parse().map_err(|e| {
            ConfigError::ValidationError(format!("server.listen {listen:?}: {e}"))
        })?;
    }
    if let Some(capacity) = toml.server.channel_capacity {
        config.server.channel_capacity = capacity;
    }

    if !toml.specialists.is_empty() {
        config.specialists = toml
            .specialists
            .iter()
            .map(|entry| LlmSpecialistConfig {
                name: entry.name.clone(),
                description: entry.description.clone(),
                model: entry.model.clone(),
                system_prompt: entry.system_prompt.clone(),
                temperature: entry.temperature.unwrap_or(0.3),
            })
            .collect();
    }

    Ok(())
}

/// Apply environment overrides, reading variables through `lookup`
fn apply_env_config<F>(config: &mut SwitchboardConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    // Backend settings from environment
    if let Some(url) = lookup("SWITCHBOARD_LLM_BASE_URL") {
        config.backend.base_url = url;
        config.source = ConfigSource::Env;
    }
    if let Some(key) = lookup("SWITCHBOARD_LLM_API_KEY") {
        config.backend.api_key = key;
        config.source = ConfigSource::Env;
    }
    if let Some(timeout) = env_secs(&lookup, "SWITCHBOARD_LLM_TIMEOUT") {
        config.backend.request_timeout = timeout;
        config.source = ConfigSource::Env;
    }

    // Router settings from environment
    if let Some(model) = lookup("SWITCHBOARD_ROUTE_MODEL") {
        config.router.model = model;
        config.source = ConfigSource::Env;
    }
    if let Some(timeout) = env_secs(&lookup, "SWITCHBOARD_ROUTE_TIMEOUT") {
        config.router.timeout = timeout;
        config.source = ConfigSource::Env;
    }

    // Server settings from environment
    if let Some(listen) = lookup("SWITCHBOARD_LISTEN") {
        match listen.parse::<SocketAddr>() {
            Ok(addr) => {
                config.server.listen = addr;
                config.source = ConfigSource::Env;
            }
            Err(e) => {
                tracing::warn!(value = %listen, error = %e, "Ignoring invalid SWITCHBOARD_LISTEN");
            }
        }
    }
}

/// Whole seconds from `name`; an unparseable value is logged and ignored
fn env_secs<F>(lookup: &F, name: &str) -> Option<Duration>
where
    F: Fn(&str) -> Option<String>,
{
    let value = lookup(name)?;
    match value.trim().parse::<u64>() {
        Ok(secs) => Some(Duration::from_secs(secs)),
        Err(e) => {
            tracing::warn!(var = name, value = %value, error = %e, "Ignoring invalid timeout");
            None
        }
    }
}

// =============================================================================
// CLI Overrides
// =============================================================================

/// Builder for applying CLI overrides to configuration
///
/// Use this after [`load_config`] to apply command-line argument overrides.
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Listen address override
    pub listen: Option<SocketAddr>,

    /// Classifier model override
    pub route_model: Option<String>,
}

impl ConfigOverrides {
    /// Create a new empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set listen address override
    #[must_use]
    pub fn with_listen(mut self, listen: SocketAddr) -> Self {
        self.listen = Some(listen);
        self
    }

    /// Set classifier model override
    #[must_use]
    pub fn with_route_model(mut self, model: String) -> Self {
        self.route_model = Some(model);
        self
    }

    /// Apply overrides to a configuration
    pub fn apply(&self, config: &mut SwitchboardConfig) {
        if self.listen.is_some() || self.route_model.is_some() {
            config.source = ConfigSource::Cli;
        }

        if let Some(listen) = self.listen {
            config.server.listen = listen;
        }

        if let Some(ref model) = self.route_model {
            config.router.model.clone_from(model);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

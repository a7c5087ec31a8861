//! Configuration loading, validation, and management for Vitalis.
//!
//! Loads configuration from a TOML file (by convention
//! `~/.vitalis/config.toml`) with environment variable overrides.
//! Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tracing::debug;

/// The root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// Reasoning-loop settings
    #[serde(default)]
    pub engine: EngineConfig,

    /// HTTP gateway settings
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Streaming persistence buffer settings
    #[serde(default)]
    pub persistence: PersistenceConfig,

    /// State tracker eviction settings
    #[serde(default)]
    pub tracking: TrackingConfig,
}

/// Reasoning-action loop engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum reasoning iterations per turn.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Maximum scratchpad entries kept in the prompt.
    #[serde(default = "default_scratchpad_max_entries")]
    pub scratchpad_max_entries: usize,
}

fn default_max_iterations() -> u32 {
    8
}
fn default_scratchpad_max_entries() -> usize {
    12
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            scratchpad_max_entries: default_scratchpad_max_entries(),
        }
    }
}

/// HTTP gateway and stream transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Heartbeat frame interval for live subscribers.
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,

    /// Subscribers idle longer than this are closed.
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
}

fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_port() -> u16 {
    8420
}
fn default_heartbeat_secs() -> u64 {
    15
}
fn default_idle_timeout_secs() -> u64 {
    300
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            heartbeat_secs: default_heartbeat_secs(),
            idle_timeout_secs: default_idle_timeout_secs(),
        }
    }
}

/// Streaming persistence buffer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Safety-net flush interval for buffers that missed a terminal event.
    #[serde(default = "default_flush_interval_secs")]
    pub flush_interval_secs: u64,
}

fn default_flush_interval_secs() -> u64 {
    60
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            flush_interval_secs: default_flush_interval_secs(),
        }
    }
}

/// Grace windows for the state trackers' garbage collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingConfig {
    /// How long a terminal tool-call record remains visible to late reads.
    #[serde(default = "default_tool_record_grace_secs")]
    pub tool_record_grace_secs: u64,

    /// How long a completed conversation remains available for lookups.
    #[serde(default = "default_conversation_grace_secs")]
    pub conversation_grace_secs: u64,
}

fn default_tool_record_grace_secs() -> u64 {
    30
}
fn default_conversation_grace_secs() -> u64 {
    1800
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            tool_record_grace_secs: default_tool_record_grace_secs(),
            conversation_grace_secs: default_conversation_grace_secs(),
        }
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl AppConfig {
    /// Load from a TOML file, then apply environment overrides and validate.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let mut config: AppConfig = toml::from_str(&raw)?;
        config.apply_env_overrides();
        config.validate()?;
        debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Defaults plus environment overrides (for running without a file).
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = AppConfig::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// `VITALIS_*` environment variables override file values.
    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("VITALIS_HOST") {
            self.gateway.host = host;
        }
        if let Ok(port) = std::env::var("VITALIS_PORT")
            && let Ok(port) = port.parse()
        {
            self.gateway.port = port;
        }
        if let Ok(max) = std::env::var("VITALIS_MAX_ITERATIONS")
            && let Ok(max) = max.parse()
        {
            self.engine.max_iterations = max;
        }
    }

    /// Reject configurations that cannot work.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.engine.max_iterations == 0 {
            return Err(ConfigError::Invalid(
                "engine.max_iterations must be at least 1".into(),
            ));
        }
        if self.engine.scratchpad_max_entries == 0 {
            return Err(ConfigError::Invalid(
                "engine.scratchpad_max_entries must be at least 1".into(),
            ));
        }
        if self.gateway.heartbeat_secs == 0 {
            return Err(ConfigError::Invalid(
                "gateway.heartbeat_secs must be at least 1".into(),
            ));
        }
        if self.gateway.idle_timeout_secs < self.gateway.heartbeat_secs {
            return Err(ConfigError::Invalid(
                "gateway.idle_timeout_secs must be >= gateway.heartbeat_secs".into(),
            ));
        }
        if self.persistence.flush_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "persistence.flush_interval_secs must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

//! Configuration module for the Arnold gateway
//!
//! This module handles server configuration from various sources: .env files, YAML files,
//! and environment variables. Priority: YAML > ENV vars > .env values > defaults.
//!
//! # Modules
//! - `yaml`: YAML configuration file loading
//! - `env`: Environment variable loading
//! - `merge`: Applying YAML overrides on top of the environment
//!
//! # Example
//! ```rust,no_run
//! use arnold_gateway::config::ServerConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = ServerConfig::from_env()?;
//!
//! // Load from YAML file with environment variable overrides
//! let config_path = PathBuf::from("config.yaml");
//! let config = ServerConfig::from_file(&config_path)?;
//!
//! println!("Server listening on {}", config.address());
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

mod env;
mod merge;
mod yaml;

pub use yaml::YamlConfig;

use crate::core::realtime::{
    BufferConfig, DEFAULT_INSTRUCTIONS, HeartbeatConfig, RealtimeConfig, ReconnectPolicy,
};

/// Configuration loading and validation errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {message}")]
    ReadFile { path: String, message: String },

    #[error("Failed to parse YAML config: {0}")]
    Parse(String),

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Default model for realtime sessions
pub const DEFAULT_REALTIME_MODEL: &str = "gpt-4o-realtime-preview";

/// Default voice for realtime sessions
pub const DEFAULT_REALTIME_VOICE: &str = "alloy";

/// Server configuration
///
/// Contains all configuration needed to run the gateway:
/// - Server settings (host, port, CORS)
/// - OpenAI Realtime settings (API key, model, voice, instructions)
/// - Session tuning (reconnect policy, heartbeat, jitter buffers, dedup cache)
/// - The workout service used by function calls and the `/workouts` API
#[derive(Debug, Clone)]
pub struct ServerConfig {
    // Server settings
    pub host: String,
    pub port: u16,
    /// Comma-separated allowed origins, or "*"
    pub cors_allowed_origins: Option<String>,

    // OpenAI Realtime
    pub openai_api_key: Option<String>,
    pub openai_model: String,
    pub openai_voice: String,
    pub openai_instructions: Option<String>,
    /// Override of the realtime endpoint (ws:// or wss://)
    pub openai_url: Option<String>,

    // Session tuning
    pub reconnect: ReconnectPolicy,
    pub heartbeat: HeartbeatConfig,
    pub buffer: BufferConfig,
    pub dedup_cache_capacity: u64,

    // Workout records
    /// Remote workout service; records are kept in memory when unset
    pub workouts_service_url: Option<String>,
    pub workouts_timeout_seconds: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3001,
            cors_allowed_origins: None,
            openai_api_key: None,
            openai_model: DEFAULT_REALTIME_MODEL.to_string(),
            openai_voice: DEFAULT_REALTIME_VOICE.to_string(),
            openai_instructions: None,
            openai_url: None,
            reconnect: ReconnectPolicy::default(),
            heartbeat: HeartbeatConfig::default(),
            buffer: BufferConfig::default(),
            dedup_cache_capacity: RealtimeConfig::default().dedup_cache_capacity,
            workouts_service_url: None,
            workouts_timeout_seconds: 10,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables only.
    ///
    /// The .env file is loaded in main.rs at startup, so its values are visible here
    /// unless overridden by actual environment variables.
    pub fn from_env() -> ConfigResult<Self> {
        let config = env::from_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file with environment variable base
    ///
    /// Priority order (highest to lowest):
    /// 1. YAML file values
    /// 2. Environment variables (actual ENV vars override .env values)
    /// 3. .env file values
    /// 4. Default values
    ///
    /// After loading and merging, performs validation on the final configuration.
    pub fn from_file(path: &PathBuf) -> ConfigResult<Self> {
        let yaml_config = YamlConfig::from_file(path)?;
        let config = merge::merge_config(env::from_env()?, yaml_config);
        config.validate()?;
        Ok(config)
    }

    /// Get the server address as a string
    ///
    /// Returns the address in the format "host:port"
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn workouts_timeout(&self) -> Duration {
        Duration::from_secs(self.workouts_timeout_seconds)
    }

    /// Session configuration for a new realtime session.
    ///
    /// The API key may be empty; connecting then fails with a configuration error.
    pub fn realtime_config(&self) -> RealtimeConfig {
        RealtimeConfig {
            api_key: self.openai_api_key.clone().unwrap_or_default(),
            url: self.openai_url.clone(),
            model: self.openai_model.clone(),
            voice: Some(self.openai_voice.clone()),
            instructions: Some(
                self.openai_instructions
                    .clone()
                    .unwrap_or_else(|| DEFAULT_INSTRUCTIONS.to_string()),
            ),
            reconnect: self.reconnect.clone(),
            heartbeat: self.heartbeat.clone(),
            buffer: self.buffer.clone(),
            dedup_cache_capacity: self.dedup_cache_capacity,
            ..Default::default()
        }
    }

    pub fn has_openai_key(&self) -> bool {
        self.openai_api_key
            .as_deref()
            .is_some_and(|key| !key.trim().is_empty())
    }

    fn validate(&self) -> ConfigResult<()> {
        if self.port == 0 {
            return Err(ConfigError::Invalid("port must be non-zero".to_string()));
        }
        if let Some(url) = &self.workouts_service_url
            && url::Url::parse(url).is_err()
        {
            return Err(ConfigError::InvalidValue {
                key: "workouts.service_url".to_string(),
                value: url.clone(),
            });
        }
        self.realtime_config()
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))
    }
}

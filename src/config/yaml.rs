use serde::Deserialize;
use std::path::PathBuf;

use super::{ConfigError, ConfigResult};

/// Complete YAML configuration structure
///
/// This structure represents the full configuration that can be loaded from a YAML file.
/// All fields are optional to allow partial configuration. Values present here override
/// the environment.
///
/// # Example YAML structure
/// ```yaml
/// server:
///   host: "0.0.0.0"
///   port: 3001
///   cors_allowed_origins: "*"
///
/// openai:
///   api_key: "sk-..."
///   model: "gpt-4o-realtime-preview"
///   voice: "alloy"
///   instructions: "You are Arnold..."
///   url: "wss://api.openai.com/v1/realtime"
///
/// session:
///   reconnect:
///     max_retries: 5
///     initial_delay_ms: 1000
///     max_delay_ms: 60000
///     exponential_base: 2.0
///     jitter: false
///     connect_timeout_ms: 30000
///   heartbeat:
///     interval_ms: 30000
///     timeout_ms: 60000
///   buffer:
///     capacity_frames: 256
///     target_fill_ms: 100
///     low_water_ms: 20
///   dedup_cache_capacity: 10000
///
/// workouts:
///   service_url: "http://localhost:8000"
///   timeout_seconds: 10
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub server: Option<ServerYaml>,
    pub openai: Option<OpenAIYaml>,
    pub session: Option<SessionYaml>,
    pub workouts: Option<WorkoutsYaml>,
}

/// Server configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ServerYaml {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub cors_allowed_origins: Option<String>,
}

/// OpenAI Realtime configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct OpenAIYaml {
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub voice: Option<String>,
    pub instructions: Option<String>,
    pub url: Option<String>,
}

/// Session tuning from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SessionYaml {
    pub reconnect: Option<ReconnectYaml>,
    pub heartbeat: Option<HeartbeatYaml>,
    pub buffer: Option<BufferYaml>,
    pub dedup_cache_capacity: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ReconnectYaml {
    pub max_retries: Option<u32>,
    pub initial_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
    pub exponential_base: Option<f64>,
    pub jitter: Option<bool>,
    pub connect_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct HeartbeatYaml {
    pub interval_ms: Option<u64>,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct BufferYaml {
    pub capacity_frames: Option<usize>,
    pub target_fill_ms: Option<u64>,
    pub low_water_ms: Option<u64>,
    pub silence_frame_ms: Option<u64>,
    pub max_silence_frames: Option<u32>,
}

/// Workout service configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct WorkoutsYaml {
    pub service_url: Option<String>,
    pub timeout_seconds: Option<u64>,
}

impl YamlConfig {
    /// Load configuration from a YAML file
    ///
    /// # Errors
    /// Returns an error if:
    /// - The file cannot be read
    /// - The YAML is malformed
    /// - Required fields have invalid types
    pub fn from_file(path: &PathBuf) -> ConfigResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;

        serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_yaml_config_full() {
        let yaml = r#"
server:
  host: "localhost"
  port: 8000
  cors_allowed_origins: "*"

openai:
  api_key: "sk-yaml"
  model: "gpt-4o-realtime-preview"
  voice: "shimmer"

session:
  reconnect:
    max_retries: 3
    exponential_base: 1.5
  heartbeat:
    interval_ms: 15000
  buffer:
    capacity_frames: 64
  dedup_cache_capacity: 500

workouts:
  service_url: "http://workouts:8000"
  timeout_seconds: 5
"#;

        let config: YamlConfig = serde_yaml::from_str(yaml).unwrap();

        let server = config.server.unwrap();
        assert_eq!(server.host.as_deref(), Some("localhost"));
        assert_eq!(server.port, Some(8000));

        let openai = config.openai.unwrap();
        assert_eq!(openai.voice.as_deref(), Some("shimmer"));
        assert!(openai.instructions.is_none());

        let session = config.session.unwrap();
        let reconnect = session.reconnect.unwrap();
        assert_eq!(reconnect.max_retries, Some(3));
        assert_eq!(reconnect.exponential_base, Some(1.5));
        assert!(reconnect.initial_delay_ms.is_none());
        assert_eq!(session.heartbeat.unwrap().interval_ms, Some(15000));
        assert_eq!(session.buffer.unwrap().capacity_frames, Some(64));
        assert_eq!(session.dedup_cache_capacity, Some(500));

        let workouts = config.workouts.unwrap();
        assert_eq!(workouts.service_url.as_deref(), Some("http://workouts:8000"));
        assert_eq!(workouts.timeout_seconds, Some(5));
    }

    #[test]
    fn test_yaml_config_empty() {
        let config: YamlConfig = serde_yaml::from_str("{}").unwrap();
        assert!(config.server.is_none());
        assert!(config.openai.is_none());
        assert!(config.session.is_none());
        assert!(config.workouts.is_none());
    }

    #[test]
    fn test_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.yaml");

        fs::write(&config_path, "server:\n  host: \"localhost\"\n  port: 3000\n").unwrap();

        let config = YamlConfig::from_file(&config_path).unwrap();
        assert_eq!(
            config.server.as_ref().unwrap().host,
            Some("localhost".to_string())
        );
        assert_eq!(config.server.as_ref().unwrap().port, Some(3000));
    }

    #[test]
    fn test_from_file_not_found() {
        let path = PathBuf::from("/nonexistent/config.yaml");
        let result = YamlConfig::from_file(&path);

        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Failed to read config file")
        );
    }

    #[test]
    fn test_from_file_invalid_yaml() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("invalid.yaml");

        fs::write(&config_path, "invalid: yaml: content:").unwrap();

        let result = YamlConfig::from_file(&config_path);
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Failed to parse YAML")
        );
    }
}

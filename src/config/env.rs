//! Environment variable loading

use std::env;
use std::str::FromStr;

use super::{ConfigError, ConfigResult, ServerConfig};

/// Read an optional, non-empty environment variable.
fn var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Read and parse an optional environment variable.
fn parse_var<T: FromStr>(key: &str) -> ConfigResult<Option<T>> {
    match var(key) {
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value,
            }),
        None => Ok(None),
    }
}

/// Build a configuration from environment variables over defaults.
pub(super) fn from_env() -> ConfigResult<ServerConfig> {
    let mut config = ServerConfig::default();

    if let Some(host) = var("HOST") {
        config.host = host;
    }
    if let Some(port) = parse_var("PORT")? {
        config.port = port;
    }
    config.cors_allowed_origins = var("CORS_ALLOWED_ORIGINS");

    config.openai_api_key = var("OPENAI_API_KEY");
    if let Some(model) = var("OPENAI_REALTIME_MODEL") {
        config.openai_model = model;
    }
    if let Some(voice) = var("OPENAI_REALTIME_VOICE") {
        config.openai_voice = voice;
    }
    config.openai_instructions = var("OPENAI_REALTIME_INSTRUCTIONS");
    config.openai_url = var("OPENAI_REALTIME_URL");

    if let Some(v) = parse_var("RECONNECT_MAX_RETRIES")? {
        config.reconnect.max_retries = v;
    }
    if let Some(v) = parse_var("RECONNECT_INITIAL_DELAY_MS")? {
        config.reconnect.initial_delay_ms = v;
    }
    if let Some(v) = parse_var("RECONNECT_MAX_DELAY_MS")? {
        config.reconnect.max_delay_ms = v;
    }
    if let Some(v) = parse_var("RECONNECT_CONNECT_TIMEOUT_MS")? {
        config.reconnect.connect_timeout_ms = v;
    }
    if let Some(v) = parse_var("HEARTBEAT_INTERVAL_MS")? {
        config.heartbeat.interval_ms = v;
    }
    if let Some(v) = parse_var("HEARTBEAT_TIMEOUT_MS")? {
        config.heartbeat.timeout_ms = v;
    }
    if let Some(v) = parse_var("DEDUP_CACHE_CAPACITY")? {
        config.dedup_cache_capacity = v;
    }

    config.workouts_service_url = var("WORKOUTS_SERVICE_URL");
    if let Some(v) = parse_var("WORKOUTS_TIMEOUT_SECONDS")? {
        config.workouts_timeout_seconds = v;
    }

    Ok(config)
}

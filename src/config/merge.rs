//! Merging YAML overrides into the environment-derived configuration

use super::ServerConfig;
use super::yaml::YamlConfig;

/// Apply every value present in `yaml` on top of `base`.
pub(super) fn merge_config(mut base: ServerConfig, yaml: YamlConfig) -> ServerConfig {
    if let Some(server) = yaml.server {
        set(&mut base.host, server.host);
        set(&mut base.port, server.port);
        set_opt(&mut base.cors_allowed_origins, server.cors_allowed_origins);
    }

    if let Some(openai) = yaml.openai {
        set_opt(&mut base.openai_api_key, openai.api_key);
        set(&mut base.openai_model, openai.model);
        set(&mut base.openai_voice, openai.voice);
        set_opt(&mut base.openai_instructions, openai.instructions);
        set_opt(&mut base.openai_url, openai.url);
    }

    if let Some(session) = yaml.session {
        if let Some(r) = session.reconnect {
            let policy = &mut base.reconnect;
            set(&mut policy.max_retries, r.max_retries);
            set(&mut policy.initial_delay_ms, r.initial_delay_ms);
            set(&mut policy.max_delay_ms, r.max_delay_ms);
            set(&mut policy.exponential_base, r.exponential_base);
            set(&mut policy.jitter, r.jitter);
            set(&mut policy.connect_timeout_ms, r.connect_timeout_ms);
        }
        if let Some(h) = session.heartbeat {
            set(&mut base.heartbeat.interval_ms, h.interval_ms);
            set(&mut base.heartbeat.timeout_ms, h.timeout_ms);
        }
        if let Some(b) = session.buffer {
            let buffer = &mut base.buffer;
            set(&mut buffer.capacity_frames, b.capacity_frames);
            set(&mut buffer.target_fill_ms, b.target_fill_ms);
            set(&mut buffer.low_water_ms, b.low_water_ms);
            set(&mut buffer.silence_frame_ms, b.silence_frame_ms);
            set(&mut buffer.max_silence_frames, b.max_silence_frames);
        }
        set(&mut base.dedup_cache_capacity, session.dedup_cache_capacity);
    }

    if let Some(workouts) = yaml.workouts {
        set_opt(&mut base.workouts_service_url, workouts.service_url);
        set(&mut base.workouts_timeout_seconds, workouts.timeout_seconds);
    }

    base
}

fn set<T>(target: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *target = value;
    }
}

fn set_opt<T>(target: &mut Option<T>, value: Option<T>) {
    if value.is_some() {
        *target = value;
    }
}

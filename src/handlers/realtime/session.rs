//! Realtime bootstrap and health endpoints

use axum::{Json, extract::State};
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{info, warn};

use crate::core::realtime::ConnectionParams;
use crate::state::AppState;

/// `POST /realtime/session/start`
///
/// Tells clients that manage their own WebSocket where to stream audio and in
/// which format.
pub async fn start_session(State(state): State<Arc<AppState>>) -> Json<ConnectionParams> {
    if !state.config.has_openai_key() {
        warn!("Session bootstrap requested but no OpenAI API key is configured");
    }
    info!(
        active_sessions = state.active_sessions(),
        "Realtime session bootstrap requested"
    );
    Json(ConnectionParams::ready(
        &state.config.realtime_config().audio_format,
    ))
}

/// `GET /realtime/health`
pub async fn realtime_health(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "realtime_audio",
        "active_sessions": state.active_sessions(),
        "openai_configured": state.config.has_openai_key(),
    }))
}

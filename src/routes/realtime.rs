//! Realtime route configuration
//!
//! - `GET /realtime/stream` - WebSocket upgrade for full-duplex audio
//! - `POST /realtime/session/start` - Connection details for self-managed clients
//! - `GET /realtime/health` - Realtime service health
//!
//! # Example
//!
//! ```json
//! // Client sends audio as binary frames, or typed input:
//! {"type": "text_input", "text": "log 10 reps of bench press at 135 pounds"}
//!
//! // Server streams back session updates, transcripts and binary audio:
//! {"type": "session", "session_id": "...", "status": "state_changed", "state": "connected"}
//! {"type": "function_result", "call_id": "call_1", "name": "log_workout", "success": true, "output": {"id": 42}}
//! ```

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use crate::handlers::realtime::{realtime_health, realtime_stream_handler, start_session};
use crate::state::AppState;
use std::sync::Arc;

pub fn create_realtime_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/realtime/stream", get(realtime_stream_handler))
        .route("/realtime/session/start", post(start_session))
        .route("/realtime/health", get(realtime_health))
        .layer(TraceLayer::new_for_http())
}

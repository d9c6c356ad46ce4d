use axum::response::Json;
use serde_json::{Value, json};

/// `GET /` - liveness check
pub async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "message": "Welcome to Arnold.ai Workout Tracker API",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// `GET /health`
pub async fn health_status() -> Json<Value> {
    Json(json!({ "status": "healthy" }))
}

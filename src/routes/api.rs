use axum::{
    Router,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use crate::handlers::{api, workouts};
use crate::state::AppState;
use std::sync::Arc;

/// Create the REST API router
pub fn create_api_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(api::health_check))
        .route("/health", get(api::health_status))
        .route(
            "/workouts/",
            post(workouts::log_workout).get(workouts::fetch_workouts),
        )
        .route("/workouts/recent", get(workouts::recent_workouts))
        .layer(TraceLayer::new_for_http())
}

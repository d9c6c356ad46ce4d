//! Workout records REST API.
//!
//! - `POST /workouts/` logs a set
//! - `GET /workouts/?exercise=&date=` lists sets for an exercise
//! - `GET /workouts/recent?limit=` lists the most recent sets

use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
};
use serde::Deserialize;
use std::sync::Arc;
use time::{Date, OffsetDateTime};
use tracing::info;

use crate::core::workouts::{
    DEFAULT_RECENT_LIMIT, MAX_RECENT_LIMIT, NewWorkout, Workout, WorkoutQuery,
};
use crate::errors::app_error::{AppError, AppResult};
use crate::state::AppState;

/// Request body for logging a set.
#[derive(Debug, Deserialize)]
pub struct WorkoutIn {
    /// Defaults to today (UTC)
    #[serde(default)]
    pub workout_date: Option<Date>,
    pub exercise: String,
    pub reps: i64,
    pub weight_lbs: f64,
}

#[derive(Debug, Deserialize)]
pub struct WorkoutsParams {
    pub exercise: String,
    #[serde(default)]
    pub date: Option<Date>,
}

#[derive(Debug, Deserialize)]
pub struct RecentParams {
    #[serde(default)]
    pub limit: Option<u32>,
}

pub async fn log_workout(
    State(state): State<Arc<AppState>>,
    Json(body): Json<WorkoutIn>,
) -> AppResult<(StatusCode, Json<Workout>)> {
    let date = body
        .workout_date
        .unwrap_or_else(|| OffsetDateTime::now_utc().date());
    let workout = NewWorkout::new(&body.exercise, body.reps, body.weight_lbs, date)?;
    let created = state.store.create(workout).await?;
    info!(id = created.id, exercise = %created.exercise, "Workout logged");
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn fetch_workouts(
    State(state): State<Arc<AppState>>,
    Query(params): Query<WorkoutsParams>,
) -> AppResult<Json<Vec<Workout>>> {
    if params.exercise.trim().is_empty() {
        return Err(AppError::BadRequest("exercise is required".to_string()));
    }
    let mut query = WorkoutQuery::exercise(&params.exercise);
    if let Some(date) = params.date {
        query = query.on(date);
    }
    Ok(Json(state.store.query(&query).await?))
}

pub async fn recent_workouts(
    State(state): State<Arc<AppState>>,
    Query(params): Query<RecentParams>,
) -> AppResult<Json<Vec<Workout>>> {
    let limit = params.limit.unwrap_or(DEFAULT_RECENT_LIMIT);
    if !(1..=MAX_RECENT_LIMIT).contains(&limit) {
        return Err(AppError::BadRequest(format!(
            "limit must be between 1 and {MAX_RECENT_LIMIT}"
        )));
    }
    Ok(Json(state.store.recent(limit).await?))
}

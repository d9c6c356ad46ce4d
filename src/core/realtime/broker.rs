//! Function-call execution.
//!
//! The remote model asks for workout operations by name. [`FunctionCallBroker`]
//! validates the arguments, runs the operation against the [`WorkoutStore`] and
//! turns the outcome into a [`FunctionCallResult`]. Failures never escape as
//! errors; they become a `{"success": false, ...}` payload the model can speak
//! around.
//!
//! Each call id executes at most once. Results are cached by call id, so a
//! request re-sent after a reconnect replays the first outcome instead of
//! touching the store again. Concurrent requests for the same id wait on the
//! first execution.

use moka::future::Cache;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use thiserror::Error;
use time::{Date, OffsetDateTime};
use tracing::{debug, info, warn};

use super::events::{FunctionCallRequest, FunctionCallResult};
use super::openai::ToolDef;
use crate::core::workouts::{
    DEFAULT_RECENT_LIMIT, MAX_RECENT_LIMIT, NewWorkout, StoreError, Workout, WorkoutQuery,
    WorkoutStore,
};

// =============================================================================
// Operations
// =============================================================================

/// Operations the remote model may call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    LogSet,
    QueryByExercise,
    QueryRecent,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::LogSet => "log_set",
            Operation::QueryByExercise => "query_by_exercise",
            Operation::QueryRecent => "query_recent",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "log_set" => Some(Operation::LogSet),
            "query_by_exercise" => Some(Operation::QueryByExercise),
            "query_recent" => Some(Operation::QueryRecent),
            _ => None,
        }
    }

    pub fn all() -> &'static [Operation] {
        &[
            Operation::LogSet,
            Operation::QueryByExercise,
            Operation::QueryRecent,
        ]
    }

    fn tool(&self) -> ToolDef {
        match self {
            Operation::LogSet => ToolDef::function(
                self.as_str(),
                "Log one workout set: exercise, repetitions and weight in pounds",
                json!({
                    "type": "object",
                    "properties": {
                        "exercise": {"type": "string", "description": "Exercise name, e.g. bench press"},
                        "reps": {"type": "integer", "description": "Number of repetitions"},
                        "weight_lbs": {"type": "number", "description": "Weight in pounds"},
                        "workout_date": {"type": "string", "format": "date", "description": "Day of the set (YYYY-MM-DD), defaults to today"}
                    },
                    "required": ["exercise", "reps", "weight_lbs"]
                }),
            ),
            Operation::QueryByExercise => ToolDef::function(
                self.as_str(),
                "Look up logged sets for one exercise, optionally on a day or within a date range",
                json!({
                    "type": "object",
                    "properties": {
                        "exercise": {"type": "string", "description": "Exercise name"},
                        "workout_date": {"type": "string", "format": "date", "description": "Exact day (YYYY-MM-DD)"},
                        "start_date": {"type": "string", "format": "date", "description": "First day of a range"},
                        "end_date": {"type": "string", "format": "date", "description": "Last day of a range"}
                    },
                    "required": ["exercise"]
                }),
            ),
            Operation::QueryRecent => ToolDef::function(
                self.as_str(),
                "Fetch the most recently logged sets",
                json!({
                    "type": "object",
                    "properties": {
                        "limit": {
                            "type": "integer",
                            "description": "How many sets to return (1-100)",
                            "default": DEFAULT_RECENT_LIMIT
                        }
                    }
                }),
            ),
        }
    }
}

/// Tool definitions advertised in the session configuration.
pub fn tool_definitions() -> Vec<ToolDef> {
    Operation::all().iter().map(Operation::tool).collect()
}

// =============================================================================
// Errors
// =============================================================================

/// Reasons a function call fails. Always converted into a result payload.
#[derive(Debug, Clone, Error)]
pub enum FunctionCallError {
    #[error("Unknown function: {0}")]
    UnknownOperation(String),

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl FunctionCallError {
    pub fn kind(&self) -> &'static str {
        match self {
            FunctionCallError::UnknownOperation(_) => "unknown_operation",
            FunctionCallError::InvalidArguments(_) => "invalid_arguments",
            FunctionCallError::Store(e) => e.kind(),
        }
    }

    fn payload(&self) -> Value {
        json!({
            "success": false,
            "error": self.to_string(),
            "kind": self.kind(),
        })
    }
}

// =============================================================================
// Arguments
// =============================================================================

#[derive(Debug, Deserialize)]
struct LogSetArgs {
    exercise: String,
    reps: i64,
    #[serde(alias = "weight")]
    weight_lbs: f64,
    #[serde(default, alias = "date")]
    workout_date: Option<Date>,
}

#[derive(Debug, Deserialize)]
struct QueryByExerciseArgs {
    exercise: String,
    #[serde(default, alias = "date")]
    workout_date: Option<Date>,
    #[serde(default)]
    start_date: Option<Date>,
    #[serde(default)]
    end_date: Option<Date>,
}

#[derive(Debug, Deserialize)]
struct QueryRecentArgs {
    #[serde(default = "default_limit")]
    limit: i64,
}

fn default_limit() -> i64 {
    DEFAULT_RECENT_LIMIT as i64
}

fn parse_args<T: serde::de::DeserializeOwned>(arguments: &Value) -> Result<T, FunctionCallError> {
    let arguments = match arguments {
        Value::Null => json!({}),
        other => other.clone(),
    };
    serde_json::from_value(arguments).map_err(|e| FunctionCallError::InvalidArguments(e.to_string()))
}

fn workout_summary(w: &Workout) -> Value {
    json!({
        "id": w.id,
        "exercise": w.exercise,
        "reps": w.reps,
        "weight_lbs": w.weight_lbs,
        "date": w.workout_date.to_string(),
    })
}

// =============================================================================
// Broker
// =============================================================================

/// Outcome of [`FunctionCallBroker::execute`].
#[derive(Debug, Clone, PartialEq)]
pub struct Execution {
    pub result: FunctionCallResult,
    /// True when the result came from the dedup cache
    pub replayed: bool,
}

/// Broker counters
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BrokerStats {
    pub executed: u64,
    pub replayed: u64,
    pub failed: u64,
    pub avg_latency_ms: f64,
}

pub struct FunctionCallBroker {
    store: Arc<dyn WorkoutStore>,
    results: Cache<String, FunctionCallResult>,
    executed: AtomicU64,
    replayed: AtomicU64,
    failed: AtomicU64,
    latency_us_total: AtomicU64,
}

impl FunctionCallBroker {
    pub fn new(store: Arc<dyn WorkoutStore>, dedup_capacity: u64) -> Self {
        Self {
            store,
            results: Cache::new(dedup_capacity.max(1)),
            executed: AtomicU64::new(0),
            replayed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            latency_us_total: AtomicU64::new(0),
        }
    }

    /// Execute a request, or replay the result of an earlier request with the same call id.
    pub async fn execute(&self, request: &FunctionCallRequest) -> Execution {
        let entry = self
            .results
            .entry(request.call_id.clone())
            .or_insert_with(self.run(request))
            .await;

        let replayed = !entry.is_fresh();
        if replayed {
            self.replayed.fetch_add(1, Ordering::Relaxed);
            debug!(call_id = %request.call_id, "Replaying cached function result");
        }

        Execution {
            result: entry.into_value(),
            replayed,
        }
    }

    async fn run(&self, request: &FunctionCallRequest) -> FunctionCallResult {
        let started = Instant::now();
        let outcome = self.dispatch(&request.name, &request.arguments).await;
        let elapsed = started.elapsed();

        self.executed.fetch_add(1, Ordering::Relaxed);
        self.latency_us_total
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);

        let (success, output) = match outcome {
            Ok(output) => {
                info!(
                    call_id = %request.call_id,
                    function = %request.name,
                    latency_ms = elapsed.as_millis() as u64,
                    "Function call completed"
                );
                (true, output)
            }
            Err(e) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                warn!(
                    call_id = %request.call_id,
                    function = %request.name,
                    error = %e,
                    "Function call failed"
                );
                (false, e.payload())
            }
        };

        FunctionCallResult {
            call_id: request.call_id.clone(),
            name: request.name.clone(),
            success,
            output,
        }
    }

    async fn dispatch(&self, name: &str, arguments: &Value) -> Result<Value, FunctionCallError> {
        let operation = Operation::parse(name)
            .ok_or_else(|| FunctionCallError::UnknownOperation(name.to_string()))?;

        match operation {
            Operation::LogSet => self.log_set(parse_args(arguments)?).await,
            Operation::QueryByExercise => self.query_by_exercise(parse_args(arguments)?).await,
            Operation::QueryRecent => self.query_recent(parse_args(arguments)?).await,
        }
    }

    async fn log_set(&self, args: LogSetArgs) -> Result<Value, FunctionCallError> {
        let day = args
            .workout_date
            .unwrap_or_else(|| OffsetDateTime::now_utc().date());
        let workout = NewWorkout::new(&args.exercise, args.reps, args.weight_lbs, day)?;
        let stored = self.store.create(workout).await?;

        Ok(json!({
            "success": true,
            "message": format!(
                "Logged {} reps of {} at {} lbs",
                stored.reps, stored.exercise, stored.weight_lbs
            ),
            "workout": workout_summary(&stored),
        }))
    }

    async fn query_by_exercise(&self, args: QueryByExerciseArgs) -> Result<Value, FunctionCallError> {
        let mut query = WorkoutQuery::exercise(&args.exercise);
        if query.exercise.as_deref().is_none_or(str::is_empty) {
            return Err(FunctionCallError::InvalidArguments(
                "Exercise name is required".to_string(),
            ));
        }
        if let Some(day) = args.workout_date {
            query = query.on(day);
        }
        if args.start_date.is_some() || args.end_date.is_some() {
            let start = args.start_date.unwrap_or(Date::MIN);
            let end = args.end_date.unwrap_or(Date::MAX);
            if start > end {
                return Err(FunctionCallError::InvalidArguments(format!(
                    "start_date {start} is after end_date {end}"
                )));
            }
            query = query.between(start, end);
        }

        let found = self.store.query(&query).await?;
        let workouts: Vec<Value> = found
            .iter()
            .map(|w| {
                json!({
                    "id": w.id,
                    "reps": w.reps,
                    "weight_lbs": w.weight_lbs,
                    "date": w.workout_date.to_string(),
                })
            })
            .collect();

        Ok(json!({
            "success": true,
            "exercise": query.exercise,
            "count": workouts.len(),
            "workouts": workouts,
        }))
    }

    async fn query_recent(&self, args: QueryRecentArgs) -> Result<Value, FunctionCallError> {
        if args.limit < 1 || args.limit > MAX_RECENT_LIMIT as i64 {
            return Err(FunctionCallError::InvalidArguments(format!(
                "Limit must be between 1 and {MAX_RECENT_LIMIT}"
            )));
        }
        let found = self.store.recent(args.limit as u32).await?;
        let workouts: Vec<Value> = found.iter().map(workout_summary).collect();

        Ok(json!({
            "success": true,
            "count": workouts.len(),
            "workouts": workouts,
        }))
    }

    pub fn stats(&self) -> BrokerStats {
        let executed = self.executed.load(Ordering::Relaxed);
        let total_us = self.latency_us_total.load(Ordering::Relaxed);
        BrokerStats {
            executed,
            replayed: self.replayed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            avg_latency_ms: if executed == 0 {
                0.0
            } else {
                total_us as f64 / executed as f64 / 1000.0
            },
        }
    }
}

//! Workout record types.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::Date;

/// Errors from the record-storage service.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// The service could not be reached or timed out
    #[error("Workout service unavailable: {0}")]
    Unavailable(String),

    /// The service rejected the request
    #[error("Workout service rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// Input failed validation before reaching the service
    #[error("Invalid workout: {0}")]
    Validation(String),

    /// The service answered with something unexpected
    #[error("Unexpected workout service response: {0}")]
    Decode(String),
}

impl StoreError {
    /// Stable machine-readable name, used in failure payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            StoreError::Unavailable(_) => "unavailable",
            StoreError::Rejected { .. } => "rejected",
            StoreError::Validation(_) => "validation",
            StoreError::Decode(_) => "decode",
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Maximum number of records a recent query may ask for.
pub const MAX_RECENT_LIMIT: u32 = 100;

/// Default number of records a recent query returns.
pub const DEFAULT_RECENT_LIMIT: u32 = 10;

/// Canonical form of an exercise name: trimmed, lowercased, words joined by `_`.
///
/// `"  Bench Press "` becomes `"bench_press"`.
pub fn normalize_exercise(name: &str) -> String {
    name.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join("_")
}

/// A set to be recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewWorkout {
    pub workout_date: Date,
    pub exercise: String,
    pub reps: u32,
    pub weight_lbs: f64,
}

impl NewWorkout {
    /// Validate and normalize a set.
    pub fn new(exercise: &str, reps: i64, weight_lbs: f64, workout_date: Date) -> StoreResult<Self> {
        let exercise = normalize_exercise(exercise);
        if exercise.is_empty() {
            return Err(StoreError::Validation(
                "Exercise name cannot be empty".to_string(),
            ));
        }
        if reps <= 0 {
            return Err(StoreError::Validation("Reps must be positive".to_string()));
        }
        let reps = u32::try_from(reps)
            .map_err(|_| StoreError::Validation("Reps out of range".to_string()))?;
        if !weight_lbs.is_finite() || weight_lbs < 0.0 {
            return Err(StoreError::Validation(
                "Weight cannot be negative".to_string(),
            ));
        }
        Ok(Self {
            workout_date,
            exercise,
            reps,
            weight_lbs,
        })
    }
}

/// A stored set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workout {
    pub id: i64,
    pub workout_date: Date,
    pub exercise: String,
    pub reps: u32,
    pub weight_lbs: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

/// Filter for history queries. All present fields must match.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkoutQuery {
    pub exercise: Option<String>,
    /// Exact day
    pub date: Option<Date>,
    /// Inclusive day range
    pub range: Option<(Date, Date)>,
}

impl WorkoutQuery {
    pub fn exercise(name: &str) -> Self {
        Self {
            exercise: Some(normalize_exercise(name)),
            ..Default::default()
        }
    }

    pub fn on(mut self, date: Date) -> Self {
        self.date = Some(date);
        self
    }

    pub fn between(mut self, start: Date, end: Date) -> Self {
        self.range = Some((start, end));
        self
    }

    pub fn matches(&self, workout: &Workout) -> bool {
        if let Some(exercise) = &self.exercise
            && &workout.exercise != exercise
        {
            return false;
        }
        if let Some(date) = self.date
            && workout.workout_date != date
        {
            return false;
        }
        if let Some((start, end)) = self.range
            && (workout.workout_date < start || workout.workout_date > end)
        {
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    #[test]
    fn test_normalize_exercise() {
        assert_eq!(normalize_exercise("Bench Press"), "bench_press");
        assert_eq!(normalize_exercise("  SQUATS "), "squats");
        assert_eq!(normalize_exercise("bench_press"), "bench_press");
        assert_eq!(normalize_exercise("   "), "");
    }

    #[test]
    fn test_new_workout_validation() {
        let day = date!(2024 - 06 - 01);
        assert!(NewWorkout::new("bench press", 10, 135.0, day).is_ok());
        assert!(NewWorkout::new("bench press", 0, 135.0, day).is_err());
        assert!(NewWorkout::new("bench press", 5, -1.0, day).is_err());
        assert!(NewWorkout::new("  ", 5, 10.0, day).is_err());
        assert!(NewWorkout::new("pull ups", 12, 0.0, day).is_ok());
    }

    #[test]
    fn test_workout_date_serializes_as_iso_day() {
        let workout = NewWorkout::new("squat", 5, 225.0, date!(2024 - 06 - 01)).unwrap();
        let json = serde_json::to_value(&workout).unwrap();
        assert_eq!(json["workout_date"], "2024-06-01");
        assert_eq!(json["exercise"], "squat");
    }

    #[test]
    fn test_query_matches_range() {
        let workout = Workout {
            id: 1,
            workout_date: date!(2024 - 06 - 10),
            exercise: "squat".to_string(),
            reps: 5,
            weight_lbs: 225.0,
            created_at: None,
        };
        assert!(WorkoutQuery::exercise("Squat").matches(&workout));
        assert!(!WorkoutQuery::exercise("deadlift").matches(&workout));
        assert!(
            WorkoutQuery::exercise("squat")
                .between(date!(2024 - 06 - 01), date!(2024 - 06 - 10))
                .matches(&workout)
        );
        assert!(
            !WorkoutQuery::default()
                .on(date!(2024 - 06 - 11))
                .matches(&workout)
        );
    }
}

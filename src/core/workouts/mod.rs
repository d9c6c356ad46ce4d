//! Workout records.
//!
//! The function-call broker is the only caller of a [`WorkoutStore`] inside a
//! session; the REST handlers use the same store directly.

mod http;
mod store;
mod types;

pub use http::HttpWorkoutStore;
pub use store::{InMemoryWorkoutStore, WorkoutStore};
pub use types::{
    DEFAULT_RECENT_LIMIT, MAX_RECENT_LIMIT, NewWorkout, StoreError, StoreResult, Workout,
    WorkoutQuery, normalize_exercise,
};

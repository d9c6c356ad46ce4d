pub mod realtime;
pub mod workouts;

// Re-export commonly used types for convenience
pub use realtime::{
    InboundEvent, RealtimeConfig, RealtimeError, RealtimeResult, SessionInput, SessionManager,
    SessionState,
};

pub use workouts::{InMemoryWorkoutStore, NewWorkout, Workout, WorkoutStore};

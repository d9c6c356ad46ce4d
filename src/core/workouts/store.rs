//! Record-storage collaborator.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use super::types::{
    MAX_RECENT_LIMIT, NewWorkout, StoreError, StoreResult, Workout, WorkoutQuery,
};

/// External service that persists workout sets.
#[async_trait]
pub trait WorkoutStore: Send + Sync {
    /// Record a set and return it with its assigned id.
    async fn create(&self, workout: NewWorkout) -> StoreResult<Workout>;

    /// Sets matching the filter, most recent workout date first.
    async fn query(&self, query: &WorkoutQuery) -> StoreResult<Vec<Workout>>;

    /// The `limit` most recently recorded sets, newest first.
    async fn recent(&self, limit: u32) -> StoreResult<Vec<Workout>>;
}

/// Process-local store.
#[derive(Debug)]
pub struct InMemoryWorkoutStore {
    workouts: Mutex<Vec<Workout>>,
    next_id: AtomicI64,
    create_calls: AtomicU64,
    unavailable: AtomicBool,
}

impl Default for InMemoryWorkoutStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryWorkoutStore {
    pub fn new() -> Self {
        Self::with_next_id(1)
    }

    /// Start id assignment at `next_id`.
    pub fn with_next_id(next_id: i64) -> Self {
        Self {
            workouts: Mutex::new(Vec::new()),
            next_id: AtomicI64::new(next_id),
            create_calls: AtomicU64::new(0),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Number of `create` calls received, successful or not.
    pub fn create_calls(&self) -> u64 {
        self.create_calls.load(Ordering::Relaxed)
    }

    /// Simulate an outage: every call fails with `Unavailable` while set.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::Relaxed);
    }

    pub fn len(&self) -> usize {
        self.workouts.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.workouts.lock().is_empty()
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::Relaxed) {
            return Err(StoreError::Unavailable("store offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl WorkoutStore for InMemoryWorkoutStore {
    async fn create(&self, workout: NewWorkout) -> StoreResult<Workout> {
        self.create_calls.fetch_add(1, Ordering::Relaxed);
        self.check_available()?;

        let stored = Workout {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            workout_date: workout.workout_date,
            exercise: workout.exercise,
            reps: workout.reps,
            weight_lbs: workout.weight_lbs,
            created_at: OffsetDateTime::now_utc().format(&Rfc3339).ok(),
        };
        self.workouts.lock().push(stored.clone());
        Ok(stored)
    }

    async fn query(&self, query: &WorkoutQuery) -> StoreResult<Vec<Workout>> {
        self.check_available()?;
        let mut found: Vec<Workout> = self
            .workouts
            .lock()
            .iter()
            .filter(|w| query.matches(w))
            .cloned()
            .collect();
        // Newest insertion first among equal dates.
        found.reverse();
        found.sort_by(|a, b| b.workout_date.cmp(&a.workout_date));
        Ok(found)
    }

    async fn recent(&self, limit: u32) -> StoreResult<Vec<Workout>> {
        self.check_available()?;
        if limit == 0 || limit > MAX_RECENT_LIMIT {
            return Err(StoreError::Validation(format!(
                "Limit must be between 1 and {MAX_RECENT_LIMIT}"
            )));
        }
        Ok(self
            .workouts
            .lock()
            .iter()
            .rev()
            .take(limit as usize)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    fn set(exercise: &str, reps: i64, day: time::Date) -> NewWorkout {
        NewWorkout::new(exercise, reps, 100.0, day).unwrap()
    }

    #[tokio::test]
    async fn test_create_assigns_sequential_ids() {
        let store = InMemoryWorkoutStore::with_next_id(42);
        let first = store.create(set("bench press", 10, date!(2024 - 06 - 01))).await.unwrap();
        let second = store.create(set("squat", 5, date!(2024 - 06 - 01))).await.unwrap();
        assert_eq!(first.id, 42);
        assert_eq!(second.id, 43);
        assert_eq!(first.exercise, "bench_press");
        assert!(first.created_at.is_some());
        assert_eq!(store.create_calls(), 2);
    }

    #[tokio::test]
    async fn test_query_orders_by_date_desc() {
        let store = InMemoryWorkoutStore::new();
        store.create(set("squat", 5, date!(2024 - 06 - 01))).await.unwrap();
        store.create(set("squat", 6, date!(2024 - 06 - 03))).await.unwrap();
        store.create(set("bench", 8, date!(2024 - 06 - 02))).await.unwrap();
        store.create(set("squat", 7, date!(2024 - 06 - 02))).await.unwrap();

        let found = store.query(&WorkoutQuery::exercise("squat")).await.unwrap();
        let reps: Vec<u32> = found.iter().map(|w| w.reps).collect();
        assert_eq!(reps, vec![6, 7, 5]);

        let ranged = store
            .query(
                &WorkoutQuery::exercise("squat")
                    .between(date!(2024 - 06 - 01), date!(2024 - 06 - 02)),
            )
            .await
            .unwrap();
        assert_eq!(ranged.len(), 2);
    }

    #[tokio::test]
    async fn test_recent_newest_first_with_limit() {
        let store = InMemoryWorkoutStore::new();
        for reps in 1..=5 {
            store.create(set("curl", reps, date!(2024 - 06 - 01))).await.unwrap();
        }
        let recent = store.recent(3).await.unwrap();
        let reps: Vec<u32> = recent.iter().map(|w| w.reps).collect();
        assert_eq!(reps, vec![5, 4, 3]);

        assert!(matches!(
            store.recent(0).await,
            Err(StoreError::Validation(_))
        ));
        assert!(matches!(
            store.recent(101).await,
            Err(StoreError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_calls() {
        let store = InMemoryWorkoutStore::new();
        store.set_unavailable(true);
        let err = store
            .create(set("squat", 5, date!(2024 - 06 - 01)))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "unavailable");
        assert!(store.is_empty());
        assert_eq!(store.create_calls(), 1);
    }
}

//! HTTP client for a remote workout service.
//!
//! Speaks the workout REST API: `POST /workouts/`, `GET /workouts/?exercise=&date=`
//! and `GET /workouts/recent?limit=`.

use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

use super::store::WorkoutStore;
use super::types::{NewWorkout, StoreError, StoreResult, Workout, WorkoutQuery};

/// Default request timeout for the workout service.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

pub struct HttpWorkoutStore {
    base_url: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl HttpWorkoutStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout: DEFAULT_TIMEOUT,
            client: reqwest::Client::new(),
        }
    }

    /// Set timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn fetch_list(&self, request: reqwest::RequestBuilder) -> StoreResult<Vec<Workout>> {
        let response = request
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        decode(response).await
    }
}

async fn decode<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> StoreResult<T> {
    let status = response.status();
    if !status.is_success() {
        let error_text = response.text().await.unwrap_or_default();
        return Err(if status.is_server_error() {
            StoreError::Unavailable(format!("HTTP {} - {}", status, error_text))
        } else {
            StoreError::Rejected {
                status: status.as_u16(),
                message: error_text,
            }
        });
    }

    response
        .json()
        .await
        .map_err(|e| StoreError::Decode(format!("Failed to parse response: {}", e)))
}

#[async_trait]
impl WorkoutStore for HttpWorkoutStore {
    async fn create(&self, workout: NewWorkout) -> StoreResult<Workout> {
        let url = format!("{}/workouts/", self.base_url);
        debug!(url = %url, exercise = %workout.exercise, "Creating workout");

        let response = self
            .client
            .post(&url)
            .timeout(self.timeout)
            .json(&workout)
            .send()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        decode(response).await
    }

    async fn query(&self, query: &WorkoutQuery) -> StoreResult<Vec<Workout>> {
        let url = format!("{}/workouts/", self.base_url);
        let mut params: Vec<(&str, String)> = Vec::new();
        if let Some(exercise) = &query.exercise {
            params.push(("exercise", exercise.clone()));
        }
        if let Some(date) = query.date {
            params.push(("date", date.to_string()));
        }
        debug!(url = %url, ?params, "Querying workouts");

        let found = self
            .fetch_list(self.client.get(&url).query(&params))
            .await?;

        // The service filters by exact day only; ranges are applied here.
        Ok(found.into_iter().filter(|w| query.matches(w)).collect())
    }

    async fn recent(&self, limit: u32) -> StoreResult<Vec<Workout>> {
        let url = format!("{}/workouts/recent", self.base_url);
        debug!(url = %url, limit, "Fetching recent workouts");
        self.fetch_list(self.client.get(&url).query(&[("limit", limit)]))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let store = HttpWorkoutStore::new("http://localhost:8000/");
        assert_eq!(store.base_url(), "http://localhost:8000");
    }

    #[tokio::test]
    async fn test_unreachable_service_is_unavailable() {
        let store = HttpWorkoutStore::new("http://127.0.0.1:1")
            .with_timeout(Duration::from_millis(500));
        let err = store.recent(5).await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
    }
}

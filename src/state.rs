//! Shared application state.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::info;

use crate::config::ServerConfig;
use crate::core::realtime::{RealtimeResult, SessionManager, Transport};
use crate::core::workouts::{HttpWorkoutStore, InMemoryWorkoutStore, WorkoutStore};

pub struct AppState {
    pub config: ServerConfig,
    pub store: Arc<dyn WorkoutStore>,
    /// Fixed transport for every session; sessions dial OpenAI when unset
    transport: Option<Arc<dyn Transport>>,
    active_sessions: AtomicUsize,
}

impl AppState {
    pub async fn new(config: ServerConfig) -> Arc<Self> {
        let store: Arc<dyn WorkoutStore> = match &config.workouts_service_url {
            Some(url) => {
                info!(url = %url, "Using remote workout service");
                Arc::new(HttpWorkoutStore::new(url.clone()).with_timeout(config.workouts_timeout()))
            }
            None => {
                info!("Using in-memory workout store");
                Arc::new(InMemoryWorkoutStore::new())
            }
        };
        Self::with_parts(config, store, None)
    }

    /// Build state from explicit parts.
    pub fn with_parts(
        config: ServerConfig,
        store: Arc<dyn WorkoutStore>,
        transport: Option<Arc<dyn Transport>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            store,
            transport,
            active_sessions: AtomicUsize::new(0),
        })
    }

    /// Create a realtime session with the configured model and store.
    pub fn new_session(&self) -> RealtimeResult<SessionManager> {
        let config = self.config.realtime_config();
        match &self.transport {
            Some(transport) => SessionManager::new(config, transport.clone(), self.store.clone()),
            None => SessionManager::openai(config, self.store.clone()),
        }
    }

    pub fn active_sessions(&self) -> usize {
        self.active_sessions.load(Ordering::Relaxed)
    }

    /// Count a streaming session as active until the guard is dropped.
    pub fn track_session(self: &Arc<Self>) -> SessionGuard {
        self.active_sessions.fetch_add(1, Ordering::Relaxed);
        SessionGuard {
            state: self.clone(),
        }
    }
}

pub struct SessionGuard {
    state: Arc<AppState>,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.state.active_sessions.fetch_sub(1, Ordering::Relaxed);
    }
}

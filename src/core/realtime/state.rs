//! Session state cell.

use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info};

use super::base::SessionState;
use super::events::{EventPayload, EventSink, SessionUpdate};

/// Owner of the session state.
///
/// Only legal transitions are applied; every applied transition is published on
/// the watch channel and as a `SessionUpdated` event.
pub struct StateCell {
    session_id: String,
    tx: watch::Sender<SessionState>,
    events: Arc<EventSink>,
}

impl StateCell {
    pub fn new(session_id: impl Into<String>, events: Arc<EventSink>) -> Self {
        let (tx, _rx) = watch::channel(SessionState::Created);
        Self {
            session_id: session_id.into(),
            tx,
            events,
        }
    }

    pub fn get(&self) -> SessionState {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.tx.subscribe()
    }

    /// Apply `next` if legal from the current state. Returns whether it was applied.
    pub fn transition(&self, next: SessionState) -> bool {
        let mut previous = None;
        self.tx.send_if_modified(|state| {
            if state.can_transition_to(next) {
                previous = Some(*state);
                *state = next;
                true
            } else {
                false
            }
        });

        match previous {
            Some(from) => {
                info!(session_id = %self.session_id, %from, to = %next, "Session state changed");
                self.events
                    .emit(EventPayload::SessionUpdated(SessionUpdate::StateChanged {
                        state: next,
                    }));
                true
            }
            None => {
                debug!(session_id = %self.session_id, current = %self.get(), rejected = %next, "Ignoring state transition");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_transitions_publish_events() {
        let (sink, mut rx) = EventSink::new();
        let cell = StateCell::new("s1", Arc::new(sink));
        let mut watch_rx = cell.subscribe();

        assert!(cell.transition(SessionState::Connecting));
        assert!(!cell.transition(SessionState::Reconnecting));
        assert!(cell.transition(SessionState::Connected));

        assert!(watch_rx.has_changed().unwrap());
        assert_eq!(*watch_rx.borrow_and_update(), SessionState::Connected);

        let first = rx.recv().await.unwrap();
        assert_eq!(
            first.payload,
            EventPayload::SessionUpdated(SessionUpdate::StateChanged {
                state: SessionState::Connecting
            })
        );
        assert_eq!(rx.recv().await.unwrap().seq, 1);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_closed_is_terminal() {
        let (sink, _rx) = EventSink::new();
        let cell = StateCell::new("s1", Arc::new(sink));
        assert!(cell.transition(SessionState::Closed));
        assert!(!cell.transition(SessionState::Closed));
        assert!(!cell.transition(SessionState::Connecting));
        assert_eq!(cell.get(), SessionState::Closed);
    }
}

//! Inbound session events.
//!
//! Everything the session surfaces to its caller is an [`InboundEvent`]: a
//! payload tagged by kind plus a sequence number that totally orders events of
//! the same kind within a session.

use bytes::Bytes;
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::trace;

use super::base::SessionState;

// =============================================================================
// Event Types
// =============================================================================

/// Kind tag of an inbound event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    TranscriptDelta,
    ResponseText,
    AudioDelta,
    FunctionCallRequest,
    FunctionCallResult,
    Error,
    SessionUpdated,
}

impl EventKind {
    const COUNT: usize = 7;

    fn index(self) -> usize {
        match self {
            EventKind::TranscriptDelta => 0,
            EventKind::ResponseText => 1,
            EventKind::AudioDelta => 2,
            EventKind::FunctionCallRequest => 3,
            EventKind::FunctionCallResult => 4,
            EventKind::Error => 5,
            EventKind::SessionUpdated => 6,
        }
    }
}

/// Speaker of a transcript fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TranscriptRole {
    User,
    Assistant,
}

impl fmt::Display for TranscriptRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TranscriptRole::User => write!(f, "user"),
            TranscriptRole::Assistant => write!(f, "assistant"),
        }
    }
}

/// Transcript fragment of spoken audio.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transcript {
    pub role: TranscriptRole,
    pub text: String,
    /// True for the complete transcript of an item
    pub is_final: bool,
    pub item_id: Option<String>,
}

/// Text produced by the model in a text-modality response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponseText {
    pub text: String,
    pub is_final: bool,
    pub response_id: Option<String>,
}

/// Synthesized audio ready for playback.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioDelta {
    pub data: Bytes,
    /// Filler emitted by the egress buffer on underflow
    pub silence: bool,
}

/// Function call requested by the remote model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionCallRequest {
    pub call_id: String,
    pub name: String,
    pub arguments: serde_json::Value,
    pub item_id: Option<String>,
    pub response_id: Option<String>,
}

/// Outcome of a function call, as sent back to the remote model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionCallResult {
    pub call_id: String,
    pub name: String,
    pub success: bool,
    pub output: serde_json::Value,
}

/// Category of a surfaced error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Connection lost; recovery in progress
    Transport,
    /// Recovery abandoned; the session is closed
    ReconnectExhausted,
    /// Malformed or unknown message from the remote model
    Protocol,
    /// `error` event sent by the remote model
    Remote,
    /// A jitter buffer dropped frames
    BufferOverrun,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionError {
    pub kind: ErrorKind,
    pub message: String,
}

/// Session lifecycle notifications.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SessionUpdate {
    /// The remote model acknowledged the session configuration
    ConfigAcknowledged,
    StateChanged { state: SessionState },
    Reconnecting { attempt: u32, delay_ms: u64 },
    Reconnected { attempts: u32 },
}

#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    TranscriptDelta(Transcript),
    ResponseText(ResponseText),
    AudioDelta(AudioDelta),
    FunctionCallRequest(FunctionCallRequest),
    FunctionCallResult(FunctionCallResult),
    Error(SessionError),
    SessionUpdated(SessionUpdate),
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::TranscriptDelta(_) => EventKind::TranscriptDelta,
            EventPayload::ResponseText(_) => EventKind::ResponseText,
            EventPayload::AudioDelta(_) => EventKind::AudioDelta,
            EventPayload::FunctionCallRequest(_) => EventKind::FunctionCallRequest,
            EventPayload::FunctionCallResult(_) => EventKind::FunctionCallResult,
            EventPayload::Error(_) => EventKind::Error,
            EventPayload::SessionUpdated(_) => EventKind::SessionUpdated,
        }
    }

    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        EventPayload::Error(SessionError {
            kind,
            message: message.into(),
        })
    }
}

/// An event delivered to the session's caller.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundEvent {
    /// Per-kind sequence number, starting at 0
    pub seq: u64,
    pub payload: EventPayload,
}

impl InboundEvent {
    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }
}

// =============================================================================
// Event Sink
// =============================================================================

/// Stamps sequence numbers and queues events for the caller.
///
/// Shared by every producer in a session. Sequence assignment and enqueueing
/// happen under one lock so that per-kind order in the queue matches sequence
/// order even with concurrent producers.
pub struct EventSink {
    counters: [AtomicU64; EventKind::COUNT],
    tx: Mutex<Option<mpsc::UnboundedSender<InboundEvent>>>,
}

impl EventSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<InboundEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = Self {
            counters: Default::default(),
            tx: Mutex::new(Some(tx)),
        };
        (sink, rx)
    }

    /// Queue an event. Returns false once the sink has been shut down.
    pub fn emit(&self, payload: EventPayload) -> bool {
        let guard = self.tx.lock();
        let Some(tx) = guard.as_ref() else {
            trace!(kind = ?payload.kind(), "Event discarded after shutdown");
            return false;
        };
        let seq = self.counters[payload.kind().index()].fetch_add(1, Ordering::Relaxed);
        tx.send(InboundEvent { seq, payload }).is_ok()
    }

    /// Number of events emitted so far for `kind`.
    pub fn emitted(&self, kind: EventKind) -> u64 {
        self.counters[kind.index()].load(Ordering::Relaxed)
    }

    /// Stop accepting events. Receivers see the end of the queue once drained.
    pub fn shutdown(&self) {
        self.tx.lock().take();
    }

    pub fn is_shutdown(&self) -> bool {
        self.tx.lock().is_none()
    }
}

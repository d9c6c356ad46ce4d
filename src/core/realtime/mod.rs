//! Realtime voice sessions.
//!
//! A session is a persistent full-duplex connection to the OpenAI Realtime API
//! that carries microphone audio in, synthesized audio and structured events out,
//! and runs workout function calls requested by the model.
//!
//! # Architecture
//!
//! - [`SessionManager`] - lifecycle and the caller-facing API
//! - `ConnectionSupervisor` - the single transport writer; reconnects with backoff
//! - `EventDispatcher` - decodes inbound messages and routes them
//! - [`AudioFrameBuffer`] - per-direction jitter buffer
//! - [`FunctionCallBroker`] - exactly-once execution of workout operations
//! - [`HeartbeatMonitor`] - liveness probes per connection
//!
//! # Audio Format
//!
//! PCM 16-bit signed little-endian at 24kHz, mono.
//!
//! # Example
//!
//! ```rust,ignore
//! use arnold_gateway::core::realtime::{RealtimeConfig, SessionManager};
//! use arnold_gateway::core::workouts::InMemoryWorkoutStore;
//! use futures::StreamExt;
//! use std::sync::Arc;
//!
//! let config = RealtimeConfig {
//!     api_key: "sk-...".to_string(),
//!     ..Default::default()
//! };
//! let session = SessionManager::openai(config, Arc::new(InMemoryWorkoutStore::new()))?;
//! session.start().await?;
//! session.send_text("10 reps bench press 135 pounds").await?;
//!
//! let mut events = Box::pin(session.receive());
//! while let Some(event) = events.next().await {
//!     println!("{:?}", event?);
//! }
//! ```

mod base;
pub mod bootstrap;
mod broker;
mod buffer;
mod context;
mod dispatcher;
mod events;
mod heartbeat;
mod metrics;
pub mod openai;
mod session;
mod state;
mod supervisor;
mod transport;

pub use base::{
    AudioFormat, BufferConfig, DEFAULT_INSTRUCTIONS, HeartbeatConfig, InputTranscriptionConfig,
    RealtimeConfig, RealtimeError, RealtimeResult, ReconnectPolicy, SessionState,
    TurnDetectionConfig,
};
pub use bootstrap::{AudioFormatInfo, ConnectionParams, fetch_connection_params};
pub use broker::{
    BrokerStats, Execution, FunctionCallBroker, FunctionCallError, Operation, tool_definitions,
};
pub use buffer::{AudioFrame, AudioFrameBuffer, BufferStats, Direction, Playout, PushOutcome};
pub use context::{ConversationContext, MAX_CONTEXT_TURNS, Turn};
pub use dispatcher::{DispatchTargets, EventDispatcher};
pub use events::{
    AudioDelta, ErrorKind, EventKind, EventPayload, EventSink, FunctionCallRequest,
    FunctionCallResult, InboundEvent, ResponseText, SessionError, SessionUpdate, Transcript,
    TranscriptRole,
};
pub use heartbeat::{HeartbeatMonitor, HeartbeatOutcome, Liveness};
pub use metrics::{MetricsSnapshot, SessionMetrics};
pub use openai::AudioEncoding;
pub use session::{SessionInput, SessionManager, SessionSnapshot};
pub use transport::{
    Transport, TransportChannel, TransportMessage, TransportSink, TransportStream,
    WebSocketTransport,
};

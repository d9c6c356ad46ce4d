//! Realtime audio streaming handlers
//!
//! # Protocol
//!
//! ## Client → Server
//!
//! - **Binary frames**: Audio data (PCM 16-bit, 24kHz, mono)
//! - **text_input**: Typed user message
//! - **stop**: End the stream
//!
//! ## Server → Client
//!
//! - **Binary frames**: Assistant audio (PCM 16-bit, 24kHz, mono)
//! - **session**: Session lifecycle (state changes, reconnects)
//! - **transcript**: Speech transcription (user or assistant)
//! - **response_text**: Assistant text output
//! - **function_call** / **function_result**: Workout operations run for the model
//! - **error**: Error message
//! - **closing**: Connection closing

mod handler;
pub mod messages;
mod session;

pub use handler::realtime_stream_handler;
pub use session::{realtime_health, start_session};

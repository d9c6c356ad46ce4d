//! HTTP and WebSocket request handlers
//!
//! - `api` - Health check endpoint
//! - `realtime` - Realtime audio streaming, session bootstrap and health
//! - `workouts` - Workout records REST API

pub mod api;
pub mod realtime;
pub mod workouts;

pub use realtime::realtime_stream_handler;

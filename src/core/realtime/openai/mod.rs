//! OpenAI Realtime protocol.
//!
//! Wire-level event types and endpoint settings used by the session to talk to
//! the remote model over a WebSocket.
//!
//! # Audio Format
//!
//! Input and output audio is PCM 16-bit signed little-endian at 24kHz.
//! G.711 u-law and a-law are also accepted at 8kHz.

mod config;
mod messages;

pub use config::{
    AudioEncoding, OPENAI_BETA_HEADER, OPENAI_REALTIME_SAMPLE_RATE, OPENAI_REALTIME_URL,
    realtime_url,
};
pub use messages::{
    ApiError, ClientEvent, ContentPart, ConversationItem, InputAudioTranscription, MaxTokens,
    ServerEvent, SessionConfig, ToolDef, TurnDetection,
};

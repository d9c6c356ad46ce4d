//! Base types for the realtime session core.
//!
//! This module defines the error taxonomy, the immutable configuration shared by
//! the session components, and the session lifecycle state.
//!
//! # Audio Format
//!
//! The session negotiates PCM 16-bit signed little-endian, 24kHz, mono by default.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use super::openai::{AudioEncoding, OPENAI_REALTIME_SAMPLE_RATE};

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during realtime session operations.
///
/// Transport failures are contained inside the connection supervisor until the
/// reconnect budget is exhausted; only `ReconnectExhausted` escapes to the caller
/// after the session has started.
#[derive(Debug, Clone, Error)]
pub enum RealtimeError {
    /// The initial connection could not be established within the reconnect policy
    #[error("Connection failed after {attempts} attempt(s): {reason}")]
    ConnectionFailed { attempts: u32, reason: String },

    /// Read, write or close failure on the transport
    #[error("Transport error: {0}")]
    Transport(String),

    /// Reconnection gave up; the session is closed
    #[error("Reconnect attempts exhausted after {attempts} attempt(s): {last_error}")]
    ReconnectExhausted { attempts: u32, last_error: String },

    /// Malformed or unexpected message
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Caller input the session cannot accept
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Operation not permitted in the current session state
    #[error("Invalid session state: expected {expected}, found {actual}")]
    InvalidState {
        expected: &'static str,
        actual: SessionState,
    },

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Authentication failed
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The session was closed by the caller
    #[error("Session closed")]
    Closed,
}

impl RealtimeError {
    /// Whether the supervisor should treat this error as recoverable by reconnecting.
    pub fn is_transport(&self) -> bool {
        matches!(self, RealtimeError::Transport(_))
    }
}

impl From<serde_json::Error> for RealtimeError {
    fn from(err: serde_json::Error) -> Self {
        RealtimeError::Serialization(err.to_string())
    }
}

/// Result type for realtime operations.
pub type RealtimeResult<T> = Result<T, RealtimeError>;

// =============================================================================
// Configuration Types
// =============================================================================

/// Reconnection policy with exponential backoff.
///
/// `delay(n) = min(max_delay, initial_delay * base^n)` for the n-th consecutive
/// failed attempt (n starts at 0).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    /// Maximum number of consecutive reconnection attempts before giving up.
    /// Default: 5
    pub max_retries: u32,

    /// Delay before the first attempt (milliseconds).
    /// Default: 1000ms
    pub initial_delay_ms: u64,

    /// Upper bound for any single delay (milliseconds).
    /// Default: 60000ms
    pub max_delay_ms: u64,

    /// Multiplier for exponential backoff.
    /// Default: 2.0
    pub exponential_base: f64,

    /// Add up to ±25% jitter to each delay.
    /// Default: false
    pub jitter: bool,

    /// Upper bound for one connection attempt, handshake and session restore
    /// included (milliseconds). An attempt that overruns counts as failed.
    /// Default: 30000ms
    pub connect_timeout_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_delay_ms: 1000,
            max_delay_ms: 60_000,
            exponential_base: 2.0,
            jitter: false,
            connect_timeout_ms: 30_000,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before the given attempt (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let base_delay = self.initial_delay_ms as f64;
        let delay = base_delay * self.exponential_base.powi(attempt.min(i32::MAX as u32) as i32);
        let delay = delay.min(self.max_delay_ms as f64);

        let delay = if self.jitter {
            (delay + rand_jitter(delay * 0.25)).max(0.0)
        } else {
            delay
        };

        Duration::from_millis(delay as u64)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Check whether another attempt is allowed after `failures` consecutive failures.
    pub fn should_retry(&self, failures: u32) -> bool {
        failures < self.max_retries
    }

    pub fn validate(&self) -> RealtimeResult<()> {
        if self.exponential_base < 1.0 {
            return Err(RealtimeError::InvalidConfiguration(
                "reconnect exponential_base must be >= 1.0".to_string(),
            ));
        }
        if self.initial_delay_ms > self.max_delay_ms {
            return Err(RealtimeError::InvalidConfiguration(
                "reconnect initial_delay_ms must not exceed max_delay_ms".to_string(),
            ));
        }
        if self.connect_timeout_ms == 0 {
            return Err(RealtimeError::InvalidConfiguration(
                "reconnect connect_timeout_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Generate a pseudo-random jitter value using a simple LCG.
fn rand_jitter(range: f64) -> f64 {
    use std::time::SystemTime;
    let seed = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;
    let random = ((seed.wrapping_mul(1103515245).wrapping_add(12345)) % (1 << 31)) as f64;
    let normalized = random / (1u64 << 31) as f64;
    (normalized - 0.5) * 2.0 * range
}

/// Liveness probe settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    /// Interval between probes (milliseconds). Default: 30000
    pub interval_ms: u64,
    /// Time without an acknowledgment before the connection is declared dead.
    /// Default: 2 × interval
    pub timeout_ms: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: 30_000,
            timeout_ms: 60_000,
        }
    }
}

impl HeartbeatConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Jitter buffer settings, shared by the ingress and egress buffers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Maximum number of frames held. Default: 256
    pub capacity_frames: usize,
    /// Buffered duration required before playout starts. Default: 100ms
    pub target_fill_ms: u64,
    /// Below this level an active buffer feeds silence. Default: 20ms
    pub low_water_ms: u64,
    /// Duration of a synthesized silence frame. Default: 20ms
    pub silence_frame_ms: u64,
    /// Consecutive silence frames before the buffer goes idle. Default: 25
    pub max_silence_frames: u32,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            capacity_frames: 256,
            target_fill_ms: 100,
            low_water_ms: 20,
            silence_frame_ms: 20,
            max_silence_frames: 25,
        }
    }
}

/// Negotiated audio format of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    /// Sample encoding
    pub encoding: AudioEncoding,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Channel count
    pub channels: u16,
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self {
            encoding: AudioEncoding::Pcm16,
            sample_rate: OPENAI_REALTIME_SAMPLE_RATE,
            channels: 1,
        }
    }
}

impl AudioFormat {
    /// Bytes of audio per millisecond.
    pub fn bytes_per_ms(&self) -> f64 {
        let bytes_per_sample = self.encoding.bytes_per_sample() as f64;
        self.sample_rate as f64 * self.channels as f64 * bytes_per_sample / 1000.0
    }

    /// Duration of a payload of `len` bytes.
    pub fn duration_of(&self, len: usize) -> Duration {
        let per_ms = self.bytes_per_ms();
        if per_ms <= 0.0 {
            return Duration::ZERO;
        }
        Duration::from_micros(((len as f64 / per_ms) * 1000.0) as u64)
    }

    /// Number of bytes in `ms` milliseconds of audio, rounded down to whole samples.
    pub fn bytes_for(&self, ms: u64) -> usize {
        let frame = self.encoding.bytes_per_sample() * self.channels as usize;
        let raw = (self.bytes_per_ms() * ms as f64) as usize;
        raw - raw % frame.max(1)
    }
}

/// Default assistant persona sent with every session configuration.
pub const DEFAULT_INSTRUCTIONS: &str = "You are Arnold, a voice workout assistant. \
Listen for exercises, rep counts and weights, and log each set with the log_set tool. \
Use query_by_exercise and query_recent to answer questions about training history. \
If a tool reports a failure, tell the user briefly that the log could not be reached \
and suggest trying again. Keep replies short, friendly and encouraging.";

/// Session configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
    /// API key for authentication
    pub api_key: String,

    /// Override for the streaming endpoint
    pub url: Option<String>,

    /// Model to use (e.g., "gpt-4o-realtime-preview")
    pub model: String,

    /// Voice ID for audio output
    pub voice: Option<String>,

    /// System instructions for the assistant
    pub instructions: Option<String>,

    /// Temperature for response generation (0.0 to 2.0)
    pub temperature: Option<f32>,

    /// Maximum response tokens (-1 for infinite)
    pub max_response_output_tokens: Option<i32>,

    /// Negotiated audio format (both directions)
    pub audio_format: AudioFormat,

    /// Enable input audio transcription
    pub input_audio_transcription: Option<InputTranscriptionConfig>,

    /// Turn detection configuration
    pub turn_detection: Option<TurnDetectionConfig>,

    /// Response modalities (text, audio, or both)
    pub modalities: Option<Vec<String>>,

    /// Reconnection policy
    pub reconnect: ReconnectPolicy,

    /// Liveness probe settings
    pub heartbeat: HeartbeatConfig,

    /// Jitter buffer settings
    pub buffer: BufferConfig,

    /// Maximum number of function-call results remembered for deduplication
    pub dedup_cache_capacity: u64,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            url: None,
            model: "gpt-4o-realtime-preview".to_string(),
            voice: Some("alloy".to_string()),
            instructions: Some(DEFAULT_INSTRUCTIONS.to_string()),
            temperature: Some(0.8),
            max_response_output_tokens: Some(4096),
            audio_format: AudioFormat::default(),
            input_audio_transcription: Some(InputTranscriptionConfig::default()),
            turn_detection: Some(TurnDetectionConfig::default()),
            modalities: Some(vec!["text".to_string(), "audio".to_string()]),
            reconnect: ReconnectPolicy::default(),
            heartbeat: HeartbeatConfig::default(),
            buffer: BufferConfig::default(),
            dedup_cache_capacity: 10_000,
        }
    }
}

impl RealtimeConfig {
    pub fn validate(&self) -> RealtimeResult<()> {
        self.reconnect.validate()?;
        if self.heartbeat.interval_ms == 0 {
            return Err(RealtimeError::InvalidConfiguration(
                "heartbeat interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.heartbeat.timeout_ms < self.heartbeat.interval_ms {
            return Err(RealtimeError::InvalidConfiguration(
                "heartbeat timeout_ms must be at least interval_ms".to_string(),
            ));
        }
        if self.buffer.capacity_frames == 0 {
            return Err(RealtimeError::InvalidConfiguration(
                "buffer capacity_frames must be greater than zero".to_string(),
            ));
        }
        if self.audio_format.channels == 0 || self.audio_format.sample_rate == 0 {
            return Err(RealtimeError::InvalidConfiguration(
                "audio format needs a sample rate and at least one channel".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration for input audio transcription.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputTranscriptionConfig {
    /// Model to use for transcription (e.g., "whisper-1")
    pub model: String,
}

impl Default for InputTranscriptionConfig {
    fn default() -> Self {
        Self {
            model: "whisper-1".to_string(),
        }
    }
}

/// Configuration for turn detection (VAD).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TurnDetectionConfig {
    /// Server-side VAD
    #[serde(rename = "server_vad")]
    ServerVad {
        /// Activation threshold (0.0 to 1.0)
        #[serde(default)]
        threshold: Option<f32>,
        /// Amount of audio to include before voice detection (ms)
        #[serde(default)]
        prefix_padding_ms: Option<u32>,
        /// Silence duration before end of turn (ms)
        #[serde(default)]
        silence_duration_ms: Option<u32>,
    },
    /// No automatic turn detection
    #[serde(rename = "none")]
    None,
}

impl Default for TurnDetectionConfig {
    fn default() -> Self {
        TurnDetectionConfig::ServerVad {
            threshold: Some(0.5),
            prefix_padding_ms: Some(300),
            silence_duration_ms: Some(200),
        }
    }
}

// =============================================================================
// Session State
// =============================================================================

/// Lifecycle state of a session.
///
/// ```text
/// CREATED -> CONNECTING -> CONNECTED <-> RECONNECTING -> CONNECTED | CLOSED
/// ```
/// Any state may move to CLOSED on close or unrecoverable error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    #[default]
    Created,
    Connecting,
    Connected,
    Reconnecting,
    Closed,
}

impl SessionState {
    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Created, Connecting)
                | (Connecting, Connected)
                | (Connected, Reconnecting)
                | (Reconnecting, Connected)
                | (Created | Connecting | Connected | Reconnecting, Closed)
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Created => write!(f, "CREATED"),
            SessionState::Connecting => write!(f, "CONNECTING"),
            SessionState::Connected => write!(f, "CONNECTED"),
            SessionState::Reconnecting => write!(f, "RECONNECTING"),
            SessionState::Closed => write!(f, "CLOSED"),
        }
    }
}

//! Endpoint and audio settings for the OpenAI Realtime protocol.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::core::realtime::base::{RealtimeError, RealtimeResult};

/// OpenAI Realtime API WebSocket endpoint.
pub const OPENAI_REALTIME_URL: &str = "wss://api.openai.com/v1/realtime";

/// Default audio sample rate for OpenAI Realtime API.
pub const OPENAI_REALTIME_SAMPLE_RATE: u32 = 24000;

/// Beta header required by the Realtime API.
pub const OPENAI_BETA_HEADER: (&str, &str) = ("OpenAI-Beta", "realtime=v1");

/// Build the connection URL for a model, optionally against an override endpoint.
pub fn realtime_url(endpoint: Option<&str>, model: &str) -> RealtimeResult<Url> {
    let base = endpoint.unwrap_or(OPENAI_REALTIME_URL);
    let mut url = Url::parse(base)
        .map_err(|e| RealtimeError::InvalidConfiguration(format!("invalid endpoint {base}: {e}")))?;

    match url.scheme() {
        "ws" | "wss" => {}
        other => {
            return Err(RealtimeError::InvalidConfiguration(format!(
                "endpoint scheme must be ws or wss, got {other}"
            )));
        }
    }

    if !model.is_empty() && !url.query_pairs().any(|(k, _)| k == "model") {
        url.query_pairs_mut().append_pair("model", model);
    }
    Ok(url)
}

// =============================================================================
// Audio Encodings
// =============================================================================

/// Audio encodings the session can negotiate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AudioEncoding {
    /// PCM 16-bit signed little-endian (default)
    #[default]
    #[serde(rename = "pcm16")]
    Pcm16,
    /// G.711 u-law
    #[serde(rename = "g711_ulaw")]
    G711Ulaw,
    /// G.711 a-law
    #[serde(rename = "g711_alaw")]
    G711Alaw,
}

impl AudioEncoding {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pcm16 => "pcm16",
            Self::G711Ulaw => "g711_ulaw",
            Self::G711Alaw => "g711_alaw",
        }
    }

    #[inline]
    pub fn bytes_per_sample(&self) -> usize {
        match self {
            Self::Pcm16 => 2,
            Self::G711Ulaw | Self::G711Alaw => 1,
        }
    }

    /// Parse from string, with fallback to PCM16.
    pub fn from_str_or_default(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "g711_ulaw" | "ulaw" | "mulaw" => Self::G711Ulaw,
            "g711_alaw" | "alaw" => Self::G711Alaw,
            _ => Self::Pcm16,
        }
    }
}

impl std::fmt::Display for AudioEncoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

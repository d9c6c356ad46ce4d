//! Session bootstrap.
//!
//! Clients that manage their own streaming connection first ask the gateway
//! where to connect and which audio format to speak. The same types back the
//! `POST /realtime/session/start` handler.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::base::{AudioFormat, RealtimeError, RealtimeResult};

/// Path of the bootstrap endpoint.
pub const SESSION_START_PATH: &str = "/realtime/session/start";

/// Path of the streaming endpoint.
pub const STREAM_PATH: &str = "/realtime/stream";

const BOOTSTRAP_TIMEOUT: Duration = Duration::from_secs(10);

/// Audio format as advertised to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioFormatInfo {
    pub encoding: String,
    pub sample_rate: u32,
    pub channels: u16,
}

impl From<&AudioFormat> for AudioFormatInfo {
    fn from(format: &AudioFormat) -> Self {
        Self {
            encoding: format.encoding.as_str().to_string(),
            sample_rate: format.sample_rate,
            channels: format.channels,
        }
    }
}

/// Response of the bootstrap endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionParams {
    pub status: String,
    /// Path (or absolute URL) of the streaming endpoint
    pub websocket_url: String,
    pub audio_format: AudioFormatInfo,
    pub instructions: String,
}

impl ConnectionParams {
    pub fn ready(format: &AudioFormat) -> Self {
        Self {
            status: "ready".to_string(),
            websocket_url: STREAM_PATH.to_string(),
            audio_format: format.into(),
            instructions: "Connect to the WebSocket endpoint to start streaming audio".to_string(),
        }
    }

    /// Absolute streaming URL for a gateway at `base_url`.
    ///
    /// `http` becomes `ws` and `https` becomes `wss`; an absolute
    /// `websocket_url` is returned unchanged.
    pub fn stream_url(&self, base_url: &str) -> RealtimeResult<url::Url> {
        if let Ok(url) = url::Url::parse(&self.websocket_url) {
            return Ok(url);
        }

        let mut url = url::Url::parse(base_url)
            .and_then(|base| base.join(&self.websocket_url))
            .map_err(|e| RealtimeError::InvalidConfiguration(format!("invalid base url: {e}")))?;
        let scheme = match url.scheme() {
            "https" => "wss",
            "http" => "ws",
            other => other,
        }
        .to_string();
        url.set_scheme(&scheme).map_err(|_| {
            RealtimeError::InvalidConfiguration(format!("cannot use scheme {scheme} for streaming"))
        })?;
        Ok(url)
    }
}

/// Ask the gateway at `base_url` for connection parameters.
pub async fn fetch_connection_params(base_url: &str) -> RealtimeResult<ConnectionParams> {
    let url = format!("{}{}", base_url.trim_end_matches('/'), SESSION_START_PATH);
    debug!(url = %url, "Fetching connection parameters");

    let response = reqwest::Client::new()
        .post(&url)
        .timeout(BOOTSTRAP_TIMEOUT)
        .send()
        .await
        .map_err(|e| RealtimeError::Transport(format!("bootstrap request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(RealtimeError::Protocol(format!(
            "bootstrap failed: HTTP {status} - {body}"
        )));
    }

    let params: ConnectionParams = response
        .json()
        .await
        .map_err(|e| RealtimeError::Protocol(format!("invalid bootstrap response: {e}")))?;

    if params.status != "ready" {
        return Err(RealtimeError::Protocol(format!(
            "gateway not ready: {}",
            params.status
        )));
    }
    Ok(params)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ready_params_shape() {
        let params = ConnectionParams::ready(&AudioFormat::default());
        let json = serde_json::to_value(&params).unwrap();
        assert_eq!(json["status"], "ready");
        assert_eq!(json["websocket_url"], "/realtime/stream");
        assert_eq!(json["audio_format"]["encoding"], "pcm16");
        assert_eq!(json["audio_format"]["sample_rate"], 24000);
        assert_eq!(json["audio_format"]["channels"], 1);
    }

    #[test]
    fn test_stream_url() {
        let params = ConnectionParams::ready(&AudioFormat::default());
        assert_eq!(
            params.stream_url("http://localhost:8000").unwrap().as_str(),
            "ws://localhost:8000/realtime/stream"
        );
        assert_eq!(
            params.stream_url("https://gym.example.com/").unwrap().as_str(),
            "wss://gym.example.com/realtime/stream"
        );

        let absolute = ConnectionParams {
            websocket_url: "wss://edge.example.com/stream".to_string(),
            ..params
        };
        assert_eq!(
            absolute.stream_url("http://localhost:8000").unwrap().as_str(),
            "wss://edge.example.com/stream"
        );
    }
}

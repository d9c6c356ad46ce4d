//! Transport seam between the session and the remote model.
//!
//! The session only depends on [`Transport`]; production sessions use
//! [`WebSocketTransport`], tests substitute an in-memory implementation.

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::pin::Pin;
use tokio_tungstenite::tungstenite::{
    self, Message,
    client::IntoClientRequest,
    http::{HeaderValue, StatusCode},
    protocol::{CloseFrame, frame::coding::CloseCode},
};
use url::Url;

use super::base::{RealtimeConfig, RealtimeError, RealtimeResult};
use super::openai::{OPENAI_BETA_HEADER, realtime_url};

/// Maximum size of a single inbound message.
const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// A transport-level message.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportMessage {
    Text(String),
    Binary(Bytes),
    Ping(Bytes),
    Pong(Bytes),
    Close { code: u16, reason: String },
}

impl TransportMessage {
    pub fn normal_close() -> Self {
        TransportMessage::Close {
            code: 1000,
            reason: "session closed".to_string(),
        }
    }
}

pub type TransportSink = Pin<Box<dyn Sink<TransportMessage, Error = RealtimeError> + Send>>;
pub type TransportStream = Pin<Box<dyn Stream<Item = RealtimeResult<TransportMessage>> + Send>>;

/// Both halves of an established connection.
pub struct TransportChannel {
    pub sink: TransportSink,
    pub stream: TransportStream,
}

/// Opens connections to the remote model.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a new connection. Each call yields an independent channel.
    async fn connect(&self) -> RealtimeResult<TransportChannel>;

    /// Endpoint description for logs.
    fn endpoint(&self) -> String;
}

// =============================================================================
// WebSocket Transport
// =============================================================================

/// WebSocket transport to the OpenAI Realtime endpoint.
#[derive(Debug, Clone)]
pub struct WebSocketTransport {
    url: Url,
    api_key: String,
}

impl WebSocketTransport {
    pub fn new(url: Url, api_key: impl Into<String>) -> Self {
        Self {
            url,
            api_key: api_key.into(),
        }
    }

    pub fn from_config(config: &RealtimeConfig) -> RealtimeResult<Self> {
        if config.api_key.is_empty() {
            return Err(RealtimeError::InvalidConfiguration(
                "API key is required".to_string(),
            ));
        }
        let url = realtime_url(config.url.as_deref(), &config.model)?;
        Ok(Self::new(url, config.api_key.clone()))
    }

    fn request(&self) -> RealtimeResult<tungstenite::handshake::client::Request> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| RealtimeError::InvalidConfiguration(e.to_string()))?;

        let auth = HeaderValue::from_str(&format!("Bearer {}", self.api_key))
            .map_err(|e| RealtimeError::InvalidConfiguration(format!("invalid API key: {e}")))?;
        let headers = request.headers_mut();
        headers.insert("Authorization", auth);
        headers.insert(OPENAI_BETA_HEADER.0, HeaderValue::from_static(OPENAI_BETA_HEADER.1));
        Ok(request)
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn connect(&self) -> RealtimeResult<TransportChannel> {
        let request = self.request()?;
        let ws_config = tungstenite::protocol::WebSocketConfig::default()
            .max_message_size(Some(MAX_MESSAGE_SIZE));

        let (ws_stream, _response) =
            tokio_tungstenite::connect_async_with_config(request, Some(ws_config), false)
                .await
                .map_err(map_connect_error)?;

        tracing::debug!(endpoint = %self.url, "WebSocket connected");

        let (ws_sink, ws_stream) = ws_stream.split();

        let sink = ws_sink
            .sink_map_err(|e| RealtimeError::Transport(e.to_string()))
            .with(|msg: TransportMessage| async move { Ok::<_, RealtimeError>(into_ws(msg)) });

        let stream = ws_stream.filter_map(|msg| async move {
            match msg {
                Ok(msg) => from_ws(msg).map(Ok),
                Err(e) => Some(Err(RealtimeError::Transport(e.to_string()))),
            }
        });

        Ok(TransportChannel {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        })
    }

    fn endpoint(&self) -> String {
        self.url.to_string()
    }
}

fn map_connect_error(err: tungstenite::Error) -> RealtimeError {
    match err {
        tungstenite::Error::Http(response)
            if response.status() == StatusCode::UNAUTHORIZED
                || response.status() == StatusCode::FORBIDDEN =>
        {
            RealtimeError::AuthenticationFailed(format!("handshake rejected: {}", response.status()))
        }
        other => RealtimeError::Transport(other.to_string()),
    }
}

fn into_ws(msg: TransportMessage) -> Message {
    match msg {
        TransportMessage::Text(text) => Message::Text(text.into()),
        TransportMessage::Binary(data) => Message::Binary(data),
        TransportMessage::Ping(data) => Message::Ping(data),
        TransportMessage::Pong(data) => Message::Pong(data),
        TransportMessage::Close { code, reason } => Message::Close(Some(CloseFrame {
            code: CloseCode::from(code),
            reason: reason.into(),
        })),
    }
}

fn from_ws(msg: Message) -> Option<TransportMessage> {
    match msg {
        Message::Text(text) => Some(TransportMessage::Text(text.as_str().to_owned())),
        Message::Binary(data) => Some(TransportMessage::Binary(data)),
        Message::Ping(data) => Some(TransportMessage::Ping(data)),
        Message::Pong(data) => Some(TransportMessage::Pong(data)),
        Message::Close(frame) => Some(match frame {
            Some(frame) => TransportMessage::Close {
                code: frame.code.into(),
                reason: frame.reason.as_str().to_owned(),
            },
            None => TransportMessage::Close {
                code: 1005,
                reason: String::new(),
            },
        }),
        Message::Frame(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config_requires_api_key() {
        let err = WebSocketTransport::from_config(&RealtimeConfig::default()).unwrap_err();
        assert!(matches!(err, RealtimeError::InvalidConfiguration(_)));
    }

    #[test]
    fn test_request_headers() {
        let config = RealtimeConfig {
            api_key: "sk-test".to_string(),
            ..Default::default()
        };
        let transport = WebSocketTransport::from_config(&config).unwrap();
        let request = transport.request().unwrap();

        assert_eq!(request.headers()["Authorization"], "Bearer sk-test");
        assert_eq!(request.headers()["OpenAI-Beta"], "realtime=v1");
        assert_eq!(
            request.uri().to_string(),
            "wss://api.openai.com/v1/realtime?model=gpt-4o-realtime-preview"
        );
    }

    #[test]
    fn test_close_frame_conversion() {
        let msg = into_ws(TransportMessage::normal_close());
        match from_ws(msg) {
            Some(TransportMessage::Close { code, reason }) => {
                assert_eq!(code, 1000);
                assert_eq!(reason, "session closed");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_connect_refused_is_transport_error() {
        let transport = WebSocketTransport::new(
            Url::parse("ws://127.0.0.1:1/realtime").unwrap(),
            "sk-test",
        );
        match transport.connect().await {
            Err(RealtimeError::Transport(_)) => {}
            Err(other) => panic!("unexpected error {other:?}"),
            Ok(_) => panic!("connection should fail"),
        }
    }
}

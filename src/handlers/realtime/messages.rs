//! Realtime WebSocket message types
//!
//! Client frames are either binary PCM16 audio or small JSON control messages.
//! Server frames are binary audio or JSON event messages derived from the
//! session's inbound events.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::realtime::{EventPayload, InboundEvent, SessionUpdate};

/// Maximum allowed size for text input (50 KB)
pub const MAX_TEXT_SIZE: usize = 50 * 1024;

// =============================================================================
// Incoming Messages (Client -> Server)
// =============================================================================

/// Incoming JSON messages from the client
#[derive(Debug, Deserialize, Serialize, PartialEq)]
#[serde(tag = "type")]
pub enum StreamIncomingMessage {
    /// Typed user message
    #[serde(rename = "text_input")]
    TextInput {
        #[serde(default)]
        text: String,
    },

    /// End the stream
    #[serde(rename = "stop")]
    Stop,
}

// =============================================================================
// Outgoing Messages (Server -> Client)
// =============================================================================

/// Outgoing JSON messages to the client
#[derive(Debug, Serialize)]
#[serde(tag = "type")]
pub enum StreamOutgoingMessage {
    /// Session lifecycle notification
    #[serde(rename = "session")]
    Session {
        session_id: String,
        #[serde(flatten)]
        update: SessionUpdate,
    },

    /// Transcript of user or assistant speech
    #[serde(rename = "transcript")]
    Transcript {
        text: String,
        role: String,
        is_final: bool,
    },

    /// Assistant text output
    #[serde(rename = "response_text")]
    ResponseText { text: String, is_final: bool },

    /// Function call requested by the model
    #[serde(rename = "function_call")]
    FunctionCall {
        call_id: String,
        name: String,
        arguments: Value,
    },

    /// Result of a function call
    #[serde(rename = "function_result")]
    FunctionResult {
        call_id: String,
        name: String,
        success: bool,
        output: Value,
    },

    /// Error message
    #[serde(rename = "error")]
    Error {
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<String>,
        message: String,
    },

    /// Connection closing
    #[serde(rename = "closing")]
    Closing { reason: String },
}

impl StreamOutgoingMessage {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        StreamOutgoingMessage::Error {
            code: Some(code.to_string()),
            message: message.into(),
        }
    }
}

// =============================================================================
// Message Routing
// =============================================================================

/// Message routing for the socket writer
#[derive(Debug)]
pub enum StreamMessageRoute {
    /// JSON text message
    Outgoing(StreamOutgoingMessage),
    /// Binary audio data
    Audio(Bytes),
    /// Close connection
    Close,
}

impl StreamMessageRoute {
    /// Translate a session event into what the client sees.
    pub fn from_event(session_id: &str, event: InboundEvent) -> Self {
        let message = match event.payload {
            EventPayload::AudioDelta(audio) => return StreamMessageRoute::Audio(audio.data),
            EventPayload::TranscriptDelta(t) => StreamOutgoingMessage::Transcript {
                text: t.text,
                role: t.role.to_string(),
                is_final: t.is_final,
            },
            EventPayload::ResponseText(r) => StreamOutgoingMessage::ResponseText {
                text: r.text,
                is_final: r.is_final,
            },
            EventPayload::FunctionCallRequest(call) => StreamOutgoingMessage::FunctionCall {
                call_id: call.call_id,
                name: call.name,
                arguments: call.arguments,
            },
            EventPayload::FunctionCallResult(result) => StreamOutgoingMessage::FunctionResult {
                call_id: result.call_id,
                name: result.name,
                success: result.success,
                output: result.output,
            },
            EventPayload::Error(err) => {
                let code = serde_json::to_value(err.kind)
                    .ok()
                    .and_then(|v| v.as_str().map(str::to_string));
                StreamOutgoingMessage::Error {
                    code,
                    message: err.message,
                }
            }
            EventPayload::SessionUpdated(update) => StreamOutgoingMessage::Session {
                session_id: session_id.to_string(),
                update,
            },
        };
        StreamMessageRoute::Outgoing(message)
    }
}

/// Error type for message validation failures
#[derive(Debug, Clone, thiserror::Error)]
pub enum StreamValidationError {
    #[error("Text too large: {size} bytes (max: {max} bytes)")]
    TextTooLarge { size: usize, max: usize },
    #[error("Text input must not be empty")]
    EmptyText,
}

impl StreamIncomingMessage {
    /// Validates message field sizes to prevent resource exhaustion.
    pub fn validate(&self) -> Result<(), StreamValidationError> {
        match self {
            StreamIncomingMessage::TextInput { text } => {
                if text.len() > MAX_TEXT_SIZE {
                    return Err(StreamValidationError::TextTooLarge {
                        size: text.len(),
                        max: MAX_TEXT_SIZE,
                    });
                }
                if text.trim().is_empty() {
                    return Err(StreamValidationError::EmptyText);
                }
                Ok(())
            }
            StreamIncomingMessage::Stop => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::realtime::{
        AudioDelta, ErrorKind, FunctionCallResult, SessionState, Transcript, TranscriptRole,
    };
    use serde_json::json;

    fn event(payload: EventPayload) -> InboundEvent {
        InboundEvent { seq: 0, payload }
    }

    fn outgoing_json(route: StreamMessageRoute) -> Value {
        match route {
            StreamMessageRoute::Outgoing(msg) => serde_json::to_value(&msg).unwrap(),
            other => panic!("expected JSON message, got {other:?}"),
        }
    }

    #[test]
    fn test_incoming_deserialization() {
        let msg: StreamIncomingMessage =
            serde_json::from_str(r#"{"type": "text_input", "text": "log 5 squats at 225"}"#)
                .unwrap();
        assert_eq!(
            msg,
            StreamIncomingMessage::TextInput {
                text: "log 5 squats at 225".to_string()
            }
        );

        let stop: StreamIncomingMessage = serde_json::from_str(r#"{"type": "stop"}"#).unwrap();
        assert_eq!(stop, StreamIncomingMessage::Stop);

        assert!(serde_json::from_str::<StreamIncomingMessage>(r#"{"type": "dance"}"#).is_err());
    }

    #[test]
    fn test_validation() {
        let too_big = StreamIncomingMessage::TextInput {
            text: "a".repeat(MAX_TEXT_SIZE + 1),
        };
        assert!(matches!(
            too_big.validate(),
            Err(StreamValidationError::TextTooLarge { .. })
        ));
        let blank = StreamIncomingMessage::TextInput {
            text: "  ".to_string(),
        };
        assert!(matches!(blank.validate(), Err(StreamValidationError::EmptyText)));
        assert!(StreamIncomingMessage::Stop.validate().is_ok());
    }

    #[test]
    fn test_audio_routes_as_binary() {
        let route = StreamMessageRoute::from_event(
            "s1",
            event(EventPayload::AudioDelta(AudioDelta {
                data: Bytes::from_static(&[1, 2, 3, 4]),
                silence: false,
            })),
        );
        assert!(matches!(route, StreamMessageRoute::Audio(ref b) if b.len() == 4));
    }

    #[test]
    fn test_transcript_and_result_messages() {
        let transcript = outgoing_json(StreamMessageRoute::from_event(
            "s1",
            event(EventPayload::TranscriptDelta(Transcript {
                role: TranscriptRole::User,
                text: "10 reps bench press 135 pounds".to_string(),
                is_final: true,
                item_id: None,
            })),
        ));
        assert_eq!(transcript["type"], "transcript");
        assert_eq!(transcript["role"], "user");
        assert_eq!(transcript["is_final"], true);

        let result = outgoing_json(StreamMessageRoute::from_event(
            "s1",
            event(EventPayload::FunctionCallResult(FunctionCallResult {
                call_id: "call_1".to_string(),
                name: "log_set".to_string(),
                success: true,
                output: json!({"success": true}),
            })),
        ));
        assert_eq!(result["type"], "function_result");
        assert_eq!(result["output"]["success"], true);
    }

    #[test]
    fn test_session_and_error_messages() {
        let session = outgoing_json(StreamMessageRoute::from_event(
            "s1",
            event(EventPayload::SessionUpdated(SessionUpdate::StateChanged {
                state: SessionState::Reconnecting,
            })),
        ));
        assert_eq!(
            session,
            json!({"type": "session", "session_id": "s1", "status": "state_changed", "state": "reconnecting"})
        );

        let error = outgoing_json(StreamMessageRoute::from_event(
            "s1",
            event(EventPayload::error(ErrorKind::ReconnectExhausted, "gave up")),
        ));
        assert_eq!(error["code"], "reconnect_exhausted");
        assert_eq!(error["message"], "gave up");
    }
}

//! Realtime protocol messages.
//!
//! Client events are what the session writes; server events are what the
//! dispatcher decodes. Only the server events the session acts on carry fields;
//! lifecycle notifications it does not act on decode into field-less variants so
//! they can be told apart from genuinely unknown messages.
//!
//! Client events (sent to server):
//! - session.update
//! - input_audio_buffer.append / input_audio_buffer.commit
//! - conversation.item.create (user text, assistant text, function_call_output)
//! - response.create

use base64::prelude::*;
use serde::{Deserialize, Serialize};

use crate::core::realtime::base::{
    RealtimeConfig, RealtimeError, RealtimeResult, TurnDetectionConfig,
};

// =============================================================================
// Session Configuration
// =============================================================================

/// `session` body of a `session.update` event.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SessionConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modalities: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_format: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_audio_format: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_transcription: Option<InputAudioTranscription>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn_detection: Option<TurnDetection>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDef>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_response_output_tokens: Option<MaxTokens>,
}

impl SessionConfig {
    /// Build the session configuration sent on every (re)connection.
    pub fn from_config(config: &RealtimeConfig, tools: Vec<ToolDef>) -> Self {
        let format = config.audio_format.encoding.as_str().to_string();
        let tool_choice = if tools.is_empty() {
            None
        } else {
            Some("auto".to_string())
        };

        Self {
            modalities: config.modalities.clone(),
            instructions: config.instructions.clone(),
            voice: config.voice.clone(),
            input_audio_format: Some(format.clone()),
            output_audio_format: Some(format),
            input_audio_transcription: config
                .input_audio_transcription
                .as_ref()
                .map(|t| InputAudioTranscription {
                    model: t.model.clone(),
                }),
            turn_detection: config.turn_detection.as_ref().map(TurnDetection::from),
            tools: if tools.is_empty() { None } else { Some(tools) },
            tool_choice,
            temperature: config.temperature,
            max_response_output_tokens: config.max_response_output_tokens.map(|n| {
                if n < 0 {
                    MaxTokens::Infinite("inf".to_string())
                } else {
                    MaxTokens::Number(n)
                }
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum MaxTokens {
    Number(i32),
    /// Always "inf"
    Infinite(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InputAudioTranscription {
    pub model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum TurnDetection {
    #[serde(rename = "server_vad")]
    ServerVad {
        #[serde(skip_serializing_if = "Option::is_none")]
        threshold: Option<f32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        prefix_padding_ms: Option<u32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        silence_duration_ms: Option<u32>,
    },
    #[serde(rename = "none")]
    None {},
}

impl From<&TurnDetectionConfig> for TurnDetection {
    fn from(config: &TurnDetectionConfig) -> Self {
        match config {
            TurnDetectionConfig::ServerVad {
                threshold,
                prefix_padding_ms,
                silence_duration_ms,
            } => TurnDetection::ServerVad {
                threshold: *threshold,
                prefix_padding_ms: *prefix_padding_ms,
                silence_duration_ms: *silence_duration_ms,
            },
            TurnDetectionConfig::None => TurnDetection::None {},
        }
    }
}

/// Function tool advertised to the remote model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolDef {
    /// Always "function"
    #[serde(rename = "type")]
    pub tool_type: String,
    pub name: String,
    pub description: String,
    /// JSON schema of the arguments object
    pub parameters: serde_json::Value,
}

impl ToolDef {
    pub fn function(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            tool_type: "function".to_string(),
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

// =============================================================================
// Conversation Items
// =============================================================================

/// Conversation item, both as written by the client and as reported by the server.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ConversationItem {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub item_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Vec<ContentPart>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

impl ConversationItem {
    fn message(role: &str, content_type: &str, text: &str) -> Self {
        Self {
            item_type: "message".to_string(),
            role: Some(role.to_string()),
            content: Some(vec![ContentPart {
                content_type: content_type.to_string(),
                text: Some(text.to_string()),
            }]),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContentPart {
    /// input_text, text, input_audio or audio
    #[serde(rename = "type")]
    pub content_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

// =============================================================================
// Client Events
// =============================================================================

/// Events written by the session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionConfig },

    /// Base64-encoded audio
    #[serde(rename = "input_audio_buffer.append")]
    InputAudioBufferAppend { audio: String },

    #[serde(rename = "input_audio_buffer.commit")]
    InputAudioBufferCommit,

    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate { item: ConversationItem },

    #[serde(rename = "response.create")]
    ResponseCreate,
}

impl ClientEvent {
    pub fn audio_append(data: &[u8]) -> Self {
        ClientEvent::InputAudioBufferAppend {
            audio: BASE64_STANDARD.encode(data),
        }
    }

    pub fn user_text(text: &str) -> Self {
        ClientEvent::ConversationItemCreate {
            item: ConversationItem::message("user", "input_text", text),
        }
    }

    /// Assistant turn, used when restoring context on a fresh connection.
    pub fn assistant_text(text: &str) -> Self {
        ClientEvent::ConversationItemCreate {
            item: ConversationItem::message("assistant", "text", text),
        }
    }

    pub fn function_output(call_id: &str, output: &serde_json::Value) -> Self {
        ClientEvent::ConversationItemCreate {
            item: ConversationItem {
                item_type: "function_call_output".to_string(),
                call_id: Some(call_id.to_string()),
                output: Some(output.to_string()),
                ..Default::default()
            },
        }
    }

    /// Text of a user message item, if this is one.
    pub fn as_user_text(&self) -> Option<&str> {
        match self {
            ClientEvent::ConversationItemCreate { item }
                if item.item_type == "message" && item.role.as_deref() == Some("user") =>
            {
                item.content
                    .as_ref()?
                    .iter()
                    .find_map(|part| part.text.as_deref())
            }
            _ => None,
        }
    }

    /// Protocol name of the event, used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ClientEvent::SessionUpdate { .. } => "session.update",
            ClientEvent::InputAudioBufferAppend { .. } => "input_audio_buffer.append",
            ClientEvent::InputAudioBufferCommit => "input_audio_buffer.commit",
            ClientEvent::ConversationItemCreate { .. } => "conversation.item.create",
            ClientEvent::ResponseCreate => "response.create",
        }
    }

    pub fn to_json(&self) -> RealtimeResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

// =============================================================================
// Server Events
// =============================================================================

/// Events read from the remote model.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "error")]
    Error { error: ApiError },

    #[serde(rename = "session.created")]
    SessionCreated {
        #[serde(default)]
        session: SessionInfo,
    },

    #[serde(rename = "session.updated")]
    SessionUpdated {
        #[serde(default)]
        session: SessionInfo,
    },

    /// Final transcript of the user's spoken input
    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    TranscriptionCompleted {
        #[serde(default)]
        item_id: String,
        transcript: String,
    },

    #[serde(rename = "conversation.item.input_audio_transcription.failed")]
    TranscriptionFailed {
        #[serde(default)]
        item_id: String,
        error: ApiError,
    },

    #[serde(rename = "response.audio_transcript.delta")]
    AudioTranscriptDelta {
        #[serde(default)]
        response_id: String,
        #[serde(default)]
        item_id: String,
        delta: String,
    },

    #[serde(rename = "response.audio_transcript.done")]
    AudioTranscriptDone {
        #[serde(default)]
        response_id: String,
        #[serde(default)]
        item_id: String,
        transcript: String,
    },

    #[serde(rename = "response.text.delta")]
    TextDelta {
        #[serde(default)]
        response_id: String,
        #[serde(default)]
        item_id: String,
        delta: String,
    },

    #[serde(rename = "response.text.done")]
    TextDone {
        #[serde(default)]
        response_id: String,
        #[serde(default)]
        item_id: String,
        text: String,
    },

    /// Base64-encoded synthesized audio
    #[serde(rename = "response.audio.delta")]
    AudioDelta {
        #[serde(default)]
        response_id: String,
        #[serde(default)]
        item_id: String,
        delta: String,
    },

    #[serde(rename = "response.audio.done")]
    AudioDone {
        #[serde(default)]
        response_id: String,
    },

    #[serde(rename = "response.output_item.added")]
    OutputItemAdded {
        #[serde(default)]
        response_id: String,
        item: ConversationItem,
    },

    #[serde(rename = "response.function_call_arguments.done")]
    FunctionCallArgumentsDone {
        #[serde(default)]
        response_id: String,
        #[serde(default)]
        item_id: String,
        call_id: String,
        /// Not always present; resolved from `response.output_item.added`
        #[serde(default)]
        name: Option<String>,
        arguments: String,
    },

    #[serde(rename = "response.done")]
    ResponseDone {
        #[serde(default)]
        response: ResponseInfo,
    },

    // Notifications the session does not act on.
    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted {},
    #[serde(rename = "input_audio_buffer.speech_stopped")]
    SpeechStopped {},
    #[serde(rename = "input_audio_buffer.committed")]
    InputAudioBufferCommitted {},
    #[serde(rename = "input_audio_buffer.cleared")]
    InputAudioBufferCleared {},
    #[serde(rename = "conversation.item.created")]
    ConversationItemCreated {},
    #[serde(rename = "response.created")]
    ResponseCreated {},
    #[serde(rename = "response.output_item.done")]
    OutputItemDone {},
    #[serde(rename = "response.content_part.added")]
    ContentPartAdded {},
    #[serde(rename = "response.content_part.done")]
    ContentPartDone {},
    #[serde(rename = "response.function_call_arguments.delta")]
    FunctionCallArgumentsDelta {},
    #[serde(rename = "conversation.item.input_audio_transcription.delta")]
    InputTranscriptionDelta {},
    #[serde(rename = "conversation.item.truncated")]
    ConversationItemTruncated {},
    #[serde(rename = "conversation.item.deleted")]
    ConversationItemDeleted {},
    #[serde(rename = "rate_limits.updated")]
    RateLimitsUpdated {},

    #[serde(other)]
    Unknown,
}

#[derive(Deserialize)]
struct TypeProbe {
    #[serde(rename = "type")]
    kind: String,
}

impl ServerEvent {
    /// Decode a text frame. Unknown event types and malformed JSON are protocol errors.
    pub fn decode(text: &str) -> RealtimeResult<ServerEvent> {
        let event: ServerEvent = serde_json::from_str(text)
            .map_err(|e| RealtimeError::Protocol(format!("malformed server event: {e}")))?;

        if matches!(event, ServerEvent::Unknown) {
            let kind = serde_json::from_str::<TypeProbe>(text)
                .map(|p| p.kind)
                .unwrap_or_default();
            return Err(RealtimeError::Protocol(format!(
                "unknown server event type '{kind}'"
            )));
        }
        Ok(event)
    }

    pub fn decode_audio_delta(delta: &str) -> RealtimeResult<Vec<u8>> {
        BASE64_STANDARD
            .decode(delta)
            .map_err(|e| RealtimeError::Protocol(format!("invalid audio delta: {e}")))
    }
}

// =============================================================================
// Supporting Types
// =============================================================================

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct ApiError {
    #[serde(rename = "type", default)]
    pub error_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionInfo {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResponseInfo {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_audio_append_is_base64() {
        let data = vec![0u8, 1, 2, 3];
        let json: serde_json::Value =
            serde_json::to_value(ClientEvent::audio_append(&data)).unwrap();
        assert_eq!(json["type"], "input_audio_buffer.append");
        let decoded = BASE64_STANDARD
            .decode(json["audio"].as_str().unwrap())
            .unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn test_session_update_from_config() {
        let tools = vec![ToolDef::function(
            "log_set",
            "Log a set",
            json!({"type": "object"}),
        )];
        let session = SessionConfig::from_config(&RealtimeConfig::default(), tools);
        let json = serde_json::to_value(ClientEvent::SessionUpdate { session }).unwrap();

        assert_eq!(json["type"], "session.update");
        assert_eq!(json["session"]["input_audio_format"], "pcm16");
        assert_eq!(json["session"]["output_audio_format"], "pcm16");
        assert_eq!(json["session"]["turn_detection"]["type"], "server_vad");
        assert_eq!(json["session"]["input_audio_transcription"]["model"], "whisper-1");
        assert_eq!(json["session"]["tools"][0]["name"], "log_set");
        assert_eq!(json["session"]["tool_choice"], "auto");
    }

    #[test]
    fn test_function_output_item() {
        let json = serde_json::to_value(ClientEvent::function_output(
            "call_1",
            &json!({"success": true}),
        ))
        .unwrap();
        assert_eq!(json["type"], "conversation.item.create");
        assert_eq!(json["item"]["type"], "function_call_output");
        assert_eq!(json["item"]["call_id"], "call_1");
        assert_eq!(json["item"]["output"], r#"{"success":true}"#);
    }

    #[test]
    fn test_user_text_item() {
        let json = serde_json::to_value(ClientEvent::user_text("hi")).unwrap();
        assert_eq!(json["item"]["role"], "user");
        assert_eq!(json["item"]["content"][0]["type"], "input_text");
        assert_eq!(json["item"]["content"][0]["text"], "hi");

        assert_eq!(ClientEvent::user_text("hi").as_user_text(), Some("hi"));
        assert_eq!(ClientEvent::assistant_text("hi").as_user_text(), None);
        assert_eq!(ClientEvent::ResponseCreate.as_user_text(), None);
    }

    #[test]
    fn test_response_create_serialization() {
        let json = ClientEvent::ResponseCreate.to_json().unwrap();
        assert_eq!(json, r#"{"type":"response.create"}"#);
    }

    #[test]
    fn test_decode_error_event() {
        let event = ServerEvent::decode(
            r#"{"type":"error","error":{"type":"invalid_request_error","message":"Test error"}}"#,
        )
        .unwrap();
        match event {
            ServerEvent::Error { error } => assert_eq!(error.message, "Test error"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_decode_function_call_without_name() {
        let event = ServerEvent::decode(
            r#"{"type":"response.function_call_arguments.done","call_id":"c1","arguments":"{}"}"#,
        )
        .unwrap();
        assert!(matches!(
            event,
            ServerEvent::FunctionCallArgumentsDone { name: None, .. }
        ));
    }

    #[test]
    fn test_decode_ignored_and_unknown() {
        let ignored = ServerEvent::decode(
            r#"{"type":"response.created","response":{"id":"r1","status":"in_progress"}}"#,
        )
        .unwrap();
        assert!(matches!(ignored, ServerEvent::ResponseCreated {}));

        for routine in [
            r#"{"type":"conversation.item.input_audio_transcription.delta","item_id":"i1","content_index":0,"delta":"ten"}"#,
            r#"{"type":"conversation.item.truncated","item_id":"i2","content_index":0,"audio_end_ms":1500}"#,
            r#"{"type":"conversation.item.deleted","item_id":"i3"}"#,
        ] {
            let event = ServerEvent::decode(routine).unwrap();
            assert!(!matches!(event, ServerEvent::Unknown), "{routine}");
        }

        let err = ServerEvent::decode(r#"{"type":"bogus.event"}"#).unwrap_err();
        assert!(err.to_string().contains("bogus.event"));

        let err = ServerEvent::decode("not json").unwrap_err();
        assert!(matches!(err, RealtimeError::Protocol(_)));
    }

    #[test]
    fn test_decode_audio_delta() {
        let original = vec![0u8, 1, 2, 3, 4, 5];
        let encoded = BASE64_STANDARD.encode(&original);
        assert_eq!(ServerEvent::decode_audio_delta(&encoded).unwrap(), original);
        assert!(ServerEvent::decode_audio_delta("@@@").is_err());
    }
}

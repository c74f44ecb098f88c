//! Data-channel event types for the realtime protocol.
//!
//! Every frame on the `oai-events` data channel is one JSON object keyed by
//! `type`. Client events carry an `event_id` assigned locally; server events
//! carry ids prefixed with `event_`.
//!
//! # Protocol Overview
//!
//! Client events (sent to server):
//! - session.update - Register tools and update session settings
//! - conversation.item.create - Add a user message to the conversation
//! - response.create - Ask the model to respond (optionally with instructions)
//! - response.cancel - Cancel the in-progress response
//! - input_audio_buffer.commit - Commit buffered input audio
//! - input_audio_buffer.clear - Discard buffered input audio
//!
//! Server events with a typed representation:
//! - session.created / session.updated
//! - conversation.item.created
//! - response.created / response.done
//! - error
//!
//! Any other server type is accepted and kept as raw JSON.

use serde::{Deserialize, Serialize};

// =============================================================================
// Session Configuration
// =============================================================================

/// Partial session configuration carried by `session.update`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Tool definitions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDef>>,

    /// Tool choice strategy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<String>,
}

/// Tool definition as registered with the remote model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDef {
    /// Tool type (always "function")
    #[serde(rename = "type")]
    pub tool_type: String,
    /// Function name
    pub name: String,
    /// Function description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Function parameters JSON schema
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
}

// =============================================================================
// Conversation Items
// =============================================================================

/// Conversation item (message, function call or function call output).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationItem {
    /// Item ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Item type
    #[serde(rename = "type")]
    pub item_type: String,
    /// Item status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Item role (user, assistant, system)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Content parts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Vec<ContentPart>>,
    /// Call ID for function call
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    /// Function name for function call
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Function arguments for function call (JSON text)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
    /// Function output for function call result
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

impl ConversationItem {
    /// A user message with a single `input_text` part.
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            item_type: "message".to_string(),
            role: Some("user".to_string()),
            content: Some(vec![ContentPart {
                content_type: "input_text".to_string(),
                text: Some(text.into()),
                transcript: None,
            }]),
            ..Default::default()
        }
    }

    pub fn is_user_message(&self) -> bool {
        self.item_type == "message" && self.role.as_deref() == Some("user")
    }

    pub fn is_function_call(&self) -> bool {
        self.item_type == "function_call"
    }

    /// Text of all text-bearing parts joined with spaces.
    ///
    /// Audio parts contribute their transcript when present.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .flatten()
            .filter_map(|part| part.text.as_deref().or(part.transcript.as_deref()))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Content part within a conversation item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentPart {
    /// Content type (input_text, input_audio, text, audio)
    #[serde(rename = "type")]
    pub content_type: String,
    /// Text content
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Transcript of audio content
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,
}

// =============================================================================
// Response Configuration
// =============================================================================

/// Per-response overrides for `response.create`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseConfig {
    /// Instructions for this response only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

// =============================================================================
// Client Events (sent to server)
// =============================================================================

/// Client events sent over the data channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    /// Update session configuration
    #[serde(rename = "session.update")]
    SessionUpdate {
        /// Session configuration
        session: SessionConfig,
    },

    /// Create a conversation item
    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate {
        /// Item to create
        item: ConversationItem,
        /// Previous item ID to insert after
        #[serde(default, skip_serializing_if = "Option::is_none")]
        previous_item_id: Option<String>,
    },

    /// Create a response
    #[serde(rename = "response.create")]
    ResponseCreate {
        /// Response configuration
        #[serde(default, skip_serializing_if = "Option::is_none")]
        response: Option<ResponseConfig>,
    },

    /// Cancel the current response
    #[serde(rename = "response.cancel")]
    ResponseCancel,

    /// Commit the input audio buffer
    #[serde(rename = "input_audio_buffer.commit")]
    InputAudioBufferCommit,

    /// Clear the input audio buffer
    #[serde(rename = "input_audio_buffer.clear")]
    InputAudioBufferClear,
}

impl ClientEvent {
    /// Wire `type` of this event.
    pub fn event_type(&self) -> &'static str {
        match self {
            ClientEvent::SessionUpdate { .. } => "session.update",
            ClientEvent::ConversationItemCreate { .. } => "conversation.item.create",
            ClientEvent::ResponseCreate { .. } => "response.create",
            ClientEvent::ResponseCancel => "response.cancel",
            ClientEvent::InputAudioBufferCommit => "input_audio_buffer.commit",
            ClientEvent::InputAudioBufferClear => "input_audio_buffer.clear",
        }
    }

    /// Plain `response.create` with no overrides.
    pub fn response_create() -> Self {
        ClientEvent::ResponseCreate { response: None }
    }

    /// `response.create` carrying one-off instructions.
    pub fn response_with_instructions(instructions: impl Into<String>) -> Self {
        ClientEvent::ResponseCreate {
            response: Some(ResponseConfig {
                instructions: Some(instructions.into()),
                ..Default::default()
            }),
        }
    }

    /// `conversation.item.create` holding a user text message.
    pub fn user_message(text: impl Into<String>) -> Self {
        ClientEvent::ConversationItemCreate {
            item: ConversationItem::user_text(text),
            previous_item_id: None,
        }
    }

    /// Attach a caller-chosen `event_id`.
    pub fn with_id(self, event_id: impl Into<String>) -> OutgoingEvent {
        OutgoingEvent {
            event_id: Some(event_id.into()),
            event: self,
        }
    }
}

/// A client event plus its optional caller-supplied `event_id`.
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingEvent {
    pub event_id: Option<String>,
    pub event: ClientEvent,
}

impl From<ClientEvent> for OutgoingEvent {
    fn from(event: ClientEvent) -> Self {
        Self {
            event_id: None,
            event,
        }
    }
}

// =============================================================================
// Server Events (received from server)
// =============================================================================

/// Server events received over the data channel.
///
/// Only the events the client acts on are typed; everything else decodes to
/// [`ServerEvent::Other`] and is kept as raw JSON in the event log.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// Error occurred
    #[serde(rename = "error")]
    Error {
        /// Error details
        error: ApiError,
    },

    /// Session created
    #[serde(rename = "session.created")]
    SessionCreated {
        /// Session information
        session: ServerSession,
    },

    /// Session updated
    #[serde(rename = "session.updated")]
    SessionUpdated {
        /// Session information
        session: ServerSession,
    },

    /// Conversation item created
    #[serde(rename = "conversation.item.created")]
    ConversationItemCreated {
        /// Previous item ID
        #[serde(default)]
        previous_item_id: Option<String>,
        /// Created item
        item: ConversationItem,
    },

    /// Response created
    #[serde(rename = "response.created")]
    ResponseCreated {
        /// Response information
        response: Response,
    },

    /// Response done
    #[serde(rename = "response.done")]
    ResponseDone {
        /// Response information
        response: Response,
    },

    /// Any other server event type
    #[serde(other)]
    Other,
}

// =============================================================================
// Supporting Types
// =============================================================================

/// API error information.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ApiError {
    /// Error type
    #[serde(rename = "type", default)]
    pub error_type: String,
    /// Error code
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Error message
    pub message: String,
    /// Parameter that caused the error
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub param: Option<String>,
    /// Event ID that caused the error
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
}

/// Session information reported by the server.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ServerSession {
    /// Session ID
    pub id: Option<String>,
    /// Model used
    pub model: Option<String>,
    /// Expires at timestamp
    pub expires_at: Option<u64>,
    /// Response modalities
    pub modalities: Vec<String>,
    /// System instructions
    pub instructions: Option<String>,
    /// Voice
    pub voice: Option<String>,
    /// Registered tools
    pub tools: Vec<ToolDef>,
    /// Tool choice
    pub tool_choice: Option<String>,
}

/// Response information.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Response {
    /// Response ID
    #[serde(default)]
    pub id: Option<String>,
    /// Response status
    #[serde(default)]
    pub status: Option<String>,
    /// Output items
    #[serde(default)]
    pub output: Vec<ConversationItem>,
}

impl Response {
    /// Function-call items of this response, in output order.
    pub fn function_calls(&self) -> impl Iterator<Item = &ConversationItem> {
        self.output.iter().filter(|item| item.is_function_call())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_client_event_type_matches_wire_tag() {
        let events = [
            ClientEvent::SessionUpdate {
                session: SessionConfig::default(),
            },
            ClientEvent::user_message("hi"),
            ClientEvent::response_create(),
            ClientEvent::ResponseCancel,
            ClientEvent::InputAudioBufferCommit,
            ClientEvent::InputAudioBufferClear,
        ];
        for event in events {
            let value = serde_json::to_value(&event).unwrap();
            assert_eq!(value["type"], event.event_type());
        }
    }

    #[test]
    fn test_user_message_shape() {
        let value = serde_json::to_value(ClientEvent::user_message("hello there")).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "conversation.item.create",
                "item": {
                    "type": "message",
                    "role": "user",
                    "content": [{"type": "input_text", "text": "hello there"}]
                }
            })
        );
    }

    #[test]
    fn test_response_with_instructions() {
        let value =
            serde_json::to_value(ClientEvent::response_with_instructions("Ask a question"))
                .unwrap();
        assert_eq!(value["type"], "response.create");
        assert_eq!(value["response"]["instructions"], "Ask a question");
        assert_eq!(value["response"].as_object().unwrap().len(), 1);
    }

    #[test]
    fn test_bare_response_create() {
        let value = serde_json::to_value(ClientEvent::response_create()).unwrap();
        assert_eq!(value, json!({"type": "response.create"}));
    }

    #[test]
    fn test_server_error_deserialization() {
        let json = r#"{
            "type": "error",
            "event_id": "event_123",
            "error": {
                "type": "invalid_request_error",
                "message": "Test error"
            }
        }"#;
        let event: ServerEvent = serde_json::from_str(json).unwrap();
        match event {
            ServerEvent::Error { error } => {
                assert_eq!(error.message, "Test error");
                assert_eq!(error.error_type, "invalid_request_error");
            }
            _ => panic!("Wrong event type"),
        }
    }

    #[test]
    fn test_unknown_server_type_is_other() {
        let event: ServerEvent =
            serde_json::from_str(r#"{"type": "response.audio.delta", "delta": "AAAA"}"#).unwrap();
        assert_eq!(event, ServerEvent::Other);
    }

    #[test]
    fn test_response_done_function_calls() {
        let json = json!({
            "type": "response.done",
            "event_id": "event_9",
            "response": {
                "id": "resp_1",
                "status": "completed",
                "output": [
                    {"type": "message", "role": "assistant", "content": [{"type": "audio", "transcript": "Sure"}]},
                    {"type": "function_call", "name": "display_weather", "call_id": "call_1", "arguments": "{\"location\":\"Paris\"}"}
                ]
            }
        });
        let event: ServerEvent = serde_json::from_value(json).unwrap();
        let ServerEvent::ResponseDone { response } = event else {
            panic!("Wrong event type");
        };
        let calls: Vec<_> = response.function_calls().collect();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name.as_deref(), Some("display_weather"));
        assert_eq!(response.output[0].text(), "Sure");
    }

    #[test]
    fn test_known_type_with_bad_shape_is_rejected() {
        let result = serde_json::from_str::<ServerEvent>(r#"{"type": "response.done"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_session_created_is_lenient() {
        let event: ServerEvent =
            serde_json::from_str(r#"{"type": "session.created", "session": {"id": "sess_1"}}"#)
                .unwrap();
        assert!(matches!(event, ServerEvent::SessionCreated { .. }));
    }
}

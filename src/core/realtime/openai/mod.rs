//! OpenAI Realtime API wire types.
//!
//! Session negotiation happens over plain HTTPS (see the negotiator); once the
//! peer connection is up, every client and server event travels as a JSON
//! text frame on the `oai-events` data channel.
//!
//! # Supported Models
//!
//! - `gpt-4o-mini-realtime-preview` (default)
//! - `gpt-4o-mini-realtime-preview-2024-12-17`
//! - `gpt-4o-realtime-preview`
//! - `gpt-4o-realtime-preview-2024-12-17`
//!
//! # Supported Voices
//!
//! alloy, ash, ballad, coral, echo, sage, shimmer, verse

mod config;
mod messages;

pub use config::{
    DEFAULT_INSTRUCTIONS, OPENAI_EVENTS_CHANNEL, OPENAI_REALTIME_URL, OpenAIRealtimeModel,
    OpenAIRealtimeVoice,
};
pub use messages::{
    ApiError, ClientEvent, ContentPart, ConversationItem, OutgoingEvent, Response,
    ResponseConfig, ServerEvent, ServerSession, SessionConfig, ToolDef,
};

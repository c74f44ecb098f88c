//! Realtime voice session client.
//!
//! A session runs against the OpenAI Realtime API over a WebRTC peer
//! connection. The pieces, bottom-up:
//!
//! - [`CredentialBroker`] fetches a short-lived client secret from a local
//!   token endpoint
//! - [`TransportNegotiator`] trades the local SDP offer for the remote answer
//! - [`SessionConnection`] drives `Idle -> Negotiating -> Active -> Closed`
//!   and owns the transport and microphone while a session lives
//! - [`EventChannel`] frames typed events on the data channel and keeps a
//!   newest-first [`EventLog`]
//! - [`ToolDispatcher`] reacts to logged events: tool registration, function
//!   calls, auto-dismiss, follow-up requests and topic drift
//! - [`RealtimeSession`] runs all of the above on one task
//!
//! # Architecture
//!
//! Nothing here spawns tasks on its own. The transport pushes
//! [`TransportEvent`]s into a channel, negotiation is a future handed back to
//! the caller, and dispatcher timers live in a `DelayQueue`; the session loop
//! selects over all of them, so every state mutation happens in one place.
//!
//! # Example
//!
//! ```rust,ignore
//! use realtime_voice_client::config::SessionSettings;
//! use realtime_voice_client::core::realtime::{NoMediaSource, RealtimeSession, SessionNotice};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let settings = SessionSettings::from_env().unwrap();
//!     let (session, handle, mut notices) =
//!         RealtimeSession::from_settings(&settings, factory, Arc::new(NoMediaSource)).unwrap();
//!     tokio::spawn(session.run());
//!
//!     handle.start().unwrap();
//!     while let Some(notice) = notices.recv().await {
//!         if let SessionNotice::StateChanged { state, .. } = notice {
//!             println!("session is {state}");
//!         }
//!     }
//! }
//! ```

mod base;
mod channel;
mod connection;
mod credential;
mod negotiator;
pub mod openai;
mod session;
mod tools;
#[cfg(feature = "webrtc")]
mod rtc;

pub use base::{
    BoxedTransport, LocalMedia, MediaSource, NoMediaSource, PeerTransport, RealtimeError,
    RealtimeResult, SdpType, Session, SessionDescription, SessionId, SessionState,
    TransportEvent, TransportEventKind, TransportEventSender, TransportFactory,
};
pub use channel::{Direction, EventChannel, EventLog, LoggedEvent, SERVER_EVENT_ID_PREFIX};
pub use connection::{
    ConnectionUpdate, Established, Negotiated, Negotiation, SessionConnection, TransportEvents,
};
pub use credential::{Credential, CredentialBroker};
pub use negotiator::{RealtimeTarget, TransportNegotiator};
pub use session::{
    RealtimeSession, SessionCommand, SessionHandle, SessionNotice, SessionNotices,
};
pub use tools::{
    DEFAULT_DISMISS_AFTER, DEFAULT_DRIFT_THRESHOLD, DEFAULT_FOLLOW_UP, DEFAULT_FOLLOW_UP_AFTER,
    DEFAULT_STOP_WORDS, DismissReason, DispatcherSettings, DriftDetector, TimerFired,
    ToolDispatcher, ToolInvocation, ToolNotice, ToolRegistry, ToolSchema, TopicKeywordSet,
};
#[cfg(feature = "webrtc")]
pub use rtc::{WebRtcTransport, WebRtcTransportFactory};

//! Base traits and types for the realtime session core.
//!
//! This module defines the error taxonomy, the session state machine states and
//! the trait seams behind which the peer-to-peer transport and local audio
//! capture live. Concrete transports (see the `webrtc` feature) and test doubles
//! implement these traits; the rest of the core only talks to the traits.
//!
//! # Transport contract
//!
//! A transport is created per session start by a [`TransportFactory`]. It
//! reports lifecycle changes and inbound data-channel frames through the
//! [`TransportEventSender`] it was created with, stamped with the owning
//! session id so that frames from a superseded transport can be ignored.

use std::fmt;
#[cfg(feature = "webrtc")]
use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;
#[cfg(feature = "webrtc")]
use webrtc::track::track_local::TrackLocal;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur in the realtime session core.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RealtimeError {
    /// The short-lived credential could not be obtained
    #[error("Credential request failed: {0}")]
    CredentialFailed(String),

    /// The offer/answer exchange failed or returned unusable content
    #[error("Negotiation failed: {0}")]
    NegotiationFailed(String),

    /// A send was attempted while the session was not active
    #[error("Channel not ready (session is {0})")]
    ChannelNotReady(SessionState),

    /// An inbound frame could not be parsed as a server event
    #[error("Malformed event: {0}")]
    MalformedEvent(String),

    /// An external collaborator (microphone, speech engine) is unavailable
    #[error("Unsupported capability: {0}")]
    UnsupportedCapability(String),

    /// The underlying peer transport reported an error
    #[error("Transport error: {0}")]
    TransportError(String),

    /// An outbound event was rejected before transmission
    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    /// An operation was requested in a state that does not allow it
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl RealtimeError {
    /// Whether this error ends the current start attempt.
    ///
    /// Malformed frames, rejected sends and missing optional capabilities
    /// leave the session running.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RealtimeError::CredentialFailed(_)
                | RealtimeError::NegotiationFailed(_)
                | RealtimeError::TransportError(_)
        )
    }
}

/// Result type for realtime operations.
pub type RealtimeResult<T> = Result<T, RealtimeError>;

// =============================================================================
// Session State
// =============================================================================

/// Identifier of one session attempt.
pub type SessionId = Uuid;

/// Session lifecycle state.
///
/// Legal transitions are `Idle -> Negotiating`, `Negotiating -> Active`,
/// `Negotiating -> Closed` and `Active -> Closed`. A closed session may be
/// replaced by a new one through another start request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// No session has been started yet
    #[default]
    Idle,
    /// Transport is being created and negotiated
    Negotiating,
    /// Data channel is open, events flow
    Active,
    /// Session ended (stop, transport closure or failed negotiation)
    Closed,
}

impl SessionState {
    /// Whether a new session may be started from this state.
    pub fn can_start(&self) -> bool {
        matches!(self, SessionState::Idle | SessionState::Closed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Idle => write!(f, "Idle"),
            SessionState::Negotiating => write!(f, "Negotiating"),
            SessionState::Active => write!(f, "Active"),
            SessionState::Closed => write!(f, "Closed"),
        }
    }
}

/// The single session record owned by a `SessionConnection`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Session ID
    pub id: SessionId,
    /// Current lifecycle state
    pub state: SessionState,
    /// Wall-clock time the start was requested
    pub started_at: SystemTime,
}

impl Session {
    pub(crate) fn begin() -> Self {
        Self {
            id: Uuid::new_v4(),
            state: SessionState::Negotiating,
            started_at: SystemTime::now(),
        }
    }
}

// =============================================================================
// Session Descriptions
// =============================================================================

/// Kind of a session description.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    /// Local offer
    Offer,
    /// Remote answer
    Answer,
}

/// Opaque session description exchanged during negotiation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    /// Description kind
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    /// SDP text
    pub sdp: String,
}

impl SessionDescription {
    /// Wrap local SDP text as an offer.
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    /// Wrap remote SDP text as an answer.
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

// =============================================================================
// Transport Events
// =============================================================================

/// Lifecycle and data notifications raised by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEventKind {
    /// The data channel is open and ready for sends
    Open,
    /// One inbound data-channel frame
    Message(Bytes),
    /// The data channel or the peer connection closed
    Closed {
        /// Reason reported by the transport, if any
        reason: Option<String>,
    },
}

/// A transport notification stamped with the owning session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportEvent {
    /// Session that created the transport
    pub session_id: SessionId,
    /// What happened
    pub kind: TransportEventKind,
}

/// Sender half handed to a transport at creation time.
///
/// Stamps every event with the session id it was created for. Sends after the
/// receiving loop is gone are ignored.
#[derive(Debug, Clone)]
pub struct TransportEventSender {
    session_id: SessionId,
    tx: mpsc::UnboundedSender<TransportEvent>,
}

impl TransportEventSender {
    pub fn new(session_id: SessionId, tx: mpsc::UnboundedSender<TransportEvent>) -> Self {
        Self { session_id, tx }
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn opened(&self) {
        self.emit(TransportEventKind::Open);
    }

    pub fn message(&self, payload: Bytes) {
        self.emit(TransportEventKind::Message(payload));
    }

    pub fn closed(&self, reason: Option<String>) {
        self.emit(TransportEventKind::Closed { reason });
    }

    fn emit(&self, kind: TransportEventKind) {
        let _ = self.tx.send(TransportEvent {
            session_id: self.session_id,
            kind,
        });
    }
}

// =============================================================================
// Transport Traits
// =============================================================================

/// A negotiated (or negotiating) peer-to-peer transport with one data channel.
///
/// `send_text` and `close` are synchronous: implementations queue the work
/// internally so that the owning event loop never blocks on the network.
#[async_trait]
pub trait PeerTransport: Send {
    /// Create the local offer. Implementations must return a complete
    /// description (no trickled candidates), since negotiation is a single
    /// request/response exchange.
    async fn create_offer(&mut self) -> RealtimeResult<SessionDescription>;

    /// Install the remote answer.
    async fn apply_answer(&mut self, answer: SessionDescription) -> RealtimeResult<()>;

    /// Queue one text frame on the data channel.
    fn send_text(&mut self, payload: &str) -> RealtimeResult<()>;

    /// Tear down the data channel and the peer connection.
    fn close(&mut self);
}

/// Boxed trait object for transports.
pub type BoxedTransport = Box<dyn PeerTransport>;

/// Factory creating one transport per session start.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    /// Create a transport and its data channel.
    ///
    /// `audio` carries the local capture handle when one was acquired; without
    /// it the transport is created for text-only use.
    async fn create(
        &self,
        events: TransportEventSender,
        audio: Option<&dyn LocalMedia>,
    ) -> RealtimeResult<BoxedTransport>;
}

// =============================================================================
// Local Media
// =============================================================================

/// Handle to acquired local capture resources.
pub trait LocalMedia: Send + Sync {
    /// Human readable description of the capture source.
    fn label(&self) -> &str;

    /// Outgoing audio track fed by this capture source.
    ///
    /// Without one the WebRTC transport only receives audio.
    #[cfg(feature = "webrtc")]
    fn track(&self) -> Option<Arc<dyn TrackLocal + Send + Sync>> {
        None
    }

    /// Release the capture device. Must be idempotent.
    fn stop(&mut self);
}

/// Source of local audio capture.
#[async_trait]
pub trait MediaSource: Send + Sync {
    /// Acquire a capture handle.
    ///
    /// Returns `UnsupportedCapability` when no capture device is available;
    /// the session then continues in text-only mode.
    async fn acquire(&self) -> RealtimeResult<Box<dyn LocalMedia>>;
}

/// Media source for hosts without a capture device.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoMediaSource;

#[async_trait]
impl MediaSource for NoMediaSource {
    async fn acquire(&self) -> RealtimeResult<Box<dyn LocalMedia>> {
        Err(RealtimeError::UnsupportedCapability(
            "no audio capture device available".to_string(),
        ))
    }
}

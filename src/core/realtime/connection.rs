//! Session connection state machine.
//!
//! ```text
//!   Idle ──start──▶ Negotiating ──channel open──▶ Active
//!                       │                           │
//!                       └──failure / stop──▶ Closed ◀┘ stop / transport closed
//! ```
//!
//! Starting is split in three steps so an event loop can keep serving other
//! work while the network exchange is in flight:
//!
//! 1. [`SessionConnection::begin`] moves to `Negotiating` and returns an owned
//!    [`Negotiation`] future.
//! 2. The caller drives the future. Dropping it (for example on stop) releases
//!    whatever media and transport it had created.
//! 3. [`SessionConnection::complete_negotiation`] installs the result.
//!
//! [`SessionConnection::start`] runs the three steps back to back.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::base::{
    BoxedTransport, LocalMedia, MediaSource, RealtimeError, RealtimeResult, Session, SessionId,
    SessionState, TransportEvent, TransportEventKind, TransportEventSender, TransportFactory,
};
use super::negotiator::TransportNegotiator;

/// Receiver for transport notifications of every session this connection runs.
pub type TransportEvents = mpsc::UnboundedReceiver<TransportEvent>;

/// In-flight negotiation for one session.
pub type Negotiation = Pin<Box<dyn Future<Output = RealtimeResult<Negotiated>> + Send>>;

/// Resources produced by a successful negotiation.
pub struct Negotiated {
    session_id: SessionId,
    resources: HeldResources,
    media_error: Option<RealtimeError>,
}

impl Negotiated {
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }
}

/// Outcome of installing a successful negotiation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Established {
    /// State after installation (`Active` if the channel already opened)
    pub state: SessionState,
    /// Set when local audio was unavailable and the session is text-only
    pub media_error: Option<RealtimeError>,
}

/// What a transport event did to the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionUpdate {
    /// Event was stale or had no effect
    Unchanged,
    /// The session moved to a new state
    Transitioned(SessionState),
    /// One inbound frame for the active session
    Inbound(Bytes),
}

/// Media and transport owned together, released together.
///
/// Dropping the holder stops the media and closes the transport unless they
/// were taken out first.
#[derive(Default)]
struct HeldResources {
    media: Option<Box<dyn LocalMedia>>,
    transport: Option<BoxedTransport>,
}

impl HeldResources {
    fn release(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            transport.close();
        }
        if let Some(mut media) = self.media.take() {
            media.stop();
        }
    }
}

impl Drop for HeldResources {
    fn drop(&mut self) {
        self.release();
    }
}

/// Owns the single session record and its transport.
pub struct SessionConnection {
    negotiator: TransportNegotiator,
    factory: Arc<dyn TransportFactory>,
    media_source: Arc<dyn MediaSource>,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    session: Option<Session>,
    resources: HeldResources,
    open_before_install: bool,
}

impl SessionConnection {
    pub fn new(
        negotiator: TransportNegotiator,
        factory: Arc<dyn TransportFactory>,
        media_source: Arc<dyn MediaSource>,
    ) -> (Self, TransportEvents) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let connection = Self {
            negotiator,
            factory,
            media_source,
            events_tx,
            session: None,
            resources: HeldResources::default(),
            open_before_install: false,
        };
        (connection, events_rx)
    }

    /// Current state; `Idle` before the first start.
    pub fn state(&self) -> SessionState {
        self.session
            .as_ref()
            .map(|session| session.state)
            .unwrap_or_default()
    }

    /// The current (or last closed) session record.
    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.session.as_ref().map(|session| session.id)
    }

    pub fn has_audio(&self) -> bool {
        self.resources.media.is_some()
    }

    /// Enter `Negotiating` with a fresh session and return the negotiation.
    pub fn begin(&mut self) -> RealtimeResult<Negotiation> {
        let state = self.state();
        if !state.can_start() {
            return Err(RealtimeError::InvalidState(format!(
                "cannot start while {state}"
            )));
        }

        let session = Session::begin();
        let session_id = session.id;
        info!(%session_id, "Starting session");
        self.session = Some(session);
        self.open_before_install = false;

        let negotiator = self.negotiator.clone();
        let factory = Arc::clone(&self.factory);
        let media_source = Arc::clone(&self.media_source);
        let events = TransportEventSender::new(session_id, self.events_tx.clone());

        Ok(Box::pin(negotiate(
            session_id,
            negotiator,
            factory,
            media_source,
            events,
        )))
    }

    /// Install the result of a negotiation started by [`begin`](Self::begin).
    ///
    /// A failure closes the session and is returned to the caller. A result for
    /// a session that is no longer negotiating is released and rejected.
    pub fn complete_negotiation(
        &mut self,
        result: RealtimeResult<Negotiated>,
    ) -> RealtimeResult<Established> {
        let Some(session) = self.session.as_mut() else {
            return Err(RealtimeError::InvalidState(
                "no session is negotiating".to_string(),
            ));
        };

        match result {
            Ok(mut negotiated) => {
                if negotiated.session_id != session.id
                    || session.state != SessionState::Negotiating
                {
                    debug!(session_id = %negotiated.session_id, "Discarding stale negotiation");
                    negotiated.resources.release();
                    return Err(RealtimeError::InvalidState(format!(
                        "negotiation finished after session became {}",
                        session.state
                    )));
                }

                self.resources.media = negotiated.resources.media.take();
                self.resources.transport = negotiated.resources.transport.take();
                info!(session_id = %session.id, "Negotiation complete");

                if self.open_before_install {
                    session.state = SessionState::Active;
                    info!(session_id = %session.id, "Session active");
                }

                Ok(Established {
                    state: session.state,
                    media_error: negotiated.media_error,
                })
            }
            Err(err) => {
                if session.state == SessionState::Negotiating {
                    warn!(session_id = %session.id, "Negotiation failed: {err}");
                    session.state = SessionState::Closed;
                    self.resources.release();
                }
                Err(err)
            }
        }
    }

    /// Begin, drive and complete a negotiation in one call.
    pub async fn start(&mut self) -> RealtimeResult<Established> {
        let negotiation = self.begin()?;
        let result = negotiation.await;
        self.complete_negotiation(result)
    }

    /// Apply one transport notification.
    pub fn on_transport_event(&mut self, event: TransportEvent) -> ConnectionUpdate {
        let Some(session) = self.session.as_mut() else {
            return ConnectionUpdate::Unchanged;
        };
        if event.session_id != session.id {
            debug!(
                stale = %event.session_id,
                current = %session.id,
                "Ignoring event from superseded transport"
            );
            return ConnectionUpdate::Unchanged;
        }

        match (event.kind, session.state) {
            (TransportEventKind::Open, SessionState::Negotiating) => {
                if self.resources.transport.is_none() {
                    self.open_before_install = true;
                    return ConnectionUpdate::Unchanged;
                }
                session.state = SessionState::Active;
                info!(session_id = %session.id, "Session active");
                ConnectionUpdate::Transitioned(SessionState::Active)
            }
            (TransportEventKind::Message(payload), SessionState::Active) => {
                ConnectionUpdate::Inbound(payload)
            }
            (
                TransportEventKind::Closed { reason },
                SessionState::Negotiating | SessionState::Active,
            ) => {
                info!(
                    session_id = %session.id,
                    reason = reason.as_deref().unwrap_or("none"),
                    "Transport closed"
                );
                session.state = SessionState::Closed;
                self.resources.release();
                ConnectionUpdate::Transitioned(SessionState::Closed)
            }
            (kind, state) => {
                debug!(session_id = %session.id, %state, ?kind, "Ignoring transport event");
                ConnectionUpdate::Unchanged
            }
        }
    }

    /// Transmit one serialized frame.
    pub fn send_raw(&mut self, payload: &str) -> RealtimeResult<()> {
        let state = self.state();
        if state != SessionState::Active {
            return Err(RealtimeError::ChannelNotReady(state));
        }
        match self.resources.transport.as_mut() {
            Some(transport) => transport.send_text(payload),
            None => Err(RealtimeError::ChannelNotReady(state)),
        }
    }

    /// Close the session, releasing media and transport.
    ///
    /// Returns `false` when there was nothing to stop. Calling it again is a
    /// no-op.
    pub fn stop(&mut self) -> bool {
        let Some(session) = self.session.as_mut() else {
            return false;
        };
        if !matches!(
            session.state,
            SessionState::Negotiating | SessionState::Active
        ) {
            return false;
        }
        info!(session_id = %session.id, "Stopping session");
        session.state = SessionState::Closed;
        self.resources.release();
        true
    }
}

async fn negotiate(
    session_id: SessionId,
    negotiator: TransportNegotiator,
    factory: Arc<dyn TransportFactory>,
    media_source: Arc<dyn MediaSource>,
    events: TransportEventSender,
) -> RealtimeResult<Negotiated> {
    let mut resources = HeldResources::default();

    let media_error = match media_source.acquire().await {
        Ok(media) => {
            debug!(%session_id, source = media.label(), "Acquired local audio");
            resources.media = Some(media);
            None
        }
        Err(err @ RealtimeError::UnsupportedCapability(_)) => {
            warn!(%session_id, "Local audio unavailable, continuing text-only: {err}");
            Some(err)
        }
        Err(err) => return Err(err),
    };

    let transport = factory.create(events, resources.media.as_deref()).await?;
    let transport = resources.transport.insert(transport);

    let offer = transport.create_offer().await?;
    let answer = negotiator.exchange(&offer).await?;
    transport.apply_answer(answer).await?;

    Ok(Negotiated {
        session_id,
        resources,
        media_error,
    })
}

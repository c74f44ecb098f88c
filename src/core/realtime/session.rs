//! The session event loop.
//!
//! [`RealtimeSession`] owns the [`EventChannel`] and the [`ToolDispatcher`] and
//! runs every state change on one task. User intents arrive as
//! [`SessionCommand`]s through a cloneable [`SessionHandle`]; everything the
//! presentation layer needs to render comes back as [`SessionNotice`]s.
//!
//! Each loop iteration handles exactly one input (a command, a transport
//! event, the negotiation result or a dispatcher timer) and then publishes:
//! state change first, then new log entries oldest-first, then whatever the
//! dispatcher did with those entries.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::base::{
    MediaSource, RealtimeError, RealtimeResult, SessionId, SessionState, TransportFactory,
};
use super::channel::{EventChannel, LoggedEvent};
use super::connection::{Negotiated, Negotiation, SessionConnection, TransportEvents};
use super::credential::CredentialBroker;
use super::negotiator::TransportNegotiator;
use super::openai::OutgoingEvent;
use super::tools::{DismissReason, ToolDispatcher, ToolInvocation, ToolNotice, ToolRegistry};
use crate::config::SessionSettings;

/// User intents accepted by the session loop.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionCommand {
    /// Start a new session (from `Idle` or `Closed`)
    Start,
    /// Stop the current session
    Stop,
    /// Send a user text message and request a response
    SendText(String),
    /// Send an arbitrary client event
    SendEvent(OutgoingEvent),
    /// Dismiss the live tool invocation
    DismissTool,
    /// Stop the session and end the loop
    Shutdown,
}

/// Updates published by the session loop.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionNotice {
    /// The session moved to a new state
    StateChanged {
        session_id: Option<SessionId>,
        state: SessionState,
    },
    /// An event was appended to the event log
    EventLogged(LoggedEvent),
    /// A tool invocation became live
    ToolInvoked(ToolInvocation),
    /// The live tool invocation was retired
    ToolDismissed {
        invocation_id: uuid::Uuid,
        reason: DismissReason,
    },
    /// A non-fatal error or an aborted start
    Diagnostic(RealtimeError),
}

/// Stream of notices from a running session.
pub type SessionNotices = mpsc::UnboundedReceiver<SessionNotice>;

/// Cloneable handle for sending commands to a running session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<SessionCommand>,
}

impl SessionHandle {
    pub fn send(&self, command: SessionCommand) -> RealtimeResult<()> {
        self.commands
            .send(command)
            .map_err(|_| RealtimeError::InvalidState("session loop has shut down".to_string()))
    }

    pub fn start(&self) -> RealtimeResult<()> {
        self.send(SessionCommand::Start)
    }

    pub fn stop(&self) -> RealtimeResult<()> {
        self.send(SessionCommand::Stop)
    }

    pub fn send_text(&self, text: impl Into<String>) -> RealtimeResult<()> {
        self.send(SessionCommand::SendText(text.into()))
    }

    pub fn send_event(&self, event: impl Into<OutgoingEvent>) -> RealtimeResult<()> {
        self.send(SessionCommand::SendEvent(event.into()))
    }

    pub fn dismiss_tool(&self) -> RealtimeResult<()> {
        self.send(SessionCommand::DismissTool)
    }

    pub fn shutdown(&self) -> RealtimeResult<()> {
        self.send(SessionCommand::Shutdown)
    }
}

/// Single-task owner of the channel, dispatcher and in-flight negotiation.
pub struct RealtimeSession {
    channel: EventChannel,
    dispatcher: ToolDispatcher,
    transport_events: TransportEvents,
    commands: mpsc::UnboundedReceiver<SessionCommand>,
    notices: mpsc::UnboundedSender<SessionNotice>,
    negotiation: Option<Negotiation>,
    last_state: SessionState,
    published: u64,
}

impl RealtimeSession {
    pub fn new(
        connection: SessionConnection,
        transport_events: TransportEvents,
        dispatcher: ToolDispatcher,
    ) -> (Self, SessionHandle, SessionNotices) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (notice_tx, notice_rx) = mpsc::unbounded_channel();
        let channel = EventChannel::new(connection);
        let session = Self {
            last_state: channel.state(),
            published: channel.log().next_seq(),
            channel,
            dispatcher,
            transport_events,
            commands: command_rx,
            notices: notice_tx,
            negotiation: None,
        };
        (
            session,
            SessionHandle {
                commands: command_tx,
            },
            notice_rx,
        )
    }

    /// Wire a session from settings with the default tool set.
    pub fn from_settings(
        settings: &SessionSettings,
        factory: Arc<dyn TransportFactory>,
        media_source: Arc<dyn MediaSource>,
    ) -> RealtimeResult<(Self, SessionHandle, SessionNotices)> {
        settings
            .validate()
            .map_err(RealtimeError::InvalidConfiguration)?;
        let broker = CredentialBroker::new(settings.token_url.clone(), settings.request_timeout)?;
        let negotiator =
            TransportNegotiator::new(broker, settings.target(), settings.request_timeout)?;
        let (connection, transport_events) =
            SessionConnection::new(negotiator, factory, media_source);
        let dispatcher = ToolDispatcher::new(
            ToolRegistry::with_defaults(),
            settings.dispatcher_settings(),
        );
        Ok(Self::new(connection, transport_events, dispatcher))
    }

    pub fn state(&self) -> SessionState {
        self.channel.state()
    }

    /// Run until shutdown is requested or every handle is dropped.
    pub async fn run(mut self) {
        info!("Session loop started");
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(SessionCommand::Shutdown) | None => break,
                    Some(command) => self.handle_command(command),
                },
                Some(event) = self.transport_events.recv() => {
                    if let Err(e) = self.channel.on_transport_event(event) {
                        self.diagnose(e);
                    }
                }
                result = drive(&mut self.negotiation), if self.negotiation.is_some() => {
                    self.negotiation = None;
                    self.finish_negotiation(result);
                }
                fired = self.dispatcher.next_timer(), if self.dispatcher.has_pending_timers() => {
                    let notices = self.dispatcher.on_timer(fired, &mut self.channel);
                    self.publish_tool_notices(notices);
                }
            }
            self.publish();
        }

        self.negotiation = None;
        self.channel.stop();
        self.publish();
        info!("Session loop stopped");
    }

    fn handle_command(&mut self, command: SessionCommand) {
        debug!(?command, "Handling command");
        let result = match command {
            SessionCommand::Start => self.channel.begin().map(|negotiation| {
                self.negotiation = Some(negotiation);
            }),
            SessionCommand::Stop => {
                self.negotiation = None;
                self.channel.stop();
                Ok(())
            }
            SessionCommand::SendText(text) => self.channel.send_text(&text),
            SessionCommand::SendEvent(event) => self.channel.send(event).map(|_| ()),
            SessionCommand::DismissTool => {
                if let Some(notice) = self.dispatcher.dismiss(DismissReason::Manual) {
                    self.publish_tool_notices(vec![notice]);
                }
                Ok(())
            }
            SessionCommand::Shutdown => Ok(()),
        };
        if let Err(e) = result {
            self.diagnose(e);
        }
    }

    fn finish_negotiation(&mut self, result: RealtimeResult<Negotiated>) {
        match self.channel.complete_negotiation(result) {
            Ok(established) => {
                if let Some(media_error) = established.media_error {
                    self.diagnose(media_error);
                }
            }
            Err(e) => self.diagnose(e),
        }
    }

    /// Publish everything that changed since the last call.
    fn publish(&mut self) {
        let state = self.channel.state();
        if state != self.last_state {
            self.last_state = state;
            let session_id = self.channel.connection().session_id();
            info!(session_id = ?session_id, %state, "Session state changed");
            self.notify(SessionNotice::StateChanged { session_id, state });

            if state == SessionState::Closed
                && let Some(notice) = self.dispatcher.reset()
            {
                self.publish_tool_notices(vec![notice]);
            }
        }

        self.publish_log();
        let notices = self.dispatcher.process(&mut self.channel);
        self.publish_tool_notices(notices);
        self.publish_log();
    }

    fn publish_log(&mut self) {
        let fresh: Vec<LoggedEvent> = self.channel.log().since(self.published).cloned().collect();
        for entry in fresh {
            self.published = entry.seq + 1;
            self.notify(SessionNotice::EventLogged(entry));
        }
    }

    fn publish_tool_notices(&mut self, notices: Vec<ToolNotice>) {
        for notice in notices {
            match notice {
                ToolNotice::Invoked(invocation) => {
                    self.notify(SessionNotice::ToolInvoked(invocation))
                }
                ToolNotice::Dismissed {
                    invocation_id,
                    reason,
                } => self.notify(SessionNotice::ToolDismissed {
                    invocation_id,
                    reason,
                }),
                ToolNotice::Diagnostic(e) => self.diagnose(e),
                ToolNotice::Registered { tools } => debug!(tools, "Tools registered"),
                ToolNotice::FollowUpSent { invocation_id, .. } => {
                    debug!(%invocation_id, "Follow-up requested")
                }
            }
        }
    }

    fn diagnose(&mut self, e: RealtimeError) {
        if e.is_fatal() {
            error!("Session error: {e}");
        } else {
            warn!("Session warning: {e}");
        }
        self.notify(SessionNotice::Diagnostic(e));
    }

    fn notify(&self, notice: SessionNotice) {
        let _ = self.notices.send(notice);
    }
}

async fn drive(negotiation: &mut Option<Negotiation>) -> RealtimeResult<Negotiated> {
    match negotiation {
        Some(negotiation) => negotiation.await,
        None => std::future::pending().await,
    }
}

//! Typed event protocol over the session data channel.
//!
//! [`EventChannel`] owns the [`SessionConnection`] and the [`EventLog`]. Every
//! event that crosses the channel in either direction is appended to the log
//! exactly once, in local enqueue/arrival order. The log is newest-first and
//! is the only thing the tool dispatcher reads.
//!
//! Log entries carry a sequence number that keeps increasing across log clears
//! and sessions, so readers can track what they have already seen with a
//! single cursor.

use std::collections::VecDeque;
use std::fmt;

use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use super::base::{RealtimeError, RealtimeResult, SessionState, TransportEvent};
use super::connection::{ConnectionUpdate, Established, Negotiated, Negotiation, SessionConnection};
use super::openai::{ClientEvent, OutgoingEvent, ServerEvent};

/// Prefix reserved for server-assigned event ids.
pub const SERVER_EVENT_ID_PREFIX: &str = "event_";

// =============================================================================
// Event Log
// =============================================================================

/// Which way an event crossed the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Received from the server
    Inbound,
    /// Sent by this client
    Outbound,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Inbound => write!(f, "inbound"),
            Direction::Outbound => write!(f, "outbound"),
        }
    }
}

/// One entry of the event log.
#[derive(Debug, Clone, PartialEq)]
pub struct LoggedEvent {
    /// Monotonic sequence number
    pub seq: u64,
    pub direction: Direction,
    /// `event_id` of the event, if it carried one
    pub event_id: Option<String>,
    /// Wire `type`
    pub event_type: String,
    /// The event exactly as sent or received
    pub payload: Value,
    /// Local enqueue or arrival time
    pub logged_at: Instant,
}

impl LoggedEvent {
    /// Typed view of an inbound event.
    pub fn server_event(&self) -> Option<ServerEvent> {
        match self.direction {
            Direction::Inbound => serde_json::from_value(self.payload.clone()).ok(),
            Direction::Outbound => None,
        }
    }

    /// Typed view of an outbound event.
    pub fn client_event(&self) -> Option<ClientEvent> {
        match self.direction {
            Direction::Outbound => serde_json::from_value(self.payload.clone()).ok(),
            Direction::Inbound => None,
        }
    }
}

/// Newest-first log of channel events.
#[derive(Debug, Default)]
pub struct EventLog {
    entries: VecDeque<LoggedEvent>,
    next_seq: u64,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(
        &mut self,
        direction: Direction,
        event_id: Option<String>,
        event_type: String,
        payload: Value,
    ) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.push_front(LoggedEvent {
            seq,
            direction,
            event_id,
            event_type,
            payload,
            logged_at: Instant::now(),
        });
        seq
    }

    /// Entries, newest first.
    pub fn iter(&self) -> impl Iterator<Item = &LoggedEvent> {
        self.entries.iter()
    }

    /// Entries with a sequence number at or after `seq`, oldest first.
    pub fn since(&self, seq: u64) -> impl Iterator<Item = &LoggedEvent> {
        self.entries
            .iter()
            .take_while(move |entry| entry.seq >= seq)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
    }

    /// Most recent entry.
    pub fn latest(&self) -> Option<&LoggedEvent> {
        self.entries.front()
    }

    /// Sequence number the next entry will get.
    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn clear(&mut self) {
        self.entries.clear();
    }
}

// =============================================================================
// Event Channel
// =============================================================================

/// Client/server event protocol over a [`SessionConnection`].
pub struct EventChannel {
    connection: SessionConnection,
    log: EventLog,
}

impl EventChannel {
    pub fn new(connection: SessionConnection) -> Self {
        Self {
            connection,
            log: EventLog::new(),
        }
    }

    pub fn connection(&self) -> &SessionConnection {
        &self.connection
    }

    pub fn state(&self) -> SessionState {
        self.connection.state()
    }

    pub fn log(&self) -> &EventLog {
        &self.log
    }

    /// See [`SessionConnection::begin`].
    pub fn begin(&mut self) -> RealtimeResult<Negotiation> {
        self.connection.begin()
    }

    /// Install a negotiation result, activating the channel if it already
    /// opened.
    pub fn complete_negotiation(
        &mut self,
        result: RealtimeResult<Negotiated>,
    ) -> RealtimeResult<Established> {
        let established = self.connection.complete_negotiation(result)?;
        if established.state == SessionState::Active {
            self.on_activated()?;
        }
        Ok(established)
    }

    /// Begin, drive and complete a negotiation in one call.
    pub async fn start(&mut self) -> RealtimeResult<Established> {
        let negotiation = self.begin()?;
        let result = negotiation.await;
        self.complete_negotiation(result)
    }

    /// See [`SessionConnection::stop`]. The log stays readable until the next
    /// session activates.
    pub fn stop(&mut self) -> bool {
        self.connection.stop()
    }

    /// Route one transport notification.
    pub fn on_transport_event(&mut self, event: TransportEvent) -> RealtimeResult<()> {
        match self.connection.on_transport_event(event) {
            ConnectionUpdate::Transitioned(SessionState::Active) => self.on_activated(),
            ConnectionUpdate::Inbound(frame) => self.on_receive(&frame).map(|_| ()),
            ConnectionUpdate::Transitioned(_) | ConnectionUpdate::Unchanged => Ok(()),
        }
    }

    fn on_activated(&mut self) -> RealtimeResult<()> {
        self.log.clear();
        self.send(ClientEvent::response_create()).map(|_| ())
    }

    /// Send one client event and return its `event_id`.
    ///
    /// An id is generated when the caller did not supply one. The log is only
    /// appended once the frame was handed to the transport.
    pub fn send(&mut self, event: impl Into<OutgoingEvent>) -> RealtimeResult<String> {
        let OutgoingEvent { event_id, event } = event.into();

        let state = self.connection.state();
        if state != SessionState::Active {
            return Err(RealtimeError::ChannelNotReady(state));
        }

        let event_id = match event_id {
            Some(id) if id.starts_with(SERVER_EVENT_ID_PREFIX) => {
                return Err(RealtimeError::InvalidEvent(format!(
                    "client event id '{id}' uses the reserved '{SERVER_EVENT_ID_PREFIX}' prefix"
                )));
            }
            Some(id) if !id.is_empty() => id,
            _ => Uuid::new_v4().to_string(),
        };

        let mut payload = serde_json::to_value(&event)
            .map_err(|e| RealtimeError::SerializationError(e.to_string()))?;
        if let Value::Object(map) = &mut payload {
            map.insert("event_id".to_string(), Value::String(event_id.clone()));
        }
        let frame = serde_json::to_string(&payload)
            .map_err(|e| RealtimeError::SerializationError(e.to_string()))?;

        self.connection.send_raw(&frame)?;

        let event_type = event.event_type();
        debug!(event_type, event_id = %event_id, "Sent client event");
        self.log.push(
            Direction::Outbound,
            Some(event_id.clone()),
            event_type.to_string(),
            payload,
        );
        Ok(event_id)
    }

    /// Send a user text message and ask for a response.
    pub fn send_text(&mut self, text: &str) -> RealtimeResult<()> {
        let text = text.trim();
        if text.is_empty() {
            return Err(RealtimeError::InvalidEvent(
                "message text is empty".to_string(),
            ));
        }
        self.send(ClientEvent::user_message(text))?;
        self.send(ClientEvent::response_create())?;
        Ok(())
    }

    /// Parse and log one inbound frame. Returns the log sequence number.
    ///
    /// Malformed frames are reported and dropped without touching the log.
    pub fn on_receive(&mut self, raw: &[u8]) -> RealtimeResult<u64> {
        let state = self.connection.state();
        if state != SessionState::Active {
            return Err(RealtimeError::ChannelNotReady(state));
        }

        let (event_type, payload) = parse_frame(raw).inspect_err(|e| {
            warn!("Failed to parse server event: {} - {}", e, String::from_utf8_lossy(raw));
        })?;

        let typed: ServerEvent = serde_json::from_value(payload.clone()).map_err(|e| {
            warn!(event_type = %event_type, "Failed to parse server event: {e}");
            RealtimeError::MalformedEvent(format!("{event_type}: {e}"))
        })?;

        if let ServerEvent::Error { error } = &typed {
            warn!(
                code = error.code.as_deref().unwrap_or("unknown"),
                "Server reported error: {}",
                error.message
            );
        }

        let event_id = payload
            .get("event_id")
            .and_then(Value::as_str)
            .map(str::to_string);
        debug!(event_type = %event_type, "Received server event");
        Ok(self
            .log
            .push(Direction::Inbound, event_id, event_type, payload))
    }
}

/// Decode a frame into its `type` and JSON object.
fn parse_frame(raw: &[u8]) -> RealtimeResult<(String, Value)> {
    let payload: Value = serde_json::from_slice(raw)
        .map_err(|e| RealtimeError::MalformedEvent(format!("invalid JSON: {e}")))?;
    let event_type = payload
        .as_object()
        .ok_or_else(|| RealtimeError::MalformedEvent("event is not a JSON object".to_string()))?
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| RealtimeError::MalformedEvent("event has no string 'type'".to_string()))?
        .to_string();
    Ok((event_type, payload))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::core::realtime::base::{NoMediaSource, TransportEventKind};
    use crate::core::realtime::connection::TransportEvents;
    use crate::core::realtime::connection::tests::{
        FakeFactory, Recorder, mock_endpoints, negotiator_for,
    };
    use bytes::Bytes;
    use serde_json::json;
    use std::sync::{Arc, Mutex};
    use wiremock::MockServer;

    pub(crate) struct ActiveChannel {
        pub channel: EventChannel,
        pub recorder: Arc<Mutex<Recorder>>,
        pub events: TransportEvents,
        pub _server: MockServer,
    }

    pub(crate) async fn active_channel() -> ActiveChannel {
        let server = mock_endpoints(200).await;
        let recorder = Arc::new(Mutex::new(Recorder::default()));
        let (connection, mut events) = SessionConnection::new(
            negotiator_for(&server),
            Arc::new(FakeFactory {
                recorder: Arc::clone(&recorder),
                open_on_answer: true,
            }),
            Arc::new(NoMediaSource),
        );
        let mut channel = EventChannel::new(connection);
        channel.start().await.unwrap();
        let open = events.recv().await.unwrap();
        channel.on_transport_event(open).unwrap();
        assert_eq!(channel.state(), SessionState::Active);

        ActiveChannel {
            channel,
            recorder,
            events,
            _server: server,
        }
    }

    fn sent_frames(recorder: &Arc<Mutex<Recorder>>) -> Vec<Value> {
        recorder
            .lock()
            .unwrap()
            .sent
            .iter()
            .map(|frame| serde_json::from_str(frame).unwrap())
            .collect()
    }

    #[test]
    fn test_parse_frame_rejects_non_objects() {
        assert!(parse_frame(b"[1,2]").is_err());
        assert!(parse_frame(b"{\"type\": 5}").is_err());
        assert!(parse_frame(b"{\"event_id\": \"event_1\"}").is_err());
        assert!(parse_frame(b"not json").is_err());
        let (event_type, _) = parse_frame(b"{\"type\": \"rate_limits.updated\"}").unwrap();
        assert_eq!(event_type, "rate_limits.updated");
    }

    #[test]
    fn test_event_log_since_is_oldest_first() {
        let mut log = EventLog::new();
        for n in 0..4 {
            log.push(Direction::Inbound, None, format!("t{n}"), json!({}));
        }
        let types: Vec<_> = log.since(2).map(|e| e.event_type.as_str()).collect();
        assert_eq!(types, vec!["t2", "t3"]);
        assert_eq!(log.latest().unwrap().event_type, "t3");

        log.clear();
        assert!(log.is_empty());
        assert_eq!(log.push(Direction::Inbound, None, "t4".into(), json!({})), 4);
    }

    #[tokio::test]
    async fn test_activation_clears_log_and_requests_response() {
        let ActiveChannel {
            channel, recorder, ..
        } = active_channel().await;

        assert_eq!(channel.log().len(), 1);
        let entry = channel.log().latest().unwrap();
        assert_eq!(entry.event_type, "response.create");
        assert_eq!(entry.direction, Direction::Outbound);

        let frames = sent_frames(&recorder);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["type"], "response.create");
        assert!(frames[0]["event_id"].as_str().is_some());
    }

    #[tokio::test]
    async fn test_send_assigns_id_and_logs() {
        let ActiveChannel {
            mut channel,
            recorder,
            ..
        } = active_channel().await;

        let id = channel.send(ClientEvent::ResponseCancel).unwrap();
        assert!(!id.starts_with(SERVER_EVENT_ID_PREFIX));
        assert_eq!(channel.log().latest().unwrap().event_id.as_deref(), Some(id.as_str()));

        let kept = channel
            .send(ClientEvent::InputAudioBufferClear.with_id("my-id"))
            .unwrap();
        assert_eq!(kept, "my-id");
        assert_eq!(sent_frames(&recorder).last().unwrap()["event_id"], "my-id");
    }

    #[tokio::test]
    async fn test_send_rejects_server_prefixed_id() {
        let ActiveChannel { mut channel, .. } = active_channel().await;
        let before = channel.log().len();
        let result = channel.send(ClientEvent::response_create().with_id("event_42"));
        assert!(matches!(result, Err(RealtimeError::InvalidEvent(_))));
        assert_eq!(channel.log().len(), before);
    }

    #[tokio::test]
    async fn test_send_outside_active_is_not_ready_before_id_check() {
        let server = mock_endpoints(200).await;
        let (connection, _events) = SessionConnection::new(
            negotiator_for(&server),
            Arc::new(FakeFactory {
                recorder: Arc::new(Mutex::new(Recorder::default())),
                open_on_answer: true,
            }),
            Arc::new(NoMediaSource),
        );
        let mut channel = EventChannel::new(connection);

        let result = channel.send(ClientEvent::response_create().with_id("event_1"));
        assert_eq!(result, Err(RealtimeError::ChannelNotReady(SessionState::Idle)));
        assert!(channel.log().is_empty());

        let ActiveChannel { mut channel, .. } = active_channel().await;
        channel.stop();
        let result = channel.send(ClientEvent::response_create().with_id("event_2"));
        assert_eq!(result, Err(RealtimeError::ChannelNotReady(SessionState::Closed)));
    }

    #[tokio::test]
    async fn test_log_counts_sends_and_valid_receives() {
        let ActiveChannel { mut channel, .. } = active_channel().await;
        let base = channel.log().len();

        channel.send(ClientEvent::InputAudioBufferCommit).unwrap();
        channel.send(ClientEvent::response_create()).unwrap();
        channel
            .on_receive(br#"{"type":"session.created","event_id":"event_1","session":{}}"#)
            .unwrap();
        channel
            .on_receive(br#"{"type":"response.audio.delta","event_id":"event_2","delta":""}"#)
            .unwrap();

        assert!(matches!(
            channel.on_receive(b"{oops"),
            Err(RealtimeError::MalformedEvent(_))
        ));
        assert!(matches!(
            channel.on_receive(br#"{"type":"response.done"}"#),
            Err(RealtimeError::MalformedEvent(_))
        ));

        assert_eq!(channel.log().len(), base + 4);
        let newest = channel.log().latest().unwrap();
        assert_eq!(newest.event_type, "response.audio.delta");
        assert_eq!(newest.event_id.as_deref(), Some("event_2"));
    }

    #[tokio::test]
    async fn test_send_text_sends_item_then_response() {
        let ActiveChannel {
            mut channel,
            recorder,
            ..
        } = active_channel().await;

        channel.send_text("  what's the weather in Paris? ").unwrap();
        let frames = sent_frames(&recorder);
        assert_eq!(frames[1]["type"], "conversation.item.create");
        assert_eq!(
            frames[1]["item"]["content"][0]["text"],
            "what's the weather in Paris?"
        );
        assert_eq!(frames[2]["type"], "response.create");

        assert!(matches!(
            channel.send_text("   "),
            Err(RealtimeError::InvalidEvent(_))
        ));
    }

    #[tokio::test]
    async fn test_send_after_stop_is_not_ready() {
        let ActiveChannel { mut channel, .. } = active_channel().await;
        assert!(channel.stop());
        let before = channel.log().len();

        let result = channel.send(ClientEvent::response_create());
        assert_eq!(
            result,
            Err(RealtimeError::ChannelNotReady(SessionState::Closed))
        );
        assert_eq!(channel.log().len(), before);
    }

    #[tokio::test]
    async fn test_inbound_frame_through_transport_event() {
        let ActiveChannel {
            mut channel,
            events: _events,
            ..
        } = active_channel().await;
        let session_id = channel.connection().session_id().unwrap();

        channel
            .on_transport_event(TransportEvent {
                session_id,
                kind: TransportEventKind::Message(Bytes::from_static(
                    br#"{"type":"error","event_id":"event_7","error":{"type":"invalid_request_error","message":"bad"}}"#,
                )),
            })
            .unwrap();

        let entry = channel.log().latest().unwrap();
        assert_eq!(entry.direction, Direction::Inbound);
        assert!(matches!(entry.server_event(), Some(ServerEvent::Error { .. })));
        assert!(entry.client_event().is_none());
    }
}

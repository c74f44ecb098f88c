//! Tool call dispatch over the event log.
//!
//! The dispatcher walks the event log with a sequence cursor so that each entry
//! is handled exactly once, in order:
//!
//! - the first inbound `session.created` of a session triggers one
//!   `session.update` registering every tool;
//! - an inbound `response.done` whose output holds a `function_call` for a
//!   registered tool becomes the live [`ToolInvocation`];
//! - an outbound user `conversation.item.create` feeds the topic drift check.
//!
//! A live invocation owns two timers in a `DelayQueue`: auto-dismissal and a
//! one-shot follow-up `response.create`. Dismissal in any form removes both.

use std::future::poll_fn;
use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;
use tokio_util::time::{DelayQueue, delay_queue};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::schema::{DEFAULT_FOLLOW_UP, ToolRegistry};
use super::topic::{DEFAULT_DRIFT_THRESHOLD, DEFAULT_STOP_WORDS, DriftDetector, TopicKeywordSet};
use crate::core::realtime::base::RealtimeError;
use crate::core::realtime::channel::{Direction, EventChannel, LoggedEvent};
use crate::core::realtime::openai::{ClientEvent, Response, ServerEvent};

/// Default lifetime of a live invocation.
pub const DEFAULT_DISMISS_AFTER: Duration = Duration::from_secs(10);

/// Default delay before the follow-up response is requested.
pub const DEFAULT_FOLLOW_UP_AFTER: Duration = Duration::from_millis(500);

/// Timing and drift parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatcherSettings {
    pub dismiss_after: Duration,
    pub follow_up_after: Duration,
    pub drift_threshold: f64,
    pub stop_words: Vec<String>,
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            dismiss_after: DEFAULT_DISMISS_AFTER,
            follow_up_after: DEFAULT_FOLLOW_UP_AFTER,
            drift_threshold: DEFAULT_DRIFT_THRESHOLD,
            stop_words: DEFAULT_STOP_WORDS.iter().map(|w| w.to_string()).collect(),
        }
    }
}

/// A recognized function call awaiting display and dismissal.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocation {
    pub id: Uuid,
    pub tool_name: String,
    /// Server-assigned call id, when present
    pub call_id: Option<String>,
    /// Arguments exactly as received
    pub raw_arguments: String,
    pub arguments: Value,
    pub created_at: Instant,
    pub dismiss_deadline: Instant,
}

/// Why an invocation left the live slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DismissReason {
    /// The auto-dismiss deadline passed
    Timeout,
    /// The user changed the subject
    TopicDrift,
    /// Dismissed on request
    Manual,
    /// A newer invocation took the slot
    Replaced,
    /// The session closed
    SessionEnded,
}

impl std::fmt::Display for DismissReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            DismissReason::Timeout => "timeout",
            DismissReason::TopicDrift => "topic drift",
            DismissReason::Manual => "manual",
            DismissReason::Replaced => "replaced",
            DismissReason::SessionEnded => "session ended",
        };
        f.write_str(text)
    }
}

/// Something the dispatcher did that the presentation layer may care about.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolNotice {
    /// Tools were registered for the current session
    Registered { tools: usize },
    /// A new invocation is live
    Invoked(ToolInvocation),
    /// The live invocation was retired
    Dismissed {
        invocation_id: Uuid,
        reason: DismissReason,
    },
    /// The follow-up response was requested
    FollowUpSent { invocation_id: Uuid, event_id: String },
    /// A non-fatal problem
    Diagnostic(RealtimeError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerKind {
    AutoDismiss,
    FollowUp,
}

/// A timer that expired for some invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerFired {
    invocation_id: Uuid,
    kind: TimerKind,
}

impl TimerFired {
    pub fn invocation_id(&self) -> Uuid {
        self.invocation_id
    }
}

struct LiveInvocation {
    invocation: ToolInvocation,
    dismiss_key: Option<delay_queue::Key>,
    follow_up_key: Option<delay_queue::Key>,
}

/// Watches the event log and manages the single live tool invocation.
pub struct ToolDispatcher {
    registry: ToolRegistry,
    settings: DispatcherSettings,
    drift: DriftDetector,
    cursor: u64,
    registered: bool,
    active: Option<LiveInvocation>,
    previous_keywords: Option<TopicKeywordSet>,
    timers: DelayQueue<TimerFired>,
}

impl ToolDispatcher {
    pub fn new(registry: ToolRegistry, settings: DispatcherSettings) -> Self {
        let drift = DriftDetector::new(settings.drift_threshold, &settings.stop_words);
        Self {
            registry,
            settings,
            drift,
            cursor: 0,
            registered: false,
            active: None,
            previous_keywords: None,
            timers: DelayQueue::new(),
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn is_registered(&self) -> bool {
        self.registered
    }

    /// The live invocation, if any.
    pub fn active(&self) -> Option<&ToolInvocation> {
        self.active.as_ref().map(|live| &live.invocation)
    }

    pub fn previous_keywords(&self) -> Option<&TopicKeywordSet> {
        self.previous_keywords.as_ref()
    }

    pub fn has_pending_timers(&self) -> bool {
        !self.timers.is_empty()
    }

    /// Handle every log entry not seen yet, including entries appended while
    /// handling.
    pub fn process(&mut self, channel: &mut EventChannel) -> Vec<ToolNotice> {
        let mut notices = Vec::new();
        loop {
            let pending: Vec<LoggedEvent> = channel.log().since(self.cursor).cloned().collect();
            if pending.is_empty() {
                break;
            }
            for entry in pending {
                self.cursor = entry.seq + 1;
                self.handle_entry(&entry, channel, &mut notices);
            }
        }
        notices
    }

    /// Match function calls of a finished response; the last valid one wins.
    fn on_response_done(&mut self, response: &Response, notices: &mut Vec<ToolNotice>) {
        let mut matched = None;
        for call in response.function_calls() {
            let Some(name) = call.name.as_deref() else {
                continue;
            };
            if self.registry.get(name).is_none() {
                debug!(tool = name, "Ignoring call to unregistered tool");
                continue;
            }
            let raw = call.arguments.clone().unwrap_or_default();
            match serde_json::from_str::<Value>(&raw) {
                Ok(arguments) => {
                    matched = Some((name.to_string(), call.call_id.clone(), raw, arguments))
                }
                Err(e) => {
                    warn!(tool = name, "Function call arguments are not valid JSON: {e}");
                    notices.push(ToolNotice::Diagnostic(RealtimeError::MalformedEvent(
                        format!("arguments for {name}: {e}"),
                    )));
                }
            }
        }
        if let Some((tool_name, call_id, raw_arguments, arguments)) = matched {
            self.activate(tool_name, call_id, raw_arguments, arguments, notices);
        }
    }

    fn handle_entry(
        &mut self,
        entry: &LoggedEvent,
        channel: &mut EventChannel,
        notices: &mut Vec<ToolNotice>,
    ) {
        match (entry.direction, entry.event_type.as_str()) {
            (Direction::Inbound, "session.created") => self.register(channel, notices),
            (Direction::Inbound, "response.done") => {
                if let Some(ServerEvent::ResponseDone { response }) = entry.server_event() {
                    self.on_response_done(&response, notices);
                }
            }
            (Direction::Outbound, "conversation.item.create") => {
                if let Some(ClientEvent::ConversationItemCreate { item, .. }) = entry.client_event()
                    && item.is_user_message()
                {
                    let text = item.text();
                    if !text.trim().is_empty() {
                        self.observe_utterance(&text, notices);
                    }
                }
            }
            _ => {}
        }
    }

    fn register(&mut self, channel: &mut EventChannel, notices: &mut Vec<ToolNotice>) {
        if self.registered || self.registry.is_empty() {
            return;
        }
        match channel.send(self.registry.session_update()) {
            Ok(event_id) => {
                self.registered = true;
                info!(tools = self.registry.len(), event_id = %event_id, "Registered tools");
                notices.push(ToolNotice::Registered {
                    tools: self.registry.len(),
                });
            }
            Err(e) => {
                warn!("Failed to register tools: {e}");
                notices.push(ToolNotice::Diagnostic(e));
            }
        }
    }

    fn activate(
        &mut self,
        tool_name: String,
        call_id: Option<String>,
        raw_arguments: String,
        arguments: Value,
        notices: &mut Vec<ToolNotice>,
    ) {
        if let Some(notice) = self.dismiss(DismissReason::Replaced) {
            notices.push(notice);
        }

        let created_at = Instant::now();
        let invocation = ToolInvocation {
            id: Uuid::new_v4(),
            tool_name,
            call_id,
            raw_arguments,
            arguments,
            created_at,
            dismiss_deadline: created_at + self.settings.dismiss_after,
        };
        let dismiss_key = self.timers.insert(
            TimerFired {
                invocation_id: invocation.id,
                kind: TimerKind::AutoDismiss,
            },
            self.settings.dismiss_after,
        );
        let follow_up_key = self.timers.insert(
            TimerFired {
                invocation_id: invocation.id,
                kind: TimerKind::FollowUp,
            },
            self.settings.follow_up_after,
        );

        info!(
            invocation_id = %invocation.id,
            tool = %invocation.tool_name,
            "Tool invoked"
        );
        notices.push(ToolNotice::Invoked(invocation.clone()));
        self.active = Some(LiveInvocation {
            invocation,
            dismiss_key: Some(dismiss_key),
            follow_up_key: Some(follow_up_key),
        });
    }

    fn observe_utterance(&mut self, text: &str, notices: &mut Vec<ToolNotice>) {
        let current = self.drift.keywords(text);
        if self.active.is_some()
            && let Some(previous) = &self.previous_keywords
            && self.drift.has_drifted(previous, &current)
        {
            debug!(
                previous = ?previous.words(),
                current = ?current.words(),
                "Topic changed"
            );
            if let Some(notice) = self.dismiss(DismissReason::TopicDrift) {
                notices.push(notice);
            }
        }
        self.previous_keywords = Some(current);
    }

    /// Wait for the next timer. Pends forever when no timer is scheduled, so
    /// loops should guard on [`has_pending_timers`](Self::has_pending_timers).
    pub async fn next_timer(&mut self) -> TimerFired {
        match poll_fn(|cx| self.timers.poll_expired(cx)).await {
            Some(expired) => expired.into_inner(),
            None => std::future::pending().await,
        }
    }

    /// Act on an expired timer. Timers of a retired invocation are ignored.
    pub fn on_timer(&mut self, fired: TimerFired, channel: &mut EventChannel) -> Vec<ToolNotice> {
        let mut notices = Vec::new();
        let Some(live) = self.active.as_mut() else {
            return notices;
        };
        if live.invocation.id != fired.invocation_id {
            return notices;
        }

        match fired.kind {
            TimerKind::AutoDismiss => {
                live.dismiss_key = None;
                if let Some(notice) = self.dismiss(DismissReason::Timeout) {
                    notices.push(notice);
                }
            }
            TimerKind::FollowUp => {
                live.follow_up_key = None;
                let instructions = self
                    .registry
                    .get(&live.invocation.tool_name)
                    .map(|tool| tool.follow_up_instructions(&live.invocation.arguments))
                    .unwrap_or_else(|| DEFAULT_FOLLOW_UP.to_string());
                match channel.send(ClientEvent::response_with_instructions(instructions)) {
                    Ok(event_id) => {
                        debug!(invocation_id = %fired.invocation_id, "Sent follow-up response");
                        notices.push(ToolNotice::FollowUpSent {
                            invocation_id: fired.invocation_id,
                            event_id,
                        });
                    }
                    Err(e) => {
                        warn!(invocation_id = %fired.invocation_id, "Follow-up not sent: {e}");
                        notices.push(ToolNotice::Diagnostic(e));
                    }
                }
            }
        }
        notices
    }

    /// Retire the live invocation, cancelling its timers.
    pub fn dismiss(&mut self, reason: DismissReason) -> Option<ToolNotice> {
        let live = self.active.take()?;
        for key in [live.dismiss_key, live.follow_up_key].into_iter().flatten() {
            self.timers.try_remove(&key);
        }
        info!(invocation_id = %live.invocation.id, %reason, "Tool dismissed");
        Some(ToolNotice::Dismissed {
            invocation_id: live.invocation.id,
            reason,
        })
    }

    /// Forget all per-session state. Called when a session closes.
    pub fn reset(&mut self) -> Option<ToolNotice> {
        let notice = self.dismiss(DismissReason::SessionEnded);
        self.timers.clear();
        self.registered = false;
        self.previous_keywords = None;
        notice
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::realtime::channel::tests::{ActiveChannel, active_channel};
    use serde_json::json;

    fn dispatcher() -> ToolDispatcher {
        ToolDispatcher::new(ToolRegistry::with_defaults(), DispatcherSettings::default())
    }

    fn weather_done(location: &str) -> Vec<u8> {
        let arguments = json!({
            "location": location,
            "temperature": 18,
            "condition": "Cloudy",
            "humidity": 70,
            "windSpeed": 12
        })
        .to_string();
        json!({
            "type": "response.done",
            "event_id": "event_done",
            "response": {
                "id": "resp_1",
                "status": "completed",
                "output": [{
                    "type": "function_call",
                    "name": "display_weather",
                    "call_id": "call_1",
                    "arguments": arguments
                }]
            }
        })
        .to_string()
        .into_bytes()
    }

    /// Timer wheels round deadlines up to the next millisecond.
    fn assert_within(elapsed: Duration, expected: Duration) {
        assert!(
            elapsed >= expected && elapsed <= expected + Duration::from_millis(2),
            "elapsed {elapsed:?}, expected {expected:?}"
        );
    }

    fn sent_types(channel: &EventChannel) -> Vec<String> {
        channel
            .log()
            .iter()
            .filter(|e| e.direction == Direction::Outbound)
            .map(|e| e.event_type.clone())
            .collect()
    }

    #[tokio::test]
    async fn test_registers_once_after_session_created() {
        let ActiveChannel { mut channel, .. } = active_channel().await;
        let mut dispatcher = dispatcher();

        assert!(dispatcher.process(&mut channel).is_empty());
        assert!(!dispatcher.is_registered());

        channel
            .on_receive(br#"{"type":"session.created","event_id":"event_1","session":{}}"#)
            .unwrap();
        let notices = dispatcher.process(&mut channel);
        assert_eq!(notices, vec![ToolNotice::Registered { tools: 1 }]);

        channel
            .on_receive(br#"{"type":"session.created","event_id":"event_2","session":{}}"#)
            .unwrap();
        assert!(dispatcher.process(&mut channel).is_empty());

        let updates = sent_types(&channel)
            .into_iter()
            .filter(|t| t == "session.update")
            .count();
        assert_eq!(updates, 1);
    }

    #[tokio::test]
    async fn test_function_call_creates_invocation_and_follow_up() {
        let ActiveChannel { mut channel, .. } = active_channel().await;
        tokio::time::pause();
        let mut dispatcher = dispatcher();

        channel.on_receive(&weather_done("Paris")).unwrap();
        let notices = dispatcher.process(&mut channel);
        let [ToolNotice::Invoked(invocation)] = notices.as_slice() else {
            panic!("expected one invocation, got {notices:?}");
        };
        assert_eq!(invocation.tool_name, "display_weather");
        assert_eq!(invocation.call_id.as_deref(), Some("call_1"));
        assert_eq!(invocation.arguments["location"], "Paris");
        assert_eq!(
            invocation.dismiss_deadline - invocation.created_at,
            Duration::from_secs(10)
        );

        let start = Instant::now();
        let fired = dispatcher.next_timer().await;
        assert_within(start.elapsed(), Duration::from_millis(500));
        let notices = dispatcher.on_timer(fired, &mut channel);
        assert!(matches!(notices.as_slice(), [ToolNotice::FollowUpSent { .. }]));

        let follow_up = channel.log().latest().unwrap();
        assert_eq!(follow_up.event_type, "response.create");
        assert_eq!(
            follow_up.payload["response"]["instructions"],
            "Ask if they would like to know some fun facts about Paris. Keep the conversation natural."
        );
        assert!(dispatcher.active().is_some());
    }

    #[tokio::test]
    async fn test_auto_dismiss_after_ten_seconds() {
        let ActiveChannel { mut channel, .. } = active_channel().await;
        tokio::time::pause();
        let mut dispatcher = dispatcher();
        let start = Instant::now();

        channel.on_receive(&weather_done("Oslo")).unwrap();
        dispatcher.process(&mut channel);

        let follow_up = dispatcher.next_timer().await;
        dispatcher.on_timer(follow_up, &mut channel);
        let dismiss = dispatcher.next_timer().await;
        assert_within(start.elapsed(), Duration::from_secs(10));

        let notices = dispatcher.on_timer(dismiss, &mut channel);
        assert!(matches!(
            notices.as_slice(),
            [ToolNotice::Dismissed {
                reason: DismissReason::Timeout,
                ..
            }]
        ));
        assert!(dispatcher.active().is_none());
        assert!(!dispatcher.has_pending_timers());
    }

    #[tokio::test]
    async fn test_topic_drift_dismisses() {
        let ActiveChannel { mut channel, .. } = active_channel().await;
        let mut dispatcher = dispatcher();

        channel.send_text("Is Paris nice for a trip this week").unwrap();
        dispatcher.process(&mut channel);
        channel.on_receive(&weather_done("Paris")).unwrap();
        dispatcher.process(&mut channel);
        assert!(dispatcher.active().is_some());

        channel.send_text("tell me a joke about cats").unwrap();
        let notices = dispatcher.process(&mut channel);
        assert!(notices.iter().any(|n| matches!(
            n,
            ToolNotice::Dismissed {
                reason: DismissReason::TopicDrift,
                ..
            }
        )));
        assert!(dispatcher.active().is_none());
        assert!(!dispatcher.has_pending_timers());
        assert!(dispatcher.previous_keywords().unwrap().contains("joke"));
    }

    #[tokio::test]
    async fn test_related_utterance_keeps_invocation() {
        let ActiveChannel { mut channel, .. } = active_channel().await;
        let mut dispatcher = dispatcher();

        channel.send_text("planning a paris trip").unwrap();
        channel.on_receive(&weather_done("Paris")).unwrap();
        dispatcher.process(&mut channel);

        channel.send_text("what about paris tomorrow then").unwrap();
        dispatcher.process(&mut channel);
        assert!(dispatcher.active().is_some());
    }

    #[tokio::test]
    async fn test_drift_needs_live_invocation() {
        let ActiveChannel { mut channel, .. } = active_channel().await;
        let mut dispatcher = dispatcher();

        channel.send_text("planning a paris trip").unwrap();
        channel.send_text("tell me a joke about cats").unwrap();
        let notices = dispatcher.process(&mut channel);
        assert!(notices.is_empty());
        assert!(dispatcher.previous_keywords().unwrap().contains("cats"));
    }

    #[tokio::test]
    async fn test_new_call_replaces_live_invocation() {
        let ActiveChannel { mut channel, .. } = active_channel().await;
        let mut dispatcher = dispatcher();

        channel.on_receive(&weather_done("Paris")).unwrap();
        dispatcher.process(&mut channel);
        let first = dispatcher.active().unwrap().id;

        channel.on_receive(&weather_done("Rome")).unwrap();
        let notices = dispatcher.process(&mut channel);
        assert!(matches!(
            notices.first(),
            Some(ToolNotice::Dismissed {
                invocation_id,
                reason: DismissReason::Replaced,
            }) if *invocation_id == first
        ));
        let live = dispatcher.active().unwrap();
        assert_ne!(live.id, first);
        assert_eq!(live.arguments["location"], "Rome");
    }

    #[tokio::test]
    async fn test_invalid_arguments_are_reported() {
        let ActiveChannel { mut channel, .. } = active_channel().await;
        let mut dispatcher = dispatcher();

        let frame = json!({
            "type": "response.done",
            "response": {"output": [{
                "type": "function_call",
                "name": "display_weather",
                "arguments": "{not json"
            }]}
        })
        .to_string();
        channel.on_receive(frame.as_bytes()).unwrap();

        let notices = dispatcher.process(&mut channel);
        assert!(matches!(
            notices.as_slice(),
            [ToolNotice::Diagnostic(RealtimeError::MalformedEvent(_))]
        ));
        assert!(dispatcher.active().is_none());
    }

    #[tokio::test]
    async fn test_unregistered_tool_is_ignored() {
        let ActiveChannel { mut channel, .. } = active_channel().await;
        let mut dispatcher = dispatcher();

        let frame = json!({
            "type": "response.done",
            "response": {"output": [{
                "type": "function_call",
                "name": "launch_rockets",
                "arguments": "{}"
            }]}
        })
        .to_string();
        channel.on_receive(frame.as_bytes()).unwrap();
        assert!(dispatcher.process(&mut channel).is_empty());
        assert!(dispatcher.active().is_none());
    }

    #[tokio::test]
    async fn test_next_timer_pends_without_invocation() {
        let mut dispatcher = dispatcher();
        assert!(!dispatcher.has_pending_timers());
        let mut fired = tokio_test::task::spawn(dispatcher.next_timer());
        tokio_test::assert_pending!(fired.poll());
    }

    #[tokio::test]
    async fn test_manual_dismiss_frees_slot_and_cancels_timers() {
        let ActiveChannel { mut channel, .. } = active_channel().await;
        let mut dispatcher = dispatcher();

        channel.on_receive(&weather_done("Paris")).unwrap();
        dispatcher.process(&mut channel);
        let notice = dispatcher.dismiss(DismissReason::Manual);
        assert!(matches!(
            notice,
            Some(ToolNotice::Dismissed {
                reason: DismissReason::Manual,
                ..
            })
        ));
        assert!(!dispatcher.has_pending_timers());
        assert!(dispatcher.dismiss(DismissReason::Manual).is_none());

        channel.on_receive(&weather_done("Lima")).unwrap();
        let notices = dispatcher.process(&mut channel);
        assert!(matches!(notices.as_slice(), [ToolNotice::Invoked(_)]));
    }

    #[tokio::test]
    async fn test_reset_clears_session_state() {
        let ActiveChannel { mut channel, .. } = active_channel().await;
        let mut dispatcher = dispatcher();

        channel
            .on_receive(br#"{"type":"session.created","session":{}}"#)
            .unwrap();
        channel.send_text("planning a paris trip").unwrap();
        channel.on_receive(&weather_done("Paris")).unwrap();
        dispatcher.process(&mut channel);
        assert!(dispatcher.is_registered());

        let notice = dispatcher.reset();
        assert!(matches!(
            notice,
            Some(ToolNotice::Dismissed {
                reason: DismissReason::SessionEnded,
                ..
            })
        ));
        assert!(!dispatcher.is_registered());
        assert!(dispatcher.previous_keywords().is_none());
        assert!(!dispatcher.has_pending_timers());
    }
}

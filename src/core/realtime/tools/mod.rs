//! Model-initiated tool calls.
//!
//! The dispatcher watches the event log: it registers the tool schemas once
//! the server reports a session, turns matching function calls into a live
//! [`ToolInvocation`], and retires that invocation on timeout, manual dismiss
//! or when the user changes the subject.

mod dispatcher;
mod schema;
mod topic;

pub use dispatcher::{
    DEFAULT_DISMISS_AFTER, DEFAULT_FOLLOW_UP_AFTER, DismissReason, DispatcherSettings,
    TimerFired, ToolDispatcher, ToolInvocation, ToolNotice,
};
pub use schema::{DEFAULT_FOLLOW_UP, ToolRegistry, ToolSchema};
pub use topic::{DEFAULT_DRIFT_THRESHOLD, DEFAULT_STOP_WORDS, DriftDetector, TopicKeywordSet};

pub mod realtime;

// Re-export commonly used types for convenience
pub use realtime::{
    EventChannel, RealtimeError, RealtimeResult, RealtimeSession, SessionCommand, SessionHandle,
    SessionNotice, SessionState,
};

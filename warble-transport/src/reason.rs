//! Disconnect reason codes and their recovery classification.
//!
//! The transport reports a numeric status code with every close. The
//! supervisor does not branch on raw numbers; it branches on the
//! [`ReasonClass`] produced here. Codes outside the classified table map to
//! [`ReasonClass::Unknown`], which deliberately means "log and do nothing".

/// Status codes a connection close can carry.
pub mod code {
    /// Device was logged out remotely. Needs fresh credentials.
    pub const LOGGED_OUT: u16 = 401;
    /// Authentication rejected.
    pub const FORBIDDEN: u16 = 403;
    /// Link dropped mid-session.
    pub const CONNECTION_LOST: u16 = 408;
    /// Keepalive expired.
    pub const TIMED_OUT: u16 = 425;
    /// Server closed the stream.
    pub const CONNECTION_CLOSED: u16 = 428;
    /// Another client took over the session.
    pub const REPLACED: u16 = 440;
    /// Credential material is unusable.
    pub const BAD_SESSION: u16 = 500;
    /// Server asked for a clean reconnect.
    pub const RESTART_REQUIRED: u16 = 515;
}

/// Recovery class of a disconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReasonClass {
    LoggedOut,
    BadSession,
    Replaced,
    /// Reconnect after a fixed short delay; does not count against the cap.
    RestartRequired,
    /// Connection closed or lost: counted linear backoff.
    Transient,
    /// Reconnect after a fixed short delay; does not count against the cap.
    TimedOut,
    /// 403 or a close with no code at all.
    AuthFailure,
    /// Unclassified code: log it and take no action.
    Unknown,
}

impl ReasonClass {
    /// Terminal classes are never retried without operator intervention.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ReasonClass::LoggedOut
                | ReasonClass::BadSession
                | ReasonClass::Replaced
                | ReasonClass::AuthFailure
        )
    }
}

/// Classify a disconnect status code.
pub fn classify(code: Option<u16>) -> ReasonClass {
    match code {
        Some(code::LOGGED_OUT) => ReasonClass::LoggedOut,
        Some(code::BAD_SESSION) => ReasonClass::BadSession,
        Some(code::REPLACED) => ReasonClass::Replaced,
        Some(code::RESTART_REQUIRED) => ReasonClass::RestartRequired,
        Some(code::CONNECTION_CLOSED) | Some(code::CONNECTION_LOST) => ReasonClass::Transient,
        Some(code::TIMED_OUT) => ReasonClass::TimedOut,
        Some(code::FORBIDDEN) | None => ReasonClass::AuthFailure,
        Some(_) => ReasonClass::Unknown,
    }
}

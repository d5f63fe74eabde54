//! Session lifecycle state

use std::fmt;

/// Session lifecycle state
///
/// Transitions only move forward: `Connecting -> Active -> Terminated`, or
/// `Connecting -> Terminated` when the backend never comes up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Backend transport or shell is still being established
    Connecting,
    /// Shell is open and relaying
    Active,
    /// Torn down; no further events
    Terminated,
}

impl SessionState {
    /// Whether viewers may attach
    pub fn accepts_viewers(self) -> bool {
        self == SessionState::Active
    }

    /// Whether this is the final state
    pub fn is_terminal(self) -> bool {
        self == SessionState::Terminated
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Connecting => "connecting",
            SessionState::Active => "active",
            SessionState::Terminated => "terminated",
        };
        f.write_str(s)
    }
}

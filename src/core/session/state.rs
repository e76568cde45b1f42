//! Session lifecycle states.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Voice-turn state of one client session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Transport is up, upstream link not ready yet
    #[default]
    Idle,
    /// Capturing and forwarding user audio
    Listening,
    /// A response was requested, nothing received yet
    Generating,
    /// Response deltas are streaming to the client
    Speaking,
    /// Generation was cancelled; recovering before listening again
    Interrupted,
    /// Upstream link closed
    Disconnected,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Listening => "listening",
            SessionState::Generating => "generating",
            SessionState::Speaking => "speaking",
            SessionState::Interrupted => "interrupted",
            SessionState::Disconnected => "disconnected",
        }
    }

    /// States in which a response is being produced.
    pub fn is_generating(&self) -> bool {
        matches!(self, SessionState::Generating | SessionState::Speaking)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

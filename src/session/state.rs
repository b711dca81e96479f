//! Session and processing state values broadcast to observers

use std::fmt;

/// Connection lifecycle of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SessionState {
    /// No channel; ready to start
    #[default]
    Idle,
    /// Credentials exchanged or channel handshake in flight
    Connecting,
    /// Channel open; capture and playback may run
    Active,
    /// Last attempt or session failed
    Error,
}

impl SessionState {
    /// Check whether the session holds (or is acquiring) a channel
    #[must_use]
    pub const fn is_busy(self) -> bool {
        matches!(self, Self::Connecting | Self::Active)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Connecting => write!(f, "connecting"),
            Self::Active => write!(f, "active"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// What the conversation is doing right now
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ProcessingState {
    #[default]
    Idle,
    Listening,
    Thinking,
    Speaking,
}

impl fmt::Display for ProcessingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Listening => write!(f, "listening"),
            Self::Thinking => write!(f, "thinking"),
            Self::Speaking => write!(f, "speaking"),
        }
    }
}

/// Session state plus the error that put it there, if any
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SessionStatus {
    pub state: SessionState,
    pub error: Option<String>,
}

impl SessionStatus {
    #[must_use]
    pub const fn new(state: SessionState) -> Self {
        Self { state, error: None }
    }

    #[must_use]
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            state: SessionState::Error,
            error: Some(error.into()),
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.error {
            Some(error) => write!(f, "{} ({error})", self.state),
            None => write!(f, "{}", self.state),
        }
    }
}

/// Snapshot for driving a visual "orb" or similar indicator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VisualIndicator {
    pub state: SessionState,
    pub processing: ProcessingState,
    pub muted: bool,
    pub capturing: bool,
}

/// Who produced a transcript line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
        }
    }
}

/// One line of conversation text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptEntry {
    pub role: Role,
    pub content: String,
    /// Partial recognition result that a later entry will supersede
    pub interim: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn busy_states() {
        assert!(!SessionState::Idle.is_busy());
        assert!(SessionState::Connecting.is_busy());
        assert!(SessionState::Active.is_busy());
        assert!(!SessionState::Error.is_busy());
    }

    #[test]
    fn status_display_includes_error() {
        assert_eq!(SessionStatus::new(SessionState::Active).to_string(), "active");
        assert_eq!(
            SessionStatus::failed("timed out").to_string(),
            "error (timed out)"
        );
    }
}

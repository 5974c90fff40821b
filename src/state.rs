//! Conversation state

use std::fmt;

use crate::actions::Gesture;

/// What the companion is doing right now
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConversationState {
    #[default]
    Idle,
    Listening,
    Thinking,
    Speaking,
    Acting(Gesture),
}

impl ConversationState {
    /// Label used to look up the animation clip
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Listening => "listening",
            Self::Thinking => "thinking",
            Self::Speaking => "speaking",
            Self::Acting(gesture) => gesture.name(),
        }
    }

    #[must_use]
    pub const fn is_idle(self) -> bool {
        matches!(self, Self::Idle)
    }
}

impl fmt::Display for ConversationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Status line shown to the user
pub mod status {
    pub const READY: &str = "Ready";
    pub const LISTENING: &str = "Listening...";
    pub const PROCESSING: &str = "Processing...";
    pub const THINKING: &str = "Thinking...";
    pub const SPEAKING: &str = "Speaking...";
    pub const NO_SPEECH: &str = "No speech detected";
}

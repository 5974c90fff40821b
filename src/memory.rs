//! Bounded conversation history used as prompt context

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// Default number of utterances kept in memory
pub const DEFAULT_MEMORY_LIMIT: usize = 10;

/// Who said an utterance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    /// Wire name used by chat completion APIs
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// A single role-tagged message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utterance {
    pub role: Role,
    pub text: String,
}

impl Utterance {
    #[must_use]
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
        }
    }

    #[must_use]
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
        }
    }
}

/// Ordered, FIFO-bounded log of utterances
///
/// Entries are never mutated once pushed. When the limit is exceeded the
/// oldest entries are dropped first.
#[derive(Debug, Clone)]
pub struct ConversationMemory {
    entries: VecDeque<Utterance>,
    limit: usize,
}

impl Default for ConversationMemory {
    fn default() -> Self {
        Self::new(DEFAULT_MEMORY_LIMIT)
    }
}

impl ConversationMemory {
    /// Create an empty memory holding at most `limit` utterances
    ///
    /// A limit of zero is raised to one.
    #[must_use]
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            entries: VecDeque::with_capacity(limit + 2),
            limit,
        }
    }

    /// Record a completed exchange
    ///
    /// Both sides are pushed together so the log never holds half of a turn
    /// that was appended by this call.
    pub fn record_exchange(&mut self, user: impl Into<String>, assistant: impl Into<String>) {
        self.entries.push_back(Utterance::user(user));
        self.entries.push_back(Utterance::assistant(assistant));
        self.evict();
    }

    fn evict(&mut self) {
        while self.entries.len() > self.limit {
            if let Some(dropped) = self.entries.pop_front() {
                tracing::trace!(role = dropped.role.as_str(), "evicted utterance from memory");
            }
        }
    }

    /// Iterate utterances oldest first
    pub fn iter(&self) -> impl Iterator<Item = &Utterance> {
        self.entries.iter()
    }

    /// Copy of the current log, oldest first
    #[must_use]
    pub fn snapshot(&self) -> Vec<Utterance> {
        self.entries.iter().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub const fn limit(&self) -> usize {
        self.limit
    }
}

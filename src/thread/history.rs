//! Bounded per-thread message history

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// Message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    /// Wire/storage name of the role
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }

    /// Parse a stored role name
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            _ => None,
        }
    }
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One turn of a conversation
///
/// `seq` is the position within the thread, assigned by the buffer when the
/// entry is appended and never reused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageEntry {
    pub role: MessageRole,
    pub content: String,
    #[serde(default)]
    pub seq: u64,
}

impl MessageEntry {
    /// A user message (sequence assigned on append)
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
            seq: 0,
        }
    }

    /// An assistant message (sequence assigned on append)
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
            seq: 0,
        }
    }
}

/// Ordered message history capped at `max_retained` entries
///
/// Overflow drops the oldest entries first. A user entry is always dropped
/// together with the assistant reply that follows it, and an assistant entry
/// left at the front without its question is dropped too, so the oldest
/// retained entry is never half of a turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryBuffer {
    entries: VecDeque<MessageEntry>,
    max_retained: usize,
    next_seq: u64,
}

impl HistoryBuffer {
    /// Empty buffer with the given cap
    #[must_use]
    pub const fn new(max_retained: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            max_retained,
            next_seq: 1,
        }
    }

    /// Rebuild a buffer from previously stored entries (ordered by `seq`)
    ///
    /// Sequence numbers are kept and the cap is applied as if the entries had
    /// been appended one by one.
    #[must_use]
    pub fn restore(max_retained: usize, entries: Vec<MessageEntry>) -> Self {
        let next_seq = entries.iter().map(|e| e.seq).max().map_or(1, |s| s + 1);
        let mut buffer = Self {
            entries: entries.into(),
            max_retained,
            next_seq,
        };
        buffer.evict_overflow();
        buffer
    }

    /// Append entries in order, assigning sequence numbers, then enforce the cap
    ///
    /// Returns the appended entries as stored.
    pub fn extend(&mut self, entries: impl IntoIterator<Item = MessageEntry>) -> Vec<MessageEntry> {
        let mut appended = Vec::new();
        for mut entry in entries {
            entry.seq = self.next_seq;
            self.next_seq += 1;
            appended.push(entry.clone());
            self.entries.push_back(entry);
        }
        self.evict_overflow();
        appended
    }

    fn evict_overflow(&mut self) {
        while self.entries.len() > self.max_retained {
            let Some(dropped) = self.entries.pop_front() else {
                break;
            };
            if dropped.role == MessageRole::User
                && self
                    .entries
                    .front()
                    .is_some_and(|next| next.role == MessageRole::Assistant)
            {
                self.entries.pop_front();
            }
        }
        while self
            .entries
            .front()
            .is_some_and(|first| first.role == MessageRole::Assistant)
        {
            self.entries.pop_front();
        }
    }

    /// The last `n` entries in conversational order
    #[must_use]
    pub fn recent(&self, n: usize) -> Vec<MessageEntry> {
        let skip = self.entries.len().saturating_sub(n);
        self.entries.iter().skip(skip).cloned().collect()
    }

    /// Iterate all retained entries, oldest first
    pub fn iter(&self) -> impl Iterator<Item = &MessageEntry> {
        self.entries.iter()
    }

    /// Sequence number of the oldest retained entry, or the next one to be
    /// assigned when empty
    #[must_use]
    pub fn first_retained_seq(&self) -> u64 {
        self.entries.front().map_or(self.next_seq, |e| e.seq)
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
    pub const fn max_retained(&self) -> usize {
        self.max_retained
    }
}

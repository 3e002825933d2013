//! Conversation aggregate

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;

use super::history::{HistoryBuffer, MessageEntry};
use super::id::ThreadId;

/// One conversation: identity, bounded history and activity timestamps
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadRecord {
    pub id: ThreadId,
    pub history: HistoryBuffer,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
}

impl ThreadRecord {
    /// Fresh, empty thread created at `now`
    #[must_use]
    pub const fn new(id: ThreadId, max_retained: usize, now: DateTime<Utc>) -> Self {
        Self {
            id,
            history: HistoryBuffer::new(max_retained),
            created_at: now,
            last_active_at: now,
        }
    }

    /// Whether the thread has been idle for longer than `ttl`
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>, ttl: TimeDelta) -> bool {
        now.signed_duration_since(self.last_active_at) > ttl
    }

    /// Record an access
    pub fn touch(&mut self, now: DateTime<Utc>) {
        if now > self.last_active_at {
            self.last_active_at = now;
        }
    }

    /// Retained messages, oldest first
    #[must_use]
    pub fn messages(&self) -> Vec<MessageEntry> {
        self.history.iter().cloned().collect()
    }

    /// Metadata view for listings
    #[must_use]
    pub fn summary(&self) -> ThreadSummary {
        ThreadSummary {
            id: self.id,
            message_count: self.history.len(),
            created_at: self.created_at,
            last_active_at: self.last_active_at,
        }
    }
}

/// Thread metadata without the message bodies
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ThreadSummary {
    pub id: ThreadId,
    pub message_count: usize,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
}

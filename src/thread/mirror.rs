//! Durable storage hook for the thread store
//!
//! A mirror receives a copy of every store mutation. The in-memory store stays
//! the source of truth for the running process; the mirror is only read when
//! an identity is missing from memory or when listing (e.g. after a restart).

use chrono::{DateTime, Utc};

use super::history::MessageEntry;
use super::id::ThreadId;
use crate::Result;

/// A thread as read back from durable storage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredThread {
    pub id: ThreadId,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
    /// Most recent entries, ordered by `seq`
    pub entries: Vec<MessageEntry>,
}

/// Durable copy of the thread store
///
/// Implementations must be cheap enough to call while a single thread's
/// lock is held; they are never called with the store-wide lock held.
pub trait ThreadMirror: Send + Sync {
    /// Record a newly created thread
    ///
    /// # Errors
    ///
    /// Returns error if the write fails
    fn create(&self, id: &ThreadId, created_at: DateTime<Utc>) -> Result<()>;

    /// Record appended entries and drop anything older than `retained_from`
    ///
    /// # Errors
    ///
    /// Returns error if the write fails
    fn append(
        &self,
        id: &ThreadId,
        entries: &[MessageEntry],
        retained_from: u64,
        at: DateTime<Utc>,
    ) -> Result<()>;

    /// Record an access without new messages
    ///
    /// # Errors
    ///
    /// Returns error if the write fails
    fn touch(&self, id: &ThreadId, at: DateTime<Utc>) -> Result<()>;

    /// Load a thread with at most `limit` of its latest entries
    ///
    /// # Errors
    ///
    /// Returns error if the read fails
    fn load(&self, id: &ThreadId, limit: usize) -> Result<Option<StoredThread>>;

    /// Identities of threads active at or after `since`
    ///
    /// # Errors
    ///
    /// Returns error if the read fails
    fn active_since(&self, since: DateTime<Utc>) -> Result<Vec<ThreadId>>;

    /// Remove a thread and its messages
    ///
    /// # Errors
    ///
    /// Returns error if the write fails
    fn delete(&self, id: &ThreadId) -> Result<()>;

    /// Remove every thread idle since before `cutoff`, returning how many
    ///
    /// # Errors
    ///
    /// Returns error if the write fails
    fn purge_inactive(&self, cutoff: DateTime<Utc>) -> Result<usize>;

    /// Cheap reachability check used by readiness
    ///
    /// # Errors
    ///
    /// Returns error if storage is unreachable
    fn ping(&self) -> Result<()>;
}

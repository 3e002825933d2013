//! Thread store: expiry and retention policy over a [`SharedMap`]

use std::sync::Arc;
use std::time::Duration;

use chrono::TimeDelta;
use thiserror::Error;

use super::history::{HistoryBuffer, MessageEntry};
use super::id::ThreadId;
use super::map::SharedMap;
use super::mirror::ThreadMirror;
use super::record::{ThreadRecord, ThreadSummary};
use crate::clock::{Clock, SystemClock};

/// Default number of messages kept per thread
pub const DEFAULT_MAX_RETAINED: usize = 20;

/// Default idle time before a thread expires (24 hours)
pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Retention and expiry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadPolicy {
    /// Maximum messages kept per thread
    pub max_retained: usize,
    /// Idle time after which a thread is treated as gone
    pub ttl: Duration,
}

impl Default for ThreadPolicy {
    fn default() -> Self {
        Self {
            max_retained: DEFAULT_MAX_RETAINED,
            ttl: DEFAULT_TTL,
        }
    }
}

/// The target thread expired or was deleted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("thread not found: {0}")]
pub struct ThreadNotFound(pub ThreadId);

/// How `get_or_create` arrived at the returned thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// The caller's thread was found and is live
    Resumed,
    /// No identity supplied; a new thread was started
    Started,
    /// The supplied identity was unknown, expired or malformed; a new thread
    /// replaces it
    Restarted,
}

/// Result of resolving a caller-supplied identity
#[derive(Debug, Clone)]
pub struct ResolvedThread {
    pub id: ThreadId,
    /// Snapshot taken at resolution time
    pub record: ThreadRecord,
    pub resolution: Resolution,
}

/// Concurrency-safe store of live conversations
///
/// Every read validates expiry, so an expired thread is invisible whether or
/// not the [`Reaper`](super::Reaper) has removed it yet.
pub struct ThreadStore {
    threads: SharedMap<ThreadId, ThreadRecord>,
    policy: ThreadPolicy,
    ttl: TimeDelta,
    clock: Arc<dyn Clock>,
    mirror: Option<Arc<dyn ThreadMirror>>,
}

impl std::fmt::Debug for ThreadStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadStore")
            .field("threads", &self.threads.len())
            .field("policy", &self.policy)
            .field("mirrored", &self.mirror.is_some())
            .finish_non_exhaustive()
    }
}

impl ThreadStore {
    /// Create an in-memory store on the system clock
    #[must_use]
    pub fn new(policy: ThreadPolicy) -> Self {
        Self {
            threads: SharedMap::new(),
            policy,
            ttl: TimeDelta::from_std(policy.ttl).unwrap_or(TimeDelta::MAX),
            clock: Arc::new(SystemClock),
            mirror: None,
        }
    }

    /// Use a different time source
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Mirror mutations to durable storage
    #[must_use]
    pub fn with_mirror(mut self, mirror: Arc<dyn ThreadMirror>) -> Self {
        self.mirror = Some(mirror);
        self
    }

    #[must_use]
    pub const fn policy(&self) -> ThreadPolicy {
        self.policy
    }

    /// Durable mirror, if configured
    #[must_use]
    pub fn mirror(&self) -> Option<&Arc<dyn ThreadMirror>> {
        self.mirror.as_ref()
    }

    /// Resolve the caller's identity to a live thread, creating one if needed
    ///
    /// Never fails: an absent, unknown, expired or malformed identity yields a
    /// fresh thread. Resuming counts as activity.
    pub fn get_or_create(&self, requested: Option<&str>) -> ResolvedThread {
        let Some(raw) = requested.filter(|raw| !raw.trim().is_empty()) else {
            let record = self.create();
            return ResolvedThread {
                id: record.id,
                record,
                resolution: Resolution::Started,
            };
        };

        if let Some(id) = ThreadId::parse(raw) {
            if let Some(record) = self.access(&id, true) {
                return ResolvedThread {
                    id,
                    record,
                    resolution: Resolution::Resumed,
                };
            }
        } else {
            tracing::debug!(requested = raw, "malformed thread id, starting fresh");
        }

        let record = self.create();
        tracing::debug!(requested = raw, thread_id = %record.id, "thread restarted");
        ResolvedThread {
            id: record.id,
            record,
            resolution: Resolution::Restarted,
        }
    }

    /// Start a new, empty thread under a freshly minted identity
    pub fn create(&self) -> ThreadRecord {
        let now = self.clock.now();
        let record = loop {
            let record = ThreadRecord::new(ThreadId::generate(), self.policy.max_retained, now);
            if self.threads.insert_new(record.id, record.clone()).is_ok() {
                break record;
            }
        };

        if let Some(mirror) = &self.mirror {
            if let Err(e) = mirror.create(&record.id, now) {
                tracing::warn!(thread_id = %record.id, error = %e, "failed to mirror new thread");
            }
        }

        tracing::debug!(thread_id = %record.id, "thread created");
        record
    }

    /// Read a live thread, counting the read as activity
    #[must_use]
    pub fn get(&self, id: &ThreadId) -> Option<ThreadRecord> {
        self.access(id, true)
    }

    /// Read a live thread without extending its lifetime
    #[must_use]
    pub fn peek(&self, id: &ThreadId) -> Option<ThreadRecord> {
        self.access(id, false)
    }

    /// Atomically append entries to a live thread
    ///
    /// Returns the entries as stored (with sequence numbers).
    ///
    /// # Errors
    ///
    /// Returns [`ThreadNotFound`] if the thread expired or was deleted since
    /// it was resolved; callers should start a new thread.
    pub fn append(
        &self,
        id: &ThreadId,
        entries: Vec<MessageEntry>,
    ) -> Result<Vec<MessageEntry>, ThreadNotFound> {
        let now = self.clock.now();
        let outcome = self.threads.with(id, |record| {
            if record.is_expired(now, self.ttl) {
                return None;
            }
            let appended = record.history.extend(entries);
            record.touch(now);

            // Mirrored under the thread's lock so durable order matches memory
            if let Some(mirror) = &self.mirror {
                let retained_from = record.history.first_retained_seq();
                if let Err(e) = mirror.append(id, &appended, retained_from, now) {
                    tracing::warn!(thread_id = %id, error = %e, "failed to mirror append");
                }
            }
            Some(appended)
        });

        match outcome {
            Some(Some(appended)) => Ok(appended),
            Some(None) => {
                self.evict_if_expired(id);
                Err(ThreadNotFound(*id))
            }
            None => Err(ThreadNotFound(*id)),
        }
    }

    /// Remove a thread; `true` if a live thread was removed
    ///
    /// Idempotent: deleting an absent or expired thread returns `false`.
    pub fn delete(&self, id: &ThreadId) -> bool {
        let now = self.clock.now();
        let removed = self.threads.remove_if(id, |r| !r.is_expired(now, self.ttl));
        if !removed {
            self.threads.remove(id);
        }

        if let Some(mirror) = &self.mirror {
            if let Err(e) = mirror.delete(id) {
                tracing::warn!(thread_id = %id, error = %e, "failed to mirror delete");
            }
        }

        if removed {
            tracing::debug!(thread_id = %id, "thread deleted");
        }
        removed
    }

    /// Snapshot of live threads, most recently active first
    #[must_use]
    pub fn list(&self) -> Vec<ThreadSummary> {
        self.hydrate_active();

        let now = self.clock.now();
        let mut summaries = Vec::new();

        for id in self.threads.keys() {
            match self
                .threads
                .with(&id, |r| (!r.is_expired(now, self.ttl)).then(|| r.summary()))
            {
                Some(Some(summary)) => summaries.push(summary),
                Some(None) => {
                    self.evict_if_expired(&id);
                }
                None => {}
            }
        }

        summaries.sort_by(|a, b| b.last_active_at.cmp(&a.last_active_at));
        summaries
    }

    /// Remove every expired thread, returning how many were evicted
    ///
    /// Each thread is checked and removed under its own lock; the store-wide
    /// lock is never held across more than one record.
    pub fn purge_expired(&self) -> usize {
        let mut evicted = 0;
        for id in self.threads.keys() {
            if self.evict_if_expired(&id) {
                evicted += 1;
            }
        }

        let cutoff = self.clock.now().checked_sub_signed(self.ttl);
        if let (Some(mirror), Some(cutoff)) = (&self.mirror, cutoff) {
            match mirror.purge_inactive(cutoff) {
                Ok(0) => {}
                Ok(purged) => tracing::debug!(purged, "purged inactive mirrored threads"),
                Err(e) => tracing::warn!(error = %e, "failed to purge mirrored threads"),
            }
        }

        evicted
    }

    /// Threads held in memory, including expired ones not yet swept
    #[must_use]
    pub fn resident_count(&self) -> usize {
        self.threads.len()
    }

    /// Live thread from memory, else from the mirror
    fn access(&self, id: &ThreadId, bump: bool) -> Option<ThreadRecord> {
        self.lookup(id, bump).or_else(|| self.hydrate(id, bump))
    }

    fn lookup(&self, id: &ThreadId, bump: bool) -> Option<ThreadRecord> {
        let now = self.clock.now();
        let outcome = self.threads.with(id, |record| {
            if record.is_expired(now, self.ttl) {
                return None;
            }
            if bump {
                record.touch(now);
            }
            Some(record.clone())
        });

        match outcome {
            Some(Some(record)) => {
                if bump {
                    if let Some(mirror) = &self.mirror {
                        if let Err(e) = mirror.touch(id, now) {
                            tracing::warn!(thread_id = %id, error = %e, "failed to mirror touch");
                        }
                    }
                }
                Some(record)
            }
            Some(None) => {
                self.evict_if_expired(id);
                None
            }
            None => None,
        }
    }

    /// Bring a mirrored thread back into memory if it is still live
    ///
    /// With `bump` unset the stored activity time is kept as is.
    fn hydrate(&self, id: &ThreadId, bump: bool) -> Option<ThreadRecord> {
        let mirror = self.mirror.as_ref()?;
        let stored = match mirror.load(id, self.policy.max_retained) {
            Ok(Some(stored)) => stored,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(thread_id = %id, error = %e, "failed to load mirrored thread");
                return None;
            }
        };

        let now = self.clock.now();
        let mut record = ThreadRecord {
            id: *id,
            history: HistoryBuffer::restore(self.policy.max_retained, stored.entries),
            created_at: stored.created_at,
            last_active_at: stored.last_active_at,
        };

        if record.is_expired(now, self.ttl) {
            if let Err(e) = mirror.delete(id) {
                tracing::warn!(
                    thread_id = %id,
                    error = %e,
                    "failed to drop expired mirrored thread"
                );
            }
            return None;
        }

        if bump {
            record.touch(now);
        }
        if self.threads.insert_new(*id, record.clone()).is_err() {
            // Another request rehydrated it first
            return self.lookup(id, bump);
        }
        if bump {
            if let Err(e) = mirror.touch(id, now) {
                tracing::warn!(thread_id = %id, error = %e, "failed to mirror touch");
            }
        }

        tracing::info!(thread_id = %id, messages = record.history.len(), "thread rehydrated");
        Some(record)
    }

    /// Load live mirrored threads that are not resident yet
    fn hydrate_active(&self) {
        let Some(mirror) = &self.mirror else {
            return;
        };
        let Some(since) = self.clock.now().checked_sub_signed(self.ttl) else {
            return;
        };

        match mirror.active_since(since) {
            Ok(ids) => {
                for id in ids {
                    if !self.threads.contains_key(&id) {
                        self.hydrate(&id, false);
                    }
                }
            }
            Err(e) => tracing::warn!(error = %e, "failed to list mirrored threads"),
        }
    }

    fn evict_if_expired(&self, id: &ThreadId) -> bool {
        let now = self.clock.now();
        let evicted = self.threads.remove_if(id, |r| r.is_expired(now, self.ttl));
        if evicted {
            if let Some(mirror) = &self.mirror {
                if let Err(e) = mirror.delete(id) {
                    tracing::warn!(thread_id = %id, error = %e, "failed to mirror eviction");
                }
            }
            tracing::debug!(thread_id = %id, "expired thread evicted");
        }
        evicted
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::{Mutex, mpsc};

    use chrono::{DateTime, Utc};

    use super::*;
    use crate::clock::ManualClock;
    use crate::thread::mirror::StoredThread;

    fn store_with_clock() -> (ThreadStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let store = ThreadStore::new(ThreadPolicy::default()).with_clock(clock.clone());
        (store, clock)
    }

    fn turn(n: usize) -> Vec<MessageEntry> {
        vec![
            MessageEntry::user(format!("pregunta {n}")),
            MessageEntry::assistant(format!("respuesta {n}")),
        ]
    }

    fn past_ttl() -> TimeDelta {
        TimeDelta::hours(24) + TimeDelta::seconds(1)
    }

    #[test]
    fn get_or_create_without_identity_starts_thread() {
        let (store, _) = store_with_clock();
        let resolved = store.get_or_create(None);

        assert_eq!(resolved.resolution, Resolution::Started);
        assert!(resolved.record.history.is_empty());
        assert!(store.get(&resolved.id).is_some());
    }

    #[test]
    fn get_or_create_resumes_known_thread() {
        let (store, _) = store_with_clock();
        let first = store.get_or_create(None);
        store.append(&first.id, turn(1)).unwrap();

        let again = store.get_or_create(Some(&first.id.to_string()));
        assert_eq!(again.resolution, Resolution::Resumed);
        assert_eq!(again.id, first.id);
        assert_eq!(again.record.history.len(), 2);
    }

    #[test]
    fn malformed_or_unknown_identity_restarts() {
        let (store, _) = store_with_clock();

        let malformed = store.get_or_create(Some("T1"));
        assert_eq!(malformed.resolution, Resolution::Restarted);

        let unknown = ThreadId::generate();
        let resolved = store.get_or_create(Some(&unknown.to_string()));
        assert_eq!(resolved.resolution, Resolution::Restarted);
        assert_ne!(resolved.id, unknown);

        let blank = store.get_or_create(Some("   "));
        assert_eq!(blank.resolution, Resolution::Started);
    }

    #[test]
    fn expired_thread_is_unreachable_before_sweep() {
        let (store, clock) = store_with_clock();
        let id = store.create().id;

        clock.advance(past_ttl());

        assert!(store.get(&id).is_none());
        assert_eq!(store.append(&id, turn(1)), Err(ThreadNotFound(id)));
        assert!(!store.delete(&id));
        assert_eq!(store.resident_count(), 0);
    }

    #[test]
    fn expired_identity_yields_new_empty_thread() {
        let (store, clock) = store_with_clock();
        let old = store.create().id;
        store.append(&old, turn(1)).unwrap();

        clock.advance(past_ttl());

        let resolved = store.get_or_create(Some(&old.to_string()));
        assert_eq!(resolved.resolution, Resolution::Restarted);
        assert_ne!(resolved.id, old);
        assert!(resolved.record.history.is_empty());
    }

    #[test]
    fn activity_extends_lifetime() {
        let (store, clock) = store_with_clock();
        let id = store.create().id;

        clock.advance(TimeDelta::hours(20));
        assert!(store.get(&id).is_some());

        clock.advance(TimeDelta::hours(20));
        assert!(store.peek(&id).is_some());

        // peek does not count as activity
        clock.advance(TimeDelta::hours(5));
        assert!(store.peek(&id).is_none());
    }

    #[test]
    fn append_enforces_retention() {
        let (store, _) = store_with_clock();
        let id = store.create().id;

        for n in 0..30 {
            store.append(&id, turn(n)).unwrap();
        }

        let record = store.get(&id).unwrap();
        let messages = record.messages();
        assert_eq!(messages.len(), DEFAULT_MAX_RETAINED);
        assert_eq!(messages[0].content, "pregunta 20");
        assert_eq!(messages[19].content, "respuesta 29");
    }

    #[test]
    fn delete_is_idempotent() {
        let (store, _) = store_with_clock();
        let id = store.create().id;

        assert!(store.delete(&id));
        assert!(!store.delete(&id));
        assert!(store.get(&id).is_none());
        assert_eq!(store.append(&id, turn(1)), Err(ThreadNotFound(id)));
    }

    #[test]
    fn list_hides_expired_threads() {
        let (store, clock) = store_with_clock();
        let stale = store.create().id;
        clock.advance(TimeDelta::hours(23));
        let fresh = store.create().id;
        clock.advance(TimeDelta::hours(2));

        let listed: Vec<ThreadId> = store.list().into_iter().map(|s| s.id).collect();
        assert_eq!(listed, vec![fresh]);
        assert!(store.peek(&stale).is_none());
    }

    #[test]
    fn purge_expired_counts_evictions() {
        let (store, clock) = store_with_clock();
        for _ in 0..3 {
            store.create();
        }
        clock.advance(TimeDelta::hours(12));
        let survivor = store.create().id;
        clock.advance(TimeDelta::hours(13));

        assert_eq!(store.purge_expired(), 3);
        assert_eq!(store.resident_count(), 1);
        assert!(store.get(&survivor).is_some());
        assert_eq!(store.purge_expired(), 0);
    }

    #[test]
    fn concurrent_creates_yield_unique_ids() {
        let store = Arc::new(ThreadStore::new(ThreadPolicy::default()));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    (0..250).map(|_| store.create().id).collect::<Vec<_>>()
                })
            })
            .collect();

        let ids: HashSet<ThreadId> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        assert_eq!(ids.len(), 2000);
        assert_eq!(store.resident_count(), 2000);
    }

    #[test]
    fn concurrent_appends_keep_every_pair_intact() {
        let policy = ThreadPolicy {
            max_retained: 1000,
            ..ThreadPolicy::default()
        };
        let store = Arc::new(ThreadStore::new(policy));
        let id = store.create().id;

        let handles: Vec<_> = (0..10)
            .map(|worker| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for n in 0..20 {
                        store
                            .append(
                                &id,
                                vec![
                                    MessageEntry::user(format!("{worker}-{n}")),
                                    MessageEntry::assistant(format!("{worker}-{n}")),
                                ],
                            )
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let messages = store.get(&id).unwrap().messages();
        assert_eq!(messages.len(), 400);
        for pair in messages.chunks(2) {
            assert_eq!(pair[0].role, crate::thread::MessageRole::User);
            assert_eq!(pair[1].role, crate::thread::MessageRole::Assistant);
            assert_eq!(pair[0].content, pair[1].content);
            assert_eq!(pair[0].seq + 1, pair[1].seq);
        }
    }

    /// Mirror that keeps everything in a map, for exercising rehydration
    #[derive(Default)]
    struct MemoryMirror {
        threads: Mutex<std::collections::HashMap<ThreadId, StoredThread>>,
    }

    impl ThreadMirror for MemoryMirror {
        fn create(&self, id: &ThreadId, created_at: DateTime<Utc>) -> crate::Result<()> {
            self.threads.lock().unwrap().insert(
                *id,
                StoredThread {
                    id: *id,
                    created_at,
                    last_active_at: created_at,
                    entries: Vec::new(),
                },
            );
            Ok(())
        }

        fn append(
            &self,
            id: &ThreadId,
            entries: &[MessageEntry],
            retained_from: u64,
            at: DateTime<Utc>,
        ) -> crate::Result<()> {
            let mut threads = self.threads.lock().unwrap();
            if let Some(thread) = threads.get_mut(id) {
                thread.entries.extend_from_slice(entries);
                thread.entries.retain(|e| e.seq >= retained_from);
                thread.last_active_at = at;
            }
            Ok(())
        }

        fn touch(&self, id: &ThreadId, at: DateTime<Utc>) -> crate::Result<()> {
            if let Some(thread) = self.threads.lock().unwrap().get_mut(id) {
                thread.last_active_at = thread.last_active_at.max(at);
            }
            Ok(())
        }

        fn load(&self, id: &ThreadId, limit: usize) -> crate::Result<Option<StoredThread>> {
            Ok(self.threads.lock().unwrap().get(id).cloned().map(|mut t| {
                let skip = t.entries.len().saturating_sub(limit);
                t.entries.drain(..skip);
                t
            }))
        }

        fn active_since(&self, since: DateTime<Utc>) -> crate::Result<Vec<ThreadId>> {
            Ok(self
                .threads
                .lock()
                .unwrap()
                .values()
                .filter(|t| t.last_active_at >= since)
                .map(|t| t.id)
                .collect())
        }

        fn delete(&self, id: &ThreadId) -> crate::Result<()> {
            self.threads.lock().unwrap().remove(id);
            Ok(())
        }

        fn purge_inactive(&self, cutoff: DateTime<Utc>) -> crate::Result<usize> {
            let mut threads = self.threads.lock().unwrap();
            let before = threads.len();
            threads.retain(|_, t| t.last_active_at >= cutoff);
            Ok(before - threads.len())
        }

        fn ping(&self) -> crate::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn mirrored_thread_survives_restart() {
        let clock = Arc::new(ManualClock::default());
        let mirror = Arc::new(MemoryMirror::default());

        let first = ThreadStore::new(ThreadPolicy::default())
            .with_clock(clock.clone())
            .with_mirror(mirror.clone());
        let id = first.create().id;
        first.append(&id, turn(1)).unwrap();
        drop(first);

        clock.advance(TimeDelta::hours(1));
        let second = ThreadStore::new(ThreadPolicy::default())
            .with_clock(clock.clone())
            .with_mirror(mirror.clone());

        let resolved = second.get_or_create(Some(&id.to_string()));
        assert_eq!(resolved.resolution, Resolution::Resumed);
        assert_eq!(resolved.id, id);
        assert_eq!(resolved.record.history.len(), 2);

        // New entries continue the stored sequence
        let appended = second.append(&id, turn(2)).unwrap();
        assert_eq!(appended[0].seq, 3);
    }

    #[test]
    fn expired_mirrored_thread_is_not_rehydrated() {
        let clock = Arc::new(ManualClock::default());
        let mirror = Arc::new(MemoryMirror::default());

        let first = ThreadStore::new(ThreadPolicy::default())
            .with_clock(clock.clone())
            .with_mirror(mirror.clone());
        let id = first.create().id;
        drop(first);

        clock.advance(past_ttl());
        let second = ThreadStore::new(ThreadPolicy::default())
            .with_clock(clock.clone())
            .with_mirror(mirror.clone());

        let resolved = second.get_or_create(Some(&id.to_string()));
        assert_eq!(resolved.resolution, Resolution::Restarted);
        assert!(mirror.load(&id, 20).unwrap().is_none());
    }

    #[test]
    fn sweep_purges_mirror_too() {
        let clock = Arc::new(ManualClock::default());
        let mirror = Arc::new(MemoryMirror::default());
        let store = ThreadStore::new(ThreadPolicy::default())
            .with_clock(clock.clone())
            .with_mirror(mirror.clone());

        let id = store.create().id;
        clock.advance(past_ttl());

        assert_eq!(store.purge_expired(), 1);
        assert!(mirror.load(&id, 20).unwrap().is_none());
    }

    fn restarted_pair() -> (ThreadId, ThreadStore, Arc<MemoryMirror>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let mirror = Arc::new(MemoryMirror::default());

        let first = ThreadStore::new(ThreadPolicy::default())
            .with_clock(clock.clone())
            .with_mirror(mirror.clone());
        let id = first.create().id;
        first.append(&id, turn(1)).unwrap();
        drop(first);

        clock.advance(TimeDelta::hours(1));
        let second = ThreadStore::new(ThreadPolicy::default())
            .with_clock(clock.clone())
            .with_mirror(mirror.clone());
        (id, second, mirror, clock)
    }

    #[test]
    fn peek_reads_mirrored_thread_without_touching_it() {
        let (id, store, mirror, _) = restarted_pair();
        let stored_at = mirror.load(&id, 20).unwrap().unwrap().last_active_at;

        let record = store.peek(&id).unwrap();
        assert_eq!(record.history.len(), 2);
        assert_eq!(record.last_active_at, stored_at);
        assert_eq!(mirror.load(&id, 20).unwrap().unwrap().last_active_at, stored_at);
        assert_eq!(store.resident_count(), 1);
    }

    #[test]
    fn get_reads_mirrored_thread_as_activity() {
        let (id, store, mirror, clock) = restarted_pair();

        let record = store.get(&id).unwrap();
        assert_eq!(record.last_active_at, clock.now());
        assert_eq!(mirror.load(&id, 20).unwrap().unwrap().last_active_at, clock.now());
    }

    #[test]
    fn list_includes_live_mirrored_threads() {
        let (id, store, _, clock) = restarted_pair();
        let local = store.create().id;

        let mut listed: Vec<ThreadId> = store.list().into_iter().map(|s| s.id).collect();
        listed.sort_unstable();
        let mut expected = vec![id, local];
        expected.sort_unstable();
        assert_eq!(listed, expected);

        clock.advance(past_ttl());
        assert!(store.list().is_empty());
    }

    /// Mirror whose appends block until released
    struct GatedMirror {
        entered: Mutex<mpsc::Sender<()>>,
        release: Mutex<mpsc::Receiver<()>>,
    }

    impl ThreadMirror for GatedMirror {
        fn create(&self, _id: &ThreadId, _created_at: DateTime<Utc>) -> crate::Result<()> {
            Ok(())
        }

        fn append(
            &self,
            _id: &ThreadId,
            _entries: &[MessageEntry],
            _retained_from: u64,
            _at: DateTime<Utc>,
        ) -> crate::Result<()> {
            self.entered.lock().unwrap().send(()).unwrap();
            self.release.lock().unwrap().recv().unwrap();
            Ok(())
        }

        fn touch(&self, _id: &ThreadId, _at: DateTime<Utc>) -> crate::Result<()> {
            Ok(())
        }

        fn load(&self, _id: &ThreadId, _limit: usize) -> crate::Result<Option<StoredThread>> {
            Ok(None)
        }

        fn active_since(&self, _since: DateTime<Utc>) -> crate::Result<Vec<ThreadId>> {
            Ok(Vec::new())
        }

        fn delete(&self, _id: &ThreadId) -> crate::Result<()> {
            Ok(())
        }

        fn purge_inactive(&self, _cutoff: DateTime<Utc>) -> crate::Result<usize> {
            Ok(0)
        }

        fn ping(&self) -> crate::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn sweep_behind_slow_mirror_write_does_not_stall_other_threads() {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let mirror = GatedMirror {
            entered: Mutex::new(entered_tx),
            release: Mutex::new(release_rx),
        };
        let store =
            Arc::new(ThreadStore::new(ThreadPolicy::default()).with_mirror(Arc::new(mirror)));
        let busy = store.create().id;
        let other = store.create().id;

        let writer = std::thread::spawn({
            let store = Arc::clone(&store);
            move || store.append(&busy, turn(1))
        });
        entered_rx.recv().unwrap();

        let sweeper = std::thread::spawn({
            let store = Arc::clone(&store);
            move || store.purge_expired()
        });
        std::thread::sleep(Duration::from_millis(50));

        let (read_tx, read_rx) = mpsc::channel();
        let reader = std::thread::spawn({
            let store = Arc::clone(&store);
            move || read_tx.send(store.get(&other).is_some()).unwrap()
        });
        let read = read_rx.recv_timeout(Duration::from_secs(2));
        release_tx.send(()).unwrap();

        assert_eq!(read, Ok(true));
        assert_eq!(writer.join().unwrap().unwrap().len(), 2);
        assert_eq!(sweeper.join().unwrap(), 0);
        reader.join().unwrap();
    }
}

//! Conversation memory
//!
//! Threads are owned by a single [`ThreadStore`] per process:
//! - [`HistoryBuffer`] caps what each thread retains
//! - [`ThreadStore`] resolves identities and enforces TTL on every access
//! - [`Reaper`] sweeps expired threads in the background
//! - [`ThreadMirror`] optionally copies every mutation to durable storage

mod history;
mod id;
mod map;
mod mirror;
mod reaper;
mod record;
mod store;

pub use history::{HistoryBuffer, MessageEntry, MessageRole};
pub use id::ThreadId;
pub use map::SharedMap;
pub use mirror::{StoredThread, ThreadMirror};
pub use reaper::{DEFAULT_SWEEP_INTERVAL, Reaper, ReaperHandle};
pub use record::{ThreadRecord, ThreadSummary};
pub use store::{
    DEFAULT_MAX_RETAINED, DEFAULT_TTL, Resolution, ResolvedThread, ThreadNotFound, ThreadPolicy,
    ThreadStore,
};

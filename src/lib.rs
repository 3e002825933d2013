//! CrediFlex Gateway - conversational front-end for the supplier dashboard
//!
//! This library provides the core functionality for the gateway:
//! - Thread memory with bounded history and idle expiry
//! - Prompt assembly from history, business context and the current query
//! - Turn orchestration against an OpenAI-compatible model endpoint
//! - Optional `SQLite` mirroring so conversations survive restarts
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │              HTTP API  /  terminal chat              │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │                RequestCoordinator                    │
//! │   ThreadStore  │  ContextAssembler  │  ModelClient  │
//! └───────┬────────────────────────────────┬────────────┘
//!         │                                │
//! ┌───────▼────────┐              ┌────────▼────────────┐
//! │ Reaper, SQLite │              │  chat completions   │
//! └────────────────┘              └─────────────────────┘
//! ```

pub mod api;
pub mod clock;
pub mod config;
pub mod context;
pub mod coordinator;
pub mod daemon;
pub mod db;
pub mod error;
pub mod model;
pub mod thread;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use context::{ContextAssembler, ContextConfig};
pub use coordinator::{RequestCoordinator, TurnConfig, TurnOutcome, TurnRequest, TurnStatus};
pub use daemon::Daemon;
pub use db::{DbConn, DbPool, SqliteThreadMirror};
pub use error::{Error, Result};
pub use model::{ModelClient, OpenAiClient, OpenAiConfig, UpstreamError};
pub use thread::{
    MessageEntry, MessageRole, Reaper, Resolution, ThreadId, ThreadNotFound, ThreadPolicy,
    ThreadStore,
};

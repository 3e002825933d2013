//! External model collaborator
//!
//! The gateway only needs "assembled text in, generated text out". Anything
//! that can do that within a timeout implements [`ModelClient`].

pub mod openai;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use openai::{OpenAiClient, OpenAiConfig};

/// Default upper bound on one model call
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Why a model call produced no answer
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UpstreamError {
    /// The call did not finish in time
    #[error("model call timed out after {0:?}")]
    Timeout(Duration),

    /// Transport failure or non-success status
    #[error("model endpoint unavailable: {0}")]
    Unavailable(String),

    /// The endpoint answered but the body was unusable
    #[error("model returned an unusable response: {0}")]
    BadResponse(String),
}

/// Text generation endpoint
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Model identifier reported to callers
    fn model_id(&self) -> &str;

    /// Generate a reply to `payload`, giving up after `timeout`
    ///
    /// # Errors
    ///
    /// Returns [`UpstreamError`] on timeout, transport failure or an empty or
    /// malformed reply
    async fn complete(&self, payload: &str, timeout: Duration) -> Result<String, UpstreamError>;
}

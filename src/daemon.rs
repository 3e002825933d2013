//! Daemon - the main gateway service
//!
//! Wires the thread store, reaper, model client and coordinator together and
//! serves them over HTTP until Ctrl-C.

use std::sync::Arc;

use crate::api::ApiServerBuilder;
use crate::context::ContextAssembler;
use crate::coordinator::RequestCoordinator;
use crate::db::{self, SqliteThreadMirror};
use crate::model::{ModelClient, OpenAiClient};
use crate::thread::{Reaper, ThreadStore};
use crate::{Config, Result};

/// The CrediFlex gateway process
pub struct Daemon {
    config: Config,
    coordinator: RequestCoordinator,
}

impl Daemon {
    /// Create a daemon talking to the configured OpenAI-compatible endpoint
    ///
    /// # Errors
    ///
    /// Returns error if the mirror database or model client cannot be set up
    pub fn new(config: Config) -> Result<Self> {
        let model = OpenAiClient::new(config.openai_config()?)?;
        Self::with_model(config, Arc::new(model))
    }

    /// Create a daemon around an existing model client
    ///
    /// # Errors
    ///
    /// Returns error if the mirror database cannot be opened
    pub fn with_model(config: Config, model: Arc<dyn ModelClient>) -> Result<Self> {
        let store = build_store(&config)?;
        let coordinator =
            RequestCoordinator::new(store, ContextAssembler::new(config.context_config()), model)
                .with_config(config.turn_config());

        Ok(Self {
            config,
            coordinator,
        })
    }

    #[must_use]
    pub const fn coordinator(&self) -> &RequestCoordinator {
        &self.coordinator
    }

    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Serve HTTP until Ctrl-C, sweeping expired threads in the background
    ///
    /// # Errors
    ///
    /// Returns error if the server fails to bind or run
    pub async fn run(self) -> Result<()> {
        let model_configured = self.config.llm.api_key.is_some();
        if !model_configured {
            tracing::warn!("OPENAI_API_KEY not set - chat turns will return the fallback response");
        }

        tracing::info!(
            port = self.config.server.port,
            model = self.coordinator.model_id(),
            ttl_secs = self.config.memory.ttl.as_secs(),
            persist = self.config.storage.enabled,
            "gateway running"
        );

        let reaper = Reaper::new(
            Arc::clone(self.coordinator.store()),
            self.config.memory.sweep_interval,
        )
        .spawn();

        let mut builder = ApiServerBuilder::new(self.coordinator)
            .port(self.config.server.port)
            .api_key(self.config.server.api_key.clone())
            .model_configured(model_configured);
        if self.config.server.cloud_mode {
            builder = builder.cloud_mode(self.config.server.rate_limit_per_minute);
        }

        let shutdown = async {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutdown signal received");
            }
        };
        let served = builder.build().run_until(shutdown).await;

        reaper.shutdown().await;
        served
    }
}

/// In-memory store, mirrored to `SQLite` when persistence is enabled
fn build_store(config: &Config) -> Result<Arc<ThreadStore>> {
    let store = ThreadStore::new(config.thread_policy());
    if !config.storage.enabled {
        return Ok(Arc::new(store));
    }

    let pool = db::init(&config.storage.path)?;
    tracing::info!(path = %config.storage.path.display(), "thread persistence enabled");
    Ok(Arc::new(store.with_mirror(Arc::new(SqliteThreadMirror::new(pool)))))
}

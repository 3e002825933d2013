//! HTTP API server for the CrediFlex gateway

pub mod auth;
pub mod chat;
pub mod health;
pub mod rate_limit;
pub mod threads;

use std::future::Future;
use std::sync::Arc;

use axum::{Json, Router, http::StatusCode};
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::Result;
use crate::coordinator::RequestCoordinator;
use crate::thread::ThreadStore;

/// Shared state for API handlers
#[derive(Clone)]
pub struct ApiState {
    pub coordinator: RequestCoordinator,
    pub store: Arc<ThreadStore>,
    /// Bearer key for `/api/threads` (from `CREDIFLEX_API_KEY`)
    pub api_key: Option<String>,
    /// Whether the model endpoint has credentials
    pub model_configured: bool,
    pub cloud_mode: bool,
    pub rate_limiter: Option<rate_limit::SharedLimiter>,
}

impl ApiState {
    /// State for the given coordinator with every optional feature off
    #[must_use]
    pub fn new(coordinator: RequestCoordinator) -> Self {
        Self {
            store: Arc::clone(coordinator.store()),
            coordinator,
            api_key: None,
            model_configured: true,
            cloud_mode: false,
            rate_limiter: None,
        }
    }
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

/// Error status plus the JSON envelope every endpoint uses
pub type ApiError = (StatusCode, Json<ErrorResponse>);

fn error_response(status: StatusCode, code: &str, message: &str) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: ErrorDetail {
                code: code.to_string(),
                message: message.to_string(),
            },
        }),
    )
}

impl From<crate::Error> for ApiError {
    fn from(e: crate::Error) -> Self {
        match e {
            crate::Error::InvalidInput(msg) => {
                error_response(StatusCode::BAD_REQUEST, "invalid_input", &msg)
            }
            crate::Error::NotFound(msg) => error_response(StatusCode::NOT_FOUND, "not_found", &msg),
            other => {
                tracing::error!(error = %other, "request failed");
                error_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    &other.to_string(),
                )
            }
        }
    }
}

/// Configuration for building an API server
pub struct ApiServerBuilder {
    coordinator: RequestCoordinator,
    port: u16,
    api_key: Option<String>,
    model_configured: bool,
    rate_limit_per_minute: Option<u32>,
}

impl ApiServerBuilder {
    /// Create a new API server builder
    #[must_use]
    pub const fn new(coordinator: RequestCoordinator) -> Self {
        Self {
            coordinator,
            port: crate::config::DEFAULT_PORT,
            api_key: None,
            model_configured: true,
            rate_limit_per_minute: None,
        }
    }

    #[must_use]
    pub const fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Require this bearer key on admin endpoints
    #[must_use]
    pub fn api_key(mut self, key: Option<String>) -> Self {
        self.api_key = key;
        self
    }

    #[must_use]
    pub const fn model_configured(mut self, configured: bool) -> Self {
        self.model_configured = configured;
        self
    }

    /// Enable cloud mode with the given request budget
    #[must_use]
    pub const fn cloud_mode(mut self, requests_per_minute: u32) -> Self {
        self.rate_limit_per_minute = Some(requests_per_minute);
        self
    }

    /// Build the API server
    #[must_use]
    pub fn build(self) -> ApiServer {
        let mut state = ApiState::new(self.coordinator);
        state.api_key = self.api_key;
        state.model_configured = self.model_configured;
        state.cloud_mode = self.rate_limit_per_minute.is_some();
        state.rate_limiter = self.rate_limit_per_minute.map(rate_limit::create_limiter);

        ApiServer {
            state: Arc::new(state),
            port: self.port,
        }
    }
}

/// HTTP API server
pub struct ApiServer {
    state: Arc<ApiState>,
    port: u16,
}

impl ApiServer {
    #[must_use]
    pub const fn state(&self) -> &Arc<ApiState> {
        &self.state
    }

    /// Build the router with all routes
    #[must_use]
    pub fn router(&self) -> Router {
        router(self.state.clone())
    }

    /// Run the API server until `shutdown` resolves
    ///
    /// # Errors
    ///
    /// Returns error if server fails to bind or run
    pub async fn run_until(
        self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<()> {
        if self.state.cloud_mode {
            tracing::info!("cloud mode enabled: rate limiting active");
        }
        if self.state.api_key.is_none() {
            tracing::warn!("CREDIFLEX_API_KEY not set - thread admin endpoints are open");
        }

        let addr = format!("0.0.0.0:{}", self.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| crate::Error::Config(format!("failed to bind API server: {e}")))?;

        tracing::info!(port = self.port, "API server listening");

        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| crate::Error::Config(format!("API server error: {e}")))?;

        tracing::info!("API server stopped");
        Ok(())
    }
}

/// Full router over `state`
pub fn router(state: Arc<ApiState>) -> Router {
    let router = Router::new()
        .merge(chat::router(state.clone()))
        .nest("/api/threads", threads::router(state.clone()))
        .merge(health::router())
        .merge(health::ready_router(state.clone()));

    // Rate limiting (cloud mode only)
    let router = router.layer(axum::middleware::from_fn_with_state(
        state,
        rate_limit::rate_limit_middleware,
    ));

    // The dashboard frontend calls from any origin
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    router.layer(cors).layer(TraceLayer::new_for_http())
}

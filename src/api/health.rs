//! Health check endpoints

use std::sync::Arc;

use axum::{Json, Router, extract::State, http::StatusCode, routing::get};
use serde::Serialize;

use super::ApiState;

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// Detailed readiness response
#[derive(Serialize)]
pub struct ReadinessResponse {
    pub status: &'static str,
    pub checks: ReadinessChecks,
}

/// Individual readiness checks
#[derive(Serialize)]
pub struct ReadinessChecks {
    pub store: CheckResult,
    pub model: CheckResult,
    pub storage: CheckResult,
}

/// Result of a single health check
#[derive(Serialize)]
pub struct CheckResult {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl CheckResult {
    const fn ok() -> Self {
        Self {
            status: "ok",
            message: None,
        }
    }

    fn fail(message: impl Into<String>) -> Self {
        Self {
            status: "fail",
            message: Some(message.into()),
        }
    }

    fn unavailable() -> Self {
        Self {
            status: "unavailable",
            message: Some("not configured".to_string()),
        }
    }

    fn is_fail(&self) -> bool {
        self.status == "fail"
    }
}

/// Liveness check - is the service running?
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Readiness check - can the service answer chat turns?
async fn ready(State(state): State<Arc<ApiState>>) -> (StatusCode, Json<ReadinessResponse>) {
    let checks = ReadinessChecks {
        store: CheckResult {
            status: "ok",
            message: Some(format!("{} resident threads", state.store.resident_count())),
        },
        model: check_model(&state),
        storage: check_storage(&state),
    };

    let all_ok = !checks.model.is_fail() && !checks.storage.is_fail();
    let (status, http_status) = if all_ok {
        ("ok", StatusCode::OK)
    } else {
        ("degraded", StatusCode::SERVICE_UNAVAILABLE)
    };

    (http_status, Json(ReadinessResponse { status, checks }))
}

/// Without credentials every turn would degrade to the fallback
fn check_model(state: &ApiState) -> CheckResult {
    if state.model_configured {
        CheckResult::ok()
    } else {
        CheckResult::fail(format!(
            "no API key for model {}",
            state.coordinator.model_id()
        ))
    }
}

/// Check the durable mirror, if one is configured
fn check_storage(state: &ApiState) -> CheckResult {
    match state.store.mirror() {
        Some(mirror) => match mirror.ping() {
            Ok(()) => CheckResult::ok(),
            Err(e) => CheckResult::fail(e.to_string()),
        },
        None => CheckResult::unavailable(),
    }
}

/// Build health router (liveness only, no state needed)
pub fn router() -> Router {
    Router::new().route("/health", get(health))
}

/// Build readiness router
pub fn ready_router(state: Arc<ApiState>) -> Router {
    Router::new().route("/ready", get(ready)).with_state(state)
}

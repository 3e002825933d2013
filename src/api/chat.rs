//! Chat endpoints consumed by the supplier dashboard

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    routing::post,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{ApiError, ApiState, error_response};
use crate::context::supplier::{self, DEFAULT_USER_ROLE};
use crate::coordinator::{TurnOutcome, TurnRequest, TurnStatus};

/// Supplier data used by `/chat/demo`
const DEMO_SUPPLIER_DATA: &str = include_str!("../../demos/supplier.json");

/// Query asked by `/chat/demo` when the caller sends none
pub const DEMO_QUERY: &str = "¿Cómo va mi programa de crédito?";

#[derive(Debug, Deserialize)]
pub struct ChatBody {
    /// Required; optional here so a missing field gets the JSON error envelope
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub thread_id: Option<String>,
    /// Supplier dashboard data, preformatted text, or any JSON
    #[serde(default)]
    pub context: Option<Value>,
    #[serde(default)]
    pub user: Option<UserInfo>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UserInfo {
    #[serde(default)]
    pub role: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DemoBody {
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub thread_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub response: String,
    pub thread_id: String,
    /// `"success"`, or `"degraded"` when the fallback was returned
    pub status: &'static str,
    pub model: String,
    /// Unix seconds
    pub timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub supplier_summary: Option<String>,
}

impl ChatResponse {
    fn from_outcome(outcome: TurnOutcome, model: &str, supplier_summary: Option<String>) -> Self {
        let status = match outcome.status {
            TurnStatus::Completed => "success",
            TurnStatus::Degraded(_) => "degraded",
        };
        Self {
            response: outcome.response,
            thread_id: outcome.thread_id.to_string(),
            status,
            model: model.to_string(),
            timestamp: chrono::Utc::now().timestamp(),
            supplier_summary,
        }
    }
}

/// Run one conversational turn
async fn chat(
    State(state): State<Arc<ApiState>>,
    body: Result<Json<ChatBody>, JsonRejection>,
) -> Result<Json<ChatResponse>, ApiError> {
    let Json(body) = body.map_err(|rejection| {
        error_response(StatusCode::BAD_REQUEST, "invalid_input", &rejection.body_text())
    })?;

    let role = body.user.and_then(|u| u.role);
    run_turn(
        &state,
        body.query.unwrap_or_default(),
        body.thread_id,
        role,
        body.context.as_ref(),
    )
    .await
}

/// Run a turn against the built-in demo supplier data
async fn chat_demo(
    State(state): State<Arc<ApiState>>,
    body: Bytes,
) -> Result<Json<ChatResponse>, ApiError> {
    let demo: DemoBody = if body.iter().all(u8::is_ascii_whitespace) {
        DemoBody::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| {
            error_response(StatusCode::BAD_REQUEST, "invalid_input", &e.to_string())
        })?
    };

    let context: Value = serde_json::from_str(DEMO_SUPPLIER_DATA).map_err(crate::Error::from)?;
    let query = demo
        .query
        .filter(|q| !q.trim().is_empty())
        .unwrap_or_else(|| DEMO_QUERY.to_string());
    let role = demo.role.or_else(|| Some(DEFAULT_USER_ROLE.to_string()));

    run_turn(&state, query, demo.thread_id, role, Some(&context)).await
}

async fn run_turn(
    state: &ApiState,
    query: String,
    thread_id: Option<String>,
    role: Option<String>,
    context: Option<&Value>,
) -> Result<Json<ChatResponse>, ApiError> {
    let business_context = supplier::render_business_context(role.as_deref(), context);
    let supplier_summary = context
        .filter(|c| supplier::is_supplier_data(c))
        .map(supplier::summarize_supplier_data);

    let request = TurnRequest {
        query,
        thread_id,
        business_context,
    };
    let outcome = state.coordinator.handle_turn(request).await?;

    Ok(Json(ChatResponse::from_outcome(
        outcome,
        state.coordinator.model_id(),
        supplier_summary,
    )))
}

/// Build chat router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/chat", post(chat))
        .route("/chat/demo", post(chat_demo))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn demo_data_is_supplier_shaped() {
        let value: Value = serde_json::from_str(DEMO_SUPPLIER_DATA).unwrap();
        assert!(supplier::is_supplier_data(&value));

        let summary = supplier::summarize_supplier_data(&value);
        assert!(summary.contains("ACTIVOS (2):"));
        assert!(summary.contains("- Ingresos totales: $95,060.00"));
        assert!(summary.contains("- Órdenes procesadas: 3"));
        assert!(summary.contains("- Solicitudes de crédito: 2"));
    }

    #[test]
    fn chat_body_accepts_minimal_and_full_shapes() {
        let minimal: ChatBody = serde_json::from_str(r#"{"query": "hola"}"#).unwrap();
        assert_eq!(minimal.query.as_deref(), Some("hola"));
        assert!(minimal.thread_id.is_none());

        let full: ChatBody = serde_json::from_str(
            r#"{"query":"hola","thread_id":"t","context":{"orders":[]},"user":{"role":"finance"}}"#,
        )
        .unwrap();
        assert_eq!(full.user.and_then(|u| u.role).as_deref(), Some("finance"));
        assert!(full.context.is_some());
    }
}

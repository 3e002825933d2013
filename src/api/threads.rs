//! Thread administration endpoints

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    middleware,
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{ApiError, ApiState, auth::require_api_key};
use crate::thread::{MessageEntry, ThreadId, ThreadSummary};

#[derive(Serialize)]
pub struct ThreadListResponse {
    pub threads: Vec<ThreadSummary>,
    pub count: usize,
}

#[derive(Serialize)]
pub struct ThreadDetailResponse {
    pub id: ThreadId,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
    pub message_count: usize,
    pub messages: Vec<MessageEntry>,
}

#[derive(Serialize)]
pub struct SweepResponse {
    pub evicted: usize,
    pub remaining: usize,
}

/// List live threads, most recently active first
async fn list_threads(State(state): State<Arc<ApiState>>) -> Json<ThreadListResponse> {
    let threads = state.store.list();
    Json(ThreadListResponse {
        count: threads.len(),
        threads,
    })
}

/// Inspect one thread without counting as activity
async fn get_thread(
    State(state): State<Arc<ApiState>>,
    Path(raw): Path<String>,
) -> Result<Json<ThreadDetailResponse>, ApiError> {
    let not_found = || ApiError::from(crate::Error::NotFound(format!("thread {raw}")));

    let id = ThreadId::parse(&raw).ok_or_else(not_found)?;
    let record = state.store.peek(&id).ok_or_else(not_found)?;

    let messages = record.messages();
    Ok(Json(ThreadDetailResponse {
        id: record.id,
        created_at: record.created_at,
        last_active_at: record.last_active_at,
        message_count: messages.len(),
        messages,
    }))
}

/// Delete a thread; deleting an unknown thread is not an error
async fn delete_thread(State(state): State<Arc<ApiState>>, Path(id): Path<String>) -> StatusCode {
    if let Some(id) = ThreadId::parse(&id) {
        if state.store.delete(&id) {
            tracing::info!(thread_id = %id, "thread deleted via admin api");
        }
    }
    StatusCode::NO_CONTENT
}

/// Evict expired threads now instead of waiting for the reaper
async fn sweep(State(state): State<Arc<ApiState>>) -> Json<SweepResponse> {
    let evicted = state.store.purge_expired();
    tracing::info!(evicted, "manual sweep");
    Json(SweepResponse {
        evicted,
        remaining: state.store.resident_count(),
    })
}

/// Build thread admin router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/", get(list_threads))
        .route("/sweep", post(sweep))
        .route("/{id}", get(get_thread).delete(delete_thread))
        .layer(middleware::from_fn_with_state(state.clone(), require_api_key))
        .with_state(state)
}

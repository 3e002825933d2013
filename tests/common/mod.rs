//! Shared test utilities

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
};
use crediflex_gateway::api::ApiServerBuilder;
use crediflex_gateway::{
    ContextAssembler, ManualClock, ModelClient, RequestCoordinator, ThreadPolicy, ThreadStore,
    UpstreamError,
};
use tower::ServiceExt;

pub const TEST_API_KEY: &str = "test-api-key";

/// Replies from a fixed script, then "ok"; records every payload
#[derive(Default)]
pub struct ScriptedModel {
    replies: Mutex<VecDeque<String>>,
    payloads: Mutex<Vec<String>>,
}

impl ScriptedModel {
    pub fn new(replies: &[&str]) -> Self {
        Self {
            replies: Mutex::new(replies.iter().map(ToString::to_string).collect()),
            payloads: Mutex::default(),
        }
    }

    pub fn payloads(&self) -> Vec<String> {
        self.payloads.lock().unwrap().clone()
    }

    pub fn last_payload(&self) -> String {
        self.payloads().pop().expect("model was never called")
    }
}

#[async_trait]
impl ModelClient for ScriptedModel {
    fn model_id(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, payload: &str, _timeout: Duration) -> Result<String, UpstreamError> {
        self.payloads.lock().unwrap().push(payload.to_string());
        Ok(self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| "ok".to_string()))
    }
}

/// Always unavailable
pub struct FailingModel;

#[async_trait]
impl ModelClient for FailingModel {
    fn model_id(&self) -> &str {
        "failing"
    }

    async fn complete(&self, _payload: &str, _timeout: Duration) -> Result<String, UpstreamError> {
        Err(UpstreamError::Unavailable("503 Service Unavailable".to_string()))
    }
}

/// Answers after a fixed delay
pub struct SlowModel(pub Duration);

#[async_trait]
impl ModelClient for SlowModel {
    fn model_id(&self) -> &str {
        "slow"
    }

    async fn complete(&self, _payload: &str, _timeout: Duration) -> Result<String, UpstreamError> {
        tokio::time::sleep(self.0).await;
        Ok("tarde".to_string())
    }
}

/// Store on a manual clock with the default policy
pub fn test_store() -> (Arc<ThreadStore>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::default());
    let store = Arc::new(ThreadStore::new(ThreadPolicy::default()).with_clock(clock.clone()));
    (store, clock)
}

pub fn coordinator(store: Arc<ThreadStore>, model: Arc<dyn ModelClient>) -> RequestCoordinator {
    RequestCoordinator::new(store, ContextAssembler::default(), model)
}

/// Router with every route, an admin key and a manual clock
pub struct TestApp {
    pub router: Router,
    pub store: Arc<ThreadStore>,
    pub clock: Arc<ManualClock>,
}

pub fn build_test_app(model: Arc<dyn ModelClient>) -> TestApp {
    let (store, clock) = test_store();
    let server = ApiServerBuilder::new(coordinator(store.clone(), model))
        .api_key(Some(TEST_API_KEY.to_string()))
        .build();

    TestApp {
        router: server.router(),
        store,
        clock,
    }
}

/// Send a request and decode the JSON body (`Null` when empty)
pub async fn send(router: &Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if body.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&body).unwrap()
    };
    (status, json)
}

pub fn post_json(uri: &str, body: &serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn admin(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("Authorization", format!("Bearer {TEST_API_KEY}"))
        .body(Body::empty())
        .unwrap()
}

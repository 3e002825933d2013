//! One chat turn, end to end
//!
//! `Resolving → Assembling → Invoking → Recording → Done`, with
//! `Failed(kind)` reachable from `Invoking`. Every well-formed request gets a
//! response and a thread identity back; only an empty query is rejected.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::context::ContextAssembler;
use crate::model::{DEFAULT_TIMEOUT, ModelClient, UpstreamError};
use crate::thread::{MessageEntry, Resolution, ThreadId, ThreadNotFound, ThreadStore};

/// Reply sent when the model cannot answer
pub const DEFAULT_FALLBACK_RESPONSE: &str = "Lo siento, en este momento no puedo procesar tu \
     consulta. Por favor intenta de nuevo en unos minutos.";

/// Per-turn settings
#[derive(Debug, Clone)]
pub struct TurnConfig {
    /// Upper bound on the model call
    pub timeout: Duration,
    /// Text returned in place of a model answer on upstream failure
    pub fallback_response: String,
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            fallback_response: DEFAULT_FALLBACK_RESPONSE.to_string(),
        }
    }
}

/// Inbound turn
#[derive(Debug, Clone, Default)]
pub struct TurnRequest {
    pub query: String,
    /// Identity returned by a previous turn, if any
    pub thread_id: Option<String>,
    /// Opaque text rendered into the business-context section
    pub business_context: Option<String>,
}

impl TurnRequest {
    #[must_use]
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_thread_id(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }

    #[must_use]
    pub fn with_business_context(mut self, context: impl Into<String>) -> Self {
        self.business_context = Some(context.into());
        self
    }
}

/// How the turn ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnStatus {
    /// Model answered and the pair was recorded
    Completed,
    /// Model failed; the fallback was returned and history is unchanged
    Degraded(UpstreamError),
}

/// Outbound turn
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub response: String,
    /// Always present; differs from the request's when a new thread was started
    pub thread_id: ThreadId,
    pub resolution: Resolution,
    pub status: TurnStatus,
}

impl TurnOutcome {
    #[must_use]
    pub const fn is_degraded(&self) -> bool {
        matches!(self.status, TurnStatus::Degraded(_))
    }
}

/// Turn lifecycle, logged at debug
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnPhase {
    Resolving,
    Assembling,
    Invoking,
    Recording,
    Done,
    Failed,
}

impl fmt::Display for TurnPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Resolving => "resolving",
            Self::Assembling => "assembling",
            Self::Invoking => "invoking",
            Self::Recording => "recording",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Orchestrates chat turns over a shared [`ThreadStore`]
#[derive(Clone)]
pub struct RequestCoordinator {
    store: Arc<ThreadStore>,
    assembler: ContextAssembler,
    model: Arc<dyn ModelClient>,
    config: TurnConfig,
}

impl fmt::Debug for RequestCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestCoordinator")
            .field("store", &self.store)
            .field("assembler", &self.assembler)
            .field("model", &self.model.model_id())
            .field("config", &self.config)
            .finish()
    }
}

impl RequestCoordinator {
    #[must_use]
    pub fn new(
        store: Arc<ThreadStore>,
        assembler: ContextAssembler,
        model: Arc<dyn ModelClient>,
    ) -> Self {
        Self {
            store,
            assembler,
            model,
            config: TurnConfig::default(),
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: TurnConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub const fn store(&self) -> &Arc<ThreadStore> {
        &self.store
    }

    #[must_use]
    pub fn model_id(&self) -> &str {
        self.model.model_id()
    }

    /// Run one turn
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidInput`] if the query is empty. Upstream
    /// failures come back as [`TurnStatus::Degraded`], not as errors.
    pub async fn handle_turn(&self, request: TurnRequest) -> crate::Result<TurnOutcome> {
        let query = request.query.trim();
        if query.is_empty() {
            return Err(crate::Error::InvalidInput("query is required".to_string()));
        }

        trace_phase(TurnPhase::Resolving, None);
        let resolved = self.store.get_or_create(request.thread_id.as_deref());
        let thread_id = resolved.id;

        trace_phase(TurnPhase::Assembling, Some(&thread_id));
        let history = resolved.record.messages();
        let payload = self.assembler.render(&history, request.business_context.as_deref(), query);

        trace_phase(TurnPhase::Invoking, Some(&thread_id));
        let reply = match self.invoke(&payload).await {
            Ok(reply) => reply,
            Err(e) => {
                trace_phase(TurnPhase::Failed, Some(&thread_id));
                tracing::warn!(
                    thread_id = %thread_id,
                    error = %e,
                    "model call failed, returning fallback"
                );
                return Ok(TurnOutcome {
                    response: self.config.fallback_response.clone(),
                    thread_id,
                    resolution: resolved.resolution,
                    status: TurnStatus::Degraded(e),
                });
            }
        };

        trace_phase(TurnPhase::Recording, Some(&thread_id));
        let pair = vec![
            MessageEntry::user(query),
            MessageEntry::assistant(reply.clone()),
        ];
        let (thread_id, resolution) = match self.store.append(&thread_id, pair.clone()) {
            Ok(_) => (thread_id, resolved.resolution),
            Err(ThreadNotFound(lost)) => {
                (self.record_in_new_thread(lost, pair), Resolution::Restarted)
            }
        };

        trace_phase(TurnPhase::Done, Some(&thread_id));
        Ok(TurnOutcome {
            response: reply,
            thread_id,
            resolution,
            status: TurnStatus::Completed,
        })
    }

    async fn invoke(&self, payload: &str) -> Result<String, UpstreamError> {
        let timeout = self.config.timeout;
        match tokio::time::timeout(timeout, self.model.complete(payload, timeout)).await {
            Ok(result) => result,
            Err(_) => Err(UpstreamError::Timeout(timeout)),
        }
    }

    /// The thread expired or was deleted while the model was answering
    fn record_in_new_thread(&self, lost: ThreadId, pair: Vec<MessageEntry>) -> ThreadId {
        let fresh = self.store.create().id;
        tracing::info!(
            lost = %lost,
            thread_id = %fresh,
            "thread vanished mid-turn, continuing in new thread"
        );

        if let Err(e) = self.store.append(&fresh, pair) {
            tracing::warn!(error = %e, "failed to record turn in replacement thread");
        }
        fresh
    }
}

fn trace_phase(phase: TurnPhase, thread_id: Option<&ThreadId>) {
    match thread_id {
        Some(id) => tracing::debug!(thread_id = %id, %phase, "turn phase"),
        None => tracing::debug!(%phase, "turn phase"),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::TimeDelta;

    use super::*;
    use crate::clock::ManualClock;
    use crate::thread::ThreadPolicy;

    /// Echoes a numbered reply and records every payload it saw
    #[derive(Default)]
    struct RecordingModel {
        payloads: Mutex<Vec<String>>,
    }

    impl RecordingModel {
        fn payloads(&self) -> Vec<String> {
            self.payloads.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ModelClient for RecordingModel {
        fn model_id(&self) -> &str {
            "recording"
        }

        async fn complete(
            &self,
            payload: &str,
            _timeout: Duration,
        ) -> Result<String, UpstreamError> {
            let mut payloads = self.payloads.lock().unwrap();
            payloads.push(payload.to_string());
            Ok(format!("respuesta {}", payloads.len()))
        }
    }

    struct FailingModel;

    #[async_trait]
    impl ModelClient for FailingModel {
        fn model_id(&self) -> &str {
            "failing"
        }

        async fn complete(
            &self,
            _payload: &str,
            _timeout: Duration,
        ) -> Result<String, UpstreamError> {
            Err(UpstreamError::Unavailable("connection refused".to_string()))
        }
    }

    struct HangingModel;

    #[async_trait]
    impl ModelClient for HangingModel {
        fn model_id(&self) -> &str {
            "hanging"
        }

        async fn complete(
            &self,
            _payload: &str,
            _timeout: Duration,
        ) -> Result<String, UpstreamError> {
            futures::future::pending().await
        }
    }

    /// Deletes the thread while "thinking", simulating expiry mid-turn
    struct VanishingModel {
        store: Arc<ThreadStore>,
    }

    #[async_trait]
    impl ModelClient for VanishingModel {
        fn model_id(&self) -> &str {
            "vanishing"
        }

        async fn complete(
            &self,
            _payload: &str,
            _timeout: Duration,
        ) -> Result<String, UpstreamError> {
            for summary in self.store.list() {
                self.store.delete(&summary.id);
            }
            Ok("respuesta tardía".to_string())
        }
    }

    fn setup() -> (RequestCoordinator, Arc<RecordingModel>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let store = Arc::new(ThreadStore::new(ThreadPolicy::default()).with_clock(clock.clone()));
        let model = Arc::new(RecordingModel::default());
        let coordinator =
            RequestCoordinator::new(store, ContextAssembler::default(), model.clone());
        (coordinator, model, clock)
    }

    #[tokio::test]
    async fn empty_query_is_rejected() {
        let (coordinator, model, _) = setup();
        let err = coordinator
            .handle_turn(TurnRequest::new("   "))
            .await
            .unwrap_err();
        assert!(matches!(err, crate::Error::InvalidInput(_)));
        assert!(model.payloads().is_empty());
        assert_eq!(coordinator.store().resident_count(), 0);
    }

    #[tokio::test]
    async fn conversation_continues_then_restarts_after_expiry() {
        let (coordinator, model, clock) = setup();

        let t1 = coordinator
            .handle_turn(TurnRequest::new("clientes activos?"))
            .await
            .unwrap();
        assert_eq!(t1.status, TurnStatus::Completed);
        assert_eq!(t1.resolution, Resolution::Started);

        let t2 = coordinator
            .handle_turn(
                TurnRequest::new("Sí, muéstrame detalles")
                    .with_thread_id(t1.thread_id.to_string()),
            )
            .await
            .unwrap();
        assert_eq!(t2.thread_id, t1.thread_id);
        assert_eq!(t2.resolution, Resolution::Resumed);

        let payloads = model.payloads();
        assert!(!payloads[0].contains("<conversation-history>"));
        assert!(payloads[1].contains(
            "<user>\nclientes activos?\n</user>\n<assistant>\nrespuesta 1\n</assistant>"
        ));

        clock.advance(TimeDelta::hours(25));
        let t3 = coordinator
            .handle_turn(TurnRequest::new("¿y ahora?").with_thread_id(t1.thread_id.to_string()))
            .await
            .unwrap();
        assert_ne!(t3.thread_id, t1.thread_id);
        assert_eq!(t3.resolution, Resolution::Restarted);
        assert!(!model.payloads()[2].contains("<conversation-history>"));
    }

    #[tokio::test]
    async fn upstream_failure_returns_fallback_and_leaves_history() {
        let clock = Arc::new(ManualClock::default());
        let store = Arc::new(ThreadStore::new(ThreadPolicy::default()).with_clock(clock));
        let id = store.create().id;
        store
            .append(&id, vec![MessageEntry::user("hola"), MessageEntry::assistant("¡hola!")])
            .unwrap();

        let coordinator = RequestCoordinator::new(
            store.clone(),
            ContextAssembler::default(),
            Arc::new(FailingModel),
        );
        let outcome = coordinator
            .handle_turn(TurnRequest::new("otra pregunta").with_thread_id(id.to_string()))
            .await
            .unwrap();

        assert!(outcome.is_degraded());
        assert_eq!(outcome.response, DEFAULT_FALLBACK_RESPONSE);
        assert_eq!(outcome.thread_id, id);
        assert_eq!(store.peek(&id).unwrap().history.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_model_times_out() {
        let store = Arc::new(ThreadStore::new(ThreadPolicy::default()));
        let coordinator = RequestCoordinator::new(
            store.clone(),
            ContextAssembler::default(),
            Arc::new(HangingModel),
        )
        .with_config(TurnConfig {
            timeout: Duration::from_secs(60),
            fallback_response: "sin respuesta".to_string(),
        });

        let outcome = coordinator
            .handle_turn(TurnRequest::new("hola"))
            .await
            .unwrap();
        assert_eq!(
            outcome.status,
            TurnStatus::Degraded(UpstreamError::Timeout(Duration::from_secs(60)))
        );
        assert_eq!(outcome.response, "sin respuesta");
        assert!(store.peek(&outcome.thread_id).unwrap().history.is_empty());
    }

    #[tokio::test]
    async fn thread_lost_mid_turn_moves_to_new_thread() {
        let store = Arc::new(ThreadStore::new(ThreadPolicy::default()));
        let original = store.create().id;
        let model = Arc::new(VanishingModel {
            store: store.clone(),
        });
        let coordinator =
            RequestCoordinator::new(store.clone(), ContextAssembler::default(), model);

        let outcome = coordinator
            .handle_turn(TurnRequest::new("hola").with_thread_id(original.to_string()))
            .await
            .unwrap();

        assert_eq!(outcome.status, TurnStatus::Completed);
        assert_eq!(outcome.resolution, Resolution::Restarted);
        assert_ne!(outcome.thread_id, original);

        let messages = store.peek(&outcome.thread_id).unwrap().messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content, "hola");
        assert_eq!(messages[1].content, "respuesta tardía");
    }

    #[tokio::test]
    async fn business_context_reaches_payload() {
        let (coordinator, model, _) = setup();
        coordinator
            .handle_turn(
                TurnRequest::new("resumen")
                    .with_business_context("ACTIVOS (1):\n  • Urban Supply Co"),
            )
            .await
            .unwrap();

        let payload = &model.payloads()[0];
        assert!(payload.contains(
            "<business-context>\nACTIVOS (1):\n  • Urban Supply Co\n</business-context>"
        ));
        assert!(payload.ends_with("<current-query>\nresumen\n</current-query>"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_turns_record_every_pair() {
        let policy = ThreadPolicy {
            max_retained: 200,
            ..ThreadPolicy::default()
        };
        let store = Arc::new(ThreadStore::new(policy));
        let id = store.create().id;
        let coordinator = RequestCoordinator::new(
            store.clone(),
            ContextAssembler::default(),
            Arc::new(RecordingModel::default()),
        );

        let tasks: Vec<_> = (0..25)
            .map(|n| {
                let coordinator = coordinator.clone();
                tokio::spawn(async move {
                    coordinator
                        .handle_turn(
                            TurnRequest::new(format!("pregunta {n}"))
                                .with_thread_id(id.to_string()),
                        )
                        .await
                        .unwrap()
                })
            })
            .collect();
        for task in tasks {
            assert_eq!(task.await.unwrap().thread_id, id);
        }

        let messages = store.peek(&id).unwrap().messages();
        assert_eq!(messages.len(), 50);
        for pair in messages.chunks(2) {
            assert_eq!(pair[0].role, crate::thread::MessageRole::User);
            assert_eq!(pair[1].role, crate::thread::MessageRole::Assistant);
        }
    }
}

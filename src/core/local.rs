//! Adapter that drives an in-process or same-host [`LocalEngine`].

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::api::ChatMessage;
use crate::core::backend::{ChunkSink, GenerateError, GenerationBackend, StreamEnd};
use crate::core::engine::{EngineError, LoadProgress, LocalEngine};
use crate::core::engine_state::{EngineStateHandle, StateUpdate};
use crate::core::message::{ROLE_ASSISTANT, ROLE_MODEL};
use crate::core::mood::{self, TokenClock};

const UNLOADED: u8 = 0;
const LOADING: u8 = 1;
const LOADED: u8 = 2;

/// Progress in percent from an engine fraction, rounded to whole percent.
fn progress_percent(fraction: f64) -> f64 {
    (fraction * 100.0).round()
}

fn map_engine_error(err: EngineError) -> GenerateError {
    match err {
        EngineError::Request(_) | EngineError::Status { .. } | EngineError::Api(_) => {
            GenerateError::Network(err.to_string())
        }
        EngineError::Malformed(msg) => GenerateError::MalformedStream(msg),
        EngineError::ModelUnavailable { .. } => GenerateError::Initialization(err.to_string()),
    }
}

/// Translates backend roles to the vocabulary local engines expect.
fn to_engine_messages(history: &[ChatMessage]) -> Vec<ChatMessage> {
    history
        .iter()
        .map(|message| {
            let role = if message.role == ROLE_MODEL {
                ROLE_ASSISTANT
            } else {
                message.role.as_str()
            };
            ChatMessage::new(role, message.content.clone())
        })
        .collect()
}

pub struct LocalAdapter {
    engine: Arc<dyn LocalEngine>,
    state: EngineStateHandle,
    phase: AtomicU8,
}

impl LocalAdapter {
    pub fn new(engine: Arc<dyn LocalEngine>, state: EngineStateHandle) -> Self {
        Self {
            engine,
            state,
            phase: AtomicU8::new(UNLOADED),
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.phase.load(Ordering::SeqCst) == LOADED
    }
}

#[async_trait]
impl GenerationBackend for LocalAdapter {
    async fn initialize(&self) -> Result<(), GenerateError> {
        if self.state.snapshot().is_loading {
            return Ok(());
        }
        if self
            .phase
            .compare_exchange(UNLOADED, LOADING, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(());
        }

        self.state.update(
            StateUpdate::new()
                .loading(true)
                .clear_error()
                .status_text("Initializing..."),
        );

        let state = self.state.clone();
        let on_progress = move |report: LoadProgress| {
            state.update(
                StateUpdate::new()
                    .progress(progress_percent(report.fraction))
                    .status_text(report.stage),
            );
        };

        match self.engine.load(&on_progress).await {
            Ok(()) => {
                self.phase.store(LOADED, Ordering::SeqCst);
                self.state.update(
                    StateUpdate::new()
                        .loading(false)
                        .ready(true)
                        .progress(100.0)
                        .status_text("Online"),
                );
                debug!("local engine online");
                Ok(())
            }
            Err(err) => {
                self.phase.store(UNLOADED, Ordering::SeqCst);
                let message = err.to_string();
                warn!(error = %message, "local engine failed to load");
                self.state.update(
                    StateUpdate::new()
                        .loading(false)
                        .error(message.clone())
                        .status_text("Initialization Failed"),
                );
                Err(GenerateError::Initialization(message))
            }
        }
    }

    async fn generate_stream(
        &self,
        history: &[ChatMessage],
        on_chunk: &mut ChunkSink<'_>,
        cancel: &CancellationToken,
    ) -> Result<StreamEnd, GenerateError> {
        if !self.is_loaded() {
            return Err(GenerateError::NotInitialized);
        }

        self.state.update(
            StateUpdate::new().mood(mood::LOCAL_START_EXCITEMENT, mood::LOCAL_START_STRESS),
        );
        let cooldown = || {
            self.state.update(
                StateUpdate::new().mood(mood::COOLDOWN_EXCITEMENT, mood::COOLDOWN_STRESS),
            )
        };

        let open = self.engine.stream_chat(to_engine_messages(history));
        let mut tokens = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                cooldown();
                return Ok(StreamEnd::Cancelled);
            }
            opened = open => opened.map_err(map_engine_error)?,
        };

        let mut clock = TokenClock::start();
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("local generation cancelled");
                    cooldown();
                    return Ok(StreamEnd::Cancelled);
                }
                next = tokens.next() => next,
            };

            match next {
                Some(Ok(fragment)) => {
                    if fragment.is_empty() {
                        continue;
                    }
                    let delta = clock.tick();
                    self.state.update(
                        StateUpdate::new()
                            .mood(mood::local_excitement(delta), mood::local_stress(delta)),
                    );
                    on_chunk(&fragment);
                }
                Some(Err(err)) => return Err(map_engine_error(err)),
                None => break,
            }
        }

        cooldown();
        Ok(StreamEnd::Completed)
    }

    fn is_ready(&self) -> bool {
        self.is_loaded()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::engine_state::{EngineState, EngineStatus};
    use crate::utils::test_utils::{record_states, ScriptedEngine};
    use std::time::Duration;

    fn adapter(engine: ScriptedEngine) -> (Arc<ScriptedEngine>, LocalAdapter, EngineStateHandle) {
        let engine = Arc::new(engine);
        let state = EngineStateHandle::default();
        let adapter = LocalAdapter::new(engine.clone(), state.clone());
        (engine, adapter, state)
    }

    fn moods(states: &[EngineState]) -> Vec<(f64, f64)> {
        states.iter().map(|s| (s.excitement, s.stress)).collect()
    }

    #[tokio::test]
    async fn initialize_publishes_progress_then_online() {
        let (_, adapter, state) =
            adapter(ScriptedEngine::new().with_progress(&[(0.0, "Fetching"), (0.456, "Compiling")]));
        let (seen, _sub) = record_states(&state);

        adapter.initialize().await.unwrap();

        let seen = seen.lock().unwrap();
        let texts: Vec<&str> = seen.iter().map(|s| s.status_text.as_str()).collect();
        assert_eq!(texts, vec!["Idle", "Initializing...", "Fetching", "Compiling", "Online"]);
        assert!(seen[1].is_loading);
        assert_eq!(seen[3].progress, 46.0);
        let last = seen.last().unwrap();
        assert_eq!(last.status(), EngineStatus::Ready);
        assert_eq!(last.progress, 100.0);
        assert!(adapter.is_ready());
    }

    #[tokio::test]
    async fn initialize_is_a_no_op_once_loaded() {
        let (engine, adapter, _) = adapter(ScriptedEngine::new());
        adapter.initialize().await.unwrap();
        adapter.initialize().await.unwrap();
        assert_eq!(engine.load_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_initialize_loads_once() {
        let (engine, adapter, _) =
            adapter(ScriptedEngine::new().with_load_delay(Duration::from_millis(50)));
        let (a, b) = tokio::join!(adapter.initialize(), adapter.initialize());
        assert!(a.is_ok() && b.is_ok());
        assert_eq!(engine.load_count(), 1);
    }

    #[tokio::test]
    async fn failed_initialize_reports_and_allows_retry() {
        let (engine, adapter, state) = adapter(
            ScriptedEngine::new().failing_load(EngineError::Request("connection refused".into())),
        );

        let err = adapter.initialize().await.unwrap_err();
        assert_eq!(
            err,
            GenerateError::Initialization(
                "Local engine request failed: connection refused".into()
            )
        );
        let snapshot = state.snapshot();
        assert_eq!(snapshot.status_text, "Initialization Failed");
        assert!(!snapshot.is_ready);
        assert!(!snapshot.is_loading);
        assert!(snapshot.error.is_some());

        let _ = adapter.initialize().await;
        assert_eq!(engine.load_count(), 2);
    }

    #[tokio::test]
    async fn generate_before_initialize_fails() {
        let (_, adapter, _) = adapter(ScriptedEngine::new().with_tokens(&[(0, "x")]));
        let mut sink = |_: &str| {};
        let err = adapter
            .generate_stream(&[], &mut sink, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err, GenerateError::NotInitialized);
    }

    #[tokio::test(start_paused = true)]
    async fn generate_publishes_mood_per_fragment() {
        let (engine, adapter, state) = adapter(ScriptedEngine::new().with_tokens(&[
            (10, "Hel"),
            (0, ""),
            (300, "lo"),
        ]));
        adapter.initialize().await.unwrap();
        let (seen, _sub) = record_states(&state);

        let history = vec![
            ChatMessage::new("user", "hi"),
            ChatMessage::new("model", "hello"),
            ChatMessage::new("user", "again"),
        ];
        let mut chunks = Vec::new();
        let mut sink = |chunk: &str| chunks.push(chunk.to_string());
        let end = adapter
            .generate_stream(&history, &mut sink, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(end, StreamEnd::Completed);
        assert_eq!(chunks, vec!["Hel", "lo"]);
        let seen = seen.lock().unwrap();
        assert_eq!(
            moods(&seen[1..]),
            vec![(0.8, 0.2), (1.0, 0.1), (0.3, 0.7), (0.1, 0.0)]
        );

        let sent = &engine.seen_messages()[0];
        let roles: Vec<&str> = sent.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["user", "assistant", "user"]);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_abandons_a_stalled_stream() {
        let (_, adapter, state) =
            adapter(ScriptedEngine::new().with_tokens(&[(5, "partial")]).stalling());
        adapter.initialize().await.unwrap();

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            trigger.cancel();
        });

        let mut chunks = Vec::new();
        let mut sink = |chunk: &str| chunks.push(chunk.to_string());
        let end = adapter
            .generate_stream(&[ChatMessage::new("user", "go")], &mut sink, &cancel)
            .await
            .unwrap();

        assert_eq!(end, StreamEnd::Cancelled);
        assert_eq!(chunks, vec!["partial"]);
        assert_eq!(state.snapshot().excitement, 0.1);
    }
}

//! Adapter for the remote RAG service and its dual-loop relay.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::api::{BackendChatRequest, ChatMessage, IngestResponse};
use crate::core::api_error::summarize_api_error;
use crate::core::backend::{fold_history, ChunkSink, GenerateError, GenerationBackend, StreamEnd};
use crate::core::engine_state::{EngineStateHandle, StateUpdate};
use crate::core::mood::{self, TokenClock};
use crate::utils::url::{endpoint_url, root_url};
use crate::utils::utf8::Utf8StreamDecoder;

pub const REMOTE_FAILURE_TEXT: &str = "Remote Connection Failed";

/// Which chat endpoint generation requests go to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RemoteRoute {
    /// The RAG service directly.
    #[default]
    Chat,
    /// The relay that runs a draft/critique loop before answering.
    DualLoop,
}

impl RemoteRoute {
    pub fn path(self) -> &'static str {
        match self {
            RemoteRoute::Chat => "/api/chat",
            RemoteRoute::DualLoop => "/api/chat/dual-loop",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RemoteRoute::Chat => "chat",
            RemoteRoute::DualLoop => "dual-loop",
        }
    }
}

impl TryFrom<&str> for RemoteRoute {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value.trim().to_ascii_lowercase().as_str() {
            "chat" => Ok(RemoteRoute::Chat),
            "dual-loop" | "dual_loop" | "dualloop" => Ok(RemoteRoute::DualLoop),
            other => Err(format!(
                "Unknown remote route: {other} (expected 'chat' or 'dual-loop')"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RemoteSettings {
    pub base_url: String,
    pub route: RemoteRoute,
    pub turbo: bool,
    pub use_mlx: bool,
    pub health_timeout: Duration,
}

impl Default for RemoteSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            route: RemoteRoute::Chat,
            turbo: false,
            use_mlx: true,
            health_timeout: Duration::from_millis(2000),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RemoteAdapter {
    client: reqwest::Client,
    state: EngineStateHandle,
    settings: RemoteSettings,
}

impl RemoteAdapter {
    pub fn new(client: reqwest::Client, state: EngineStateHandle, settings: RemoteSettings) -> Self {
        Self {
            client,
            state,
            settings,
        }
    }

    pub fn settings(&self) -> &RemoteSettings {
        &self.settings
    }

    /// Probes the service root and records reachability. Never fails.
    pub async fn check_health(&self) -> bool {
        let result = self
            .client
            .get(root_url(&self.settings.base_url))
            .timeout(self.settings.health_timeout)
            .send()
            .await;
        let connected = match result {
            Ok(response) => response.status().is_success(),
            Err(err) => {
                debug!(error = %err, "remote health probe failed");
                false
            }
        };
        self.state.update(StateUpdate::new().remote_connected(connected));
        connected
    }

    /// Asks the service to (re)index its document folder.
    pub async fn trigger_ingest(&self) -> Option<u64> {
        self.state.update(StateUpdate::new().status_text("Indexing Documents..."));

        match self.request_ingest().await {
            Ok(chunks) => {
                self.state.update(
                    StateUpdate::new()
                        .status_text(format!("Indexed {chunks} chunks"))
                        .remote_connected(true),
                );
                Some(chunks)
            }
            Err(message) => {
                warn!(error = %message, "document ingestion failed");
                self.state.update(StateUpdate::new().error("Ingestion Failed"));
                None
            }
        }
    }

    async fn request_ingest(&self) -> Result<u64, String> {
        let response = self
            .client
            .post(endpoint_url(&self.settings.base_url, "/api/ingest"))
            .send()
            .await
            .map_err(|err| err.to_string())?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(summarize_api_error(status.as_u16(), &body));
        }
        let body: IngestResponse = response.json().await.map_err(|err| err.to_string())?;
        Ok(body.chunks)
    }

    fn fail(&self, message: String) -> GenerateError {
        warn!(error = %message, "remote generation failed");
        self.state.update(
            StateUpdate::new()
                .error(REMOTE_FAILURE_TEXT)
                .stress(mood::FAILURE_STRESS),
        );
        GenerateError::Network(message)
    }

    fn cool_down(&self) {
        self.state.update(
            StateUpdate::new().mood(mood::COOLDOWN_EXCITEMENT, mood::COOLDOWN_STRESS),
        );
    }
}

#[async_trait]
impl GenerationBackend for RemoteAdapter {
    async fn generate_stream(
        &self,
        history: &[ChatMessage],
        on_chunk: &mut ChunkSink<'_>,
        cancel: &CancellationToken,
    ) -> Result<StreamEnd, GenerateError> {
        self.state.update(
            StateUpdate::new()
                .mood(mood::REMOTE_START_EXCITEMENT, mood::REMOTE_START_STRESS)
                .status_text("Querying remote...")
                .clear_error(),
        );

        let request = BackendChatRequest {
            message: fold_history(history),
            turbo: self.settings.turbo,
            use_mlx: self.settings.use_mlx,
        };
        let url = endpoint_url(&self.settings.base_url, self.settings.route.path());
        debug!(%url, "opening remote stream");

        let send = self.client.post(&url).json(&request).send();
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                self.cool_down();
                return Ok(StreamEnd::Cancelled);
            }
            response = send => response.map_err(|err| self.fail(err.to_string()))?,
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(self.fail(format!(
                "Remote returned {}",
                summarize_api_error(status.as_u16(), &body)
            )));
        }

        let mut bytes = response.bytes_stream();
        let mut decoder = Utf8StreamDecoder::new();
        let mut clock = TokenClock::start();
        let mut emit = |text: String, clock: &mut TokenClock| {
            if text.is_empty() {
                return;
            }
            let delta = clock.tick();
            self.state.update(StateUpdate::new().excitement(mood::remote_excitement(delta)));
            on_chunk(&text);
        };

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("remote generation cancelled");
                    self.cool_down();
                    return Ok(StreamEnd::Cancelled);
                }
                next = bytes.next() => next,
            };
            match next {
                Some(Ok(chunk)) => emit(decoder.decode(&chunk), &mut clock),
                Some(Err(err)) => return Err(self.fail(err.to_string())),
                None => break,
            }
        }
        emit(decoder.finish(), &mut clock);

        self.state.update(
            StateUpdate::new()
                .mood(mood::COOLDOWN_EXCITEMENT, mood::COOLDOWN_STRESS)
                .status_text("Remote complete"),
        );
        Ok(StreamEnd::Completed)
    }

    /// The remote side has no load phase; readiness is reachability.
    fn is_ready(&self) -> bool {
        self.state.snapshot().remote_connected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::engine_state::EngineStatus;
    use crate::utils::test_utils::{record_states, test_client, MockResponse, MockServer};

    fn adapter_for(base_url: String, route: RemoteRoute) -> (RemoteAdapter, EngineStateHandle) {
        let state = EngineStateHandle::default();
        let settings = RemoteSettings {
            base_url,
            route,
            ..RemoteSettings::default()
        };
        (
            RemoteAdapter::new(test_client(), state.clone(), settings),
            state,
        )
    }

    async fn collect(
        adapter: &RemoteAdapter,
        history: &[ChatMessage],
    ) -> (Result<StreamEnd, GenerateError>, String) {
        let mut text = String::new();
        let mut sink = |chunk: &str| text.push_str(chunk);
        let result = adapter
            .generate_stream(history, &mut sink, &CancellationToken::new())
            .await;
        (result, text)
    }

    #[tokio::test]
    async fn health_check_tracks_reachability() {
        let server = MockServer::start(vec![MockResponse::json(200, r#"{"status":"ok"}"#)]).await;
        let (adapter, state) = adapter_for(server.base_url(), RemoteRoute::Chat);
        assert!(adapter.check_health().await);
        assert!(state.snapshot().remote_connected);
        assert_eq!(server.requests().await[0].request_line, "GET / HTTP/1.1");

        let (offline, offline_state) =
            adapter_for(MockServer::unreachable_url().await, RemoteRoute::Chat);
        assert!(!offline.check_health().await);
        assert!(!offline_state.snapshot().remote_connected);
    }

    #[tokio::test]
    async fn health_check_treats_error_status_as_offline() {
        let server = MockServer::start(vec![MockResponse::text(503, "starting")]).await;
        let (adapter, state) = adapter_for(server.base_url(), RemoteRoute::Chat);
        assert!(!adapter.check_health().await);
        assert!(!state.snapshot().remote_connected);
    }

    #[tokio::test]
    async fn generate_posts_folded_history_and_streams_text() {
        let server = MockServer::start(vec![MockResponse::chunked(
            200,
            &[b"__TRACE_ID__:abc\n", b"Retrieval ", b"works"],
        )
        .at("/api/chat")])
        .await;
        let (adapter, state) = adapter_for(server.base_url(), RemoteRoute::Chat);
        let (seen, _sub) = record_states(&state);

        let history = vec![
            ChatMessage::new("user", "What is RAG?"),
            ChatMessage::new("model", "Retrieval augmented generation."),
            ChatMessage::new("user", "Does it work?"),
        ];
        let (result, text) = collect(&adapter, &history).await;

        assert_eq!(result.unwrap(), StreamEnd::Completed);
        assert_eq!(text, "__TRACE_ID__:abc\nRetrieval works");

        let request = &server.requests().await[0];
        assert_eq!(request.request_line, "POST /api/chat HTTP/1.1");
        let body = request.json();
        assert_eq!(body["turbo"], false);
        assert_eq!(body["use_mlx"], true);
        assert_eq!(body["message"], fold_history(&history).as_str());

        let seen = seen.lock().unwrap();
        assert_eq!(seen[1].status_text, "Querying remote...");
        assert_eq!((seen[1].excitement, seen[1].stress), (0.5, 0.1));
        for state in &seen[2..seen.len() - 1] {
            assert!((0.4..=1.0).contains(&state.excitement));
        }
        let last = seen.last().unwrap();
        assert_eq!(last.status_text, "Remote complete");
        assert_eq!((last.excitement, last.stress), (0.1, 0.0));
    }

    #[tokio::test]
    async fn split_multibyte_characters_are_joined() {
        let snowman = "☃".as_bytes();
        let server = MockServer::start(vec![MockResponse::chunked(
            200,
            &[b"a", &snowman[..1], &snowman[1..], b"b"],
        )])
        .await;
        let (adapter, _) = adapter_for(server.base_url(), RemoteRoute::Chat);
        let (result, text) = collect(&adapter, &[ChatMessage::new("user", "x")]).await;
        assert!(result.is_ok());
        assert_eq!(text, "a☃b");
    }

    #[tokio::test]
    async fn dual_loop_route_and_relay_errors() {
        let server = MockServer::start(vec![MockResponse::json(
            502,
            r#"{"error":"Backend error: 500","details":"model crashed"}"#,
        )
        .at("/api/chat/dual-loop")])
        .await;
        let (adapter, state) = adapter_for(server.base_url(), RemoteRoute::DualLoop);

        let (result, text) = collect(&adapter, &[ChatMessage::new("user", "x")]).await;
        assert_eq!(
            result.unwrap_err(),
            GenerateError::Network(
                "Remote returned HTTP 502: Backend error: 500 (model crashed)".into()
            )
        );
        assert!(text.is_empty());
        let snapshot = state.snapshot();
        assert_eq!(snapshot.error.as_deref(), Some(REMOTE_FAILURE_TEXT));
        assert_eq!(snapshot.stress, 1.0);
    }

    #[tokio::test]
    async fn connection_failure_is_a_network_error() {
        let (adapter, state) =
            adapter_for(MockServer::unreachable_url().await, RemoteRoute::Chat);
        let (result, _) = collect(&adapter, &[ChatMessage::new("user", "x")]).await;
        assert!(result.unwrap_err().is_network());
        assert_eq!(state.snapshot().error.as_deref(), Some(REMOTE_FAILURE_TEXT));
    }

    #[tokio::test]
    async fn next_request_clears_an_earlier_failure() {
        let server = MockServer::start(vec![
            MockResponse::text(500, "boom").at("/api/chat"),
            MockResponse::chunked(200, &[b"fine"]).at("/api/chat"),
        ])
        .await;
        let (adapter, state) = adapter_for(server.base_url(), RemoteRoute::Chat);
        let history = [ChatMessage::new("user", "x")];

        let (failed, _) = collect(&adapter, &history).await;
        assert!(failed.is_err());
        assert_eq!(state.status(), EngineStatus::Failed);

        let (result, text) = collect(&adapter, &history).await;
        assert_eq!(result.unwrap(), StreamEnd::Completed);
        assert_eq!(text, "fine");
        assert_eq!(state.snapshot().error, None);
        assert_ne!(state.status(), EngineStatus::Failed);
    }

    #[tokio::test]
    async fn ingest_reports_chunk_count() {
        let server =
            MockServer::start(vec![MockResponse::json(200, r#"{"chunks":42}"#).at("/api/ingest")])
                .await;
        let (adapter, state) = adapter_for(server.base_url(), RemoteRoute::Chat);
        let (seen, _sub) = record_states(&state);

        assert_eq!(adapter.trigger_ingest().await, Some(42));
        let seen = seen.lock().unwrap();
        assert_eq!(seen[1].status_text, "Indexing Documents...");
        assert_eq!(seen[2].status_text, "Indexed 42 chunks");
        assert!(seen[2].remote_connected);
    }

    #[tokio::test]
    async fn ingest_failure_sets_error() {
        let server = MockServer::start(vec![MockResponse::json(
            500,
            r#"{"detail":"no documents folder"}"#,
        )])
        .await;
        let (adapter, state) = adapter_for(server.base_url(), RemoteRoute::Chat);
        assert_eq!(adapter.trigger_ingest().await, None);
        assert_eq!(state.snapshot().error.as_deref(), Some("Ingestion Failed"));
    }

    #[test]
    fn routes_parse_and_map_to_paths() {
        assert_eq!(RemoteRoute::try_from("dual_loop").unwrap().path(), "/api/chat/dual-loop");
        assert_eq!(RemoteRoute::default().path(), "/api/chat");
        assert!(RemoteRoute::try_from("graph").is_err());
    }
}

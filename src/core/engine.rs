//! Local inference engine capability.
//!
//! The adapter in [`crate::core::local`] only needs two things from an
//! engine: a progressive load and a token stream. [`OpenAiCompatEngine`]
//! provides both on top of any local server that speaks the OpenAI chat
//! completions protocol (llama.cpp, MLX and Ollama all do).

use std::fmt;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use memchr::memchr;
use tracing::debug;

use crate::api::{ChatMessage, CompletionChunk, CompletionRequest, ModelsResponse};
use crate::core::api_error::{extract_error_summary, summarize_api_error};
use crate::utils::url::endpoint_url;

pub type TokenStream = BoxStream<'static, Result<String, EngineError>>;

#[derive(Debug, Clone, PartialEq)]
pub struct LoadProgress {
    /// Fraction of the load completed, `0.0..=1.0`.
    pub fraction: f64,
    pub stage: String,
}

impl LoadProgress {
    pub fn new(fraction: f64, stage: impl Into<String>) -> Self {
        Self {
            fraction,
            stage: stage.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    Request(String),
    Status { status: u16, body: String },
    Api(String),
    Malformed(String),
    ModelUnavailable { model: String, available: Vec<String> },
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Request(msg) => write!(f, "Local engine request failed: {msg}"),
            EngineError::Status { status, body } => {
                write!(f, "Local engine returned {}", summarize_api_error(*status, body))
            }
            EngineError::Api(msg) => write!(f, "Local engine error: {msg}"),
            EngineError::Malformed(msg) => write!(f, "Malformed engine payload: {msg}"),
            EngineError::ModelUnavailable { model, available } => {
                if available.is_empty() {
                    write!(f, "Model {model} is not available (engine lists no models)")
                } else {
                    write!(
                        f,
                        "Model {model} is not available (engine offers: {})",
                        available.join(", ")
                    )
                }
            }
        }
    }
}

impl std::error::Error for EngineError {}

impl From<reqwest::Error> for EngineError {
    fn from(err: reqwest::Error) -> Self {
        EngineError::Request(err.to_string())
    }
}

#[async_trait]
pub trait LocalEngine: Send + Sync {
    /// Loads the model, reporting progress as often as the engine likes.
    async fn load(&self, on_progress: &(dyn Fn(LoadProgress) + Send + Sync))
        -> Result<(), EngineError>;

    /// Opens a token stream for `messages` (roles `system`/`user`/`assistant`).
    async fn stream_chat(&self, messages: Vec<ChatMessage>) -> Result<TokenStream, EngineError>;
}

#[derive(Debug, PartialEq, Eq)]
enum SseEvent {
    Content(String),
    Skip,
    Done,
    Error(EngineError),
}

fn parse_sse_line(line: &[u8]) -> SseEvent {
    let line = match std::str::from_utf8(line) {
        Ok(line) => line.trim(),
        Err(err) => {
            debug!(error = %err, "skipping non UTF-8 stream line");
            return SseEvent::Skip;
        }
    };
    let Some(payload) = line.strip_prefix("data:").map(str::trim_start) else {
        return SseEvent::Skip;
    };
    if payload == "[DONE]" {
        return SseEvent::Done;
    }
    if payload.is_empty() {
        return SseEvent::Skip;
    }

    match serde_json::from_str::<CompletionChunk>(payload) {
        Ok(chunk) => chunk
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.delta.content)
            .filter(|content| !content.is_empty())
            .map(SseEvent::Content)
            .unwrap_or(SseEvent::Skip),
        Err(err) => match serde_json::from_str::<serde_json::Value>(payload)
            .ok()
            .and_then(|value| extract_error_summary(&value))
        {
            Some(summary) => SseEvent::Error(EngineError::Api(summary)),
            None => SseEvent::Error(EngineError::Malformed(err.to_string())),
        },
    }
}

#[derive(Debug, Clone)]
pub struct OpenAiCompatEngine {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl OpenAiCompatEngine {
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            model: model.into(),
            api_key,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    async fn list_models(&self) -> Result<Vec<String>, EngineError> {
        let response = self
            .authorize(self.client.get(endpoint_url(&self.base_url, "models")))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EngineError::Status {
                status: status.as_u16(),
                body,
            });
        }
        let models: ModelsResponse = response
            .json()
            .await
            .map_err(|err| EngineError::Malformed(err.to_string()))?;
        Ok(models.data.into_iter().map(|model| model.id).collect())
    }
}

#[async_trait]
impl LocalEngine for OpenAiCompatEngine {
    async fn load(
        &self,
        on_progress: &(dyn Fn(LoadProgress) + Send + Sync),
    ) -> Result<(), EngineError> {
        on_progress(LoadProgress::new(0.0, "Connecting to local engine"));
        let models = self.list_models().await?;

        on_progress(LoadProgress::new(0.5, format!("Resolving model {}", self.model)));
        if !models.iter().any(|id| id == &self.model) {
            return Err(EngineError::ModelUnavailable {
                model: self.model.clone(),
                available: models,
            });
        }

        on_progress(LoadProgress::new(1.0, format!("Model {} ready", self.model)));
        Ok(())
    }

    async fn stream_chat(&self, messages: Vec<ChatMessage>) -> Result<TokenStream, EngineError> {
        let request = CompletionRequest {
            model: &self.model,
            messages: &messages,
            stream: true,
        };
        let response = self
            .authorize(
                self.client
                    .post(endpoint_url(&self.base_url, "chat/completions"))
                    .header("Content-Type", "application/json"),
            )
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<no body>".to_string());
            return Err(EngineError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let mut bytes = response.bytes_stream();
        let stream = async_stream::stream! {
            let mut buffer: Vec<u8> = Vec::new();
            while let Some(chunk) = bytes.next().await {
                match chunk {
                    Ok(chunk) => buffer.extend_from_slice(&chunk),
                    Err(err) => {
                        yield Err(EngineError::Request(err.to_string()));
                        return;
                    }
                }

                while let Some(newline_pos) = memchr(b'\n', &buffer) {
                    let line: Vec<u8> = buffer.drain(..=newline_pos).collect();
                    match parse_sse_line(&line) {
                        SseEvent::Content(content) => yield Ok(content),
                        SseEvent::Skip => {}
                        SseEvent::Done => return,
                        SseEvent::Error(err) => {
                            yield Err(err);
                            return;
                        }
                    }
                }
            }

            match parse_sse_line(&buffer) {
                SseEvent::Content(content) => yield Ok(content),
                SseEvent::Error(err) => yield Err(err),
                SseEvent::Skip | SseEvent::Done => {}
            }
        };

        Ok(Box::pin(stream))
    }
}

//! Chat submission flow: transcript bookkeeping around one streamed reply.
//!
//! [`ChatDriver::submit`] appends the user turn and an empty assistant
//! message, streams the active backend through a [`StreamDemux`] and replaces
//! the assistant message by id after every chunk. Consumers observe the
//! conversation through [`DriverEvent`]s or [`ChatDriver::transcript`].

use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::core::artifact::{
    Artifact, ArtifactChange, ArtifactTracker, DEFAULT_ARTIFACT_LANGUAGE, DEFAULT_ARTIFACT_TITLE,
};
use crate::core::backend::{GenerateError, HistoryPolicy, StreamEnd};
use crate::core::client::{image_mime, BackendClient};
use crate::core::demux::{DemuxUpdate, StreamDemux};
use crate::core::fence::CodeBlock;
use crate::core::message::{ConversationMessage, FeedbackScore, MessageId, Transcript};
use crate::core::router::InferenceRouter;

#[derive(Debug)]
pub enum DriverError {
    EmptyInput,
    Generate(GenerateError),
    /// Feedback needs a trace id and the message never received one.
    MissingTraceId(MessageId),
    UnknownMessage(MessageId),
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriverError::EmptyInput => write!(f, "Nothing to send"),
            DriverError::Generate(err) => write!(f, "{err}"),
            DriverError::MissingTraceId(id) => {
                write!(f, "Message {} has no trace id to rate", id.0)
            }
            DriverError::UnknownMessage(id) => write!(f, "No message with id {}", id.0),
        }
    }
}

impl std::error::Error for DriverError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DriverError::Generate(err) => Some(err),
            _ => None,
        }
    }
}

impl From<GenerateError> for DriverError {
    fn from(err: GenerateError) -> Self {
        DriverError::Generate(err)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageAttachment {
    pub name: String,
    pub mime: String,
    pub data: Vec<u8>,
}

impl ImageAttachment {
    pub fn new(name: impl Into<String>, mime: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            mime: mime.into(),
            data,
        }
    }

    pub async fn from_path(path: &Path) -> std::io::Result<Self> {
        let data = tokio::fs::read(path).await?;
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "image".to_string());
        Ok(Self::new(name, image_mime(path), data))
    }

    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime, BASE64.encode(&self.data))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserInput {
    pub text: String,
    pub image: Option<ImageAttachment>,
}

impl UserInput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            image: None,
        }
    }

    pub fn with_image(mut self, image: ImageAttachment) -> Self {
        self.image = Some(image);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DriverEvent {
    MessageUpdated(ConversationMessage),
    MessageRemoved(MessageId),
    /// The live preview block changed.
    Preview(CodeBlock),
    ArtifactChanged(Artifact),
    StreamFinished {
        message_id: MessageId,
        end: StreamEnd,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverOptions {
    pub history: HistoryPolicy,
    pub artifact_title: String,
    pub artifact_language: String,
    pub mirror_studio: bool,
}

impl Default for DriverOptions {
    fn default() -> Self {
        Self {
            history: HistoryPolicy::Full,
            artifact_title: DEFAULT_ARTIFACT_TITLE.to_string(),
            artifact_language: DEFAULT_ARTIFACT_LANGUAGE.to_string(),
            mirror_studio: true,
        }
    }
}

#[derive(Debug, Default)]
struct StreamSlot {
    current_id: u64,
    cancel: Option<CancellationToken>,
}

#[derive(Debug, Default)]
struct Inner {
    transcript: Transcript,
    artifacts: ArtifactTracker,
    stream: StreamSlot,
}

impl Inner {
    fn start_new_stream(&mut self) -> (CancellationToken, u64) {
        self.cancel_current_stream();
        self.stream.current_id += 1;
        let token = CancellationToken::new();
        self.stream.cancel = Some(token.clone());
        (token, self.stream.current_id)
    }

    fn cancel_current_stream(&mut self) {
        if let Some(token) = self.stream.cancel.take() {
            token.cancel();
        }
    }

    fn finish_stream(&mut self, stream_id: u64) {
        if self.stream.current_id == stream_id {
            self.stream.cancel = None;
        }
    }

    fn is_current(&self, stream_id: u64) -> bool {
        self.stream.current_id == stream_id && self.stream.cancel.is_some()
    }
}

#[derive(Clone)]
pub struct ChatDriver {
    router: InferenceRouter,
    client: BackendClient,
    options: DriverOptions,
    inner: Arc<Mutex<Inner>>,
    events: mpsc::UnboundedSender<DriverEvent>,
}

impl ChatDriver {
    pub fn new(
        router: InferenceRouter,
        client: BackendClient,
        options: DriverOptions,
    ) -> (Self, mpsc::UnboundedReceiver<DriverEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        (
            Self {
                router,
                client,
                options,
                inner: Arc::new(Mutex::new(Inner::default())),
                events,
            },
            receiver,
        )
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn emit(&self, event: DriverEvent) {
        // A dropped receiver only means nobody is rendering.
        let _ = self.events.send(event);
    }

    pub fn router(&self) -> &InferenceRouter {
        &self.router
    }

    pub fn transcript(&self) -> Transcript {
        self.lock().transcript.clone()
    }

    pub fn artifact(&self) -> Option<Artifact> {
        self.lock().artifacts.current().cloned()
    }

    pub fn is_streaming(&self) -> bool {
        self.lock().stream.cancel.is_some()
    }

    pub fn cancel(&self) {
        self.lock().cancel_current_stream();
    }

    /// Sends `input` and streams the reply into the transcript.
    ///
    /// Returns the id of the assistant message. Transport failures end up
    /// as that message's content; engine and stream format failures are
    /// returned instead.
    pub async fn submit(&self, input: UserInput) -> Result<MessageId, DriverError> {
        if input.text.trim().is_empty() && input.image.is_none() {
            return Err(DriverError::EmptyInput);
        }

        let mut content = input.text;
        let mut images = Vec::new();
        if let Some(image) = &input.image {
            images.push(image.data_url());
            content.push_str(&format!("\n\n[Attached Image: {}]", image.name));
        }

        let (assistant_id, seeded, history, token, stream_id) = {
            let mut inner = self.lock();
            let user_id = inner.transcript.push_user(content, images);
            let assistant_id = inner.transcript.begin_assistant();
            let seeded: Vec<ConversationMessage> = [user_id, assistant_id]
                .iter()
                .filter_map(|id| inner.transcript.get(*id).cloned())
                .collect();
            let history = inner.transcript.backend_history_until(assistant_id);
            let (token, stream_id) = inner.start_new_stream();
            (assistant_id, seeded, history, token, stream_id)
        };
        for message in seeded {
            self.emit(DriverEvent::MessageUpdated(message));
        }

        if let Err(err) = self.router.prepare().await {
            let mut inner = self.lock();
            inner.transcript.remove(assistant_id);
            inner.finish_stream(stream_id);
            drop(inner);
            self.emit(DriverEvent::MessageRemoved(assistant_id));
            return Err(err.into());
        }

        let history = self.options.history.apply(history);
        let backend = self.router.active();
        debug!(stream_id, mode = %self.router.mode(), turns = history.len(), "starting stream");

        let mut demux = StreamDemux::new();
        let result = {
            let mut on_chunk = |chunk: &str| {
                let update = demux.push(chunk);
                self.apply(stream_id, assistant_id, update, demux.raw());
            };
            backend
                .generate_stream(&history, &mut on_chunk, &token)
                .await
        };

        let outcome = match result {
            Ok(end) => {
                let update = demux.finish();
                self.apply(stream_id, assistant_id, update, demux.raw());
                Ok(end)
            }
            Err(err) if err.is_network() => {
                self.show_error(stream_id, assistant_id, &err);
                Ok(StreamEnd::Completed)
            }
            Err(err) => Err(err),
        };

        self.lock().finish_stream(stream_id);
        match outcome {
            Ok(end) => {
                self.emit(DriverEvent::StreamFinished {
                    message_id: assistant_id,
                    end,
                });
                Ok(assistant_id)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Folds one demultiplexed chunk into the assistant message.
    fn apply(&self, stream_id: u64, message_id: MessageId, update: DemuxUpdate, raw: &str) {
        let DemuxUpdate {
            snapshot,
            code_block,
            buffer_changed,
        } = update;

        let (message, artifact) = {
            let mut inner = self.lock();
            if !inner.is_current(stream_id) {
                return;
            }
            let Some(existing) = inner.transcript.get(message_id).cloned() else {
                return;
            };
            let replacement = ConversationMessage {
                content: snapshot.content,
                thought: snapshot.thought,
                is_thinking: snapshot.is_thinking,
                trace_id: snapshot.trace_id,
                ..existing
            };
            let message = inner.transcript.replace(message_id, replacement).cloned();

            let artifact = code_block.as_ref().and_then(|block| {
                let change = inner.artifacts.observe(
                    &self.options.artifact_title,
                    &self.options.artifact_language,
                    &block.content,
                );
                match change {
                    ArtifactChange::Unchanged => None,
                    ArtifactChange::Created | ArtifactChange::Versioned => {
                        inner.artifacts.current().cloned()
                    }
                }
            });
            (message, artifact)
        };

        if let Some(message) = message {
            self.emit(DriverEvent::MessageUpdated(message));
        }
        if let Some(block) = code_block {
            self.emit(DriverEvent::Preview(block));
        }
        if let Some(artifact) = artifact {
            self.emit(DriverEvent::ArtifactChanged(artifact));
        }
        if buffer_changed && self.options.mirror_studio {
            self.spawn_mirror(raw.to_string());
        }
    }

    fn spawn_mirror(&self, content: String) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let client = self.client.clone();
        runtime.spawn(async move {
            if let Err(err) = client.mirror_studio(&content).await {
                warn!(error = %err, "studio mirror failed");
            }
        });
    }

    fn show_error(&self, stream_id: u64, message_id: MessageId, err: &GenerateError) {
        let message = {
            let mut inner = self.lock();
            if !inner.is_current(stream_id) {
                return;
            }
            let Some(existing) = inner.transcript.get(message_id).cloned() else {
                return;
            };
            let content = if existing.content.is_empty() {
                format!("Error: {err}")
            } else {
                format!("{}\n\nError: {err}", existing.content)
            };
            let replacement = ConversationMessage {
                content,
                is_thinking: false,
                ..existing
            };
            inner.transcript.replace(message_id, replacement).cloned()
        };
        if let Some(message) = message {
            self.emit(DriverEvent::MessageUpdated(message));
        }
    }

    /// Rates an assistant message. Returns whether the score was recorded;
    /// repeating the current score sends nothing.
    pub async fn submit_feedback(
        &self,
        message_id: MessageId,
        score: FeedbackScore,
    ) -> Result<bool, DriverError> {
        let trace_id = {
            let inner = self.lock();
            let message = inner
                .transcript
                .get(message_id)
                .ok_or(DriverError::UnknownMessage(message_id))?;
            if message.feedback == Some(score) {
                return Ok(false);
            }
            message
                .trace_id
                .clone()
                .ok_or(DriverError::MissingTraceId(message_id))?
        };

        if !self.client.send_feedback(&trace_id, score).await {
            return Ok(false);
        }

        let message = {
            let mut inner = self.lock();
            match inner.transcript.set_feedback(message_id, score) {
                Some(true) => inner.transcript.get(message_id).cloned(),
                Some(false) => None,
                None => return Err(DriverError::UnknownMessage(message_id)),
            }
        };
        let changed = message.is_some();
        if let Some(message) = message {
            self.emit(DriverEvent::MessageUpdated(message));
        }
        Ok(changed)
    }
}

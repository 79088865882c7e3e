use serde::{Deserialize, Serialize};

/// A single turn handed to a generation backend.
///
/// Roles use the transcript vocabulary (`"user"`, `"model"`, `"system"`);
/// adapters translate them to whatever their engine expects.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

#[derive(Serialize)]
pub struct BackendChatRequest {
    pub message: String,
    pub turbo: bool,
    pub use_mlx: bool,
}

#[derive(Serialize)]
pub struct FeedbackRequest<'a> {
    pub trace_id: &'a str,
    pub score: u8,
}

#[derive(Serialize)]
pub struct StudioWriteRequest<'a> {
    pub content: &'a str,
}

#[derive(Serialize)]
pub struct SocialRequest<'a> {
    pub feature_desc: &'a str,
}

#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
pub struct SocialResults {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub voiceover: Option<String>,
    #[serde(default)]
    pub images: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct SocialResponse {
    pub status: String,
    #[serde(default)]
    pub results: Option<SocialResults>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct IngestResponse {
    pub chunks: u64,
}

/// Error payload returned by the dual-loop relay.
#[derive(Debug, Deserialize)]
pub struct RelayError {
    pub error: String,
    #[serde(default)]
    pub details: Option<String>,
}

// OpenAI-compatible payloads spoken by local inference servers.

#[derive(Serialize)]
pub struct CompletionRequest<'a> {
    pub model: &'a str,
    pub messages: &'a [ChatMessage],
    pub stream: bool,
}

#[derive(Deserialize)]
pub struct CompletionDelta {
    pub content: Option<String>,
}

#[derive(Deserialize)]
pub struct CompletionChoice {
    pub delta: CompletionDelta,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Deserialize)]
pub struct CompletionChunk {
    pub choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
pub struct ModelInfo {
    pub id: String,
}

#[derive(Deserialize)]
pub struct ModelsResponse {
    pub data: Vec<ModelInfo>,
}

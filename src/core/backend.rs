//! The capability interface shared by the local and remote adapters.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::api::ChatMessage;
use crate::core::message::ROLE_USER;

/// Receives decoded text fragments in arrival order.
pub type ChunkSink<'a> = dyn FnMut(&str) + Send + 'a;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerateError {
    /// `generate_stream` was called before a successful `initialize`.
    NotInitialized,
    Initialization(String),
    /// Transport failure or non-success status; shown to the user inline.
    Network(String),
    /// The response could not be read as a text stream.
    MalformedStream(String),
}

impl GenerateError {
    pub fn is_network(&self) -> bool {
        matches!(self, GenerateError::Network(_))
    }
}

impl fmt::Display for GenerateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GenerateError::NotInitialized => write!(f, "Local engine is not initialized"),
            GenerateError::Initialization(msg) => {
                write!(f, "Local engine initialization failed: {msg}")
            }
            GenerateError::Network(msg) => write!(f, "{msg}"),
            GenerateError::MalformedStream(msg) => write!(f, "Malformed response stream: {msg}"),
        }
    }
}

impl std::error::Error for GenerateError {}

/// How much of the transcript a generation request carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HistoryPolicy {
    /// Every prior turn plus the new user message.
    #[default]
    Full,
    /// Only the new user message.
    LastTurn,
}

impl HistoryPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            HistoryPolicy::Full => "full",
            HistoryPolicy::LastTurn => "last-turn",
        }
    }

    pub fn apply(self, mut history: Vec<ChatMessage>) -> Vec<ChatMessage> {
        match self {
            HistoryPolicy::Full => history,
            HistoryPolicy::LastTurn => history.pop().into_iter().collect(),
        }
    }
}

impl TryFrom<&str> for HistoryPolicy {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value.trim().to_ascii_lowercase().as_str() {
            "full" => Ok(HistoryPolicy::Full),
            "last-turn" | "last_turn" | "last" => Ok(HistoryPolicy::LastTurn),
            other => Err(format!(
                "Unknown history policy: {other} (expected 'full' or 'last-turn')"
            )),
        }
    }
}

/// Renders `history` as the single query string a one-message backend accepts.
///
/// The final message is the query; earlier turns are prepended as a
/// plain-text transcript.
pub fn fold_history(history: &[ChatMessage]) -> String {
    let Some((last, earlier)) = history.split_last() else {
        return String::new();
    };
    if earlier.is_empty() {
        return last.content.clone();
    }

    let mut folded = String::from("Conversation so far:\n");
    for message in earlier {
        let speaker = if message.role == ROLE_USER {
            "User"
        } else {
            "Assistant"
        };
        folded.push_str(speaker);
        folded.push_str(": ");
        folded.push_str(&message.content);
        folded.push('\n');
    }
    folded.push_str("\nCurrent question:\n");
    folded.push_str(&last.content);
    folded
}

#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Prepares the backend. Backends without a load phase succeed at once.
    async fn initialize(&self) -> Result<(), GenerateError> {
        Ok(())
    }

    /// Streams a reply to `history`, calling `on_chunk` for every fragment
    /// before reading the next one. Cancellation is checked between
    /// fragments and while waiting for one.
    async fn generate_stream(
        &self,
        history: &[ChatMessage],
        on_chunk: &mut ChunkSink<'_>,
        cancel: &CancellationToken,
    ) -> Result<StreamEnd, GenerateError>;

    fn is_ready(&self) -> bool;
}

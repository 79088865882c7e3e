use serde::{Deserialize, Serialize};

use crate::api::ChatMessage;

pub const ROLE_USER: &str = "user";
/// Internal vocabulary for assistant turns handed to backends.
pub const ROLE_MODEL: &str = "model";
pub const ROLE_ASSISTANT: &str = "assistant";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => ROLE_USER,
            Role::Assistant => ROLE_ASSISTANT,
        }
    }

    /// Role name used when the transcript is handed to a backend.
    pub fn to_backend_role(self) -> &'static str {
        match self {
            Role::User => ROLE_USER,
            Role::Assistant => ROLE_MODEL,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum FeedbackScore {
    Negative,
    Positive,
}

impl FeedbackScore {
    pub fn as_u8(self) -> u8 {
        match self {
            FeedbackScore::Negative => 0,
            FeedbackScore::Positive => 1,
        }
    }
}

impl From<FeedbackScore> for u8 {
    fn from(score: FeedbackScore) -> Self {
        score.as_u8()
    }
}

impl TryFrom<u8> for FeedbackScore {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(FeedbackScore::Negative),
            1 => Ok(FeedbackScore::Positive),
            other => Err(format!("Feedback score must be 0 or 1, got {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageId(pub u64);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub id: MessageId,
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thought: Option<String>,
    #[serde(default)]
    pub is_thinking: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<FeedbackScore>,
}

impl ConversationMessage {
    fn new(id: MessageId, role: Role, content: String) -> Self {
        Self {
            id,
            role,
            content,
            images: Vec::new(),
            thought: None,
            is_thinking: false,
            trace_id: None,
            feedback: None,
        }
    }

    pub fn to_backend_message(&self) -> ChatMessage {
        ChatMessage::new(self.role.to_backend_role(), self.content.clone())
    }
}

/// Ordered conversation with stable per-message identities.
#[derive(Debug, Default, Clone)]
pub struct Transcript {
    messages: Vec<ConversationMessage>,
    next_id: u64,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate_id(&mut self) -> MessageId {
        let id = MessageId(self.next_id);
        self.next_id += 1;
        id
    }

    pub fn push_user(&mut self, content: String, images: Vec<String>) -> MessageId {
        let id = self.allocate_id();
        let mut message = ConversationMessage::new(id, Role::User, content);
        message.images = images;
        self.messages.push(message);
        id
    }

    /// Appends the empty assistant message that a stream will fill in.
    pub fn begin_assistant(&mut self) -> MessageId {
        let id = self.allocate_id();
        self.messages
            .push(ConversationMessage::new(id, Role::Assistant, String::new()));
        id
    }

    pub fn get(&self, id: MessageId) -> Option<&ConversationMessage> {
        self.position(id).map(|index| &self.messages[index])
    }

    pub fn position(&self, id: MessageId) -> Option<usize> {
        // Ids are allocated in push order, so the vector is sorted by id.
        self.messages.binary_search_by_key(&id, |msg| msg.id).ok()
    }

    /// Replaces the message with `id` by `replacement`, keeping its identity.
    ///
    /// Returns the stored copy, or `None` when the id is unknown.
    pub fn replace(
        &mut self,
        id: MessageId,
        mut replacement: ConversationMessage,
    ) -> Option<&ConversationMessage> {
        let index = self.position(id)?;
        replacement.id = id;
        self.messages[index] = replacement;
        Some(&self.messages[index])
    }

    pub fn remove(&mut self, id: MessageId) -> Option<ConversationMessage> {
        let index = self.position(id)?;
        Some(self.messages.remove(index))
    }

    /// Sets the feedback field only; returns whether anything changed.
    pub fn set_feedback(&mut self, id: MessageId, score: FeedbackScore) -> Option<bool> {
        let index = self.position(id)?;
        let message = &mut self.messages[index];
        if message.feedback == Some(score) {
            return Some(false);
        }
        message.feedback = Some(score);
        Some(true)
    }

    pub fn messages(&self) -> &[ConversationMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&ConversationMessage> {
        self.messages.last()
    }

    /// Backend view of every message before `until` (exclusive).
    pub fn backend_history_until(&self, until: MessageId) -> Vec<ChatMessage> {
        self.messages
            .iter()
            .take_while(|msg| msg.id < until)
            .map(ConversationMessage::to_backend_message)
            .collect()
    }
}

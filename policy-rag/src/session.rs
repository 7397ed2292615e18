//! Per-user conversation state.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::document::Answer;
use crate::error::Result;
use crate::pipeline::PolicyAssistant;

/// Who sent a [`ChatMessage`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The person asking.
    User,
    /// The policy assistant.
    Assistant,
}

/// One entry of the chat history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    /// Sender.
    pub role: Role,
    /// Question or answer text as sent.
    pub content: String,
    /// When the message entered the history.
    pub sent_at: DateTime<Utc>,
}

impl ChatMessage {
    fn now(role: Role, content: impl Into<String>) -> Self {
        Self { role, content: content.into(), sent_at: Utc::now() }
    }
}

/// A single conversation with the shared assistant.
///
/// History is append-only and belongs to this session alone. A failed turn
/// leaves the user's question in the history with no reply, and the next
/// turn proceeds normally.
pub struct ChatSession {
    id: Uuid,
    assistant: Arc<PolicyAssistant>,
    history: Vec<ChatMessage>,
}

impl ChatSession {
    /// Start an empty conversation backed by `assistant`.
    pub fn new(assistant: Arc<PolicyAssistant>) -> Self {
        Self { id: Uuid::new_v4(), assistant, history: Vec::new() }
    }

    /// Random identifier of this session, used in logs.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Messages so far, oldest first.
    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    /// Record `question`, ask the assistant and record its answer.
    ///
    /// # Errors
    ///
    /// Any error from [`PolicyAssistant::ask`]. Nothing is appended for the
    /// failed reply.
    pub async fn send(&mut self, question: &str) -> Result<Answer> {
        self.history.push(ChatMessage::now(Role::User, question));
        let answer = self.assistant.ask(question).await?;
        self.history.push(ChatMessage::now(Role::Assistant, answer.text.clone()));
        debug!(session = %self.id, turns = self.history.len(), "chat turn complete");
        Ok(answer)
    }
}

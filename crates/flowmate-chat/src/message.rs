//! Chat message types.
//!
//! [`ChatMessage`] is a single entry in the conversation.  Messages are never
//! edited after creation; a card's editable state lives on
//! [`crate::WorkflowCard`], keyed by the id of the message it belongs to.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use flowmate_intent::WorkflowSuggestion;

/// Who wrote a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Author {
    User,
    Assistant,
}

impl std::fmt::Display for Author {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => f.write_str("user"),
            Self::Assistant => f.write_str("assistant"),
        }
    }
}

/// A single message in the conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Unique identifier (UUID v7, so ids sort by creation time).
    pub id: Uuid,
    pub author: Author,
    pub text: String,
    pub created_at: DateTime<Utc>,
    /// The suggestion shown under this message, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<WorkflowSuggestion>,
}

impl ChatMessage {
    /// Create a user message stamped with the current time.
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Author::User, text.into(), None)
    }

    /// Create an assistant message stamped with the current time.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Author::Assistant, text.into(), None)
    }

    /// Create an assistant message carrying a suggestion card.
    pub fn assistant_with_suggestion(
        text: impl Into<String>,
        suggestion: WorkflowSuggestion,
    ) -> Self {
        Self::new(Author::Assistant, text.into(), Some(suggestion))
    }

    fn new(author: Author, text: String, suggestion: Option<WorkflowSuggestion>) -> Self {
        Self {
            id: Uuid::now_v7(),
            author,
            text,
            created_at: Utc::now(),
            suggestion,
        }
    }
}

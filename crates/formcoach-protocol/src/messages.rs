//! Persisted data model: conversations and messages.
//!
//! Messages are the durable units of a conversation. Ordering within a
//! conversation is defined by `sequence`, a per-conversation monotonic
//! counter assigned at persist time — never by wall-clock timestamps.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Assistant,
}

impl std::fmt::Display for Sender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
        }
    }
}

/// A persisted conversation message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Server-assigned for persisted messages; locally generated (`local-*`)
    /// for optimistic messages awaiting reconciliation.
    pub id: String,

    /// Conversation this message belongs to.
    pub conversation_id: String,

    /// Message text.
    pub content: String,

    /// Message role.
    pub sender: Sender,

    /// Per-conversation monotonic position. Defines display order.
    pub sequence: u32,

    /// When the message was created.
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Build an optimistic local user message with a temporary id.
    ///
    /// The id carries a `local-` prefix so reconciliation against the
    /// server-assigned identity can recognize provisional entries.
    pub fn local_user(conversation_id: &str, content: &str, sequence: u32) -> Self {
        Self {
            id: format!("local-{}", uuid::Uuid::new_v4()),
            conversation_id: conversation_id.to_string(),
            content: content.to_string(),
            sender: Sender::User,
            sequence,
            created_at: Utc::now(),
        }
    }

    /// Whether this message still carries a temporary local id.
    pub fn is_local(&self) -> bool {
        self.id.starts_with("local-")
    }
}

/// Conversation lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationStatus {
    Active,
    Archived,
    Deleted,
}

impl std::fmt::Display for ConversationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Archived => write!(f, "archived"),
            Self::Deleted => write!(f, "deleted"),
        }
    }
}

/// What kind of coaching thread this is. Selects the backend prompt config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationKind {
    /// General coaching chat.
    Coaching,
    /// Planning an upcoming workout.
    WorkoutPlanning,
    /// Reviewing a logged workout.
    WorkoutAnalysis,
}

impl Default for ConversationKind {
    fn default() -> Self {
        Self::Coaching
    }
}

/// A conversation: a persisted thread of messages with its own lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    /// Opaque server-assigned id.
    pub id: String,

    /// Display title, derived from the first user message at creation.
    pub title: String,

    /// Prompt/config kind tag.
    #[serde(default)]
    pub kind: ConversationKind,

    /// Lifecycle status.
    pub status: ConversationStatus,

    /// When the conversation was created.
    pub created_at: DateTime<Utc>,

    /// Bumped on every send; drives idle archival.
    pub updated_at: DateTime<Utc>,
}

/// Maximum number of characters of the first user message used for a
/// derived conversation title.
pub const TITLE_MAX_CHARS: usize = 30;

/// Title used when the seed message is empty or whitespace.
pub const FALLBACK_TITLE: &str = "New conversation";

/// Derive a conversation title from its first user message.
///
/// Truncates to [`TITLE_MAX_CHARS`] characters (not bytes) and appends a
/// short date suffix so same-topic threads stay distinguishable in lists.
pub fn derive_title(first_user_message: &str, created_at: DateTime<Utc>) -> String {
    let trimmed = first_user_message.trim();
    let date = created_at.format("%b %-d");
    if trimmed.is_empty() {
        return format!("{FALLBACK_TITLE} · {date}");
    }
    let head: String = trimmed.chars().take(TITLE_MAX_CHARS).collect();
    format!("{head} · {date}")
}

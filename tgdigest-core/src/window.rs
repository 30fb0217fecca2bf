//! Conversation window and message types
//!
//! A window is an immutable, caller-owned slice of group chat activity. The
//! pipeline reads it and never mutates it.

use crate::{GroupId, MessageId, TenantId, Timestamp, WindowId};
use serde::{Deserialize, Serialize};

/// Descriptor of a bounded slice of group chat submitted for digesting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationWindow {
    pub window_id: WindowId,
    pub group_id: GroupId,
    pub tenant_id: TenantId,
    /// Scopes granted to the caller that submitted the window
    #[serde(default)]
    pub scopes: Vec<String>,
    pub window_start: Timestamp,
    pub window_end: Timestamp,
    pub message_count: u32,
    pub participant_count: u32,
}

impl ConversationWindow {
    /// Check whether the caller was granted a scope.
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|granted| granted == scope)
    }
}

/// Reference to the message a reply points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyRef {
    pub message_id: MessageId,
}

/// One chat message. Insertion order in a window is chronological.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub group_id: GroupId,
    pub tenant_id: TenantId,
    #[serde(default)]
    pub sender_username: Option<String>,
    pub sender_tg_id: i64,
    /// Missing timestamps mark a malformed message; it is skipped, not fatal.
    #[serde(default)]
    pub posted_at: Option<Timestamp>,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub reply_to: Option<ReplyRef>,
    #[serde(default)]
    pub reaction_count: u32,
    #[serde(default)]
    pub has_media: bool,
}

impl Message {
    /// Display name of the sender, falling back to the numeric Telegram id.
    pub fn sender_label(&self) -> String {
        match self.sender_username.as_deref() {
            Some(name) if !name.trim().is_empty() => name.trim_start_matches('@').to_string(),
            _ => format!("user{}", self.sender_tg_id),
        }
    }

    pub fn reply_target(&self) -> Option<MessageId> {
        self.reply_to.map(|r| r.message_id)
    }
}

/// A message after deduplication and scoring.
///
/// Produced once by the context engine and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedMessage {
    pub message: Message,
    /// Weighted composite relevance score
    pub score: f64,
    /// Whether the message survived deduplication
    pub kept: bool,
}

impl RankedMessage {
    pub fn id(&self) -> MessageId {
        self.message.id
    }
}

/// Statistics reported for the context stage of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextStats {
    /// Messages surviving deduplication (ranked or not)
    pub deduplicated_messages: usize,
    pub duplicates_removed: usize,
    /// Messages skipped because they were malformed or foreign to the window
    pub skipped_malformed: usize,
    /// Messages included in the ranked context
    pub ranked_messages: usize,
}

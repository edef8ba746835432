use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Per-session message identifier, assigned in arrival order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub u64);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Message,
    PaidMessage,
    System,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Message => "message",
            MessageKind::PaidMessage => "paid_message",
            MessageKind::System => "system",
        }
    }
}

/// Display metadata attached to a paid companion message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaidMetadata {
    pub amount: f64,
    pub currency: String,
    pub tier_color: Option<String>,
    pub pin_duration_seconds: Option<u64>,
}

/// Stored chat message. Only the tombstone fields change after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: MessageId,
    pub user_id: String,
    pub username: String,
    pub body: String,
    pub timestamp: DateTime<Utc>,
    pub kind: MessageKind,
    pub paid_metadata: Option<PaidMetadata>,
    pub deleted: bool,
    pub deleted_by: Option<String>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl ChatMessage {
    pub fn is_visible(&self) -> bool {
        !self.deleted
    }
}

/// Message as submitted, before the store assigns id and timestamp
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewChatMessage {
    pub user_id: String,
    pub username: String,
    pub body: String,
    #[serde(default = "default_kind")]
    pub kind: MessageKind,
    #[serde(default)]
    pub paid_metadata: Option<PaidMetadata>,
}

fn default_kind() -> MessageKind {
    MessageKind::Message
}

impl NewChatMessage {
    pub fn text(user_id: impl Into<String>, username: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            username: username.into(),
            body: body.into(),
            kind: MessageKind::Message,
            paid_metadata: None,
        }
    }

    pub fn paid(
        user_id: impl Into<String>,
        username: impl Into<String>,
        body: impl Into<String>,
        metadata: PaidMetadata,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            username: username.into(),
            body: body.into(),
            kind: MessageKind::PaidMessage,
            paid_metadata: Some(metadata),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ChatUser {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub badges: BTreeSet<String>,
    #[serde(default)]
    pub is_subscriber: bool,
    #[serde(default)]
    pub is_moderator: bool,
    #[serde(default)]
    pub is_owner: bool,
    #[serde(default)]
    pub subscription_tier: Option<String>,
}

impl ChatUser {
    pub fn new(id: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            username: username.into(),
            ..Default::default()
        }
    }

    /// Owners and moderators bypass chat-mode restrictions
    pub fn is_privileged(&self) -> bool {
        self.is_owner || self.is_moderator
    }
}

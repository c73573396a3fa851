/// Shared types for the chat and presence layers
use crate::connection::ConnectionState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type ConversationId = String;
pub type UserId = String;

/// Kind of chat thread
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationKind {
    Direct,
    Group,
    Project,
}

/// One chat thread as held client-side
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub kind: ConversationKind,
    /// Explicit name for group/project threads; None for direct threads
    pub name: Option<String>,
    /// Ordered member list
    pub members: Vec<UserId>,
    pub last_message_at: Option<DateTime<Utc>>,
    /// Preview text of the last message
    pub last_preview: Option<String>,
    #[serde(default)]
    pub unread_count: u32,
}

impl Conversation {
    /// Display name: the explicit name, or for direct threads the other member
    pub fn display_name(&self, local_user: &str) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        self.members
            .iter()
            .find(|m| m.as_str() != local_user)
            .cloned()
            .unwrap_or_else(|| self.id.clone())
    }
}

/// Delivery status of a locally-authored message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Sending,
    Sent,
    Delivered,
    Read,
    Failed,
}

impl MessageStatus {
    /// Whether a transition from `self` to `to` moves forward.
    /// Receipts only ever advance (sent, then delivered, then read); Failed
    /// is unconfirmed and may be overwritten by any later resolution.
    pub fn can_advance_to(self, to: MessageStatus) -> bool {
        use MessageStatus::*;
        match (self, to) {
            (a, b) if a == b => false,
            (Sending, _) => true,
            (Failed, _) => true,
            (Sent, Delivered) | (Sent, Read) | (Delivered, Read) => true,
            _ => false,
        }
    }
}

/// One chat message. Identity is `id` once the server confirmed it,
/// `temp_id` before that.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_id: Option<String>,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    /// None once deleted
    pub content: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub is_edited: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
    /// Present only for the local user's own messages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<MessageStatus>,
}

impl Message {
    pub fn key(&self) -> Option<MessageKey> {
        if let Some(id) = &self.id {
            return Some(MessageKey::Id(id.clone()));
        }
        self.temp_id.clone().map(MessageKey::Temp)
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Preview text for the conversation list
    pub fn preview(&self) -> String {
        match (&self.deleted_at, &self.content) {
            (Some(_), _) => "(deleted)".to_string(),
            (None, Some(content)) => content.chars().take(120).collect(),
            (None, None) => String::new(),
        }
    }
}

/// Lookup key for a stored message
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MessageKey {
    Id(String),
    Temp(String),
}

/// Partial update applied to a stored message
#[derive(Debug, Clone, Default)]
pub struct MessagePatch {
    /// Server-assigned id, recorded on ack
    pub id: Option<String>,
    pub status: Option<MessageStatus>,
    pub content: Option<String>,
    pub is_edited: Option<bool>,
    /// Setting this also clears `content`
    pub deleted_at: Option<DateTime<Utc>>,
    /// Server timestamp replacing the optimistic local one
    pub created_at: Option<DateTime<Utc>>,
}

/// Presence status of a user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceStatus {
    Online,
    Away,
    Offline,
    Busy,
}

/// Per-user presence record; never deleted, only overwritten
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceRecord {
    pub user_id: UserId,
    pub status: PresenceStatus,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub project_id: Option<String>,
    pub task_id: Option<String>,
    pub status_message: Option<String>,
    /// Stamp of the last applied change; orders snapshot merges against pushes
    pub updated_at: DateTime<Utc>,
}

impl PresenceRecord {
    /// Placeholder for a user first seen through a partial event
    pub fn offline(user_id: UserId, at: DateTime<Utc>) -> Self {
        Self {
            user_id,
            status: PresenceStatus::Offline,
            last_seen_at: None,
            project_id: None,
            task_id: None,
            status_message: None,
            updated_at: at,
        }
    }
}

/// Directory entry returned by user search
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: UserId,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// Engine events fanned out to subscribers (UI layers)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncEvent {
    /// Connection lifecycle transition
    ConnectionChanged { state: ConnectionState },
    /// Token rejected; host session layer must handle this
    AuthFailed { reason: String },
    /// Reconnect schedule exhausted; waiting for an external trigger
    ReconnectsExhausted { attempts: u32 },
    /// A message was inserted or merged
    MessageUpserted { message: Message },
    /// A stored message changed (edit, delete, status)
    MessagePatched { message: Message },
    /// A send failed its ack; recoverable via explicit retry
    SendFailed {
        conversation_id: ConversationId,
        temp_id: String,
        reason: String,
    },
    /// Conversation metadata changed (preview, unread, ordering input)
    ConversationUpdated { conversation: Conversation },
    /// The set of typing users changed for a conversation
    TypingChanged {
        conversation_id: ConversationId,
        users: Vec<UserId>,
    },
    /// A presence record changed
    PresenceChanged { record: PresenceRecord },
}

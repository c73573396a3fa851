/// Socket event vocabulary — JSON payloads tagged by `type`
use crate::types::{Conversation, ConversationId, Message, PresenceRecord, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Events emitted by the client
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ClientEvent {
    /// Send a message; the server answers with a `chat:ack` carrying the
    /// same `temp_id`
    #[serde(rename = "chat:send")]
    Send {
        conversation_id: ConversationId,
        temp_id: String,
        content: String,
    },

    /// Subscribe to a conversation room
    #[serde(rename = "chat:join")]
    Join { conversation_id: ConversationId },

    /// Mark a conversation read up to now
    #[serde(rename = "chat:mark-read")]
    MarkRead { conversation_id: ConversationId },

    #[serde(rename = "chat:typing:start")]
    TypingStart { conversation_id: ConversationId },

    #[serde(rename = "chat:typing:stop")]
    TypingStop { conversation_id: ConversationId },

    /// Periodic liveness signal with optional current activity
    #[serde(rename = "presence:heartbeat")]
    Heartbeat {
        project_id: Option<String>,
        task_id: Option<String>,
        location: Option<String>,
    },

    #[serde(rename = "status:post")]
    StatusPost { message: String },

    #[serde(rename = "status:clear")]
    StatusClear,
}

/// Events delivered by the server
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// New or replayed message broadcast to its room
    #[serde(rename = "chat:message")]
    Message { message: Message },

    /// Ack for a `chat:send`, correlated by `temp_id`
    #[serde(rename = "chat:ack")]
    SendAck {
        temp_id: String,
        message: Option<Message>,
        error: Option<String>,
    },

    #[serde(rename = "chat:delivered")]
    Delivered {
        conversation_id: ConversationId,
        message_id: String,
    },

    #[serde(rename = "chat:read")]
    Read {
        conversation_id: ConversationId,
        message_id: String,
        reader_id: UserId,
    },

    #[serde(rename = "chat:edited")]
    Edited {
        conversation_id: ConversationId,
        message_id: String,
        content: String,
    },

    #[serde(rename = "chat:deleted")]
    Deleted {
        conversation_id: ConversationId,
        message_id: String,
        deleted_at: DateTime<Utc>,
    },

    #[serde(rename = "chat:typing:start")]
    TypingStart {
        conversation_id: ConversationId,
        user_id: UserId,
    },

    #[serde(rename = "chat:typing:stop")]
    TypingStop {
        conversation_id: ConversationId,
        user_id: UserId,
    },

    /// A thread was created that includes the local user
    #[serde(rename = "chat:thread:created")]
    ThreadCreated { conversation: Conversation },

    /// Full presence record push
    #[serde(rename = "presence:update")]
    PresenceUpdate { record: PresenceRecord },

    #[serde(rename = "user:online")]
    UserOnline { user_id: UserId, at: DateTime<Utc> },

    #[serde(rename = "user:offline")]
    UserOffline { user_id: UserId, at: DateTime<Utc> },

    #[serde(rename = "activity:changed")]
    ActivityChanged {
        user_id: UserId,
        project_id: Option<String>,
        task_id: Option<String>,
        at: DateTime<Utc>,
    },

    #[serde(rename = "status:updated")]
    StatusUpdated {
        user_id: UserId,
        message: Option<String>,
        at: DateTime<Utc>,
    },
}

impl ClientEvent {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Get event type as string
    pub fn event_type(&self) -> &'static str {
        match self {
            ClientEvent::Send { .. } => "chat:send",
            ClientEvent::Join { .. } => "chat:join",
            ClientEvent::MarkRead { .. } => "chat:mark-read",
            ClientEvent::TypingStart { .. } => "chat:typing:start",
            ClientEvent::TypingStop { .. } => "chat:typing:stop",
            ClientEvent::Heartbeat { .. } => "presence:heartbeat",
            ClientEvent::StatusPost { .. } => "status:post",
            ClientEvent::StatusClear => "status:clear",
        }
    }
}

impl ServerEvent {
    pub fn from_json(data: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(data)
    }

    /// Get event type as string
    pub fn event_type(&self) -> &'static str {
        match self {
            ServerEvent::Message { .. } => "chat:message",
            ServerEvent::SendAck { .. } => "chat:ack",
            ServerEvent::Delivered { .. } => "chat:delivered",
            ServerEvent::Read { .. } => "chat:read",
            ServerEvent::Edited { .. } => "chat:edited",
            ServerEvent::Deleted { .. } => "chat:deleted",
            ServerEvent::TypingStart { .. } => "chat:typing:start",
            ServerEvent::TypingStop { .. } => "chat:typing:stop",
            ServerEvent::ThreadCreated { .. } => "chat:thread:created",
            ServerEvent::PresenceUpdate { .. } => "presence:update",
            ServerEvent::UserOnline { .. } => "user:online",
            ServerEvent::UserOffline { .. } => "user:offline",
            ServerEvent::ActivityChanged { .. } => "activity:changed",
            ServerEvent::StatusUpdated { .. } => "status:updated",
        }
    }
}

impl fmt::Display for ClientEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ClientEvent({})", self.event_type())
    }
}

impl fmt::Display for ServerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ServerEvent({})", self.event_type())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_event_serialization() {
        let event = ClientEvent::Send {
            conversation_id: "c1".to_string(),
            temp_id: "t1".to_string(),
            content: "hello".to_string(),
        };
        let json = event.to_json().unwrap();
        assert!(json.contains("\"type\":\"chat:send\""));
        let back: ClientEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(event, back);
    }

    #[test]
    fn test_server_event_deserialization() {
        let json = r#"{"type":"chat:typing:start","conversation_id":"c1","user_id":"u2"}"#;
        let event = ServerEvent::from_json(json).unwrap();
        assert_eq!(
            event,
            ServerEvent::TypingStart {
                conversation_id: "c1".to_string(),
                user_id: "u2".to_string(),
            }
        );
        assert_eq!(event.event_type(), "chat:typing:start");
    }

    #[test]
    fn test_unknown_event_type_is_error() {
        assert!(ServerEvent::from_json(r#"{"type":"chat:unknown"}"#).is_err());
    }
}

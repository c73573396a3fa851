/// Conversation index — ordering, unread counts, previews, the active thread
use crate::connection::ConnectionManager;
use crate::protocol::ClientEvent;
use crate::types::{Conversation, ConversationId, ConversationKind, Message, SyncEvent, UserId};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::debug;

#[derive(Clone)]
pub struct ConversationIndex {
    conversations: Arc<RwLock<HashMap<ConversationId, Conversation>>>,
    active: Arc<RwLock<Option<ConversationId>>>,
    local_user: UserId,
    connection: ConnectionManager,
    events: broadcast::Sender<SyncEvent>,
}

impl ConversationIndex {
    pub fn new(
        local_user: UserId,
        connection: ConnectionManager,
        events: broadcast::Sender<SyncEvent>,
    ) -> Self {
        Self {
            conversations: Arc::new(RwLock::new(HashMap::new())),
            active: Arc::new(RwLock::new(None)),
            local_user,
            connection,
            events,
        }
    }

    /// Apply an inbound message: bump preview/stamp, count unread unless the
    /// message is ours, a duplicate delivery, or its conversation is active
    pub async fn record_inbound(&self, message: &Message, newly_stored: bool) {
        let active = self.active.read().await.clone();
        let snapshot = {
            let mut conversations = self.conversations.write().await;
            let conversation = conversations
                .entry(message.conversation_id.clone())
                .or_insert_with(|| {
                    debug!(
                        "Message for unknown thread {}, creating placeholder",
                        message.conversation_id
                    );
                    Conversation {
                        id: message.conversation_id.clone(),
                        // Corrected by the next thread-list refresh
                        kind: ConversationKind::Group,
                        name: None,
                        members: Vec::new(),
                        last_message_at: None,
                        last_preview: None,
                        unread_count: 0,
                    }
                });

            // Replayed history must not move the stamp backwards
            if conversation
                .last_message_at
                .map(|t| message.created_at >= t)
                .unwrap_or(true)
            {
                conversation.last_message_at = Some(message.created_at);
                conversation.last_preview = Some(message.preview());
            }
            if newly_stored
                && message.sender_id != self.local_user
                && active.as_deref() != Some(message.conversation_id.as_str())
            {
                conversation.unread_count += 1;
            }
            conversation.clone()
        };
        let _ = self.events.send(SyncEvent::ConversationUpdated {
            conversation: snapshot,
        });
    }

    /// Switch the active conversation (or none). Zeroes its unread count and
    /// signals mark-read; returns the previously active id so the caller can
    /// stop typing there.
    pub async fn set_active(&self, id: Option<ConversationId>) -> Option<ConversationId> {
        let previous = {
            let mut active = self.active.write().await;
            std::mem::replace(&mut *active, id.clone())
        };
        if let Some(id) = id {
            let snapshot = {
                let mut conversations = self.conversations.write().await;
                conversations.get_mut(&id).map(|conversation| {
                    conversation.unread_count = 0;
                    conversation.clone()
                })
            };
            if let Some(conversation) = snapshot {
                let _ = self
                    .events
                    .send(SyncEvent::ConversationUpdated { conversation });
            }
            if let Err(e) = self
                .connection
                .emit(ClientEvent::MarkRead {
                    conversation_id: id,
                })
                .await
            {
                debug!("mark-read not sent: {}", e);
            }
        }
        previous
    }

    pub async fn active(&self) -> Option<ConversationId> {
        self.active.read().await.clone()
    }

    /// Insert a newly created or newly joined thread and join its room
    pub async fn add_conversation(&self, conversation: Conversation) {
        let id = conversation.id.clone();
        let snapshot = {
            let mut conversations = self.conversations.write().await;
            match conversations.get_mut(&id) {
                Some(existing) => {
                    Self::merge_thread(existing, conversation);
                    existing.clone()
                }
                None => {
                    conversations.insert(id.clone(), conversation.clone());
                    conversation
                }
            }
        };
        self.connection.join_room(&id).await;
        let _ = self.events.send(SyncEvent::ConversationUpdated {
            conversation: snapshot,
        });
    }

    /// Apply a thread-list snapshot. Server fields win for metadata; local
    /// unread counts and newer previews survive.
    pub async fn refresh(&self, threads: Vec<Conversation>) {
        for thread in threads {
            self.add_conversation(thread).await;
        }
    }

    /// Sorted snapshot, newest activity first
    pub async fn list(&self) -> Vec<Conversation> {
        let conversations = self.conversations.read().await;
        let mut list: Vec<Conversation> = conversations.values().cloned().collect();
        list.sort_by(|a, b| b.last_message_at.cmp(&a.last_message_at));
        list
    }

    pub async fn get(&self, id: &str) -> Option<Conversation> {
        self.conversations.read().await.get(id).cloned()
    }

    /// Drop everything held (cache clear)
    pub async fn clear(&self) {
        self.conversations.write().await.clear();
        *self.active.write().await = None;
    }

    fn merge_thread(existing: &mut Conversation, incoming: Conversation) {
        existing.kind = incoming.kind;
        existing.name = incoming.name;
        if !incoming.members.is_empty() {
            existing.members = incoming.members;
        }
        existing.unread_count = existing.unread_count.max(incoming.unread_count);
        if incoming.last_message_at > existing.last_message_at {
            existing.last_message_at = incoming.last_message_at;
            existing.last_preview = incoming.last_preview;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use crate::testutil::OfflineTransport;
    use chrono::{TimeZone, Utc};
    use tokio::sync::mpsc;

    fn index() -> ConversationIndex {
        let (events, _) = broadcast::channel(64);
        let (dispatch, _inbound) = mpsc::unbounded_channel();
        let connection = ConnectionManager::new(
            Arc::new(OfflineTransport),
            SyncConfig::default(),
            dispatch,
            events.clone(),
        );
        ConversationIndex::new("me".to_string(), connection, events)
    }

    fn inbound(conversation: &str, sender: &str, seconds: i64) -> Message {
        Message {
            id: Some(format!("m-{}", seconds)),
            temp_id: None,
            conversation_id: conversation.to_string(),
            sender_id: sender.to_string(),
            content: Some("hi".to_string()),
            created_at: Utc.timestamp_opt(1_700_000_000 + seconds, 0).unwrap(),
            is_edited: false,
            deleted_at: None,
            status: None,
        }
    }

    #[tokio::test]
    async fn test_unread_counts_remote_messages_only() {
        let index = index();
        index.record_inbound(&inbound("c1", "u2", 1), true).await;
        index.record_inbound(&inbound("c1", "me", 2), true).await;
        index.record_inbound(&inbound("c1", "u2", 3), true).await;
        assert_eq!(index.get("c1").await.unwrap().unread_count, 2);
    }

    #[tokio::test]
    async fn test_active_conversation_never_accumulates_unread() {
        let index = index();
        index.record_inbound(&inbound("c1", "u2", 1), true).await;
        index.set_active(Some("c1".to_string())).await;
        assert_eq!(index.get("c1").await.unwrap().unread_count, 0);
        index.record_inbound(&inbound("c1", "u2", 2), true).await;
        index.record_inbound(&inbound("c1", "u2", 3), true).await;
        assert_eq!(index.get("c1").await.unwrap().unread_count, 0);
    }

    #[tokio::test]
    async fn test_duplicate_delivery_does_not_double_count() {
        let index = index();
        let message = inbound("c1", "u2", 1);
        index.record_inbound(&message, true).await;
        index.record_inbound(&message, false).await;
        assert_eq!(index.get("c1").await.unwrap().unread_count, 1);
    }

    #[tokio::test]
    async fn test_list_sorted_by_latest_activity() {
        let index = index();
        index.record_inbound(&inbound("c1", "u2", 10), true).await;
        index.record_inbound(&inbound("c2", "u3", 30), true).await;
        index.record_inbound(&inbound("c3", "u4", 20), true).await;
        let ids: Vec<_> = index.list().await.into_iter().map(|c| c.id).collect();
        assert_eq!(ids, vec!["c2", "c3", "c1"]);
    }

    #[tokio::test]
    async fn test_switching_active_returns_previous() {
        let index = index();
        index.set_active(Some("c1".to_string())).await;
        let previous = index.set_active(Some("c2".to_string())).await;
        assert_eq!(previous.as_deref(), Some("c1"));
        assert_eq!(index.active().await.as_deref(), Some("c2"));
    }

    #[tokio::test]
    async fn test_refresh_keeps_local_unread() {
        let index = index();
        index.record_inbound(&inbound("c1", "u2", 1), true).await;
        index.record_inbound(&inbound("c1", "u2", 2), true).await;
        index
            .refresh(vec![Conversation {
                id: "c1".to_string(),
                kind: ConversationKind::Direct,
                name: None,
                members: vec!["me".to_string(), "u2".to_string()],
                last_message_at: None,
                last_preview: None,
                unread_count: 0,
            }])
            .await;
        let held = index.get("c1").await.unwrap();
        assert_eq!(held.kind, ConversationKind::Direct);
        assert_eq!(held.unread_count, 2);
        assert!(held.last_message_at.is_some());
    }
}

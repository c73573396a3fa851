/// Per-conversation message log: ordered, paginated, de-duplicated.
/// Owns every message for its conversation; identity is the server id once
/// known, the client temp id before that.
use crate::error::Result;
use crate::rest::RestBackend;
use crate::types::{ConversationId, Message, MessageKey, MessagePatch, MessageStatus, SyncEvent};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::debug;

#[derive(Debug)]
struct ConversationLog {
    /// Ascending by `created_at`; equal stamps keep arrival order
    messages: Vec<Message>,
    has_more: bool,
}

impl Default for ConversationLog {
    fn default() -> Self {
        Self {
            messages: Vec::new(),
            // Unknown until a history fetch says otherwise
            has_more: true,
        }
    }
}

impl ConversationLog {
    fn position_by_id(&self, id: &str) -> Option<usize> {
        self.messages
            .iter()
            .position(|m| m.id.as_deref() == Some(id))
    }

    fn position_by_temp(&self, temp_id: &str) -> Option<usize> {
        self.messages
            .iter()
            .position(|m| m.temp_id.as_deref() == Some(temp_id))
    }

    fn position_by_key(&self, key: &MessageKey) -> Option<usize> {
        match key {
            MessageKey::Id(id) => self.position_by_id(id),
            MessageKey::Temp(temp_id) => self.position_by_temp(temp_id),
        }
    }

    fn insert_sorted(&mut self, message: Message) {
        let at = self
            .messages
            .partition_point(|m| m.created_at <= message.created_at);
        self.messages.insert(at, message);
    }

    fn resort(&mut self) {
        self.messages.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    }
}

#[derive(Clone)]
pub struct MessageStore {
    rest: Arc<dyn RestBackend>,
    logs: Arc<RwLock<HashMap<ConversationId, ConversationLog>>>,
    page_size: usize,
    events: broadcast::Sender<SyncEvent>,
}

impl MessageStore {
    pub fn new(
        rest: Arc<dyn RestBackend>,
        page_size: usize,
        events: broadcast::Sender<SyncEvent>,
    ) -> Self {
        Self {
            rest,
            logs: Arc::new(RwLock::new(HashMap::new())),
            page_size,
            events,
        }
    }

    /// Fetch the newest page and replace what is held. Messages that arrived
    /// over the socket while the fetch was in flight (or are still pending
    /// their ack) are merged back in rather than dropped.
    pub async fn load_initial(&self, conversation_id: &str) -> Result<bool> {
        let page = self
            .rest
            .fetch_history(conversation_id, None, self.page_size)
            .await?;
        let mut fetched = page.messages;
        fetched.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        let newest_fetched = fetched.last().map(|m| m.created_at);

        let mut logs = self.logs.write().await;
        let log = logs.entry(conversation_id.to_string()).or_default();
        let previous = std::mem::take(&mut log.messages);
        log.messages = fetched;
        log.has_more = page.has_more;

        for message in previous {
            let pending = message.id.is_none() && message.temp_id.is_some();
            let newer = newest_fetched
                .map(|t| message.created_at > t)
                .unwrap_or(true);
            if pending || newer {
                Self::merge_into(log, message);
            }
        }
        Ok(page.has_more)
    }

    /// Fetch a page strictly older than the oldest held server message and
    /// prepend it; the relative order of already-loaded entries never changes.
    /// No-op when nothing is loaded or history is exhausted.
    pub async fn load_older(&self, conversation_id: &str) -> Result<bool> {
        let (cursor, oldest_at) = {
            let logs = self.logs.read().await;
            let Some(log) = logs.get(conversation_id) else {
                return Ok(false);
            };
            if !log.has_more {
                return Ok(false);
            }
            let Some(oldest) = log.messages.iter().find(|m| m.id.is_some()) else {
                return Ok(false);
            };
            (oldest.id.clone().unwrap_or_default(), oldest.created_at)
        };

        let page = self
            .rest
            .fetch_history(conversation_id, Some(&cursor), self.page_size)
            .await?;
        let mut older = page.messages;
        older.sort_by(|a, b| a.created_at.cmp(&b.created_at));

        let mut logs = self.logs.write().await;
        let log = logs.entry(conversation_id.to_string()).or_default();
        let held: HashSet<String> = log.messages.iter().filter_map(|m| m.id.clone()).collect();
        older.retain(|m| {
            m.created_at < oldest_at
                && m.id.as_ref().map(|id| !held.contains(id)).unwrap_or(true)
        });

        let mut merged = older;
        merged.append(&mut log.messages);
        log.messages = merged;
        log.has_more = page.has_more;
        Ok(page.has_more)
    }

    /// Insert or merge an inbound message. Two-phase matcher: an entry with
    /// the same server id wins, else one with the same temp id (the
    /// optimistic-send/broadcast race), else a fresh sorted insert.
    /// Returns true when the message was new to the store, so callers can
    /// tell a first delivery from a duplicate.
    pub async fn upsert_incoming(&self, message: Message) -> bool {
        let conversation_id = message.conversation_id.clone();
        let (stored, inserted) = {
            let mut logs = self.logs.write().await;
            let log = logs.entry(conversation_id).or_default();
            Self::merge_into(log, message)
        };
        let _ = self.events.send(SyncEvent::MessageUpserted { message: stored });
        inserted
    }

    /// Partial update by id or temp id; returns the patched snapshot.
    /// Status transitions only move forward.
    pub async fn patch(
        &self,
        conversation_id: &str,
        key: &MessageKey,
        patch: MessagePatch,
    ) -> Option<Message> {
        let snapshot = {
            let mut logs = self.logs.write().await;
            let log = logs.get_mut(conversation_id)?;
            let index = log.position_by_key(key)?;
            let entry = &mut log.messages[index];

            if let Some(id) = patch.id {
                // A server id is permanent once assigned
                entry.id.get_or_insert(id);
            }
            if let Some(content) = patch.content {
                if entry.deleted_at.is_none() {
                    entry.content = Some(content);
                }
            }
            if let Some(edited) = patch.is_edited {
                entry.is_edited = edited;
            }
            if let Some(deleted_at) = patch.deleted_at {
                entry.deleted_at = Some(deleted_at);
                entry.content = None;
            }
            if let Some(next) = patch.status {
                match entry.status {
                    Some(current) if !current.can_advance_to(next) => {
                        debug!("Ignoring status {:?} -> {:?} for {:?}", current, next, key);
                    }
                    Some(_) => entry.status = Some(next),
                    None => {
                        // Receipts only apply to the local user's own messages
                    }
                }
            }
            let mut resort = false;
            if let Some(created_at) = patch.created_at {
                if entry.created_at != created_at {
                    entry.created_at = created_at;
                    resort = true;
                }
            }
            let snapshot = entry.clone();
            if resort {
                log.resort();
            }
            snapshot
        };
        let _ = self.events.send(SyncEvent::MessagePatched {
            message: snapshot.clone(),
        });
        Some(snapshot)
    }

    pub async fn messages(&self, conversation_id: &str) -> Vec<Message> {
        let logs = self.logs.read().await;
        logs.get(conversation_id)
            .map(|log| log.messages.clone())
            .unwrap_or_default()
    }

    pub async fn has_more(&self, conversation_id: &str) -> bool {
        let logs = self.logs.read().await;
        logs.get(conversation_id)
            .map(|l| l.has_more)
            .unwrap_or(false)
    }

    pub async fn find(&self, conversation_id: &str, key: &MessageKey) -> Option<Message> {
        let logs = self.logs.read().await;
        let log = logs.get(conversation_id)?;
        log.position_by_key(key).map(|i| log.messages[i].clone())
    }

    /// Drop all held pages (cache clear)
    pub async fn clear(&self) {
        self.logs.write().await.clear();
    }

    fn merge_into(log: &mut ConversationLog, message: Message) -> (Message, bool) {
        let position = message
            .id
            .as_ref()
            .and_then(|id| log.position_by_id(id))
            .or_else(|| {
                message
                    .temp_id
                    .as_ref()
                    .and_then(|t| log.position_by_temp(t))
            });

        match position {
            Some(index) => {
                let entry = &mut log.messages[index];
                let server_confirmed = message.id.is_some();
                if entry.id.is_none() {
                    entry.id = message.id.clone();
                }
                if entry.temp_id.is_none() {
                    entry.temp_id = message.temp_id.clone();
                }
                if message.deleted_at.is_some() {
                    entry.deleted_at = message.deleted_at;
                    entry.content = None;
                } else if message.content.is_some() && entry.deleted_at.is_none() {
                    entry.content = message.content.clone();
                }
                entry.is_edited |= message.is_edited;
                match (entry.status, message.status) {
                    (Some(current), Some(next)) if current.can_advance_to(next) => {
                        entry.status = Some(next);
                    }
                    (Some(MessageStatus::Sending), None) if server_confirmed => {
                        // The broadcast beat the ack: the server clearly has it
                        entry.status = Some(MessageStatus::Sent);
                    }
                    _ => {}
                }
                let mut resort = false;
                if server_confirmed && entry.created_at != message.created_at {
                    entry.created_at = message.created_at;
                    resort = true;
                }
                let snapshot = entry.clone();
                if resort {
                    log.resort();
                }
                (snapshot, false)
            }
            None => {
                let snapshot = message.clone();
                log.insert_sorted(message);
                (snapshot, true)
            }
        }
    }
}

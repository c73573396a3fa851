/// Optimistic send coordinator — temp ids, ack reconciliation, explicit retry
use crate::connection::ConnectionManager;
use crate::error::{Result, SyncError};
use crate::message_store::MessageStore;
use crate::protocol::ClientEvent;
use crate::types::{Message, MessageKey, MessagePatch, MessageStatus, SyncEvent, UserId};
use chrono::Utc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::timeout;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Clone)]
pub struct SendCoordinator {
    local_user: UserId,
    store: MessageStore,
    connection: ConnectionManager,
    ack_timeout: Duration,
    events: broadcast::Sender<SyncEvent>,
}

impl SendCoordinator {
    pub fn new(
        local_user: UserId,
        store: MessageStore,
        connection: ConnectionManager,
        ack_timeout: Duration,
        events: broadcast::Sender<SyncEvent>,
    ) -> Self {
        Self {
            local_user,
            store,
            connection,
            ack_timeout,
            events,
        }
    }

    /// Insert a provisional message and transmit it. Returns the temp id the
    /// caller can use to track or retry the send; the ack resolves in the
    /// background so tearing down a view never cancels a send.
    pub async fn send(&self, conversation_id: &str, content: &str) -> Result<String> {
        if content.trim().is_empty() {
            return Err(SyncError::SendFailed("empty message".to_string()));
        }
        let temp_id = Uuid::new_v4().to_string();
        let message = Message {
            id: None,
            temp_id: Some(temp_id.clone()),
            conversation_id: conversation_id.to_string(),
            sender_id: self.local_user.clone(),
            content: Some(content.to_string()),
            created_at: Utc::now(),
            is_edited: false,
            deleted_at: None,
            status: Some(MessageStatus::Sending),
        };
        self.store.upsert_incoming(message).await;
        self.transmit(
            conversation_id.to_string(),
            temp_id.clone(),
            content.to_string(),
        );
        Ok(temp_id)
    }

    /// Explicit user-triggered re-send of a Failed message
    pub async fn retry(&self, conversation_id: &str, temp_id: &str) -> Result<()> {
        let key = MessageKey::Temp(temp_id.to_string());
        let Some(message) = self.store.find(conversation_id, &key).await else {
            return Err(SyncError::SendFailed("unknown message".to_string()));
        };
        if message.status != Some(MessageStatus::Failed) {
            return Err(SyncError::SendFailed(
                "only failed messages can be retried".to_string(),
            ));
        }
        let Some(content) = message.content else {
            return Err(SyncError::SendFailed("nothing to resend".to_string()));
        };
        self.store
            .patch(
                conversation_id,
                &key,
                MessagePatch {
                    status: Some(MessageStatus::Sending),
                    ..Default::default()
                },
            )
            .await;
        self.transmit(conversation_id.to_string(), temp_id.to_string(), content);
        Ok(())
    }

    fn transmit(&self, conversation_id: String, temp_id: String, content: String) {
        let coordinator = self.clone();
        tokio::spawn(async move {
            let ack = coordinator
                .connection
                .emit_with_ack(
                    &temp_id,
                    ClientEvent::Send {
                        conversation_id: conversation_id.clone(),
                        temp_id: temp_id.clone(),
                        content,
                    },
                )
                .await;

            let outcome = match timeout(coordinator.ack_timeout, ack).await {
                Ok(Ok(result)) => result,
                Ok(Err(_)) => Err(SyncError::SendFailed("ack channel dropped".to_string())),
                Err(_) => {
                    coordinator.connection.cancel_ack(&temp_id).await;
                    Err(SyncError::Timeout("send ack".to_string()))
                }
            };

            match outcome {
                Ok(confirmed) => {
                    debug!("Send {} confirmed as {:?}", temp_id, confirmed.id);
                    coordinator
                        .store
                        .patch(
                            &conversation_id,
                            &MessageKey::Temp(temp_id),
                            MessagePatch {
                                id: confirmed.id,
                                status: Some(MessageStatus::Sent),
                                created_at: Some(confirmed.created_at),
                                ..Default::default()
                            },
                        )
                        .await;
                }
                Err(e) => {
                    warn!("Send {} failed: {}", temp_id, e);
                    coordinator
                        .store
                        .patch(
                            &conversation_id,
                            &MessageKey::Temp(temp_id.clone()),
                            MessagePatch {
                                status: Some(MessageStatus::Failed),
                                ..Default::default()
                            },
                        )
                        .await;
                    let _ = coordinator.events.send(SyncEvent::SendFailed {
                        conversation_id,
                        temp_id,
                        reason: e.to_string(),
                    });
                }
            }
        });
    }
}

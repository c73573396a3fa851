/// Typing indicators — local debounce, remote safety expiry.
/// Entries here are transient: a disconnect clears everything.
use crate::connection::ConnectionManager;
use crate::protocol::ClientEvent;
use crate::timer::ScheduledTask;
use crate::types::{ConversationId, SyncEvent, UserId};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tracing::debug;

#[derive(Clone)]
pub struct TypingTracker {
    /// Remote typers per conversation; each entry holds its expiry timer,
    /// so dropping the entry cancels the timer
    remote: Arc<RwLock<HashMap<ConversationId, HashMap<UserId, ScheduledTask>>>>,
    /// Conversations the local user is currently typing in, each holding
    /// the debounce timer that will auto-emit the stop
    local: Arc<RwLock<HashMap<ConversationId, ScheduledTask>>>,
    connection: ConnectionManager,
    events: broadcast::Sender<SyncEvent>,
    debounce: Duration,
    ttl: Duration,
}

impl TypingTracker {
    pub fn new(
        connection: ConnectionManager,
        events: broadcast::Sender<SyncEvent>,
        debounce: Duration,
        ttl: Duration,
    ) -> Self {
        Self {
            remote: Arc::new(RwLock::new(HashMap::new())),
            local: Arc::new(RwLock::new(HashMap::new())),
            connection,
            events,
            debounce,
            ttl,
        }
    }

    /// Called on every keystroke. The first one after idle emits a start
    /// event; each one re-arms the debounce that emits the stop.
    pub async fn record_keystroke(&self, conversation_id: &str) {
        let newly = !self.local.read().await.contains_key(conversation_id);
        if newly {
            if let Err(e) = self
                .connection
                .emit(ClientEvent::TypingStart {
                    conversation_id: conversation_id.to_string(),
                })
                .await
            {
                debug!("typing:start not sent: {}", e);
            }
        }
        let tracker = self.clone();
        let id = conversation_id.to_string();
        let task = ScheduledTask::once(self.debounce, async move {
            tracker.auto_stop(&id).await;
        });
        // Replacing the previous entry drops it, which cancels its timer
        self.local
            .write()
            .await
            .insert(conversation_id.to_string(), task);
    }

    /// The input was emptied or the view left: stop immediately
    pub async fn clear_input(&self, conversation_id: &str) {
        let was_typing = self.local.write().await.remove(conversation_id).is_some();
        if was_typing {
            if let Err(e) = self
                .connection
                .emit(ClientEvent::TypingStop {
                    conversation_id: conversation_id.to_string(),
                })
                .await
            {
                debug!("typing:stop not sent: {}", e);
            }
        }
    }

    pub async fn is_typing_locally(&self, conversation_id: &str) -> bool {
        self.local.read().await.contains_key(conversation_id)
    }

    /// Remote start: add the user and arm the safety expiry that guards
    /// against a dropped stop event. A repeated start re-arms it.
    pub async fn handle_remote_start(&self, conversation_id: &str, user_id: &str) {
        let tracker = self.clone();
        let conversation = conversation_id.to_string();
        let user = user_id.to_string();
        let task = ScheduledTask::once(self.ttl, async move {
            tracker.expire_remote(&conversation, &user).await;
        });
        self.remote
            .write()
            .await
            .entry(conversation_id.to_string())
            .or_default()
            .insert(user_id.to_string(), task);
        self.notify(conversation_id).await;
    }

    /// Remote stop: remove the user and cancel the expiry timer
    pub async fn handle_remote_stop(&self, conversation_id: &str, user_id: &str) {
        let removed = {
            let mut remote = self.remote.write().await;
            let Some(set) = remote.get_mut(conversation_id) else {
                return;
            };
            let removed = set.remove(user_id).is_some();
            if set.is_empty() {
                remote.remove(conversation_id);
            }
            removed
        };
        if removed {
            self.notify(conversation_id).await;
        }
    }

    pub async fn typing_users(&self, conversation_id: &str) -> Vec<UserId> {
        let remote = self.remote.read().await;
        remote
            .get(conversation_id)
            .map(|set| set.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Drop all typing state (disconnect); timers are cancelled by the drop
    pub async fn clear_all(&self) {
        self.remote.write().await.clear();
        self.local.write().await.clear();
    }

    async fn auto_stop(&self, conversation_id: &str) {
        if let Err(e) = self
            .connection
            .emit(ClientEvent::TypingStop {
                conversation_id: conversation_id.to_string(),
            })
            .await
        {
            debug!("typing:stop not sent: {}", e);
        }
        // Removing our own entry aborts this very task at its next await
        // point, so nothing may await after this removal
        self.local.write().await.remove(conversation_id);
    }

    async fn expire_remote(&self, conversation_id: &str, user_id: &str) {
        let users = {
            let mut remote = self.remote.write().await;
            let Some(set) = remote.get_mut(conversation_id) else {
                return;
            };
            if set.remove(user_id).is_none() {
                return;
            }
            let users: Vec<UserId> = set.keys().cloned().collect();
            if set.is_empty() {
                remote.remove(conversation_id);
            }
            users
        };
        // Same self-abort constraint as auto_stop: broadcast send is
        // synchronous, so we are safe to publish after the removal
        debug!("Typing entry for {} in {} expired", user_id, conversation_id);
        let _ = self.events.send(SyncEvent::TypingChanged {
            conversation_id: conversation_id.to_string(),
            users,
        });
    }

    async fn notify(&self, conversation_id: &str) {
        let users = self.typing_users(conversation_id).await;
        let _ = self.events.send(SyncEvent::TypingChanged {
            conversation_id: conversation_id.to_string(),
            users,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use crate::testutil::OfflineTransport;
    use tokio::sync::mpsc;
    use tokio::time::sleep;

    fn tracker() -> TypingTracker {
        let (events, _) = broadcast::channel(64);
        let (dispatch, _inbound) = mpsc::unbounded_channel();
        let connection = ConnectionManager::new(
            Arc::new(OfflineTransport),
            SyncConfig::default(),
            dispatch,
            events.clone(),
        );
        TypingTracker::new(
            connection,
            events,
            Duration::from_secs(2),
            Duration::from_secs(5),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_entry_expires_without_stop() {
        let tracker = tracker();
        tracker.handle_remote_start("c1", "u2").await;
        assert_eq!(tracker.typing_users("c1").await, vec!["u2".to_string()]);

        sleep(Duration::from_millis(5500)).await;
        assert!(tracker.typing_users("c1").await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_is_per_user() {
        let tracker = tracker();
        tracker.handle_remote_start("c1", "u2").await;
        sleep(Duration::from_secs(3)).await;
        // A renewed start for another user must not extend u2's entry
        tracker.handle_remote_start("c1", "u3").await;

        sleep(Duration::from_millis(2500)).await;
        assert_eq!(tracker.typing_users("c1").await, vec!["u3".to_string()]);

        sleep(Duration::from_secs(3)).await;
        assert!(tracker.typing_users("c1").await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_stop_cancels_expiry() {
        let tracker = tracker();
        tracker.handle_remote_start("c1", "u2").await;
        tracker.handle_remote_stop("c1", "u2").await;
        assert!(tracker.typing_users("c1").await.is_empty());

        sleep(Duration::from_secs(6)).await;
        assert!(tracker.typing_users("c1").await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_start_rearms_expiry() {
        let tracker = tracker();
        tracker.handle_remote_start("c1", "u2").await;
        sleep(Duration::from_secs(4)).await;
        tracker.handle_remote_start("c1", "u2").await;

        sleep(Duration::from_secs(2)).await;
        assert_eq!(tracker.typing_users("c1").await, vec!["u2".to_string()]);

        sleep(Duration::from_secs(4)).await;
        assert!(tracker.typing_users("c1").await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_local_typing_stops_after_idle() {
        let tracker = tracker();
        tracker.record_keystroke("c1").await;
        assert!(tracker.is_typing_locally("c1").await);

        sleep(Duration::from_millis(1500)).await;
        tracker.record_keystroke("c1").await;
        sleep(Duration::from_millis(1500)).await;
        // Second keystroke re-armed the debounce
        assert!(tracker.is_typing_locally("c1").await);

        sleep(Duration::from_millis(800)).await;
        assert!(!tracker.is_typing_locally("c1").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_input_stops_immediately() {
        let tracker = tracker();
        tracker.record_keystroke("c1").await;
        tracker.clear_input("c1").await;
        assert!(!tracker.is_typing_locally("c1").await);
    }
}

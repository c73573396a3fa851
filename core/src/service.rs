/// Sync service — owns the socket handle and all per-conversation state.
/// UI layers issue commands here and watch the broadcast event fanout;
/// they never hold references into the maps.
use crate::config::SyncConfig;
use crate::connection::{ConnectionManager, ConnectionState};
use crate::conversations::ConversationIndex;
use crate::error::Result;
use crate::message_store::MessageStore;
use crate::presence::{Activity, PresenceTracker};
use crate::protocol::{ClientEvent, ServerEvent};
use crate::rest::RestBackend;
use crate::send::SendCoordinator;
use crate::transport::Transport;
use crate::typing::TypingTracker;
use crate::types::{
    Conversation, ConversationId, Message, MessageKey, MessagePatch, PresenceRecord, SyncEvent,
    UserId, UserSummary,
};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::debug;

/// Subscribers slower than this many undelivered events start lagging
const EVENT_CHANNEL_CAPACITY: usize = 256;

pub struct SyncService {
    local_user: UserId,
    connection: ConnectionManager,
    messages: MessageStore,
    conversations: ConversationIndex,
    typing: TypingTracker,
    presence: PresenceTracker,
    send: SendCoordinator,
    rest: Arc<dyn RestBackend>,
    events: broadcast::Sender<SyncEvent>,
    router: JoinHandle<()>,
    heartbeat: JoinHandle<()>,
}

impl SyncService {
    pub fn new(
        local_user: impl Into<UserId>,
        config: SyncConfig,
        transport: Arc<dyn Transport>,
        rest: Arc<dyn RestBackend>,
    ) -> Self {
        let local_user = local_user.into();
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (dispatch_tx, dispatch_rx) = mpsc::unbounded_channel();

        let connection =
            ConnectionManager::new(transport, config.clone(), dispatch_tx, events.clone());
        let messages = MessageStore::new(rest.clone(), config.page_size, events.clone());
        let conversations =
            ConversationIndex::new(local_user.clone(), connection.clone(), events.clone());
        let typing = TypingTracker::new(
            connection.clone(),
            events.clone(),
            config.typing_debounce,
            config.typing_ttl,
        );
        let presence = PresenceTracker::new(
            connection.clone(),
            rest.clone(),
            events.clone(),
            config.heartbeat_interval,
        );
        let send = SendCoordinator::new(
            local_user.clone(),
            messages.clone(),
            connection.clone(),
            config.ack_timeout,
            events.clone(),
        );

        let router = Self::spawn_router(
            dispatch_rx,
            local_user.clone(),
            messages.clone(),
            conversations.clone(),
            typing.clone(),
            presence.clone(),
        );
        let heartbeat = presence.spawn_heartbeat();

        Self {
            local_user,
            connection,
            messages,
            conversations,
            typing,
            presence,
            send,
            rest,
            events,
            router,
            heartbeat,
        }
    }

    pub fn local_user(&self) -> &str {
        &self.local_user
    }

    /// Receiver for the engine event fanout
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    // ─── Connection ──────────────────────────────────────────────────────────

    pub async fn connect(&self, token: &str) -> Result<()> {
        self.connection.connect(token).await
    }

    /// Tear down the socket and transient state; messages and the
    /// conversation index stay intact
    pub async fn disconnect(&self) {
        self.connection.disconnect().await;
        self.typing.clear_all().await;
    }

    /// App returned to foreground / network came back
    pub async fn trigger_reconnect(&self) {
        self.connection.trigger_reconnect().await;
    }

    pub async fn connection_state(&self) -> ConnectionState {
        self.connection.state().await
    }

    // ─── Chat commands ───────────────────────────────────────────────────────

    /// Optimistic send; returns the temp id tracking the provisional message
    pub async fn send_message(&self, conversation_id: &str, content: &str) -> Result<String> {
        self.send.send(conversation_id, content).await
    }

    /// Explicit retry of a message whose send failed
    pub async fn retry_send(&self, conversation_id: &str, temp_id: &str) -> Result<()> {
        self.send.retry(conversation_id, temp_id).await
    }

    pub async fn load_initial(&self, conversation_id: &str) -> Result<bool> {
        self.messages.load_initial(conversation_id).await
    }

    pub async fn load_older(&self, conversation_id: &str) -> Result<bool> {
        self.messages.load_older(conversation_id).await
    }

    /// Switch the active conversation; stops typing in the previous one
    pub async fn set_active_conversation(&self, conversation_id: Option<ConversationId>) {
        let previous = self.conversations.set_active(conversation_id).await;
        if let Some(previous) = previous {
            self.typing.clear_input(&previous).await;
        }
    }

    /// Pull the thread list and join every room
    pub async fn refresh_threads(&self) -> Result<Vec<Conversation>> {
        let threads = self.rest.fetch_threads().await?;
        self.conversations.refresh(threads).await;
        Ok(self.conversations.list().await)
    }

    pub async fn create_direct(&self, user_id: &str) -> Result<Conversation> {
        let thread = self.rest.create_direct(user_id).await?;
        self.conversations.add_conversation(thread.clone()).await;
        Ok(thread)
    }

    pub async fn create_group(&self, name: &str, member_ids: &[String]) -> Result<Conversation> {
        let thread = self.rest.create_group(name, member_ids).await?;
        self.conversations.add_conversation(thread.clone()).await;
        Ok(thread)
    }

    pub async fn edit_message(
        &self,
        conversation_id: &str,
        message_id: &str,
        content: &str,
    ) -> Result<()> {
        let edited = self
            .rest
            .edit_message(conversation_id, message_id, content)
            .await?;
        self.messages
            .patch(
                conversation_id,
                &MessageKey::Id(message_id.to_string()),
                MessagePatch {
                    content: edited.content,
                    is_edited: Some(true),
                    ..Default::default()
                },
            )
            .await;
        Ok(())
    }

    pub async fn delete_message(&self, conversation_id: &str, message_id: &str) -> Result<()> {
        self.rest
            .delete_message(conversation_id, message_id)
            .await?;
        self.messages
            .patch(
                conversation_id,
                &MessageKey::Id(message_id.to_string()),
                MessagePatch {
                    deleted_at: Some(Utc::now()),
                    ..Default::default()
                },
            )
            .await;
        Ok(())
    }

    pub async fn search_users(&self, query: &str) -> Result<Vec<UserSummary>> {
        self.rest.search_users(query).await
    }

    // ─── Typing ──────────────────────────────────────────────────────────────

    pub async fn record_keystroke(&self, conversation_id: &str) {
        self.typing.record_keystroke(conversation_id).await;
    }

    pub async fn clear_input(&self, conversation_id: &str) {
        self.typing.clear_input(conversation_id).await;
    }

    pub async fn typing_users(&self, conversation_id: &str) -> Vec<UserId> {
        self.typing.typing_users(conversation_id).await
    }

    // ─── Presence ────────────────────────────────────────────────────────────

    /// Update the activity carried by subsequent heartbeats
    pub async fn set_activity(&self, activity: Activity) {
        self.presence.set_activity(activity).await;
    }

    pub async fn post_status(&self, message: &str) -> Result<()> {
        self.connection
            .emit(ClientEvent::StatusPost {
                message: message.to_string(),
            })
            .await
    }

    pub async fn clear_status(&self) -> Result<()> {
        self.connection.emit(ClientEvent::StatusClear).await
    }

    pub async fn refresh_roster(&self) -> Result<()> {
        self.presence.refresh_roster().await
    }

    pub async fn presence(&self, user_id: &str) -> Option<PresenceRecord> {
        self.presence.presence(user_id).await
    }

    pub async fn roster(&self) -> Vec<PresenceRecord> {
        self.presence.roster().await
    }

    // ─── Queries ─────────────────────────────────────────────────────────────

    pub async fn messages(&self, conversation_id: &str) -> Vec<Message> {
        self.messages.messages(conversation_id).await
    }

    pub async fn has_more(&self, conversation_id: &str) -> bool {
        self.messages.has_more(conversation_id).await
    }

    pub async fn conversations(&self) -> Vec<Conversation> {
        self.conversations.list().await
    }

    pub async fn conversation(&self, conversation_id: &str) -> Option<Conversation> {
        self.conversations.get(conversation_id).await
    }

    pub async fn active_conversation(&self) -> Option<ConversationId> {
        self.conversations.active().await
    }

    /// Evict everything held in memory (logout / account switch)
    pub async fn clear_cache(&self) {
        self.messages.clear().await;
        self.conversations.clear().await;
        self.typing.clear_all().await;
    }

    // ─── Router ──────────────────────────────────────────────────────────────

    fn spawn_router(
        mut inbound: mpsc::UnboundedReceiver<ServerEvent>,
        local_user: UserId,
        messages: MessageStore,
        conversations: ConversationIndex,
        typing: TypingTracker,
        presence: PresenceTracker,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(event) = inbound.recv().await {
                debug!("Routing {}", event);
                match event {
                    ServerEvent::Message { message } => {
                        let newly_stored = messages.upsert_incoming(message.clone()).await;
                        conversations.record_inbound(&message, newly_stored).await;
                    }
                    ServerEvent::Delivered {
                        conversation_id,
                        message_id,
                    } => {
                        messages
                            .patch(
                                &conversation_id,
                                &MessageKey::Id(message_id),
                                MessagePatch {
                                    status: Some(crate::types::MessageStatus::Delivered),
                                    ..Default::default()
                                },
                            )
                            .await;
                    }
                    ServerEvent::Read {
                        conversation_id,
                        message_id,
                        ..
                    } => {
                        messages
                            .patch(
                                &conversation_id,
                                &MessageKey::Id(message_id),
                                MessagePatch {
                                    status: Some(crate::types::MessageStatus::Read),
                                    ..Default::default()
                                },
                            )
                            .await;
                    }
                    ServerEvent::Edited {
                        conversation_id,
                        message_id,
                        content,
                    } => {
                        messages
                            .patch(
                                &conversation_id,
                                &MessageKey::Id(message_id),
                                MessagePatch {
                                    content: Some(content),
                                    is_edited: Some(true),
                                    ..Default::default()
                                },
                            )
                            .await;
                    }
                    ServerEvent::Deleted {
                        conversation_id,
                        message_id,
                        deleted_at,
                    } => {
                        messages
                            .patch(
                                &conversation_id,
                                &MessageKey::Id(message_id),
                                MessagePatch {
                                    deleted_at: Some(deleted_at),
                                    ..Default::default()
                                },
                            )
                            .await;
                    }
                    ServerEvent::TypingStart {
                        conversation_id,
                        user_id,
                    } => {
                        // Our own typing echoes back from other devices
                        if user_id != local_user {
                            typing.handle_remote_start(&conversation_id, &user_id).await;
                        }
                    }
                    ServerEvent::TypingStop {
                        conversation_id,
                        user_id,
                    } => {
                        if user_id != local_user {
                            typing.handle_remote_stop(&conversation_id, &user_id).await;
                        }
                    }
                    ServerEvent::ThreadCreated { conversation } => {
                        conversations.add_conversation(conversation).await;
                    }
                    ServerEvent::PresenceUpdate { record } => {
                        presence.apply_update(record).await;
                    }
                    ServerEvent::UserOnline { user_id, at } => {
                        presence.user_online(&user_id, at).await;
                    }
                    ServerEvent::UserOffline { user_id, at } => {
                        presence.user_offline(&user_id, at).await;
                    }
                    ServerEvent::ActivityChanged {
                        user_id,
                        project_id,
                        task_id,
                        at,
                    } => {
                        presence
                            .activity_changed(&user_id, project_id, task_id, at)
                            .await;
                    }
                    ServerEvent::StatusUpdated {
                        user_id,
                        message,
                        at,
                    } => {
                        presence.status_updated(&user_id, message, at).await;
                    }
                    ServerEvent::SendAck { temp_id, .. } => {
                        // Acks resolve inside the connection manager
                        debug!("Unrouted ack for {}", temp_id);
                    }
                }
            }
            debug!("Router stopped");
        })
    }
}

impl Drop for SyncService {
    fn drop(&mut self) {
        self.router.abort();
        self.heartbeat.abort();
    }
}

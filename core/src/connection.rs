/// Connection lifecycle — one transport session per service.
/// Reconnects with bounded jittered backoff, re-joins rooms, and correlates
/// send acks; transport faults are absorbed here and never thrown upward.
use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::protocol::{ClientEvent, ServerEvent};
use crate::timer::Backoff;
use crate::transport::{Transport, TransportSession};
use crate::types::{ConversationId, Message, SyncEvent};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, Mutex, Notify, RwLock};
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Connection state of the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Not connected
    Disconnected,
    /// Attempting to connect
    Connecting,
    /// Authenticated and ready
    Connected,
}

/// Manages the single socket session and its lifecycle
#[derive(Clone)]
pub struct ConnectionManager {
    transport: Arc<dyn Transport>,
    config: SyncConfig,
    state: Arc<RwLock<ConnectionState>>,
    /// Rooms joined this session; re-joined after every reconnect
    rooms: Arc<RwLock<HashSet<ConversationId>>>,
    outbound: Arc<RwLock<Option<mpsc::UnboundedSender<ClientEvent>>>>,
    /// In-flight sends awaiting their `chat:ack`, keyed by temp_id
    pending_acks: Arc<Mutex<HashMap<String, oneshot::Sender<Result<Message>>>>>,
    dispatch: mpsc::UnboundedSender<ServerEvent>,
    events: broadcast::Sender<SyncEvent>,
    reconnect_now: Arc<Notify>,
    shutdown: Arc<RwLock<bool>>,
    run_task: Arc<Mutex<Option<tokio::task::JoinHandle<()>>>>,
}

impl ConnectionManager {
    pub fn new(
        transport: Arc<dyn Transport>,
        config: SyncConfig,
        dispatch: mpsc::UnboundedSender<ServerEvent>,
        events: broadcast::Sender<SyncEvent>,
    ) -> Self {
        Self {
            transport,
            config,
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            rooms: Arc::new(RwLock::new(HashSet::new())),
            outbound: Arc::new(RwLock::new(None)),
            pending_acks: Arc::new(Mutex::new(HashMap::new())),
            dispatch,
            events,
            reconnect_now: Arc::new(Notify::new()),
            shutdown: Arc::new(RwLock::new(false)),
            run_task: Arc::new(Mutex::new(None)),
        }
    }

    pub async fn state(&self) -> ConnectionState {
        *self.state.read().await
    }

    pub async fn rooms(&self) -> Vec<ConversationId> {
        self.rooms.read().await.iter().cloned().collect()
    }

    /// Open the session. Idempotent: a call while Connecting or Connected is
    /// a no-op. A rejected token returns `SyncError::Auth` and is not
    /// retried; a transport fault starts the background reconnect loop and
    /// still returns Ok.
    pub async fn connect(&self, token: &str) -> Result<()> {
        if *self.state.read().await != ConnectionState::Disconnected {
            debug!("connect() while already active, ignoring");
            return Ok(());
        }
        if let Some(handle) = self.run_task.lock().await.take() {
            handle.abort();
        }
        *self.shutdown.write().await = false;
        self.set_state(ConnectionState::Connecting).await;

        match self.transport.connect(token).await {
            Ok(session) => {
                self.spawn_run_loop(token, Some(session)).await;
                Ok(())
            }
            Err(SyncError::Auth(reason)) => {
                warn!("Authentication rejected: {}", reason);
                self.set_state(ConnectionState::Disconnected).await;
                let _ = self.events.send(SyncEvent::AuthFailed {
                    reason: reason.clone(),
                });
                Err(SyncError::Auth(reason))
            }
            Err(e) => {
                warn!("Initial connect failed: {}, retrying in background", e);
                self.set_state(ConnectionState::Disconnected).await;
                self.spawn_run_loop(token, None).await;
                Ok(())
            }
        }
    }

    /// Tear down the session. Pending acks fail, rooms are forgotten; the
    /// message and conversation state owned elsewhere stays intact.
    pub async fn disconnect(&self) {
        *self.shutdown.write().await = true;
        if let Some(handle) = self.run_task.lock().await.take() {
            handle.abort();
        }
        *self.outbound.write().await = None;
        self.fail_pending("disconnected").await;
        self.rooms.write().await.clear();
        self.set_state(ConnectionState::Disconnected).await;
        info!("Disconnected");
    }

    /// Foreground/network-restored wakeup: skip the current backoff sleep
    /// (and revive a parked loop) if the socket is not already connected
    pub async fn trigger_reconnect(&self) {
        if *self.state.read().await == ConnectionState::Connected {
            return;
        }
        debug!("External reconnect trigger");
        self.reconnect_now.notify_one();
    }

    /// Fire an event at the server; fails fast when not connected
    pub async fn emit(&self, event: ClientEvent) -> Result<()> {
        let guard = self.outbound.read().await;
        match guard.as_ref() {
            Some(tx) => tx
                .send(event)
                .map_err(|_| SyncError::Transport("socket task ended".to_string())),
            None => Err(SyncError::Transport("not connected".to_string())),
        }
    }

    /// Fire an ack-based event; the returned receiver resolves when the
    /// matching `chat:ack` arrives or the connection drops
    pub async fn emit_with_ack(
        &self,
        temp_id: &str,
        event: ClientEvent,
    ) -> oneshot::Receiver<Result<Message>> {
        let (tx, rx) = oneshot::channel();
        self.pending_acks
            .lock()
            .await
            .insert(temp_id.to_string(), tx);
        if let Err(e) = self.emit(event).await {
            if let Some(tx) = self.pending_acks.lock().await.remove(temp_id) {
                let _ = tx.send(Err(e));
            }
        }
        rx
    }

    /// Forget an in-flight ack (send timed out on the caller's side)
    pub async fn cancel_ack(&self, temp_id: &str) {
        self.pending_acks.lock().await.remove(temp_id);
    }

    /// Track a room for this session and join it if connected; joins are
    /// replayed on every reconnect
    pub async fn join_room(&self, conversation_id: &ConversationId) {
        let newly = self.rooms.write().await.insert(conversation_id.clone());
        if newly {
            if let Err(e) = self
                .emit(ClientEvent::Join {
                    conversation_id: conversation_id.clone(),
                })
                .await
            {
                debug!("Join for {} deferred until connect: {}", conversation_id, e);
            }
        }
    }

    async fn spawn_run_loop(&self, token: &str, first: Option<TransportSession>) {
        let manager = self.clone();
        let token = token.to_string();
        let handle = tokio::spawn(async move { manager.run_loop(token, first).await });
        *self.run_task.lock().await = Some(handle);
    }

    async fn run_loop(self, token: String, first: Option<TransportSession>) {
        let mut backoff = Backoff::new(
            self.config.reconnect_base_delay,
            self.config.reconnect_max_delay,
        );
        let mut next_session = first;

        loop {
            if *self.shutdown.read().await {
                break;
            }

            let session = match next_session.take() {
                Some(session) => session,
                None => {
                    if backoff.attempt() >= self.config.reconnect_max_attempts {
                        let attempts = backoff.attempt();
                        warn!("Reconnect schedule exhausted after {} attempts", attempts);
                        let _ = self.events.send(SyncEvent::ReconnectsExhausted { attempts });
                        // Park until a foreground/network trigger revives us
                        self.reconnect_now.notified().await;
                        if *self.shutdown.read().await {
                            break;
                        }
                        backoff.reset();
                    } else {
                        let delay = backoff.next_delay();
                        debug!("Reconnecting in {:?} (attempt {})", delay, backoff.attempt());
                        tokio::select! {
                            _ = sleep(delay) => {}
                            _ = self.reconnect_now.notified() => {
                                debug!("Backoff skipped by external trigger");
                            }
                        }
                        if *self.shutdown.read().await {
                            break;
                        }
                    }

                    self.set_state(ConnectionState::Connecting).await;
                    match self.transport.connect(&token).await {
                        Ok(session) => session,
                        Err(SyncError::Auth(reason)) => {
                            warn!("Token rejected during reconnect: {}", reason);
                            self.set_state(ConnectionState::Disconnected).await;
                            let _ = self.events.send(SyncEvent::AuthFailed { reason });
                            break;
                        }
                        Err(e) => {
                            debug!("Reconnect attempt failed: {}", e);
                            self.set_state(ConnectionState::Disconnected).await;
                            continue;
                        }
                    }
                }
            };

            backoff.reset();
            let mut inbound = session.inbound;
            *self.outbound.write().await = Some(session.outbound);
            self.set_state(ConnectionState::Connected).await;
            let rejoined = self.rejoin_rooms().await;
            info!("Connected; {} room(s) joined", rejoined);

            while let Some(event) = inbound.recv().await {
                match event {
                    ServerEvent::SendAck {
                        temp_id,
                        message,
                        error,
                    } => self.resolve_ack(temp_id, message, error).await,
                    other => {
                        if self.dispatch.send(other).is_err() {
                            // Router dropped: the service is gone
                            return;
                        }
                    }
                }
            }

            *self.outbound.write().await = None;
            self.fail_pending("connection lost").await;
            self.set_state(ConnectionState::Disconnected).await;
            if *self.shutdown.read().await {
                break;
            }
            warn!("Connection lost, scheduling reconnect");
        }
    }

    async fn rejoin_rooms(&self) -> usize {
        let rooms: Vec<ConversationId> = self.rooms.read().await.iter().cloned().collect();
        let count = rooms.len();
        for conversation_id in rooms {
            if let Err(e) = self.emit(ClientEvent::Join { conversation_id }).await {
                warn!("Room re-join failed: {}", e);
                break;
            }
        }
        count
    }

    async fn resolve_ack(&self, temp_id: String, message: Option<Message>, error: Option<String>) {
        let sender = self.pending_acks.lock().await.remove(&temp_id);
        let Some(sender) = sender else {
            debug!("Ack for unknown temp_id {}", temp_id);
            return;
        };
        let result = match (message, error) {
            (Some(message), None) => Ok(message),
            (_, Some(reason)) => Err(SyncError::SendFailed(reason)),
            (None, None) => Err(SyncError::SendFailed("empty ack".to_string())),
        };
        let _ = sender.send(result);
    }

    async fn fail_pending(&self, reason: &str) {
        let pending: Vec<_> = self.pending_acks.lock().await.drain().collect();
        for (temp_id, sender) in pending {
            debug!("Failing pending ack {}: {}", temp_id, reason);
            let _ = sender.send(Err(SyncError::SendFailed(reason.to_string())));
        }
    }

    async fn set_state(&self, next: ConnectionState) {
        let mut state = self.state.write().await;
        if *state == next {
            return;
        }
        debug!("Connection state {:?} -> {:?}", *state, next);
        *state = next;
        drop(state);
        let _ = self.events.send(SyncEvent::ConnectionChanged { state: next });
    }
}

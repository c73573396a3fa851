/// Shared stubs for unit tests
use crate::error::{Result, SyncError};
use crate::rest::{HistoryPage, RestBackend};
use crate::transport::{Transport, TransportSession};
use crate::types::{Conversation, Message, PresenceRecord, UserSummary};
use async_trait::async_trait;

/// Transport that never connects; component tests run offline
pub(crate) struct OfflineTransport;

#[async_trait]
impl Transport for OfflineTransport {
    async fn connect(&self, _token: &str) -> Result<TransportSession> {
        Err(SyncError::Transport("offline".to_string()))
    }
}

/// Backend for tests that never expect a REST call
pub(crate) struct NoRest;

#[async_trait]
impl RestBackend for NoRest {
    async fn fetch_threads(&self) -> Result<Vec<Conversation>> {
        Err(SyncError::Fetch("unexpected call".to_string()))
    }

    async fn fetch_history(
        &self,
        _conversation_id: &str,
        _before: Option<&str>,
        _limit: usize,
    ) -> Result<HistoryPage> {
        Err(SyncError::Fetch("unexpected call".to_string()))
    }

    async fn create_direct(&self, _user_id: &str) -> Result<Conversation> {
        Err(SyncError::Fetch("unexpected call".to_string()))
    }

    async fn create_group(&self, _name: &str, _member_ids: &[String]) -> Result<Conversation> {
        Err(SyncError::Fetch("unexpected call".to_string()))
    }

    async fn edit_message(
        &self,
        _conversation_id: &str,
        _message_id: &str,
        _content: &str,
    ) -> Result<Message> {
        Err(SyncError::Fetch("unexpected call".to_string()))
    }

    async fn delete_message(&self, _conversation_id: &str, _message_id: &str) -> Result<()> {
        Err(SyncError::Fetch("unexpected call".to_string()))
    }

    async fn search_users(&self, _query: &str) -> Result<Vec<UserSummary>> {
        Err(SyncError::Fetch("unexpected call".to_string()))
    }

    async fn fetch_roster(&self) -> Result<Vec<PresenceRecord>> {
        Err(SyncError::Fetch("unexpected call".to_string()))
    }
}

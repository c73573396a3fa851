/// REST backend — thread list, history pages, thread creation, edit/delete,
/// user search, presence roster snapshot
use crate::error::{Result, SyncError};
use crate::types::{Conversation, Message, PresenceRecord, UserSummary};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One page of conversation history
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryPage {
    /// Ascending by `created_at`
    pub messages: Vec<Message>,
    pub has_more: bool,
}

#[async_trait]
pub trait RestBackend: Send + Sync {
    /// All threads the local user belongs to
    async fn fetch_threads(&self) -> Result<Vec<Conversation>>;

    /// Page of messages strictly older than `before` (newest page when None),
    /// ascending by `created_at`, at most `limit` entries
    async fn fetch_history(
        &self,
        conversation_id: &str,
        before: Option<&str>,
        limit: usize,
    ) -> Result<HistoryPage>;

    async fn create_direct(&self, user_id: &str) -> Result<Conversation>;

    async fn create_group(&self, name: &str, member_ids: &[String]) -> Result<Conversation>;

    async fn edit_message(
        &self,
        conversation_id: &str,
        message_id: &str,
        content: &str,
    ) -> Result<Message>;

    async fn delete_message(&self, conversation_id: &str, message_id: &str) -> Result<()>;

    async fn search_users(&self, query: &str) -> Result<Vec<UserSummary>>;

    /// Full presence roster snapshot (socket-down fallback / initial fill)
    async fn fetch_roster(&self) -> Result<Vec<PresenceRecord>>;
}

// ─── HTTP implementation ─────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ThreadsResponse {
    threads: Vec<Conversation>,
}

#[derive(Debug, Deserialize)]
struct ThreadResponse {
    thread: Conversation,
}

#[derive(Debug, Deserialize)]
struct MessageResponse {
    message: Message,
}

#[derive(Debug, Deserialize)]
struct UsersResponse {
    users: Vec<UserSummary>,
}

#[derive(Debug, Deserialize)]
struct RosterResponse {
    roster: Vec<PresenceRecord>,
}

#[derive(Debug, Serialize)]
struct CreateDirectRequest<'a> {
    user_id: &'a str,
}

#[derive(Debug, Serialize)]
struct CreateGroupRequest<'a> {
    name: &'a str,
    member_ids: &'a [String],
}

#[derive(Debug, Serialize)]
struct EditMessageRequest<'a> {
    content: &'a str,
}

/// `RestBackend` against the product REST API
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn check(resp: reqwest::Response) -> Result<reqwest::Response> {
        if resp.status().is_success() {
            return Ok(resp);
        }
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        Err(SyncError::Fetch(format!("{}: {}", status, body)))
    }
}

#[async_trait]
impl RestBackend for HttpBackend {
    async fn fetch_threads(&self) -> Result<Vec<Conversation>> {
        let resp = self
            .client
            .get(self.url("/chat/threads"))
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| SyncError::Fetch(e.to_string()))?;
        let body: ThreadsResponse = Self::check(resp)
            .await?
            .json()
            .await
            .map_err(|e| SyncError::Fetch(e.to_string()))?;
        Ok(body.threads)
    }

    async fn fetch_history(
        &self,
        conversation_id: &str,
        before: Option<&str>,
        limit: usize,
    ) -> Result<HistoryPage> {
        let mut request = self
            .client
            .get(self.url(&format!("/chat/threads/{}/messages", conversation_id)))
            .bearer_auth(&self.token)
            .query(&[("limit", limit.to_string())]);
        if let Some(cursor) = before {
            request = request.query(&[("before", cursor)]);
        }
        let resp = request
            .send()
            .await
            .map_err(|e| SyncError::Fetch(e.to_string()))?;
        Self::check(resp)
            .await?
            .json()
            .await
            .map_err(|e| SyncError::Fetch(e.to_string()))
    }

    async fn create_direct(&self, user_id: &str) -> Result<Conversation> {
        let resp = self
            .client
            .post(self.url("/chat/threads/direct"))
            .bearer_auth(&self.token)
            .json(&CreateDirectRequest { user_id })
            .send()
            .await
            .map_err(|e| SyncError::Fetch(e.to_string()))?;
        let body: ThreadResponse = Self::check(resp)
            .await?
            .json()
            .await
            .map_err(|e| SyncError::Fetch(e.to_string()))?;
        Ok(body.thread)
    }

    async fn create_group(&self, name: &str, member_ids: &[String]) -> Result<Conversation> {
        let resp = self
            .client
            .post(self.url("/chat/threads/group"))
            .bearer_auth(&self.token)
            .json(&CreateGroupRequest { name, member_ids })
            .send()
            .await
            .map_err(|e| SyncError::Fetch(e.to_string()))?;
        let body: ThreadResponse = Self::check(resp)
            .await?
            .json()
            .await
            .map_err(|e| SyncError::Fetch(e.to_string()))?;
        Ok(body.thread)
    }

    async fn edit_message(
        &self,
        conversation_id: &str,
        message_id: &str,
        content: &str,
    ) -> Result<Message> {
        let resp = self
            .client
            .patch(self.url(&format!(
                "/chat/threads/{}/messages/{}",
                conversation_id, message_id
            )))
            .bearer_auth(&self.token)
            .json(&EditMessageRequest { content })
            .send()
            .await
            .map_err(|e| SyncError::Fetch(e.to_string()))?;
        let body: MessageResponse = Self::check(resp)
            .await?
            .json()
            .await
            .map_err(|e| SyncError::Fetch(e.to_string()))?;
        Ok(body.message)
    }

    async fn delete_message(&self, conversation_id: &str, message_id: &str) -> Result<()> {
        let resp = self
            .client
            .delete(self.url(&format!(
                "/chat/threads/{}/messages/{}",
                conversation_id, message_id
            )))
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| SyncError::Fetch(e.to_string()))?;
        Self::check(resp).await?;
        Ok(())
    }

    async fn search_users(&self, query: &str) -> Result<Vec<UserSummary>> {
        let resp = self
            .client
            .get(self.url("/users/search"))
            .bearer_auth(&self.token)
            .query(&[("q", query)])
            .send()
            .await
            .map_err(|e| SyncError::Fetch(e.to_string()))?;
        let body: UsersResponse = Self::check(resp)
            .await?
            .json()
            .await
            .map_err(|e| SyncError::Fetch(e.to_string()))?;
        Ok(body.users)
    }

    async fn fetch_roster(&self) -> Result<Vec<PresenceRecord>> {
        let resp = self
            .client
            .get(self.url("/presence/roster"))
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| SyncError::Fetch(e.to_string()))?;
        let body: RosterResponse = Self::check(resp)
            .await?
            .json()
            .await
            .map_err(|e| SyncError::Fetch(e.to_string()))?;
        Ok(body.roster)
    }
}

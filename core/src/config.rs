/// Configuration management
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// WebSocket endpoint of the realtime gateway
    pub socket_url: String,

    /// Base URL of the REST API
    pub rest_base_url: String,

    /// Messages fetched per history page
    pub page_size: usize,

    /// How long a send waits for its ack before turning Failed
    pub ack_timeout: Duration,

    /// First reconnect delay; doubles per failed attempt
    pub reconnect_base_delay: Duration,

    /// Reconnect delay ceiling
    pub reconnect_max_delay: Duration,

    /// Consecutive failed attempts before the reconnect loop parks
    pub reconnect_max_attempts: u32,

    /// Idle time after the last keystroke before typing auto-stops
    pub typing_debounce: Duration,

    /// Safety expiry for remote typing entries with a lost stop event
    pub typing_ttl: Duration,

    /// Presence heartbeat period while connected
    pub heartbeat_interval: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            socket_url: "ws://127.0.0.1:4000/ws".to_string(),
            rest_base_url: "http://127.0.0.1:4000/api".to_string(),
            page_size: 50,
            ack_timeout: Duration::from_secs(10),
            reconnect_base_delay: Duration::from_secs(1),
            reconnect_max_delay: Duration::from_secs(30),
            reconnect_max_attempts: 10,
            typing_debounce: Duration::from_secs(2),
            typing_ttl: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(30),
        }
    }
}

impl SyncConfig {
    /// Apply environment overrides (nice for embedding shells and tests)
    pub fn apply_env(mut self) -> Self {
        if let Ok(url) = std::env::var("TEAMSYNC_SOCKET_URL") {
            self.socket_url = url;
        }
        if let Ok(url) = std::env::var("TEAMSYNC_REST_URL") {
            self.rest_base_url = url;
        }
        if let Some(n) = std::env::var("TEAMSYNC_PAGE_SIZE")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
        {
            self.page_size = n.max(1);
        }
        if let Some(secs) = std::env::var("TEAMSYNC_HEARTBEAT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
        {
            self.heartbeat_interval = Duration::from_secs(secs);
        }
        self
    }
}

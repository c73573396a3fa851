/// Transport seam — the engine reaches the realtime gateway through this trait
use crate::error::{Result, SyncError};
use crate::protocol::{ClientEvent, ServerEvent};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
use tracing::{debug, warn};

const AUTH_TIMEOUT: Duration = Duration::from_secs(10);

/// Channel pair for one live socket session. The engine writes `ClientEvent`s
/// into `outbound`; `inbound` closing means the connection dropped.
pub struct TransportSession {
    pub outbound: mpsc::UnboundedSender<ClientEvent>,
    pub inbound: mpsc::UnboundedReceiver<ServerEvent>,
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a fresh authenticated session. A rejected token must map to
    /// `SyncError::Auth`; any recoverable fault is `SyncError::Transport`.
    async fn connect(&self, token: &str) -> Result<TransportSession>;
}

/// Authentication message sent first on every new socket
#[derive(Debug, Serialize)]
struct AuthRequest<'a> {
    #[serde(rename = "type")]
    event: &'static str,
    token: &'a str,
}

/// Gateway response to the auth message
#[derive(Debug, Deserialize)]
struct AuthReply {
    success: bool,
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// WebSocket transport speaking the JSON event vocabulary over text frames
pub struct WebSocketTransport {
    url: String,
}

impl WebSocketTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn connect(&self, token: &str) -> Result<TransportSession> {
        debug!("Connecting to {}", self.url);
        let (ws_stream, _) = connect_async(&self.url)
            .await
            .map_err(|e| SyncError::Transport(format!("connect {}: {}", self.url, e)))?;
        let (mut sink, mut stream) = ws_stream.split();

        // Authenticate before anything else flows
        let auth = serde_json::to_string(&AuthRequest {
            event: "auth",
            token,
        })?;
        sink.send(WsMessage::Text(auth))
            .await
            .map_err(|e| SyncError::Transport(format!("auth send: {}", e)))?;

        let reply = match timeout(AUTH_TIMEOUT, stream.next()).await {
            Ok(Some(Ok(WsMessage::Text(text)))) => serde_json::from_str::<AuthReply>(&text)
                .map_err(|e| SyncError::Transport(format!("invalid auth reply: {}", e)))?,
            Ok(Some(Ok(WsMessage::Close(_)))) | Ok(None) => {
                return Err(SyncError::Transport(
                    "connection closed during auth".to_string(),
                ));
            }
            Ok(Some(Ok(_))) => {
                return Err(SyncError::Transport(
                    "unexpected frame during auth".to_string(),
                ));
            }
            Ok(Some(Err(e))) => {
                return Err(SyncError::Transport(format!("auth read: {}", e)));
            }
            Err(_) => {
                return Err(SyncError::Timeout("auth reply".to_string()));
            }
        };

        if !reply.success {
            let reason = reply.error.unwrap_or_else(|| "token rejected".to_string());
            return Err(SyncError::Auth(reason));
        }
        debug!("Authenticated as {:?}", reply.user_id);

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ClientEvent>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<ServerEvent>();

        // Writer: serialize engine events onto the socket as text frames
        tokio::spawn(async move {
            while let Some(event) = out_rx.recv().await {
                let json = match event.to_json() {
                    Ok(json) => json,
                    Err(e) => {
                        warn!("Failed to serialize {}: {}", event, e);
                        continue;
                    }
                };
                if let Err(e) = sink.send(WsMessage::Text(json)).await {
                    debug!("Socket write failed: {}", e);
                    break;
                }
            }
        });

        // Reader: parse text frames into engine events; exiting drops in_tx,
        // which the connection manager observes as a disconnect
        tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                match frame {
                    Ok(WsMessage::Text(text)) => match ServerEvent::from_json(&text) {
                        Ok(event) => {
                            if in_tx.send(event).is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            warn!("Unparseable server event: {} (raw: {})", e, text);
                        }
                    },
                    Ok(WsMessage::Close(_)) => {
                        debug!("Socket closed by server");
                        break;
                    }
                    Ok(_) => {
                        // Binary, ping and pong frames carry nothing for us
                    }
                    Err(e) => {
                        debug!("Socket read failed: {}", e);
                        break;
                    }
                }
            }
        });

        Ok(TransportSession {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}

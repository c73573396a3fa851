/// TeamSync Core - Realtime Chat & Presence Engine
///
/// Client-side synchronization layer for the TeamSync workforce suite:
/// connection lifecycle, optimistic message sends, ordered pagination,
/// typing indicators, and presence tracking over an unreliable transport.

pub mod config;
pub mod connection;
pub mod conversations;
pub mod error;
pub mod message_store;
pub mod presence;
pub mod protocol;
pub mod rest;
pub mod send;
pub mod service;
pub mod timer;
pub mod transport;
pub mod typing;
pub mod types;

#[cfg(test)]
pub(crate) mod testutil;

pub use config::SyncConfig;
pub use connection::ConnectionState;
pub use error::{Result, SyncError};
pub use rest::{HttpBackend, RestBackend};
pub use service::SyncService;
pub use transport::{Transport, WebSocketTransport};
pub use types::SyncEvent;

//! Outbound port: the capability set the broker needs from a subscriber
//! transport. The broadcast engine only ever talks to this trait, so tests
//! substitute in-memory fakes and the WebSocket adapter stays at the edge.

use crate::domain::types::WsMessage;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Identity of one subscriber connection.
///
/// UUID v7, so identifiers are time-ordered and usable for log correlation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A failed write to a subscriber. Any variant marks the peer dead.
#[derive(Debug, Error)]
pub enum PeerError {
    #[error("serialize error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("transport error: {0}")]
    Transport(String),
}

/// One live subscriber's transport handle.
///
/// Writes are expected to be serialized by the caller; the broker never
/// issues concurrent writes to the same peer. Per-write deadlines are
/// enforced by the caller wrapping these futures in a timeout.
#[async_trait]
pub trait Peer: Send + Sync {
    /// Connection identity, stable for the lifetime of the peer.
    fn id(&self) -> ConnectionId;

    /// Serialize and send one message frame.
    async fn send_json(&self, message: &WsMessage) -> Result<(), PeerError>;

    /// Protocol-level keep-alive ping.
    async fn send_ping(&self) -> Result<(), PeerError>;

    /// Terminate the transport. Idempotent, best-effort.
    async fn close(&self);
}

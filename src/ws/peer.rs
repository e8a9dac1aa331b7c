//! WebSocket-backed implementation of the subscriber transport port.

use crate::domain::types::WsMessage;
use crate::ports::{ConnectionId, Peer, PeerError};
use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::SplitSink;
use futures_util::SinkExt;
use tokio::sync::Mutex;

/// The write half of a subscriber socket.
///
/// Both the broadcast engine and the session's control replies write
/// through this; the mutex serializes them onto the sink.
pub struct WsPeer {
    id: ConnectionId,
    sink: Mutex<SplitSink<WebSocket, Message>>,
}

impl WsPeer {
    pub fn new(sink: SplitSink<WebSocket, Message>) -> Self {
        Self {
            id: ConnectionId::new(),
            sink: Mutex::new(sink),
        }
    }
}

#[async_trait]
impl Peer for WsPeer {
    fn id(&self) -> ConnectionId {
        self.id
    }

    async fn send_json(&self, message: &WsMessage) -> Result<(), PeerError> {
        let text = serde_json::to_string(message)?;
        let mut sink = self.sink.lock().await;
        sink.send(Message::Text(text))
            .await
            .map_err(|e| PeerError::Transport(e.to_string()))
    }

    async fn send_ping(&self) -> Result<(), PeerError> {
        let mut sink = self.sink.lock().await;
        sink.send(Message::Ping(Vec::new()))
            .await
            .map_err(|e| PeerError::Transport(e.to_string()))
    }

    async fn close(&self) {
        let mut sink = self.sink.lock().await;
        let _ = sink.send(Message::Close(None)).await;
        let _ = sink.close().await;
    }
}

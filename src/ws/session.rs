//! Subscriber session lifecycle.
//!
//! One task per upgraded socket: attach to the filter, answer client
//! control messages, keep the connection alive with protocol pings, and
//! detach on any exit path. Event frames arrive on the shared write half
//! from the broadcast engine, not from this loop.

use crate::domain::config::SubscriptionsConfig;
use crate::domain::types::WsMessage;
use crate::ports::Peer;
use crate::subscription::SubscriptionManager;
use crate::ws::peer::WsPeer;
use axum::extract::ws::{Message, WebSocket};
use futures_util::StreamExt;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Drive one subscriber connection to completion.
pub async fn run(
    socket: WebSocket,
    filter_key: String,
    manager: Arc<SubscriptionManager>,
    config: SubscriptionsConfig,
) {
    let (sink, mut stream) = socket.split();
    let peer = Arc::new(WsPeer::new(sink));
    let write_timeout = config.write_timeout;

    if let Err(err) = manager
        .attach(&filter_key, Arc::clone(&peer) as Arc<dyn Peer>)
        .await
    {
        let frame = WsMessage::new(
            "error",
            json!({
                "error": err.to_string(),
                "errorCode": err.code(),
                "filterKey": filter_key,
            }),
        );
        send(&peer, write_timeout, &frame).await;
        peer.close().await;
        return;
    }

    let welcome = WsMessage::new(
        "connected",
        json!({
            "filterKey": filter_key,
            "status": "connected",
            "message": "Successfully connected to filter subscription",
        }),
    );
    if !send(&peer, write_timeout, &welcome).await {
        warn!(connection_id = %peer.id(), "failed to send welcome message");
    }

    info!(connection_id = %peer.id(), filter_key = %filter_key, "subscriber connected");

    let ping_period = config.ping_period();
    let mut ping_timer =
        tokio::time::interval_at(Instant::now() + ping_period, ping_period);
    let mut pong_deadline = Instant::now() + config.pong_wait;

    loop {
        let idle = tokio::time::sleep_until(pong_deadline);
        tokio::select! {
            _ = idle => {
                info!(connection_id = %peer.id(), "closing subscriber: pong timeout");
                break;
            }
            _ = ping_timer.tick() => {
                match tokio::time::timeout(write_timeout, peer.send_ping()).await {
                    Ok(Ok(())) => {}
                    Ok(Err(error)) => {
                        warn!(connection_id = %peer.id(), %error, "failed to send ping");
                        break;
                    }
                    Err(_) => {
                        warn!(connection_id = %peer.id(), "ping write timed out");
                        break;
                    }
                }
            }
            inbound = stream.next() => {
                let message = match inbound {
                    Some(Ok(message)) => message,
                    Some(Err(error)) => {
                        debug!(connection_id = %peer.id(), %error, "subscriber read error");
                        break;
                    }
                    None => break,
                };
                match message {
                    Message::Text(text) => {
                        if !handle_client_text(&manager, &filter_key, &peer, write_timeout, &text).await {
                            break;
                        }
                    }
                    Message::Binary(data) => {
                        let Ok(text) = String::from_utf8(data) else { continue };
                        if !handle_client_text(&manager, &filter_key, &peer, write_timeout, &text).await {
                            break;
                        }
                    }
                    Message::Pong(_) => {
                        pong_deadline = Instant::now() + config.pong_wait;
                    }
                    // Client pings are answered at the protocol layer.
                    Message::Ping(_) => {}
                    Message::Close(_) => {
                        debug!(connection_id = %peer.id(), "subscriber sent close");
                        break;
                    }
                }
            }
        }
    }

    manager.detach(&filter_key, peer.id()).await;
    peer.close().await;
    info!(connection_id = %peer.id(), filter_key = %filter_key, "subscriber disconnected");
}

/// Parse one inbound text frame and send the reply, if any. Returns false
/// when the session should end.
async fn handle_client_text(
    manager: &SubscriptionManager,
    filter_key: &str,
    peer: &Arc<WsPeer>,
    write_timeout: Duration,
    text: &str,
) -> bool {
    let message: serde_json::Value = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(error) => {
            debug!(connection_id = %peer.id(), %error, "unparsable client message");
            return false;
        }
    };

    match control_reply(manager, filter_key, message).await {
        Some(reply) => send(peer, write_timeout, &reply).await,
        None => true,
    }
}

/// Build the reply for one client control message.
///
/// `ping` gets a `pong`, `get_filter` gets the subscription view, and any
/// other typed message is echoed back. Untyped messages are ignored.
async fn control_reply(
    manager: &SubscriptionManager,
    filter_key: &str,
    message: serde_json::Value,
) -> Option<WsMessage> {
    let msg_type = message.get("type")?.as_str()?;
    match msg_type {
        "ping" => Some(WsMessage::new("pong", json!({"status": "alive"}))),
        "get_filter" => {
            let view = manager.get_subscription(filter_key).await?;
            let data = serde_json::to_value(&view).ok()?;
            Some(WsMessage::new("filter_info", data))
        }
        _ => Some(WsMessage::new("echo", message)),
    }
}

/// Write one frame with a fresh deadline. Returns false on failure.
async fn send(peer: &WsPeer, write_timeout: Duration, message: &WsMessage) -> bool {
    match tokio::time::timeout(write_timeout, peer.send_json(message)).await {
        Ok(Ok(())) => true,
        Ok(Err(error)) => {
            warn!(%error, "failed to write control frame");
            false
        }
        Err(_) => {
            warn!("control frame write timed out");
            false
        }
    }
}

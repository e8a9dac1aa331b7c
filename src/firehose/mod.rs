//! Upstream firehose ingest adapter.
//!
//! Connects to a JSON event-stream endpoint (a Jetstream-style relay that
//! serves AT Protocol commits as JSON frames), decodes each frame into a
//! [`CommitEvent`], and hands it to the broadcast engine. Binary CAR
//! decoding never happens here; the broker consumes the JSON
//! representation only.

use crate::domain::config::FirehoseConfig;
use crate::domain::types::{rfc3339_nanos, CommitEvent, CommitOp};
use crate::metrics::Metrics;
use crate::subscription::SubscriptionManager;
use chrono::DateTime;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// The ingest task: one upstream connection with reconnect handling.
pub struct FirehoseClient {
    config: FirehoseConfig,
    manager: Arc<SubscriptionManager>,
    metrics: Arc<Metrics>,
}

/// Handle to the running ingest task.
pub struct FirehoseHandle {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl FirehoseHandle {
    /// Signal the task to stop and wait for it to drain.
    pub async fn stop(self) {
        let _ = self.stop.send(true);
        let _ = self.handle.await;
        info!("stopped firehose ingest");
    }
}

#[derive(Debug, Error)]
enum PumpError {
    #[error("stream closed by upstream")]
    Closed,

    #[error("no frame within the read timeout")]
    ReadTimeout,

    #[error("transport error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),
}

impl FirehoseClient {
    pub fn new(
        config: FirehoseConfig,
        manager: Arc<SubscriptionManager>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            config,
            manager,
            metrics,
        }
    }

    /// Spawn the connect/pump/reconnect loop.
    pub fn spawn(self) -> FirehoseHandle {
        let (stop, stopped) = watch::channel(false);
        let handle = tokio::spawn(self.run(stopped));
        FirehoseHandle { stop, handle }
    }

    async fn run(self, mut stopped: watch::Receiver<bool>) {
        let mut attempts = 0u32;
        loop {
            if *stopped.borrow() {
                break;
            }

            info!(url = %self.config.url, "connecting to firehose");
            match connect_async(self.config.url.as_str()).await {
                Ok((stream, _)) => {
                    info!("connected to firehose");
                    attempts = 0;
                    match self.pump(stream, &mut stopped).await {
                        // A clean return means stop was requested.
                        Ok(()) => break,
                        Err(error) => warn!(%error, "firehose stream ended"),
                    }
                }
                Err(error) => {
                    warn!(%error, "failed to connect to firehose");
                }
            }

            attempts += 1;
            if self.config.max_reconnects > 0 && attempts >= self.config.max_reconnects {
                error!(attempts, "giving up on firehose after repeated failures");
                break;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.reconnect_delay) => {}
                _ = stopped.changed() => break,
            }
        }
    }

    /// Read frames until stop, error, or read-timeout.
    async fn pump(
        &self,
        stream: WsStream,
        stopped: &mut watch::Receiver<bool>,
    ) -> Result<(), PumpError> {
        let (mut sink, mut stream) = stream.split();
        let mut ping_timer = tokio::time::interval_at(
            Instant::now() + self.config.ping_interval,
            self.config.ping_interval,
        );

        loop {
            tokio::select! {
                _ = stopped.changed() => {
                    let _ = sink.send(Message::Close(None)).await;
                    return Ok(());
                }
                _ = ping_timer.tick() => {
                    sink.send(Message::Ping(Vec::new())).await?;
                }
                frame = tokio::time::timeout(self.config.read_timeout, stream.next()) => {
                    match frame {
                        Err(_) => return Err(PumpError::ReadTimeout),
                        Ok(None) => return Err(PumpError::Closed),
                        Ok(Some(Err(error))) => return Err(error.into()),
                        Ok(Some(Ok(Message::Text(text)))) => {
                            self.metrics.messages_received.inc();
                            match decode_event(&text) {
                                Some(event) => self.manager.broadcast(&event).await,
                                None => debug!("skipped non-commit frame"),
                            }
                        }
                        // Binary frames are the CBOR firehose framing; this
                        // adapter only consumes the JSON representation.
                        Ok(Some(Ok(_))) => {}
                    }
                }
            }
        }
    }
}

/// Jetstream-style commit frame.
#[derive(Debug, Deserialize)]
struct JetstreamFrame {
    did: String,
    #[serde(default)]
    time_us: i64,
    kind: String,
    commit: Option<JetstreamCommit>,
}

#[derive(Debug, Deserialize)]
struct JetstreamCommit {
    operation: String,
    collection: String,
    rkey: String,
    #[serde(default)]
    record: Option<serde_json::Value>,
    #[serde(default)]
    cid: Option<String>,
}

/// Decode one text frame into a commit event.
///
/// Accepts either the broker's own event shape (frames carrying `ops`,
/// handy for test relays) or a Jetstream commit frame. Anything else —
/// identity and account events included — decodes to `None`.
fn decode_event(text: &str) -> Option<CommitEvent> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;

    if value.get("ops").is_some() {
        return serde_json::from_value(value).ok();
    }

    let frame: JetstreamFrame = serde_json::from_value(value).ok()?;
    if frame.kind != "commit" {
        return None;
    }
    let commit = frame.commit?;

    let time = DateTime::from_timestamp_micros(frame.time_us)
        .map(rfc3339_nanos)
        .unwrap_or_default();

    Some(CommitEvent {
        event: String::new(),
        did: frame.did,
        time,
        kind: frame.kind,
        ops: vec![CommitOp {
            action: commit.operation,
            path: format!("{}/{}", commit.collection, commit.rkey),
            collection: commit.collection,
            rkey: commit.rkey,
            record: commit.record,
            cid: commit.cid,
        }],
    })
}

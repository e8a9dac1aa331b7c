//! Prometheus metrics for the broker.
//!
//! One `Metrics` value owns its registry; nothing is registered globally,
//! so tests can build as many instances as they like.

use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use tracing::warn;

pub struct Metrics {
    registry: Registry,
    /// Current number of active subscriber connections.
    pub websocket_connections: IntGauge,
    /// Frames received from the firehose.
    pub messages_received: IntCounter,
    /// Events sent to subscribers, labeled by the keyword that matched.
    pub messages_sent: IntCounterVec,
    pub filters_created: IntCounter,
    pub filters_deleted: IntCounter,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let websocket_connections = IntGauge::new(
            "websocket_connections",
            "Current number of active WebSocket connections",
        )?;
        let messages_received = IntCounter::new(
            "messages_received_total",
            "Total number of messages received from the firehose",
        )?;
        let messages_sent = IntCounterVec::new(
            Opts::new(
                "messages_sent_total",
                "Total number of messages sent to clients",
            ),
            &["keyword"],
        )?;
        let filters_created =
            IntCounter::new("filters_created_total", "Total number of filters created")?;
        let filters_deleted =
            IntCounter::new("filters_deleted_total", "Total number of filters deleted")?;

        registry.register(Box::new(websocket_connections.clone()))?;
        registry.register(Box::new(messages_received.clone()))?;
        registry.register(Box::new(messages_sent.clone()))?;
        registry.register(Box::new(filters_created.clone()))?;
        registry.register(Box::new(filters_deleted.clone()))?;

        Ok(Self {
            registry,
            websocket_connections,
            messages_received,
            messages_sent,
            filters_created,
            filters_deleted,
        })
    }

    /// Render the registry in Prometheus text exposition format.
    pub fn render(&self) -> String {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(error) = encoder.encode(&self.registry.gather(), &mut buffer) {
            warn!(%error, "failed to encode metrics");
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

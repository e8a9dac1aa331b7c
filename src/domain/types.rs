//! Wire types shared by the ingest, subscription, and API surfaces.
//!
//! Field names follow the JSON protocol (camelCase where the protocol uses
//! camelCase), so these types serialize directly onto the wire.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Filter criteria supplied at subscription creation. Immutable afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterOptions {
    /// Exact-match repository DID, or empty for any repository.
    pub repository: String,
    /// Operation path prefix, or empty for any path.
    #[serde(rename = "pathPrefix")]
    pub path_prefix: String,
    /// Comma-separated keyword list. Required at creation.
    pub keyword: String,
}

impl FilterOptions {
    /// True when no criteria are set at all.
    pub fn is_empty(&self) -> bool {
        self.repository.is_empty() && self.path_prefix.is_empty() && self.keyword.is_empty()
    }
}

/// A repository commit event as decoded by the ingest adapter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommitEvent {
    pub event: String,
    pub did: String,
    pub time: String,
    pub kind: String,
    pub ops: Vec<CommitOp>,
}

/// A single create/update/delete within a commit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommitOp {
    pub action: String,
    pub path: String,
    pub collection: String,
    pub rkey: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cid: Option<String>,
}

/// Timing metadata attached to every forwarded event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventTimestamps {
    /// The event's own timestamp as produced upstream.
    pub original: String,
    /// When the broker entered `broadcast` for this event.
    pub received: String,
    /// Just before the write to this specific subscriber.
    pub forwarded: String,
    /// Which filter matched.
    #[serde(rename = "filterKey")]
    pub filter_key: String,
}

/// The envelope delivered to subscribers: the event plus timing metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedEvent {
    #[serde(flatten)]
    pub event: CommitEvent,
    pub timestamps: EventTimestamps,
}

/// Wrapper for every frame the broker writes to a subscriber socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WsMessage {
    #[serde(rename = "type")]
    pub msg_type: String,
    pub timestamp: DateTime<Utc>,
    pub data: serde_json::Value,
}

impl WsMessage {
    pub fn new(msg_type: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            msg_type: msg_type.into(),
            timestamp: Utc::now(),
            data,
        }
    }

    pub fn at(msg_type: impl Into<String>, timestamp: DateTime<Utc>, data: serde_json::Value) -> Self {
        Self {
            msg_type: msg_type.into(),
            timestamp,
            data,
        }
    }
}

/// Read-only snapshot of one subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionView {
    #[serde(rename = "filterKey")]
    pub filter_key: String,
    pub options: FilterOptions,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    pub connections: usize,
}

/// Registry-wide statistics snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub active_filters: usize,
    pub total_connections: usize,
    pub max_connections: usize,
    pub available_connections: usize,
    /// Formatted to one decimal, e.g. `"12.5%"`.
    pub connection_utilization: String,
    pub avg_connections: f64,
    pub uptime: String,
}

/// Standard REST response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ApiResponse {
    pub fn ok(message: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Some(data),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: None,
        }
    }
}

/// Request body for `POST /api/filters/create`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CreateFilterRequest {
    pub options: FilterOptions,
}

/// Response body for a successful filter creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateFilterResponse {
    #[serde(rename = "filterKey")]
    pub filter_key: String,
    pub options: FilterOptions,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

/// RFC 3339 with nanoseconds, the timestamp format used on the wire.
pub fn rfc3339_nanos(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

//! Subscription registry, admission control, and event fan-out.
//!
//! One `SubscriptionManager` owns the table of live filters. The table and
//! the global connection counter sit behind a registry-wide `RwLock`; each
//! filter's connection set and activity timestamp sit behind that record's
//! own `RwLock`. Lock order is always registry before filter, and no write
//! to a subscriber socket ever happens with either guard held.

use super::matcher;
use super::validate::validate_options;
use crate::domain::config::SubscriptionsConfig;
use crate::domain::error::{AttachError, ValidationError};
use crate::domain::key::generate_filter_key;
use crate::domain::types::{
    rfc3339_nanos, CommitEvent, EnrichedEvent, EventTimestamps, FilterOptions, StatsSnapshot,
    SubscriptionView, WsMessage,
};
use crate::metrics::Metrics;
use crate::ports::{ConnectionId, Peer};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// One live filter: immutable criteria plus mutable connection state.
struct FilterRecord {
    key: String,
    options: FilterOptions,
    created_at: DateTime<Utc>,
    state: RwLock<FilterState>,
}

#[derive(Default)]
struct FilterState {
    connections: HashMap<ConnectionId, Arc<dyn Peer>>,
    /// Wall-clock of the most recent attach; `None` until the first one.
    last_active_at: Option<DateTime<Utc>>,
}

impl FilterRecord {
    async fn view(&self) -> SubscriptionView {
        let state = self.state.read().await;
        SubscriptionView {
            filter_key: self.key.clone(),
            options: self.options.clone(),
            created_at: self.created_at,
            connections: state.connections.len(),
        }
    }
}

/// Registry table and global counter, guarded together.
#[derive(Default)]
struct Registry {
    filters: HashMap<String, Arc<FilterRecord>>,
    total_connections: usize,
    shutting_down: bool,
}

/// Thread-safe filter registry with admission control and broadcast fan-out.
pub struct SubscriptionManager {
    registry: RwLock<Registry>,
    max_connections: usize,
    write_timeout: Duration,
    grace_period: Duration,
    metrics: Arc<Metrics>,
    started_at: Instant,
}

impl SubscriptionManager {
    pub fn new(config: &SubscriptionsConfig, metrics: Arc<Metrics>) -> Self {
        Self {
            registry: RwLock::new(Registry::default()),
            max_connections: config.max_connections,
            write_timeout: config.write_timeout,
            grace_period: config.grace_period,
            metrics,
            started_at: Instant::now(),
        }
    }

    /// Validate criteria, mint a key, and insert a new filter record.
    pub async fn create_filter(
        &self,
        options: FilterOptions,
    ) -> Result<String, ValidationError> {
        validate_options(&options)?;

        let key = generate_filter_key();
        self.metrics.filters_created.inc();

        let record = Arc::new(FilterRecord {
            key: key.clone(),
            options,
            created_at: Utc::now(),
            state: RwLock::new(FilterState::default()),
        });

        let mut reg = self.registry.write().await;
        reg.filters.insert(key.clone(), record);
        info!(filter_key = key_preview(&key), "created filter");

        Ok(key)
    }

    /// Snapshot one subscription.
    pub async fn get_subscription(&self, filter_key: &str) -> Option<SubscriptionView> {
        let reg = self.registry.read().await;
        let record = reg.filters.get(filter_key)?;
        Some(record.view().await)
    }

    /// Snapshot every subscription. No ordering is guaranteed.
    pub async fn list_subscriptions(&self) -> Vec<SubscriptionView> {
        let reg = self.registry.read().await;
        let mut views = Vec::with_capacity(reg.filters.len());
        for record in reg.filters.values() {
            views.push(record.view().await);
        }
        views
    }

    /// Admit a subscriber onto a filter.
    pub async fn attach(
        &self,
        filter_key: &str,
        peer: Arc<dyn Peer>,
    ) -> Result<(), AttachError> {
        let mut reg = self.registry.write().await;

        if reg.shutting_down {
            return Err(AttachError::ShuttingDown);
        }
        if reg.total_connections >= self.max_connections {
            warn!(
                max_connections = self.max_connections,
                "connection rejected: maximum connections reached"
            );
            return Err(AttachError::MaxConnectionsReached {
                total: reg.total_connections,
                max: self.max_connections,
            });
        }

        let record = match reg.filters.get(filter_key) {
            Some(record) => Arc::clone(record),
            None => {
                warn!(
                    filter_key = key_preview(filter_key),
                    "attach to non-existent filter"
                );
                return Err(AttachError::InvalidFilterKey);
            }
        };

        let filter_connections = {
            let mut state = record.state.write().await;
            let inserted = state.connections.insert(peer.id(), peer).is_none();
            state.last_active_at = Some(Utc::now());
            if !inserted {
                // Set insertion is idempotent; the counter only moves for
                // genuinely new peers.
                return Ok(());
            }
            state.connections.len()
        };

        reg.total_connections += 1;
        self.metrics
            .websocket_connections
            .set(reg.total_connections as i64);
        info!(
            filter_key = key_preview(filter_key),
            filter_connections,
            total_connections = reg.total_connections,
            max_connections = self.max_connections,
            "subscriber attached"
        );
        Ok(())
    }

    /// Remove a subscriber from a filter. Deletes the filter eagerly when
    /// its last connection leaves.
    pub async fn detach(&self, filter_key: &str, id: ConnectionId) {
        let mut reg = self.registry.write().await;
        let Some(record) = reg.filters.get(filter_key).map(Arc::clone) else {
            return;
        };

        let remaining = {
            let mut state = record.state.write().await;
            if state.connections.remove(&id).is_none() {
                return;
            }
            state.connections.len()
        };

        reg.total_connections -= 1;
        self.metrics
            .websocket_connections
            .set(reg.total_connections as i64);
        info!(
            filter_key = key_preview(filter_key),
            filter_connections = remaining,
            total_connections = reg.total_connections,
            "subscriber detached"
        );

        if remaining == 0 {
            reg.filters.remove(filter_key);
            self.metrics.filters_deleted.inc();
            info!(
                filter_key = key_preview(filter_key),
                "removed filter with no remaining connections"
            );
        }
    }

    /// Fan one event out to every matching filter's subscribers.
    ///
    /// Failed writes are collected while the registry read guard is held
    /// and reaped after it is released, so the hot path never escalates to
    /// the write guard.
    pub async fn broadcast(&self, event: &CommitEvent) {
        let received_at = Utc::now();
        let mut dead: Vec<(Arc<FilterRecord>, Vec<(ConnectionId, Arc<dyn Peer>)>)> = Vec::new();
        let mut match_count = 0usize;

        {
            let reg = self.registry.read().await;
            for record in reg.filters.values() {
                if !matcher::matches(event, &record.options) {
                    continue;
                }
                match_count += 1;

                let dead_peers = self.deliver(record, event, received_at).await;
                if !dead_peers.is_empty() {
                    dead.push((Arc::clone(record), dead_peers));
                }

                for term in matcher::matching_terms(event, &record.options.keyword) {
                    self.metrics.messages_sent.with_label_values(&[term]).inc();
                }
            }
        }

        if !dead.is_empty() {
            self.reap_dead(dead).await;
        }

        if match_count > 0 {
            debug!(did = %event.did, match_count, "broadcast event to matching filters");
        }
    }

    /// Write one event to every peer of one filter. Returns the peers whose
    /// writes failed; the caller removes them once the registry read guard
    /// is gone.
    async fn deliver(
        &self,
        record: &FilterRecord,
        event: &CommitEvent,
        received_at: DateTime<Utc>,
    ) -> Vec<(ConnectionId, Arc<dyn Peer>)> {
        // Snapshot the connection set so writes happen without the filter
        // guard held and a concurrent detach never waits on a slow socket.
        let peers: Vec<(ConnectionId, Arc<dyn Peer>)> = {
            let state = record.state.read().await;
            state
                .connections
                .iter()
                .map(|(id, peer)| (*id, Arc::clone(peer)))
                .collect()
        };
        if peers.is_empty() {
            return Vec::new();
        }

        let forwarded_at = Utc::now();
        let envelope = EnrichedEvent {
            event: event.clone(),
            timestamps: EventTimestamps {
                original: event.time.clone(),
                received: rfc3339_nanos(received_at),
                forwarded: rfc3339_nanos(forwarded_at),
                filter_key: record.key.clone(),
            },
        };
        let data = match serde_json::to_value(&envelope) {
            Ok(data) => data,
            Err(error) => {
                warn!(%error, "failed to serialize outbound envelope");
                return Vec::new();
            }
        };
        let message = WsMessage::at("event", forwarded_at, data);

        let mut dead = Vec::new();
        for (id, peer) in peers {
            match tokio::time::timeout(self.write_timeout, peer.send_json(&message)).await {
                Ok(Ok(())) => {
                    debug!(
                        filter_key = key_preview(&record.key),
                        connection_id = %id,
                        did = %event.did,
                        "forwarded event"
                    );
                }
                Ok(Err(error)) => {
                    warn!(connection_id = %id, %error, "failed to send event to subscriber");
                    dead.push((id, peer));
                }
                Err(_) => {
                    warn!(connection_id = %id, "subscriber write timed out");
                    dead.push((id, peer));
                }
            }
        }
        dead
    }

    /// Remove peers whose writes failed and release their transports.
    async fn reap_dead(
        &self,
        dead: Vec<(Arc<FilterRecord>, Vec<(ConnectionId, Arc<dyn Peer>)>)>,
    ) {
        let mut removed_total = 0usize;
        let mut to_close: Vec<Arc<dyn Peer>> = Vec::new();

        for (record, peers) in dead {
            let mut removed = 0usize;
            {
                let mut state = record.state.write().await;
                for (id, peer) in peers {
                    if state.connections.remove(&id).is_some() {
                        removed += 1;
                    }
                    to_close.push(peer);
                }
            }
            if removed > 0 {
                info!(
                    filter_key = key_preview(&record.key),
                    removed, "cleaned up dead connections"
                );
            }
            removed_total += removed;
        }

        if removed_total > 0 {
            let mut reg = self.registry.write().await;
            reg.total_connections -= removed_total;
            self.metrics
                .websocket_connections
                .set(reg.total_connections as i64);
        }

        for peer in to_close {
            peer.close().await;
        }
    }

    /// Delete filters that have sat with zero connections past the grace
    /// period. `now` is injected so tests can drive the clock. Returns the
    /// number of filters deleted.
    pub async fn reap_idle(&self, now: DateTime<Utc>) -> usize {
        let grace = chrono::Duration::from_std(self.grace_period)
            .unwrap_or(chrono::Duration::MAX);

        let mut reg = self.registry.write().await;
        let mut doomed = Vec::new();
        for (key, record) in reg.filters.iter() {
            let state = record.state.read().await;
            if !state.connections.is_empty() {
                continue;
            }
            let idle_since = state.last_active_at.unwrap_or(record.created_at);
            if now.signed_duration_since(idle_since) > grace {
                doomed.push(key.clone());
            }
        }

        for key in &doomed {
            reg.filters.remove(key);
            self.metrics.filters_deleted.inc();
            info!(filter_key = key_preview(key), "reaped idle filter");
        }
        doomed.len()
    }

    /// Registry-wide statistics snapshot.
    pub async fn stats(&self) -> StatsSnapshot {
        let reg = self.registry.read().await;
        let active_filters = reg.filters.len();
        let utilization =
            reg.total_connections as f64 / self.max_connections.max(1) as f64 * 100.0;

        StatsSnapshot {
            active_filters,
            total_connections: reg.total_connections,
            max_connections: self.max_connections,
            available_connections: self.max_connections - reg.total_connections,
            connection_utilization: format!("{utilization:.1}%"),
            avg_connections: reg.total_connections as f64 / active_filters.max(1) as f64,
            uptime: format_uptime(self.started_at.elapsed()),
        }
    }

    /// Stop admitting subscribers, close every peer, and clear the
    /// registry. Safe to call more than once.
    pub async fn shutdown(&self) {
        let records: Vec<Arc<FilterRecord>> = {
            let mut reg = self.registry.write().await;
            if reg.shutting_down {
                return;
            }
            reg.shutting_down = true;
            let records = reg.filters.values().map(Arc::clone).collect();
            reg.filters.clear();
            reg.total_connections = 0;
            records
        };

        let mut closed = 0usize;
        for record in records {
            let peers: Vec<Arc<dyn Peer>> = {
                let mut state = record.state.write().await;
                state.connections.drain().map(|(_, peer)| peer).collect()
            };
            for peer in peers {
                peer.close().await;
                closed += 1;
            }
        }

        self.metrics.websocket_connections.set(0);
        info!(closed, "subscription manager shut down");
    }

    /// Fleet-wide connection cap.
    pub fn max_connections(&self) -> usize {
        self.max_connections
    }
}

/// First eight characters of a key, for log lines. Char-boundary safe,
/// since attach targets come straight off the URL path.
fn key_preview(key: &str) -> &str {
    match key.char_indices().nth(8) {
        Some((idx, _)) => &key[..idx],
        None => key,
    }
}

fn format_uptime(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    if secs >= 3600 {
        format!("{}h{}m{}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    } else if secs >= 60 {
        format!("{}m{}s", secs / 60, secs % 60)
    } else {
        format!("{secs}s")
    }
}

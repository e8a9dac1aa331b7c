//! End-to-end exercises of the subscription engine with in-memory peers.

use async_trait::async_trait;
use atproto_pubsub::domain::config::SubscriptionsConfig;
use atproto_pubsub::domain::types::{
    CommitEvent, CommitOp, EnrichedEvent, FilterOptions, WsMessage,
};
use atproto_pubsub::metrics::Metrics;
use atproto_pubsub::{ConnectionId, Peer, PeerError, SubscriptionManager};
use chrono::Utc;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

struct TestPeer {
    id: ConnectionId,
    fail_writes: AtomicBool,
    write_delay: Option<Duration>,
    received: Mutex<Vec<WsMessage>>,
    closed: AtomicBool,
}

impl TestPeer {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            id: ConnectionId::new(),
            fail_writes: AtomicBool::new(false),
            write_delay: None,
            received: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        })
    }

    fn failing() -> Arc<Self> {
        let peer = Self::new();
        peer.fail_writes.store(true, Ordering::SeqCst);
        peer
    }

    fn stalled(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            id: ConnectionId::new(),
            fail_writes: AtomicBool::new(false),
            write_delay: Some(delay),
            received: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        })
    }

    fn received(&self) -> Vec<WsMessage> {
        self.received.lock().unwrap().clone()
    }

    fn envelopes(&self) -> Vec<EnrichedEvent> {
        self.received()
            .into_iter()
            .filter(|m| m.msg_type == "event")
            .map(|m| serde_json::from_value(m.data).unwrap())
            .collect()
    }
}

#[async_trait]
impl Peer for TestPeer {
    fn id(&self) -> ConnectionId {
        self.id
    }

    async fn send_json(&self, message: &WsMessage) -> Result<(), PeerError> {
        if let Some(delay) = self.write_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(PeerError::Transport("broken pipe".into()));
        }
        self.received.lock().unwrap().push(message.clone());
        Ok(())
    }

    async fn send_ping(&self) -> Result<(), PeerError> {
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

fn manager() -> SubscriptionManager {
    manager_with(SubscriptionsConfig::default())
}

fn manager_with(config: SubscriptionsConfig) -> SubscriptionManager {
    SubscriptionManager::new(&config, Arc::new(Metrics::new().unwrap()))
}

fn post_event(did: &str, path: &str, text: &str) -> CommitEvent {
    CommitEvent {
        did: did.into(),
        time: "2024-06-01T12:00:00Z".into(),
        kind: "commit".into(),
        ops: vec![CommitOp {
            action: "create".into(),
            path: path.into(),
            record: Some(json!({ "text": text })),
            ..Default::default()
        }],
        ..Default::default()
    }
}

#[tokio::test]
async fn exact_repository_match_delivers_with_timestamps() {
    let manager = manager();
    let key = manager
        .create_filter(FilterOptions {
            repository: "did:plc:abc".into(),
            keyword: "test".into(),
            ..Default::default()
        })
        .await
        .unwrap();
    let peer = TestPeer::new();
    manager.attach(&key, peer.clone()).await.unwrap();

    manager
        .broadcast(&post_event(
            "did:plc:abc",
            "app.bsky.feed.post/1",
            "this is a test",
        ))
        .await;
    manager
        .broadcast(&post_event(
            "did:plc:other",
            "app.bsky.feed.post/2",
            "this is a test",
        ))
        .await;

    let envelopes = peer.envelopes();
    assert_eq!(envelopes.len(), 1);
    assert_eq!(envelopes[0].timestamps.filter_key, key);
    assert_eq!(envelopes[0].timestamps.original, "2024-06-01T12:00:00Z");
    assert!(!envelopes[0].timestamps.received.is_empty());
    assert!(!envelopes[0].timestamps.forwarded.is_empty());
}

#[tokio::test]
async fn path_prefix_with_keyword_miss_is_not_delivered() {
    let manager = manager();
    let key = manager
        .create_filter(FilterOptions {
            path_prefix: "app.bsky.feed.post".into(),
            keyword: "foo".into(),
            ..Default::default()
        })
        .await
        .unwrap();
    let peer = TestPeer::new();
    manager.attach(&key, peer.clone()).await.unwrap();

    manager
        .broadcast(&post_event("did:plc:abc", "app.bsky.feed.post/2", "bar"))
        .await;

    assert!(peer.envelopes().is_empty());
}

#[tokio::test]
async fn comma_separated_keywords_match_case_insensitively() {
    let manager = manager();
    let key = manager
        .create_filter(FilterOptions {
            keyword: "cats, dogs ,birds".into(),
            ..Default::default()
        })
        .await
        .unwrap();
    let peer = TestPeer::new();
    manager.attach(&key, peer.clone()).await.unwrap();

    let event = post_event("did:plc:abc", "app.bsky.feed.post/1", "my DOG is great");
    manager.broadcast(&event).await;

    assert_eq!(peer.envelopes().len(), 1);
    assert_eq!(
        atproto_pubsub::subscription::matcher::matching_terms(&event, "cats, dogs ,birds"),
        vec!["dogs"]
    );
}

#[tokio::test]
async fn dead_peer_is_reclaimed_before_next_broadcast() {
    let manager = manager();
    let key = manager
        .create_filter(FilterOptions {
            keyword: "test".into(),
            ..Default::default()
        })
        .await
        .unwrap();
    let dead = TestPeer::failing();
    let live = TestPeer::new();
    manager.attach(&key, dead.clone()).await.unwrap();
    manager.attach(&key, live.clone()).await.unwrap();
    assert_eq!(manager.stats().await.total_connections, 2);

    manager
        .broadcast(&post_event("did:plc:abc", "app.bsky.feed.post/1", "a test"))
        .await;

    let view = manager.get_subscription(&key).await.unwrap();
    assert_eq!(view.connections, 1);
    assert_eq!(manager.stats().await.total_connections, 1);
    assert!(dead.closed.load(Ordering::SeqCst));
    assert_eq!(live.envelopes().len(), 1);
}

#[tokio::test]
async fn cap_is_enforced_across_filters() {
    let manager = manager_with(SubscriptionsConfig {
        max_connections: 2,
        ..Default::default()
    });
    let first = manager
        .create_filter(FilterOptions {
            keyword: "rust".into(),
            ..Default::default()
        })
        .await
        .unwrap();
    let second = manager
        .create_filter(FilterOptions {
            keyword: "tokio".into(),
            ..Default::default()
        })
        .await
        .unwrap();

    manager.attach(&first, TestPeer::new()).await.unwrap();
    manager.attach(&second, TestPeer::new()).await.unwrap();
    let err = manager.attach(&first, TestPeer::new()).await.unwrap_err();
    assert_eq!(err.code(), "MAX_CONNECTIONS_REACHED");
}

#[tokio::test]
async fn never_attached_filter_is_reaped_after_grace() {
    let manager = manager();
    let key = manager
        .create_filter(FilterOptions {
            keyword: "rust".into(),
            ..Default::default()
        })
        .await
        .unwrap();

    assert_eq!(manager.reap_idle(Utc::now()).await, 0);
    let past_grace = Utc::now() + chrono::Duration::minutes(11);
    assert_eq!(manager.reap_idle(past_grace).await, 1);
    assert!(manager.get_subscription(&key).await.is_none());
}

#[tokio::test]
async fn events_arrive_in_broadcast_order_per_peer() {
    let manager = manager();
    let key = manager
        .create_filter(FilterOptions {
            keyword: "seq".into(),
            ..Default::default()
        })
        .await
        .unwrap();
    let a = TestPeer::new();
    let b = TestPeer::new();
    manager.attach(&key, a.clone()).await.unwrap();
    manager.attach(&key, b.clone()).await.unwrap();

    for i in 0..20 {
        manager
            .broadcast(&post_event(
                "did:plc:abc",
                "app.bsky.feed.post/1",
                &format!("seq {i}"),
            ))
            .await;
    }

    for peer in [a, b] {
        let texts: Vec<String> = peer
            .envelopes()
            .iter()
            .map(|e| e.event.ops[0].record.as_ref().unwrap()["text"]
                .as_str()
                .unwrap()
                .to_string())
            .collect();
        let expected: Vec<String> = (0..20).map(|i| format!("seq {i}")).collect();
        assert_eq!(texts, expected);
    }
}

#[tokio::test]
async fn slow_peer_does_not_block_others_past_the_deadline() {
    let manager = manager_with(SubscriptionsConfig {
        write_timeout: Duration::from_millis(100),
        ..Default::default()
    });
    let key = manager
        .create_filter(FilterOptions {
            keyword: "test".into(),
            ..Default::default()
        })
        .await
        .unwrap();
    let stalled = TestPeer::stalled(Duration::from_secs(60));
    let live = TestPeer::new();
    manager.attach(&key, stalled.clone()).await.unwrap();
    manager.attach(&key, live.clone()).await.unwrap();

    let started = std::time::Instant::now();
    manager
        .broadcast(&post_event("did:plc:abc", "app.bsky.feed.post/1", "a test"))
        .await;
    assert!(started.elapsed() < Duration::from_secs(5));

    assert_eq!(live.envelopes().len(), 1);
    assert_eq!(manager.get_subscription(&key).await.unwrap().connections, 1);
    assert!(stalled.closed.load(Ordering::SeqCst));
}

#[tokio::test]
async fn connection_counter_matches_sum_of_filters() {
    let manager = manager();
    let mut keys = Vec::new();
    for keyword in ["alpha", "bravo", "charlie"] {
        keys.push(
            manager
                .create_filter(FilterOptions {
                    keyword: keyword.into(),
                    ..Default::default()
                })
                .await
                .unwrap(),
        );
    }

    let mut peers = Vec::new();
    for key in &keys {
        for _ in 0..3 {
            let peer = TestPeer::new();
            manager.attach(key, peer.clone()).await.unwrap();
            peers.push((key.clone(), peer));
        }
    }

    // Detach one peer per filter, broadcast in between.
    for (i, (key, peer)) in peers.iter().enumerate() {
        if i % 3 == 0 {
            manager.detach(key, peer.id()).await;
            manager
                .broadcast(&post_event("did:plc:abc", "p", "alpha bravo charlie"))
                .await;
        }
    }

    let views = manager.list_subscriptions().await;
    let sum: usize = views.iter().map(|v| v.connections).sum();
    assert_eq!(manager.stats().await.total_connections, sum);
    assert_eq!(sum, 6);
}

#[tokio::test]
async fn full_lifecycle_create_attach_receive_detach() {
    let manager = manager();
    let options = FilterOptions {
        repository: "did:plc:abc".into(),
        path_prefix: "app.bsky.feed.post".into(),
        keyword: "hello".into(),
    };
    let key = manager.create_filter(options.clone()).await.unwrap();

    let view = manager.get_subscription(&key).await.unwrap();
    assert_eq!(view.options, options);

    let peer = TestPeer::new();
    manager.attach(&key, peer.clone()).await.unwrap();

    manager
        .broadcast(&post_event(
            "did:plc:abc",
            "app.bsky.feed.post/1",
            "hello world",
        ))
        .await;
    assert_eq!(peer.envelopes().len(), 1);

    manager.detach(&key, peer.id()).await;
    assert!(manager.get_subscription(&key).await.is_none());
    assert_eq!(manager.stats().await.total_connections, 0);
}

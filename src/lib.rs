//! Filtered publish/subscribe broker for the AT Protocol firehose.
//!
//! Subscribers register declarative filters (repository, path prefix,
//! keywords) over REST, then attach a WebSocket to receive only the commit
//! events that match, in real time. The broker enforces back-pressure via
//! per-connection write deadlines, a fleet-wide connection cap, and
//! periodic reclamation of idle filter state.
//!
//! # Architecture
//!
//! ```text
//!  firehose (JSON stream)          REST clients        WebSocket subscribers
//!          │                            │                       │
//!   ┌──────┴──────┐             ┌───────┴───────┐        ┌──────┴──────┐
//!   │  firehose   │             │     api       │        │  ws session │
//!   │  adapter    │             │   handlers    │        │   + peer    │
//!   └──────┬──────┘             └───────┬───────┘        └──────┬──────┘
//!          │ broadcast(event)           │ create/list/stats     │ attach/detach
//!   ┌──────┴────────────────────────────┴───────────────────────┴──────┐
//!   │                      SubscriptionManager                          │
//!   │   registry RwLock ── filter records ── per-filter RwLock          │
//!   │   matcher (pure)  ── fan-out with write deadlines ── reaper       │
//!   └───────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The subscription engine only ever writes through the [`ports::Peer`]
//! trait, so the WebSocket transport stays at the edge and tests use
//! in-memory fakes.

#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod api;
pub mod domain;
pub mod firehose;
pub mod metrics;
pub mod ports;
pub mod service;
pub mod subscription;
pub mod ws;

pub use domain::config::Config;
pub use domain::error::{AttachError, ServiceError, ValidationError};
pub use ports::{ConnectionId, Peer, PeerError};
pub use service::PubSubService;
pub use subscription::{Reaper, SubscriptionManager};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

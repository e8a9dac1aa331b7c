//! Error taxonomy surfaced at the broker's boundaries.

use thiserror::Error;

/// Filter criteria rejection. Messages are surfaced verbatim to callers,
/// so they name the offending field or term.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Keyword filter is required. Filters must include keywords to prevent forwarding the entire firehose.")]
    KeywordRequired,

    #[error("Repository filter must contain at least 3 letters")]
    RepositoryTooShort,

    #[error("Path prefix filter must contain at least 3 letters")]
    PathPrefixTooShort,

    #[error("Keyword '{0}' must contain at least 3 letters")]
    KeywordTooShort(String),
}

/// Reasons an attach can be refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AttachError {
    #[error("Maximum connections limit reached ({total}/{max})")]
    MaxConnectionsReached { total: usize, max: usize },

    #[error("Invalid filter key")]
    InvalidFilterKey,

    #[error("Server is shutting down")]
    ShuttingDown,
}

impl AttachError {
    /// Wire-visible error code for the subscriber error frame.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MaxConnectionsReached { .. } => "MAX_CONNECTIONS_REACHED",
            Self::InvalidFilterKey => "INVALID_FILTER_KEY",
            Self::ShuttingDown => "SHUTTING_DOWN",
        }
    }
}

/// Service-level errors (startup and wiring, not per-request).
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("server bind error: {0}")]
    Bind(#[source] std::io::Error),

    #[error("metrics registration error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("server error: {0}")]
    Server(#[source] std::io::Error),
}

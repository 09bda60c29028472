//! Reader error definitions.

use std::time::Duration;

use thiserror::Error;

use crate::registry::{ConfigDigest, DomainId};

/// Errors returned by [`ConfigReader`](crate::reader::ConfigReader).
///
/// Store failures never appear here; they are retried every tick and only
/// show up in snapshots, logs and metrics.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReaderError {
    #[error("reader already started")]
    AlreadyStarted,

    #[error("reader is closed")]
    Closed,

    #[error("domain not subscribed: {0}")]
    UnknownDomain(DomainId),

    /// The domain has not completed a sync yet. Resolves within one interval.
    #[error("domain {0} has not synced yet")]
    NotSynced(DomainId),

    /// Not in either slot nor in retained history.
    #[error("config {0} not found")]
    DigestNotFound(ConfigDigest),

    #[error("tick timeout {tick_timeout:?} must be positive and shorter than poll interval {poll_interval:?}")]
    InvalidTiming {
        tick_timeout: Duration,
        poll_interval: Duration,
    },

    #[error("domains not synced before deadline: {}", .pending.iter().map(|d| d.as_str()).collect::<Vec<_>>().join(", "))]
    NotReady { pending: Vec<DomainId> },
}

/// Result type for reader queries.
pub type ReaderResult<T> = Result<T, ReaderError>;

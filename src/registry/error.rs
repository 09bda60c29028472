//! Registry error definitions.

use thiserror::Error;

use crate::registry::types::ConfigDigest;

/// Rejections raised while validating a proposed configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Node list empty or larger than the bitmap can address.
    #[error("node count {count} outside 1..={max}")]
    NodeCountOutOfBounds { count: usize, max: usize },

    #[error("duplicate identity key at node {index}")]
    DuplicateIdentityKey { index: usize },

    #[error("duplicate auxiliary key at node {index}")]
    DuplicateAuxiliaryKey { index: usize },

    /// Bitmap references a node index that does not exist.
    #[error("scope {scope_id} references a node index >= {node_count}")]
    MemberIndexOutOfBounds { scope_id: u64, node_count: usize },

    #[error("scope {scope_id} requires {min_quorum} observers but only has {members} members")]
    QuorumTooHigh {
        scope_id: u64,
        min_quorum: u64,
        members: usize,
    },

    #[error("duplicate scope {scope_id}")]
    DuplicateScope { scope_id: u64 },

    /// Rejected by the authoritative store, which names the rule but not
    /// the offending node or scope.
    #[error("store rejected config: {0}")]
    Rejected(RejectedRule),
}

/// Validation rule reported without position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RejectedRule {
    #[error("node count out of bounds")]
    NodeCountOutOfBounds,
    #[error("duplicate identity key")]
    DuplicateIdentityKey,
    #[error("duplicate auxiliary key")]
    DuplicateAuxiliaryKey,
    #[error("member index out of bounds")]
    MemberIndexOutOfBounds,
    #[error("quorum above member count")]
    QuorumTooHigh,
    #[error("duplicate scope")]
    DuplicateScope,
}

/// Broad category of a registry failure, deciding how callers recover.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Bad input; fix and retry.
    Validation,
    /// Another actor moved the slot; re-read and retry.
    Concurrency,
    /// Caller logic error; not retryable without changing intent.
    ProtocolInvariant,
    /// Read path only.
    NotFound,
}

/// Errors returned by registry transitions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("invalid config: {0}")]
    Validation(#[from] ValidationError),

    /// The slot no longer holds what the caller expected.
    #[error("config digest mismatch: expected {expected}, found {actual}")]
    DigestMismatch {
        expected: ConfigDigest,
        actual: ConfigDigest,
    },

    #[error("proposal is identical to the current candidate")]
    NoOpTransitionNotAllowed,

    #[error("revoking the zero digest is not allowed")]
    RevokingZeroDigestNotAllowed,

    #[error("promoting the zero digest is not allowed")]
    PromotingZeroDigestNotAllowed,

    #[error("config version counter exhausted")]
    VersionOverflow,

    #[error("config {0} not found")]
    DigestNotFound(ConfigDigest),
}

impl RegistryError {
    pub fn class(&self) -> ErrorClass {
        match self {
            RegistryError::Validation(_) => ErrorClass::Validation,
            RegistryError::DigestMismatch { .. } => ErrorClass::Concurrency,
            RegistryError::NoOpTransitionNotAllowed
            | RegistryError::RevokingZeroDigestNotAllowed
            | RegistryError::PromotingZeroDigestNotAllowed
            | RegistryError::VersionOverflow => ErrorClass::ProtocolInvariant,
            RegistryError::DigestNotFound(_) => ErrorClass::NotFound,
        }
    }

    /// True if re-reading current state and retrying can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self.class(), ErrorClass::Concurrency)
    }
}

/// Result type for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;

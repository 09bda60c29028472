//! Store error definitions.

use std::time::Duration;

use thiserror::Error;

use crate::registry::{DomainId, RegistryError};

/// Errors returned by a [`ConfigStore`](crate::store::ConfigStore).
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// The registry rejected the operation.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("unknown domain: {0}")]
    UnknownDomain(DomainId),

    #[error("domain already registered: {0}")]
    DomainExists(DomainId),

    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("store call timed out after {0:?}")]
    Timeout(Duration),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Two reads disagreed, e.g. a digest vanished between calls.
    #[error("inconsistent read: {0}")]
    Inconsistent(String),

    #[error("wallet error: {0}")]
    Wallet(String),

    #[error("transaction reverted: {0}")]
    Reverted(String),
}

impl StoreError {
    /// Transport failures that a later retry may clear.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StoreError::Rpc(_)
                | StoreError::Timeout(_)
                | StoreError::Unavailable(_)
                | StoreError::Inconsistent(_)
        )
    }

    /// The registry error, if the store rejected the operation on protocol grounds.
    pub fn registry_error(&self) -> Option<&RegistryError> {
        match self {
            StoreError::Registry(e) => Some(e),
            _ => None,
        }
    }
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(StoreError::Rpc("connection refused".into()).is_transient());
        assert!(StoreError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(StoreError::Inconsistent("digest vanished".into()).is_transient());
        assert!(!StoreError::UnknownDomain("d".into()).is_transient());
        assert!(!StoreError::Registry(RegistryError::NoOpTransitionNotAllowed).is_transient());
    }

    #[test]
    fn test_registry_error_passthrough() {
        let err = StoreError::from(RegistryError::RevokingZeroDigestNotAllowed);
        assert_eq!(err.to_string(), "revoking the zero digest is not allowed");
        assert_eq!(
            err.registry_error(),
            Some(&RegistryError::RevokingZeroDigestNotAllowed)
        );
    }
}

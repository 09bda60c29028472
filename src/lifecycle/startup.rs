//! Startup orchestration.
//!
//! # Responsibilities
//! - Build the configured store and register every domain with it
//! - Start the reader and wait for the first full sync
//!
//! # Design Decisions
//! - Fail fast on configuration problems; a store that is unreachable at
//!   startup is logged and retried by the reader instead
//! - Subsystems initialize in order, not concurrently

use std::sync::Arc;

use thiserror::Error;

use crate::config::{AppConfig, StoreBackend};
use crate::reader::{ConfigReader, ReaderError, ReaderSettings};
use crate::store::evm::signer_from_env;
use crate::store::{ConfigStore, EvmConfigStore, InMemoryConfigStore, StoreError};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("domain '{domain}': {reason}")]
    Domain { domain: String, reason: String },

    #[error("the memory backend does not outlive this process; configure store.backend = \"evm\"")]
    EphemeralStore,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Reader(#[from] ReaderError),
}

/// Whether the caller intends to submit transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    ReadOnly,
    ReadWrite,
}

/// Reject backends whose state is lost when the process exits.
///
/// Each CLI invocation builds its own store, so a proposal staged in memory
/// would be gone before the next `promote` could see it.
pub fn require_durable_store(config: &AppConfig) -> Result<(), StartupError> {
    match config.store.backend {
        StoreBackend::Memory => Err(StartupError::EphemeralStore),
        StoreBackend::Evm => Ok(()),
    }
}

/// Build the configured store with every domain registered.
pub async fn build_store(
    config: &AppConfig,
    access: Access,
) -> Result<Arc<dyn ConfigStore>, StartupError> {
    match config.store.backend {
        StoreBackend::Memory => {
            let store = InMemoryConfigStore::new();
            for domain in &config.domains {
                let spec = domain
                    .to_spec(config.reader.retained_history)
                    .map_err(|reason| StartupError::Domain {
                        domain: domain.name.clone(),
                        reason,
                    })?;
                store.register_domain(spec)?;
            }
            tracing::info!(domains = config.domains.len(), "In-memory store ready");
            Ok(Arc::new(store))
        }
        StoreBackend::Evm => {
            let signer = match access {
                Access::ReadWrite => Some(signer_from_env()?),
                Access::ReadOnly => None,
            };
            let store = EvmConfigStore::connect(&config.store, signer)?;
            for domain in &config.domains {
                let registry = domain.registry_address().map_err(|reason| StartupError::Domain {
                    domain: domain.name.clone(),
                    reason,
                })?;
                store.register_domain(domain.name.as_str().into(), registry);
            }

            if let Err(e) = store.verify_chain_id().await {
                // Don't fail startup; the reader retries every tick.
                tracing::warn!(error = %e, "Store initialized but chain verification failed");
            }
            Ok(Arc::new(store))
        }
    }
}

/// Subscribe every configured domain, start polling and wait for readiness.
///
/// A readiness timeout is logged, not fatal: queries keep working and the
/// lagging domains catch up on later ticks.
pub async fn start_reader(
    config: &AppConfig,
    store: Arc<dyn ConfigStore>,
) -> Result<ConfigReader, StartupError> {
    let reader = ConfigReader::new(store, ReaderSettings::from(&config.reader));
    for domain in &config.domains {
        reader.subscribe(domain.name.as_str())?;
    }
    reader.start(config.reader.poll_interval())?;

    match reader.wait_until_ready(config.reader.wait_ready_timeout()).await {
        Ok(()) => tracing::info!(domains = config.domains.len(), "Config reader ready"),
        Err(ReaderError::NotReady { pending }) => tracing::warn!(
            pending = ?pending,
            "Config reader not ready before deadline; continuing"
        ),
        Err(e) => return Err(e.into()),
    }
    Ok(reader)
}

//! Authoritative configuration stores.
//!
//! # Data Flow
//! ```text
//! caller (CLI, tests)
//!     → ConfigStore::set_candidate / promote / revoke
//!     → registry transition, linearized per domain by the store
//!     → StoreEvent broadcast (ConfigSet, ConfigPromoted, ...)
//!
//! ConfigReader
//!     → ConfigStore::get_config_digests + get_config
//! ```
//!
//! # Implementations
//! - `memory.rs`: process-local store over a concurrent map
//! - `evm.rs`: on-chain registry contract over JSON-RPC
//!
//! # Design Decisions
//! - Object-safe async trait so readers hold `Arc<dyn ConfigStore>`
//! - Every mutation is all-or-nothing; a failed call leaves the domain untouched

pub mod error;
pub mod evm;
pub mod memory;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::registry::{ConfigDigest, DomainId, DynamicConfig, RegistryEvent, StaticConfig, VersionedConfig};

pub use error::{StoreError, StoreResult};
pub use evm::EvmConfigStore;
pub use memory::InMemoryConfigStore;

/// Capacity of the store notification channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// A registry notification tagged with its domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreEvent {
    pub domain: DomainId,
    pub event: RegistryEvent,
}

/// Transactional, per-domain authoritative registry.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Stage a candidate. Returns the new digest.
    async fn set_candidate(
        &self,
        domain: &DomainId,
        static_config: StaticConfig,
        dynamic_config: DynamicConfig,
        expected_candidate: ConfigDigest,
    ) -> StoreResult<ConfigDigest>;

    async fn promote_candidate_and_revoke_active(
        &self,
        domain: &DomainId,
        to_promote: ConfigDigest,
        to_revoke: ConfigDigest,
    ) -> StoreResult<()>;

    async fn revoke_candidate(&self, domain: &DomainId, digest: ConfigDigest) -> StoreResult<()>;

    /// Look up a config by digest. `None` for unknown or zero digests.
    async fn get_config(
        &self,
        domain: &DomainId,
        digest: ConfigDigest,
    ) -> StoreResult<Option<VersionedConfig>>;

    /// `(active, candidate)`; zero marks an empty slot.
    async fn get_config_digests(&self, domain: &DomainId)
        -> StoreResult<(ConfigDigest, ConfigDigest)>;

    /// Both slots with their contents.
    async fn get_all_configs(
        &self,
        domain: &DomainId,
    ) -> StoreResult<(Option<VersionedConfig>, Option<VersionedConfig>)> {
        let (active, candidate) = self.get_config_digests(domain).await?;
        let active = self.get_config(domain, active).await?;
        let candidate = self.get_config(domain, candidate).await?;
        Ok((active, candidate))
    }

    /// Subscribe to notifications for all domains.
    fn subscribe(&self) -> broadcast::Receiver<StoreEvent>;
}

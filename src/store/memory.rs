//! Process-local configuration store.
//!
//! # Design Decisions
//! - One `DashMap` entry per domain; a mutation holds that entry's shard lock
//!   for the whole read-transition-commit, so each domain has a single
//!   global order of writes
//! - Events are published before the lock is released, so subscribers see
//!   them in commit order
//! - Reads clone out of the map and never hold a lock across an await

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::observability::metrics;
use crate::registry::{
    ConfigDigest, ConfigRegistry, DomainId, DomainSpec, DynamicConfig, RegistryResult,
    RegistryState, StaticConfig, Transition, VersionedConfig,
};
use crate::store::error::{StoreError, StoreResult};
use crate::store::{ConfigStore, StoreEvent, EVENT_CHANNEL_CAPACITY};

struct DomainEntry {
    registry: ConfigRegistry,
    state: RegistryState,
}

/// In-memory [`ConfigStore`].
#[derive(Clone)]
pub struct InMemoryConfigStore {
    domains: Arc<DashMap<DomainId, DomainEntry>>,
    events: broadcast::Sender<StoreEvent>,
}

impl InMemoryConfigStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            domains: Arc::new(DashMap::new()),
            events,
        }
    }

    /// Create an empty domain.
    pub fn register_domain(&self, spec: DomainSpec) -> StoreResult<()> {
        use dashmap::mapref::entry::Entry;

        match self.domains.entry(spec.id.clone()) {
            Entry::Occupied(_) => Err(StoreError::DomainExists(spec.id)),
            Entry::Vacant(slot) => {
                tracing::debug!(domain = %spec.id, prefix = spec.digest_prefix, "Domain registered");
                slot.insert(DomainEntry {
                    registry: ConfigRegistry::new(spec),
                    state: RegistryState::new(),
                });
                Ok(())
            }
        }
    }

    /// Registered domain IDs, sorted.
    pub fn domains(&self) -> Vec<DomainId> {
        let mut ids: Vec<_> = self.domains.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Copy of a domain's full state, including retained history.
    pub fn state(&self, domain: &DomainId) -> StoreResult<RegistryState> {
        self.domains
            .get(domain)
            .map(|e| e.state.clone())
            .ok_or_else(|| StoreError::UnknownDomain(domain.clone()))
    }

    fn read<T>(&self, domain: &DomainId, f: impl FnOnce(&RegistryState) -> T) -> StoreResult<T> {
        self.domains
            .get(domain)
            .map(|e| f(&e.state))
            .ok_or_else(|| StoreError::UnknownDomain(domain.clone()))
    }

    /// Run one transition under the domain lock and commit it on success.
    fn mutate<T>(
        &self,
        domain: &DomainId,
        operation: &'static str,
        f: impl FnOnce(&ConfigRegistry, &RegistryState) -> RegistryResult<Transition<T>>,
    ) -> StoreResult<T> {
        let mut entry = self
            .domains
            .get_mut(domain)
            .ok_or_else(|| StoreError::UnknownDomain(domain.clone()))?;

        let transition = match f(&entry.registry, &entry.state) {
            Ok(t) => t,
            Err(e) => {
                tracing::debug!(domain = %domain, operation, error = %e, "Transition rejected");
                metrics::record_transition(domain.as_str(), operation, "rejected");
                return Err(e.into());
            }
        };

        entry.state = transition.state;
        for event in transition.events {
            tracing::info!(
                domain = %domain,
                event = event.name(),
                digest = %event.digest(),
                "Registry event"
            );
            // No receivers is fine.
            let _ = self.events.send(StoreEvent {
                domain: domain.clone(),
                event,
            });
        }
        metrics::record_transition(domain.as_str(), operation, "ok");
        Ok(transition.output)
    }
}

impl Default for InMemoryConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConfigStore for InMemoryConfigStore {
    async fn set_candidate(
        &self,
        domain: &DomainId,
        static_config: StaticConfig,
        dynamic_config: DynamicConfig,
        expected_candidate: ConfigDigest,
    ) -> StoreResult<ConfigDigest> {
        self.mutate(domain, "set_candidate", |registry, state| {
            registry.set_candidate(state, static_config, dynamic_config, expected_candidate)
        })
    }

    async fn promote_candidate_and_revoke_active(
        &self,
        domain: &DomainId,
        to_promote: ConfigDigest,
        to_revoke: ConfigDigest,
    ) -> StoreResult<()> {
        self.mutate(domain, "promote", |registry, state| {
            registry.promote_candidate_and_revoke_active(state, to_promote, to_revoke)
        })
    }

    async fn revoke_candidate(&self, domain: &DomainId, digest: ConfigDigest) -> StoreResult<()> {
        self.mutate(domain, "revoke_candidate", |registry, state| {
            registry.revoke_candidate(state, digest)
        })
    }

    async fn get_config(
        &self,
        domain: &DomainId,
        digest: ConfigDigest,
    ) -> StoreResult<Option<VersionedConfig>> {
        self.read(domain, |state| state.get_config(digest).cloned())
    }

    async fn get_config_digests(
        &self,
        domain: &DomainId,
    ) -> StoreResult<(ConfigDigest, ConfigDigest)> {
        self.read(domain, RegistryState::config_digests)
    }

    async fn get_all_configs(
        &self,
        domain: &DomainId,
    ) -> StoreResult<(Option<VersionedConfig>, Option<VersionedConfig>)> {
        self.read(domain, |state| {
            let (active, candidate) = state.all_configs();
            (active.cloned(), candidate.cloned())
        })
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }
}

//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, Bytes, B256, U256};
use async_trait::async_trait;
use tokio::sync::broadcast;

use committee_registry::registry::{
    ConfigDigest, DomainId, DomainSeparator, DomainSpec, DynamicConfig, Node, SourceScope,
    StaticConfig, VersionedConfig,
};
use committee_registry::store::{ConfigStore, InMemoryConfigStore, StoreError, StoreEvent, StoreResult};

/// Store wrapper that can go offline or slow down reads on demand.
///
/// Writes always pass through so tests can mutate state during an outage.
pub struct FlakyStore {
    inner: InMemoryConfigStore,
    offline: AtomicBool,
    read_delay_ms: AtomicU64,
    reads: AtomicUsize,
}

impl FlakyStore {
    pub fn new(inner: InMemoryConfigStore) -> Arc<Self> {
        Arc::new(Self {
            inner,
            offline: AtomicBool::new(false),
            read_delay_ms: AtomicU64::new(0),
            reads: AtomicUsize::new(0),
        })
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn set_read_delay(&self, delay: Duration) {
        self.read_delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Number of read calls that reached the store (successful or not).
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    async fn before_read(&self) -> StoreResult<()> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let delay = self.read_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected outage".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl ConfigStore for FlakyStore {
    async fn set_candidate(
        &self,
        domain: &DomainId,
        static_config: StaticConfig,
        dynamic_config: DynamicConfig,
        expected_candidate: ConfigDigest,
    ) -> StoreResult<ConfigDigest> {
        self.inner
            .set_candidate(domain, static_config, dynamic_config, expected_candidate)
            .await
    }

    async fn promote_candidate_and_revoke_active(
        &self,
        domain: &DomainId,
        to_promote: ConfigDigest,
        to_revoke: ConfigDigest,
    ) -> StoreResult<()> {
        self.inner
            .promote_candidate_and_revoke_active(domain, to_promote, to_revoke)
            .await
    }

    async fn revoke_candidate(&self, domain: &DomainId, digest: ConfigDigest) -> StoreResult<()> {
        self.inner.revoke_candidate(domain, digest).await
    }

    async fn get_config(
        &self,
        domain: &DomainId,
        digest: ConfigDigest,
    ) -> StoreResult<Option<VersionedConfig>> {
        self.before_read().await?;
        self.inner.get_config(domain, digest).await
    }

    async fn get_config_digests(
        &self,
        domain: &DomainId,
    ) -> StoreResult<(ConfigDigest, ConfigDigest)> {
        self.before_read().await?;
        self.inner.get_config_digests(domain).await
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.inner.subscribe()
    }
}

pub fn spec(name: &str) -> DomainSpec {
    DomainSpec::new(name, DomainSeparator::evm(31337, Address::repeat_byte(0x5f)), 0x000b)
        .with_retained_history(4)
}

/// In-memory store with the given domains registered.
pub fn memory_store(domains: &[&str]) -> InMemoryConfigStore {
    let store = InMemoryConfigStore::new();
    for name in domains {
        store.register_domain(spec(name)).unwrap();
    }
    store
}

/// Committee of `n` nodes with distinct keys.
pub fn static_config(n: u8) -> StaticConfig {
    StaticConfig {
        nodes: (1..=n)
            .map(|i| Node {
                identity_key: B256::repeat_byte(i),
                auxiliary_key: B256::repeat_byte(0x80 | i),
            })
            .collect(),
        offchain_config: Bytes::from_static(b"static"),
    }
}

/// One scope observed by every node of a 3-node committee.
pub fn dynamic_config(tag: u8) -> DynamicConfig {
    DynamicConfig {
        source_scopes: vec![SourceScope {
            scope_id: 16015286601757825753,
            min_quorum: 2,
            membership_bitmap: U256::from(0b111u64),
        }],
        offchain_config: Bytes::from(vec![tag]),
    }
}

/// Poll `check` every few milliseconds until it holds or `timeout` elapses.
pub async fn eventually(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    check()
}

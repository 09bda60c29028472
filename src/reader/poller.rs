//! Background reconciliation loop and query surface.
//!
//! # Responsibilities
//! - Poll the store once per interval for every subscribed domain
//! - Publish each domain's new snapshot with a single atomic swap
//! - Keep serving the last good snapshot while the store is failing
//! - Answer queries from the local cache without touching the store
//!
//! # Design Decisions
//! - One background task per reader, not per domain; domains are fetched
//!   concurrently inside a tick, bounded by `max_concurrent_fetches`
//! - Every fetch in a tick shares one deadline, shorter than the interval,
//!   so ticks never overlap; a timed-out fetch counts as a failed sync
//! - The loop is the only writer of snapshots

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime};

use alloy::primitives::Bytes;
use arc_swap::ArcSwap;
use dashmap::DashMap;
use futures_util::{stream, StreamExt};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use crate::config::ReaderConfig;
use crate::lifecycle::Shutdown;
use crate::observability::metrics;
use crate::reader::error::{ReaderError, ReaderResult};
use crate::reader::snapshot::{min_quorums, CachedSnapshot, ConfigChange, NodeSet, OffchainConfig};
use crate::registry::{ConfigDigest, DomainId, VersionedConfig};
use crate::store::{ConfigStore, StoreError, StoreResult};

/// Capacity of the change notification channel.
const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// Tuning for a [`ConfigReader`].
#[derive(Debug, Clone)]
pub struct ReaderSettings {
    /// Deadline for one tick. Must be shorter than the poll interval.
    pub tick_timeout: Duration,
    pub max_concurrent_fetches: usize,
    /// Displaced configs kept resolvable per domain.
    pub retained_history: usize,
}

impl Default for ReaderSettings {
    fn default() -> Self {
        Self::from(&ReaderConfig::default())
    }
}

impl From<&ReaderConfig> for ReaderSettings {
    fn from(config: &ReaderConfig) -> Self {
        Self {
            tick_timeout: config.tick_timeout(),
            max_concurrent_fetches: config.max_concurrent_fetches.max(1),
            retained_history: config.retained_history,
        }
    }
}

type Slot = Arc<ArcSwap<CachedSnapshot>>;

/// `(active, candidate)` as cached by the reader.
pub type ConfigPair = (Option<Arc<VersionedConfig>>, Option<Arc<VersionedConfig>>);

struct Inner {
    store: Arc<dyn ConfigStore>,
    settings: ReaderSettings,
    snapshots: DashMap<DomainId, Slot>,
    changes: broadcast::Sender<ConfigChange>,
    /// Bumped after every tick; readiness waiters watch it.
    ticks: watch::Sender<u64>,
    shutdown: Shutdown,
    started: AtomicBool,
    closed: AtomicBool,
}

/// Cached, eventually-consistent view of registry state for many domains.
pub struct ConfigReader {
    inner: Arc<Inner>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ConfigReader {
    pub fn new(store: Arc<dyn ConfigStore>, settings: ReaderSettings) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        let (ticks, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                store,
                settings,
                snapshots: DashMap::new(),
                changes,
                ticks,
                shutdown: Shutdown::new(),
                started: AtomicBool::new(false),
                closed: AtomicBool::new(false),
            }),
            task: Mutex::new(None),
        }
    }

    /// Track a domain. Domains added after `start` are picked up next tick.
    pub fn subscribe(&self, domain: impl Into<DomainId>) -> ReaderResult<()> {
        self.ensure_open()?;
        let domain = domain.into();
        self.inner.snapshots.entry(domain.clone()).or_insert_with(|| {
            tracing::debug!(domain = %domain, "Domain subscribed");
            Arc::new(ArcSwap::from_pointee(CachedSnapshot::default()))
        });
        Ok(())
    }

    /// Subscribed domains, sorted.
    pub fn domains(&self) -> Vec<DomainId> {
        let mut ids: Vec<_> = self.inner.snapshots.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Spawn the reconciliation loop. The first sync runs immediately.
    pub fn start(&self, poll_interval: Duration) -> ReaderResult<()> {
        self.ensure_open()?;
        let tick_timeout = self.inner.settings.tick_timeout;
        if tick_timeout.is_zero() || tick_timeout >= poll_interval {
            return Err(ReaderError::InvalidTiming {
                tick_timeout,
                poll_interval,
            });
        }
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Err(ReaderError::AlreadyStarted);
        }

        // Subscribe before spawning so an early stop is never missed.
        let shutdown = self.inner.shutdown.subscribe();
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move { inner.run(poll_interval, shutdown).await });
        *self.task.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
        Ok(())
    }

    /// Cancel the loop, including any in-flight tick, and wait for it to exit.
    ///
    /// Idempotent. Every later query fails with [`ReaderError::Closed`].
    pub async fn stop(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        if self.inner.shutdown.trigger() {
            tracing::info!("Config reader stopping");
        }

        let handle = self.task.lock().unwrap_or_else(|e| e.into_inner()).take();
        match handle {
            Some(handle) => {
                if let Err(e) = handle.await {
                    tracing::error!(error = %e, "Config reader task failed");
                }
                self.inner.ticks.send_modify(|t| *t += 1);
            }
            None if self.inner.started.load(Ordering::SeqCst) => {
                // Another caller holds the handle; wait for the loop to finish.
                let mut exited = self.inner.ticks.subscribe();
                while self.inner.shutdown.receiver_count() > 0 {
                    if exited.changed().await.is_err() {
                        break;
                    }
                }
            }
            None => {}
        }
    }

    /// Wait until every subscribed domain has synced at least once.
    pub async fn wait_until_ready(&self, timeout: Duration) -> ReaderResult<()> {
        let deadline = time::Instant::now() + timeout;
        let mut ticks = self.inner.ticks.subscribe();
        loop {
            self.ensure_open()?;
            let pending = self.pending_domains();
            if pending.is_empty() {
                return Ok(());
            }
            match time::timeout_at(deadline, ticks.changed()).await {
                Ok(Ok(())) => continue,
                Ok(Err(_)) => return Err(ReaderError::Closed),
                Err(_) => return Err(ReaderError::NotReady { pending }),
            }
        }
    }

    fn pending_domains(&self) -> Vec<DomainId> {
        let mut pending: Vec<_> = self
            .inner
            .snapshots
            .iter()
            .filter(|e| !e.value().load().is_synced())
            .map(|e| e.key().clone())
            .collect();
        pending.sort();
        pending
    }

    fn ensure_open(&self) -> ReaderResult<()> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(ReaderError::Closed);
        }
        Ok(())
    }

    /// Latest snapshot for a domain.
    pub fn get_snapshot(&self, domain: &DomainId) -> ReaderResult<Arc<CachedSnapshot>> {
        self.ensure_open()?;
        self.inner
            .snapshots
            .get(domain)
            .map(|slot| slot.load_full())
            .ok_or_else(|| ReaderError::UnknownDomain(domain.clone()))
    }

    /// Latest `(active, candidate)` pair. Empty until the first sync.
    pub fn get_all_configs(&self, domain: &DomainId) -> ReaderResult<ConfigPair> {
        let snapshot = self.get_snapshot(domain)?;
        Ok((snapshot.active.clone(), snapshot.candidate.clone()))
    }

    /// True if `digest` is the active or candidate digest as of the last sync.
    pub fn is_config_digest_set(&self, domain: &DomainId, digest: ConfigDigest) -> ReaderResult<bool> {
        Ok(self.get_snapshot(domain)?.is_set(digest))
    }

    /// Resolve a digest from either slot or retained history.
    pub fn get_config(&self, domain: &DomainId, digest: ConfigDigest) -> ReaderResult<Arc<VersionedConfig>> {
        let snapshot = self.get_snapshot(domain)?;
        if let Some(config) = snapshot.find(digest) {
            return Ok(Arc::clone(config));
        }
        if !snapshot.is_synced() {
            return Err(ReaderError::NotSynced(domain.clone()));
        }
        Err(ReaderError::DigestNotFound(digest))
    }

    pub fn get_nodes_info(&self, domain: &DomainId, digest: ConfigDigest) -> ReaderResult<NodeSet> {
        self.get_config(domain, digest)
            .map(|config| NodeSet::from_config(&config))
    }

    /// `scope_id → min_quorum` for a config.
    pub fn get_min_quorums(
        &self,
        domain: &DomainId,
        digest: ConfigDigest,
    ) -> ReaderResult<BTreeMap<u64, u64>> {
        self.get_config(domain, digest).map(|config| min_quorums(&config))
    }

    pub fn get_offchain_config(&self, domain: &DomainId, digest: ConfigDigest) -> ReaderResult<OffchainConfig> {
        let config = self.get_config(domain, digest)?;
        Ok(OffchainConfig {
            static_config: Bytes::clone(&config.static_config.offchain_config),
            dynamic_config: Bytes::clone(&config.dynamic_config.offchain_config),
        })
    }

    /// Slot changes observed by future ticks.
    pub fn subscribe_changes(&self) -> broadcast::Receiver<ConfigChange> {
        self.inner.changes.subscribe()
    }
}

impl Drop for ConfigReader {
    fn drop(&mut self) {
        self.inner.shutdown.trigger();
    }
}

impl Inner {
    async fn run(&self, poll_interval: Duration, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(
            poll_interval_ms = poll_interval.as_millis() as u64,
            tick_timeout_ms = self.settings.tick_timeout.as_millis() as u64,
            "Config reader starting"
        );

        let mut ticker = time::interval(poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    tokio::select! {
                        _ = self.sync_all() => {}
                        _ = shutdown.recv() => break,
                    }
                }
                _ = shutdown.recv() => break,
            }
        }

        tracing::info!("Config reader received shutdown signal, exiting loop");
        drop(shutdown);
        // Wake stop() callers waiting on the receiver count.
        self.ticks.send_modify(|t| *t += 1);
    }

    async fn sync_all(&self) {
        let started = Instant::now();
        let deadline = time::Instant::now() + self.settings.tick_timeout;
        let slots: Vec<(DomainId, Slot)> = self
            .snapshots
            .iter()
            .map(|e| (e.key().clone(), Arc::clone(e.value())))
            .collect();
        let total = slots.len();

        let failed = stream::iter(slots)
            .map(|(domain, slot)| async move {
                let previous = slot.load_full();
                let fetched = time::timeout_at(deadline, self.fetch(&domain, &previous)).await;
                let outcome = match fetched {
                    Ok(result) => result,
                    Err(_) => Err(StoreError::Timeout(self.settings.tick_timeout)),
                };
                self.apply(&domain, &slot, &previous, outcome)
            })
            .buffer_unordered(self.settings.max_concurrent_fetches)
            .filter(|ok| std::future::ready(!*ok))
            .count()
            .await;

        let outcome = match failed {
            0 => "ok",
            n if n == total => "failed",
            _ => "partial",
        };
        metrics::record_tick(outcome, started.elapsed());
        self.ticks.send_modify(|t| *t += 1);
    }

    /// Read both slots, reusing cached configs whose digest is unchanged.
    async fn fetch(&self, domain: &DomainId, previous: &CachedSnapshot) -> StoreResult<ConfigPair> {
        let (active, candidate) = self.store.get_config_digests(domain).await?;
        let active = self.resolve(domain, active, previous).await?;
        let candidate = self.resolve(domain, candidate, previous).await?;
        Ok((active, candidate))
    }

    async fn resolve(
        &self,
        domain: &DomainId,
        digest: ConfigDigest,
        previous: &CachedSnapshot,
    ) -> StoreResult<Option<Arc<VersionedConfig>>> {
        if digest.is_zero() {
            return Ok(None);
        }
        if let Some(cached) = previous.find(digest) {
            return Ok(Some(Arc::clone(cached)));
        }
        match self.store.get_config(domain, digest).await? {
            Some(config) => Ok(Some(Arc::new(config))),
            // The slot moved between the two reads; the next tick catches up.
            None => Err(StoreError::Inconsistent(format!(
                "digest {} listed but not found",
                digest
            ))),
        }
    }

    /// Publish the outcome of one domain's sync. Returns true on success.
    fn apply(
        &self,
        domain: &DomainId,
        slot: &Slot,
        previous: &CachedSnapshot,
        outcome: StoreResult<ConfigPair>,
    ) -> bool {
        match outcome {
            Ok((active, candidate)) => {
                let next = previous.advance(
                    active,
                    candidate,
                    self.settings.retained_history,
                    SystemTime::now(),
                );
                let changes = ConfigChange::diff(domain, previous, &next);
                if previous.consecutive_failures > 0 {
                    tracing::info!(
                        domain = %domain,
                        failed_ticks = previous.consecutive_failures,
                        "Domain sync recovered"
                    );
                }
                slot.store(Arc::new(next));
                metrics::record_sync_success(domain.as_str());

                for change in changes {
                    match &change {
                        ConfigChange::ActiveChanged { previous: from, current: to, .. }
                        | ConfigChange::CandidateChanged { previous: from, current: to, .. } => {
                            tracing::info!(
                                domain = %domain,
                                slot = change.slot(),
                                previous = %from,
                                current = %to,
                                "Config slot changed"
                            );
                        }
                    }
                    metrics::record_config_change(domain.as_str(), change.slot());
                    let _ = self.changes.send(change);
                }
                true
            }
            Err(e) => {
                let next = previous.fail(e.to_string());
                let consecutive = next.consecutive_failures;
                slot.store(Arc::new(next));
                if e.is_transient() {
                    tracing::warn!(domain = %domain, error = %e, consecutive, "Domain sync failed");
                } else {
                    tracing::error!(domain = %domain, error = %e, consecutive, "Domain sync failed");
                }
                metrics::record_sync_failure(domain.as_str(), consecutive);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{DomainSeparator, DomainSpec, DynamicConfig, Node, SourceScope, StaticConfig};
    use crate::store::InMemoryConfigStore;
    use alloy::primitives::{Address, B256, U256};

    fn settings() -> ReaderSettings {
        ReaderSettings {
            tick_timeout: Duration::from_millis(20),
            max_concurrent_fetches: 2,
            retained_history: 2,
        }
    }

    fn static_config() -> StaticConfig {
        StaticConfig {
            nodes: (1..=3u8)
                .map(|i| Node {
                    identity_key: B256::repeat_byte(i),
                    auxiliary_key: B256::repeat_byte(0x40 + i),
                })
                .collect(),
            offchain_config: Bytes::from_static(b"static"),
        }
    }

    fn dynamic_config(quorum: u64) -> DynamicConfig {
        DynamicConfig {
            source_scopes: vec![SourceScope {
                scope_id: 42,
                min_quorum: quorum,
                membership_bitmap: U256::from(0b101u64),
            }],
            offchain_config: Bytes::from_static(b"dynamic"),
        }
    }

    fn store_with(domains: &[&str]) -> Arc<InMemoryConfigStore> {
        let store = Arc::new(InMemoryConfigStore::new());
        for name in domains {
            store
                .register_domain(DomainSpec::new(
                    *name,
                    DomainSeparator::evm(1, Address::repeat_byte(3)),
                    0x000b,
                ))
                .unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_start_validates_timing() {
        let reader = ConfigReader::new(store_with(&[]), settings());
        let err = reader.start(Duration::from_millis(20)).unwrap_err();
        assert!(matches!(err, ReaderError::InvalidTiming { .. }));
        // A rejected start does not count as started.
        reader.start(Duration::from_millis(50)).unwrap();
        assert_eq!(reader.start(Duration::from_millis(50)), Err(ReaderError::AlreadyStarted));
        reader.stop().await;
    }

    #[tokio::test]
    async fn test_stop_is_idempotent_and_closes() {
        let reader = ConfigReader::new(store_with(&["d"]), settings());
        reader.subscribe("d").unwrap();
        reader.start(Duration::from_millis(50)).unwrap();
        reader.stop().await;
        reader.stop().await;

        let d = DomainId::from("d");
        assert_eq!(reader.get_all_configs(&d).unwrap_err(), ReaderError::Closed);
        assert_eq!(reader.start(Duration::from_millis(50)), Err(ReaderError::Closed));
        assert_eq!(reader.subscribe("e"), Err(ReaderError::Closed));
    }

    #[tokio::test]
    async fn test_stop_before_start() {
        let reader = ConfigReader::new(store_with(&[]), settings());
        reader.stop().await;
        assert_eq!(reader.start(Duration::from_millis(50)), Err(ReaderError::Closed));
    }

    #[tokio::test]
    async fn test_queries_before_sync() {
        let reader = ConfigReader::new(store_with(&["d"]), settings());
        reader.subscribe("d").unwrap();
        let d = DomainId::from("d");

        assert_eq!(reader.get_all_configs(&d).unwrap(), (None, None));
        assert!(!reader.is_config_digest_set(&d, ConfigDigest(B256::repeat_byte(1))).unwrap());
        assert_eq!(
            reader.get_nodes_info(&d, ConfigDigest(B256::repeat_byte(1))),
            Err(ReaderError::NotSynced(d.clone()))
        );
        assert_eq!(
            reader.get_snapshot(&"other".into()).unwrap_err(),
            ReaderError::UnknownDomain("other".into())
        );
    }

    #[tokio::test]
    async fn test_sync_and_queries() {
        let store = store_with(&["a", "b"]);
        let a = DomainId::from("a");
        let d1 = store
            .set_candidate(&a, static_config(), dynamic_config(2), ConfigDigest::ZERO)
            .await
            .unwrap();
        store
            .promote_candidate_and_revoke_active(&a, d1, ConfigDigest::ZERO)
            .await
            .unwrap();

        let reader = ConfigReader::new(store.clone(), settings());
        reader.subscribe("a").unwrap();
        reader.subscribe("b").unwrap();
        let mut changes = reader.subscribe_changes();
        reader.start(Duration::from_millis(40)).unwrap();
        reader.wait_until_ready(Duration::from_secs(2)).await.unwrap();

        assert!(reader.is_config_digest_set(&a, d1).unwrap());
        let nodes = reader.get_nodes_info(&a, d1).unwrap();
        assert_eq!(nodes.version, 1);
        assert_eq!(nodes.observers_of(42), vec![0, 2]);
        assert_eq!(reader.get_min_quorums(&a, d1).unwrap().get(&42), Some(&2));
        assert_eq!(
            reader.get_offchain_config(&a, d1).unwrap().dynamic_config,
            Bytes::from_static(b"dynamic")
        );
        assert_eq!(
            reader.get_nodes_info(&a, ConfigDigest(B256::repeat_byte(9))),
            Err(ReaderError::DigestNotFound(ConfigDigest(B256::repeat_byte(9))))
        );

        let change = changes.recv().await.unwrap();
        assert_eq!(
            change,
            ConfigChange::ActiveChanged {
                domain: a.clone(),
                previous: ConfigDigest::ZERO,
                current: d1,
            }
        );

        let snapshot = reader.get_snapshot(&"b".into()).unwrap();
        assert!(snapshot.is_synced());
        assert!(snapshot.active.is_none());
        reader.stop().await;
    }

    #[tokio::test]
    async fn test_unchanged_digest_reuses_cached_config() {
        let store = store_with(&["a"]);
        let a = DomainId::from("a");
        let d1 = store
            .set_candidate(&a, static_config(), dynamic_config(1), ConfigDigest::ZERO)
            .await
            .unwrap();

        let reader = ConfigReader::new(store.clone(), settings());
        reader.subscribe("a").unwrap();
        reader.inner.sync_all().await;
        let first = reader.get_config(&a, d1).unwrap();
        reader.inner.sync_all().await;
        let second = reader.get_config(&a, d1).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_wait_until_ready_times_out_for_unknown_store_domain() {
        let reader = ConfigReader::new(store_with(&[]), settings());
        reader.subscribe("missing").unwrap();
        reader.start(Duration::from_millis(40)).unwrap();

        let err = reader.wait_until_ready(Duration::from_millis(150)).await.unwrap_err();
        assert_eq!(
            err,
            ReaderError::NotReady {
                pending: vec!["missing".into()]
            }
        );
        let snapshot = reader.get_snapshot(&"missing".into()).unwrap();
        assert!(snapshot.consecutive_failures >= 1);
        assert!(snapshot.last_error.as_deref().unwrap().contains("unknown domain"));
        reader.stop().await;
    }
}

//! End-to-end registry lifecycle observed through the reader.

use std::sync::Arc;
use std::time::Duration;

use committee_registry::reader::{ConfigChange, ConfigReader, ReaderError, ReaderSettings};
use committee_registry::registry::{ConfigDigest, DomainId, RegistryError};
use committee_registry::store::{ConfigStore, InMemoryConfigStore};

mod common;

const POLL: Duration = Duration::from_millis(50);
const TICK: Duration = Duration::from_millis(25);

fn start(store: Arc<InMemoryConfigStore>, retained_history: usize) -> ConfigReader {
    let reader = ConfigReader::new(
        store,
        ReaderSettings {
            tick_timeout: TICK,
            max_concurrent_fetches: 2,
            retained_history,
        },
    );
    reader.subscribe("d").unwrap();
    reader.start(POLL).unwrap();
    reader
}

/// Generous bound on "one poll interval plus one tick timeout".
fn staleness_bound() -> Duration {
    (POLL + TICK) * 4
}

#[tokio::test]
async fn test_lifecycle_scenario() {
    let store = Arc::new(common::memory_store(&["d"]));
    let d = DomainId::from("d");
    let reader = start(store.clone(), 4);
    reader.wait_until_ready(Duration::from_secs(2)).await.unwrap();

    let d1 = store
        .set_candidate(&d, common::static_config(3), common::dynamic_config(1), ConfigDigest::ZERO)
        .await
        .unwrap();
    store
        .promote_candidate_and_revoke_active(&d, d1, ConfigDigest::ZERO)
        .await
        .unwrap();
    assert_eq!(
        store.get_config_digests(&d).await.unwrap(),
        (d1, ConfigDigest::ZERO)
    );

    let d2 = store
        .set_candidate(&d, common::static_config(3), common::dynamic_config(2), ConfigDigest::ZERO)
        .await
        .unwrap();

    let caught_up = common::eventually(staleness_bound(), || {
        reader.is_config_digest_set(&d, d2).unwrap_or(false)
    })
    .await;
    assert!(caught_up);
    let (active, candidate) = reader.get_all_configs(&d).unwrap();
    let (active, candidate) = (active.unwrap(), candidate.unwrap());
    assert_eq!((active.version, active.digest), (1, d1));
    assert_eq!((candidate.version, candidate.digest), (2, d2));

    store.promote_candidate_and_revoke_active(&d, d2, d1).await.unwrap();
    let retired = common::eventually(staleness_bound(), || {
        !reader.is_config_digest_set(&d, d1).unwrap_or(true)
    })
    .await;
    assert!(retired);
    assert!(reader.is_config_digest_set(&d, d2).unwrap());
    // Still resolvable from retained history.
    assert_eq!(reader.get_nodes_info(&d, d1).unwrap().version, 1);

    reader.stop().await;
}

#[tokio::test]
async fn test_change_stream() {
    let store = Arc::new(common::memory_store(&["d"]));
    let d = DomainId::from("d");
    let reader = start(store.clone(), 4);
    let mut changes = reader.subscribe_changes();
    reader.wait_until_ready(Duration::from_secs(2)).await.unwrap();

    let d1 = store
        .set_candidate(&d, common::static_config(3), common::dynamic_config(1), ConfigDigest::ZERO)
        .await
        .unwrap();
    let change = tokio::time::timeout(staleness_bound(), changes.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        change,
        ConfigChange::CandidateChanged {
            domain: d.clone(),
            previous: ConfigDigest::ZERO,
            current: d1,
        }
    );

    store
        .promote_candidate_and_revoke_active(&d, d1, ConfigDigest::ZERO)
        .await
        .unwrap();
    let first = tokio::time::timeout(staleness_bound(), changes.recv())
        .await
        .unwrap()
        .unwrap();
    let second = changes.recv().await.unwrap();
    assert_eq!(
        first,
        ConfigChange::ActiveChanged {
            domain: d.clone(),
            previous: ConfigDigest::ZERO,
            current: d1,
        }
    );
    assert_eq!(
        second,
        ConfigChange::CandidateChanged {
            domain: d,
            previous: d1,
            current: ConfigDigest::ZERO,
        }
    );

    reader.stop().await;
}

#[tokio::test]
async fn test_evicted_digest_is_not_found() {
    let store = Arc::new(common::memory_store(&["d"]));
    let d = DomainId::from("d");
    let reader = start(store.clone(), 1);
    reader.wait_until_ready(Duration::from_secs(2)).await.unwrap();

    let mut digests = Vec::new();
    let mut active = ConfigDigest::ZERO;
    for tag in 1..=3u8 {
        let next = store
            .set_candidate(&d, common::static_config(3), common::dynamic_config(tag), ConfigDigest::ZERO)
            .await
            .unwrap();
        store
            .promote_candidate_and_revoke_active(&d, next, active)
            .await
            .unwrap();
        active = next;
        digests.push(next);
        let seen = common::eventually(staleness_bound(), || {
            reader.is_config_digest_set(&d, next).unwrap_or(false)
        })
        .await;
        assert!(seen);
    }

    // History depth 1: only the most recently displaced config survives.
    assert_eq!(reader.get_nodes_info(&d, digests[1]).unwrap().version, 2);
    assert_eq!(
        reader.get_nodes_info(&d, digests[0]).unwrap_err(),
        ReaderError::DigestNotFound(digests[0])
    );

    reader.stop().await;
}

#[tokio::test]
async fn test_stale_proposer_gets_mismatch() {
    let store = common::memory_store(&["d"]);
    let d = DomainId::from("d");
    let d1 = store
        .set_candidate(&d, common::static_config(3), common::dynamic_config(1), ConfigDigest::ZERO)
        .await
        .unwrap();

    // A second proposer still believes the slot is empty.
    let err = store
        .set_candidate(&d, common::static_config(3), common::dynamic_config(2), ConfigDigest::ZERO)
        .await
        .unwrap_err();
    let registry_error = err.registry_error().unwrap();
    assert_eq!(
        registry_error,
        &RegistryError::DigestMismatch {
            expected: ConfigDigest::ZERO,
            actual: d1,
        }
    );
    assert!(registry_error.is_retryable());

    // Re-reading and retrying succeeds with the next version.
    let (_, current) = store.get_config_digests(&d).await.unwrap();
    let d2 = store
        .set_candidate(&d, common::static_config(3), common::dynamic_config(2), current)
        .await
        .unwrap();
    assert_eq!(store.get_config(&d, d2).await.unwrap().unwrap().version, 2);
}

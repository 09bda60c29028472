//! Concurrent readers against a churning registry.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use committee_registry::reader::{ConfigReader, ReaderSettings};
use committee_registry::registry::{ConfigDigest, DomainId};
use committee_registry::store::ConfigStore;

mod common;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_snapshots_never_torn_under_churn() {
    let store = Arc::new(common::memory_store(&["d"]));
    let d = DomainId::from("d");
    let reader = Arc::new(ConfigReader::new(
        store.clone(),
        ReaderSettings {
            tick_timeout: Duration::from_millis(5),
            max_concurrent_fetches: 1,
            retained_history: 8,
        },
    ));
    reader.subscribe("d").unwrap();
    reader.start(Duration::from_millis(10)).unwrap();
    reader.wait_until_ready(Duration::from_secs(2)).await.unwrap();

    let done = Arc::new(AtomicBool::new(false));
    let queries = Arc::new(AtomicUsize::new(0));
    let mut checkers = Vec::new();
    for _ in 0..8 {
        let reader = reader.clone();
        let done = done.clone();
        let queries = queries.clone();
        let d = d.clone();
        checkers.push(tokio::spawn(async move {
            while !done.load(Ordering::SeqCst) {
                let (active, candidate) = reader.get_all_configs(&d).unwrap();
                if let (Some(active), Some(candidate)) = (&active, &candidate) {
                    assert_ne!(active.digest, candidate.digest);
                    assert!(active.version < candidate.version);
                }
                if let Some(active) = &active {
                    assert!(reader.get_nodes_info(&d, active.digest).is_ok());
                }
                queries.fetch_add(1, Ordering::Relaxed);
                tokio::task::yield_now().await;
            }
        }));
    }

    let started = Instant::now();
    let mut active = ConfigDigest::ZERO;
    let mut last_version = 0;
    for tag in 1..=30u8 {
        let next = store
            .set_candidate(&d, common::static_config(3), common::dynamic_config(tag), ConfigDigest::ZERO)
            .await
            .unwrap();
        let version = store.get_config(&d, next).await.unwrap().unwrap().version;
        assert!(version > last_version);
        last_version = version;

        tokio::time::sleep(Duration::from_millis(3)).await;
        store
            .promote_candidate_and_revoke_active(&d, next, active)
            .await
            .unwrap();
        active = next;
    }

    let converged = common::eventually(Duration::from_secs(2), || {
        reader.is_config_digest_set(&d, active).unwrap_or(false)
    })
    .await;
    done.store(true, Ordering::SeqCst);
    for checker in checkers {
        checker.await.unwrap();
    }

    assert!(converged);
    assert!(queries.load(Ordering::Relaxed) > 0);
    println!(
        "30 promotions, {} snapshot queries in {:?}",
        queries.load(Ordering::Relaxed),
        started.elapsed()
    );
    reader.stop().await;
}

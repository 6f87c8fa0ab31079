//! Integration test: stats.get deduplication under genuine concurrency
//! (spec.md §8 Testable Property 5). The in-crate unit tests in
//! `stats_cache.rs` await each `get()` call sequentially and never
//! exercise the `inflight`-dedup branch against real concurrent callers;
//! this drives N calls at once with `tokio::join!` so they race into
//! `get` together.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use semantica_core::stats_cache::StatsCache;
use semantica_core::types::{DatabaseStats, FolderStats};

fn stats() -> DatabaseStats {
    DatabaseStats {
        indexed_files: 3,
        total_chunks: 42,
        folder_stats: vec![("/docs".to_string(), FolderStats { total: 3, indexed: 3 })],
        model_dim: 384,
    }
}

#[tokio::test]
async fn concurrent_get_calls_dedupe_to_a_single_calc() {
    let cache = Arc::new(StatsCache::new());
    let calls = Arc::new(AtomicU64::new(0));

    let spawn_call = || {
        let cache = cache.clone();
        let calls = calls.clone();
        tokio::spawn(async move {
            cache
                .get(move || async move {
                    // Give every concurrent caller a chance to reach `get`
                    // and observe the same in-flight future before it
                    // resolves.
                    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(stats())
                })
                .await
        })
    };

    let (a, b, c, d) = tokio::join!(spawn_call(), spawn_call(), spawn_call(), spawn_call());
    let results = [a, b, c, d];

    for result in results {
        let stats = result.expect("task did not panic").expect("calc succeeds");
        assert_eq!(stats.total_chunks, 42);
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1, "only one calc should have run across all concurrent callers");
}

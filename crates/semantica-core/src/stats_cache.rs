//! Stats Cache (C7).
//!
//! Memoizes [`DatabaseStats`] snapshots so heavy UI polling collapses
//! into at most one in-flight recomputation (spec.md §4.7). Modeled as
//! `{cached, inflight}` behind a single mutex, with the in-flight slot
//! holding a [`Shared`] future so every concurrent caller awaits the
//! same calculation rather than triggering a new one each.

use std::future::Future;
use std::pin::Pin;

use futures_util::future::{FutureExt, Shared};
use parking_lot::Mutex;

use crate::error::Error;
use crate::types::DatabaseStats;

type CalcError = String;
type CalcResult = Result<DatabaseStats, CalcError>;
type CalcFuture = Pin<Box<dyn Future<Output = CalcResult> + Send>>;
type SharedCalc = Shared<CalcFuture>;

struct State {
    cached: Option<DatabaseStats>,
    inflight: Option<SharedCalc>,
}

/// Deduplicated, invalidatable cache of corpus statistics.
pub struct StatsCache {
    state: Mutex<State>,
}

impl Default for StatsCache {
    fn default() -> Self {
        Self::new()
    }
}

impl StatsCache {
    pub fn new() -> Self {
        Self { state: Mutex::new(State { cached: None, inflight: None }) }
    }

    /// Return the cached snapshot if present; otherwise join an
    /// in-flight calculation or start one with `calc`. On `calc` error
    /// the pending slot is cleared without caching, so the next `get`
    /// retries from scratch.
    pub async fn get<F, Fut>(&self, calc: F) -> Result<DatabaseStats, Error>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CalcResult> + Send + 'static,
    {
        let shared = {
            let mut state = self.state.lock();
            if let Some(cached) = &state.cached {
                return Ok(cached.clone());
            }
            if let Some(shared) = &state.inflight {
                shared.clone()
            } else {
                let fut: CalcFuture = Box::pin(calc());
                let shared = fut.shared();
                state.inflight = Some(shared.clone());
                shared
            }
        };

        let result = shared.await;

        let mut state = self.state.lock();
        match &result {
            Ok(stats) => {
                state.cached = Some(stats.clone());
                state.inflight = None;
            }
            Err(_) => {
                state.inflight = None;
            }
        }
        drop(state);

        result.map_err(|reason| Error::Config { message: reason })
    }

    /// Drop the cached snapshot. Does not cancel an in-flight
    /// calculation; a calculation already running may still commit its
    /// (possibly now-stale) result, per spec.md §4.7's at-most-one-
    /// generation staleness tolerance.
    pub fn invalidate(&self) {
        self.state.lock().cached = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FolderStats;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    fn stats(total_chunks: u64) -> DatabaseStats {
        DatabaseStats {
            indexed_files: 1,
            total_chunks,
            folder_stats: vec![("/docs".to_string(), FolderStats { total: 1, indexed: 1 })],
            model_dim: 384,
        }
    }

    #[tokio::test]
    async fn get_memoizes_result_across_calls() {
        let cache = StatsCache::new();
        let calls = Arc::new(AtomicU64::new(0));

        for _ in 0..3 {
            let calls = calls.clone();
            let result = cache
                .get(move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(stats(5))
                })
                .await
                .expect("calc succeeds");
            assert_eq!(result.total_chunks, 5);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn invalidate_forces_recalculation() {
        let cache = StatsCache::new();
        let calls = Arc::new(AtomicU64::new(0));

        let first_calls = calls.clone();
        cache.get(move || async move { first_calls.fetch_add(1, Ordering::SeqCst); Ok(stats(1)) }).await.expect("ok");

        cache.invalidate();

        let second_calls = calls.clone();
        let result = cache
            .get(move || async move {
                second_calls.fetch_add(1, Ordering::SeqCst);
                Ok(stats(2))
            })
            .await
            .expect("ok");

        assert_eq!(result.total_chunks, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failed_calc_does_not_cache_and_allows_retry() {
        let cache = StatsCache::new();

        let err = cache.get(|| async { Err("boom".to_string()) }).await;
        assert!(err.is_err());

        let ok = cache.get(|| async { Ok(stats(9)) }).await.expect("retry succeeds");
        assert_eq!(ok.total_chunks, 9);
    }
}

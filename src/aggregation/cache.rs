use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::future::{BoxFuture, Shared};
use futures_util::FutureExt;

use crate::metrics::Metrics;

use super::{AggregateResult, Aggregator};

// ============================================================================
// Aggregation Cache - single-flight coordinator
// ============================================================================
//
// Per account the map holds at most one Flight:
// - Pending:  computation still running, new callers attach to it
// - Resolved: cacheable result kept for later callers
//
// Non-cacheable results remove their own Flight as soon as they resolve, so
// the next caller starts a fresh computation. Removal checks the flight id so
// a late cleanup can never evict a newer computation.
//
// ============================================================================

type SharedResult = Shared<BoxFuture<'static, Arc<AggregateResult>>>;

#[derive(Clone)]
struct Flight {
    id: u64,
    result: SharedResult,
    /// Set when the computation resolved with a cacheable result.
    cached_at: Arc<OnceLock<Instant>>,
}

impl Flight {
    fn is_cached(&self) -> bool {
        self.cached_at.get().is_some()
    }

    fn is_expired(&self, ttl: Option<Duration>) -> bool {
        match (ttl, self.cached_at.get()) {
            (Some(ttl), Some(cached_at)) => cached_at.elapsed() >= ttl,
            _ => false,
        }
    }
}

pub struct AggregationCache {
    entries: Arc<DashMap<String, Flight>>,
    aggregator: Arc<Aggregator>,
    next_id: AtomicU64,
    ttl: Option<Duration>,
    metrics: Arc<Metrics>,
}

impl AggregationCache {
    pub fn new(
        aggregator: Arc<Aggregator>,
        ttl: Option<Duration>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            aggregator,
            next_id: AtomicU64::new(0),
            ttl,
            metrics,
        }
    }

    /// Return the aggregate for `account`, joining an in-flight computation
    /// or reusing a cached one when possible.
    pub async fn get_or_compute(&self, account: &str) -> Arc<AggregateResult> {
        // The entry guard holds the shard lock, so lookup and insert are one
        // atomic step with respect to other callers and to flight cleanup.
        let flight = match self.entries.entry(account.to_string()) {
            Entry::Occupied(mut entry) => {
                if entry.get().is_expired(self.ttl) {
                    tracing::debug!(account = %account, "Cached aggregate expired");
                    self.metrics.record_cache_lookup("expired");
                    let flight = self.launch(account);
                    entry.insert(flight.clone());
                    flight
                } else if entry.get().is_cached() {
                    tracing::debug!(account = %account, "Serving cached aggregate");
                    self.metrics.record_cache_lookup("hit");
                    entry.get().clone()
                } else {
                    tracing::debug!(account = %account, "Joining in-flight aggregate");
                    self.metrics.record_cache_lookup("joined");
                    entry.get().clone()
                }
            }
            Entry::Vacant(entry) => {
                self.metrics.record_cache_lookup("miss");
                let flight = self.launch(account);
                entry.insert(flight.clone());
                flight
            }
        };
        self.metrics.set_cache_entries(self.entries.len());

        flight.result.await
    }

    /// Drop a cached entry so the next request recomputes it. Pending
    /// computations are left in place. Returns whether anything was removed.
    pub fn invalidate(&self, account: &str) -> bool {
        let removed = self
            .entries
            .remove_if(account, |_, flight| flight.is_cached())
            .is_some();
        if removed {
            tracing::info!(account = %account, "Invalidated cached aggregate");
            self.metrics.set_cache_entries(self.entries.len());
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Start the computation on the runtime. It runs to completion even if
    /// every caller goes away.
    fn launch(&self, account: &str) -> Flight {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let cached_at = Arc::new(OnceLock::new());

        let key = account.to_string();
        let entries = Arc::clone(&self.entries);
        let aggregator = Arc::clone(&self.aggregator);
        let metrics = Arc::clone(&self.metrics);
        let stamp = Arc::clone(&cached_at);

        let handle = tokio::spawn(async move {
            let result = AssertUnwindSafe(aggregator.aggregate(&key))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| {
                    tracing::error!(account = %key, "Aggregate computation panicked");
                    AggregateResult::Failed { status: 500 }
                });

            if result.is_cacheable() {
                let _ = stamp.set(Instant::now());
            } else {
                release(&entries, &metrics, &key, id);
            }

            Arc::new(result)
        });

        // Runtime shutdown cancels the task before it can clean up after itself.
        let owner = account.to_string();
        let entries = Arc::clone(&self.entries);
        let metrics = Arc::clone(&self.metrics);
        let result = handle
            .map(move |joined| {
                joined.unwrap_or_else(|err| {
                    tracing::error!(
                        account = %owner,
                        error = %err,
                        "Aggregate task did not complete"
                    );
                    release(&entries, &metrics, &owner, id);
                    Arc::new(AggregateResult::Failed { status: 500 })
                })
            })
            .boxed()
            .shared();

        Flight {
            id,
            result,
            cached_at,
        }
    }
}

/// Remove the entry for `key` only if it still belongs to flight `id`.
fn release(entries: &DashMap<String, Flight>, metrics: &Metrics, key: &str, id: u64) {
    entries.remove_if(key, |_, flight| flight.id == id);
    metrics.set_cache_entries(entries.len());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Transaction;
    use crate::upstream::{FetchError, TransactionSource, UpstreamOutcome};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Semaphore;

    type Respond = Box<dyn Fn(usize) -> UpstreamOutcome + Send + Sync>;

    /// Source that counts calls and optionally waits on a gate before answering.
    struct ScriptedSource {
        name: &'static str,
        calls: AtomicUsize,
        gate: Option<Arc<Semaphore>>,
        respond: Respond,
    }

    impl ScriptedSource {
        fn new(name: &'static str, respond: Respond) -> Arc<Self> {
            Arc::new(Self {
                name,
                calls: AtomicUsize::new(0),
                gate: None,
                respond,
            })
        }

        fn gated(name: &'static str, gate: Arc<Semaphore>, respond: Respond) -> Arc<Self> {
            Arc::new(Self {
                name,
                calls: AtomicUsize::new(0),
                gate: Some(gate),
                respond,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TransactionSource for ScriptedSource {
        fn name(&self) -> &str {
            self.name
        }

        async fn fetch(&self, _account: &str) -> UpstreamOutcome {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                let _permit = gate.acquire().await.unwrap();
            }
            (self.respond)(call)
        }
    }

    fn one_txn(id: &'static str) -> Respond {
        Box::new(move |_| {
            UpstreamOutcome::Success(vec![Transaction {
                id: Some(id.to_string()),
                timestamp: Some("2024-01-01T00:00:00Z".to_string()),
                ..Default::default()
            }])
        })
    }

    fn status(code: u16) -> Respond {
        Box::new(move |_| UpstreamOutcome::Failure(FetchError::UnexpectedStatus(code)))
    }

    fn cache_with(
        a: Arc<ScriptedSource>,
        b: Arc<ScriptedSource>,
        ttl: Option<Duration>,
    ) -> (Arc<AggregationCache>, Arc<Metrics>) {
        let metrics = Arc::new(Metrics::new().unwrap());
        let aggregator = Arc::new(Aggregator::new(a, b, metrics.clone()));
        (
            Arc::new(AggregationCache::new(aggregator, ttl, metrics.clone())),
            metrics,
        )
    }

    fn lookups(metrics: &Metrics, result: &str) -> u64 {
        metrics.cache_lookups.with_label_values(&[result]).get()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_callers_share_one_computation() {
        let gate = Arc::new(Semaphore::new(0));
        let a = ScriptedSource::gated("a", gate.clone(), one_txn("1"));
        let b = ScriptedSource::gated("b", gate.clone(), one_txn("2"));
        let (cache, metrics) = cache_with(a.clone(), b.clone(), None);

        let callers: Vec<_> = (0..20)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.get_or_compute("acc").await })
            })
            .collect();

        // Hold the upstreams until every caller has attached.
        tokio::time::timeout(Duration::from_secs(5), async {
            while lookups(&metrics, "miss") + lookups(&metrics, "joined") < 20 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        gate.add_permits(100);

        let mut results = Vec::new();
        for caller in callers {
            results.push(caller.await.unwrap());
        }

        assert_eq!(a.calls(), 1);
        assert_eq!(b.calls(), 1);
        assert_eq!(lookups(&metrics, "miss"), 1);
        assert!(results.iter().all(|r| Arc::ptr_eq(r, &results[0])));
    }

    #[tokio::test]
    async fn test_full_success_is_cached() {
        let a = ScriptedSource::new("a", one_txn("1"));
        let b = ScriptedSource::new("b", one_txn("2"));
        let (cache, metrics) = cache_with(a.clone(), b.clone(), None);

        let first = cache.get_or_compute("acc").await;
        let second = cache.get_or_compute("acc").await;

        assert!(first.is_cacheable());
        assert_eq!(first, second);
        assert_eq!(a.calls(), 1);
        assert_eq!(b.calls(), 1);
        assert_eq!(lookups(&metrics, "hit"), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_accounts_are_cached_independently() {
        let a = ScriptedSource::new("a", one_txn("1"));
        let b = ScriptedSource::new("b", one_txn("2"));
        let (cache, _) = cache_with(a.clone(), b.clone(), None);

        cache.get_or_compute("alice").await;
        cache.get_or_compute("bob").await;

        assert_eq!(a.calls(), 2);
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test]
    async fn test_partial_success_is_served_but_not_cached() {
        let a = ScriptedSource::new("a", one_txn("1"));
        let b = ScriptedSource::new("b", status(503));
        let (cache, _) = cache_with(a.clone(), b.clone(), None);

        let first = cache.get_or_compute("acc").await;
        match first.as_ref() {
            AggregateResult::Ready { body, cacheable } => {
                let txns: Vec<Transaction> = serde_json::from_slice(body).unwrap();
                assert_eq!(txns.len(), 1);
                assert!(!cacheable);
            }
            other => panic!("expected ready result, got {:?}", other),
        }
        assert_eq!(cache.len(), 0);

        cache.get_or_compute("acc").await;
        assert_eq!(a.calls(), 2);
        assert_eq!(b.calls(), 2);
    }

    #[tokio::test]
    async fn test_total_failure_is_not_cached() {
        let a = ScriptedSource::new("a", status(503));
        let b = ScriptedSource::new("b", status(503));
        let (cache, _) = cache_with(a.clone(), b.clone(), None);

        let first = cache.get_or_compute("acc").await;
        assert_eq!(*first, AggregateResult::Failed { status: 503 });

        cache.get_or_compute("acc").await;
        assert_eq!(a.calls(), 2);
        assert_eq!(b.calls(), 2);
    }

    #[tokio::test]
    async fn test_recovered_upstream_becomes_cacheable() {
        let a = ScriptedSource::new("a", one_txn("1"));
        let b = ScriptedSource::new(
            "b",
            Box::new(|call: usize| {
                if call == 0 {
                    UpstreamOutcome::Failure(FetchError::UnexpectedStatus(529))
                } else {
                    UpstreamOutcome::Success(Vec::new())
                }
            }),
        );
        let (cache, _) = cache_with(a.clone(), b.clone(), None);

        assert!(!cache.get_or_compute("acc").await.is_cacheable());
        assert!(cache.get_or_compute("acc").await.is_cacheable());
        cache.get_or_compute("acc").await;

        assert_eq!(b.calls(), 2);
    }

    #[tokio::test]
    async fn test_invalidate_forces_recompute() {
        let a = ScriptedSource::new("a", one_txn("1"));
        let b = ScriptedSource::new("b", one_txn("2"));
        let (cache, _) = cache_with(a.clone(), b.clone(), None);

        cache.get_or_compute("acc").await;
        assert!(cache.invalidate("acc"));
        assert!(!cache.invalidate("acc"));

        cache.get_or_compute("acc").await;
        assert_eq!(a.calls(), 2);
    }

    #[tokio::test]
    async fn test_invalidate_leaves_pending_flight() {
        let gate = Arc::new(Semaphore::new(0));
        let a = ScriptedSource::gated("a", gate.clone(), one_txn("1"));
        let b = ScriptedSource::gated("b", gate.clone(), one_txn("2"));
        let (cache, _) = cache_with(a.clone(), b.clone(), None);

        let pending = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.get_or_compute("acc").await })
        };
        while cache.len() == 0 {
            tokio::task::yield_now().await;
        }

        assert!(!cache.invalidate("acc"));

        gate.add_permits(10);
        pending.await.unwrap();
        cache.get_or_compute("acc").await;
        assert_eq!(a.calls(), 1);
    }

    #[tokio::test]
    async fn test_expired_entry_is_recomputed() {
        let a = ScriptedSource::new("a", one_txn("1"));
        let b = ScriptedSource::new("b", one_txn("2"));
        let ttl = Some(Duration::from_millis(20));
        let (cache, metrics) = cache_with(a.clone(), b.clone(), ttl);

        cache.get_or_compute("acc").await;
        cache.get_or_compute("acc").await;
        assert_eq!(a.calls(), 1);

        tokio::time::sleep(Duration::from_millis(40)).await;
        cache.get_or_compute("acc").await;

        assert_eq!(a.calls(), 2);
        assert_eq!(lookups(&metrics, "expired"), 1);
    }

    #[tokio::test]
    async fn test_panicking_source_resolves_as_failure() {
        let a = ScriptedSource::new(
            "a",
            Box::new(|_: usize| -> UpstreamOutcome { panic!("upstream exploded") }),
        );
        let b = ScriptedSource::new("b", one_txn("2"));
        let (cache, _) = cache_with(a.clone(), b.clone(), None);

        let result = cache.get_or_compute("acc").await;

        assert_eq!(*result, AggregateResult::Failed { status: 500 });
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_cancelled_computation_leaves_no_entry() {
        let gate = Arc::new(Semaphore::new(0));
        let a = ScriptedSource::gated("a", gate.clone(), one_txn("1"));
        let b = ScriptedSource::gated("b", gate, one_txn("2"));
        let (cache, metrics) = cache_with(a.clone(), b.clone(), None);

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let mut caller = {
            let cache = cache.clone();
            Box::pin(async move { cache.get_or_compute("acc").await })
        };

        // Start the computation and leave it parked on the gate.
        runtime.block_on(async {
            let waited = tokio::time::timeout(Duration::from_millis(50), caller.as_mut()).await;
            assert!(waited.is_err());
        });
        assert_eq!(cache.len(), 1);

        // Shutting the runtime down cancels the spawned computation.
        drop(runtime);

        let result = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
            .block_on(caller);

        assert_eq!(*result, AggregateResult::Failed { status: 500 });
        assert_eq!(cache.len(), 0);
        assert_eq!(metrics.cache_entries.get(), 0);
    }
}

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

// ============================================================================
// Metrics Module - Prometheus metrics for observability
// ============================================================================
//
// Provides metrics for:
// - Upstream attempts (per upstream, per result) and retries
// - Aggregate computations (full, partial, failed) and their latency
// - Cache lookups (miss, joined, hit, expired) and live entries
//
// All metrics are registered with Prometheus and can be scraped via /metrics
// ============================================================================

/// Central metrics registry for the entire application
pub struct Metrics {
    registry: Registry,

    // Upstream Metrics
    pub upstream_requests: IntCounterVec,
    pub upstream_retries: IntCounterVec,

    // Aggregation Metrics
    pub aggregate_requests: IntCounterVec,
    pub aggregate_duration: Histogram,

    // Cache Metrics
    pub cache_lookups: IntCounterVec,
    pub cache_entries: IntGauge,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let upstream_requests = IntCounterVec::new(
            Opts::new("upstream_requests_total", "Total HTTP attempts sent to upstreams"),
            &["upstream", "result"],
        )?;
        registry.register(Box::new(upstream_requests.clone()))?;

        let upstream_retries = IntCounterVec::new(
            Opts::new("upstream_retries_total", "Retries issued after a transient upstream status"),
            &["upstream"],
        )?;
        registry.register(Box::new(upstream_retries.clone()))?;

        let aggregate_requests = IntCounterVec::new(
            Opts::new("aggregate_requests_total", "Aggregate computations by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(aggregate_requests.clone()))?;

        let aggregate_duration = Histogram::with_opts(
            HistogramOpts::new("aggregate_duration_seconds", "Aggregate computation duration")
                .buckets(vec![0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
        )?;
        registry.register(Box::new(aggregate_duration.clone()))?;

        let cache_lookups = IntCounterVec::new(
            Opts::new("cache_lookups_total", "Aggregation cache lookups by result"),
            &["result"],
        )?;
        registry.register(Box::new(cache_lookups.clone()))?;

        let cache_entries = IntGauge::new("cache_entries", "Live aggregation cache entries")?;
        registry.register(Box::new(cache_entries.clone()))?;

        Ok(Self {
            registry,
            upstream_requests,
            upstream_retries,
            aggregate_requests,
            aggregate_duration,
            cache_lookups,
            cache_entries,
        })
    }

    /// Get the Prometheus registry for exposing metrics via HTTP
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render every registered metric in the Prometheus text format
    pub fn encode(&self) -> anyhow::Result<Vec<u8>> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(buffer)
    }

    /// Helper to record a single upstream attempt
    pub fn record_upstream_attempt(&self, upstream: &str, result: &str) {
        self.upstream_requests.with_label_values(&[upstream, result]).inc();
    }

    pub fn record_upstream_retry(&self, upstream: &str) {
        self.upstream_retries.with_label_values(&[upstream]).inc();
    }

    /// Helper to record a finished aggregate computation
    pub fn record_aggregate(&self, outcome: &str, duration_secs: f64) {
        self.aggregate_requests.with_label_values(&[outcome]).inc();
        self.aggregate_duration.observe(duration_secs);
    }

    pub fn record_cache_lookup(&self, result: &str) {
        self.cache_lookups.with_label_values(&[result]).inc();
    }

    pub fn set_cache_entries(&self, entries: usize) {
        self.cache_entries.set(entries as i64);
    }
}

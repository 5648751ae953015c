use std::sync::Arc;
use std::time::Instant;

use crate::metrics::Metrics;
use crate::upstream::TransactionSource;

use super::{merge, AggregateResult};

/// Queries both upstreams concurrently and merges once both have answered.
pub struct Aggregator {
    upstream_a: Arc<dyn TransactionSource>,
    upstream_b: Arc<dyn TransactionSource>,
    metrics: Arc<Metrics>,
}

impl Aggregator {
    pub fn new(
        upstream_a: Arc<dyn TransactionSource>,
        upstream_b: Arc<dyn TransactionSource>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            upstream_a,
            upstream_b,
            metrics,
        }
    }

    pub async fn aggregate(&self, account: &str) -> AggregateResult {
        let started = Instant::now();

        let (outcome_a, outcome_b) = tokio::join!(
            self.upstream_a.fetch(account),
            self.upstream_b.fetch(account)
        );

        let outcome = match (outcome_a.is_success(), outcome_b.is_success()) {
            (true, true) => "full",
            (false, false) => {
                tracing::error!(
                    account = %account,
                    upstream_a = %self.upstream_a.name(),
                    upstream_a_status = ?outcome_a.status(),
                    upstream_b = %self.upstream_b.name(),
                    upstream_b_status = ?outcome_b.status(),
                    "Both upstreams failed"
                );
                "failed"
            }
            (a_ok, _) => {
                let failed = if a_ok { &self.upstream_b } else { &self.upstream_a };
                tracing::warn!(
                    account = %account,
                    upstream = %failed.name(),
                    "Serving partial aggregate"
                );
                "partial"
            }
        };

        let result = merge(outcome_a, outcome_b);

        self.metrics
            .record_aggregate(outcome, started.elapsed().as_secs_f64());

        result
    }
}

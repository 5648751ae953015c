// ============================================================================
// Upstream Module
// ============================================================================
//
// Everything needed to fetch one account's transactions from one upstream:
// - errors  - FetchError and the retryable status set
// - client  - reqwest-backed UpstreamClient with bounded retry, no redirects
//
// The aggregation layer only sees the TransactionSource trait, so tests can
// swap in scripted sources.
//
// ============================================================================

mod client;
mod errors;
#[cfg(test)]
pub(crate) mod mock;

use async_trait::async_trait;

use crate::models::Transaction;

pub use client::{http_client, UpstreamClient};
pub use errors::FetchError;

/// Final result of one fetch chain against one upstream, after retries.
#[derive(Debug)]
pub enum UpstreamOutcome {
    Success(Vec<Transaction>),
    Failure(FetchError),
}

impl UpstreamOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, UpstreamOutcome::Success(_))
    }

    /// Status carried by a failure, `None` for successes and for
    /// transport or decode failures.
    pub fn status(&self) -> Option<u16> {
        match self {
            UpstreamOutcome::Success(_) => None,
            UpstreamOutcome::Failure(err) => err.status(),
        }
    }
}

#[async_trait]
pub trait TransactionSource: Send + Sync {
    /// Name used in logs and metric labels.
    fn name(&self) -> &str;

    async fn fetch(&self, account: &str) -> UpstreamOutcome;
}

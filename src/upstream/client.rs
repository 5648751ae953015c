use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::redirect::Policy;
use reqwest::StatusCode;

use super::{FetchError, TransactionSource, UpstreamOutcome};
use crate::metrics::Metrics;
use crate::models::Transaction;
use crate::utils::{retry_on_transient, RetryConfig, RetryResult};

const TRANSACTIONS_PATH: &str = "/transactions";

/// Pooled HTTP client for the upstreams.
///
/// Redirects are not followed: a 3xx is the upstream's answer and fails the
/// fetch with that status like any other non-200.
pub fn http_client(timeout: Duration) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .redirect(Policy::none())
        .build()
}

/// Fetches transactions for one account from one fixed upstream.
///
/// Each call is independent: no state survives between fetches apart from
/// the shared connection pool inside `reqwest::Client`. Request timeouts are
/// whatever the supplied client was built with.
pub struct UpstreamClient {
    name: String,
    transactions_url: String,
    http: reqwest::Client,
    retry: RetryConfig,
    metrics: Arc<Metrics>,
}

impl UpstreamClient {
    pub fn new(
        name: impl Into<String>,
        base_url: &str,
        http: reqwest::Client,
        retry: RetryConfig,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            name: name.into(),
            transactions_url: format!("{}{}", base_url.trim_end_matches('/'), TRANSACTIONS_PATH),
            http,
            retry,
            metrics,
        }
    }

    /// Fetch with an explicit attempt budget instead of the configured one.
    pub async fn fetch_with_budget(&self, account: &str, max_attempts: u32) -> UpstreamOutcome {
        let retry = RetryConfig::new(max_attempts);

        let result = retry_on_transient(&retry, |attempt| async move {
            if attempt > 1 {
                self.metrics.record_upstream_retry(&self.name);
            }

            let result = self.attempt(account).await;
            match &result {
                Ok(_) => self.metrics.record_upstream_attempt(&self.name, "200"),
                Err(err) => self.metrics.record_upstream_attempt(&self.name, &err.label()),
            }
            result
        })
        .await;

        match result {
            RetryResult::Success(transactions) => {
                tracing::debug!(
                    upstream = %self.name,
                    account = %account,
                    count = transactions.len(),
                    "Fetched transactions"
                );
                UpstreamOutcome::Success(transactions)
            }
            RetryResult::Failed(err) | RetryResult::PermanentFailure(err) => {
                tracing::warn!(
                    upstream = %self.name,
                    account = %account,
                    error = %err,
                    "Upstream fetch failed"
                );
                UpstreamOutcome::Failure(err)
            }
        }
    }

    async fn attempt(&self, account: &str) -> Result<Vec<Transaction>, FetchError> {
        let response = self
            .http
            .get(&self.transactions_url)
            .query(&[("account", account)])
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(FetchError::UnexpectedStatus(status.as_u16()));
        }

        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }
}

#[async_trait]
impl TransactionSource for UpstreamClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, account: &str) -> UpstreamOutcome {
        self.fetch_with_budget(account, self.retry.max_attempts).await
    }
}

//! Runtime configuration.
//!
//! Loaded from `AGGREGATOR_*` environment variables, falling back to the
//! defaults below for anything unset or unparseable.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    /// Address the front door listens on.
    pub bind_address: String,
    pub port: u16,

    pub upstream_a_url: String,
    pub upstream_b_url: String,

    /// Total attempts per upstream fetch, including the first.
    pub max_attempts: u32,

    /// Per-request timeout applied by the HTTP client.
    pub request_timeout: Duration,

    /// Lifetime of a fully successful aggregate. `None` keeps it until
    /// explicitly invalidated.
    pub cache_ttl: Option<Duration>,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 8080,
            upstream_a_url: "http://localhost:8888".to_string(),
            upstream_b_url: "http://localhost:8889".to_string(),
            max_attempts: 5,
            request_timeout: Duration::from_millis(5000),
            cache_ttl: None,
        }
    }
}

impl AggregatorConfig {
    /// Create config from environment variables.
    ///
    /// Environment variables:
    /// - `AGGREGATOR_BIND_ADDRESS` (default: 0.0.0.0)
    /// - `AGGREGATOR_PORT` (default: 8080)
    /// - `AGGREGATOR_UPSTREAM_A_URL` (default: http://localhost:8888)
    /// - `AGGREGATOR_UPSTREAM_B_URL` (default: http://localhost:8889)
    /// - `AGGREGATOR_MAX_ATTEMPTS` (default: 5)
    /// - `AGGREGATOR_REQUEST_TIMEOUT_MS` (default: 5000)
    /// - `AGGREGATOR_CACHE_TTL_SECS`: 0 disables expiry (default: 0)
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let bind_address = lookup("AGGREGATOR_BIND_ADDRESS")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or(defaults.bind_address);

        let port = lookup("AGGREGATOR_PORT")
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(defaults.port);

        let upstream_a_url = lookup("AGGREGATOR_UPSTREAM_A_URL")
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(defaults.upstream_a_url);

        let upstream_b_url = lookup("AGGREGATOR_UPSTREAM_B_URL")
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(defaults.upstream_b_url);

        let max_attempts = lookup("AGGREGATOR_MAX_ATTEMPTS")
            .and_then(|s| s.trim().parse::<u32>().ok())
            .unwrap_or(defaults.max_attempts)
            .max(1);

        let request_timeout = lookup("AGGREGATOR_REQUEST_TIMEOUT_MS")
            .and_then(|s| s.trim().parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.request_timeout);

        let cache_ttl = match lookup("AGGREGATOR_CACHE_TTL_SECS")
            .and_then(|s| s.trim().parse::<u64>().ok())
        {
            Some(0) | None => None,
            Some(secs) => Some(Duration::from_secs(secs)),
        };

        Self {
            bind_address,
            port,
            upstream_a_url: normalize_base_url(&upstream_a_url),
            upstream_b_url: normalize_base_url(&upstream_b_url),
            max_attempts,
            request_timeout,
            cache_ttl,
        }
    }
}

fn normalize_base_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

use std::sync::Arc;

use actix_web::web;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod aggregation;
mod api;
mod config;
mod metrics;
mod models;
mod upstream;
mod utils;

use aggregation::{AggregationCache, Aggregator};
use config::AggregatorConfig;
use upstream::UpstreamClient;
use utils::RetryConfig;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Initialize structured logging with environment-based filtering
    // Default to INFO level, can be overridden with RUST_LOG env var
    // Example: RUST_LOG=debug cargo run
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,txn_aggregator=debug")),
        )
        .init();

    let config = AggregatorConfig::from_env();
    tracing::info!(
        upstream_a = %config.upstream_a_url,
        upstream_b = %config.upstream_b_url,
        max_attempts = config.max_attempts,
        request_timeout_ms = config.request_timeout.as_millis() as u64,
        cache_ttl_secs = ?config.cache_ttl.map(|ttl| ttl.as_secs()),
        "Starting transaction aggregator"
    );

    let metrics = Arc::new(metrics::Metrics::new()?);
    tracing::info!("Metrics registry created with {} metrics", metrics.registry().gather().len());

    // One pooled client shared by both upstreams; the timeout bounds every attempt.
    let http = upstream::http_client(config.request_timeout)?;
    let retry = RetryConfig::new(config.max_attempts);

    let upstream_a = UpstreamClient::new(
        "upstream-a",
        &config.upstream_a_url,
        http.clone(),
        retry.clone(),
        metrics.clone(),
    );
    let upstream_b = UpstreamClient::new(
        "upstream-b",
        &config.upstream_b_url,
        http,
        retry,
        metrics.clone(),
    );

    let aggregator = Arc::new(Aggregator::new(
        Arc::new(upstream_a),
        Arc::new(upstream_b),
        metrics.clone(),
    ));
    let cache = Arc::new(AggregationCache::new(aggregator, config.cache_ttl, metrics.clone()));

    let state = web::Data::new(api::AppState { cache, metrics });
    api::start_server(state, &config.bind_address, config.port).await?;

    tracing::info!("Aggregator stopped");
    Ok(())
}

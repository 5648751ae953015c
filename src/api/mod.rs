// ============================================================================
// Front Door - HTTP boundary
// ============================================================================
//
// Routes:
// - GET /aggregate?account=...  merged transactions for one account
// - DELETE /cache/{account}     drop a cached aggregate
// - GET /metrics                Prometheus exposition
// - GET /health                 liveness plus cache size
//
// ============================================================================

mod handlers;

use std::sync::Arc;

use actix_web::{web, App, HttpServer};

use crate::aggregation::AggregationCache;
use crate::metrics::Metrics;

pub struct AppState {
    pub cache: Arc<AggregationCache>,
    pub metrics: Arc<Metrics>,
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/aggregate")
            .route(web::get().to(handlers::aggregate))
            .default_service(web::to(handlers::method_not_allowed)),
    )
    .route("/cache/{account}", web::delete().to(handlers::invalidate))
    .route("/metrics", web::get().to(handlers::metrics_handler))
    .route("/health", web::get().to(handlers::health_handler));
}

/// Start the front door and run until shutdown.
pub async fn start_server(
    state: web::Data<AppState>,
    bind_address: &str,
    port: u16,
) -> std::io::Result<()> {
    tracing::info!("Starting aggregator on http://{}:{}/aggregate", bind_address, port);

    HttpServer::new(move || App::new().app_data(state.clone()).configure(configure))
        .bind((bind_address, port))?
        .run()
        .await
}

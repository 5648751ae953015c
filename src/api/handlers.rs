use std::collections::HashMap;

use actix_web::http::StatusCode;
use actix_web::{web, HttpRequest, HttpResponse, Responder};

use super::AppState;
use crate::aggregation::AggregateResult;

const JSON_CONTENT_TYPE: &str = "application/json;charset=UTF-8";
const TEXT_CONTENT_TYPE: &str = "text/plain;charset=UTF-8";
const FAILURE_MESSAGE: &str = "Failed to fetch transactions";

/// `GET /aggregate?account=...`
pub async fn aggregate(state: web::Data<AppState>, req: HttpRequest) -> HttpResponse {
    let account = web::Query::<HashMap<String, String>>::from_query(req.query_string())
        .ok()
        .and_then(|query| query.into_inner().remove("account"))
        .filter(|account| !account.trim().is_empty());

    let Some(account) = account else {
        return HttpResponse::BadRequest()
            .content_type(TEXT_CONTENT_TYPE)
            .body("Missing account parameter");
    };

    let result = state.cache.get_or_compute(&account).await;

    match result.as_ref() {
        AggregateResult::Ready { body, .. } => HttpResponse::Ok()
            .content_type(JSON_CONTENT_TYPE)
            .body(body.clone()),
        AggregateResult::Failed { .. } => {
            let status =
                StatusCode::from_u16(result.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            HttpResponse::build(status)
                .content_type(TEXT_CONTENT_TYPE)
                .body(FAILURE_MESSAGE)
        }
    }
}

/// `DELETE /cache/{account}`: forget a cached aggregate.
pub async fn invalidate(state: web::Data<AppState>, account: web::Path<String>) -> HttpResponse {
    if state.cache.invalidate(&account) {
        HttpResponse::NoContent().finish()
    } else {
        HttpResponse::NotFound().finish()
    }
}

pub async fn method_not_allowed() -> HttpResponse {
    HttpResponse::MethodNotAllowed().finish()
}

pub async fn metrics_handler(state: web::Data<AppState>) -> HttpResponse {
    match state.metrics.encode() {
        Ok(buffer) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(buffer),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            HttpResponse::InternalServerError().finish()
        }
    }
}

pub async fn health_handler(state: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "service": "txn-aggregator",
        "cached_accounts": state.cache.len(),
    }))
}

//! Scripted upstream served over real HTTP on an ephemeral port, shared by the
//! client and front door tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use actix_web::http::StatusCode;
use actix_web::{web, App, HttpResponse, HttpServer};

pub const ONE_TXN: &str = r#"[{
    "id": "1",
    "serverId": "a",
    "account": "acc",
    "amount": "10",
    "timestamp": "2024-01-01T00:00:00Z"
}]"#;

/// Where 3xx answers point; it always serves `ONE_TXN`.
const REDIRECT_TARGET: &str = "/elsewhere";

pub struct Script {
    pub hits: AtomicUsize,
    pub redirected_hits: AtomicUsize,
    pub last_account: Mutex<Option<String>>,
    responses: Vec<(u16, String)>,
}

async fn scripted_transactions(
    script: web::Data<Script>,
    query: web::Query<HashMap<String, String>>,
) -> HttpResponse {
    *script.last_account.lock().unwrap() = query.get("account").cloned();

    let hit = script.hits.fetch_add(1, Ordering::SeqCst);
    let (status, body) = script.responses[hit.min(script.responses.len() - 1)].clone();

    let mut response = HttpResponse::build(StatusCode::from_u16(status).unwrap());
    if (300..400).contains(&status) {
        response.insert_header(("Location", REDIRECT_TARGET));
    }
    response.content_type("application/json").body(body)
}

async fn redirect_target(script: web::Data<Script>) -> HttpResponse {
    script.redirected_hits.fetch_add(1, Ordering::SeqCst);
    HttpResponse::Ok()
        .content_type("application/json")
        .body(ONE_TXN)
}

/// Serve `responses` in order on an ephemeral port, repeating the last one.
pub fn spawn_upstream(responses: Vec<(u16, &str)>) -> (String, web::Data<Script>) {
    let script = web::Data::new(Script {
        hits: AtomicUsize::new(0),
        redirected_hits: AtomicUsize::new(0),
        last_account: Mutex::new(None),
        responses: responses
            .into_iter()
            .map(|(status, body)| (status, body.to_string()))
            .collect(),
    });

    let data = script.clone();
    let server = HttpServer::new(move || {
        App::new()
            .app_data(data.clone())
            .route("/transactions", web::get().to(scripted_transactions))
            .route(REDIRECT_TARGET, web::get().to(redirect_target))
    })
    .workers(1)
    .bind(("127.0.0.1", 0))
    .unwrap();

    let addr = server.addrs()[0];
    actix_web::rt::spawn(server.run());

    (format!("http://{}", addr), script)
}

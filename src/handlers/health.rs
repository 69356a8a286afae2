//! `GET /health`: component status, used by orchestration/uptime checks.

use actix_web::{get, web, HttpRequest, HttpResponse};
use serde::Serialize;

use crate::app_state::AppState;
use crate::errors::AppResult;
use crate::middleware::RequestContext;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(health);
}

#[derive(Serialize)]
struct Components {
    api: &'static str,
    db_connected: bool,
    db_ping: bool,
    scheduler: &'static str,
}

#[derive(Serialize)]
struct HealthResponse {
    request_id: uuid::Uuid,
    api_latency_ms: u64,
    components: Components,
}

#[get("/health")]
async fn health(req: HttpRequest, state: web::Data<AppState>) -> AppResult<HttpResponse> {
    let ctx = *req.extensions().get::<RequestContext>().expect("request_id middleware installed");

    let db_ping = state.store.count_raw().await.is_ok();

    Ok(HttpResponse::Ok().json(HealthResponse {
        request_id: ctx.request_id,
        api_latency_ms: ctx.api_latency_ms(),
        components: Components {
            api: "ok",
            db_connected: db_ping,
            db_ping,
            scheduler: if state.scheduler_is_running() { "running" } else { "stopped" },
        },
    }))
}

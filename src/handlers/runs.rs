//! `GET /runs` and `GET /runs/:id`.

use actix_web::{get, web, HttpRequest, HttpResponse};
use serde::Serialize;

use crate::app_state::AppState;
use crate::errors::{AppError, AppResult};
use crate::middleware::RequestContext;
use crate::models::RunLedgerEntry;

const DEFAULT_RECENT_LIMIT: usize = 20;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(list_runs).service(get_run);
}

#[derive(Serialize)]
struct RunsResponse {
    request_id: uuid::Uuid,
    api_latency_ms: u64,
    runs: Vec<RunLedgerEntry>,
}

#[get("/runs")]
async fn list_runs(req: HttpRequest, state: web::Data<AppState>) -> AppResult<HttpResponse> {
    let ctx = *req.extensions().get::<RequestContext>().expect("request_id middleware installed");
    let runs = state.ledger.list_recent(DEFAULT_RECENT_LIMIT).await?;

    Ok(HttpResponse::Ok().json(RunsResponse {
        request_id: ctx.request_id,
        api_latency_ms: ctx.api_latency_ms(),
        runs,
    }))
}

#[derive(Serialize)]
struct RunDetailResponse {
    request_id: uuid::Uuid,
    api_latency_ms: u64,
    #[serde(flatten)]
    run: RunLedgerEntry,
}

#[get("/runs/{id}")]
async fn get_run(req: HttpRequest, state: web::Data<AppState>, path: web::Path<uuid::Uuid>) -> AppResult<HttpResponse> {
    let ctx = *req.extensions().get::<RequestContext>().expect("request_id middleware installed");
    let run_id = path.into_inner();

    let run = state
        .ledger
        .get_by_id(run_id)
        .await?
        .ok_or(AppError::RunNotFound(run_id))?;

    Ok(HttpResponse::Ok().json(RunDetailResponse {
        request_id: ctx.request_id,
        api_latency_ms: ctx.api_latency_ms(),
        run,
    }))
}

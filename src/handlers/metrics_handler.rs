//! `GET /metrics`: unauthenticated Prometheus text exposition.

use actix_web::{get, web, HttpResponse};

use crate::app_state::AppState;
use crate::errors::{AppError, AppResult};

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(metrics);
}

#[get("/metrics")]
async fn metrics(state: web::Data<AppState>) -> AppResult<HttpResponse> {
    let body = state
        .metrics
        .export()
        .map_err(|e| AppError::InternalError(anyhow::anyhow!(e)))?;

    Ok(HttpResponse::Ok().content_type("text/plain; version=0.0.4").body(body))
}

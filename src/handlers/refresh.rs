//! `POST /refresh`: trigger a run, asynchronously, returning 202 immediately.

use actix_web::{post, web, HttpRequest, HttpResponse};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::error;

use crate::app_state::AppState;
use crate::errors::AppResult;
use crate::middleware::RequestContext;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(refresh);
}

#[derive(Serialize)]
struct HealthSnapshot {
    db_connected: bool,
}

#[derive(Serialize)]
struct PreRunCounts {
    raw: u64,
    normalized: u64,
}

#[derive(Serialize)]
struct RefreshResponse {
    request_id: uuid::Uuid,
    run_id: uuid::Uuid,
    api_latency_ms: u64,
    health: HealthSnapshot,
    pre_run_counts: PreRunCounts,
    message: &'static str,
}

#[post("/refresh")]
async fn refresh(req: HttpRequest, state: web::Data<AppState>) -> AppResult<HttpResponse> {
    let ctx = *req.extensions().get::<RequestContext>().expect("request_id middleware installed");

    let pre_run_counts = PreRunCounts {
        raw: state.store.count_raw().await.unwrap_or(0),
        normalized: state.store.count_normalized().await.unwrap_or(0),
    };
    let health = HealthSnapshot {
        db_connected: state.store.count_raw().await.is_ok(),
    };

    match state.run_guard.clone().try_lock_owned() {
        Ok(permit) => {
            let run_id = uuid::Uuid::new_v4();
            state.set_current_run(Some(run_id)).await;

            let orchestrator = state.orchestrator.clone();
            let state_for_task = state.clone();
            tokio::spawn(async move {
                let _permit = permit;
                if let Err(e) = orchestrator.run_etl(run_id, CancellationToken::new()).await {
                    error!(%run_id, error = %e, "run failed");
                }
                state_for_task.set_current_run(None).await;
            });

            Ok(HttpResponse::Accepted().json(RefreshResponse {
                request_id: ctx.request_id,
                run_id,
                api_latency_ms: ctx.api_latency_ms(),
                health,
                pre_run_counts,
                message: "run started",
            }))
        }
        Err(_) => {
            let run_id = state.current_run().await.unwrap_or_default();
            Ok(HttpResponse::Accepted().json(RefreshResponse {
                request_id: ctx.request_id,
                run_id,
                api_latency_ms: ctx.api_latency_ms(),
                health,
                pre_run_counts,
                message: "run already in progress",
            }))
        }
    }
}

//! `GET /stats`: record counts plus a summary of the most recent run.

use actix_web::{get, web, HttpRequest, HttpResponse};
use serde::Serialize;

use crate::app_state::AppState;
use crate::errors::AppResult;
use crate::middleware::RequestContext;

const RECENT_RUNS_FOR_AVERAGES: usize = 20;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(stats);
}

#[derive(Serialize)]
struct Counts {
    raw: u64,
    normalized: u64,
}

#[derive(Serialize)]
struct Incremental {
    last_run_new_records: u64,
    last_run_skipped: u64,
    total_duplicate_prevention: u64,
}

#[derive(Serialize)]
struct StatsResponse {
    request_id: uuid::Uuid,
    api_latency_ms: u64,
    counts: Counts,
    latency_avg_ms: f64,
    error_rate: f64,
    incremental: Incremental,
}

#[get("/stats")]
async fn stats(req: HttpRequest, state: web::Data<AppState>) -> AppResult<HttpResponse> {
    let ctx = *req.extensions().get::<RequestContext>().expect("request_id middleware installed");

    let counts = Counts {
        raw: state.store.count_raw().await?,
        normalized: state.store.count_normalized().await?,
    };

    let recent_runs = state.ledger.list_recent(RECENT_RUNS_FOR_AVERAGES).await?;

    let latency_avg_ms = if recent_runs.is_empty() {
        0.0
    } else {
        recent_runs.iter().map(|r| r.total_latency_ms as f64).sum::<f64>() / recent_runs.len() as f64
    };

    let (total_processed, total_errors): (u64, u64) = recent_runs.iter().fold((0, 0), |(proc, err), run| {
        let run_processed: u64 = run.source_stats.values().map(|s| s.processed as u64).sum();
        let run_errors: u64 = run.source_stats.values().map(|s| s.validation_errors as u64).sum();
        (proc + run_processed, err + run_errors)
    });
    let error_rate = if total_processed + total_errors == 0 {
        0.0
    } else {
        total_errors as f64 / (total_processed + total_errors) as f64
    };

    let total_duplicate_prevention: u64 = recent_runs
        .iter()
        .flat_map(|r| r.source_stats.values())
        .map(|s| s.skipped_by_watermark as u64)
        .sum();

    let (last_run_new_records, last_run_skipped) = match recent_runs.first() {
        Some(run) => (
            run.source_stats.values().map(|s| s.processed as u64).sum(),
            run.source_stats.values().map(|s| s.skipped_by_watermark as u64).sum(),
        ),
        None => (0, 0),
    };

    Ok(HttpResponse::Ok().json(StatsResponse {
        request_id: ctx.request_id,
        api_latency_ms: ctx.api_latency_ms(),
        counts,
        latency_avg_ms,
        error_rate,
        incremental: Incremental {
            last_run_new_records,
            last_run_skipped,
            total_duplicate_prevention,
        },
    }))
}

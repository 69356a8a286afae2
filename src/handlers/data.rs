//! `GET /data`: cursor-paginated read of normalized records.

use actix_web::{get, web, HttpRequest, HttpResponse};
use serde::{Deserialize, Serialize};

use crate::app_state::AppState;
use crate::errors::{AppError, AppResult};
use crate::middleware::RequestContext;
use crate::models::UnifiedRecord;
use crate::store::NormalizedCursor;

const DEFAULT_LIMIT: usize = 50;
const MAX_LIMIT: usize = 500;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(query_data);
}

#[derive(Deserialize)]
struct DataQuery {
    limit: Option<usize>,
    cursor: Option<String>,
}

#[derive(Serialize)]
struct DataResponse {
    request_id: uuid::Uuid,
    api_latency_ms: u64,
    records: Vec<UnifiedRecord>,
    next_cursor: Option<String>,
}

#[get("/data")]
async fn query_data(req: HttpRequest, state: web::Data<AppState>, query: web::Query<DataQuery>) -> AppResult<HttpResponse> {
    let ctx = *req.extensions().get::<RequestContext>().expect("request_id middleware installed");

    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let cursor = query
        .cursor
        .as_deref()
        .map(|token| {
            NormalizedCursor::decode(token)
                .ok_or_else(|| AppError::ValidationError("invalid cursor".to_string()))
        })
        .transpose()?;

    let (records, next_cursor) = state.store.query_normalized(limit, cursor).await?;

    Ok(HttpResponse::Ok().json(DataResponse {
        request_id: ctx.request_id,
        api_latency_ms: ctx.api_latency_ms(),
        records,
        next_cursor: next_cursor.map(|c| c.encode()),
    }))
}

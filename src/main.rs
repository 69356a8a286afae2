//! Crypto market-data ETL service
//!
//! Multi-source ingestion pipeline: rate-gated extraction, schema-drift
//! reconciliation, checkpointed batch loading, and an append-only run
//! ledger, fronted by an actix-web control/query surface.

mod app_state;
mod checkpoint_store;
mod config;
mod errors;
mod extractor;
mod handlers;
mod metrics;
mod middleware;
mod models;
mod orchestrator;
mod outlier_detector;
mod rate_gate;
mod record_sink;
mod run_ledger;
mod scheduler;
mod schema_mapper;
mod store;
mod validator;
mod watermark;

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Instant;

use actix_web::{web, App, HttpServer};
use tokio::sync::{Mutex, RwLock};
use tracing::info;
use tracing_subscriber::EnvFilter;

use app_state::AppState;
use checkpoint_store::CheckpointStore;
use config::AppConfig;
use extractor::SourceExtractor;
use metrics::MetricsRegistry;
use middleware::{LoggingMiddleware, RequestIdMiddleware};
use models::Source;
use orchestrator::Orchestrator;
use outlier_detector::OutlierDetector;
use rate_gate::RateGate;
use record_sink::RecordSink;
use run_ledger::RunLedger;
use schema_mapper::SchemaMapper;
use store::mongo::MongoStore;
use watermark::Watermark;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .json()
        .init();

    let config = Arc::new(AppConfig::load()?);
    info!(host = %config.server.host, port = config.server.port, "loaded configuration");

    let store: Arc<dyn store::DocumentStore> =
        Arc::new(MongoStore::connect(&config.mongodb.uri, &config.mongodb.database).await?);

    let metrics = MetricsRegistry;
    for source in Source::ALL {
        let rl = config.rate_limit_for(source.as_str());
        metrics.set_quota(source.as_str(), rl.requests_per_minute);
    }

    let rate_gate = Arc::new(RateGate::new(metrics));
    for source in Source::ALL {
        let rl = config.rate_limit_for(source.as_str());
        rate_gate.configure_source(source.as_str(), rl.requests_per_minute, rl.burst_capacity, rl.retry_backoff_ms);
    }

    let schema_mapper = Arc::new(SchemaMapper::new(config.static_aliases.clone()));
    let extractor = Arc::new(SourceExtractor::new(rate_gate.clone(), schema_mapper.clone(), metrics, config.clone())?);
    let sink = Arc::new(RecordSink::new(store.clone()));
    let watermark = Arc::new(Watermark::new(store.clone()));
    let checkpoints = Arc::new(CheckpointStore::new(store.clone()));
    let ledger = Arc::new(RunLedger::new(store.clone()));
    let outliers = Arc::new(OutlierDetector::new(metrics));

    sink.ensure_indexes().await?;

    let orchestrator = Arc::new(Orchestrator::new(
        extractor,
        sink,
        watermark,
        checkpoints.clone(),
        ledger.clone(),
        outliers,
        metrics,
        config.clone(),
    ));

    let app_state = web::Data::new(AppState {
        config: config.clone(),
        store,
        metrics,
        rate_gate,
        schema_mapper,
        checkpoints,
        ledger,
        orchestrator,
        run_guard: Arc::new(Mutex::new(())),
        current_run_id: Arc::new(RwLock::new(None)),
        scheduler_running: Arc::new(AtomicBool::new(false)),
        started_at: Instant::now(),
    });

    let scheduler_state = app_state.clone().into_inner();
    let _scheduler = scheduler::start(scheduler_state.clone()).await?;
    scheduler::mark_running(&scheduler_state);

    let bind_addr = (config.server.host.clone(), config.server.port);
    info!(host = %bind_addr.0, port = bind_addr.1, "starting http server");

    HttpServer::new(move || {
        App::new()
            .app_data(app_state.clone())
            .wrap(LoggingMiddleware)
            .wrap(RequestIdMiddleware)
            .configure(handlers::refresh::configure)
            .configure(handlers::data::configure)
            .configure(handlers::stats::configure)
            .configure(handlers::runs::configure)
            .configure(handlers::health::configure)
            .configure(handlers::metrics_handler::configure)
    })
    .bind(bind_addr)?
    .run()
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{test, App};
    use std::sync::atomic::AtomicBool;
    use store::memory::InMemoryStore;

    async fn test_state() -> web::Data<AppState> {
        let config = Arc::new(AppConfig::load().expect("defaults-only config loads"));
        let store: Arc<dyn store::DocumentStore> = Arc::new(InMemoryStore::new());
        let metrics = MetricsRegistry;
        let rate_gate = Arc::new(RateGate::new(metrics));
        for source in Source::ALL {
            let rl = config.rate_limit_for(source.as_str());
            rate_gate.configure_source(source.as_str(), rl.requests_per_minute, rl.burst_capacity, rl.retry_backoff_ms);
        }
        let schema_mapper = Arc::new(SchemaMapper::new(config.static_aliases.clone()));
        let extractor = Arc::new(
            SourceExtractor::new(rate_gate.clone(), schema_mapper.clone(), metrics, config.clone()).unwrap(),
        );
        let sink = Arc::new(RecordSink::new(store.clone()));
        let watermark = Arc::new(Watermark::new(store.clone()));
        let checkpoints = Arc::new(CheckpointStore::new(store.clone()));
        let ledger = Arc::new(RunLedger::new(store.clone()));
        let outliers = Arc::new(OutlierDetector::new(metrics));

        let orchestrator = Arc::new(Orchestrator::new(
            extractor,
            sink,
            watermark,
            checkpoints.clone(),
            ledger.clone(),
            outliers,
            metrics,
            config.clone(),
        ));

        web::Data::new(AppState {
            config,
            store,
            metrics,
            rate_gate,
            schema_mapper,
            checkpoints,
            ledger,
            orchestrator,
            run_guard: Arc::new(Mutex::new(())),
            current_run_id: Arc::new(RwLock::new(None)),
            scheduler_running: Arc::new(AtomicBool::new(false)),
            started_at: Instant::now(),
        })
    }

    #[actix_web::test]
    async fn health_endpoint_reports_db_connected() {
        let state = test_state().await;
        let app = test::init_service(
            App::new()
                .app_data(state.clone())
                .wrap(RequestIdMiddleware)
                .configure(handlers::health::configure),
        )
        .await;

        let req = test::TestRequest::get().uri("/health").to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success());

        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["components"]["db_connected"], true);
        assert_eq!(body["components"]["scheduler"], "stopped");
    }

    #[actix_web::test]
    async fn refresh_then_data_round_trip_is_empty_on_fresh_store() {
        let state = test_state().await;
        let app = test::init_service(
            App::new()
                .app_data(state.clone())
                .wrap(RequestIdMiddleware)
                .configure(handlers::data::configure),
        )
        .await;

        let req = test::TestRequest::get().uri("/data").to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success());

        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["records"].as_array().unwrap().len(), 0);
        assert!(body["next_cursor"].is_null());
    }
}

//! Shared, long-lived components constructed once in `main` and handed to
//! every handler via `web::Data`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{Mutex, RwLock};

use crate::checkpoint_store::CheckpointStore;
use crate::config::AppConfig;
use crate::metrics::MetricsRegistry;
use crate::orchestrator::Orchestrator;
use crate::rate_gate::RateGate;
use crate::run_ledger::RunLedger;
use crate::schema_mapper::SchemaMapper;
use crate::store::DocumentStore;

pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Arc<dyn DocumentStore>,
    pub metrics: MetricsRegistry,
    pub rate_gate: Arc<RateGate>,
    pub schema_mapper: Arc<SchemaMapper>,
    pub checkpoints: Arc<CheckpointStore>,
    pub ledger: Arc<RunLedger>,
    pub orchestrator: Arc<Orchestrator>,
    /// Held for the duration of one run; `/refresh` `try_lock_owned`s this to
    /// enforce "at most one run in progress" without blocking the caller.
    pub run_guard: Arc<Mutex<()>>,
    pub current_run_id: Arc<RwLock<Option<uuid::Uuid>>>,
    pub scheduler_running: Arc<AtomicBool>,
    pub started_at: Instant,
}

impl AppState {
    pub async fn set_current_run(&self, run_id: Option<uuid::Uuid>) {
        *self.current_run_id.write().await = run_id;
    }

    pub async fn current_run(&self) -> Option<uuid::Uuid> {
        *self.current_run_id.read().await
    }

    pub fn scheduler_is_running(&self) -> bool {
        self.scheduler_running.load(Ordering::Relaxed)
    }
}

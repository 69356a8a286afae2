//! Cron-driven trigger for `runETL()`, independent of the HTTP `/refresh`
//! trigger but sharing the same run-guard so the two never race.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::app_state::AppState;

pub async fn start(state: Arc<AppState>) -> anyhow::Result<JobScheduler> {
    let scheduler = JobScheduler::new().await?;
    let cron_expr = state.config.scheduler.interval_cron.clone();

    let job = Job::new_async(cron_expr.as_str(), move |_uuid, _lock| {
        let state = state.clone();
        Box::pin(async move {
            match state.run_guard.clone().try_lock_owned() {
                Ok(permit) => {
                    let run_id = uuid::Uuid::new_v4();
                    state.set_current_run(Some(run_id)).await;
                    info!(%run_id, "scheduled run starting");

                    let outcome = state.orchestrator.run_etl(run_id, CancellationToken::new()).await;
                    if let Err(e) = outcome {
                        error!(%run_id, error = %e, "scheduled run failed");
                    }
                    drop(permit);
                    state.set_current_run(None).await;
                }
                Err(_) => {
                    info!("scheduled trigger skipped: a run is already in progress");
                }
            }
        })
    })?;

    scheduler.add(job).await?;
    scheduler.start().await?;
    Ok(scheduler)
}

pub fn mark_running(state: &AppState) {
    state.scheduler_running.store(true, Ordering::Relaxed);
}

//! The end-to-end `runETL()` state machine: `CREATED -> FETCHING ->
//! PROCESSING -> (SUCCESS | PARTIAL_SUCCESS | FAILED)`.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::checkpoint_store::CheckpointStore;
use crate::config::AppConfig;
use crate::errors::{AppError, AppResult};
use crate::extractor::{ExtractedBatch, SourceExtractor};
use crate::metrics::MetricsRegistry;
use crate::models::{FailedBatch, ResumeInfo, RunLedgerEntry, RunStatus, Source, SourceStats};
use crate::outlier_detector::OutlierDetector;
use crate::record_sink::RecordSink;
use crate::run_ledger::RunLedger;
use crate::validator::Validator;
use crate::watermark::Watermark;

pub struct Orchestrator {
    extractor: Arc<SourceExtractor>,
    validator: Validator,
    sink: Arc<RecordSink>,
    watermark: Arc<Watermark>,
    checkpoints: Arc<CheckpointStore>,
    ledger: Arc<RunLedger>,
    outliers: Arc<OutlierDetector>,
    metrics: MetricsRegistry,
    config: Arc<AppConfig>,
}

impl Orchestrator {
    pub fn new(
        extractor: Arc<SourceExtractor>,
        sink: Arc<RecordSink>,
        watermark: Arc<Watermark>,
        checkpoints: Arc<CheckpointStore>,
        ledger: Arc<RunLedger>,
        outliers: Arc<OutlierDetector>,
        metrics: MetricsRegistry,
        config: Arc<AppConfig>,
    ) -> Self {
        Orchestrator {
            extractor,
            validator: Validator::new(),
            sink,
            watermark,
            checkpoints,
            ledger,
            outliers,
            metrics,
            config,
        }
    }

    /// Run one full pass. `run_id` is either freshly generated by the caller
    /// or, for an explicit resume, the prior run's id — the Orchestrator
    /// never infers a resume from checkpoint presence on its own.
    pub async fn run_etl(&self, run_id: uuid::Uuid, cancel: CancellationToken) -> AppResult<RunLedgerEntry> {
        let start_time = Utc::now();
        let mut entry = RunLedgerEntry::new(run_id, start_time);
        info!(%run_id, "run started");

        if let Err(e) = self.sink.ensure_indexes().await {
            return self.fail_before_processing(entry, e).await;
        }

        let extract_start = std::time::Instant::now();
        let mut join_set: JoinSet<(Source, ExtractedBatch)> = JoinSet::new();
        for source in Source::ALL {
            let extractor = self.extractor.clone();
            join_set.spawn(async move {
                let batch = extractor.extract(source).await;
                (source, batch)
            });
        }

        let mut fetched: HashMap<Source, ExtractedBatch> = HashMap::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((source, batch)) => {
                    fetched.insert(source, batch);
                }
                Err(e) => warn!(error = %e, "source extraction task panicked"),
            }
        }
        self.metrics
            .observe_latency("extract", extract_start.elapsed().as_secs_f64());

        for source in Source::ALL {
            let Some(batch) = fetched.remove(&source) else {
                continue;
            };

            entry.schema_version.insert(source, batch.drift.schema_version);
            entry.applied_mappings.extend(batch.drift.applied_mappings);
            entry.quarantined_mappings.extend(batch.drift.quarantined_mappings);
            entry.skipped_mappings.extend(batch.drift.skipped_mappings);

            let watermark = match self.watermark.get(source).await {
                Ok(w) => w,
                Err(e) => return self.fail_before_processing(entry, e).await,
            };
            let last_index = match self.checkpoints.get(run_id, source).await {
                Ok(i) => i,
                Err(e) => return self.fail_before_processing(entry, e).await,
            };

            let mut stats = SourceStats {
                fetched: batch.records.len(),
                ..Default::default()
            };
            if last_index > 0 {
                entry.resume_info.insert(
                    source,
                    ResumeInfo {
                        resumed_from_batch: last_index / self.config.batch_size,
                    },
                );
            }

            self.process_source(
                source,
                run_id,
                &batch.records,
                last_index,
                watermark,
                &mut stats,
                &mut entry.failed_batches,
                &cancel,
            )
            .await;

            entry.source_stats.insert(source, stats);
        }

        entry.end_time = Some(Utc::now());
        entry.total_latency_ms = (entry.end_time.unwrap() - entry.start_time)
            .num_milliseconds()
            .max(0) as u64;

        entry.status = if entry.failed_batches.is_empty() {
            RunStatus::Success
        } else {
            RunStatus::PartialSuccess
        };

        if entry.status == RunStatus::Success {
            if let Err(e) = self.checkpoints.clear(run_id).await {
                warn!(%run_id, error = %e, "failed to clear checkpoints after a successful run");
            }
        }

        self.metrics
            .observe_latency("transform", extract_start.elapsed().as_secs_f64());

        self.ledger
            .write_entry(&entry)
            .await
            .map_err(|e| AppError::InternalError(anyhow::anyhow!("ledger write failed: {e}")))?;

        info!(%run_id, status = ?entry.status, "run finished");
        Ok(entry)
    }

    #[allow(clippy::too_many_arguments)]
    async fn process_source(
        &self,
        source: Source,
        run_id: uuid::Uuid,
        records: &[crate::models::RawRecord],
        last_index: usize,
        watermark: Option<chrono::DateTime<Utc>>,
        stats: &mut SourceStats,
        failed_batches: &mut Vec<FailedBatch>,
        cancel: &CancellationToken,
    ) {
        let batch_size = self.config.batch_size;
        let fault_threshold = ((records.len() as f64) * 0.6).floor() as usize;

        let mut i = last_index;
        while i < records.len() {
            if cancel.is_cancelled() {
                break;
            }

            let end = (i + batch_size).min(records.len());
            let chunk = &records[i..end];
            // 0-indexed by absolute position so a resumed run numbers batches
            // the same way the original run did. The fault fires for the
            // batch that *contains* the threshold index (fault_threshold <
            // end), not the first batch starting at-or-past it; this is what
            // the mid-batch-crash-resume scenario's checkpoint and batch
            // number actually require.
            let batch_no = i / batch_size;

            if self.config.fault_injection && fault_threshold < end {
                failed_batches.push(FailedBatch {
                    source,
                    batch_no,
                    error: "injected fault for testing resume behavior".to_string(),
                    record_count: chunk.len(),
                });
                break;
            }

            let mut batch_failed = false;
            for raw in chunk {
                match self.validator.validate(source, raw) {
                    Ok(record) => {
                        let past_watermark = watermark.map_or(true, |wm| record.timestamp > wm);
                        if !past_watermark {
                            stats.skipped_by_watermark += 1;
                            continue;
                        }

                        self.outliers.observe(&record);
                        match self.sink.upsert(raw, &record, run_id).await {
                            Ok(_) => {
                                stats.processed += 1;
                                self.metrics.rows_processed(source.as_str(), 1);
                            }
                            Err(e) => {
                                warn!(source = source.as_str(), error = %e, "sink upsert failed");
                                stats.failed_ids.push(record.natural_key().symbol.clone());
                                batch_failed = true;
                            }
                        }
                    }
                    Err(e) => {
                        stats.validation_errors += 1;
                        self.metrics.error(source.as_str(), "validation");
                        warn!(source = source.as_str(), error = %e, "record failed validation");
                    }
                }
            }

            if batch_failed {
                failed_batches.push(FailedBatch {
                    source,
                    batch_no,
                    error: "sink error".to_string(),
                    record_count: chunk.len(),
                });
                break;
            }

            if let Err(e) = self.checkpoints.save(run_id, source, end).await {
                warn!(source = source.as_str(), error = %e, "failed to save checkpoint");
                failed_batches.push(FailedBatch {
                    source,
                    batch_no,
                    error: format!("checkpoint save failed: {e}"),
                    record_count: chunk.len(),
                });
                break;
            }

            i = end;
        }
    }

    async fn fail_before_processing(
        &self,
        mut entry: RunLedgerEntry,
        cause: impl std::fmt::Display,
    ) -> AppResult<RunLedgerEntry> {
        entry.status = RunStatus::Failed;
        entry.end_time = Some(Utc::now());
        if let Err(e) = self.ledger.write_entry(&entry).await {
            warn!(error = %e, "failed to write ledger entry for a failed run");
        }
        Err(AppError::InternalError(anyhow::anyhow!("run {} failed before processing: {cause}", entry.run_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::checkpoint_store::CheckpointStore;
    use crate::config::{
        ApiSourceConfig, ApisConfig, CsvSourceConfig, MongoConfig, RecordCapsConfig, SchedulerConfig, ServerConfig,
        SourcesConfig,
    };
    use crate::metrics::MetricsRegistry;
    use crate::models::RawRecord;
    use crate::outlier_detector::OutlierDetector;
    use crate::rate_gate::RateGate;
    use crate::record_sink::RecordSink;
    use crate::run_ledger::RunLedger;
    use crate::schema_mapper::SchemaMapper;
    use crate::store::memory::InMemoryStore;
    use crate::store::DocumentStore;
    use crate::watermark::Watermark;

    fn test_config(batch_size: usize, fault_injection: bool) -> Arc<AppConfig> {
        Arc::new(AppConfig {
            server: ServerConfig { host: "127.0.0.1".to_string(), port: 8080 },
            mongodb: MongoConfig { uri: "mongodb://localhost:27017".to_string(), database: "test".to_string() },
            apis: ApisConfig {
                a: ApiSourceConfig { url: "https://example.invalid/a".to_string() },
                c: ApiSourceConfig { url: "https://example.invalid/c".to_string() },
            },
            sources: SourcesConfig { b: CsvSourceConfig { csv_path: "data/source_b.csv".to_string() } },
            rate_limits: HashMap::new(),
            batch_size,
            fault_injection,
            scheduler: SchedulerConfig { interval_cron: "0 */5 * * * *".to_string() },
            record_caps: RecordCapsConfig { a: 100, b: 100, c: 100 },
            static_aliases: HashMap::new(),
            http_timeout_secs: 10,
        })
    }

    fn test_orchestrator(config: Arc<AppConfig>) -> (Orchestrator, Arc<dyn DocumentStore>) {
        let store: Arc<dyn DocumentStore> = Arc::new(InMemoryStore::new());
        let metrics = MetricsRegistry;
        let rate_gate = Arc::new(RateGate::new(metrics));
        let schema_mapper = Arc::new(SchemaMapper::new(HashMap::new()));
        let extractor = Arc::new(
            SourceExtractor::new(rate_gate, schema_mapper, metrics, config.clone()).expect("client builds"),
        );
        let sink = Arc::new(RecordSink::new(store.clone()));
        let watermark = Arc::new(Watermark::new(store.clone()));
        let checkpoints = Arc::new(CheckpointStore::new(store.clone()));
        let ledger = Arc::new(RunLedger::new(store.clone()));
        let outliers = Arc::new(OutlierDetector::new(metrics));

        let orchestrator = Orchestrator::new(extractor, sink, watermark, checkpoints, ledger, outliers, metrics, config);
        (orchestrator, store)
    }

    fn record(i: usize) -> RawRecord {
        serde_json::from_value(json!({
            "symbol": format!("SYM{i}"),
            "name": "Test Coin",
            "price_usd": 100.0 + i as f64,
            "volume_24h": 1_000_000.0,
            "timestamp": format!("2024-01-01T00:{:02}:00Z", i),
        }))
        .unwrap()
    }

    /// S3 — mid-batch crash + resume: 20 records, batch_size=5, fault
    /// injection on. The faulting batch is the one containing index 12
    /// (0.6 * 20), i.e. batch_no 2 covering records[10..15); the checkpoint
    /// must stay at the last successfully completed batch boundary, 10.
    #[tokio::test]
    async fn s3_mid_batch_crash_resume() {
        let records: Vec<RawRecord> = (0..20).map(record).collect();
        let run_id = uuid::Uuid::new_v4();

        let config = test_config(5, true);
        let (orchestrator, store) = test_orchestrator(config.clone());

        let mut stats = SourceStats::default();
        let mut failed_batches = Vec::new();
        let cancel = CancellationToken::new();

        orchestrator
            .process_source(Source::A, run_id, &records, 0, None, &mut stats, &mut failed_batches, &cancel)
            .await;

        assert_eq!(failed_batches.len(), 1);
        assert_eq!(failed_batches[0].batch_no, 2);
        assert_eq!(failed_batches[0].record_count, 5);
        assert_eq!(stats.processed, 10);

        let checkpoint = store.get_checkpoint(run_id, Source::A).await.unwrap();
        assert_eq!(checkpoint, 10);

        // Second run (same runId), fault injection disabled, resumes at the
        // saved checkpoint and finishes the remaining records.
        let config = test_config(5, false);
        let (orchestrator, _store) = test_orchestrator(config.clone());
        // Reuse the same store so the checkpoint and prior upserts carry over.
        let orchestrator = Orchestrator::new(
            orchestrator.extractor,
            Arc::new(RecordSink::new(store.clone())),
            Arc::new(Watermark::new(store.clone())),
            Arc::new(CheckpointStore::new(store.clone())),
            Arc::new(RunLedger::new(store.clone())),
            orchestrator.outliers,
            orchestrator.metrics,
            config,
        );

        let mut stats = SourceStats::default();
        let mut failed_batches = Vec::new();
        orchestrator
            .process_source(Source::A, run_id, &records, checkpoint, None, &mut stats, &mut failed_batches, &cancel)
            .await;

        assert!(failed_batches.is_empty());
        assert_eq!(stats.processed, 10);

        let final_checkpoint = store.get_checkpoint(run_id, Source::A).await.unwrap();
        assert_eq!(final_checkpoint, 20);
        assert_eq!(store.count_normalized().await.unwrap(), 20);
    }
}

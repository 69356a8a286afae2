use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::record::Source;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    PartialSuccess,
    Failed,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceStats {
    pub fetched: usize,
    pub processed: usize,
    pub skipped_by_watermark: usize,
    pub validation_errors: usize,
    pub failed_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedBatch {
    pub source: Source,
    pub batch_no: usize,
    pub error: String,
    pub record_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResumeInfo {
    pub resumed_from_batch: usize,
}

/// One entry of the three confidence tiers a field mapping can land in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingRecord {
    pub from: String,
    pub to: String,
    pub confidence: f64,
}

/// One append-only record per ETL run. Written exactly once per `run_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunLedgerEntry {
    pub run_id: uuid::Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub source_stats: HashMap<Source, SourceStats>,
    pub failed_batches: Vec<FailedBatch>,
    pub resume_info: HashMap<Source, ResumeInfo>,
    pub applied_mappings: Vec<MappingRecord>,
    pub quarantined_mappings: Vec<MappingRecord>,
    pub skipped_mappings: Vec<MappingRecord>,
    pub schema_version: HashMap<Source, u32>,
    pub throttle_events: u64,
    pub total_latency_ms: u64,
}

impl RunLedgerEntry {
    pub fn new(run_id: uuid::Uuid, start_time: DateTime<Utc>) -> Self {
        RunLedgerEntry {
            run_id,
            start_time,
            end_time: None,
            status: RunStatus::Success,
            source_stats: HashMap::new(),
            failed_batches: Vec::new(),
            resume_info: HashMap::new(),
            applied_mappings: Vec::new(),
            quarantined_mappings: Vec::new(),
            skipped_mappings: Vec::new(),
            schema_version: HashMap::new(),
            throttle_events: 0,
            total_latency_ms: 0,
        }
    }
}

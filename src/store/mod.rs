//! Document store abstraction
//!
//! `DocumentStore` is the one seam between the pipeline and whatever holds
//! state durably. Generalizes the teacher's SQLx-backed repository pattern
//! to a document model: callers never see a query builder, only
//! domain-shaped upsert/read operations.

pub mod memory;
pub mod mongo;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::errors::RepoResult;
use crate::models::{NaturalKey, RawRecord, RunLedgerEntry, Source, UnifiedRecord};

pub const RAW_COLLECTION: &str = "raw_crypto_data";
pub const NORMALIZED_COLLECTION: &str = "normalized_crypto_data";
pub const RUNS_COLLECTION: &str = "etlruns";
pub const CHECKPOINTS_COLLECTION: &str = "etlcheckpoints";
pub const SUMMARIES_COLLECTION: &str = "etl_summaries";

/// Outcome of an idempotent upsert keyed by a natural key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    MatchedExisting,
}

/// Everything the pipeline needs from durable storage, expressed as plain
/// domain operations rather than a query language. Both collections named in
/// `save_record` share the same natural-key uniqueness contract.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Create the unique/secondary indexes every collection needs. Called
    /// once at startup and expected to be idempotent.
    async fn ensure_indexes(&self) -> RepoResult<()>;

    async fn save_checkpoint(&self, run_id: uuid::Uuid, source: Source, last_processed_index: usize) -> RepoResult<()>;
    async fn get_checkpoint(&self, run_id: uuid::Uuid, source: Source) -> RepoResult<usize>;
    async fn clear_checkpoints(&self, run_id: uuid::Uuid) -> RepoResult<()>;

    /// Latest `timestamp` among normalized records for `source`, or `None` if
    /// the source has never been ingested.
    async fn latest_timestamp(&self, source: Source) -> RepoResult<Option<DateTime<Utc>>>;

    /// Upsert both the raw mirror and the normalized record for one natural
    /// key. A duplicate-key conflict on either write is folded into
    /// `MatchedExisting` rather than surfaced as an error.
    async fn save_record(
        &self,
        key: &NaturalKey,
        raw: &RawRecord,
        normalized: &UnifiedRecord,
        run_id: uuid::Uuid,
    ) -> RepoResult<UpsertOutcome>;

    async fn count_raw(&self) -> RepoResult<u64>;
    async fn count_normalized(&self) -> RepoResult<u64>;

    /// Cursor-paginated read of normalized records, newest first. `cursor` is
    /// an opaque token produced by a prior page's `next_cursor`.
    async fn query_normalized(
        &self,
        limit: usize,
        cursor: Option<NormalizedCursor>,
    ) -> RepoResult<(Vec<UnifiedRecord>, Option<NormalizedCursor>)>;

    async fn write_run_entry(&self, entry: &RunLedgerEntry) -> RepoResult<()>;
    async fn list_recent_runs(&self, limit: usize) -> RepoResult<Vec<RunLedgerEntry>>;
    async fn get_run(&self, run_id: uuid::Uuid) -> RepoResult<Option<RunLedgerEntry>>;
}

/// Opaque cursor for `/data`'s pagination: the sort key of the last row seen
/// plus its natural key, so a page boundary falling mid-tie still resumes
/// deterministically.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct NormalizedCursor {
    pub sort_by_val: DateTime<Utc>,
    pub symbol: String,
    pub source: Source,
}

impl NormalizedCursor {
    pub fn encode(&self) -> String {
        let json = serde_json::to_string(self).unwrap_or_default();
        base64::Engine::encode(&base64::engine::general_purpose::STANDARD, json)
    }

    pub fn decode(token: &str) -> Option<Self> {
        let bytes = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, token).ok()?;
        serde_json::from_slice(&bytes).ok()
    }
}

//! Idempotent upsert of raw + normalized records via the natural-key filter.

use std::sync::Arc;

use crate::errors::RepoResult;
use crate::models::{RawRecord, UnifiedRecord};
use crate::store::{DocumentStore, UpsertOutcome};

pub struct RecordSink {
    store: Arc<dyn DocumentStore>,
}

impl RecordSink {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        RecordSink { store }
    }

    /// Ensure the natural-key unique index exists on both collections. Must
    /// be called once before the first `upsert`.
    pub async fn ensure_indexes(&self) -> RepoResult<()> {
        self.store.ensure_indexes().await
    }

    /// Write `raw` and `normalized` for the same natural key within one
    /// logical unit. A duplicate-key conflict on either write is reported as
    /// `MatchedExisting`, never an error — this is what makes re-ingesting
    /// the same record across a checkpoint-resumed batch safe.
    pub async fn upsert(&self, raw: &RawRecord, normalized: &UnifiedRecord, run_id: uuid::Uuid) -> RepoResult<UpsertOutcome> {
        let key = normalized.natural_key();
        self.store.save_record(&key, raw, normalized, run_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Source;
    use crate::store::memory::InMemoryStore;
    use chrono::Utc;

    fn sample() -> (RawRecord, UnifiedRecord) {
        let normalized = UnifiedRecord {
            symbol: "ETH".to_string(),
            name: "Ethereum".to_string(),
            price_usd: 2000.0,
            volume_24h: 500.0,
            market_cap: Some(1.0e11),
            percent_change_24h: Some(-1.2),
            timestamp: Utc::now(),
            source: Source::A,
        };
        (RawRecord::new(), normalized)
    }

    #[tokio::test]
    async fn upserting_twice_reports_matched_existing_the_second_time() {
        let sink = RecordSink::new(Arc::new(InMemoryStore::new()));
        let (raw, normalized) = sample();
        let run_id = uuid::Uuid::new_v4();

        assert_eq!(sink.upsert(&raw, &normalized, run_id).await.unwrap(), UpsertOutcome::Inserted);
        assert_eq!(
            sink.upsert(&raw, &normalized, run_id).await.unwrap(),
            UpsertOutcome::MatchedExisting
        );
    }
}

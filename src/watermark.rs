//! Per-source "most recent ingested timestamp" lookup, used to skip records
//! already loaded in an earlier run without relying on a monotonic sequence.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::errors::RepoResult;
use crate::models::Source;
use crate::store::DocumentStore;

pub struct Watermark {
    store: Arc<dyn DocumentStore>,
}

impl Watermark {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Watermark { store }
    }

    /// `None` for a source that has never written a normalized record; in
    /// that case the Orchestrator skips nothing.
    pub async fn get(&self, source: Source) -> RepoResult<Option<DateTime<Utc>>> {
        self.store.latest_timestamp(source).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RawRecord, UnifiedRecord};
    use crate::store::memory::InMemoryStore;
    use chrono::TimeZone;

    #[tokio::test]
    async fn fresh_source_has_no_watermark() {
        let watermark = Watermark::new(Arc::new(InMemoryStore::new()));
        assert!(watermark.get(Source::A).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn watermark_is_the_max_timestamp_seen() {
        let store = Arc::new(InMemoryStore::new());
        let run_id = uuid::Uuid::new_v4();
        for day in [5, 2, 9] {
            let ts = Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap();
            let record = UnifiedRecord {
                symbol: "BTC".to_string(),
                name: "Bitcoin".to_string(),
                price_usd: 1.0,
                volume_24h: 1.0,
                market_cap: None,
                percent_change_24h: None,
                timestamp: ts,
                source: Source::A,
            };
            store
                .save_record(&record.natural_key(), &RawRecord::new(), &record, run_id)
                .await
                .unwrap();
        }

        let watermark = Watermark::new(store);
        let expected = Utc.with_ymd_and_hms(2024, 1, 9, 0, 0, 0).unwrap();
        assert_eq!(watermark.get(Source::A).await.unwrap(), Some(expected));
    }
}

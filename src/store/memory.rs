//! In-memory `DocumentStore`, used by the test suite and as a zero-config
//! development backend when `mongodb.uri` points nowhere useful.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Mutex;

use crate::errors::RepoResult;
use crate::models::{NaturalKey, RawRecord, RunLedgerEntry, Source, UnifiedRecord};

use super::{DocumentStore, NormalizedCursor, UpsertOutcome};

#[derive(Default)]
pub struct InMemoryStore {
    raw: DashMap<NaturalKey, (RawRecord, uuid::Uuid)>,
    normalized: DashMap<NaturalKey, UnifiedRecord>,
    checkpoints: DashMap<(uuid::Uuid, Source), usize>,
    runs: DashMap<uuid::Uuid, RunLedgerEntry>,
    // DashMap iteration order is unspecified; keep a separate insertion log
    // so `list_recent_runs` can return a stable, time-ordered view.
    run_order: Mutex<Vec<uuid::Uuid>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn ensure_indexes(&self) -> RepoResult<()> {
        Ok(())
    }

    async fn save_checkpoint(&self, run_id: uuid::Uuid, source: Source, last_processed_index: usize) -> RepoResult<()> {
        self.checkpoints.insert((run_id, source), last_processed_index);
        Ok(())
    }

    async fn get_checkpoint(&self, run_id: uuid::Uuid, source: Source) -> RepoResult<usize> {
        Ok(self.checkpoints.get(&(run_id, source)).map(|v| *v).unwrap_or(0))
    }

    async fn clear_checkpoints(&self, run_id: uuid::Uuid) -> RepoResult<()> {
        self.checkpoints.retain(|(id, _), _| *id != run_id);
        Ok(())
    }

    async fn latest_timestamp(&self, source: Source) -> RepoResult<Option<DateTime<Utc>>> {
        Ok(self
            .normalized
            .iter()
            .filter(|entry| entry.value().source == source)
            .map(|entry| entry.value().timestamp)
            .max())
    }

    async fn save_record(
        &self,
        key: &NaturalKey,
        raw: &RawRecord,
        normalized: &UnifiedRecord,
        run_id: uuid::Uuid,
    ) -> RepoResult<UpsertOutcome> {
        let raw_existed = self.raw.insert(key.clone(), (raw.clone(), run_id)).is_some();
        let normalized_existed = self.normalized.insert(key.clone(), normalized.clone()).is_some();
        Ok(if raw_existed || normalized_existed {
            UpsertOutcome::MatchedExisting
        } else {
            UpsertOutcome::Inserted
        })
    }

    async fn count_raw(&self) -> RepoResult<u64> {
        Ok(self.raw.len() as u64)
    }

    async fn count_normalized(&self) -> RepoResult<u64> {
        Ok(self.normalized.len() as u64)
    }

    async fn query_normalized(
        &self,
        limit: usize,
        cursor: Option<NormalizedCursor>,
    ) -> RepoResult<(Vec<UnifiedRecord>, Option<NormalizedCursor>)> {
        let mut all: Vec<UnifiedRecord> = self.normalized.iter().map(|e| e.value().clone()).collect();
        all.sort_by(|a, b| {
            b.timestamp
                .cmp(&a.timestamp)
                .then_with(|| a.symbol.cmp(&b.symbol))
                .then_with(|| a.source.as_str().cmp(b.source.as_str()))
        });

        let start = match &cursor {
            None => 0,
            Some(c) => all
                .iter()
                .position(|r| r.timestamp == c.sort_by_val && r.symbol == c.symbol && r.source == c.source)
                .map(|i| i + 1)
                .unwrap_or(0),
        };

        let page: Vec<UnifiedRecord> = all.iter().skip(start).take(limit).cloned().collect();
        let next_cursor = if start + page.len() < all.len() {
            page.last().map(|r| NormalizedCursor {
                sort_by_val: r.timestamp,
                symbol: r.symbol.clone(),
                source: r.source,
            })
        } else {
            None
        };

        Ok((page, next_cursor))
    }

    async fn write_run_entry(&self, entry: &RunLedgerEntry) -> RepoResult<()> {
        self.runs.insert(entry.run_id, entry.clone());
        self.run_order.lock().unwrap().push(entry.run_id);
        Ok(())
    }

    async fn list_recent_runs(&self, limit: usize) -> RepoResult<Vec<RunLedgerEntry>> {
        let order = self.run_order.lock().unwrap();
        Ok(order
            .iter()
            .rev()
            .take(limit)
            .filter_map(|id| self.runs.get(id).map(|e| e.clone()))
            .collect())
    }

    async fn get_run(&self, run_id: uuid::Uuid) -> RepoResult<Option<RunLedgerEntry>> {
        Ok(self.runs.get(&run_id).map(|e| e.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Source;
    use chrono::{Datelike, TimeZone};

    fn sample_record(symbol: &str, ts: DateTime<Utc>, source: Source) -> (NaturalKey, RawRecord, UnifiedRecord) {
        let normalized = UnifiedRecord {
            symbol: symbol.to_string(),
            name: symbol.to_string(),
            price_usd: 1.0,
            volume_24h: 1.0,
            market_cap: None,
            percent_change_24h: None,
            timestamp: ts,
            source,
        };
        (normalized.natural_key(), RawRecord::new(), normalized)
    }

    #[tokio::test]
    async fn duplicate_natural_key_upsert_is_matched_existing() {
        let store = InMemoryStore::new();
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let (key, raw, normalized) = sample_record("BTC", ts, Source::A);
        let run_id = uuid::Uuid::new_v4();

        let first = store.save_record(&key, &raw, &normalized, run_id).await.unwrap();
        assert_eq!(first, UpsertOutcome::Inserted);

        let second = store.save_record(&key, &raw, &normalized, run_id).await.unwrap();
        assert_eq!(second, UpsertOutcome::MatchedExisting);
        assert_eq!(store.count_normalized().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn checkpoint_clear_only_affects_its_run_id() {
        let store = InMemoryStore::new();
        let run_a = uuid::Uuid::new_v4();
        let run_b = uuid::Uuid::new_v4();
        store.save_checkpoint(run_a, Source::A, 5).await.unwrap();
        store.save_checkpoint(run_b, Source::A, 7).await.unwrap();

        store.clear_checkpoints(run_a).await.unwrap();
        assert_eq!(store.get_checkpoint(run_a, Source::A).await.unwrap(), 0);
        assert_eq!(store.get_checkpoint(run_b, Source::A).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn query_normalized_paginates_newest_first() {
        let store = InMemoryStore::new();
        let run_id = uuid::Uuid::new_v4();
        for day in 1..=5 {
            let ts = Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap();
            let (key, raw, normalized) = sample_record("BTC", ts, Source::A);
            store.save_record(&key, &raw, &normalized, run_id).await.unwrap();
        }

        let (page1, cursor1) = store.query_normalized(2, None).await.unwrap();
        assert_eq!(page1.len(), 2);
        assert_eq!(page1[0].timestamp.day(), 5);
        let cursor1 = cursor1.expect("more pages remain");

        let (page2, _) = store.query_normalized(2, Some(cursor1)).await.unwrap();
        assert_eq!(page2.len(), 2);
        assert_eq!(page2[0].timestamp.day(), 3);
    }
}

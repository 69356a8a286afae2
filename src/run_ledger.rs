//! Append-only, one record per run: `writeEntry` must be total and never
//! roll back already-durable data records on failure.

use std::sync::Arc;

use crate::errors::RepoResult;
use crate::models::RunLedgerEntry;
use crate::store::DocumentStore;

pub struct RunLedger {
    store: Arc<dyn DocumentStore>,
}

impl RunLedger {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        RunLedger { store }
    }

    pub async fn write_entry(&self, entry: &RunLedgerEntry) -> RepoResult<()> {
        self.store.write_run_entry(entry).await
    }

    pub async fn list_recent(&self, limit: usize) -> RepoResult<Vec<RunLedgerEntry>> {
        self.store.list_recent_runs(limit).await
    }

    pub async fn get_by_id(&self, run_id: uuid::Uuid) -> RepoResult<Option<RunLedgerEntry>> {
        self.store.get_run(run_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RunStatus;
    use crate::store::memory::InMemoryStore;
    use chrono::Utc;

    #[tokio::test]
    async fn written_entry_is_retrievable_by_id() {
        let ledger = RunLedger::new(Arc::new(InMemoryStore::new()));
        let run_id = uuid::Uuid::new_v4();
        let mut entry = RunLedgerEntry::new(run_id, Utc::now());
        entry.status = RunStatus::Success;
        ledger.write_entry(&entry).await.unwrap();

        let fetched = ledger.get_by_id(run_id).await.unwrap().unwrap();
        assert_eq!(fetched.run_id, run_id);
        assert_eq!(fetched.status, RunStatus::Success);
    }

    #[tokio::test]
    async fn list_recent_returns_newest_first() {
        let ledger = RunLedger::new(Arc::new(InMemoryStore::new()));
        let mut ids = Vec::new();
        for _ in 0..3 {
            let run_id = uuid::Uuid::new_v4();
            ledger.write_entry(&RunLedgerEntry::new(run_id, Utc::now())).await.unwrap();
            ids.push(run_id);
        }

        let recent = ledger.list_recent(2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].run_id, ids[2]);
        assert_eq!(recent[1].run_id, ids[1]);
    }
}

//! `(runId, source) -> lastProcessedIndex`, the resume guarantee's durable half.

use std::sync::Arc;

use crate::errors::RepoResult;
use crate::models::Source;
use crate::store::DocumentStore;

pub struct CheckpointStore {
    store: Arc<dyn DocumentStore>,
}

impl CheckpointStore {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        CheckpointStore { store }
    }

    /// Upsert the count of records already consumed for `(run_id, source)`.
    /// Callers MUST await this before starting the next batch.
    pub async fn save(&self, run_id: uuid::Uuid, source: Source, last_processed_index: usize) -> RepoResult<()> {
        self.store.save_checkpoint(run_id, source, last_processed_index).await
    }

    /// `0` if no checkpoint has ever been saved for this `(run_id, source)`.
    pub async fn get(&self, run_id: uuid::Uuid, source: Source) -> RepoResult<usize> {
        self.store.get_checkpoint(run_id, source).await
    }

    pub async fn clear(&self, run_id: uuid::Uuid) -> RepoResult<()> {
        self.store.clear_checkpoints(run_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryStore;

    #[tokio::test]
    async fn absent_checkpoint_reads_as_zero() {
        let checkpoints = CheckpointStore::new(Arc::new(InMemoryStore::new()));
        let run_id = uuid::Uuid::new_v4();
        assert_eq!(checkpoints.get(run_id, Source::A).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn save_then_get_round_trips() {
        let checkpoints = CheckpointStore::new(Arc::new(InMemoryStore::new()));
        let run_id = uuid::Uuid::new_v4();
        checkpoints.save(run_id, Source::B, 12).await.unwrap();
        assert_eq!(checkpoints.get(run_id, Source::B).await.unwrap(), 12);
    }
}

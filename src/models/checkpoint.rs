use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::record::Source;

/// `(runId, source) -> lastProcessedIndex`. `last_processed_index` is the
/// count of records already consumed from the fetched sequence, not the
/// highest index seen, so resuming means slicing `records[last_processed_index..]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub run_id: uuid::Uuid,
    pub source: Source,
    pub last_processed_index: usize,
    pub updated_at: DateTime<Utc>,
}

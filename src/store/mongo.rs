//! `mongodb`-driver-backed `DocumentStore`.

use async_trait::async_trait;
use bson::{doc, Document};
use chrono::{DateTime, Utc};
use mongodb::options::{FindOneAndUpdateOptions, IndexOptions, ReturnDocument};
use mongodb::{Client, Collection, IndexModel};

use crate::errors::{RepoResult, RepositoryError};
use crate::models::{NaturalKey, RawRecord, RunLedgerEntry, Source, UnifiedRecord};

use super::{
    DocumentStore, NormalizedCursor, UpsertOutcome, CHECKPOINTS_COLLECTION, NORMALIZED_COLLECTION,
    RAW_COLLECTION, RUNS_COLLECTION,
};

pub struct MongoStore {
    raw: Collection<Document>,
    normalized: Collection<Document>,
    checkpoints: Collection<Document>,
    runs: Collection<Document>,
}

impl MongoStore {
    pub async fn connect(uri: &str, database: &str) -> RepoResult<Self> {
        let client = Client::with_uri_str(uri)
            .await
            .map_err(|e| RepositoryError::ConnectionError(e.to_string()))?;
        let db = client.database(database);
        Ok(MongoStore {
            raw: db.collection(RAW_COLLECTION),
            normalized: db.collection(NORMALIZED_COLLECTION),
            checkpoints: db.collection(CHECKPOINTS_COLLECTION),
            runs: db.collection(RUNS_COLLECTION),
        })
    }

    fn natural_key_filter(key: &NaturalKey) -> Document {
        doc! {
            "symbol": &key.symbol,
            "timestamp": bson::DateTime::from_chrono(key.timestamp),
            "source": key.source.as_str(),
        }
    }
}

#[async_trait]
impl DocumentStore for MongoStore {
    async fn ensure_indexes(&self) -> RepoResult<()> {
        let unique_natural_key = IndexModel::builder()
            .keys(doc! { "symbol": 1, "timestamp": 1, "source": 1 })
            .options(IndexOptions::builder().unique(true).build())
            .build();

        for collection in [&self.raw, &self.normalized] {
            collection
                .create_index(unique_natural_key.clone())
                .await
                .map_err(|e| RepositoryError::QueryError(e.to_string()))?;
        }

        self.normalized
            .create_index(IndexModel::builder().keys(doc! { "timestamp": -1 }).build())
            .await
            .map_err(|e| RepositoryError::QueryError(e.to_string()))?;
        self.normalized
            .create_index(IndexModel::builder().keys(doc! { "source": 1 }).build())
            .await
            .map_err(|e| RepositoryError::QueryError(e.to_string()))?;

        self.checkpoints
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "run_id": 1, "source": 1 })
                    .options(IndexOptions::builder().unique(true).build())
                    .build(),
            )
            .await
            .map_err(|e| RepositoryError::QueryError(e.to_string()))?;

        self.runs
            .create_index(IndexModel::builder().keys(doc! { "end_time": -1 }).build())
            .await
            .map_err(|e| RepositoryError::QueryError(e.to_string()))?;

        Ok(())
    }

    async fn save_checkpoint(&self, run_id: uuid::Uuid, source: Source, last_processed_index: usize) -> RepoResult<()> {
        let filter = doc! { "run_id": run_id.to_string(), "source": source.as_str() };
        let update = doc! {
            "$set": { "last_processed_index": last_processed_index as i64, "updated_at": bson::DateTime::from_chrono(Utc::now()) },
        };
        self.checkpoints
            .update_one(filter, update)
            .upsert(true)
            .await
            .map_err(|e| RepositoryError::QueryError(e.to_string()))?;
        Ok(())
    }

    async fn get_checkpoint(&self, run_id: uuid::Uuid, source: Source) -> RepoResult<usize> {
        let filter = doc! { "run_id": run_id.to_string(), "source": source.as_str() };
        let found = self
            .checkpoints
            .find_one(filter)
            .await
            .map_err(|e| RepositoryError::QueryError(e.to_string()))?;
        Ok(found
            .and_then(|d| d.get_i64("last_processed_index").ok())
            .unwrap_or(0) as usize)
    }

    async fn clear_checkpoints(&self, run_id: uuid::Uuid) -> RepoResult<()> {
        self.checkpoints
            .delete_many(doc! { "run_id": run_id.to_string() })
            .await
            .map_err(|e| RepositoryError::QueryError(e.to_string()))?;
        Ok(())
    }

    async fn latest_timestamp(&self, source: Source) -> RepoResult<Option<DateTime<Utc>>> {
        let options = mongodb::options::FindOneOptions::builder()
            .sort(doc! { "timestamp": -1 })
            .build();
        let found = self
            .normalized
            .find_one(doc! { "source": source.as_str() })
            .with_options(options)
            .await
            .map_err(|e| RepositoryError::QueryError(e.to_string()))?;
        Ok(found.and_then(|d| d.get_datetime("timestamp").ok().map(|dt| dt.to_chrono())))
    }

    async fn save_record(
        &self,
        key: &NaturalKey,
        raw: &RawRecord,
        normalized: &UnifiedRecord,
        run_id: uuid::Uuid,
    ) -> RepoResult<UpsertOutcome> {
        let filter = Self::natural_key_filter(key);

        let mut raw_doc = bson::to_document(&serde_json::Value::Object(raw.clone()))
            .map_err(|e| RepositoryError::QueryError(e.to_string()))?;
        raw_doc.insert("run_id", run_id.to_string());
        let raw_update = doc! {
            "$set": raw_doc,
            "$setOnInsert": { "created_at": bson::DateTime::from_chrono(Utc::now()) },
        };

        let mut normalized_doc =
            bson::to_document(normalized).map_err(|e| RepositoryError::QueryError(e.to_string()))?;
        normalized_doc.remove("created_at");
        let normalized_update = doc! {
            "$set": normalized_doc,
            "$setOnInsert": { "created_at": bson::DateTime::from_chrono(Utc::now()) },
        };

        let options = FindOneAndUpdateOptions::builder()
            .upsert(true)
            .return_document(ReturnDocument::Before)
            .build();

        let raw_previous = self
            .raw
            .find_one_and_update(filter.clone(), raw_update)
            .with_options(options.clone())
            .await;
        let normalized_previous = self
            .normalized
            .find_one_and_update(filter, normalized_update)
            .with_options(options)
            .await;

        // A duplicate-key conflict on either write (e.g. a racing writer
        // upserted between our find and our update) is folded into
        // `MatchedExisting`, never surfaced as an error.
        let raw_existed = match raw_previous {
            Ok(prev) => prev.is_some(),
            Err(e) if is_duplicate_key(&e) => true,
            Err(e) => return Err(RepositoryError::QueryError(e.to_string())),
        };
        let normalized_existed = match normalized_previous {
            Ok(prev) => prev.is_some(),
            Err(e) if is_duplicate_key(&e) => true,
            Err(e) => return Err(RepositoryError::QueryError(e.to_string())),
        };

        Ok(if raw_existed || normalized_existed {
            UpsertOutcome::MatchedExisting
        } else {
            UpsertOutcome::Inserted
        })
    }

    async fn count_raw(&self) -> RepoResult<u64> {
        self.raw
            .estimated_document_count()
            .await
            .map_err(|e| RepositoryError::QueryError(e.to_string()))
    }

    async fn count_normalized(&self) -> RepoResult<u64> {
        self.normalized
            .estimated_document_count()
            .await
            .map_err(|e| RepositoryError::QueryError(e.to_string()))
    }

    async fn query_normalized(
        &self,
        limit: usize,
        cursor: Option<NormalizedCursor>,
    ) -> RepoResult<(Vec<UnifiedRecord>, Option<NormalizedCursor>)> {
        use futures::stream::TryStreamExt;

        let mut filter = Document::new();
        if let Some(c) = &cursor {
            filter.insert(
                "$or",
                vec![
                    doc! { "timestamp": { "$lt": bson::DateTime::from_chrono(c.sort_by_val) } },
                    doc! {
                        "timestamp": bson::DateTime::from_chrono(c.sort_by_val),
                        "symbol": { "$gt": &c.symbol },
                    },
                ],
            );
        }

        let options = mongodb::options::FindOptions::builder()
            .sort(doc! { "timestamp": -1, "symbol": 1 })
            .limit(limit as i64 + 1)
            .build();

        let mut cursor_stream = self
            .normalized
            .find(filter)
            .with_options(options)
            .await
            .map_err(|e| RepositoryError::QueryError(e.to_string()))?;

        let mut docs = Vec::new();
        while let Some(doc) = cursor_stream
            .try_next()
            .await
            .map_err(|e| RepositoryError::QueryError(e.to_string()))?
        {
            docs.push(doc);
        }

        let has_more = docs.len() > limit;
        docs.truncate(limit);

        let records: Vec<UnifiedRecord> = docs
            .iter()
            .map(|d| bson::from_document(d.clone()))
            .collect::<Result<_, _>>()
            .map_err(|e| RepositoryError::QueryError(e.to_string()))?;

        let next_cursor = if has_more {
            records.last().map(|r| NormalizedCursor {
                sort_by_val: r.timestamp,
                symbol: r.symbol.clone(),
                source: r.source,
            })
        } else {
            None
        };

        Ok((records, next_cursor))
    }

    async fn write_run_entry(&self, entry: &RunLedgerEntry) -> RepoResult<()> {
        let doc = bson::to_document(entry).map_err(|e| RepositoryError::QueryError(e.to_string()))?;
        self.runs
            .insert_one(doc)
            .await
            .map_err(|e| RepositoryError::QueryError(e.to_string()))?;
        Ok(())
    }

    async fn list_recent_runs(&self, limit: usize) -> RepoResult<Vec<RunLedgerEntry>> {
        use futures::stream::TryStreamExt;

        let options = mongodb::options::FindOptions::builder()
            .sort(doc! { "end_time": -1 })
            .limit(limit as i64)
            .build();
        let mut cursor = self
            .runs
            .find(doc! {})
            .with_options(options)
            .await
            .map_err(|e| RepositoryError::QueryError(e.to_string()))?;

        let mut entries = Vec::new();
        while let Some(doc) = cursor
            .try_next()
            .await
            .map_err(|e| RepositoryError::QueryError(e.to_string()))?
        {
            entries.push(bson::from_document(doc).map_err(|e| RepositoryError::QueryError(e.to_string()))?);
        }
        Ok(entries)
    }

    async fn get_run(&self, run_id: uuid::Uuid) -> RepoResult<Option<RunLedgerEntry>> {
        let found = self
            .runs
            .find_one(doc! { "run_id": run_id.to_string() })
            .await
            .map_err(|e| RepositoryError::QueryError(e.to_string()))?;
        found
            .map(bson::from_document)
            .transpose()
            .map_err(|e| RepositoryError::QueryError(e.to_string()))
    }
}

fn is_duplicate_key(error: &mongodb::error::Error) -> bool {
    matches!(error.kind.as_ref(), mongodb::error::ErrorKind::Write(
        mongodb::error::WriteFailure::WriteError(write_error)
    ) if write_error.code == 11000)
}

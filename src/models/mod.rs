//! Domain models
//!
//! Demonstrates Rust struct patterns with serde

pub mod checkpoint;
pub mod ledger;
pub mod record;
pub mod schema;

pub use checkpoint::Checkpoint;
pub use ledger::{FailedBatch, MappingRecord, ResumeInfo, RunLedgerEntry, RunStatus, SourceStats};
pub use record::{NaturalKey, RawRecord, Source, UnifiedRecord};
pub use schema::{ScalarTypeTag, SchemaSnapshot};

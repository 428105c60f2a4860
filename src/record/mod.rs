//! Record Module
//!
//! Per-row upsert metadata produced by ingestion.
//!
//! ## Responsibilities
//! - Primary key tuples and their hashed identity
//! - Ordered comparison values
//! - Batch-level deduplication of records sharing a key

mod key;
mod ties;
mod value;

pub use key::{HashedKey, PrimaryKey};
pub use ties::resolve_comparison_ties;
pub use value::Value;

/// Doc id (row ordinal) inside a segment
pub type DocId = u32;

/// Upsert metadata for one ingested row
#[derive(Debug, Clone, PartialEq)]
pub struct RecordInfo {
    /// Primary key of the row
    pub primary_key: PrimaryKey,

    /// Row ordinal within its segment
    pub doc_id: DocId,

    /// Value of the comparison column; highest wins
    pub comparison_value: Value,

    /// Row marks its key as deleted
    pub is_delete: bool,
}

impl RecordInfo {
    pub fn new(
        primary_key: PrimaryKey,
        doc_id: DocId,
        comparison_value: impl Into<Value>,
        is_delete: bool,
    ) -> Self {
        Self {
            primary_key,
            doc_id,
            comparison_value: comparison_value.into(),
            is_delete,
        }
    }
}

//! # Atlas Upsert
//!
//! Per-partition upsert metadata for an append-only segment store:
//! - Primary key → winning row index, resolved by comparison value
//! - Per-segment validDocIds / queryableDocIds bitmaps
//! - Query views under NONE / SYNC / SNAPSHOT consistency
//! - validDocIds snapshots with startup preload
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────┐          ┌──────────────────────┐
//! │   Ingestion Batch    │          │        Query         │
//! └──────────┬───────────┘          └──────────┬───────────┘
//!            │                                 │
//!            ▼                                 ▼
//!   ┌─────────────────┐            ┌───────────────────────┐
//!   │  Tie Resolver   │            │ Consistency-View      │
//!   └────────┬────────┘            │ Builder (cached view) │
//!            │                     └──────────┬────────────┘
//!            ▼                                │
//! ┌──────────────────────────────────────────▼─────────────┐
//! │        Partition Lock (RwLock<KeyIndex>)                │
//! └──────────────────────────┬─────────────────────────────┘
//!                            │
//!          ┌─────────────────┼─────────────────┐
//!          ▼                 ▼                 ▼
//!   ┌─────────────┐   ┌─────────────┐   ┌─────────────┐
//!   │  Segment A  │   │  Segment B  │   │  Segment C  │
//!   │  (bitmaps)  │   │  (bitmaps)  │   │  (bitmaps)  │
//!   └──────┬──────┘   └──────┬──────┘   └─────────────┘
//!          │                 │              (mutable)
//!          ▼                 ▼
//!   ┌──────────────────────────────┐
//!   │  Snapshot files / Preload    │
//!   │  (background executor)       │
//!   └──────────────────────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod record;
pub mod bitmap;
pub mod segment;
pub mod index;
pub mod executor;
pub mod assignment;
pub mod upsert;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{Result, UpsertError};
pub use config::{ConsistencyMode, HashFunction, UpsertConfig};
pub use record::{resolve_comparison_ties, PrimaryKey, RecordInfo, Value};
pub use bitmap::ThreadSafeBitmap;
pub use segment::{Segment, SegmentContext, SegmentId};
pub use index::{ConcurrentMapKeyIndex, KeyIndex, RecordLocation};
pub use upsert::{PartitionUpsertMetadataManager, PreloadReport, SnapshotReport};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of atlas-upsert
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

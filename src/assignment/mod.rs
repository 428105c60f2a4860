//! Assignment Module
//!
//! Segment-assignment view consumed during preload selection.
//!
//! ## Responsibilities
//! - Instance → state mapping per segment (ONLINE / CONSUMING / ...)
//! - Per-segment metadata (completion status, partition)
//! - Partition extraction from low-level-consumer segment names

mod llc;

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use parking_lot::RwLock;

use crate::error::{Result, UpsertError};

pub use llc::LlcSegmentName;

/// State of a segment replica on an instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SegmentState {
    Online,
    Consuming,
    Offline,
    Error,
    Dropped,
}

impl FromStr for SegmentState {
    type Err = UpsertError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "ONLINE" => Ok(SegmentState::Online),
            "CONSUMING" => Ok(SegmentState::Consuming),
            "OFFLINE" => Ok(SegmentState::Offline),
            "ERROR" => Ok(SegmentState::Error),
            "DROPPED" => Ok(SegmentState::Dropped),
            other => Err(UpsertError::Config(format!("Unknown segment state: {}", other))),
        }
    }
}

impl fmt::Display for SegmentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SegmentState::Online => "ONLINE",
            SegmentState::Consuming => "CONSUMING",
            SegmentState::Offline => "OFFLINE",
            SegmentState::Error => "ERROR",
            SegmentState::Dropped => "DROPPED",
        };
        f.write_str(name)
    }
}

/// Completion status of a realtime segment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentStatus {
    /// Still consuming
    InProgress,

    /// Sealed and committed
    Done,

    /// Uploaded by an external pipeline
    Uploaded,
}

/// Cluster-side metadata for one segment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentMetadata {
    pub name: String,
    pub status: SegmentStatus,

    /// Explicit partition, for segments whose names carry none
    pub partition_id: Option<u32>,
}

impl SegmentMetadata {
    pub fn new(name: impl Into<String>, status: SegmentStatus) -> Self {
        Self {
            name: name.into(),
            status,
            partition_id: None,
        }
    }

    pub fn with_partition(mut self, partition_id: u32) -> Self {
        self.partition_id = Some(partition_id);
        self
    }
}

/// Segment → (instance → state)
pub type SegmentAssignment = HashMap<String, HashMap<String, SegmentState>>;

/// External view of segment placement
pub trait SegmentAssignmentSource: Send + Sync {
    fn segment_assignment(&self) -> Result<SegmentAssignment>;

    fn segments_metadata(&self) -> Result<HashMap<String, SegmentMetadata>>;
}

/// Partition of a segment: from its LLC name, else from its metadata
pub fn segment_partition_id(segment_name: &str, metadata: Option<&SegmentMetadata>) -> Option<u32> {
    LlcSegmentName::parse(segment_name)
        .map(|llc| llc.partition_id)
        .or_else(|| metadata.and_then(|m| m.partition_id))
}

/// In-memory assignment source
#[derive(Debug, Default)]
pub struct StaticAssignment {
    assignment: RwLock<SegmentAssignment>,
    metadata: RwLock<HashMap<String, SegmentMetadata>>,
}

impl StaticAssignment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the state of `segment` on `instance`
    pub fn assign(&self, segment: impl Into<String>, instance: impl Into<String>, state: SegmentState) {
        self.assignment
            .write()
            .entry(segment.into())
            .or_default()
            .insert(instance.into(), state);
    }

    pub fn put_metadata(&self, metadata: SegmentMetadata) {
        self.metadata.write().insert(metadata.name.clone(), metadata);
    }
}

impl SegmentAssignmentSource for StaticAssignment {
    fn segment_assignment(&self) -> Result<SegmentAssignment> {
        Ok(self.assignment.read().clone())
    }

    fn segments_metadata(&self) -> Result<HashMap<String, SegmentMetadata>> {
        Ok(self.metadata.read().clone())
    }
}

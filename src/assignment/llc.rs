//! Low-level-consumer segment names
//!
//! `{table}__{partition}__{sequence}__{creationTime}`

use std::fmt;

const SEPARATOR: &str = "__";

/// Parsed LLC segment name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LlcSegmentName {
    pub table_name: String,
    pub partition_id: u32,
    pub sequence_number: u32,
    pub creation_time: String,
}

impl LlcSegmentName {
    /// Parse a segment name; `None` if it is not an LLC name
    pub fn parse(name: &str) -> Option<Self> {
        let parts: Vec<&str> = name.split(SEPARATOR).collect();
        if parts.len() != 4 || parts[0].is_empty() || parts[3].is_empty() {
            return None;
        }

        Some(Self {
            table_name: parts[0].to_string(),
            partition_id: parts[1].parse().ok()?,
            sequence_number: parts[2].parse().ok()?,
            creation_time: parts[3].to_string(),
        })
    }
}

impl fmt::Display for LlcSegmentName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{sep}{}{sep}{}{sep}{}",
            self.table_name,
            self.partition_id,
            self.sequence_number,
            self.creation_time,
            sep = SEPARATOR
        )
    }
}

//! Batch deduplication
//!
//! Collapses one ingestion batch to a single record per primary key before
//! the batch reaches the key index.

use std::cmp::Ordering;
use std::collections::HashMap;

use crate::config::HashFunction;
use crate::error::Result;

use super::{HashedKey, RecordInfo};

/// Keep one record per distinct primary key.
///
/// The kept record has the greatest comparison value seen for its key; on a
/// full tie the record that arrived later wins. The hash function only
/// decides key identity. Output follows the order in which each key first
/// appeared, and the function is idempotent.
pub fn resolve_comparison_ties<I>(records: I, hash_function: HashFunction) -> Result<Vec<RecordInfo>>
where
    I: IntoIterator<Item = RecordInfo>,
{
    let mut slots: HashMap<HashedKey, usize> = HashMap::new();
    let mut kept: Vec<RecordInfo> = Vec::new();

    for record in records {
        let key = record.primary_key.hashed(hash_function)?;
        match slots.get(&key) {
            Some(&slot) => {
                let order = record
                    .comparison_value
                    .compare_value(&kept[slot].comparison_value);
                if order != Ordering::Less {
                    kept[slot] = record;
                }
            }
            None => {
                slots.insert(key, kept.len());
                kept.push(record);
            }
        }
    }

    Ok(kept)
}

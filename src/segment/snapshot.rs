//! ValidDocIds snapshot file
//!
//! ## File Format
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │ Header (14 bytes)                                       │
//! │   Magic: "UPVD" (4) | Version: u16 (2) | Card: u64 (8)  │
//! ├─────────────────────────────────────────────────────────┤
//! │ Body (variable)                                         │
//! │   Portable roaring bitmap serialization                 │
//! ├─────────────────────────────────────────────────────────┤
//! │ Footer (4 bytes)                                        │
//! │   BodyCRC: u32                                          │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! Writes go to `<file>_tmp` first and are renamed over the final path, so a
//! reader only ever sees a complete file. A stale temp file left by an
//! interrupted write is truncated and reused.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use roaring::RoaringBitmap;

use crate::error::{Result, UpsertError};

/// Snapshot file name inside a segment's index directory
pub const VALID_DOC_IDS_SNAPSHOT_FILE_NAME: &str = "validdocids.bitmap.snapshot";

/// Suffix of the temporary sibling used while writing
pub const TMP_SUFFIX: &str = "_tmp";

/// Magic bytes identifying a validDocIds snapshot
pub(crate) const MAGIC: &[u8; 4] = b"UPVD";

/// Current snapshot format version
pub(crate) const VERSION: u16 = 1;

/// Header size: Magic (4) + Version (2) + Cardinality (8) = 14 bytes
pub(crate) const HEADER_SIZE: usize = 14;

/// Footer size: BodyCRC (4)
pub(crate) const FOOTER_SIZE: usize = 4;

/// Summary of a decoded snapshot (for inspection tooling)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotInfo {
    pub cardinality: u64,
    pub min_doc_id: Option<u32>,
    pub max_doc_id: Option<u32>,
    pub file_size: u64,
}

/// Path of the temporary sibling for a snapshot file
pub fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(TMP_SUFFIX);
    PathBuf::from(name)
}

/// Encode a bitmap into the snapshot file layout
pub fn encode_snapshot(bitmap: &RoaringBitmap) -> Result<Bytes> {
    let mut body = Vec::with_capacity(bitmap.serialized_size());
    bitmap.serialize_into(&mut body)?;

    let crc = crc32fast::hash(&body);

    let mut buf = BytesMut::with_capacity(HEADER_SIZE + body.len() + FOOTER_SIZE);
    buf.put_slice(MAGIC);
    buf.put_u16_le(VERSION);
    buf.put_u64_le(bitmap.len());
    buf.put_slice(&body);
    buf.put_u32_le(crc);

    Ok(buf.freeze())
}

/// Decode and validate snapshot bytes
pub fn decode_snapshot(data: &[u8]) -> Result<RoaringBitmap> {
    if data.len() < HEADER_SIZE + FOOTER_SIZE {
        return Err(UpsertError::SnapshotCorrupt(format!(
            "File too short: {} bytes",
            data.len()
        )));
    }

    let mut header = &data[..HEADER_SIZE];
    if &header[0..4] != MAGIC {
        return Err(UpsertError::SnapshotCorrupt(format!(
            "Invalid magic: expected UPVD, got {:?}",
            &header[0..4]
        )));
    }
    header.advance(4);

    let version = header.get_u16_le();
    if version != VERSION {
        return Err(UpsertError::SnapshotCorrupt(format!(
            "Unsupported snapshot version: {}",
            version
        )));
    }
    let cardinality = header.get_u64_le();

    let body = &data[HEADER_SIZE..data.len() - FOOTER_SIZE];
    let mut footer = &data[data.len() - FOOTER_SIZE..];
    let expected_crc = footer.get_u32_le();
    let actual_crc = crc32fast::hash(body);
    if expected_crc != actual_crc {
        return Err(UpsertError::SnapshotCorrupt(format!(
            "CRC mismatch: expected {:#010x}, got {:#010x}",
            expected_crc, actual_crc
        )));
    }

    let bitmap = RoaringBitmap::deserialize_from(body)
        .map_err(|e| UpsertError::SnapshotCorrupt(format!("Invalid bitmap body: {}", e)))?;

    if bitmap.len() != cardinality {
        return Err(UpsertError::SnapshotCorrupt(format!(
            "Cardinality mismatch: header says {}, bitmap has {}",
            cardinality,
            bitmap.len()
        )));
    }

    Ok(bitmap)
}

/// Write a snapshot via a temp file and atomically replace the old one
pub fn write_snapshot(path: &Path, bitmap: &RoaringBitmap) -> Result<()> {
    let encoded = encode_snapshot(bitmap)?;
    let tmp = tmp_path(path);

    {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp)?;
        file.write_all(&encoded)?;
        file.sync_all()?;
    }

    fs::rename(&tmp, path)?;

    // The new file is complete either way; only the rename may not survive a crash
    if let Err(e) = sync_parent_dir(path) {
        tracing::warn!(
            path = %path.display(),
            error = %e,
            "Failed to sync snapshot directory, rename may not be durable"
        );
    }

    Ok(())
}

/// fsync the directory containing `path`, making a rename into it durable
fn sync_parent_dir(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => File::open(parent)?.sync_all(),
        _ => Ok(()),
    }
}

/// Read and validate a snapshot file
pub fn read_snapshot(path: &Path) -> Result<RoaringBitmap> {
    if !path.is_file() {
        return Err(UpsertError::SnapshotNotFound(path.display().to_string()));
    }
    let data = fs::read(path)?;
    decode_snapshot(&data)
}

/// Read a snapshot and summarize it
pub fn inspect_snapshot(path: &Path) -> Result<SnapshotInfo> {
    let bitmap = read_snapshot(path)?;
    let file_size = fs::metadata(path)?.len();
    Ok(SnapshotInfo {
        cardinality: bitmap.len(),
        min_doc_id: bitmap.min(),
        max_doc_id: bitmap.max(),
        file_size,
    })
}

//! Configuration for atlas-upsert
//!
//! Centralized configuration with sensible defaults.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::{Result, UpsertError};

/// Query option that overrides the upsert view freshness for one query (milliseconds).
pub const UPSERT_VIEW_FRESHNESS_MS_OPTION: &str = "upsertViewFreshnessMs";

/// Upsert configuration for one partition of a table
#[derive(Debug, Clone)]
pub struct UpsertConfig {
    // -------------------------------------------------------------------------
    // Table Identity
    // -------------------------------------------------------------------------
    /// Table name with type suffix, e.g. `orders_REALTIME`
    pub table_name: String,

    /// Partition of the primary-key space this manager owns
    pub partition_id: u32,

    /// Id of the local server instance (used to read the segment assignment)
    pub instance_id: String,

    /// Root directory holding one sub-directory per segment
    /// Internal structure:
    ///   {table_data_dir}/
    ///     └── {segment_name}/
    ///           └── v3/validdocids.bitmap.snapshot
    pub table_data_dir: PathBuf,

    // -------------------------------------------------------------------------
    // Upsert Semantics
    // -------------------------------------------------------------------------
    /// How primary keys are hashed before entering the key index
    pub hash_function: HashFunction,

    /// Drop index entries older than `largest comparison value - ttl` (None = keep forever)
    pub metadata_ttl: Option<f64>,

    // -------------------------------------------------------------------------
    // Snapshot / Preload
    // -------------------------------------------------------------------------
    /// Persist validDocIds snapshots for immutable segments
    pub enable_snapshot: bool,

    /// Warm bitmaps from snapshots at startup (requires snapshots)
    pub enable_preload: bool,

    /// Worker threads of the background executor used for preload and async snapshots
    pub preload_threads: usize,

    // -------------------------------------------------------------------------
    // Query Consistency
    // -------------------------------------------------------------------------
    /// How queries see concurrent ingestion
    pub consistency_mode: ConsistencyMode,

    /// Max age of the cached upsert view in SNAPSHOT mode (milliseconds)
    pub upsert_view_refresh_interval_ms: u64,
}

/// Primary key hashing strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HashFunction {
    /// Keep the full key tuple
    #[default]
    None,

    /// 16-byte MD5 digest of the serialized key
    Md5,

    /// 16-byte MurmurHash3 (x64, 128-bit) of the serialized key
    Murmur3,
}

/// Query consistency policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConsistencyMode {
    /// Clone each segment's bitmap under its own lock only
    #[default]
    None,

    /// Clone every bitmap under the partition write lock
    Sync,

    /// Serve a cached view, rebuilt under the write lock once it goes stale
    Snapshot,
}

impl FromStr for HashFunction {
    type Err = UpsertError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "NONE" => Ok(HashFunction::None),
            "MD5" => Ok(HashFunction::Md5),
            "MURMUR3" => Ok(HashFunction::Murmur3),
            other => Err(UpsertError::Config(format!("Unknown hash function: {}", other))),
        }
    }
}

impl fmt::Display for HashFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HashFunction::None => "NONE",
            HashFunction::Md5 => "MD5",
            HashFunction::Murmur3 => "MURMUR3",
        };
        f.write_str(name)
    }
}

impl FromStr for ConsistencyMode {
    type Err = UpsertError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "NONE" => Ok(ConsistencyMode::None),
            "SYNC" => Ok(ConsistencyMode::Sync),
            "SNAPSHOT" => Ok(ConsistencyMode::Snapshot),
            other => Err(UpsertError::Config(format!("Unknown consistency mode: {}", other))),
        }
    }
}

impl Default for UpsertConfig {
    fn default() -> Self {
        Self {
            table_name: "table_REALTIME".to_string(),
            partition_id: 0,
            instance_id: "server_0".to_string(),
            table_data_dir: PathBuf::from("./upsert_data"),
            hash_function: HashFunction::None,
            metadata_ttl: None,
            enable_snapshot: false,
            enable_preload: false,
            preload_threads: 2,
            consistency_mode: ConsistencyMode::None,
            upsert_view_refresh_interval_ms: 3000,
        }
    }
}

impl UpsertConfig {
    /// Create a new config builder
    pub fn builder() -> UpsertConfigBuilder {
        UpsertConfigBuilder::default()
    }

    /// Whether startup preloading applies to this partition
    pub fn preload_applicable(&self) -> bool {
        self.enable_snapshot && self.enable_preload
    }
}

/// Builder for UpsertConfig
#[derive(Default)]
pub struct UpsertConfigBuilder {
    config: UpsertConfig,
}

impl UpsertConfigBuilder {
    /// Set the table name (with type suffix)
    pub fn table_name(mut self, name: impl Into<String>) -> Self {
        self.config.table_name = name.into();
        self
    }

    /// Set the partition id
    pub fn partition_id(mut self, id: u32) -> Self {
        self.config.partition_id = id;
        self
    }

    /// Set the local instance id
    pub fn instance_id(mut self, id: impl Into<String>) -> Self {
        self.config.instance_id = id.into();
        self
    }

    /// Set the table data directory
    pub fn table_data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.table_data_dir = path.into();
        self
    }

    /// Set the primary key hash function
    pub fn hash_function(mut self, hash_function: HashFunction) -> Self {
        self.config.hash_function = hash_function;
        self
    }

    /// Set the metadata TTL (in comparison-value units)
    pub fn metadata_ttl(mut self, ttl: f64) -> Self {
        self.config.metadata_ttl = Some(ttl);
        self
    }

    /// Enable or disable validDocIds snapshots
    pub fn enable_snapshot(mut self, enabled: bool) -> Self {
        self.config.enable_snapshot = enabled;
        self
    }

    /// Enable or disable startup preloading
    pub fn enable_preload(mut self, enabled: bool) -> Self {
        self.config.enable_preload = enabled;
        self
    }

    /// Set the number of background executor threads
    pub fn preload_threads(mut self, threads: usize) -> Self {
        self.config.preload_threads = threads;
        self
    }

    /// Set the query consistency mode
    pub fn consistency_mode(mut self, mode: ConsistencyMode) -> Self {
        self.config.consistency_mode = mode;
        self
    }

    /// Set the upsert view refresh interval (in milliseconds)
    pub fn upsert_view_refresh_interval_ms(mut self, ms: u64) -> Self {
        self.config.upsert_view_refresh_interval_ms = ms;
        self
    }

    pub fn build(self) -> Result<UpsertConfig> {
        let config = self.config;

        if config.preload_threads == 0 {
            return Err(UpsertError::Config(
                "preload_threads must be at least 1".to_string(),
            ));
        }
        if let Some(ttl) = config.metadata_ttl {
            if !ttl.is_finite() || ttl <= 0.0 {
                return Err(UpsertError::Config(format!(
                    "metadata_ttl must be a positive number, got {}",
                    ttl
                )));
            }
        }

        Ok(config)
    }
}

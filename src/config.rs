//! Tuning parameters (§6 of the design doc).
//!
//! The Python implementation this engine is based on reads these as module
//! globals (and the benchmark script mutates `PAGE_SIZE` at runtime). We
//! thread them through a `Config` value instead, constructed once by the
//! caller and handed to `Database::open`, so that two databases in the same
//! process can never disagree about page geometry.

/// Number of metadata columns that precede the user-defined data columns in
/// every record: `INDIRECTION, RID, TIMESTAMP, SCHEMA_ENCODING, BASE_RID`.
pub const NUM_META_COLS: usize = 5;

pub const INDIRECTION_COLUMN: usize = 0;
pub const RID_COLUMN: usize = 1;
pub const TIMESTAMP_COLUMN: usize = 2;
pub const SCHEMA_ENCODING_COLUMN: usize = 3;
pub const BASE_RID_COLUMN: usize = 4;

/// Size in bytes of a fixed-width data column (signed 64-bit integer).
pub const DATA_SIZE: usize = 8;

/// Maximum length, in bytes, of a table name (also the WAL string-length
/// field width: `u16`).
pub const MAX_TABLE_NAME_LEN: usize = 65535;

/// Marker file placed at the root of an existing database directory.
pub const DB_MARKER: &str = "ratiodb";

/// On-disk name of the persisted transaction tracker sidecar.
pub const TRACKER_FILE: &str = "xact_aborted";

/// On-disk name of the write-ahead log file.
pub const WAL_FILE: &str = "wal";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Size, in bytes, of every physical page (data or schema-encoding).
    pub page_size: usize,
    /// Maximum number of frames resident in the bufferpool at once.
    pub bufferpool_max_frames: usize,
    /// Whether frame locks default to read-preferring (`true`) or
    /// write-preferring (`false`).
    pub bufferpool_prefer_read: bool,
    /// Timeout, in milliseconds, for acquiring a frame lock. `None` means
    /// wait forever.
    pub bufferpool_lock_timeout_ms: Option<u64>,
    /// Timeout, in seconds, for waiting on a pinned LRU victim to unpin
    /// during eviction. Exceeding this is a fatal bug (a pin leak), not a
    /// soft failure.
    pub bufferpool_evict_timeout_secs: u64,
    /// First base RID ever allocated.
    pub base_rid_begin: i64,
    /// First tail RID ever allocated; tail RIDs descend from here.
    pub tail_rid_begin: i64,
    /// Number of tail RID allocations between merge triggers.
    pub merge_interval: i64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            page_size: 4096,
            bufferpool_max_frames: 1000,
            bufferpool_prefer_read: true,
            bufferpool_lock_timeout_ms: None,
            bufferpool_evict_timeout_secs: 10,
            base_rid_begin: 1000,
            tail_rid_begin: i64::MAX,
            merge_interval: 500,
        }
    }
}

impl Config {
    /// Number of signed-64 values that fit in one data page.
    pub fn data_recs_per_page(&self) -> usize {
        self.page_size / DATA_SIZE
    }

    /// Number of bitmaps of `num_columns` bits that fit in one
    /// schema-encoding page.
    pub fn schema_recs_per_page(&self, num_columns: usize) -> usize {
        self.page_size / schema_col_size(num_columns)
    }

    /// The conceptual page capacity: the minimum of the data-page and
    /// schema-encoding-page record counts (§4.2, §6).
    pub fn con_page_max_recs(&self, num_columns: usize) -> usize {
        self.data_recs_per_page()
            .min(self.schema_recs_per_page(num_columns))
    }
}

/// Width, in bytes, of a schema-encoding bitmap for a table with
/// `num_columns` data columns: `ceil(num_columns / 8)`.
pub fn schema_col_size(num_columns: usize) -> usize {
    (num_columns + 7) / 8
}

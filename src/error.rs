use thiserror::Error;

/// Error taxonomy for the storage engine (§7).
///
/// Internal engine code returns `Result<_, StorageError>`. The query layer
/// (`crate::query::Query`) is total: it catches every variant at its
/// boundary and turns failure into a plain `false`/`None`, except during
/// `Database::open`'s WAL redo pass, where a `Recovery` error is fatal and
/// propagates out of `open` (§7, §4.10).
#[derive(Error, Debug)]
pub enum StorageError {
    /// Caller-supplied argument is invalid: bad key index, projection
    /// length mismatch, column count mismatch, unknown table, table name
    /// too long, or a `version > 0` request.
    #[error("validation error: {0}")]
    Validation(String),

    /// A value already present in a unique index.
    #[error("unique key violation")]
    UniqueKeyViolation,

    /// Lock acquisition (frame RW lock, page directory RW lock) timed out.
    /// Surfaces to the caller as a soft failure.
    #[error("lock acquisition timed out: {0}")]
    LockTimeout(String),

    /// The LRU victim did not unpin within `bufferpool_evict_timeout_secs`.
    /// Per §7 this indicates a pin leak and is fatal, not a soft failure.
    #[error("eviction timeout waiting for page to unpin: {0:?}")]
    EvictionTimeout(String),

    /// A conceptual page ran out of capacity where the allocator should
    /// have guaranteed space. Per §7, "cannot happen under normal
    /// allocation" — treated as an internal invariant violation.
    #[error("internal invariant violation: {0}")]
    Invariant(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A malformed WAL record, or a logged transaction whose redo returned
    /// `false` during recovery (§7: fatal, aborts `open`).
    #[error("recovery error: {0}")]
    Recovery(String),
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;

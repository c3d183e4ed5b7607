//! `lstore`: an embedded, column-oriented storage engine following the
//! L-Store design (base pages + append-only tail delta pages, periodically
//! folded together by a background merge worker).
//!
//! Grounded on `examples/original_source/lstore/` end to end; module-level
//! doc comments throughout this crate cite the specific Python source file
//! each Rust module generalizes.

mod bufferpool;
mod config;
mod database;
mod error;
mod filesystem;
mod index;
mod page;
mod pagedir;
mod query;
mod record;
mod rwlock;
mod table;
mod transaction;
mod transaction_tracker;
mod wal;

pub use bufferpool::Bufferpool;
pub use config::Config;
pub use database::Database;
pub use error::{StorageError, StorageResult};
pub use index::{ColumnIndex, Index, RangedIndex, UniqueIndex};
pub use query::Query;
pub use record::Record;
pub use table::Table;
pub use transaction::Transaction;
pub use wal::{LoggedQuery, RedoTransaction, TableQuery, WriteAheadLog};

#[cfg(test)]
mod tests {
    use std::sync::Once;

    static INIT: Once = Once::new();

    fn setup() {
        INIT.call_once(init_log);
    }

    fn init_log() {
        use env_logger::Builder;
        use std::io::Write;

        let mut builder = Builder::from_default_env();
        builder
            .format_timestamp_secs()
            .format(|buf, record| {
                writeln!(
                    buf,
                    "[{} - {}] [{}:{}] {}",
                    record.level(),
                    record.target(),
                    record.file().unwrap_or("?"),
                    record.line().unwrap_or(0),
                    record.args()
                )
            })
            .is_test(true)
            .try_init()
            .ok();
    }

    #[test]
    fn end_to_end_insert_update_delete_through_public_api() {
        setup();
        let dir = tempfile::tempdir().unwrap();
        let mut db = crate::Database::open(dir.path(), crate::Config::default()).unwrap();
        db.create_table("students", 3, 0).unwrap();
        let query = db.query("students").unwrap();

        assert!(query.insert(&[1, 100, 90], None));
        assert!(query.update(1, &[None, Some(95), None], None));
        assert_eq!(query.select(1, 0, &[1, 1, 1]).unwrap()[0].columns, vec![1, 95, 90]);
        assert!(query.delete(1, None));
        assert!(query.select(1, 0, &[1, 1, 1]).unwrap().is_empty());

        db.close().unwrap();
    }
}

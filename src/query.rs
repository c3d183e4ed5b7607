//! Public query surface (§6): a thin, always-total layer over `Table` +
//! `Index` that logs every mutation to the write-ahead log.
//!
//! Grounded on `examples/original_source/lstore/query.py`'s `Query`: every
//! public method here catches all internal failures at its boundary and
//! returns a distinguished `false`/`None`/empty result (§7 propagation
//! policy), never propagating a `StorageError` or panicking.

use std::sync::Arc;

use crate::record::Record;
use crate::table::Table;
use crate::transaction::{now_ns, Transaction};
use crate::wal::{LoggedQuery, TableQuery, WriteAheadLog};

/// Query operations against one table, logging each implicit (caller
/// didn't supply a transaction) mutation to `wal` as a single-query
/// transaction.
pub struct Query {
    table: Arc<Table>,
    wal: Arc<WriteAheadLog>,
}

impl Query {
    pub fn new(table: Arc<Table>, wal: Arc<WriteAheadLog>) -> Self {
        Query { table, wal }
    }

    fn log_implicit(&self, start_time: i64, query: LoggedQuery) {
        let entry = TableQuery {
            table_name: self.table.name().to_string(),
            query,
        };
        if let Err(e) = self.wal.log(start_time, &[entry]) {
            log::warn!("table {}: failed to log WAL entry: {}", self.table.name(), e);
        }
    }

    /// §8 property 1/5: rejects a duplicate key, otherwise appends a base
    /// record and indexes every column.
    pub fn insert(&self, columns: &[i64], xact: Option<&mut Transaction>) -> bool {
        self.insert_impl(columns, xact).unwrap_or(false)
    }

    fn insert_impl(&self, columns: &[i64], xact: Option<&mut Transaction>) -> Option<bool> {
        if columns.len() != self.table.num_columns() {
            return Some(false);
        }
        let key_col = self.table.key_col();
        {
            let index = self.table.index().lock().unwrap();
            if !index.locate(key_col, columns[key_col]).ok()?.is_empty() {
                return Some(false);
            }
        }

        let timestamp = xact.as_ref().map(|x| x.start_time).unwrap_or_else(now_ns);
        let mut rec = Record::new(key_col, columns.to_vec());
        rec.timestamp = timestamp;
        let base_rid = self.table.add_base_record(&mut rec).ok()?;

        {
            let mut index = self.table.index().lock().unwrap();
            for (col, &value) in columns.iter().enumerate() {
                let _ = index.add(col, value, base_rid);
            }
        }

        match xact {
            Some(xact) => {
                self.table.bind_transaction(xact);
                xact.affected_rids.push(base_rid);
            }
            None => {
                let mut inner = Transaction::new(timestamp);
                self.table.bind_transaction(&mut inner);
                inner.affected_rids.push(base_rid);
                inner.commit();
                self.log_implicit(
                    timestamp,
                    LoggedQuery::Insert {
                        columns: columns.to_vec(),
                    },
                );
            }
        }
        Some(true)
    }

    /// §8 property 2. `columns[i] = None` leaves column `i` unchanged.
    pub fn update(&self, key: i64, columns: &[Option<i64>], xact: Option<&mut Transaction>) -> bool {
        self.update_impl(key, columns, xact).unwrap_or(false)
    }

    fn update_impl(&self, key: i64, columns: &[Option<i64>], xact: Option<&mut Transaction>) -> Option<bool> {
        let key_col = self.table.key_col();
        let base_rid = self.locate_unique(key_col, key)?;
        if columns.iter().all(|c| c.is_none()) {
            return Some(true);
        }
        if columns.len() != self.table.num_columns() {
            return Some(false);
        }

        let original = self.table.get_latest_record(base_rid).ok()?;
        let timestamp = xact.as_ref().map(|x| x.start_time).unwrap_or_else(now_ns);
        let tail_rid = self.table.add_tail_record(base_rid, columns, timestamp).ok()?;

        {
            let mut index = self.table.index().lock().unwrap();
            for (col, &new_value) in columns.iter().enumerate() {
                let Some(new_value) = new_value else { continue };
                let original_value = original.columns[col];
                if original_value == new_value {
                    continue;
                }
                let _ = index.remove(col, original_value, Some(base_rid));
                let _ = index.add(col, new_value, base_rid);
            }
        }

        match xact {
            Some(xact) => {
                self.table.bind_transaction(xact);
                xact.affected_rids.push(tail_rid);
            }
            None => {
                let mut inner = Transaction::new(timestamp);
                self.table.bind_transaction(&mut inner);
                inner.affected_rids.push(tail_rid);
                inner.commit();
                self.log_implicit(
                    timestamp,
                    LoggedQuery::Update {
                        key,
                        columns: columns.to_vec(),
                    },
                );
            }
        }
        Some(true)
    }

    /// §8 property 4. Returns `None` on validation failure, `Some(vec)`
    /// (possibly empty) otherwise.
    pub fn select(&self, key: i64, search_col: usize, projection: &[u8]) -> Option<Vec<Record>> {
        self.select_version(key, search_col, projection, 0)
    }

    pub fn select_version(&self, key: i64, search_col: usize, projection: &[u8], version: i64) -> Option<Vec<Record>> {
        if version > 0 || projection.len() != self.table.num_columns() {
            return None;
        }
        if version == 0 {
            let indexed = {
                let index = self.table.index().lock().unwrap();
                index.locate(search_col, key).ok()
            };
            let mut results = Vec::new();
            match indexed {
                Some(rids) => {
                    for base_rid in rids {
                        if let Ok(mut rec) = self.table.get_latest_record(base_rid) {
                            if !rec.is_deleted() {
                                rec.filter_columns(projection);
                                results.push(rec);
                            }
                        }
                    }
                }
                None => {
                    // No index on this column: fall back to a linear scan
                    // (§4.6 "a column may be queried without an index").
                    for mut rec in self.table.records(0) {
                        if rec.columns[search_col] == key {
                            rec.filter_columns(projection);
                            results.push(rec);
                        }
                    }
                }
            }
            return Some(results);
        }

        let mut results = Vec::new();
        for mut rec in self.table.records(version) {
            if rec.columns[search_col] == key {
                rec.filter_columns(projection);
                results.push(rec);
            }
        }
        Some(results)
    }

    /// §8 property 6.
    pub fn sum(&self, lo: i64, hi: i64, col: usize) -> Option<i64> {
        self.sum_version(lo, hi, col, 0)
    }

    pub fn sum_version(&self, lo: i64, hi: i64, col: usize, version: i64) -> Option<i64> {
        if col >= self.table.num_columns() || version > 0 {
            return None;
        }
        if version == 0 {
            let key_col = self.table.key_col();
            let rids = {
                let index = self.table.index().lock().unwrap();
                index.locate_range(key_col, lo, hi).ok()?
            };
            if rids.is_empty() {
                return None;
            }
            let mut total = 0i64;
            for rid in rids {
                if let Ok(rec) = self.table.get_latest_record(rid) {
                    if !rec.is_deleted() {
                        total += rec.columns[col];
                    }
                }
            }
            return Some(total);
        }

        let key_col = self.table.key_col();
        let mut total = 0i64;
        let mut found = false;
        for rec in self.table.records(version) {
            if rec.columns[key_col] >= lo && rec.columns[key_col] <= hi {
                found = true;
                total += rec.columns[col];
            }
        }
        if found {
            Some(total)
        } else {
            None
        }
    }

    /// §8 property 4: removes the key from the key index and appends a
    /// deletion tail record.
    pub fn delete(&self, key: i64, xact: Option<&mut Transaction>) -> bool {
        self.delete_impl(key, xact).unwrap_or(false)
    }

    fn delete_impl(&self, key: i64, xact: Option<&mut Transaction>) -> Option<bool> {
        let key_col = self.table.key_col();
        let base_rid = self.locate_unique(key_col, key)?;
        let rec = self.table.get_latest_record(base_rid).ok()?;
        if rec.is_deleted() {
            return Some(false);
        }

        let timestamp = xact.as_ref().map(|x| x.start_time).unwrap_or_else(now_ns);
        let tail_rid = self.table.delete_record(base_rid, timestamp).ok()?;

        {
            let mut index = self.table.index().lock().unwrap();
            let _ = index.remove(key_col, key, Some(base_rid));
            for col in 0..self.table.num_columns() {
                if col == key_col {
                    continue;
                }
                let _ = index.remove(col, rec.columns[col], Some(base_rid));
            }
        }

        match xact {
            Some(xact) => {
                self.table.bind_transaction(xact);
                xact.affected_rids.push(tail_rid);
            }
            None => {
                let mut inner = Transaction::new(timestamp);
                self.table.bind_transaction(&mut inner);
                inner.affected_rids.push(tail_rid);
                inner.commit();
                self.log_implicit(timestamp, LoggedQuery::Delete { key });
            }
        }
        Some(true)
    }

    /// Built on top of `select`/`update` with an explicit inner
    /// transaction, so that `update` doesn't log its own WAL entry;
    /// `increment` logs exactly one (§C.4).
    pub fn increment(&self, key: i64, col: usize, xact: Option<&mut Transaction>) -> bool {
        self.increment_impl(key, col, xact).unwrap_or(false)
    }

    fn increment_impl(&self, key: i64, col: usize, xact: Option<&mut Transaction>) -> Option<bool> {
        if col >= self.table.num_columns() {
            return Some(false);
        }
        let all_cols = vec![1u8; self.table.num_columns()];
        let current = self.select(key, self.table.key_col(), &all_cols)?;
        let rec = current.into_iter().next()?;

        let timestamp = xact.as_ref().map(|x| x.start_time).unwrap_or_else(now_ns);
        let mut columns = vec![None; self.table.num_columns()];
        columns[col] = Some(rec.columns[col] + 1);

        match xact {
            Some(xact) => Some(self.update_impl(key, &columns, Some(xact)).unwrap_or(false)),
            None => {
                let mut inner = Transaction::new(timestamp);
                let ok = self.update_impl(key, &columns, Some(&mut inner)).unwrap_or(false);
                if ok {
                    inner.commit();
                    self.log_implicit(timestamp, LoggedQuery::Increment { key, column: col as u16 });
                }
                Some(ok)
            }
        }
    }

    /// Replay one already-logged query against this table, as part of
    /// WAL recovery (§4.10). Never logs a new WAL entry; the caller
    /// commits `xact` once every query in the recovered transaction has
    /// run.
    pub fn redo(&self, query: &LoggedQuery, xact: &mut Transaction) -> bool {
        match query {
            LoggedQuery::Insert { columns } => self.insert(columns, Some(xact)),
            LoggedQuery::Update { key, columns } => self.update(*key, columns, Some(xact)),
            LoggedQuery::Increment { key, column } => self.increment(*key, *column as usize, Some(xact)),
            LoggedQuery::Delete { key } => self.delete(*key, Some(xact)),
        }
    }

    fn locate_unique(&self, col: usize, value: i64) -> Option<i64> {
        let index = self.table.index().lock().unwrap();
        let rids = index.locate(col, value).ok()?;
        if rids.len() != 1 {
            return None;
        }
        Some(rids[0])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bufferpool::Bufferpool;
    use crate::config::{Config, NUM_META_COLS};
    use crate::index::Index;
    use crate::pagedir::PageDirectory;
    use crate::transaction_tracker::TransactionTracker;
    use tempfile::tempdir;

    fn new_query(dir: &std::path::Path, num_columns: usize, key_col: usize) -> Query {
        let config = Config::default();
        for raw_col in 0..num_columns + NUM_META_COLS {
            for is_base in [true, false] {
                let pid = crate::page::PageId::new("t", raw_col, is_base, 0);
                let path = crate::filesystem::column_file_path(dir, &pid);
                crate::filesystem::create_column_file(&path, config.page_size).unwrap();
            }
        }
        let bufferpool = Arc::new(Bufferpool::new(dir, config));
        let page_directory = Arc::new(PageDirectory::new("t", num_columns, config));
        let tracker = Arc::new(TransactionTracker::new());
        let index = Index::new(num_columns, key_col, std::iter::empty()).unwrap();
        let table = Arc::new(Table::new("t", num_columns, key_col, bufferpool, page_directory, tracker, index));
        let wal = Arc::new(WriteAheadLog::open(dir).unwrap());
        Query::new(table, wal)
    }

    #[test]
    fn insert_select_round_trip() {
        let dir = tempdir().unwrap();
        let query = new_query(dir.path(), 3, 0);
        assert!(query.insert(&[1, 10, 20], None));
        let rows = query.select(1, 0, &[1, 1, 1]).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].columns, vec![1, 10, 20]);
    }

    #[test]
    fn duplicate_key_insert_rejected() {
        let dir = tempdir().unwrap();
        let query = new_query(dir.path(), 2, 0);
        assert!(query.insert(&[1, 5], None));
        assert!(!query.insert(&[1, 9], None));
        assert_eq!(query.select(1, 0, &[1, 1]).unwrap()[0].columns, vec![1, 5]);
    }

    #[test]
    fn update_merges_nulls_with_previous_values() {
        let dir = tempdir().unwrap();
        let query = new_query(dir.path(), 3, 0);
        query.insert(&[1, 10, 20], None);
        assert!(query.update(1, &[None, Some(99), None], None));
        let rows = query.select(1, 0, &[1, 1, 1]).unwrap();
        assert_eq!(rows[0].columns, vec![1, 99, 20]);
    }

    #[test]
    fn delete_removes_key_and_allows_reinsert() {
        let dir = tempdir().unwrap();
        let query = new_query(dir.path(), 2, 0);
        query.insert(&[1, 5], None);
        assert!(query.delete(1, None));
        assert!(query.select(1, 0, &[1, 1]).unwrap().is_empty());
        assert!(query.insert(&[1, 7], None));
    }

    #[test]
    fn sum_over_range() {
        let dir = tempdir().unwrap();
        let query = new_query(dir.path(), 2, 0);
        query.insert(&[1, 10], None);
        query.insert(&[2, 20], None);
        query.insert(&[3, 30], None);
        assert_eq!(query.sum(1, 2, 1), Some(30));
        assert_eq!(query.sum(100, 200, 1), None);
    }

    #[test]
    fn increment_bumps_one_column() {
        let dir = tempdir().unwrap();
        let query = new_query(dir.path(), 2, 0);
        query.insert(&[1, 10], None);
        assert!(query.increment(1, 1, None));
        assert_eq!(query.select(1, 0, &[1, 1]).unwrap()[0].columns, vec![1, 11]);
    }

    #[test]
    fn versioning_walks_back_through_updates() {
        let dir = tempdir().unwrap();
        let query = new_query(dir.path(), 2, 0);
        query.insert(&[1, 100], None);
        query.update(1, &[None, Some(200)], None);
        query.update(1, &[None, Some(300)], None);

        assert_eq!(query.select_version(1, 0, &[1, 1], 0).unwrap()[0].columns, vec![1, 300]);
        assert_eq!(query.select_version(1, 0, &[1, 1], -1).unwrap()[0].columns, vec![1, 200]);
        assert_eq!(query.select_version(1, 0, &[1, 1], -2).unwrap()[0].columns, vec![1, 100]);
    }
}

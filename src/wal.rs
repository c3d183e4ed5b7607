//! Write-ahead log (§4.8).
//!
//! Grounded on `examples/original_source/lstore/wal.py`'s
//! `WriteAheadLogParser`/`TransactionSerializer`/`WriteAheadLog`. The Python
//! source logs `(callable, table_name, args)` tuples pulled straight out of
//! a `Transaction`'s recorded query list; this crate's `Transaction` doesn't
//! keep that list (see `crate::transaction`), so the query layer hands
//! `log` an explicit `LoggedQuery` describing what to redo instead.

use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use bit_vec::BitVec;

use crate::config::MAX_TABLE_NAME_LEN;
use crate::error::{StorageError, StorageResult};

/// One mutating query, captured with enough detail to redo it during
/// recovery. Only the four mutating query types are ever logged (§4.8);
/// `select`/`sum` never appear here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoggedQuery {
    Insert { columns: Vec<i64> },
    Update { key: i64, columns: Vec<Option<i64>> },
    Increment { key: i64, column: u16 },
    Delete { key: i64 },
}

const QUERY_INSERT: u8 = 1;
const QUERY_UPDATE: u8 = 2;
const QUERY_INCREMENT: u8 = 3;
const QUERY_DELETE: u8 = 4;

/// A logged query together with the table it targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableQuery {
    pub table_name: String,
    pub query: LoggedQuery,
}

/// One redoable transaction recovered from the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedoTransaction {
    pub start_time: i64,
    pub queries: Vec<TableQuery>,
}

/// Append-only binary log of every mutating query, grouped by the
/// transaction that ran it. Every append is fsynced before `log` returns
/// (§5: "WAL append + fsync happens-before commit return to caller").
pub struct WriteAheadLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl WriteAheadLog {
    pub fn open(db_root: &Path) -> StorageResult<Self> {
        let path = db_root.join(crate::config::WAL_FILE);
        let file = OpenOptions::new().create(true).read(true).append(true).open(&path)?;
        Ok(WriteAheadLog {
            path,
            file: Mutex::new(file),
        })
    }

    /// Append one transaction's worth of mutating queries and fsync. A
    /// transaction with no mutating queries (e.g. one built only to group
    /// read-only work) is still written, matching the grammar's
    /// `n_queries:u64` field, which may legally be zero.
    pub fn log(&self, start_time: i64, queries: &[TableQuery]) -> StorageResult<()> {
        for q in queries {
            if q.table_name.as_bytes().len() > MAX_TABLE_NAME_LEN {
                return Err(StorageError::Validation(format!(
                    "table name {:?} exceeds {} bytes",
                    q.table_name, MAX_TABLE_NAME_LEN
                )));
            }
        }
        let mut guard = self.file.lock().unwrap();
        let mut buf = Vec::new();
        write_transaction(&mut buf, start_time, queries)?;
        guard.write_all(&buf)?;
        guard.flush()?;
        guard.sync_all()?;
        Ok(())
    }

    /// Truncate the log to zero length and fsync. Only safe to call once a
    /// bufferpool checkpoint has made every previously logged transaction
    /// durable in the column files themselves (§4.8).
    pub fn checkpoint(&self) -> StorageResult<()> {
        let guard = self.file.lock().unwrap();
        guard.set_len(0)?;
        guard.sync_all()?;
        Ok(())
    }

    /// Parse the whole log and return every transaction in file order,
    /// ready for the database's recovery driver to redo.
    pub fn recover(&self) -> StorageResult<Vec<RedoTransaction>> {
        let guard = self.file.lock().unwrap();
        let mut file = guard.try_clone()?;
        file.seek(SeekFrom::Start(0))?;
        let mut reader = BufReader::new(file);
        let mut transactions = Vec::new();
        loop {
            match read_transaction(&mut reader)? {
                Some(xact) => transactions.push(xact),
                None => break,
            }
        }
        Ok(transactions)
    }

    /// Checkpoint (truncate) and drop the open handle. Matches §4.10
    /// `close()`'s "close the WAL (checkpoint-truncate)".
    pub fn close(self) -> StorageResult<()> {
        self.checkpoint()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn write_transaction(w: &mut impl Write, start_time: i64, queries: &[TableQuery]) -> StorageResult<()> {
    w.write_all(&(start_time as u64).to_le_bytes())?;
    w.write_all(&(queries.len() as u64).to_le_bytes())?;
    for q in queries {
        write_query(w, q)?;
    }
    Ok(())
}

fn write_query(w: &mut impl Write, q: &TableQuery) -> StorageResult<()> {
    let query_type = match &q.query {
        LoggedQuery::Insert { .. } => QUERY_INSERT,
        LoggedQuery::Update { .. } => QUERY_UPDATE,
        LoggedQuery::Increment { .. } => QUERY_INCREMENT,
        LoggedQuery::Delete { .. } => QUERY_DELETE,
    };
    w.write_all(&[query_type])?;
    write_string(w, &q.table_name)?;
    match &q.query {
        LoggedQuery::Insert { columns } => {
            w.write_all(&(columns.len() as u16).to_le_bytes())?;
            for &c in columns {
                w.write_all(&(c as u64).to_le_bytes())?;
            }
        }
        LoggedQuery::Update { key, columns } => {
            w.write_all(&(*key as u64).to_le_bytes())?;
            w.write_all(&(columns.len() as u16).to_le_bytes())?;
            let mut mask = BitVec::from_elem(columns.len(), false);
            for (i, c) in columns.iter().enumerate() {
                mask.set(i, c.is_some());
            }
            w.write_all(&mask.to_bytes())?;
            for c in columns.iter().flatten() {
                w.write_all(&(*c as u64).to_le_bytes())?;
            }
        }
        LoggedQuery::Increment { key, column } => {
            w.write_all(&(*key as u64).to_le_bytes())?;
            w.write_all(&column.to_le_bytes())?;
        }
        LoggedQuery::Delete { key } => {
            w.write_all(&(*key as u64).to_le_bytes())?;
        }
    }
    Ok(())
}

fn write_string(w: &mut impl Write, s: &str) -> StorageResult<()> {
    let bytes = s.as_bytes();
    w.write_all(&(bytes.len() as u16).to_le_bytes())?;
    w.write_all(bytes)?;
    Ok(())
}

/// Reads one `TRANSACTION`, or `None` at a clean end-of-file. A truncated
/// trailing transaction (a crash mid-append) is treated the same as a
/// clean EOF: whatever bytes didn't make it were never fsynced as a
/// complete unit, so they carry no durable commitment.
fn read_transaction(r: &mut impl Read) -> StorageResult<Option<RedoTransaction>> {
    let start_time = match read_u64_opt(r)? {
        Some(v) => v as i64,
        None => return Ok(None),
    };
    let n_queries = match read_u64_opt(r)? {
        Some(v) => v,
        None => return Ok(None),
    };
    let mut queries = Vec::with_capacity(n_queries as usize);
    for _ in 0..n_queries {
        match read_query(r)? {
            Some(q) => queries.push(q),
            None => return Ok(None),
        }
    }
    Ok(Some(RedoTransaction { start_time, queries }))
}

fn read_query(r: &mut impl Read) -> StorageResult<Option<TableQuery>> {
    let mut type_buf = [0u8; 1];
    if !read_exact_or_eof(r, &mut type_buf)? {
        return Ok(None);
    }
    let query_type = type_buf[0];
    let table_name = match read_string(r)? {
        Some(s) => s,
        None => return Ok(None),
    };
    let query = match query_type {
        QUERY_INSERT => {
            let num_cols = match read_u16_opt(r)? {
                Some(v) => v,
                None => return Ok(None),
            };
            let mut columns = Vec::with_capacity(num_cols as usize);
            for _ in 0..num_cols {
                match read_u64_opt(r)? {
                    Some(v) => columns.push(v as i64),
                    None => return Ok(None),
                }
            }
            LoggedQuery::Insert { columns }
        }
        QUERY_UPDATE => {
            let key = match read_u64_opt(r)? {
                Some(v) => v as i64,
                None => return Ok(None),
            };
            let num_cols = match read_u16_opt(r)? {
                Some(v) => v,
                None => return Ok(None),
            };
            let mask_len = (num_cols as usize + 7) / 8;
            let mut mask_bytes = vec![0u8; mask_len];
            if !read_exact_or_eof(r, &mut mask_bytes)? {
                return Ok(None);
            }
            let mask = BitVec::from_bytes(&mask_bytes);
            let mut columns = Vec::with_capacity(num_cols as usize);
            for i in 0..num_cols as usize {
                if mask.get(i) == Some(true) {
                    match read_u64_opt(r)? {
                        Some(v) => columns.push(Some(v as i64)),
                        None => return Ok(None),
                    }
                } else {
                    columns.push(None);
                }
            }
            LoggedQuery::Update { key, columns }
        }
        QUERY_INCREMENT => {
            let key = match read_u64_opt(r)? {
                Some(v) => v as i64,
                None => return Ok(None),
            };
            let column = match read_u16_opt(r)? {
                Some(v) => v,
                None => return Ok(None),
            };
            LoggedQuery::Increment { key, column }
        }
        QUERY_DELETE => {
            let key = match read_u64_opt(r)? {
                Some(v) => v as i64,
                None => return Ok(None),
            };
            LoggedQuery::Delete { key }
        }
        other => {
            return Err(StorageError::Recovery(format!("unknown WAL query type {}", other)));
        }
    };
    Ok(Some(TableQuery { table_name, query }))
}

fn read_string(r: &mut impl Read) -> StorageResult<Option<String>> {
    let len = match read_u16_opt(r)? {
        Some(v) => v,
        None => return Ok(None),
    };
    let mut bytes = vec![0u8; len as usize];
    if !read_exact_or_eof(r, &mut bytes)? {
        return Ok(None);
    }
    String::from_utf8(bytes)
        .map(Some)
        .map_err(|e| StorageError::Recovery(format!("invalid utf8 table name in WAL: {}", e)))
}

fn read_u64_opt(r: &mut impl Read) -> StorageResult<Option<u64>> {
    let mut buf = [0u8; 8];
    if !read_exact_or_eof(r, &mut buf)? {
        return Ok(None);
    }
    Ok(Some(u64::from_le_bytes(buf)))
}

fn read_u16_opt(r: &mut impl Read) -> StorageResult<Option<u16>> {
    let mut buf = [0u8; 2];
    if !read_exact_or_eof(r, &mut buf)? {
        return Ok(None);
    }
    Ok(Some(u16::from_le_bytes(buf)))
}

/// Like `Read::read_exact`, but a zero-byte read at the very start of the
/// buffer is reported as a clean EOF (`Ok(false)`) instead of an error,
/// since that's exactly where a well-formed log (or a crash between
/// transactions) ends.
fn read_exact_or_eof(r: &mut impl Read, buf: &mut [u8]) -> StorageResult<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        match r.read(&mut buf[filled..]) {
            Ok(0) => {
                return if filled == 0 {
                    Ok(false)
                } else {
                    Err(StorageError::Recovery("truncated WAL record".to_string()))
                };
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(StorageError::Io(e)),
        }
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn roundtrip(queries: Vec<TableQuery>) -> Vec<RedoTransaction> {
        let dir = tempdir().unwrap();
        let wal = WriteAheadLog::open(dir.path()).unwrap();
        wal.log(1, &queries).unwrap();
        wal.recover().unwrap()
    }

    #[test]
    fn insert_round_trips() {
        let queries = vec![TableQuery {
            table_name: "grades".to_string(),
            query: LoggedQuery::Insert {
                columns: vec![1, 20, 30],
            },
        }];
        let recovered = roundtrip(queries.clone());
        assert_eq!(recovered.len(), 1);
        assert_eq!(recovered[0].start_time, 1);
        assert_eq!(recovered[0].queries, queries);
    }

    #[test]
    fn update_with_nulls_round_trips() {
        let queries = vec![TableQuery {
            table_name: "grades".to_string(),
            query: LoggedQuery::Update {
                key: 42,
                columns: vec![None, Some(99), None],
            },
        }];
        let recovered = roundtrip(queries.clone());
        assert_eq!(recovered[0].queries, queries);
    }

    #[test]
    fn increment_and_delete_round_trip() {
        let queries = vec![
            TableQuery {
                table_name: "grades".to_string(),
                query: LoggedQuery::Increment { key: 7, column: 2 },
            },
            TableQuery {
                table_name: "grades".to_string(),
                query: LoggedQuery::Delete { key: 7 },
            },
        ];
        let recovered = roundtrip(queries.clone());
        assert_eq!(recovered[0].queries, queries);
    }

    #[test]
    fn checkpoint_truncates_and_recover_then_sees_nothing() {
        let dir = tempdir().unwrap();
        let wal = WriteAheadLog::open(dir.path()).unwrap();
        wal.log(
            1,
            &[TableQuery {
                table_name: "t".to_string(),
                query: LoggedQuery::Delete { key: 1 },
            }],
        )
        .unwrap();
        wal.checkpoint().unwrap();
        assert!(wal.recover().unwrap().is_empty());
    }

    #[test]
    fn multiple_transactions_preserve_order() {
        let dir = tempdir().unwrap();
        let wal = WriteAheadLog::open(dir.path()).unwrap();
        wal.log(
            1,
            &[TableQuery {
                table_name: "t".to_string(),
                query: LoggedQuery::Insert { columns: vec![1, 2] },
            }],
        )
        .unwrap();
        wal.log(
            2,
            &[TableQuery {
                table_name: "t".to_string(),
                query: LoggedQuery::Delete { key: 1 },
            }],
        )
        .unwrap();
        let recovered = wal.recover().unwrap();
        assert_eq!(recovered.len(), 2);
        assert_eq!(recovered[0].start_time, 1);
        assert_eq!(recovered[1].start_time, 2);
    }
}

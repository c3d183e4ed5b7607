//! Committed/aborted transaction bookkeeping (§4.9).
//!
//! Grounded on `examples/original_source/lstore/transaction_tracker.py`.
//! Absence of an entry means "possibly still pending" — the version
//! walker (`Table::get_record_version`) uses this to decide whether a
//! tail record's updates are visible yet (§4.7).

use std::cell::UnsafeCell;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use crate::error::{StorageError, StorageResult};
use crate::rwlock::{ReadersWriterLock, WritePreferringRwLock};

/// Whether a transaction, identified by its start timestamp, committed or
/// aborted. `None` (no entry) means the transaction is still running, or
/// never ran at all.
///
/// `aborted` is an `UnsafeCell` rather than a plain field because
/// `ReadersWriterLock`'s `read`/`write` helpers guard access by protocol,
/// not by owning the data themselves (§4.1); every access happens inside
/// one of those closures, which is what makes the cell's aliasing sound.
pub struct TransactionTracker {
    lock: WritePreferringRwLock,
    aborted: UnsafeCell<HashMap<i64, bool>>,
}

// SAFETY: all access to `aborted` happens while holding `lock`'s read or
// write side, which `WritePreferringRwLock` itself is `Sync` to manage.
unsafe impl Sync for TransactionTracker {}

impl Default for TransactionTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionTracker {
    pub fn new() -> Self {
        TransactionTracker {
            lock: WritePreferringRwLock::new(),
            aborted: UnsafeCell::new(HashMap::new()),
        }
    }

    fn mark(&self, timestamp: i64, is_aborted: bool) -> StorageResult<()> {
        self.lock
            .write(None, || {
                let aborted = unsafe { &mut *self.aborted.get() };
                if aborted.contains_key(&timestamp) {
                    return Err(StorageError::Invariant(format!(
                        "transaction {} already resolved",
                        timestamp
                    )));
                }
                aborted.insert(timestamp, is_aborted);
                Ok(())
            })
            .unwrap()
    }

    pub fn mark_committed(&self, timestamp: i64) -> StorageResult<()> {
        self.mark(timestamp, false)
    }

    pub fn mark_aborted(&self, timestamp: i64) -> StorageResult<()> {
        self.mark(timestamp, true)
    }

    pub fn is_committed(&self, timestamp: i64) -> bool {
        self.lock
            .read(None, || unsafe { &*self.aborted.get() }.get(&timestamp) == Some(&false))
            .unwrap()
    }

    pub fn is_aborted(&self, timestamp: i64) -> bool {
        if timestamp == 0 {
            return false;
        }
        self.lock
            .read(None, || unsafe { &*self.aborted.get() }.get(&timestamp) == Some(&true))
            .unwrap()
    }

    pub fn is_maybe_pending(&self, timestamp: i64) -> bool {
        self.lock
            .read(None, || !unsafe { &*self.aborted.get() }.contains_key(&timestamp))
            .unwrap()
    }

    pub fn load(&mut self, db_root: &Path) -> StorageResult<()> {
        let path = db_root.join(crate::config::TRACKER_FILE);
        if !path.exists() {
            return Ok(());
        }
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        *self.aborted.get_mut() = serde_from_reader(reader)?;
        Ok(())
    }

    pub fn save(&self, db_root: &Path) -> StorageResult<()> {
        self.lock
            .read(None, || {
                let aborted = unsafe { &*self.aborted.get() };
                let tmp_path = db_root.join(format!("{}.tmp", crate::config::TRACKER_FILE));
                let final_path = db_root.join(crate::config::TRACKER_FILE);
                {
                    let file = File::create(&tmp_path)?;
                    let writer = BufWriter::new(file);
                    serde_to_writer(writer, aborted)?;
                }
                std::fs::rename(tmp_path, final_path)?;
                Ok(())
            })
            .unwrap()
    }
}

/// Minimal length-prefixed binary encoding: one `(i64, u8)` pair per entry.
/// No external serialization crate is in the teacher's or pack's dependency
/// set for a map this small, so this sidecar format stays in-house
/// (mirroring the WAL's own hand-rolled binary framing, §4.8).
fn serde_to_writer(mut writer: impl std::io::Write, map: &HashMap<i64, bool>) -> StorageResult<()> {
    writer.write_all(&(map.len() as u64).to_le_bytes())?;
    for (&timestamp, &aborted) in map {
        writer.write_all(&timestamp.to_le_bytes())?;
        writer.write_all(&[aborted as u8])?;
    }
    Ok(())
}

fn serde_from_reader(mut reader: impl std::io::Read) -> StorageResult<HashMap<i64, bool>> {
    let mut len_buf = [0u8; 8];
    reader.read_exact(&mut len_buf)?;
    let len = u64::from_le_bytes(len_buf) as usize;
    let mut map = HashMap::with_capacity(len);
    for _ in 0..len {
        let mut ts_buf = [0u8; 8];
        reader.read_exact(&mut ts_buf)?;
        let mut flag_buf = [0u8; 1];
        reader.read_exact(&mut flag_buf)?;
        map.insert(i64::from_le_bytes(ts_buf), flag_buf[0] != 0);
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn pending_until_resolved() {
        let tracker = TransactionTracker::new();
        assert!(tracker.is_maybe_pending(42));
        tracker.mark_committed(42).unwrap();
        assert!(tracker.is_committed(42));
        assert!(!tracker.is_aborted(42));
        assert!(!tracker.is_maybe_pending(42));
    }

    #[test]
    fn double_resolution_is_rejected() {
        let tracker = TransactionTracker::new();
        tracker.mark_aborted(1).unwrap();
        assert!(tracker.mark_committed(1).is_err());
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempdir().unwrap();
        let mut tracker = TransactionTracker::new();
        tracker.mark_aborted(7).unwrap();
        tracker.mark_committed(8).unwrap();
        tracker.save(dir.path()).unwrap();

        let mut reloaded = TransactionTracker::new();
        reloaded.load(dir.path()).unwrap();
        assert!(reloaded.is_aborted(7));
        assert!(reloaded.is_committed(8));
    }
}

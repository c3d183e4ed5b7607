//! Page directory (§4.5): tracks every physical page and base record
//! location for one table.
//!
//! Grounded on `examples/original_source/lstore/pagedir.py`. The Python
//! source persists its dictionaries as ten separate pickle sidecars plus a
//! `values.txt`; per the Design Note on page directory persistence, this
//! crate instead writes one structured snapshot file under a
//! temp-then-rename, in the same spirit as the WAL's own binary framing
//! (§4.8) rather than pulling in a serialization crate the teacher/pack
//! never reaches for at this layer.

use std::cell::UnsafeCell;
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use bit_vec::BitVec;

use crate::config::{Config, NUM_META_COLS};
use crate::error::{StorageError, StorageResult};
use crate::page::{columns_of, PageId, PageLocation};

struct PageDirInner {
    unused_tp_idx: u64,
    unused_bp_idx: u64,
    /// Conceptual tail pages that became stable (every base and tail record
    /// in them resolved) and are ready to merge, oldest first.
    merge_queue: Vec<PageId>,
    /// page-range index -> last conceptual base page index allocated in it.
    range_last_bp: HashMap<u64, u64>,
    /// conceptual base page index -> its current conceptual tail page, if any.
    con_bp_last_con_tp: HashMap<u64, Option<u64>>,
    /// conceptual tail page index -> owning conceptual base page index.
    con_tp_owner: HashMap<u64, u64>,
    con_bp_num_resolved: HashMap<u64, usize>,
    con_tp_num_resolved: HashMap<u64, usize>,
    /// RID (base or tail) -> writable locations for every raw column.
    offsets: HashMap<i64, Vec<PageLocation>>,
    unused_base_rid: i64,
    unused_tail_rid: i64,
    num_records: HashMap<PageId, usize>,
    con_bp_num_records: HashMap<u64, usize>,
    con_tp_num_records: HashMap<u64, usize>,
    /// base_rid -> tail-page-sequence watermark: tail RIDs `>=` this value
    /// have not yet been folded into the base page by a merge (§C.1).
    tps: HashMap<i64, i64>,
}

/// Tracks all pages and base record locations for one table.
pub struct PageDirectory {
    table_name: String,
    num_columns: usize,
    num_raw_cols: usize,
    config: Config,
    con_page_max_recs: usize,
    lock: crate::rwlock::WritePreferringRwLock,
    inner: UnsafeCell<PageDirInner>,
}

// SAFETY: every access to `inner` happens inside a closure holding `lock`'s
// read or write side (§4.1), mirroring the Python source's RWLock-guarded
// plain dicts.
unsafe impl Sync for PageDirectory {}

use crate::rwlock::ReadersWriterLock;

impl PageDirectory {
    pub fn new(table_name: impl Into<String>, num_columns: usize, config: Config) -> Self {
        let con_page_max_recs = config.con_page_max_recs(num_columns);
        PageDirectory {
            table_name: table_name.into(),
            num_columns,
            num_raw_cols: num_columns + NUM_META_COLS,
            config,
            con_page_max_recs,
            lock: crate::rwlock::WritePreferringRwLock::new(),
            inner: UnsafeCell::new(PageDirInner {
                unused_tp_idx: 0,
                unused_bp_idx: 0,
                merge_queue: Vec::new(),
                range_last_bp: HashMap::new(),
                con_bp_last_con_tp: HashMap::new(),
                con_tp_owner: HashMap::new(),
                con_bp_num_resolved: HashMap::new(),
                con_tp_num_resolved: HashMap::new(),
                offsets: HashMap::new(),
                unused_base_rid: config.base_rid_begin,
                unused_tail_rid: config.tail_rid_begin,
                num_records: HashMap::new(),
                con_bp_num_records: HashMap::new(),
                con_tp_num_records: HashMap::new(),
                tps: HashMap::new(),
            }),
        }
    }

    fn read<R>(&self, f: impl FnOnce(&PageDirInner) -> R) -> R {
        self.lock.read(None, || f(unsafe { &*self.inner.get() })).unwrap()
    }

    fn write<R>(&self, f: impl FnOnce(&mut PageDirInner) -> R) -> R {
        self.lock.write(None, || f(unsafe { &mut *self.inner.get() })).unwrap()
    }

    pub fn con_page_max_recs(&self) -> usize {
        self.con_page_max_recs
    }

    pub fn clear_merge_queue(&self) -> Vec<PageId> {
        self.write(|s| std::mem::take(&mut s.merge_queue))
    }

    /// Mark RIDs resolved (committed or aborted) and advance stable
    /// conceptual tail pages into the merge queue (§4.7).
    pub fn notify_resolve(&self, affected_rids: &[i64]) {
        self.write(|s| {
            for &rid in affected_rids {
                Self::mark_resolved(s, self.con_page_max_recs, rid);
            }
        })
    }

    fn mark_resolved(s: &mut PageDirInner, con_page_max_recs: usize, rid: i64) {
        let Some(locations) = s.offsets.get(&rid) else { return };
        let page_id = locations[0].id();
        if page_id.is_base {
            *s.con_bp_num_resolved.entry(page_id.page_index).or_insert(0) += 1;
            return;
        }
        let tp_idx = page_id.page_index;
        *s.con_tp_num_resolved.entry(tp_idx).or_insert(0) += 1;
        let Some(&bp_idx) = s.con_tp_owner.get(&tp_idx) else { return };
        if s.con_bp_num_resolved.get(&bp_idx).copied().unwrap_or(0) != con_page_max_recs {
            return;
        }
        if s.con_tp_num_resolved.get(&tp_idx).copied().unwrap_or(0) != con_page_max_recs {
            return;
        }
        s.merge_queue.push(page_id);
    }

    pub fn has_capacity(&self, page_id: &PageId) -> bool {
        self.read(|s| Self::has_capacity_locked(s, self.con_page_max_recs, page_id))
    }

    fn has_capacity_locked(s: &PageDirInner, con_page_max_recs: usize, page_id: &PageId) -> bool {
        if page_id.is_base {
            s.con_bp_num_records.get(&page_id.page_index).copied().unwrap_or(0) < con_page_max_recs
        } else {
            s.con_tp_num_records.get(&page_id.page_index).copied().unwrap_or(0) < con_page_max_recs
        }
    }

    pub fn set_num_records(&self, page_id: &PageId, value: usize) {
        self.write(|s| Self::set_num_records_locked(s, page_id, value))
    }

    fn set_num_records_locked(s: &mut PageDirInner, page_id: &PageId, value: usize) {
        s.num_records.insert(page_id.clone(), value);
        if page_id.is_base {
            let entry = s.con_bp_num_records.entry(page_id.page_index).or_insert(0);
            *entry = (*entry).max(value);
        } else {
            let entry = s.con_tp_num_records.entry(page_id.page_index).or_insert(0);
            *entry = (*entry).max(value);
        }
    }

    pub fn get_num_records(&self, page_id: &PageId) -> usize {
        self.read(|s| s.num_records.get(page_id).copied().unwrap_or(0))
    }

    pub fn is_base_rid(&self, rid: i64) -> bool {
        self.read(|s| s.unused_base_rid > rid && rid >= self.config.base_rid_begin)
    }

    /// Returns `(tps, offsets)` for `base_rid`'s raw columns (metadata
    /// included). `tps` is `None` until the first merge folds a tail page
    /// into this base record (§C.1): no tail RID is ever folded yet, so the
    /// version walker must not treat any of them as already merged.
    pub fn get_base_record_location(&self, base_rid: i64) -> StorageResult<(Option<i64>, Vec<PageLocation>)> {
        self.read(|s| {
            if !(self.config.base_rid_begin <= base_rid && base_rid < s.unused_base_rid) {
                return Err(StorageError::Validation(format!("invalid base RID {}", base_rid)));
            }
            let tps = s.tps.get(&base_rid).copied();
            let offsets = s
                .offsets
                .get(&base_rid)
                .cloned()
                .ok_or_else(|| StorageError::Invariant(format!("no offsets for base RID {}", base_rid)))?;
            Ok((tps, offsets))
        })
    }

    pub fn get_tail_record_location(&self, tail_rid: i64) -> StorageResult<Vec<PageLocation>> {
        self.read(|s| {
            if !(s.unused_tail_rid < tail_rid && tail_rid <= self.config.tail_rid_begin) {
                return Err(StorageError::Validation(format!("invalid tail RID {}", tail_rid)));
            }
            s.offsets
                .get(&tail_rid)
                .cloned()
                .ok_or_else(|| StorageError::Invariant(format!("no offsets for tail RID {}", tail_rid)))
        })
    }

    /// TPS watermark for `base_rid` (§C.1): tail RIDs `>=` this value have
    /// already been folded into the base page and must not be walked.
    /// `None` means no merge has touched this record yet, so nothing is
    /// folded and every tail RID is still walkable.
    pub fn tps(&self, base_rid: i64) -> Option<i64> {
        self.read(|s| s.tps.get(&base_rid).copied())
    }

    pub fn notify_merge(&self, base_rid: i64, offsets: Vec<PageLocation>, tps: i64) {
        self.write(|s| {
            let existing = s
                .offsets
                .get_mut(&base_rid)
                .expect("base record offsets must exist before a merge notifies it");
            for (i, loc) in offsets.into_iter().enumerate() {
                existing[NUM_META_COLS + i] = loc;
            }
            s.tps.insert(base_rid, tps);
        })
    }

    /// Allocate a new base RID and writable locations for every raw column.
    pub fn alloc_base_rid(&self) -> (i64, Vec<PageLocation>) {
        self.write(|s| {
            let rid = s.unused_base_rid;
            s.unused_base_rid += 1;
            let base_rec_idx = (rid - self.config.base_rid_begin) as u64;
            let range_id = base_rec_idx / self.con_page_max_recs as u64;
            Self::ensure_range_exists(s, range_id);
            let bp_idx = Self::get_range_bp_idx(s, self.con_page_max_recs, range_id);
            let offsets = Self::alloc_bp_space(s, &self.table_name, self.num_raw_cols, bp_idx);
            s.offsets.insert(rid, offsets.clone());
            (rid, offsets)
        })
    }

    fn ensure_range_exists(s: &mut PageDirInner, range_id: u64) {
        s.range_last_bp.entry(range_id).or_insert_with(|| {
            let idx = s.unused_bp_idx;
            s.unused_bp_idx += 1;
            idx
        });
        s.con_bp_last_con_tp.entry(range_id).or_insert(None);
    }

    fn get_range_bp_idx(s: &mut PageDirInner, con_page_max_recs: usize, range_id: u64) -> u64 {
        let bp_idx = s.range_last_bp[&range_id];
        if s.con_bp_num_records.get(&bp_idx).copied().unwrap_or(0) < con_page_max_recs {
            bp_idx
        } else {
            let new_idx = s.unused_bp_idx;
            s.unused_bp_idx += 1;
            s.range_last_bp.insert(range_id, new_idx);
            new_idx
        }
    }

    fn alloc_bp_space(s: &mut PageDirInner, table_name: &str, num_raw_cols: usize, bp_idx: u64) -> Vec<PageLocation> {
        let start = PageId::new(table_name, 0, true, bp_idx);
        columns_of(&start, num_raw_cols)
            .map(|col| {
                let n = s.num_records.get(&col).copied().unwrap_or(0);
                Self::set_num_records_locked(s, &col, n + 1);
                PageLocation::from_id(&col, n)
            })
            .collect()
    }

    /// Allocate data-column-only locations for merging a base page.
    pub fn alloc_merge_locations(&self) -> Vec<PageLocation> {
        self.write(|s| {
            let bp_idx = s.unused_bp_idx;
            s.unused_bp_idx += 1;
            let start = PageId::new(&self.table_name, 0, true, bp_idx);
            columns_of(&start, self.num_raw_cols)
                .filter_map(|col| {
                    Self::set_num_records_locked(s, &col, self.con_page_max_recs);
                    if col.raw_column_index < NUM_META_COLS {
                        None
                    } else {
                        Some(PageLocation::from_id(&col, 0))
                    }
                })
                .collect()
        })
    }

    /// Allocate a new tail RID and writable locations for the columns
    /// flagged in `schema_encoding` (plus all metadata columns). Returns
    /// `(rid, offsets, should_trigger_merge)`: the caller (`Table`) decides
    /// whether to kick off the background merge worker, keeping this type
    /// decoupled from table/merge scheduling (§C.4).
    pub fn alloc_tail_rid(&self, base_rid: i64, schema_encoding: &BitVec) -> (i64, Vec<PageLocation>, bool) {
        self.write(|s| {
            let rid = s.unused_tail_rid;
            let should_merge = rid % self.config.merge_interval == self.config.merge_interval - 1;
            s.unused_tail_rid -= 1;

            let base_rec_idx = (base_rid - self.config.base_rid_begin) as u64;
            let range_id = base_rec_idx / self.con_page_max_recs as u64;
            Self::ensure_range_exists(s, range_id);

            let bp_idx = s.offsets[&base_rid][0].page_index;
            let tp_idx = Self::get_tp_idx(s, self.con_page_max_recs, bp_idx);
            let offsets = Self::alloc_tp_space(s, &self.table_name, self.num_raw_cols, tp_idx, schema_encoding);
            s.offsets.insert(rid, offsets.clone());
            (rid, offsets, should_merge)
        })
    }

    fn get_tp_idx(s: &mut PageDirInner, con_page_max_recs: usize, bp_idx: u64) -> u64 {
        if let Some(Some(tp_idx)) = s.con_bp_last_con_tp.get(&bp_idx) {
            if s.con_tp_num_records.get(tp_idx).copied().unwrap_or(0) < con_page_max_recs {
                return *tp_idx;
            }
        }
        let tp_idx = s.unused_tp_idx;
        s.unused_tp_idx += 1;
        s.con_bp_last_con_tp.insert(bp_idx, Some(tp_idx));
        s.con_tp_owner.insert(tp_idx, bp_idx);
        tp_idx
    }

    fn alloc_tp_space(
        s: &mut PageDirInner,
        table_name: &str,
        num_raw_cols: usize,
        tp_idx: u64,
        schema_encoding: &BitVec,
    ) -> Vec<PageLocation> {
        let start = PageId::new(table_name, 0, false, tp_idx);
        columns_of(&start, num_raw_cols)
            .filter_map(|col| {
                let col_idx = col.raw_column_index;
                if col_idx >= NUM_META_COLS && !schema_encoding.get(col_idx - NUM_META_COLS).unwrap_or(false) {
                    return None;
                }
                let n = s.num_records.get(&col).copied().unwrap_or(0);
                Self::set_num_records_locked(s, &col, n + 1);
                Some(PageLocation::from_id(&col, n))
            })
            .collect()
    }

    pub fn base_rids(&self) -> Vec<i64> {
        self.read(|s| (self.config.base_rid_begin..s.unused_base_rid).collect())
    }

    fn snapshot_path(db_root: &Path, table_name: &str) -> std::path::PathBuf {
        db_root.join(table_name).join("pagedir.snapshot")
    }

    pub fn load(&mut self, db_root: &Path) -> StorageResult<()> {
        let path = Self::snapshot_path(db_root, &self.table_name);
        if !path.exists() {
            return Ok(());
        }
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);
        let s = self.inner.get_mut();
        s.unused_tp_idx = read_u64(&mut reader)?;
        s.unused_bp_idx = read_u64(&mut reader)?;
        s.unused_base_rid = read_i64(&mut reader)?;
        s.unused_tail_rid = read_i64(&mut reader)?;
        s.merge_queue = read_vec(&mut reader, read_page_id)?;
        s.range_last_bp = read_map_u64_u64(&mut reader)?;
        s.con_tp_owner = read_map_u64_u64(&mut reader)?;
        s.con_bp_last_con_tp = read_map_u64_opt_u64(&mut reader)?;
        s.con_bp_num_resolved = read_map_u64_usize(&mut reader)?;
        s.con_tp_num_resolved = read_map_u64_usize(&mut reader)?;
        s.con_bp_num_records = read_map_u64_usize(&mut reader)?;
        s.con_tp_num_records = read_map_u64_usize(&mut reader)?;
        s.tps = read_map_i64_i64(&mut reader)?;
        let num_offsets = read_u64(&mut reader)?;
        s.offsets = HashMap::with_capacity(num_offsets as usize);
        for _ in 0..num_offsets {
            let rid = read_i64(&mut reader)?;
            let locations = read_vec(&mut reader, read_page_location)?;
            s.offsets.insert(rid, locations);
        }
        let num_records = read_u64(&mut reader)?;
        s.num_records = HashMap::with_capacity(num_records as usize);
        for _ in 0..num_records {
            let page_id = read_page_id(&mut reader)?;
            let count = read_u64(&mut reader)? as usize;
            s.num_records.insert(page_id, count);
        }
        Ok(())
    }

    pub fn save(&self, db_root: &Path) -> StorageResult<()> {
        self.read(|s| {
            let final_path = Self::snapshot_path(db_root, &self.table_name);
            let tmp_path = final_path.with_extension("snapshot.tmp");
            if let Some(parent) = final_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            {
                let file = File::create(&tmp_path)?;
                let mut writer = BufWriter::new(file);
                write_u64(&mut writer, s.unused_tp_idx)?;
                write_u64(&mut writer, s.unused_bp_idx)?;
                write_i64(&mut writer, s.unused_base_rid)?;
                write_i64(&mut writer, s.unused_tail_rid)?;
                write_vec(&mut writer, &s.merge_queue, write_page_id)?;
                write_map_u64_u64(&mut writer, &s.range_last_bp)?;
                write_map_u64_u64(&mut writer, &s.con_tp_owner)?;
                write_map_u64_opt_u64(&mut writer, &s.con_bp_last_con_tp)?;
                write_map_u64_usize(&mut writer, &s.con_bp_num_resolved)?;
                write_map_u64_usize(&mut writer, &s.con_tp_num_resolved)?;
                write_map_u64_usize(&mut writer, &s.con_bp_num_records)?;
                write_map_u64_usize(&mut writer, &s.con_tp_num_records)?;
                write_map_i64_i64(&mut writer, &s.tps)?;
                write_u64(&mut writer, s.offsets.len() as u64)?;
                for (rid, locations) in &s.offsets {
                    write_i64(&mut writer, *rid)?;
                    write_vec(&mut writer, locations, write_page_location)?;
                }
                write_u64(&mut writer, s.num_records.len() as u64)?;
                for (page_id, count) in &s.num_records {
                    write_page_id(&mut writer, page_id)?;
                    write_u64(&mut writer, *count as u64)?;
                }
                writer.flush()?;
            }
            std::fs::rename(&tmp_path, &final_path)?;
            Ok(())
        })
    }
}

fn write_u64(w: &mut impl Write, v: u64) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}
fn read_u64(r: &mut impl Read) -> io::Result<u64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}
fn write_i64(w: &mut impl Write, v: i64) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}
fn read_i64(r: &mut impl Read) -> io::Result<i64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(i64::from_le_bytes(buf))
}
fn write_string(w: &mut impl Write, s: &str) -> io::Result<()> {
    write_u64(w, s.len() as u64)?;
    w.write_all(s.as_bytes())
}
fn read_string(r: &mut impl Read) -> io::Result<String> {
    let len = read_u64(r)? as usize;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    String::from_utf8(buf).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}
fn write_page_id(w: &mut impl Write, id: &PageId) -> io::Result<()> {
    write_string(w, &id.table_name)?;
    write_u64(w, id.raw_column_index as u64)?;
    w.write_all(&[id.is_base as u8])?;
    write_u64(w, id.page_index)
}
fn read_page_id(r: &mut impl Read) -> io::Result<PageId> {
    let table_name = read_string(r)?;
    let raw_column_index = read_u64(r)? as usize;
    let mut flag = [0u8; 1];
    r.read_exact(&mut flag)?;
    let page_index = read_u64(r)?;
    Ok(PageId::new(table_name, raw_column_index, flag[0] != 0, page_index))
}
fn write_page_location(w: &mut impl Write, loc: &PageLocation) -> io::Result<()> {
    write_page_id(w, &loc.id())?;
    write_u64(w, loc.offset as u64)
}
fn read_page_location(r: &mut impl Read) -> io::Result<PageLocation> {
    let id = read_page_id(r)?;
    let offset = read_u64(r)? as usize;
    Ok(PageLocation::from_id(&id, offset))
}
fn write_vec<W: Write, T>(w: &mut W, items: &[T], f: impl Fn(&mut W, &T) -> io::Result<()>) -> io::Result<()> {
    write_u64(w, items.len() as u64)?;
    for item in items {
        f(w, item)?;
    }
    Ok(())
}
fn read_vec<R: Read, T>(r: &mut R, f: impl Fn(&mut R) -> io::Result<T>) -> io::Result<Vec<T>> {
    let len = read_u64(r)? as usize;
    (0..len).map(|_| f(r)).collect()
}
fn write_map_u64_u64(w: &mut impl Write, map: &HashMap<u64, u64>) -> io::Result<()> {
    write_u64(w, map.len() as u64)?;
    for (&k, &v) in map {
        write_u64(w, k)?;
        write_u64(w, v)?;
    }
    Ok(())
}
fn read_map_u64_u64(r: &mut impl Read) -> io::Result<HashMap<u64, u64>> {
    let len = read_u64(r)? as usize;
    let mut map = HashMap::with_capacity(len);
    for _ in 0..len {
        map.insert(read_u64(r)?, read_u64(r)?);
    }
    Ok(map)
}
fn write_map_u64_usize(w: &mut impl Write, map: &HashMap<u64, usize>) -> io::Result<()> {
    write_u64(w, map.len() as u64)?;
    for (&k, &v) in map {
        write_u64(w, k)?;
        write_u64(w, v as u64)?;
    }
    Ok(())
}
fn read_map_u64_usize(r: &mut impl Read) -> io::Result<HashMap<u64, usize>> {
    let len = read_u64(r)? as usize;
    let mut map = HashMap::with_capacity(len);
    for _ in 0..len {
        map.insert(read_u64(r)?, read_u64(r)? as usize);
    }
    Ok(map)
}
fn write_map_i64_i64(w: &mut impl Write, map: &HashMap<i64, i64>) -> io::Result<()> {
    write_u64(w, map.len() as u64)?;
    for (&k, &v) in map {
        write_i64(w, k)?;
        write_i64(w, v)?;
    }
    Ok(())
}
fn read_map_i64_i64(r: &mut impl Read) -> io::Result<HashMap<i64, i64>> {
    let len = read_u64(r)? as usize;
    let mut map = HashMap::with_capacity(len);
    for _ in 0..len {
        map.insert(read_i64(r)?, read_i64(r)?);
    }
    Ok(map)
}
fn write_map_u64_opt_u64(w: &mut impl Write, map: &HashMap<u64, Option<u64>>) -> io::Result<()> {
    write_u64(w, map.len() as u64)?;
    for (&k, v) in map {
        write_u64(w, k)?;
        match v {
            Some(v) => {
                w.write_all(&[1])?;
                write_u64(w, *v)?;
            }
            None => w.write_all(&[0])?,
        }
    }
    Ok(())
}
fn read_map_u64_opt_u64(r: &mut impl Read) -> io::Result<HashMap<u64, Option<u64>>> {
    let len = read_u64(r)? as usize;
    let mut map = HashMap::with_capacity(len);
    for _ in 0..len {
        let k = read_u64(r)?;
        let mut flag = [0u8; 1];
        r.read_exact(&mut flag)?;
        let v = if flag[0] != 0 { Some(read_u64(r)?) } else { None };
        map.insert(k, v);
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bit_vec::BitVec;
    use tempfile::tempdir;

    #[test]
    fn alloc_base_rid_assigns_ascending_ids() {
        let pd = PageDirectory::new("t", 2, Config::default());
        let (rid1, offsets1) = pd.alloc_base_rid();
        let (rid2, _) = pd.alloc_base_rid();
        assert_eq!(rid1, Config::default().base_rid_begin);
        assert_eq!(rid2, rid1 + 1);
        assert_eq!(offsets1.len(), 2 + NUM_META_COLS);
    }

    #[test]
    fn alloc_tail_rid_descends_from_tail_rid_begin() {
        let pd = PageDirectory::new("t", 2, Config::default());
        let (base_rid, _) = pd.alloc_base_rid();
        let schema = BitVec::from_elem(2, true);
        let (tid1, _, _) = pd.alloc_tail_rid(base_rid, &schema);
        let (tid2, _, _) = pd.alloc_tail_rid(base_rid, &schema);
        assert_eq!(tid1, Config::default().tail_rid_begin);
        assert_eq!(tid2, tid1 - 1);
    }

    #[test]
    fn save_and_load_round_trip_preserves_allocator_state() {
        let dir = tempdir().unwrap();
        let mut pd = PageDirectory::new("t", 2, Config::default());
        let (base_rid, _) = pd.alloc_base_rid();
        let schema = BitVec::from_elem(2, true);
        pd.alloc_tail_rid(base_rid, &schema);
        pd.save(dir.path()).unwrap();

        let mut reloaded = PageDirectory::new("t", 2, Config::default());
        reloaded.load(dir.path()).unwrap();
        let (next_base, _) = reloaded.alloc_base_rid();
        assert_eq!(next_base, base_rid + 1);
    }
}

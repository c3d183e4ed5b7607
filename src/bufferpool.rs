//! Frame cache with LRU eviction (§4.4).
//!
//! A `Bufferpool` caches fixed-size pages in memory, handing out `Arc<Frame>`
//! handles pinned against concurrent eviction. Each frame carries its own
//! reader-writer lock (§4.1) so that unrelated pages never contend; the
//! bufferpool's own mutex only ever guards the frame table, the pin counts,
//! and the dirty set, never page contents.
//!
//! Grounded on `examples/original_source/lstore/bufferpool.py`'s
//! `Frame`/`Bufferpool` (`OrderedDict.move_to_end`/iteration order as LRU).
//! The ordered map itself is `linked_hash_map::LinkedHashMap`, the same
//! crate `examples/LKLLLLLLLLLL-rsql/src/storage/storage/cache.rs` reaches
//! for to build an LRU cache.

use std::cell::UnsafeCell;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use linked_hash_map::LinkedHashMap;

use crate::config::Config;
use crate::error::{StorageError, StorageResult};
use crate::filesystem::{read_pages, write_page};
use crate::page::{page_range, PageId};
use crate::rwlock::{LockTimeout, ReadPreferringRwLock, ReadersWriterLock, WritePreferringRwLock};

/// One resident page. Access is mediated entirely by `lock`; `data` is only
/// ever touched from inside `read`/`write`, or from the bufferpool's
/// eviction path after it has confirmed the frame's pin count is zero.
pub struct Frame {
    page_id: PageId,
    lock: Box<dyn ReadersWriterLock + Send + Sync>,
    data: UnsafeCell<Vec<u8>>,
}

// SAFETY: every access to `data` is made while holding either the read or
// write side of `lock`, which the bufferpool never bypasses.
unsafe impl Sync for Frame {}

impl Frame {
    fn new(page_id: PageId, data: Vec<u8>, prefer_read: bool) -> Self {
        let lock: Box<dyn ReadersWriterLock + Send + Sync> = if prefer_read {
            Box::new(ReadPreferringRwLock::new())
        } else {
            Box::new(WritePreferringRwLock::new())
        };
        Frame {
            page_id,
            lock,
            data: UnsafeCell::new(data),
        }
    }

    pub fn page_id(&self) -> &PageId {
        &self.page_id
    }

    /// Acquire the frame's read lock and run `f` over the page contents.
    /// Returns `None` if acquisition timed out.
    pub fn read<R>(&self, timeout: LockTimeout, f: impl FnOnce(&[u8]) -> R) -> Option<R> {
        if !self.lock.acquire_read(timeout) {
            return None;
        }
        let result = f(unsafe { &*self.data.get() });
        self.lock.release_read();
        Some(result)
    }

    /// Acquire the frame's write lock and run `f` over the page contents.
    pub fn write<R>(&self, timeout: LockTimeout, f: impl FnOnce(&mut [u8]) -> R) -> Option<R> {
        if !self.lock.acquire_write(timeout) {
            return None;
        }
        let result = f(unsafe { &mut *self.data.get() });
        self.lock.release_write();
        Some(result)
    }
}

struct BufferpoolInner {
    frames: LinkedHashMap<PageId, Arc<Frame>>,
    dirty: HashSet<PageId>,
    pins: HashMap<PageId, usize>,
}

/// Page buffer management using an LRU eviction policy (§4.4).
pub struct Bufferpool {
    db_root: PathBuf,
    config: Config,
    inner: Mutex<BufferpoolInner>,
    cond: Condvar,
}

impl Bufferpool {
    pub fn new(db_root: impl Into<PathBuf>, config: Config) -> Self {
        Bufferpool {
            db_root: db_root.into(),
            config,
            inner: Mutex::new(BufferpoolInner {
                frames: LinkedHashMap::new(),
                dirty: HashSet::new(),
                pins: HashMap::new(),
            }),
            cond: Condvar::new(),
        }
    }

    fn lock_timeout(&self) -> LockTimeout {
        self.config.bufferpool_lock_timeout_ms.map(Duration::from_millis)
    }

    /// Pin the frame for `page_id`, fetching it from disk (evicting the LRU
    /// victim if the pool is full) if it isn't already resident.
    pub fn pin(&self, page_id: &PageId) -> StorageResult<Arc<Frame>> {
        let mut guard = self.inner.lock().unwrap();
        if let Some(frame) = guard.frames.get_refresh(page_id) {
            let frame = Arc::clone(frame);
            *guard.pins.entry(page_id.clone()).or_insert(0) += 1;
            return Ok(frame);
        }
        while guard.frames.len() >= self.config.bufferpool_max_frames {
            guard = self.evict_lru(guard)?;
        }
        self.fetch_locked(&mut guard, page_id, 1)?;
        let frame = guard
            .frames
            .get_refresh(page_id)
            .map(|f| Arc::clone(f))
            .ok_or_else(|| StorageError::Invariant(format!("page not resident after fetch: {}", page_id)))?;
        guard.pins.insert(page_id.clone(), 1);
        Ok(frame)
    }

    /// Unpin a previously pinned frame.
    pub fn unpin(&self, page_id: &PageId) {
        let mut guard = self.inner.lock().unwrap();
        let pin_count = guard.pins.get(page_id).copied().unwrap_or(0);
        let new_count = pin_count.saturating_sub(1);
        guard.pins.insert(page_id.clone(), new_count);
        if new_count == 0 {
            self.cond.notify_all();
        }
    }

    /// Fetch up to `count` pages starting at `start` into the pool without
    /// pinning them. `count` is clipped to leave headroom for unrelated
    /// pins, per §4.4: `max(min(free_slots - 10, count), 1)`.
    pub fn fetch(&self, start: &PageId, count: u64) -> StorageResult<()> {
        let mut guard = self.inner.lock().unwrap();
        self.fetch_locked(&mut guard, start, count)
    }

    fn fetch_locked(&self, guard: &mut BufferpoolInner, start: &PageId, count: u64) -> StorageResult<()> {
        if count == 0 || guard.frames.len() >= self.config.bufferpool_max_frames {
            return Ok(());
        }
        let free_slots = self.config.bufferpool_max_frames - guard.frames.len();
        let clipped = (free_slots.saturating_sub(10)).max(1).min(count as usize) as u64;
        let ids: Vec<PageId> = page_range(start, clipped).collect();
        if ids.iter().all(|id| guard.frames.contains_key(id)) {
            return Ok(());
        }
        let mut pages = read_pages(&self.db_root, start, clipped, self.config.page_size)?;
        if pages.is_empty() {
            pages.push(vec![0u8; self.config.page_size]);
        }
        for (id, data) in ids.into_iter().zip(pages.into_iter()) {
            if guard.frames.contains_key(&id) {
                continue;
            }
            let frame = Arc::new(Frame::new(id.clone(), data, self.config.bufferpool_prefer_read));
            guard.frames.insert(id, frame);
        }
        Ok(())
    }

    pub fn mark_dirty(&self, page_id: &PageId) {
        let mut guard = self.inner.lock().unwrap();
        guard.dirty.insert(page_id.clone());
    }

    pub fn has_capacity(&self) -> bool {
        let guard = self.inner.lock().unwrap();
        guard.frames.len() < self.config.bufferpool_max_frames
    }

    /// Pin, read, and unpin a frame in one call.
    pub fn with_read<R>(&self, page_id: &PageId, f: impl FnOnce(&[u8]) -> R) -> StorageResult<R> {
        let frame = self.pin(page_id)?;
        let result = frame.read(self.lock_timeout(), f);
        self.unpin(page_id);
        result.ok_or_else(|| StorageError::LockTimeout(page_id.to_string()))
    }

    /// Pin, modify, mark dirty, and unpin a frame in one call.
    pub fn with_write<R>(&self, page_id: &PageId, f: impl FnOnce(&mut [u8]) -> R) -> StorageResult<R> {
        let frame = self.pin(page_id)?;
        self.mark_dirty(page_id);
        let result = frame.write(self.lock_timeout(), f);
        self.unpin(page_id);
        result.ok_or_else(|| StorageError::LockTimeout(page_id.to_string()))
    }

    /// Evict the least-recently-used frame, blocking until its pin count
    /// drops to zero. Fatal (§7: "indicates a pin leak") if that doesn't
    /// happen within `bufferpool_evict_timeout_secs`.
    fn evict_lru<'a>(&'a self, guard: MutexGuard<'a, BufferpoolInner>) -> StorageResult<MutexGuard<'a, BufferpoolInner>> {
        let lru_id = guard
            .frames
            .iter()
            .next()
            .map(|(id, _)| id.clone())
            .ok_or_else(|| StorageError::Invariant("evict requested on an empty bufferpool".to_string()))?;
        let deadline = Instant::now() + Duration::from_secs(self.config.bufferpool_evict_timeout_secs);
        let mut guard = guard;
        loop {
            let pinned = guard.pins.get(&lru_id).copied().unwrap_or(0) != 0;
            if !pinned {
                break;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(StorageError::EvictionTimeout(lru_id.to_string()));
            }
            let (g, timeout_result) = self.cond.wait_timeout(guard, remaining).unwrap();
            guard = g;
            if timeout_result.timed_out() && guard.pins.get(&lru_id).copied().unwrap_or(0) != 0 {
                return Err(StorageError::EvictionTimeout(lru_id.to_string()));
            }
        }
        self.flush_and_evict(&mut guard, &lru_id)?;
        Ok(guard)
    }

    /// Evict a specific page. Errors if it's still pinned.
    pub fn evict_page(&self, page_id: &PageId) -> StorageResult<()> {
        let mut guard = self.inner.lock().unwrap();
        self.flush_and_evict(&mut guard, page_id)
    }

    fn flush_and_evict(&self, guard: &mut BufferpoolInner, page_id: &PageId) -> StorageResult<()> {
        if guard.pins.get(page_id).copied().unwrap_or(0) != 0 {
            return Err(StorageError::Invariant(format!("pinned page cannot be evicted: {}", page_id)));
        }
        if guard.dirty.remove(page_id) {
            let frame = guard
                .frames
                .get(page_id)
                .cloned()
                .ok_or_else(|| StorageError::Invariant(format!("dirty page missing from pool: {}", page_id)))?;
            let snapshot = frame
                .read(None, |buf| buf.to_vec())
                .ok_or_else(|| StorageError::LockTimeout(page_id.to_string()))?;
            write_page(&self.db_root, page_id, &snapshot, self.config.page_size)?;
        }
        guard.frames.remove(page_id);
        guard.pins.remove(page_id);
        Ok(())
    }

    /// Flush every page dirty as of this call, waiting for pinned ones to
    /// unpin, then evicting them.
    pub fn checkpoint(&self) -> StorageResult<()> {
        let mut guard = self.inner.lock().unwrap();
        let dirty: Vec<PageId> = guard.dirty.iter().cloned().collect();
        for page_id in dirty {
            if !guard.dirty.contains(&page_id) {
                continue;
            }
            loop {
                let pinned = guard.pins.get(&page_id).copied().unwrap_or(0) != 0;
                if !pinned {
                    break;
                }
                guard = self.cond.wait(guard).unwrap();
            }
            self.flush_and_evict(&mut guard, &page_id)?;
        }
        Ok(())
    }

    /// Evict every resident frame. Used when closing the database.
    pub fn close(&self) -> StorageResult<()> {
        let mut guard = self.inner.lock().unwrap();
        while !guard.frames.is_empty() {
            guard = self.evict_lru(guard)?;
        }
        Ok(())
    }

    pub fn db_root(&self) -> &Path {
        &self.db_root
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn setup() -> (tempfile::TempDir, Config) {
        let dir = tempdir().unwrap();
        let config = Config {
            bufferpool_max_frames: 2,
            ..Config::default()
        };
        (dir, config)
    }

    #[test]
    fn pin_fetches_a_fresh_zero_page() {
        let (dir, config) = setup();
        let pool = Bufferpool::new(dir.path(), config);
        let pid = PageId::new("t", 0, true, 0);
        let frame = pool.pin(&pid).unwrap();
        let value = frame.read(None, |buf| buf[0]).unwrap();
        assert_eq!(value, 0);
        pool.unpin(&pid);
    }

    #[test]
    fn write_then_checkpoint_persists_to_disk() {
        let (dir, config) = setup();
        let pool = Bufferpool::new(dir.path(), config);
        let pid = PageId::new("t", 0, true, 0);
        pool.with_write(&pid, |buf| buf[0] = 9).unwrap();
        pool.checkpoint().unwrap();

        let pages = read_pages(dir.path(), &pid, 1, 4096).unwrap();
        assert_eq!(pages[0][0], 9);
    }

    #[test]
    fn eviction_makes_room_for_a_third_page() {
        let (dir, config) = setup();
        let pool = Bufferpool::new(dir.path(), config);
        let a = PageId::new("t", 0, true, 0);
        let b = PageId::new("t", 0, true, 1);
        let c = PageId::new("t", 0, true, 2);

        pool.with_write(&a, |buf| buf[0] = 1).unwrap();
        pool.with_write(&b, |buf| buf[0] = 2).unwrap();
        // Pool is at capacity (2); pinning a third page must evict `a`.
        pool.with_write(&c, |buf| buf[0] = 3).unwrap();

        let pages = read_pages(dir.path(), &a, 1, 4096).unwrap();
        assert_eq!(pages[0][0], 1);
    }

    #[test]
    fn evicting_a_pinned_page_is_an_error() {
        let (dir, config) = setup();
        let pool = Bufferpool::new(dir.path(), config);
        let pid = PageId::new("t", 0, true, 0);
        let frame = pool.pin(&pid).unwrap();
        assert!(pool.evict_page(&pid).is_err());
        pool.unpin(&pid);
        drop(frame);
        assert!(pool.evict_page(&pid).is_ok());
    }
}

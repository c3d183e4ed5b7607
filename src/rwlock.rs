//! Readers-writer locks (§4.1).
//!
//! Two variants, both accepting a timeout (`None` = wait forever):
//! - [`ReadPreferringRwLock`]: readers can enter while a writer is waiting;
//!   cheap in the common read-heavy case, but writers can starve.
//! - [`WritePreferringRwLock`]: structural writers never starve behind a
//!   steady stream of readers, and the write side is reentrant by owning
//!   thread (needed because the page directory calls into itself while
//!   already holding the write lock).
//!
//! Grounded on `examples/original_source/lstore/rwlock.py`; translated from
//! Python's `RLock`/`Condition` into `std::sync::{Mutex, Condvar}`.

use std::sync::{Mutex, MutexGuard};
use std::thread::ThreadId;
use std::time::{Duration, Instant};

/// `None` means "wait forever".
pub type LockTimeout = Option<Duration>;

pub trait ReadersWriterLock {
    fn acquire_read(&self, timeout: LockTimeout) -> bool;
    fn release_read(&self);
    fn acquire_write(&self, timeout: LockTimeout) -> bool;
    fn release_write(&self);

    /// Acquire a read lock and run `f`, releasing on every exit path.
    /// Returns `None` if acquisition timed out.
    fn read<R>(&self, timeout: LockTimeout, f: impl FnOnce() -> R) -> Option<R> {
        if !self.acquire_read(timeout) {
            return None;
        }
        let result = f();
        self.release_read();
        Some(result)
    }

    /// Acquire a write lock and run `f`, releasing on every exit path.
    fn write<R>(&self, timeout: LockTimeout, f: impl FnOnce() -> R) -> Option<R> {
        if !self.acquire_write(timeout) {
            return None;
        }
        let result = f();
        self.release_write();
        Some(result)
    }
}

/// Read-preferring RW lock: readers only ever block on an *active* writer,
/// never on a merely-waiting one, so a steady stream of readers can starve
/// a writer. Implemented with one mutex + condvar over plain counters
/// rather than the Python source's nested-mutex trick, since `std::sync`
/// offers no "acquire in one thread, release in another" primitive to
/// mirror that directly.
pub struct ReadPreferringRwLock {
    inner: Mutex<ReadState>,
    cond: std::sync::Condvar,
}

struct ReadState {
    num_readers: usize,
    writer_active: bool,
}

impl ReadPreferringRwLock {
    pub fn new() -> Self {
        ReadPreferringRwLock {
            inner: Mutex::new(ReadState {
                num_readers: 0,
                writer_active: false,
            }),
            cond: std::sync::Condvar::new(),
        }
    }
}

impl ReadersWriterLock for ReadPreferringRwLock {
    fn acquire_read(&self, timeout: LockTimeout) -> bool {
        let guard = self.inner.lock().unwrap();
        let waited = wait_until(&self.cond, guard, timeout, |s| !s.writer_active);
        match waited {
            Some(mut guard) => {
                guard.num_readers += 1;
                true
            }
            None => false,
        }
    }

    fn release_read(&self) {
        let mut guard = self.inner.lock().unwrap();
        guard.num_readers -= 1;
        if guard.num_readers == 0 {
            self.cond.notify_all();
        }
    }

    fn acquire_write(&self, timeout: LockTimeout) -> bool {
        let guard = self.inner.lock().unwrap();
        let waited = wait_until(&self.cond, guard, timeout, |s| {
            s.num_readers == 0 && !s.writer_active
        });
        match waited {
            Some(mut guard) => {
                guard.writer_active = true;
                true
            }
            None => false,
        }
    }

    fn release_write(&self) {
        let mut guard = self.inner.lock().unwrap();
        guard.writer_active = false;
        self.cond.notify_all();
    }
}

/// Shared condvar-wait helper: block on `guard` until `ready` holds or
/// `timeout` elapses, returning the re-acquired guard on success.
fn wait_until<'a, T>(
    cond: &std::sync::Condvar,
    mut guard: MutexGuard<'a, T>,
    timeout: LockTimeout,
    mut ready: impl FnMut(&T) -> bool,
) -> Option<MutexGuard<'a, T>> {
    match timeout {
        None => {
            while !ready(&guard) {
                guard = cond.wait(guard).unwrap();
            }
            Some(guard)
        }
        Some(d) => {
            let deadline = Instant::now() + d;
            while !ready(&guard) {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    return None;
                }
                let (g, result) = cond.wait_timeout(guard, remaining).unwrap();
                guard = g;
                if result.timed_out() && !ready(&guard) {
                    return None;
                }
            }
            Some(guard)
        }
    }
}

/// Write-preferring RW lock: one mutex + condvar guards reader/writer
/// counts directly, so writers are never starved once they start waiting,
/// and the write side is reentrant by owning thread.
pub struct WritePreferringRwLock {
    inner: Mutex<Inner>,
    cond: std::sync::Condvar,
}

struct Inner {
    num_readers_active: usize,
    num_writers_waiting: usize,
    is_writer_active: bool,
    write_thread: Option<ThreadId>,
    recursion_level: usize,
}

impl WritePreferringRwLock {
    pub fn new() -> Self {
        WritePreferringRwLock {
            inner: Mutex::new(Inner {
                num_readers_active: 0,
                num_writers_waiting: 0,
                is_writer_active: false,
                write_thread: None,
                recursion_level: 0,
            }),
            cond: std::sync::Condvar::new(),
        }
    }

}

impl ReadersWriterLock for WritePreferringRwLock {
    fn acquire_read(&self, timeout: LockTimeout) -> bool {
        let guard = self.inner.lock().unwrap();
        let Some(mut guard) = wait_until(&self.cond, guard, timeout, |s| {
            s.num_writers_waiting == 0 && !s.is_writer_active
        }) else {
            return false;
        };
        guard.num_readers_active += 1;
        true
    }

    fn release_read(&self) {
        let mut guard = self.inner.lock().unwrap();
        guard.num_readers_active -= 1;
        if guard.num_readers_active == 0 {
            self.cond.notify_all();
        }
    }

    fn acquire_write(&self, timeout: LockTimeout) -> bool {
        let mut guard = self.inner.lock().unwrap();
        let me = std::thread::current().id();
        if guard.write_thread == Some(me) {
            guard.recursion_level += 1;
            return true;
        }
        guard.num_writers_waiting += 1;
        let waited = wait_until(&self.cond, guard, timeout, |s| {
            s.num_readers_active == 0 && !s.is_writer_active
        });
        match waited {
            Some(mut guard) => {
                guard.num_writers_waiting -= 1;
                guard.write_thread = Some(me);
                guard.recursion_level = 1;
                guard.is_writer_active = true;
                true
            }
            None => {
                let mut guard = self.inner.lock().unwrap();
                guard.num_writers_waiting -= 1;
                false
            }
        }
    }

    fn release_write(&self) {
        let mut guard = self.inner.lock().unwrap();
        guard.recursion_level -= 1;
        if guard.recursion_level == 0 {
            guard.is_writer_active = false;
            guard.write_thread = None;
            self.cond.notify_all();
        }
    }
}

impl Default for ReadPreferringRwLock {
    fn default() -> Self {
        Self::new()
    }
}

impl Default for WritePreferringRwLock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn write_preferring_is_reentrant() {
        let lock = WritePreferringRwLock::new();
        assert!(lock.acquire_write(None));
        assert!(lock.acquire_write(None));
        lock.release_write();
        lock.release_write();
        assert!(lock.acquire_read(Some(Duration::from_millis(50))));
        lock.release_read();
    }

    #[test]
    fn write_preferring_excludes_readers() {
        let lock = Arc::new(WritePreferringRwLock::new());
        assert!(lock.acquire_write(None));
        let l2 = Arc::clone(&lock);
        let handle = thread::spawn(move || l2.acquire_read(Some(Duration::from_millis(50))));
        assert!(!handle.join().unwrap());
        lock.release_write();
    }

    #[test]
    fn read_preferring_allows_concurrent_readers() {
        let lock = Arc::new(ReadPreferringRwLock::new());
        assert!(lock.acquire_read(None));
        let l2 = Arc::clone(&lock);
        let handle = thread::spawn(move || l2.acquire_read(Some(Duration::from_millis(50))));
        assert!(handle.join().unwrap());
        lock.release_read();
        lock.release_read();
    }
}

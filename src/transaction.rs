//! Grouping of queries under one commit/abort outcome (§4.9).
//!
//! Grounded on `examples/original_source/lstore/transaction.py`. The Python
//! source stores `(query_callable, table_name, args)` tuples so a
//! transaction object can literally re-invoke its own queries; this crate's
//! WAL (§4.8) already captures query type and arguments in a replayable
//! binary form, so `Transaction` here only needs to carry what `commit`/
//! `abort` actually use: the start timestamp and the RIDs touched.

use std::sync::Arc;

use crate::pagedir::PageDirectory;
use crate::transaction_tracker::TransactionTracker;

/// One logical unit of work: a timestamp, and every RID it touched. Calling
/// `commit`/`abort` resolves the timestamp in the tracker and lets every
/// touched page directory fold resolved RIDs into its merge bookkeeping
/// (§4.7 "stable conceptual page").
pub struct Transaction {
    pub start_time: i64,
    pub affected_rids: Vec<i64>,
    tracker: Option<Arc<TransactionTracker>>,
    pagedirs: Vec<Arc<PageDirectory>>,
}

impl Transaction {
    pub fn new(start_time: i64) -> Self {
        Transaction {
            start_time,
            affected_rids: Vec::new(),
            tracker: None,
            pagedirs: Vec::new(),
        }
    }

    /// Register the table this transaction is touching. Safe to call
    /// repeatedly with the same table across several queries in one
    /// transaction; later calls with the same page directory are no-ops.
    pub fn bind(&mut self, tracker: Arc<TransactionTracker>, pagedir: Arc<PageDirectory>) {
        self.tracker = Some(tracker);
        if !self.pagedirs.iter().any(|pd| Arc::ptr_eq(pd, &pagedir)) {
            self.pagedirs.push(pagedir);
        }
    }

    /// Mark committed and resolve every affected RID. Returns `true` (a
    /// transaction with nothing bound — e.g. an inner transaction a caller
    /// never ran a query against — trivially "commits").
    pub fn commit(&self) -> bool {
        let Some(tracker) = &self.tracker else { return true };
        if tracker.mark_committed(self.start_time).is_err() {
            return false;
        }
        for pagedir in &self.pagedirs {
            pagedir.notify_resolve(&self.affected_rids);
        }
        true
    }

    /// Mark aborted and resolve every affected RID. Always returns `false`,
    /// matching the query layer's "abort means the overall query failed"
    /// convention (§7).
    pub fn abort(&self) -> bool {
        let Some(tracker) = &self.tracker else { return false };
        if tracker.mark_aborted(self.start_time).is_err() {
            return false;
        }
        for pagedir in &self.pagedirs {
            pagedir.notify_resolve(&self.affected_rids);
        }
        false
    }
}

/// Current wall-clock time in nanoseconds, used as a transaction's start
/// timestamp when the caller doesn't supply one explicitly (§4.9).
pub fn now_ns() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock before UNIX epoch")
        .as_nanos() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn commit_with_nothing_bound_succeeds() {
        let xact = Transaction::new(1);
        assert!(xact.commit());
    }

    #[test]
    fn commit_marks_tracker_and_resolves_rids() {
        let tracker = Arc::new(TransactionTracker::new());
        let pagedir = Arc::new(PageDirectory::new("t", 2, Config::default()));
        let (base_rid, _) = pagedir.alloc_base_rid();

        let mut xact = Transaction::new(42);
        xact.bind(Arc::clone(&tracker), Arc::clone(&pagedir));
        xact.affected_rids.push(base_rid);
        assert!(xact.commit());
        assert!(tracker.is_committed(42));
    }
}

//! Background merge worker (§4.7 "Merge").
//!
//! Grounded on `examples/original_source/lstore/table.py`'s `__merge`/
//! `__merge_page`, but without that source's long-held
//! `frame.acquire_write()`/`release_write()` spans: tail pages are
//! immutable once written and the merge worker is the only writer of base
//! pages, so the bufferpool's per-call `with_read`/`with_write` already
//! give each access the consistency it needs.

use std::collections::HashSet;

use log::warn;

use crate::bufferpool::Bufferpool;
use crate::config::{BASE_RID_COLUMN, NUM_META_COLS};
use crate::error::{StorageError, StorageResult};
use crate::page::{columns_of, PageId, PageLocation};
use crate::pagedir::PageDirectory;

/// Drain the merge queue, most-recently-queued page first, folding each
/// tail page's committed records into a fresh copy of its owning base
/// page. A single page's failure is logged and skipped; the next trigger
/// will queue it again.
pub fn run_merge_cycle(
    bufferpool: &Bufferpool,
    page_directory: &PageDirectory,
    table_name: &str,
    num_columns: usize,
    num_raw_cols: usize,
) -> StorageResult<()> {
    let mut queue = page_directory.clear_merge_queue();
    queue.reverse();
    for tail_page_id in queue {
        if let Err(e) = merge_one_page(bufferpool, page_directory, &tail_page_id, num_columns, num_raw_cols) {
            warn!("table {}: failed to merge page {:?}: {}", table_name, tail_page_id, e);
        }
    }
    Ok(())
}

fn merge_one_page(
    bufferpool: &Bufferpool,
    page_directory: &PageDirectory,
    tail_page_id: &PageId,
    num_columns: usize,
    num_raw_cols: usize,
) -> StorageResult<()> {
    let con_page_max_recs = page_directory.con_page_max_recs();

    let mut tail_columns: Vec<Vec<u8>> = Vec::with_capacity(num_raw_cols);
    for col_page_id in columns_of(tail_page_id, num_raw_cols) {
        let bytes = bufferpool.with_read(&col_page_id, |buf| buf.to_vec())?;
        tail_columns.push(bytes);
    }

    let last_index = con_page_max_recs - 1;
    let representative_bid = read_data_i64(&tail_columns[BASE_RID_COLUMN], last_index);
    if representative_bid == 0 {
        return Ok(());
    }
    let (_, old_base_locations) = page_directory.get_base_record_location(representative_bid)?;

    let new_locations = page_directory.alloc_merge_locations();
    for (col, new_loc) in new_locations.iter().enumerate() {
        let raw_idx = NUM_META_COLS + col;
        let old_loc = &old_base_locations[raw_idx];
        let old_bytes = bufferpool.with_read(&old_loc.id(), |buf| buf.to_vec())?;
        bufferpool.with_write(&new_loc.id(), |buf| buf.copy_from_slice(&old_bytes))?;
    }

    let mut merged_base_rids: HashSet<i64> = HashSet::new();
    for index in (0..con_page_max_recs).rev() {
        let merge_bid = read_data_i64(&tail_columns[BASE_RID_COLUMN], index);
        if merge_bid == 0 {
            continue;
        }
        if !merged_base_rids.insert(merge_bid) {
            continue;
        }
        let (_, old_record_locations) = page_directory.get_base_record_location(merge_bid)?;
        let schema_encoding = read_schema(&tail_columns[crate::config::SCHEMA_ENCODING_COLUMN], index, num_columns);

        let merge_tid = read_data_i64(&tail_columns[crate::config::RID_COLUMN], index);
        let tail_locations = page_directory.get_tail_record_location(merge_tid)?;

        let mut new_record_offsets = Vec::with_capacity(num_columns);
        for col in 0..num_columns {
            let raw_idx = NUM_META_COLS + col;
            let old_offset = old_record_locations[raw_idx].offset;
            let new_loc = PageLocation::from_id(&new_locations[col].id(), old_offset);
            if schema_encoding.get(col) == Some(true) {
                let tail_offset = tail_locations
                    .iter()
                    .find(|loc| loc.raw_column_index == raw_idx)
                    .map(|loc| loc.offset)
                    .ok_or_else(|| {
                        StorageError::Invariant(format!(
                            "tail record {} flags column {} but has no stored location for it",
                            merge_tid, raw_idx
                        ))
                    })?;
                let value = read_data_i64(&tail_columns[raw_idx], tail_offset);
                bufferpool.with_write(&new_loc.id(), |buf| crate::page::DataPage::write(buf, value, old_offset))?;
            }
            new_record_offsets.push(new_loc);
        }

        page_directory.notify_merge(merge_bid, new_record_offsets, merge_tid);
    }

    Ok(())
}

fn read_data_i64(column_bytes: &[u8], record_index: usize) -> i64 {
    crate::page::DataPage::read(column_bytes, record_index)
}

fn read_schema(column_bytes: &[u8], record_index: usize, num_columns: usize) -> bit_vec::BitVec {
    crate::page::SchemaEncodingPage::read(column_bytes, record_index, num_columns)
}

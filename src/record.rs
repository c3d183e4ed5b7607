//! In-memory record representation (§4.6).
//!
//! Grounded on `examples/original_source/lstore/record.py`. The Python
//! source keeps metadata and data columns in one untyped list (with the
//! schema-encoding slot holding a `bitarray` instead of an `int`); this
//! crate splits metadata into typed fields instead; `columns()` returns
//! only the user-defined data columns.

use bit_vec::BitVec;

use crate::page::SchemaEncodingPage;

/// A single row, either a base record or a tail (update/delete) record.
#[derive(Debug, Clone)]
pub struct Record {
    /// RID of the indirection target (the newest tail record, or the base
    /// record itself if unmodified). `None` means "no indirection yet".
    pub indirection: Option<i64>,
    /// RID of this record. Tail RIDs are not globally unique across tables
    /// the way base RIDs are (§3).
    pub rid: i64,
    pub timestamp: i64,
    pub schema_encoding: BitVec,
    /// RID of the base record this record updates (itself, if this *is*
    /// the base record).
    pub base_rid: i64,
    /// User-defined data columns (metadata columns excluded).
    pub columns: Vec<i64>,
    /// Index, within `columns`, of the primary key column.
    pub key_col: usize,
}

impl Record {
    /// Construct a fresh record with zeroed metadata and an all-zero
    /// schema encoding sized to `columns.len()`.
    pub fn new(key_col: usize, columns: Vec<i64>) -> Self {
        let schema_encoding = SchemaEncodingPage::zeros(columns.len());
        Record {
            indirection: None,
            rid: 0,
            timestamp: 0,
            schema_encoding,
            base_rid: 0,
            columns,
            key_col,
        }
    }

    /// Value of the primary key column.
    pub fn key(&self) -> i64 {
        self.columns[self.key_col]
    }

    /// Whether this record's own RID is its base RID, i.e. it's a base
    /// record rather than a tail record.
    pub fn is_base_record(&self) -> bool {
        self.rid == self.base_rid
    }

    /// Whether this record represents a deletion: a tail record whose
    /// schema encoding is all zero (§4.7 "Delete").
    pub fn is_deleted(&self) -> bool {
        !self.is_base_record() && SchemaEncodingPage::is_all_zero(&self.schema_encoding)
    }

    /// Keep only the columns flagged `1` in `projected_column_indices`,
    /// discarding the rest. Used by the query layer to avoid returning
    /// unrequested columns (§6 `select`).
    pub fn filter_columns(&mut self, projected_column_indices: &[u8]) {
        self.columns = self
            .columns
            .iter()
            .zip(projected_column_indices)
            .filter(|(_, &flag)| flag == 1)
            .map(|(value, _)| *value)
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_record_detection() {
        let mut record = Record::new(0, vec![10, 20]);
        record.rid = 1000;
        record.base_rid = 1000;
        assert!(record.is_base_record());
        record.rid = i64::MAX - 1;
        assert!(!record.is_base_record());
    }

    #[test]
    fn filter_columns_keeps_flagged_entries_in_order() {
        let mut record = Record::new(0, vec![1, 2, 3]);
        record.filter_columns(&[1, 0, 1]);
        assert_eq!(record.columns, vec![1, 3]);
    }

    #[test]
    fn deleted_tail_record_has_all_zero_schema_encoding() {
        let mut record = Record::new(0, vec![1]);
        record.rid = 5;
        record.base_rid = 1000;
        assert!(record.is_deleted());
        record.schema_encoding.set(0, true);
        assert!(!record.is_deleted());
    }
}

//! Column indices (§4.6 "Index").
//!
//! Each index is an ordered multimap from column value to the set of base
//! RIDs carrying that value. Grounded on
//! `examples/original_source/lstore/index.py`'s `RangedIndex`/`UniqueIndex`,
//! translated from `sortedcontainers.SortedDict`/`SortedSet` (no such crate
//! appears anywhere in the example pack) to `std::collections::BTreeMap`/
//! `BTreeSet`, which give the same ordered-multimap behavior from the
//! standard library.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::{StorageError, StorageResult};

/// A single column's index: point lookup, range lookup, insert, remove.
pub trait ColumnIndex: Send + Sync {
    fn add(&mut self, value: i64, rid: i64) -> StorageResult<()>;
    fn locate(&self, value: i64) -> Vec<i64>;
    fn locate_range(&self, begin: i64, end: i64) -> Vec<i64>;
    /// Remove `rid` from `value`'s bucket. `rid = None` erases every RID
    /// under `value` (always the case for a unique index, §4.6).
    fn remove(&mut self, value: i64, rid: Option<i64>);
}

/// Ordered multimap `value -> {rid}`, optionally enforcing uniqueness of
/// `value` (in which case it only ever holds one RID per value).
pub struct RangedIndex {
    map: BTreeMap<i64, BTreeSet<i64>>,
    is_unique: bool,
}

impl RangedIndex {
    pub fn ranged() -> Self {
        RangedIndex {
            map: BTreeMap::new(),
            is_unique: false,
        }
    }

    pub fn unique() -> Self {
        RangedIndex {
            map: BTreeMap::new(),
            is_unique: true,
        }
    }
}

/// A unique index is just a `RangedIndex` that rejects a second value
/// (§4.6: "the primary key column is implicitly unique").
pub type UniqueIndex = RangedIndex;

impl ColumnIndex for RangedIndex {
    fn add(&mut self, value: i64, rid: i64) -> StorageResult<()> {
        if self.is_unique && self.map.contains_key(&value) {
            return Err(StorageError::UniqueKeyViolation);
        }
        self.map.entry(value).or_insert_with(BTreeSet::new).insert(rid);
        Ok(())
    }

    fn locate(&self, value: i64) -> Vec<i64> {
        self.map.get(&value).map(|rids| rids.iter().copied().collect()).unwrap_or_default()
    }

    fn locate_range(&self, begin: i64, end: i64) -> Vec<i64> {
        self.map
            .range(begin..=end)
            .flat_map(|(_, rids)| rids.iter().copied())
            .collect()
    }

    fn remove(&mut self, value: i64, rid: Option<i64>) {
        if !self.map.contains_key(&value) {
            return;
        }
        match rid {
            None => {
                self.map.remove(&value);
            }
            Some(_) if self.is_unique => {
                self.map.remove(&value);
            }
            Some(rid) => {
                if let Some(rids) = self.map.get_mut(&value) {
                    rids.remove(&rid);
                    if rids.is_empty() {
                        self.map.remove(&value);
                    }
                }
            }
        }
    }
}

/// The set of indices maintained for one table: one slot per data column,
/// the key column's slot always populated and undroppable (§4.6).
pub struct Index {
    slots: Vec<Option<Box<dyn ColumnIndex>>>,
    key_col: usize,
}

impl Index {
    /// Build an `Index` with `num_columns` empty slots and a unique index
    /// already populated on `key_col` from `key_entries`.
    pub fn new(num_columns: usize, key_col: usize, key_entries: impl Iterator<Item = (i64, i64)>) -> StorageResult<Self> {
        let mut index = Index {
            slots: (0..num_columns).map(|_| None).collect(),
            key_col,
        };
        index.create_index(key_col, true, key_entries)?;
        Ok(index)
    }

    /// Create an index on `column`, populating it from `entries` (value,
    /// base_rid pairs) drawn from a single pass over the table's latest
    /// committed versions (§4.6).
    pub fn create_index(
        &mut self,
        column: usize,
        is_unique: bool,
        entries: impl Iterator<Item = (i64, i64)>,
    ) -> StorageResult<()> {
        if self.slots[column].is_some() {
            return Err(StorageError::Validation(format!("index already exists for column {}", column)));
        }
        let mut index: Box<dyn ColumnIndex> = if is_unique {
            Box::new(RangedIndex::unique())
        } else {
            Box::new(RangedIndex::ranged())
        };
        for (value, rid) in entries {
            index.add(value, rid)?;
        }
        self.slots[column] = Some(index);
        Ok(())
    }

    pub fn drop_index(&mut self, column: usize) -> StorageResult<()> {
        if column == self.key_col {
            return Err(StorageError::Validation("cannot drop the primary key index".to_string()));
        }
        self.slots[column] = None;
        Ok(())
    }

    pub fn locate(&self, column: usize, value: i64) -> StorageResult<Vec<i64>> {
        self.slot(column).map(|index| index.locate(value))
    }

    pub fn locate_range(&self, column: usize, begin: i64, end: i64) -> StorageResult<Vec<i64>> {
        self.slot(column).map(|index| index.locate_range(begin, end))
    }

    pub fn add(&mut self, column: usize, value: i64, rid: i64) -> StorageResult<()> {
        match self.slots.get_mut(column).and_then(|s| s.as_mut()) {
            Some(index) => index.add(value, rid),
            None => Ok(()),
        }
    }

    pub fn remove(&mut self, column: usize, value: i64, rid: Option<i64>) {
        if let Some(index) = self.slots.get_mut(column).and_then(|s| s.as_mut()) {
            index.remove(value, rid);
        }
    }

    fn slot(&self, column: usize) -> StorageResult<&dyn ColumnIndex> {
        self.slots
            .get(column)
            .and_then(|s| s.as_deref())
            .ok_or_else(|| StorageError::Validation(format!("index not defined on column {}", column)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_index_rejects_duplicate_values() {
        let mut index = RangedIndex::unique();
        index.add(1, 1000).unwrap();
        assert!(matches!(index.add(1, 1001), Err(StorageError::UniqueKeyViolation)));
    }

    #[test]
    fn ranged_index_locate_range_is_inclusive() {
        let mut index = RangedIndex::ranged();
        index.add(1, 100).unwrap();
        index.add(5, 101).unwrap();
        index.add(10, 102).unwrap();
        let mut found = index.locate_range(1, 5);
        found.sort();
        assert_eq!(found, vec![100, 101]);
    }

    #[test]
    fn remove_with_none_erases_every_rid_for_a_value() {
        let mut index = RangedIndex::ranged();
        index.add(1, 100).unwrap();
        index.add(1, 101).unwrap();
        index.remove(1, None);
        assert!(index.locate(1).is_empty());
    }

    #[test]
    fn key_index_cannot_be_dropped() {
        let mut index = Index::new(2, 0, vec![(1, 1000)].into_iter()).unwrap();
        assert!(index.drop_index(0).is_err());
        index.drop_index(1).unwrap();
    }
}

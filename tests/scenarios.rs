//! End-to-end scenarios (spec.md §8 "End-to-end scenarios" S1–S6) driven
//! entirely through the public `Database`/`Query` surface.

use lstore::{Config, Database};

fn open(dir: &std::path::Path) -> Database {
    Database::open(dir, Config::default()).unwrap()
}

/// S1: range-sum over a freshly inserted run of rows matches the
/// arithmetic total of the summed column.
#[test]
fn sum_over_inserted_range() {
    let dir = tempfile::tempdir().unwrap();
    let mut db = open(dir.path());
    db.create_table("Grades", 5, 0).unwrap();
    let query = db.query("Grades").unwrap();

    for i in 0..10i64 {
        assert!(query.insert(&[i, i * 2, i * 3, i * 4, i * 5], None));
    }

    assert_eq!(query.sum(0, 9, 3), Some((0..10).map(|i| i * 4).sum()));
    assert_eq!(query.sum(0, 4, 0), Some((0..5).sum()));
}

/// S2: a partial update leaves unspecified columns untouched.
#[test]
fn partial_update_preserves_other_columns() {
    let dir = tempfile::tempdir().unwrap();
    let mut db = open(dir.path());
    db.create_table("t", 5, 0).unwrap();
    let query = db.query("t").unwrap();

    assert!(query.insert(&[42, 1, 2, 3, 4], None));
    assert!(query.update(42, &[None, None, Some(2), Some(3), Some(5)], None));
    let rows = query.select(42, 0, &[1, 1, 1, 1, 1]).unwrap();
    assert_eq!(rows[0].columns, vec![42, 1, 2, 3, 5]);
}

/// S3: range-sum over a larger key space still matches the arithmetic
/// total for arbitrary sub-ranges.
#[test]
fn sum_over_large_key_space() {
    let dir = tempfile::tempdir().unwrap();
    let mut db = open(dir.path());
    db.create_table("t", 4, 0).unwrap();
    let query = db.query("t").unwrap();

    const N: i64 = 2000;
    for k in 0..N {
        assert!(query.insert(&[k, 100, 99, 98], None));
    }

    assert_eq!(query.sum(0, N - 1, 1), Some(100 * N));
    assert_eq!(query.sum(500, 1499, 2), Some(99 * 1000));
}

/// S4: repeated updates are all reachable through negative versions, and
/// an out-of-range negative version clips to the original insert.
#[test]
fn select_version_walks_back_and_clips() {
    let dir = tempfile::tempdir().unwrap();
    let mut db = open(dir.path());
    db.create_table("t", 2, 0).unwrap();
    let query = db.query("t").unwrap();

    assert!(query.insert(&[1, 0], None));
    assert!(query.update(1, &[None, Some(1)], None));
    assert!(query.update(1, &[None, Some(2)], None));
    assert!(query.update(1, &[None, Some(3)], None));

    let proj = &[1, 1];
    assert_eq!(query.select_version(1, 0, proj, 0).unwrap()[0].columns, vec![1, 3]);
    assert_eq!(query.select_version(1, 0, proj, -1).unwrap()[0].columns, vec![1, 2]);
    assert_eq!(query.select_version(1, 0, proj, -2).unwrap()[0].columns, vec![1, 1]);
    assert_eq!(query.select_version(1, 0, proj, -3).unwrap()[0].columns, vec![1, 0]);
    assert_eq!(query.select_version(1, 0, proj, -4).unwrap()[0].columns, vec![1, 0]);
}

/// S5: several tables with distinct shapes all survive a close/reopen
/// cycle with their column counts and key columns intact.
#[test]
fn multiple_tables_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    {
        let mut db = open(dir.path());
        db.create_table("Grades", 5, 0).unwrap();
        db.create_table("Grade", 10, 3).unwrap();
        db.create_table("Grad", 6, 1).unwrap();
        db.create_table("Gra", 16, 12).unwrap();
        db.close().unwrap();
    }
    let db = open(dir.path());
    for (name, num_columns, key_col) in [("Grades", 5, 0), ("Grade", 10, 3), ("Grad", 6, 1), ("Gra", 16, 12)] {
        let table = db.table(name).unwrap_or_else(|| panic!("table {} missing after reopen", name));
        assert_eq!(table.num_columns(), num_columns);
        assert_eq!(table.key_col(), key_col);
    }
}

/// S6: a secondary index created after the fact resolves a range query
/// in ascending value order.
#[test]
fn secondary_index_range_query() {
    let dir = tempfile::tempdir().unwrap();
    let mut db = open(dir.path());
    db.create_table("t", 5, 0).unwrap();
    let query = db.query("t").unwrap();

    for i in 0..10i64 {
        assert!(query.insert(&[i, 0, 0, 0, i * 5], None));
    }
    {
        let table = db.table("t").unwrap();
        let mut index = table.index().lock().unwrap();
        let entries = table.records(0).into_iter().map(|r| (r.columns[4], r.base_rid));
        index.create_index(4, false, entries).unwrap();
    }

    let table = db.table("t").unwrap();
    let rids = table.index().lock().unwrap().locate_range(4, 20, 40).unwrap();
    let mut values: Vec<i64> = rids
        .into_iter()
        .map(|rid| table.get_latest_record(rid).unwrap().columns[4])
        .collect();
    values.sort_unstable();
    assert_eq!(values, vec![20, 25, 30, 35, 40]);
}

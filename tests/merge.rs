//! §8 property 8: folding tail records into base pages across several
//! merge triggers must not corrupt the latest or most-recent historical
//! view of a record.

use lstore::{Config, Database};

#[test]
fn repeated_updates_across_merge_triggers_preserve_latest_version() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.merge_interval = 4;
    let mut db = Database::open(dir.path(), config).unwrap();
    db.create_table("t", 2, 0).unwrap();
    let query = db.query("t").unwrap();

    assert!(query.insert(&[1, 0], None));
    for step in 1..20i64 {
        assert!(query.update(1, &[None, Some(step)], None));
    }
    db.table("t").unwrap().drain_merge();

    assert_eq!(query.select(1, 0, &[1, 1]).unwrap()[0].columns, vec![1, 19]);
    assert_eq!(query.select_version(1, 0, &[1, 1], -1).unwrap()[0].columns, vec![1, 18]);
}

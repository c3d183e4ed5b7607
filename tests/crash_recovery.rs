//! §8 property 9: a process that never calls `Database::close` still
//! recovers a consistent, fully-visible state on the next `open`.

use lstore::{Config, Database};

#[test]
fn reopen_without_close_recovers_from_wal() {
    let dir = tempfile::tempdir().unwrap();
    {
        let mut db = Database::open(dir.path(), Config::default()).unwrap();
        db.create_table("t", 2, 0).unwrap();
        let query = db.query("t").unwrap();
        for i in 0..50i64 {
            assert!(query.insert(&[i, i * 10], None));
        }
        assert!(query.update(10, &[None, Some(-1)], None));
        assert!(query.delete(20, None));
        // db is dropped here without `close()` — simulates a crash after
        // every WAL append fsynced but before a clean shutdown. Every
        // mutation above went through an implicit transaction, so each
        // call already fsynced its own WAL entry before returning.
    }

    let db = Database::open(dir.path(), Config::default()).unwrap();
    let query = db.query("t").unwrap();
    assert_eq!(query.select(10, 0, &[1, 1]).unwrap()[0].columns, vec![10, -1]);
    assert!(query.select(20, 0, &[1, 1]).unwrap().is_empty());
    let total: i64 = (0..50i64).map(|i| i * 10).sum();
    let expected = total - 200 /* key=20 deleted */ - 100 /* key=10 original */ - 1 /* key=10 new value */;
    assert_eq!(query.sum(0, 49, 1), Some(expected));
}

//! §8 property 7: the key index stays consistent with the live record set
//! across an interleaved sequence of inserts, updates, and deletes.

use lstore::{Config, Database};

#[test]
fn index_tracks_interleaved_mutations() {
    let dir = tempfile::tempdir().unwrap();
    let mut db = Database::open(dir.path(), Config::default()).unwrap();
    db.create_table("t", 2, 0).unwrap();
    let query = db.query("t").unwrap();

    assert!(query.insert(&[1, 10], None));
    assert!(query.insert(&[2, 20], None));
    assert!(query.insert(&[3, 30], None));
    assert!(query.update(2, &[None, Some(99)], None));
    assert!(query.delete(3, None));

    let table = db.table("t").unwrap();
    {
        let index = table.index().lock().unwrap();
        assert_eq!(index.locate(0, 1).unwrap().len(), 1);
        assert_eq!(index.locate(0, 2).unwrap().len(), 1);
        assert!(index.locate(0, 3).unwrap().is_empty());
    }
    assert!(query.select(3, 0, &[1, 1]).unwrap().is_empty());
    assert_eq!(query.select(2, 0, &[1, 1]).unwrap()[0].columns, vec![2, 99]);
    assert_eq!(query.select(1, 0, &[1, 1]).unwrap()[0].columns, vec![1, 10]);
}

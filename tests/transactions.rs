use mdengine::{Database, OpenOptions, TableSpec, Value, ValueKind};
use tempfile::tempdir;

fn open(path: &std::path::Path) -> Database {
    Database::open(
        OpenOptions::new(path),
        vec![
            TableSpec::new("accounts", ValueKind::Str, 4),
            TableSpec::new("ledger", ValueKind::U64, 4),
        ],
    )
    .unwrap()
}

#[test]
fn a_multi_table_transaction_commits_atomically() {
    let dir = tempdir().unwrap();
    let db = open(&dir.path().join("bank"));

    let txn = db.begin().unwrap();
    db.put(&txn, "accounts", Value::Str("alice".into()), b"90".to_vec()).unwrap();
    db.put(&txn, "ledger", Value::U64(1), b"alice -10".to_vec()).unwrap();
    txn.commit().unwrap();

    assert_eq!(db.get("accounts", &Value::Str("alice".into())).unwrap(), Some(b"90".to_vec()));
    assert_eq!(db.get("ledger", &Value::U64(1)).unwrap(), Some(b"alice -10".to_vec()));
}

#[test]
fn dropping_an_uncommitted_transaction_rolls_it_back() {
    let dir = tempdir().unwrap();
    let db = open(&dir.path().join("bank"));
    db.put_auto("accounts", Value::Str("bob".into()), b"50".to_vec()).unwrap();

    {
        let txn = db.begin().unwrap();
        db.put(&txn, "accounts", Value::Str("bob".into()), b"0".to_vec()).unwrap();
        // txn dropped here without commit or explicit rollback
    }

    assert_eq!(db.get("accounts", &Value::Str("bob".into())).unwrap(), Some(b"50".to_vec()));
}

#[test]
fn rollback_restores_a_deleted_key() {
    let dir = tempdir().unwrap();
    let db = open(&dir.path().join("bank"));
    db.put_auto("accounts", Value::Str("carol".into()), b"10".to_vec()).unwrap();

    let txn = db.begin().unwrap();
    let removed = db.delete(&txn, "accounts", &Value::Str("carol".into())).unwrap();
    assert!(removed);
    assert_eq!(db.get("accounts", &Value::Str("carol".into())).unwrap(), None);
    txn.rollback().unwrap();

    assert_eq!(db.get("accounts", &Value::Str("carol".into())).unwrap(), Some(b"10".to_vec()));
}

#[test]
fn crash_recovery_replays_committed_work_across_multiple_tables() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("bank");
    {
        let db = open(&path);
        db.put_auto("accounts", Value::Str("dave".into()), b"30".to_vec()).unwrap();

        let committed = db.begin().unwrap();
        db.put(&committed, "accounts", Value::Str("erin".into()), b"40".to_vec()).unwrap();
        db.put(&committed, "ledger", Value::U64(7), b"erin +40".to_vec()).unwrap();
        committed.commit().unwrap();

        let crashed = db.begin().unwrap();
        db.put(&crashed, "accounts", Value::Str("frank".into()), b"99".to_vec()).unwrap();
        std::mem::forget(crashed);
    }

    let db = open(&path);
    assert_eq!(db.get("accounts", &Value::Str("dave".into())).unwrap(), Some(b"30".to_vec()));
    assert_eq!(db.get("accounts", &Value::Str("erin".into())).unwrap(), Some(b"40".to_vec()));
    assert_eq!(db.get("ledger", &Value::U64(7)).unwrap(), Some(b"erin +40".to_vec()));
    assert_eq!(db.get("accounts", &Value::Str("frank".into())).unwrap(), None);
}

#[test]
fn checkpointing_does_not_make_truncation_possible() {
    let dir = tempdir().unwrap();
    let db = open(&dir.path().join("bank"));
    db.put_auto("accounts", Value::Str("gail".into()), b"5".to_vec()).unwrap();
    db.checkpoint().unwrap();
    // Directly exercising the WAL's own refusal is covered in src/wal.rs unit tests; here we
    // confirm a checkpoint alone has no effect on queryable data.
    assert_eq!(db.get("accounts", &Value::Str("gail".into())).unwrap(), Some(b"5".to_vec()));
}

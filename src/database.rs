//! The database façade: ties the paged store, WAL, transaction manager, and named B+ trees into
//! a single open/close handle. Deliberately ignorant of rows, columns, and schemas — every value
//! stored here is an opaque byte string the caller already encoded.

use crate::error::{Error, Result};
use crate::store::{OpenOptions, PagedStore};
use crate::tree::BPlusTree;
use crate::txn::{ApplyFn, Transaction, TransactionManager};
use crate::value::{Value, ValueKind};
use crate::wal::{OpKind, Wal, WalRecord};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;

/// A table declaration a caller must supply before opening a database whose WAL has history for
/// it — see the schema-catalog open question in DESIGN.md.
#[derive(Clone, Debug)]
pub struct TableSpec {
    pub name: String,
    pub key_kind: ValueKind,
    pub order: usize,
}

impl TableSpec {
    #[must_use]
    pub fn new(name: impl Into<String>, key_kind: ValueKind, order: usize) -> Self {
        Self { name: name.into(), key_kind, order }
    }
}

/// A named tree plus the write-serializing lock the façade holds across a mutation's
/// find-then-log-then-apply sequence. The tree's own lock only protects a single tree operation;
/// without this outer lock, two concurrent transactions touching the same key could both observe
/// the key as absent and both log an `Insert` (instead of one `Insert` and one `Update`), or race
/// their WAL order against their tree-apply order. This is the "Table" lock named first in the
/// spec's lock-ordering list, acquired before the tree, transaction, and WAL locks beneath it.
struct TableHandle {
    tree: Arc<BPlusTree>,
    write_lock: Mutex<()>,
}

type Tables = Arc<RwLock<HashMap<String, Arc<TableHandle>>>>;

pub struct Database {
    store: Arc<PagedStore>,
    manager: Arc<TransactionManager>,
    tables: Tables,
}

impl Database {
    /// Opens (or creates) the data file and WAL at `options.path`, pre-registers `tables`, then
    /// replays the WAL: committed transactions forward, incomplete ones undone. A WAL record for
    /// a table not present in `tables` fails the open with [`Error::UnknownTable`].
    pub fn open(options: OpenOptions, tables: Vec<TableSpec>) -> Result<Self> {
        let store = Arc::new(PagedStore::open(options.clone())?);
        let mut map = HashMap::new();
        for spec in tables {
            map.insert(spec.name.clone(), Arc::new(table_handle(spec)));
        }
        let tables: Tables = Arc::new(RwLock::new(map));

        let wal_path = options.path.with_extension("wal");
        let wal = Arc::new(Wal::open(wal_path)?);

        let apply_tables = tables.clone();
        let apply: Arc<ApplyFn> = Arc::new(move |record: &WalRecord| apply_record(&apply_tables, record));

        let manager = TransactionManager::open(wal, apply)?;
        log::info!("database opened at {}", store.path().display());
        Ok(Self { store, manager, tables })
    }

    /// Registers a new table. Has no effect on already-replayed WAL history; intended for tables
    /// created fresh in the current session.
    pub fn create_table(&self, spec: TableSpec) -> Result<()> {
        let mut tables = self.tables.write();
        if tables.contains_key(&spec.name) {
            return Err(Error::DuplicateTable(spec.name));
        }
        let name = spec.name.clone();
        tables.insert(name, Arc::new(table_handle(spec)));
        Ok(())
    }

    pub fn begin(&self) -> Result<Transaction> {
        self.manager.begin()
    }

    fn handle(&self, table: &str) -> Result<Arc<TableHandle>> {
        self.tables.read().get(table).cloned().ok_or_else(|| Error::UnknownTable(table.to_owned()))
    }

    /// Inserts or updates `key => value` in `table` within `txn`, logging the correct WAL op
    /// (`Insert` if the key was absent, `Update` with the prior value otherwise). The table's
    /// write lock is held across the find-log-apply sequence so a concurrent mutation of the same
    /// key cannot race between the "does it already exist" check and the tree update.
    pub fn put(&self, txn: &Transaction, table: &str, key: Value, value: Vec<u8>) -> Result<()> {
        let handle = self.handle(table)?;
        let _guard = handle.write_lock.lock();
        let existing = handle.tree.find(&key)?;
        match existing {
            Some(old) => txn.log_update(table, &key, old.clone(), value.clone())?,
            None => txn.log_insert(table, &key, value.clone())?,
        }
        handle.tree.insert(key, value)?;
        Ok(())
    }

    pub fn get(&self, table: &str, key: &Value) -> Result<Option<Vec<u8>>> {
        self.handle(table)?.tree.find(key)
    }

    pub fn delete(&self, txn: &Transaction, table: &str, key: &Value) -> Result<bool> {
        let handle = self.handle(table)?;
        let _guard = handle.write_lock.lock();
        let Some(old) = handle.tree.find(key)? else { return Ok(false) };
        txn.log_delete(table, key, old)?;
        handle.tree.delete(key)
    }

    pub fn iter_all(&self, table: &str) -> Result<Vec<(Value, Vec<u8>)>> {
        Ok(self.handle(table)?.tree.iter_all())
    }

    pub fn range(&self, table: &str, lo: Option<&Value>, hi: Option<&Value>) -> Result<Vec<(Value, Vec<u8>)>> {
        self.handle(table)?.tree.range(lo, hi)
    }

    /// Single-statement convenience: begins a transaction, performs `put`, commits.
    pub fn put_auto(&self, table: &str, key: Value, value: Vec<u8>) -> Result<()> {
        let txn = self.begin()?;
        self.put(&txn, table, key, value)?;
        txn.commit()
    }

    /// Single-statement convenience: begins a transaction, performs `delete`, commits.
    pub fn delete_auto(&self, table: &str, key: &Value) -> Result<bool> {
        let txn = self.begin()?;
        let removed = self.delete(&txn, table, key)?;
        txn.commit()?;
        Ok(removed)
    }

    pub fn checkpoint(&self) -> Result<u64> {
        self.manager.wal().checkpoint()
    }

    pub fn flush(&self) -> Result<()> {
        self.store.flush()
    }

    pub fn close(&self) -> Result<()> {
        self.store.close()
    }
}

/// Builds the tree-plus-write-lock wrapper a table's entry in the `tables` map holds.
fn table_handle(spec: TableSpec) -> TableHandle {
    TableHandle {
        tree: Arc::new(BPlusTree::new(spec.order, spec.key_kind)),
        write_lock: Mutex::new(()),
    }
}

fn apply_record(tables: &Tables, record: &WalRecord) -> Result<()> {
    if record.table.is_empty() {
        return Ok(()); // Begin/Commit/Rollback/Checkpoint markers carry no table.
    }
    let handle = tables
        .read()
        .get(&record.table)
        .cloned()
        .ok_or_else(|| Error::UnknownTable(record.table.clone()))?;
    let Some(key) = record.key()? else { return Ok(()) };
    match record.op {
        OpKind::Insert | OpKind::Update => {
            let value = record.new_value.clone().unwrap_or_default();
            handle.tree.insert(key, value)?;
        }
        OpKind::Delete => {
            handle.tree.delete(&key)?;
        }
        OpKind::Begin | OpKind::Commit | OpKind::Rollback | OpKind::Checkpoint => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open_db(dir: &std::path::Path) -> Database {
        Database::open(
            OpenOptions::new(dir.join("users")),
            vec![TableSpec::new("users", ValueKind::U64, 4)],
        )
        .unwrap()
    }

    #[test]
    fn insert_then_select_by_key() {
        let dir = tempdir().unwrap();
        let db = open_db(dir.path());
        db.put_auto("users", Value::U64(1), b"Alice".to_vec()).unwrap();
        db.put_auto("users", Value::U64(2), b"Bob".to_vec()).unwrap();
        assert_eq!(db.get("users", &Value::U64(1)).unwrap(), Some(b"Alice".to_vec()));
        assert_eq!(db.get("users", &Value::U64(99)).unwrap(), None);
    }

    #[test]
    fn rollback_undoes_uncommitted_insert() {
        let dir = tempdir().unwrap();
        let db = open_db(dir.path());
        db.put_auto("users", Value::U64(1), b"Alice".to_vec()).unwrap();
        {
            let txn = db.begin().unwrap();
            db.put(&txn, "users", Value::U64(2), b"Bob".to_vec()).unwrap();
            txn.rollback().unwrap();
        }
        assert_eq!(db.get("users", &Value::U64(2)).unwrap(), None);
        assert_eq!(db.get("users", &Value::U64(1)).unwrap(), Some(b"Alice".to_vec()));
    }

    #[test]
    fn crash_then_reopen_keeps_only_committed_rows() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("users");
        {
            let db = Database::open(
                OpenOptions::new(&path),
                vec![TableSpec::new("users", ValueKind::U64, 4)],
            )
            .unwrap();
            db.put_auto("users", Value::U64(1), b"a".to_vec()).unwrap();
            db.put_auto("users", Value::U64(2), b"b".to_vec()).unwrap();
            db.put_auto("users", Value::U64(3), b"c".to_vec()).unwrap();
            let txn = db.begin().unwrap();
            db.put(&txn, "users", Value::U64(4), b"d".to_vec()).unwrap();
            db.put(&txn, "users", Value::U64(5), b"e".to_vec()).unwrap();
            std::mem::forget(txn); // simulate a crash: no commit, no drop-triggered rollback
        }
        let db = Database::open(
            OpenOptions::new(&path),
            vec![TableSpec::new("users", ValueKind::U64, 4)],
        )
        .unwrap();
        for id in 1..=3u64 {
            assert!(db.get("users", &Value::U64(id)).unwrap().is_some());
        }
        for id in 4..=5u64 {
            assert!(db.get("users", &Value::U64(id)).unwrap().is_none());
        }
    }
}

//! Transaction lifecycle, undo synthesis, and crash recovery.

use crate::error::{Error, Result};
use crate::value::Value;
use crate::wal::{OpKind, Wal, WalRecord};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnState {
    Active,
    Committed,
    RolledBack,
    Aborted,
}

/// Applied once per redo/undo record, routing a mutation into the named table's in-memory tree.
/// Supplied by the database façade so this module stays ignorant of table storage.
pub type ApplyFn = dyn Fn(&WalRecord) -> Result<()> + Send + Sync;

struct TxnInner {
    state: TxnState,
    pending: Vec<WalRecord>,
}

/// A single transaction's handle. Dropping an active transaction performs a best-effort
/// rollback; any error from that path is logged at `warn` and swallowed, never propagated out of
/// `Drop`.
pub struct Transaction {
    id: i64,
    manager: Arc<TransactionManager>,
    inner: Arc<RwLock<TxnInner>>,
}

impl Transaction {
    #[must_use]
    pub fn id(&self) -> i64 {
        self.id
    }

    #[must_use]
    pub fn state(&self) -> TxnState {
        self.inner.read().state
    }

    fn log(&self, op: OpKind, table: &str, key: &Value, old: Option<Vec<u8>>, new: Option<Vec<u8>>) -> Result<()> {
        {
            let guard = self.inner.read();
            if guard.state != TxnState::Active {
                return Err(Error::TransactionNotActive(self.id));
            }
        }
        let record = WalRecord {
            txn_id: self.id,
            op,
            table: table.to_owned(),
            key_kind: None,
            key_bytes: Vec::new(),
            old_value: old,
            new_value: new,
            timestamp_ms: now_ms(),
            sequence: 0,
        }
        .with_key(key);
        self.manager.wal.append(record.clone())?;
        self.inner.write().pending.push(record);
        Ok(())
    }

    pub fn log_insert(&self, table: &str, key: &Value, new: Vec<u8>) -> Result<()> {
        self.log(OpKind::Insert, table, key, None, Some(new))
    }

    pub fn log_update(&self, table: &str, key: &Value, old: Vec<u8>, new: Vec<u8>) -> Result<()> {
        self.log(OpKind::Update, table, key, Some(old), Some(new))
    }

    pub fn log_delete(&self, table: &str, key: &Value, old: Vec<u8>) -> Result<()> {
        self.log(OpKind::Delete, table, key, Some(old), None)
    }

    /// Durably commits: appends a `Commit` record and fsyncs the WAL before returning, per the
    /// durability barrier in the concurrency model.
    pub fn commit(&self) -> Result<()> {
        {
            let mut guard = self.inner.write();
            if guard.state != TxnState::Active {
                return Err(Error::TransactionNotActive(self.id));
            }
            guard.state = TxnState::Committed;
        }
        self.manager.wal.append(marker(self.id, OpKind::Commit))?;
        self.manager.wal.flush()?;
        self.manager.deregister(self.id);
        log::info!("transaction {} committed", self.id);
        Ok(())
    }

    /// Synthesizes and applies undo records for every pending mutation, in reverse order, then
    /// appends `Rollback` and fsyncs.
    pub fn rollback(&self) -> Result<()> {
        {
            let mut guard = self.inner.write();
            if guard.state != TxnState::Active {
                return Err(Error::TransactionNotActive(self.id));
            }
            guard.state = TxnState::RolledBack;
        }
        self.undo_pending()?;
        self.manager.wal.append(marker(self.id, OpKind::Rollback))?;
        self.manager.wal.flush()?;
        self.manager.deregister(self.id);
        log::info!("transaction {} rolled back", self.id);
        Ok(())
    }

    fn undo_pending(&self) -> Result<()> {
        let pending = self.inner.read().pending.clone();
        for record in pending.iter().rev() {
            let undo = synthesize_undo(record)?;
            (self.manager.apply)(&undo)?;
        }
        Ok(())
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        let is_active = self.inner.read().state == TxnState::Active;
        if is_active {
            if let Err(e) = self.rollback() {
                log::warn!("scoped rollback of transaction {} failed: {e}", self.id);
            }
        }
    }
}

fn marker(txn_id: i64, op: OpKind) -> WalRecord {
    WalRecord {
        txn_id,
        op,
        table: String::new(),
        key_kind: None,
        key_bytes: Vec::new(),
        old_value: None,
        new_value: None,
        timestamp_ms: now_ms(),
        sequence: 0,
    }
}

/// Builds the undo record for a single original mutation, per the fixed table in the module
/// docs: Insert undoes to a Delete carrying the inserted value as `old`; Update undoes to an
/// Update with old/new swapped; Delete undoes to an Insert carrying the deleted value as `new`.
fn synthesize_undo(record: &WalRecord) -> Result<WalRecord> {
    let key = record.key()?;
    let mut undo = record.clone();
    undo.sequence = 0;
    match record.op {
        OpKind::Insert => {
            undo.op = OpKind::Delete;
            undo.old_value = record.new_value.clone();
            undo.new_value = None;
        }
        OpKind::Update => {
            undo.op = OpKind::Update;
            undo.old_value = record.new_value.clone();
            undo.new_value = record.old_value.clone();
        }
        OpKind::Delete => {
            undo.op = OpKind::Insert;
            undo.new_value = record.old_value.clone();
            undo.old_value = None;
        }
        other => return Err(Error::WalFraming(format!("cannot synthesize undo for {other:?}"))),
    }
    if let Some(k) = key {
        undo = undo.with_key(&k);
    }
    Ok(undo)
}

/// Owns the active-transaction table and the WAL; drives recovery at startup.
pub struct TransactionManager {
    next_id: AtomicI64,
    active: RwLock<HashMap<i64, Arc<RwLock<TxnInner>>>>,
    wal: Arc<Wal>,
    apply: Arc<ApplyFn>,
}

impl TransactionManager {
    /// Opens `wal` and replays it via `apply` before handing back a manager whose next
    /// transaction id starts above every id observed in the log.
    pub fn open(wal: Arc<Wal>, apply: Arc<ApplyFn>) -> Result<Arc<Self>> {
        let records = wal.read_all()?;
        let next_id = recover(&records, apply.as_ref())?;
        Ok(Arc::new(Self {
            next_id: AtomicI64::new(next_id),
            active: RwLock::new(HashMap::new()),
            wal,
            apply,
        }))
    }

    pub fn begin(self: &Arc<Self>) -> Result<Transaction> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.wal.append(marker(id, OpKind::Begin))?;
        let inner = Arc::new(RwLock::new(TxnInner { state: TxnState::Active, pending: Vec::new() }));
        self.active.write().insert(id, inner.clone());
        log::debug!("transaction {id} began");
        Ok(Transaction { id, manager: self.clone(), inner })
    }

    fn deregister(&self, id: i64) {
        self.active.write().remove(&id);
    }

    #[must_use]
    pub fn wal(&self) -> &Arc<Wal> {
        &self.wal
    }
}

fn now_ms() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as i64).unwrap_or(0)
}

/// Groups WAL records by transaction id, replays committed transactions forward, synthesizes and
/// applies undo for transactions that are neither committed nor rolled back, and returns the
/// next-transaction-id cursor (`max(observed) + 1`). `Checkpoint` records are ignored for state
/// reconstruction — they exist only to gate truncation, which this engine never performs.
fn recover(records: &[WalRecord], apply: &ApplyFn) -> Result<i64> {
    let mut by_txn: HashMap<i64, Vec<&WalRecord>> = HashMap::new();
    let mut committed = HashSet::new();
    let mut rolled_back = HashSet::new();
    let mut max_id = 0i64;

    for record in records {
        max_id = max_id.max(record.txn_id);
        match record.op {
            OpKind::Commit => {
                committed.insert(record.txn_id);
            }
            OpKind::Rollback => {
                rolled_back.insert(record.txn_id);
            }
            OpKind::Begin | OpKind::Checkpoint => {}
            OpKind::Insert | OpKind::Update | OpKind::Delete => {
                by_txn.entry(record.txn_id).or_default().push(record);
            }
        }
    }

    let mut committed_count = 0usize;
    let mut undone_count = 0usize;
    for (&txn_id, recs) in &by_txn {
        if committed.contains(&txn_id) {
            for r in recs {
                apply(r)?;
            }
            committed_count += 1;
        } else if !rolled_back.contains(&txn_id) {
            for r in recs.iter().rev() {
                let undo = synthesize_undo(r)?;
                apply(&undo)?;
            }
            undone_count += 1;
        }
    }
    log::info!(
        "recovery replayed {committed_count} committed transaction(s), undid {undone_count} incomplete transaction(s)"
    );
    Ok(max_id + 1)
}

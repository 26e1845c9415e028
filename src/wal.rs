//! Write-ahead log: an append-only, length-framed record stream beside the data file.

use crate::error::{Error, Result};
use crate::value::{Value, ValueKind};
use bincode::config::standard;
use bincode::serde::{decode_from_slice, encode_to_vec};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpKind {
    Begin,
    Insert,
    Update,
    Delete,
    Commit,
    Rollback,
    Checkpoint,
}

/// A WAL record with its key (if any) carried as a type tag plus its encoded bytes, since the
/// wire format has no self-describing tag for [`Value`] on its own.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalRecord {
    pub txn_id: i64,
    pub op: OpKind,
    pub table: String,
    pub key_kind: Option<u8>,
    #[serde(with = "serde_bytes")]
    pub key_bytes: Vec<u8>,
    pub old_value: Option<Vec<u8>>,
    pub new_value: Option<Vec<u8>>,
    pub timestamp_ms: i64,
    pub sequence: u64,
}

impl WalRecord {
    pub fn key(&self) -> Result<Option<Value>> {
        match self.key_kind {
            None => Ok(None),
            Some(tag) => {
                let kind = kind_from_tag(tag)?;
                Value::decode(&self.key_bytes, kind).map(Some)
            }
        }
    }

    #[must_use]
    pub fn with_key(mut self, key: &Value) -> Self {
        if let Some(kind) = key.kind() {
            self.key_kind = Some(tag_from_kind(kind));
            self.key_bytes = key.encode();
        }
        self
    }
}

fn tag_from_kind(kind: ValueKind) -> u8 {
    match kind {
        ValueKind::U8 => 0,
        ValueKind::U16 => 1,
        ValueKind::U32 => 2,
        ValueKind::U64 => 3,
        ValueKind::I8 => 4,
        ValueKind::I16 => 5,
        ValueKind::I32 => 6,
        ValueKind::I64 => 7,
        ValueKind::Bool => 8,
        ValueKind::Char => 9,
        ValueKind::Str => 10,
        ValueKind::F32 => 11,
        ValueKind::F64 => 12,
        ValueKind::Decimal => 13,
        ValueKind::Timestamp => 14,
    }
}

fn kind_from_tag(tag: u8) -> Result<ValueKind> {
    Ok(match tag {
        0 => ValueKind::U8,
        1 => ValueKind::U16,
        2 => ValueKind::U32,
        3 => ValueKind::U64,
        4 => ValueKind::I8,
        5 => ValueKind::I16,
        6 => ValueKind::I32,
        7 => ValueKind::I64,
        8 => ValueKind::Bool,
        9 => ValueKind::Char,
        10 => ValueKind::Str,
        11 => ValueKind::F32,
        12 => ValueKind::F64,
        13 => ValueKind::Decimal,
        14 => ValueKind::Timestamp,
        other => return Err(Error::WalFraming(format!("unknown key type tag {other}"))),
    })
}

struct Inner {
    file: File,
    cursor: u64,
    last_checkpoint: u64,
}

/// Append-only log file. Every public method takes the single internal lock; there is no
/// separate shared-mode read path because even reads must serialize against a concurrent append
/// repositioning the file cursor.
pub struct Wal {
    inner: RwLock<Inner>,
    path: PathBuf,
}

impl Wal {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut file = OpenOptions::new().read(true).write(true).create(true).truncate(false).open(&path)?;
        let (cursor, last_checkpoint) = scan_cursor(&mut file)?;
        log::info!("opened WAL at {} (cursor={cursor})", path.display());
        Ok(Self { inner: RwLock::new(Inner { file, cursor, last_checkpoint }), path })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends `record` (its `sequence` field is overwritten), returning the assigned sequence.
    /// Does not itself fsync; callers on a durability-sensitive path (transaction commit/rollback)
    /// must call [`Wal::flush`] afterward.
    pub fn append(&self, mut record: WalRecord) -> Result<u64> {
        let mut inner = self.inner.write();
        inner.cursor += 1;
        record.sequence = inner.cursor;
        let body = encode_to_vec(&record, standard())?;
        let len = u32::try_from(body.len())
            .map_err(|_| Error::WalFraming(format!("record body too large ({} bytes)", body.len())))?;
        inner.file.seek(SeekFrom::End(0))?;
        inner.file.write_all(&len.to_le_bytes())?;
        inner.file.write_all(&body)?;
        log::trace!("appended WAL record seq={} op={:?}", record.sequence, record.op);
        Ok(record.sequence)
    }

    /// Durably syncs the log to disk. Required before reporting a transaction committed.
    pub fn flush(&self) -> Result<()> {
        self.inner.write().file.sync_data()?;
        Ok(())
    }

    pub fn read_all(&self) -> Result<Vec<WalRecord>> {
        let mut inner = self.inner.write();
        inner.file.seek(SeekFrom::Start(0))?;
        let mut buf = Vec::new();
        inner.file.read_to_end(&mut buf)?;
        Ok(parse_records(&buf))
    }

    pub fn read_after(&self, seq: u64) -> Result<Vec<WalRecord>> {
        Ok(self.read_all()?.into_iter().filter(|r| r.sequence > seq).collect())
    }

    /// Appends a `Checkpoint` marker at the current cursor position.
    pub fn checkpoint(&self) -> Result<u64> {
        let record = WalRecord {
            txn_id: 0,
            op: OpKind::Checkpoint,
            table: String::new(),
            key_kind: None,
            key_bytes: Vec::new(),
            old_value: None,
            new_value: None,
            timestamp_ms: now_ms(),
            sequence: 0,
        };
        let seq = self.append(record)?;
        self.flush()?;
        self.inner.write().last_checkpoint = seq;
        log::info!("WAL checkpoint at sequence {seq}");
        Ok(seq)
    }

    /// This engine never truncates the log: the B+ tree is in-memory only (see the design note on
    /// persistence), so discarding records before the last committed redo would make recovery
    /// incomplete. Always returns [`Error::TruncateRefused`].
    pub fn truncate_after_checkpoint(&self) -> Result<()> {
        Err(Error::TruncateRefused)
    }

    pub fn clear(&self) -> Result<()> {
        let mut inner = self.inner.write();
        inner.file.set_len(0)?;
        inner.file.seek(SeekFrom::Start(0))?;
        inner.cursor = 0;
        inner.last_checkpoint = 0;
        Ok(())
    }
}

fn now_ms() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as i64).unwrap_or(0)
}

/// Scans the whole file once to recover the sequence cursor and the last checkpoint's sequence.
/// A truncated trailing frame (a length header with no/partial payload) ends the scan without
/// error; the next append overwrites that garbage.
fn scan_cursor(file: &mut File) -> Result<(u64, u64)> {
    file.seek(SeekFrom::Start(0))?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf)?;
    let mut cursor = 0u64;
    let mut last_checkpoint = 0u64;
    for record in parse_records(&buf) {
        cursor = cursor.max(record.sequence);
        if record.op == OpKind::Checkpoint {
            last_checkpoint = last_checkpoint.max(record.sequence);
        }
    }
    Ok((cursor, last_checkpoint))
}

fn parse_records(buf: &[u8]) -> Vec<WalRecord> {
    let mut records = Vec::new();
    let mut offset = 0usize;
    while offset + 4 <= buf.len() {
        let len_bytes: [u8; 4] = match buf[offset..offset + 4].try_into() {
            Ok(a) => a,
            Err(_) => break,
        };
        let len = crate::utils::num::u32_to_usize(u32::from_le_bytes(len_bytes));
        offset += 4;
        let Some(end) = offset.checked_add(len) else { break };
        if end > buf.len() {
            break;
        }
        match decode_from_slice::<WalRecord, _>(&buf[offset..end], standard()) {
            Ok((record, _)) => records.push(record),
            Err(_) => break,
        }
        offset = end;
    }
    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn rec(txn_id: i64, op: OpKind, seq: u64) -> WalRecord {
        WalRecord {
            txn_id,
            op,
            table: "t".into(),
            key_kind: None,
            key_bytes: Vec::new(),
            old_value: None,
            new_value: None,
            timestamp_ms: 0,
            sequence: seq,
        }
    }

    #[test]
    fn append_assigns_increasing_sequence() {
        let dir = tempdir().unwrap();
        let wal = Wal::open(dir.path().join("log.wal")).unwrap();
        let s1 = wal.append(rec(1, OpKind::Begin, 0)).unwrap();
        let s2 = wal.append(rec(1, OpKind::Commit, 0)).unwrap();
        assert_eq!(s1, 1);
        assert_eq!(s2, 2);
    }

    #[test]
    fn read_all_round_trips() {
        let dir = tempdir().unwrap();
        let wal = Wal::open(dir.path().join("log.wal")).unwrap();
        wal.append(rec(1, OpKind::Begin, 0)).unwrap();
        wal.append(
            rec(1, OpKind::Insert, 0).with_key(&Value::U64(7)),
        )
        .unwrap();
        wal.flush().unwrap();
        let all = wal.read_all().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[1].key().unwrap(), Some(Value::U64(7)));
    }

    #[test]
    fn reopen_recovers_cursor() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("log.wal");
        {
            let wal = Wal::open(&path).unwrap();
            wal.append(rec(1, OpKind::Begin, 0)).unwrap();
            wal.append(rec(1, OpKind::Commit, 0)).unwrap();
            wal.flush().unwrap();
        }
        let wal = Wal::open(&path).unwrap();
        let next = wal.append(rec(2, OpKind::Begin, 0)).unwrap();
        assert_eq!(next, 3);
    }

    #[test]
    fn truncate_is_always_refused() {
        let dir = tempdir().unwrap();
        let wal = Wal::open(dir.path().join("log.wal")).unwrap();
        assert!(matches!(wal.truncate_after_checkpoint(), Err(Error::TruncateRefused)));
    }

    #[test]
    fn trailing_partial_frame_is_ignored() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("log.wal");
        let wal = Wal::open(&path).unwrap();
        wal.append(rec(1, OpKind::Begin, 0)).unwrap();
        wal.flush().unwrap();
        {
            let mut inner = wal.inner.write();
            inner.file.seek(SeekFrom::End(0)).unwrap();
            inner.file.write_all(&20u32.to_le_bytes()).unwrap();
            inner.file.write_all(b"short").unwrap();
        }
        let all = wal.read_all().unwrap();
        assert_eq!(all.len(), 1);
    }
}

//! Unified error taxonomy for the storage engine.
//!
//! Every fallible operation in this crate returns `Result<T, Error>`. Variants are grouped by
//! the subsystem that raises them (open/store/WAL/tree/transaction) rather than by failure
//! mechanism, so callers can match on "what layer broke" without inspecting a message string.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database not found at {0}")]
    NotFound(String),

    #[error("permission denied opening {0}")]
    PermissionDenied(String),

    #[error("invalid header magic in {0}")]
    InvalidMagic(String),

    #[error("unsupported data file version: {0}")]
    UnsupportedVersion(u32),

    #[error("corrupted header page: {0}")]
    CorruptedHeader(String),

    #[error("encode error: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("decode error: {0}")]
    Decode(#[from] bincode::error::DecodeError),

    #[error("WAL framing error: {0}")]
    WalFraming(String),

    #[error("WAL truncation refused: the in-memory tree is not persisted, truncating would lose committed rows")]
    TruncateRefused,

    #[error("key type mismatch: tree expects {expected:?}, got {actual:?}")]
    KeyTypeMismatch { expected: crate::value::ValueKind, actual: crate::value::ValueKind },

    #[error("transaction {0} is not active")]
    TransactionNotActive(i64),

    #[error("table not found: {0}")]
    UnknownTable(String),

    #[error("table already exists: {0}")]
    DuplicateTable(String),
}

pub type Result<T> = std::result::Result<T, Error>;

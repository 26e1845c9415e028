#![deny(unsafe_code)]
#![allow(clippy::missing_errors_doc)]

//! Embedded, single-process, ACID-transactional key/value storage engine.
//!
//! The public surface is [`database::Database`]: open a paged file with a set of declared
//! tables, run transactions over opaque key/value pairs via an in-memory B+ tree per table, and
//! rely on the write-ahead log for durability and crash recovery. Logging setup lives in
//! [`logging`]; failure modes are unified under [`error::Error`].

pub mod cache;
pub mod database;
pub mod error;
pub mod extent;
pub mod logging;
pub mod page;
pub mod store;
pub mod tree;
pub mod txn;
pub mod utils;
pub mod value;
pub mod wal;

pub use database::{Database, TableSpec};
pub use error::{Error, Result};
pub use store::OpenOptions;
pub use value::{Value, ValueKind};

//! Collection storage.
//!
//! Each collection keeps its documents in memory and persists committed
//! transactions to an append-only, checksummed log.

mod collection;
mod log;

pub use collection::{Collection, Transaction, WriteGuard};
pub use log::{CollectionLog, LogEntry, WriteOp};

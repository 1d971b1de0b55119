//! Last-resort handling for storage writes that cannot be recovered
//! in-process (spec.md §4.2: a failed redo log write or fsync leaves the
//! in-memory world state and the durable log inconsistent with each
//! other, so the only safe move is to stop before anything else is
//! committed on top of it).
//!
//! Grounded on `database/utils/crash.rs::{DatabaseCrash, crash_database}`,
//! re-typed around `crate::error::Error` instead of the teacher's
//! `StorageError` since this crate has a single flattened error enum
//! rather than a separate storage-layer error type.

use std::process;

use thiserror::Error;

use crate::error::Error;

#[derive(Error, Debug)]
pub enum DatabaseCrash {
    #[error("inconsistent, uncommitted world state from a failed redo log write: {0}")]
    InconsistentUncommittedStateFromRedoWrite(Error),

    #[error("inconsistent world state from a failed redo log fsync: {0}")]
    InconsistentUncommittedStateFromRedoSync(Error),

    #[error("inconsistent storage from a failed checkpoint: {0}")]
    InconsistentStorageFromCheckpoint(Error),
}

/// Logs the fatal cause and exits the process. The redo log and the
/// in-memory state may now disagree about what is committed, so nothing
/// short of a restart-and-replay can be trusted; there is no return type
/// to propagate since there is no caller left to hand it to.
pub fn crash_database(reason: DatabaseCrash) -> ! {
    log::error!("database crash: {reason}");
    process::exit(0x0100);
}

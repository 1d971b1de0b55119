//! Durable byte sink the redo log and catalog snapshots are written
//! through.
//!
//! Kept close to `persistence/storage/{mod,file}.rs` in the teacher crate
//! (the trait shape and `FileStorage`'s `OpenOptions`/`sync_all` idiom),
//! narrowed to the file backend only -- the remote engines
//! (`s3`/`dynamodb`/`postgres`) the teacher registers behind this trait are
//! out of scope here (pluggable engine registration is an external
//! collaborator, spec.md §1) -- and re-typed around raw framed bytes
//! instead of newline-delimited JSON, since `redo_log.rs` owns framing now.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::PathBuf;

use crate::crash::{crash_database, DatabaseCrash};
use crate::error::Error;

pub trait Storage {
    fn init(&mut self) -> Result<(), Error>;
    fn reset_database(&mut self) -> Result<(), Error>;

    fn write_blob(&mut self, path: &str, bytes: &[u8]) -> Result<(), Error>;
    fn read_blob(&mut self, path: &str) -> Result<Option<Vec<u8>>, Error>;

    fn transaction_write(&mut self, frame: &[u8]);
    fn transaction_sync(&mut self);
    fn transaction_load(&mut self) -> Result<Vec<u8>, Error>;
    /// Rewrites the log so only bytes after a checkpoint covering
    /// `through_operation_id` remain (spec.md §4.2 compaction).
    fn transaction_truncate_through(&mut self, through_operation_id: u64);
}

pub struct FileStorage {
    base_path: PathBuf,
    log_file: File,
    log_path: PathBuf,
}

impl FileStorage {
    pub fn new(base_path: PathBuf) -> Result<Self, Error> {
        fs::create_dir_all(&base_path)
            .map_err(|e| Error::Internal(format!("cannot create {}: {e}", base_path.display())))?;

        let log_path = base_path.join("redo.log");
        let log_file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&log_path)
            .map_err(|e| Error::Internal(format!("cannot open redo log: {e}")))?;

        Ok(Self {
            base_path,
            log_file,
            log_path,
        })
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.base_path.join(path)
    }
}

impl Storage for FileStorage {
    fn init(&mut self) -> Result<(), Error> {
        fs::create_dir_all(&self.base_path)
            .map_err(|e| Error::Internal(format!("cannot create {}: {e}", self.base_path.display())))
    }

    fn reset_database(&mut self) -> Result<(), Error> {
        fs::remove_dir_all(&self.base_path)
            .map_err(|e| Error::Internal(format!("cannot remove {}: {e}", self.base_path.display())))?;
        self.init()?;

        self.log_file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&self.log_path)
            .map_err(|e| Error::Internal(format!("cannot reopen redo log: {e}")))?;

        Ok(())
    }

    fn write_blob(&mut self, path: &str, bytes: &[u8]) -> Result<(), Error> {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(self.resolve(path))
            .map_err(|e| Error::Internal(format!("cannot open {path}: {e}")))?;

        file.write_all(bytes)
            .map_err(|e| Error::Internal(format!("cannot write {path}: {e}")))?;
        file.sync_all()
            .map_err(|e| Error::Internal(format!("cannot fsync {path}: {e}")))
    }

    fn read_blob(&mut self, path: &str) -> Result<Option<Vec<u8>>, Error> {
        let mut file = match File::open(self.resolve(path)) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::Internal(format!("cannot open {path}: {e}"))),
        };

        let mut buf = Vec::new();
        file.read_to_end(&mut buf)
            .map_err(|e| Error::Internal(format!("cannot read {path}: {e}")))?;
        Ok(Some(buf))
    }

    fn transaction_write(&mut self, frame: &[u8]) {
        if let Err(e) = self.log_file.write_all(frame) {
            crash_database(DatabaseCrash::InconsistentUncommittedStateFromRedoWrite(
                Error::Internal(format!("redo log write failed: {e}")),
            ));
        }
    }

    fn transaction_sync(&mut self) {
        if let Err(e) = self.log_file.sync_all() {
            crash_database(DatabaseCrash::InconsistentUncommittedStateFromRedoSync(
                Error::Internal(format!("redo log fsync failed: {e}")),
            ));
        }
    }

    fn transaction_load(&mut self) -> Result<Vec<u8>, Error> {
        let mut file = OpenOptions::new()
            .read(true)
            .open(&self.log_path)
            .map_err(|e| Error::Internal(format!("cannot open redo log: {e}")))?;

        let mut buf = Vec::new();
        file.read_to_end(&mut buf)
            .map_err(|e| Error::Internal(format!("cannot read redo log: {e}")))?;
        Ok(buf)
    }

    /// Compaction is out of scope for the file backend's first cut: rather
    /// than rewrite the whole file in place, a checkpoint just records
    /// nothing and relies on `replay` being idempotent past the
    /// checkpoint. Real truncation would copy the tail past
    /// `through_operation_id` into a new file and rename it over the old
    /// one.
    fn transaction_truncate_through(&mut self, _through_operation_id: u64) {}
}

/// In-process backend for tests; no filesystem involved.
pub struct InMemoryStorage {
    blobs: std::collections::HashMap<String, Vec<u8>>,
    log: Vec<u8>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self {
            blobs: std::collections::HashMap::new(),
            log: Vec::new(),
        }
    }

    /// Test helper: truncates the in-memory log to exactly `len` bytes,
    /// simulating a crash mid-write of the last frame.
    pub fn corrupt_truncate_tail(&mut self, len: usize) {
        self.log.truncate(len);
    }
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl Storage for InMemoryStorage {
    fn init(&mut self) -> Result<(), Error> {
        Ok(())
    }

    fn reset_database(&mut self) -> Result<(), Error> {
        self.blobs.clear();
        self.log.clear();
        Ok(())
    }

    fn write_blob(&mut self, path: &str, bytes: &[u8]) -> Result<(), Error> {
        self.blobs.insert(path.to_string(), bytes.to_vec());
        Ok(())
    }

    fn read_blob(&mut self, path: &str) -> Result<Option<Vec<u8>>, Error> {
        Ok(self.blobs.get(path).cloned())
    }

    fn transaction_write(&mut self, frame: &[u8]) {
        self.log.extend_from_slice(frame);
    }

    fn transaction_sync(&mut self) {}

    fn transaction_load(&mut self) -> Result<Vec<u8>, Error> {
        Ok(self.log.clone())
    }

    fn transaction_truncate_through(&mut self, _through_operation_id: u64) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_write_read_blob_round_trips() {
        let mut storage = InMemoryStorage::new();
        storage.write_blob("meta", b"hello").unwrap();

        assert_eq!(storage.read_blob("meta").unwrap(), Some(b"hello".to_vec()));
    }

    #[test]
    fn in_memory_missing_blob_is_none() {
        let mut storage = InMemoryStorage::new();
        assert_eq!(storage.read_blob("missing").unwrap(), None);
    }

    #[test]
    fn in_memory_transaction_log_appends_and_loads() {
        let mut storage = InMemoryStorage::new();
        storage.transaction_write(b"abc");
        storage.transaction_write(b"def");

        assert_eq!(storage.transaction_load().unwrap(), b"abcdef".to_vec());
    }

    #[test]
    fn reset_database_clears_blobs_and_log() {
        let mut storage = InMemoryStorage::new();
        storage.write_blob("meta", b"x").unwrap();
        storage.transaction_write(b"y");

        storage.reset_database().unwrap();

        assert_eq!(storage.read_blob("meta").unwrap(), None);
        assert_eq!(storage.transaction_load().unwrap(), Vec::<u8>::new());
    }
}

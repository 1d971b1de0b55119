//! Per-connection session state: current transaction, auto-commit,
//! savepoints, and advisory table locks (spec.md §4.9).
//!
//! Grounded on `database/request_manager.rs::RequestManager`/
//! `database/commands.rs` for the command/response vocabulary (a session
//! issues the same `DatabaseCommand`-shaped requests the teacher's
//! request manager routes) and `database/database.rs::Database::
//! process_actions` for the commit/rollback driving loop, generalized
//! from "apply a batch of table mutations" to "begin/commit/rollback
//! against the transaction engine, with auto-commit toggling and
//! savepoints layered on top".

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use crate::error::Error;
use crate::transaction::Transaction;
use crate::transaction_engine::TransactionEngine;

/// Process-wide advisory table lock table (spec.md §4.9's supplemented
/// "`Session::lock_tables` ... consulted before DDL"). Kept as a plain
/// `Mutex<HashMap<..>>` rather than a lock-free map -- table DDL is rare
/// enough that contention here is not a concern, matching spec.md §4.8's
/// note that `LOCK_MODE` beyond table-level is a config knob, not a
/// feature to build out.
#[derive(Default)]
pub struct TableLockRegistry {
    holders: Mutex<HashMap<String, u64>>,
}

impl TableLockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// `true` if `session_id` now holds (or already held) the lock on
    /// `table`; `false` if another session holds it.
    pub fn try_lock(&self, table: &str, session_id: u64) -> bool {
        let mut holders = self.holders.lock().unwrap();
        match holders.get(table) {
            Some(holder) if *holder == session_id => true,
            Some(_) => false,
            None => {
                holders.insert(table.to_string(), session_id);
                true
            }
        }
    }

    pub fn unlock(&self, table: &str, session_id: u64) {
        let mut holders = self.holders.lock().unwrap();
        if holders.get(table) == Some(&session_id) {
            holders.remove(table);
        }
    }

    pub fn unlock_all(&self, session_id: u64) {
        self.holders.lock().unwrap().retain(|_, holder| *holder != session_id);
    }
}

pub struct PreparedCommand {
    pub sql: String,
    pub fetch_size: usize,
}

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

pub struct Session {
    pub id: u64,
    pub user: String,
    engine: Arc<TransactionEngine<Vec<u8>, Vec<u8>>>,
    table_locks: Arc<TableLockRegistry>,
    current_txn: RwLock<Option<Arc<Transaction<Vec<u8>, Vec<u8>>>>>,
    auto_commit: AtomicBool,
    savepoints: RwLock<Vec<(String, usize)>>,
    locked_tables: RwLock<std::collections::HashSet<String>>,
    cancelled: Arc<AtomicBool>,
}

impl Session {
    pub fn new(user: impl Into<String>, engine: Arc<TransactionEngine<Vec<u8>, Vec<u8>>>, table_locks: Arc<TableLockRegistry>) -> Self {
        Self {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            user: user.into(),
            engine,
            table_locks,
            current_txn: RwLock::new(None),
            auto_commit: AtomicBool::new(true),
            savepoints: RwLock::new(Vec::new()),
            locked_tables: RwLock::new(std::collections::HashSet::new()),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn prepare_command(&self, sql: impl Into<String>, fetch_size: usize) -> PreparedCommand {
        PreparedCommand {
            sql: sql.into(),
            fetch_size,
        }
    }

    /// The transaction backing statement execution, opening one lazily if
    /// none is active yet.
    pub fn current_transaction(&self) -> Arc<Transaction<Vec<u8>, Vec<u8>>> {
        if let Some(t) = self.current_txn.read().unwrap().as_ref() {
            return t.clone();
        }

        let mut guard = self.current_txn.write().unwrap();
        if let Some(t) = guard.as_ref() {
            return t.clone();
        }

        let t = self.engine.begin();
        *guard = Some(t.clone());
        t
    }

    pub fn has_open_transaction(&self) -> bool {
        self.current_txn.read().unwrap().is_some()
    }

    /// `commit(ddl, participants)`: for DDL the session flushes its
    /// current transaction before the caller executes the DDL statement
    /// (so the statement runs against a committed baseline); for DML the
    /// current transaction is committed directly (spec.md §4.9).
    pub fn commit(&self, ddl: bool, participants: Option<&[String]>) -> Result<(), Error> {
        if ddl {
            self.flush_transaction()?;
            return Ok(());
        }

        let t = match self.current_txn.write().unwrap().take() {
            Some(t) => t,
            None => return Ok(()),
        };

        if let Some(names) = participants {
            for name in names {
                self.engine.prepare(&t, name);
            }
        }

        self.engine.commit(&t)?;
        self.savepoints.write().unwrap().clear();
        self.table_locks.unlock_all(self.id);
        Ok(())
    }

    /// Commits whatever transaction is currently open, leaving the
    /// session with none -- the DDL half of `commit()`.
    fn flush_transaction(&self) -> Result<(), Error> {
        let t = match self.current_txn.write().unwrap().take() {
            Some(t) => t,
            None => return Ok(()),
        };

        self.engine.commit(&t)?;
        self.savepoints.write().unwrap().clear();
        self.table_locks.unlock_all(self.id);
        Ok(())
    }

    pub fn savepoint(&self, name: impl Into<String>) -> Result<(), Error> {
        let t = self.current_transaction();
        self.savepoints.write().unwrap().push((name.into(), t.savepoint()));
        Ok(())
    }

    /// `rollback[ToSavepoint](name?)`: delegates to the transaction
    /// engine (spec.md §4.9).
    pub fn rollback(&self, to_savepoint: Option<&str>) -> Result<(), Error> {
        let t = match self.current_txn.read().unwrap().clone() {
            Some(t) => t,
            None => return Ok(()),
        };

        match to_savepoint {
            Some(name) => {
                let mark = {
                    let savepoints = self.savepoints.read().unwrap();
                    savepoints
                        .iter()
                        .rev()
                        .find(|(n, _)| n == name)
                        .map(|(_, mark)| *mark)
                        .ok_or_else(|| Error::InvalidValue(format!("no such savepoint: {name}")))?
                };

                self.engine.rollback_to_savepoint(&t, mark)?;
                self.savepoints.write().unwrap().retain(|(n, _)| n != name);
            }
            None => {
                self.engine.rollback(&t)?;
                *self.current_txn.write().unwrap() = None;
                self.savepoints.write().unwrap().clear();
                self.table_locks.unlock_all(self.id);
            }
        }

        Ok(())
    }

    /// Toggling `true -> false` starts an implicit transaction lazily;
    /// `false -> true` commits any open one (spec.md §4.9).
    pub fn set_auto_commit(&self, enabled: bool) -> Result<(), Error> {
        let was_enabled = self.auto_commit.swap(enabled, Ordering::AcqRel);

        if !was_enabled && enabled {
            self.flush_transaction()?;
        } else if was_enabled && !enabled {
            self.current_transaction();
        }

        Ok(())
    }

    pub fn auto_commit(&self) -> bool {
        self.auto_commit.load(Ordering::Acquire)
    }

    pub fn lock_table(&self, table: &str) -> bool {
        let acquired = self.table_locks.try_lock(table, self.id);
        if acquired {
            self.locked_tables.write().unwrap().insert(table.to_string());
        }
        acquired
    }

    /// Cooperative cancellation: `cancel()` just flips a flag; long
    /// scans consult `is_cancelled()` at page boundaries (spec.md §4.9,
    /// §5).
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub fn reset_cancellation(&self) {
        self.cancelled.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineOptions;
    use crate::persistence::storage::InMemoryStorage;

    fn session() -> Session {
        let engine = TransactionEngine::open(&EngineOptions::new_test(), Box::new(InMemoryStorage::new())).unwrap();
        Session::new("alice", engine, Arc::new(TableLockRegistry::new()))
    }

    #[test]
    fn current_transaction_is_lazily_started_once() {
        let session = session();
        assert!(!session.has_open_transaction());

        let t1 = session.current_transaction();
        let t2 = session.current_transaction();
        assert_eq!(t1.id, t2.id);
    }

    #[test]
    fn commit_clears_the_current_transaction() {
        let session = session();
        session.current_transaction();
        assert!(session.has_open_transaction());

        session.commit(false, None).unwrap();
        assert!(!session.has_open_transaction());
    }

    #[test]
    fn set_auto_commit_false_then_true_commits_the_implicit_transaction() {
        let session = session();
        session.set_auto_commit(false).unwrap();
        assert!(session.has_open_transaction());

        session.set_auto_commit(true).unwrap();
        assert!(!session.has_open_transaction());
    }

    #[test]
    fn rollback_to_named_savepoint_keeps_transaction_open() {
        let session = session();
        session.current_transaction();
        session.savepoint("sp1").unwrap();

        session.rollback(Some("sp1")).unwrap();
        assert!(session.has_open_transaction());
    }

    #[test]
    fn full_rollback_clears_the_current_transaction() {
        let session = session();
        session.current_transaction();

        session.rollback(None).unwrap();
        assert!(!session.has_open_transaction());
    }

    #[test]
    fn table_lock_registry_is_exclusive_across_sessions() {
        let registry = TableLockRegistry::new();
        assert!(registry.try_lock("people", 1));
        assert!(!registry.try_lock("people", 2));
        assert!(registry.try_lock("people", 1));

        registry.unlock("people", 1);
        assert!(registry.try_lock("people", 2));
    }

    #[test]
    fn cancel_flag_round_trips() {
        let session = session();
        assert!(!session.is_cancelled());
        session.cancel();
        assert!(session.is_cancelled());
        session.reset_cancellation();
        assert!(!session.is_cancelled());
    }
}

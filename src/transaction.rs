//! Per-transaction state: id, logical log counter, ordered undo log, and
//! the set of storage maps it has touched (spec.md §3/§4.5).
//!
//! Grounded on `database/table/row.rs::PersonRow`'s append-only version
//! vector, reinterpreted as an undo log of `(mapName, key, old, new)`
//! records owned by the transaction instead of by each row -- the
//! per-transaction home for these records (rather than per-row) is what
//! spec.md §4.7's rollback algorithm needs, so a `rollback` call can walk
//! one ordered list instead of scanning every row a transaction touched.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::RwLock;

use crate::ids::{LogCounter, TransactionId};
use crate::versioned_value::VersionedValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Open,
    Committing,
    Committed,
    RolledBack,
}

/// `(mapName, key, oldValue, newValue)`, index position equals the
/// write's `logId` (spec.md §3).
pub struct UndoLogRecord<K, V> {
    pub map_name: String,
    pub key: K,
    pub old_value: VersionedValue<V>,
    pub new_value: VersionedValue<V>,
}

impl<K: Clone, V: Clone> Clone for UndoLogRecord<K, V> {
    fn clone(&self) -> Self {
        Self {
            map_name: self.map_name.clone(),
            key: self.key.clone(),
            old_value: self.old_value.clone(),
            new_value: self.new_value.clone(),
        }
    }
}

pub struct Transaction<K, V> {
    pub id: TransactionId,
    log_counter: AtomicU32,
    undo: RwLock<Vec<UndoLogRecord<K, V>>>,
    touched_maps: RwLock<HashSet<String>>,
    state: RwLock<TransactionState>,
}

impl<K: Clone, V: Clone> Transaction<K, V> {
    pub fn new(id: TransactionId) -> Self {
        Self {
            id,
            log_counter: AtomicU32::new(0),
            undo: RwLock::new(Vec::new()),
            touched_maps: RwLock::new(HashSet::new()),
            state: RwLock::new(TransactionState::Open),
        }
    }

    pub fn state(&self) -> TransactionState {
        *self.state.read().unwrap()
    }

    pub fn set_state(&self, state: TransactionState) {
        *self.state.write().unwrap() = state;
    }

    pub fn is_open(&self) -> bool {
        self.state() == TransactionState::Open
    }

    /// Current position in the undo log; also a savepoint marker (spec.md
    /// §4.5 `rollbackToSavepoint`).
    pub fn savepoint(&self) -> usize {
        self.log_counter.load(Ordering::Acquire) as usize
    }

    /// Appends an undo record and returns its `logId`, incrementing the
    /// per-transaction counter (spec.md §4.7 `trySet` step 2).
    pub fn log_undo(&self, map_name: &str, key: K, old_value: VersionedValue<V>, new_value: VersionedValue<V>) -> LogCounter {
        let mut undo = self.undo.write().unwrap();
        let log_id = LogCounter(undo.len() as u32);

        undo.push(UndoLogRecord {
            map_name: map_name.to_string(),
            key,
            old_value,
            new_value,
        });

        self.log_counter.store(undo.len() as u32, Ordering::Release);
        self.touched_maps.write().unwrap().insert(map_name.to_string());

        log_id
    }

    /// Removes the most recently appended undo record -- called when a
    /// `trySet` attempt loses its CAS race (spec.md §4.7 step 4).
    pub fn pop_undo(&self) {
        let mut undo = self.undo.write().unwrap();
        undo.pop();
        self.log_counter.store(undo.len() as u32, Ordering::Release);
    }

    pub fn undo_len(&self) -> usize {
        self.undo.read().unwrap().len()
    }

    pub fn undo_record_at(&self, log_id: LogCounter) -> Option<UndoLogRecord<K, V>>
    where
        K: Clone,
        V: Clone,
    {
        self.undo.read().unwrap().get(log_id.as_u32() as usize).cloned()
    }

    /// All undo records in append order -- walked in reverse by
    /// `rollback` (spec.md §4.5).
    pub fn undo_records(&self) -> Vec<UndoLogRecord<K, V>> {
        self.undo.read().unwrap().clone()
    }

    /// Drops every undo record with `logId >= from`, used by both
    /// `rollback` (from = 0) and `rollbackToSavepoint` (from = sp)
    /// (spec.md §4.5).
    pub fn truncate_undo_to(&self, from: usize) {
        let mut undo = self.undo.write().unwrap();
        undo.truncate(from);
        self.log_counter.store(undo.len() as u32, Ordering::Release);
    }

    pub fn touched_map_names(&self) -> Vec<String> {
        self.touched_maps.read().unwrap().iter().cloned().collect()
    }

    pub fn has_writes(&self) -> bool {
        self.undo_len() > 0
    }
}

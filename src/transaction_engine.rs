//! Allocates transaction ids, tracks open transactions, and drives
//! commit/rollback against the redo log and status cache (spec.md §4.5).
//!
//! Grounded on `database/database.rs::Database` (owns the mutate/commit/
//! rollback loop that every request flows through) and
//! `persistence/transaction.rs::LocalClock`, which is kept here (as
//! `ids::LocalClock`) and generalized to hand out both transaction ids and
//! operation ids from the same strictly-increasing counter.
//! `openTransactions` is a `crossbeam_skiplist::SkipMap<TransactionId,
//! Arc<Transaction<K, V>>>`, continuing the teacher's skiplist-for-
//! concurrent-maps idiom (`database/table/table.rs::PersonTable`).
//!
//! The storage substrate treats rows as opaque tuples (spec.md §1), so
//! this engine -- and every `StorageMap` it manages -- is instantiated
//! over `K = Vec<u8>` encoded keys and `V = Vec<u8>` serialized row
//! bytes; the SQL/catalog layer owns encoding.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crossbeam_skiplist::SkipMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::config::EngineOptions;
use crate::error::Error;
use crate::ids::{LocalClock, OperationId, TransactionId};
use crate::log_sync::LogSyncService;
use crate::persistence::storage::Storage;
use crate::redo_log::RedoLog;
use crate::status_cache::TransactionStatusCache;
use crate::storage_map::StorageMap;
use crate::transaction::{Transaction, TransactionState};
use crate::versioned_value::VersionedValue;

#[derive(Serialize, Deserialize)]
struct RedoWrite<K, V> {
    map_name: String,
    key: K,
    value: Option<V>,
}

#[derive(Serialize, Deserialize)]
struct RedoRecord<K, V> {
    tid: u64,
    writes: Vec<RedoWrite<K, V>>,
}

pub struct TransactionEngine<K, V> {
    clock: LocalClock,
    open_transactions: SkipMap<TransactionId, Arc<Transaction<K, V>>>,
    maps: RwLock<HashMap<String, Arc<StorageMap<K, V>>>>,
    prepared: RwLock<HashMap<String, TransactionId>>,
    redo: Arc<RedoLog>,
    log_sync: Arc<LogSyncService>,
    status_cache: TransactionStatusCache,
}

impl<K, V> TransactionEngine<K, V>
where
    K: Ord + Clone + Send + Sync + Serialize + DeserializeOwned + 'static,
    V: Clone + Send + Sync + Serialize + DeserializeOwned + PartialEq + 'static,
{
    /// Opens the engine against `storage`: validates the configuration
    /// (spec.md §9's documented incompatible combinations), then replays
    /// the redo log to rebuild committed state and advance the clock past
    /// the highest tid/operation id seen (spec.md §4.5).
    pub fn open(options: &EngineOptions, storage: Box<dyn Storage + Send>) -> Result<Arc<Self>, Error> {
        options.validate()?;
        log::info!("engine {} opening", options.instance_id);

        let redo = Arc::new(RedoLog::new(storage));
        let log_sync = LogSyncService::new(redo.clone(), options.sync_policy());

        let engine = Arc::new(Self {
            clock: LocalClock::new(),
            open_transactions: SkipMap::new(),
            maps: RwLock::new(HashMap::new()),
            prepared: RwLock::new(HashMap::new()),
            redo,
            log_sync,
            status_cache: TransactionStatusCache::new(options.status_cache_buckets, options.status_cache_bucket_size),
        });

        let replayed = engine.replay()?;
        log::info!("engine {} open, replayed {replayed} redo record(s)", options.instance_id);

        Ok(engine)
    }

    /// Rebuilds committed state from the redo log and advances the clock
    /// past the highest tid/operation id seen, so freshly allocated ids
    /// never collide with a recovered one (spec.md §4.5). Returns the
    /// number of redo records replayed, logged by `open` for operators.
    fn replay(&self) -> Result<usize, Error> {
        let mut highest = 0u64;
        let mut replayed = 0usize;

        self.redo.replay(|op_id, bytes| {
            if let Ok(record) = serde_json::from_slice::<RedoRecord<K, V>>(&bytes) {
                for write in record.writes {
                    let map = self.map_or_create(&write.map_name);
                    map.put(write.key, VersionedValue::committed(write.value));
                }
                if record.tid > highest {
                    highest = record.tid;
                }
                replayed += 1;
            }
            if op_id.as_u64() > highest {
                highest = op_id.as_u64();
            }
        })?;

        self.clock.advance_past(highest);
        Ok(replayed)
    }

    pub fn map_or_create(&self, name: &str) -> Arc<StorageMap<K, V>> {
        if let Some(map) = self.maps.read().unwrap().get(name) {
            return map.clone();
        }

        let mut maps = self.maps.write().unwrap();
        maps.entry(name.to_string())
            .or_insert_with(|| Arc::new(StorageMap::new(name)))
            .clone()
    }

    pub fn get_map(&self, name: &str) -> Option<Arc<StorageMap<K, V>>> {
        self.maps.read().unwrap().get(name).cloned()
    }

    pub fn remove_map(&self, name: &str) {
        self.maps.write().unwrap().remove(name);
    }

    pub fn lookup_open(&self, tid: TransactionId) -> Option<Arc<Transaction<K, V>>> {
        self.open_transactions.get(&tid).map(|e| e.value().clone())
    }

    pub fn status_cache(&self) -> &TransactionStatusCache {
        &self.status_cache
    }

    /// Creates an open transaction with an empty undo log (spec.md
    /// §4.5).
    pub fn begin(self: &Arc<Self>) -> Arc<Transaction<K, V>> {
        let tid = self.clock.next_transaction_id();
        let txn = Arc::new(Transaction::new(tid));
        self.open_transactions.insert(tid, txn.clone());
        txn
    }

    /// Commits `t`. Steps follow spec.md §4.5: a no-redo fast path for
    /// read-only transactions that still records a committed status (so
    /// `validate_transaction` agrees with it after the transaction
    /// leaves `open_transactions`), or for writers a redo record keyed by
    /// a freshly allocated operation id, a durability wait, then the
    /// in-place header rewrite that publishes the writes to future
    /// readers.
    pub fn commit(&self, t: &Arc<Transaction<K, V>>) -> Result<Option<OperationId>, Error> {
        if !t.has_writes() {
            let op_id = OperationId(self.clock.next_operation_id().as_u64().max(t.id.as_u64()));
            self.status_cache.set_committed(t.id, op_id.as_u64());
            t.set_state(TransactionState::Committed);
            self.open_transactions.remove(&t.id);
            return Ok(Some(op_id));
        }

        t.set_state(TransactionState::Committing);

        let undo_records = t.undo_records();
        let writes: Vec<RedoWrite<K, V>> = undo_records
            .iter()
            .map(|r| RedoWrite {
                map_name: r.map_name.clone(),
                key: r.key.clone(),
                value: r.new_value.payload.clone(),
            })
            .collect();

        let op_id = OperationId(self.clock.next_operation_id().as_u64().max(t.id.as_u64()));
        let record = RedoRecord {
            tid: t.id.as_u64(),
            writes,
        };
        let bytes = serde_json::to_vec(&record)
            .map_err(|e| Error::Internal(format!("failed to encode redo record: {e}")))?;

        self.redo.append(op_id, bytes);
        self.log_sync.maybe_wait_for_sync(op_id)?;

        for record in &undo_records {
            if let Some(map) = self.get_map(&record.map_name) {
                let committed = VersionedValue::committed(record.new_value.payload.clone());
                map.replace(&record.key, &record.new_value, committed);
            }
        }

        self.status_cache.set_committed(t.id, op_id.as_u64());
        t.set_state(TransactionState::Committed);
        self.open_transactions.remove(&t.id);

        Ok(Some(op_id))
    }

    /// Walks `t.undo` in reverse, restoring `oldValue` wherever the
    /// stored value still matches `(t.tid, logId, newValue)`. A record
    /// whose stored value no longer matches is skipped -- per spec.md
    /// §4.5 this can only happen if the database is already corrupt, so
    /// the rollback still proceeds but returns `TRANSACTION_CORRUPT`
    /// once done.
    pub fn rollback(&self, t: &Arc<Transaction<K, V>>) -> Result<(), Error> {
        let mut corrupt = false;

        for record in t.undo_records().into_iter().rev() {
            if let Some(map) = self.get_map(&record.map_name) {
                if !map.replace(&record.key, &record.new_value, record.old_value.clone()) {
                    corrupt = true;
                }
            }
        }

        t.truncate_undo_to(0);
        self.status_cache.set_not_committed(t.id);
        t.set_state(TransactionState::RolledBack);
        self.open_transactions.remove(&t.id);

        if corrupt {
            log::error!("transaction {} rolled back over a corrupted undo chain", t.id);
            Err(Error::TransactionCorrupt(t.id))
        } else {
            Ok(())
        }
    }

    /// Unwinds undo entries with `logId >= sp`, leaving `t` open (spec.md
    /// §4.5).
    pub fn rollback_to_savepoint(&self, t: &Arc<Transaction<K, V>>, sp: usize) -> Result<(), Error> {
        let mut corrupt = false;

        for record in t.undo_records().into_iter().skip(sp).rev() {
            if let Some(map) = self.get_map(&record.map_name) {
                if !map.replace(&record.key, &record.new_value, record.old_value.clone()) {
                    corrupt = true;
                }
            }
        }

        t.truncate_undo_to(sp);

        if corrupt {
            Err(Error::TransactionCorrupt(t.id))
        } else {
            Ok(())
        }
    }

    /// Records a stable marker so a two-phase-commit coordinator can
    /// later call `validate_transaction` (spec.md §4.5).
    pub fn prepare(&self, t: &Arc<Transaction<K, V>>, participant_name: &str) {
        self.prepared.write().unwrap().insert(participant_name.to_string(), t.id);
    }

    /// Answers whether the named transaction has been promised
    /// commitable: it was prepared, and has not since rolled back.
    pub fn validate_transaction(&self, participant_name: &str) -> bool {
        let Some(tid) = self.prepared.read().unwrap().get(participant_name).copied() else {
            return false;
        };

        match self.status_cache.is_committed(tid) {
            Some(committed) => committed,
            None => self.lookup_open(tid).is_some(),
        }
    }

    pub fn shutdown(&self) {
        log::info!("engine shutting down, {} open transaction(s) abandoned", self.open_transactions.len());
        self.log_sync.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::storage::InMemoryStorage;

    fn engine() -> Arc<TransactionEngine<Vec<u8>, Vec<u8>>> {
        TransactionEngine::open(&EngineOptions::new_test(), Box::new(InMemoryStorage::new())).unwrap()
    }

    #[test]
    fn begin_allocates_strictly_increasing_transaction_ids() {
        let engine = engine();
        let t1 = engine.begin();
        let t2 = engine.begin();
        assert!(t2.id.as_u64() > t1.id.as_u64());
    }

    #[test]
    fn commit_with_no_writes_is_a_fast_noop_but_still_marks_committed() {
        let engine = engine();
        let t = engine.begin();

        let op_id = engine.commit(&t).unwrap();
        assert!(op_id.is_some(), "a no-write commit still needs a status-cache entry to validate against");
        assert!(engine.lookup_open(t.id).is_none());
        assert_eq!(engine.status_cache().is_committed(t.id), Some(true));
    }

    #[test]
    fn commit_publishes_writes_and_updates_status_cache() {
        let engine = engine();
        let map = engine.map_or_create("t");
        let t = engine.begin();

        let new_value = VersionedValue::uncommitted(t.id, crate::ids::LogCounter(0), Some(b"v".to_vec()));
        map.put(b"k".to_vec(), new_value.clone());
        t.log_undo("t", b"k".to_vec(), VersionedValue::committed(None), new_value);

        let op_id = engine.commit(&t).unwrap().unwrap();

        let stored = map.get(&b"k".to_vec()).unwrap();
        assert!(stored.is_committed());
        assert_eq!(stored.payload, Some(b"v".to_vec()));
        assert_eq!(engine.status_cache().get(t.id), Some(op_id.as_u64() as i64));
    }

    #[test]
    fn rollback_restores_old_value_and_marks_not_committed() {
        let engine = engine();
        let map = engine.map_or_create("t");
        let t = engine.begin();

        let old_value = VersionedValue::committed(Some(b"old".to_vec()));
        map.put(b"k".to_vec(), old_value.clone());

        let new_value = VersionedValue::uncommitted(t.id, crate::ids::LogCounter(0), Some(b"new".to_vec()));
        map.put(b"k".to_vec(), new_value.clone());
        t.log_undo("t", b"k".to_vec(), old_value.clone(), new_value);

        engine.rollback(&t).unwrap();

        assert_eq!(map.get(&b"k".to_vec()), Some(old_value));
        assert_eq!(engine.status_cache().is_committed(t.id), Some(false));
    }

    #[test]
    fn rollback_to_savepoint_leaves_transaction_open() {
        let engine = engine();
        let map = engine.map_or_create("t");
        let t = engine.begin();

        let v1 = VersionedValue::uncommitted(t.id, crate::ids::LogCounter(0), Some(b"1".to_vec()));
        map.put(b"a".to_vec(), v1.clone());
        t.log_undo("t", b"a".to_vec(), VersionedValue::committed(None), v1);

        let sp = t.savepoint();

        let v2 = VersionedValue::uncommitted(t.id, crate::ids::LogCounter(1), Some(b"2".to_vec()));
        map.put(b"b".to_vec(), v2.clone());
        t.log_undo("t", b"b".to_vec(), VersionedValue::committed(None), v2);

        engine.rollback_to_savepoint(&t, sp).unwrap();

        assert_eq!(map.get(&b"b".to_vec()), Some(VersionedValue::committed(None)));
        assert!(t.is_open());
        assert!(engine.lookup_open(t.id).is_some());
    }

    #[test]
    fn prepare_then_validate_transaction_reports_promise() {
        let engine = engine();
        let t = engine.begin();

        assert!(!engine.validate_transaction("participant-a"));

        engine.prepare(&t, "participant-a");
        assert!(engine.validate_transaction("participant-a"));

        engine.commit(&t).unwrap();
        assert!(engine.validate_transaction("participant-a"));
    }

    #[test_log::test]
    fn recovery_replays_committed_writes_after_restart() {
        let storage = InMemoryStorage::new();

        let engine = TransactionEngine::<Vec<u8>, Vec<u8>>::open(&EngineOptions::new_test(), Box::new(storage)).unwrap();
        let map = engine.map_or_create("t");
        let t = engine.begin();
        let v = VersionedValue::uncommitted(t.id, crate::ids::LogCounter(0), Some(b"42".to_vec()));
        map.put(b"d".to_vec(), v.clone());
        t.log_undo("t", b"d".to_vec(), VersionedValue::committed(None), v);
        engine.commit(&t).unwrap();

        // Simulate restart against the same bytes: a fresh InMemoryStorage
        // seeded with the same redo log content stands in for reopening
        // the same file.
        let mut replay_storage = InMemoryStorage::new();
        let persisted = {
            let log = &engine.redo;
            log.save();
            log.replay(|_, _| {}).unwrap();
            log
        };
        let mut bytes_seen = vec![];
        persisted.replay(|id, b| bytes_seen.push((id, b))).unwrap();
        for (id, b) in bytes_seen {
            replay_storage.transaction_write(&{
                let mut frame = Vec::new();
                let body_len = (8 + b.len()) as u32;
                frame.extend_from_slice(&body_len.to_le_bytes());
                frame.extend_from_slice(&id.as_u64().to_le_bytes());
                frame.extend_from_slice(&b);
                frame
            });
        }

        let reopened = TransactionEngine::<Vec<u8>, Vec<u8>>::open(&EngineOptions::new_test(), Box::new(replay_storage)).unwrap();
        let reopened_map = reopened.map_or_create("t");
        assert_eq!(reopened_map.get(&b"d".to_vec()).unwrap().payload, Some(b"42".to_vec()));
    }
}

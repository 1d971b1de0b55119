//! The visibility and conflict engine built on top of `StorageMap`
//! (spec.md §4.7).
//!
//! Grounded in `database/table/table.rs::PersonTable::{apply,
//! apply_rollback}` -- the same "verify the precondition, apply the
//! mutation, clean up on failure" shape -- and `database/table/row.rs`'s
//! per-row version chase, generalized here from "walk this row's version
//! vector" to "chase the undo chain of the open transaction that wrote
//! the current raw value".

use std::collections::HashMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Error;
use crate::ids::{LogCounter, TransactionId};
use crate::storage_map::StorageMap;
use crate::transaction::Transaction;
use crate::transaction_engine::TransactionEngine;
use crate::versioned_value::VersionedValue;

const MAX_TRYSET_ATTEMPTS: u32 = 1000;

pub struct MVCCTransactionMap<K, V> {
    raw: Arc<StorageMap<K, V>>,
    engine: Arc<TransactionEngine<K, V>>,
}

impl<K, V> MVCCTransactionMap<K, V>
where
    K: Ord + Clone + Send + Sync + Serialize + DeserializeOwned + 'static,
    V: Clone + Send + Sync + Serialize + DeserializeOwned + PartialEq + 'static,
{
    pub fn new(name: &str, engine: Arc<TransactionEngine<K, V>>) -> Self {
        let raw = engine.map_or_create(name);
        Self { raw, engine }
    }

    pub fn name(&self) -> &str {
        self.raw.name()
    }

    /// Resolves the value visible to `t` at key `k` (spec.md §4.7 "Value
    /// resolution"). Chases the undo chain of whichever open transaction
    /// currently owns the raw entry, back past every concurrent
    /// uncommitted writer, to emulate snapshot isolation relative to
    /// `t`'s start.
    #[tracing::instrument(level = "trace", skip_all)]
    pub fn get(&self, t: &Arc<Transaction<K, V>>, k: &K) -> Result<Option<V>, Error> {
        let mut current = match self.raw.get(k) {
            None => return Ok(None),
            Some(d) => d,
        };

        loop {
            if current.is_committed() {
                return Ok(current.payload);
            }

            if current.owned_by(t.id) {
                return Ok(current.payload);
            }

            match self.engine.lookup_open(current.tid) {
                Some(owner) => {
                    let record = owner
                        .undo_record_at(current.log_id)
                        .ok_or(Error::TransactionCorrupt(current.tid))?;
                    current = record.old_value;
                }
                None => {
                    let fresh = self.raw.get(k);
                    if fresh.as_ref() == Some(&current) {
                        return Err(Error::TransactionCorrupt(current.tid));
                    }
                    current = match fresh {
                        None => return Ok(None),
                        Some(d) => d,
                    };
                }
            }
        }
    }

    /// Attempts to write `v` at `k` under `t` (spec.md §4.7 "Conditional
    /// write"). Returns whether the atomic store succeeded; on failure
    /// the undo record just appended is popped back off.
    pub fn try_set(&self, t: &Arc<Transaction<K, V>>, k: &K, v: Option<V>) -> bool {
        let current = self.raw.get(k);
        let log_id = LogCounter(t.undo_len() as u32);
        let new_value = VersionedValue::uncommitted(t.id, log_id, v);

        let old_for_undo = current.clone().unwrap_or_else(|| VersionedValue::committed(None));
        t.log_undo(self.name(), k.clone(), old_for_undo, new_value.clone());

        let succeeded = match &current {
            None => self.raw.put_if_absent(k.clone(), new_value).is_none(),
            Some(c) if c.is_committed() || c.owned_by(t.id) => self.raw.replace(k, c, new_value),
            Some(_) => false,
        };

        if !succeeded {
            t.pop_undo();
        }

        succeeded
    }

    /// Bounded-retry wrapper around `try_set` for a non-null write
    /// (spec.md §4.7: "`put`/`remove` wrap `trySet` in a bounded retry
    /// loop and raise a lock-timeout error on exhaustion").
    pub fn put(&self, t: &Arc<Transaction<K, V>>, k: K, v: V) -> Result<(), Error> {
        self.retry_try_set(t, k, Some(v))
    }

    pub fn remove(&self, t: &Arc<Transaction<K, V>>, k: K) -> Result<(), Error> {
        self.retry_try_set(t, k, None)
    }

    /// Bounded retry with back-off (spec.md §5: "a write may block
    /// awaiting a conflicting row (bounded retry with back-off then
    /// `LOCK_TIMEOUT`)"). The back-off is jittered so that two
    /// transactions contending for the same row don't retry in lockstep.
    fn retry_try_set(&self, t: &Arc<Transaction<K, V>>, k: K, v: Option<V>) -> Result<(), Error> {
        use rand::Rng;

        for attempt in 0..MAX_TRYSET_ATTEMPTS {
            if self.try_set(t, &k, v.clone()) {
                return Ok(());
            }

            if attempt > 0 {
                let backoff_micros = rand::thread_rng().gen_range(10..=100u64);
                std::thread::sleep(std::time::Duration::from_micros(backoff_micros));
            }
        }

        let holder = self.raw.get(&k).map(|d| d.tid).unwrap_or(TransactionId::NONE);
        Err(Error::LockTimeout {
            waiter: t.id,
            holder,
        })
    }

    /// Visible-rows cursor (spec.md §4.7 "Iteration"). Wraps the raw
    /// cursor, resolving each entry through `get`'s chase algorithm and
    /// skipping absent/tombstone rows; on `ChunkNotFound` re-seeks from
    /// the last emitted key and retries once.
    pub fn cursor<'a>(&'a self, t: &'a Arc<Transaction<K, V>>, from_key: Option<K>) -> MVCCCursor<'a, K, V> {
        MVCCCursor {
            map: self,
            t,
            inner: self.raw.cursor(from_key),
            last_emitted: None,
        }
    }

    /// Approximates the visible row count (spec.md §4.7 "Size
    /// estimation"). If the open transactions' combined undo-log size is
    /// no larger than the raw map, walks those undo logs for this map's
    /// deletions instead of a full scan.
    pub fn size_as_long(&self, open_txns: &[Arc<Transaction<K, V>>]) -> u64 {
        let raw_size = self.raw.size_as_long();
        let undo_total: usize = open_txns.iter().map(|t| t.undo_len()).sum();

        if undo_total as u64 <= raw_size {
            let mut deleted_keys: HashMap<K, ()> = HashMap::new();

            for txn in open_txns {
                for record in txn.undo_records() {
                    if record.map_name != self.name() {
                        continue;
                    }
                    if self.get(txn, &record.key).ok().flatten().is_none() {
                        deleted_keys.insert(record.key, ());
                    }
                }
            }

            raw_size.saturating_sub(deleted_keys.len() as u64)
        } else {
            let mut count = 0u64;
            let mut cursor = self.cursor(&open_txns[0].clone(), None);
            while cursor.next().ok().flatten().is_some() {
                count += 1;
            }
            count
        }
    }

    pub fn first_key(&self, t: &Arc<Transaction<K, V>>) -> Option<K> {
        let first = self.raw.first_key()?;
        if self.get(t, &first).ok().flatten().is_some() {
            Some(first)
        } else {
            self.higher_visible_key(t, &first)
        }
    }

    pub fn last_key(&self, t: &Arc<Transaction<K, V>>) -> Option<K> {
        let mut candidate = self.raw.last_key()?;
        loop {
            if self.get(t, &candidate).ok().flatten().is_some() {
                return Some(candidate);
            }
            candidate = self.raw.lower_key(&candidate)?;
        }
    }

    pub fn lower_key(&self, t: &Arc<Transaction<K, V>>, key: &K) -> Option<K> {
        let mut candidate = self.raw.lower_key(key)?;
        loop {
            if self.get(t, &candidate).ok().flatten().is_some() {
                return Some(candidate);
            }
            candidate = self.raw.lower_key(&candidate)?;
        }
    }

    pub fn floor_key(&self, t: &Arc<Transaction<K, V>>, key: &K) -> Option<K> {
        let mut candidate = self.raw.floor_key(key)?;
        loop {
            if self.get(t, &candidate).ok().flatten().is_some() {
                return Some(candidate);
            }
            candidate = self.raw.lower_key(&candidate)?;
        }
    }

    pub fn ceiling_key(&self, t: &Arc<Transaction<K, V>>, key: &K) -> Option<K> {
        let mut candidate = self.raw.ceiling_key(key)?;
        loop {
            if self.get(t, &candidate).ok().flatten().is_some() {
                return Some(candidate);
            }
            candidate = self.raw.higher_key(&candidate)?;
        }
    }

    fn higher_visible_key(&self, t: &Arc<Transaction<K, V>>, key: &K) -> Option<K> {
        let mut candidate = self.raw.higher_key(key)?;
        loop {
            if self.get(t, &candidate).ok().flatten().is_some() {
                return Some(candidate);
            }
            candidate = self.raw.higher_key(&candidate)?;
        }
    }

    /// Approximate: does not filter for visibility (spec.md §4.7 "Other
    /// boundary operations" -- an explicit Open Question resolved in
    /// favor of matching the documented source behavior).
    pub fn higher_key(&self, key: &K) -> Option<K> {
        self.raw.higher_key(key)
    }
}

pub struct MVCCCursor<'a, K, V> {
    map: &'a MVCCTransactionMap<K, V>,
    t: &'a Arc<Transaction<K, V>>,
    inner: crate::storage_map::StorageCursor<'a, K, V>,
    last_emitted: Option<K>,
}

impl<'a, K, V> MVCCCursor<'a, K, V>
where
    K: Ord + Clone + Send + Sync + Serialize + DeserializeOwned + 'static,
    V: Clone + Send + Sync + Serialize + DeserializeOwned + PartialEq + 'static,
{
    pub fn next(&mut self) -> Result<Option<(K, V)>, Error> {
        loop {
            let entry = match self.inner.next() {
                Ok(entry) => entry,
                Err(e) if e.is_retryable_cursor_error() => {
                    self.inner = self.map.raw.cursor(self.last_emitted.clone());
                    self.inner.reseek();
                    continue;
                }
                Err(e) => return Err(e),
            };

            let (k, _raw) = match entry {
                None => return Ok(None),
                Some(pair) => pair,
            };

            self.last_emitted = Some(k.clone());

            if let Some(payload) = self.map.get(self.t, &k)? {
                return Ok(Some((k, payload)));
            }
        }
    }
}

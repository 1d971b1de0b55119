//! The concrete, key-ordered container MVCC is built on top of.
//!
//! Grounded directly on `database/table/table.rs::PersonTable` in the
//! teacher crate, which holds `SkipMap<EntityId, RwLock<PersonRow>>` --
//! the same per-key `RwLock` granularity is kept here, generalized from a
//! `PersonRow` version-vector to the generic `VersionedValue<V>` the spec
//! calls for, with explicit CAS operations instead of the teacher's
//! "lock the row, mutate in place" helpers.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::RwLock;

use crossbeam_skiplist::SkipMap;

use crate::error::Error;
use crate::versioned_value::VersionedValue;

/// A restartable cursor over a `StorageMap`.
///
/// Tolerant to the map's backing chunk being rewritten mid-scan: if the
/// map is compacted while this cursor is alive, the next call to
/// `next()` returns `Error::ChunkNotFound` carrying the last key it
/// yielded, and the caller (the MVCC layer) re-seeks from there
/// (spec.md §4.6).
pub struct StorageCursor<'a, K, V> {
    map: &'a StorageMap<K, V>,
    last_key: Option<K>,
    seen_generation: u64,
    started: bool,
}

impl<'a, K, V> StorageCursor<'a, K, V>
where
    K: Ord + Clone + Send + 'static,
    V: Clone + Send + 'static,
{
    fn new(map: &'a StorageMap<K, V>, from_key: Option<K>) -> Self {
        Self {
            map,
            last_key: from_key,
            seen_generation: map.generation.load(Ordering::Acquire),
            started: false,
        }
    }

    /// Re-seeks from the last emitted key, skipping the duplicate entry
    /// that key itself represents. Called by the MVCC layer when it
    /// catches `Error::ChunkNotFound`.
    pub fn reseek(&mut self) {
        self.seen_generation = self.map.generation.load(Ordering::Acquire);
    }

    pub fn next(&mut self) -> Result<Option<(K, VersionedValue<V>)>, Error> {
        if self.map.generation.load(Ordering::Acquire) != self.seen_generation {
            return Err(Error::ChunkNotFound(Vec::new()));
        }

        let entry = match (&self.last_key, self.started) {
            (None, false) => self.map.inner.front(),
            (Some(k), _) => {
                let mut range = self.map.inner.range((
                    std::ops::Bound::Excluded(k.clone()),
                    std::ops::Bound::Unbounded,
                ));
                range.next()
            }
            (None, true) => None,
        };

        self.started = true;

        match entry {
            Some(entry) => {
                let key = entry.key().clone();
                let value = entry.value().read().unwrap().clone();
                self.last_key = Some(key.clone());
                Ok(Some((key, value)))
            }
            None => Ok(None),
        }
    }
}

pub struct StorageMap<K, V> {
    name: String,
    inner: SkipMap<K, RwLock<VersionedValue<V>>>,
    /// Bumped whenever the map's backing storage is rewritten out from
    /// under a live cursor (compaction, restore). A real page-based
    /// engine bumps this on chunk remap; this in-memory map bumps it on
    /// `compact()`/`restore()` so the MVCC cursor's retry path is
    /// actually exercised rather than dead code.
    generation: AtomicU64,
}

impl<K, V> StorageMap<K, V>
where
    K: Ord + Clone + Send + 'static,
    V: Clone + Send + 'static,
{
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: SkipMap::new(),
            generation: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self, key: &K) -> Option<VersionedValue<V>> {
        self.inner.get(key).map(|e| e.value().read().unwrap().clone())
    }

    /// Unconditional write; returns the previous value, if any.
    pub fn put(&self, key: K, value: VersionedValue<V>) -> Option<VersionedValue<V>> {
        let previous = self.get(&key);

        match self.inner.get(&key) {
            Some(entry) => {
                *entry.value().write().unwrap() = value;
            }
            None => {
                self.inner.insert(key, RwLock::new(value));
            }
        }

        previous
    }

    /// Write only if absent; atomic with respect to concurrent writers
    /// because the whole check-then-act happens while the skiplist entry
    /// API holds the key's slot. `get_or_insert_with`'s closure runs iff
    /// this call is the one that inserted the entry, so that is used as
    /// the atomic "did we just insert" signal instead of re-reading.
    pub fn put_if_absent(&self, key: K, value: VersionedValue<V>) -> Option<VersionedValue<V>> {
        let inserted = std::sync::Arc::new(AtomicBool::new(false));
        let inserted_flag = inserted.clone();

        let entry = self
            .inner
            .get_or_insert_with(key, move || {
                inserted_flag.store(true, Ordering::Release);
                RwLock::new(value)
            });

        if inserted.load(Ordering::Acquire) {
            None
        } else {
            Some(entry.value().read().unwrap().clone())
        }
    }

    /// Compare-and-set: replaces the stored value with `new` iff the
    /// current value equals `expected`. Returns whether the swap
    /// happened.
    pub fn replace(&self, key: &K, expected: &VersionedValue<V>, new: VersionedValue<V>) -> bool
    where
        V: PartialEq,
    {
        match self.inner.get(key) {
            Some(entry) => {
                let mut guard = entry.value().write().unwrap();
                if *guard == *expected {
                    *guard = new;
                    true
                } else {
                    false
                }
            }
            None => false,
        }
    }

    pub fn remove(&self, key: &K) -> Option<VersionedValue<V>> {
        self.inner.remove(key).map(|e| e.value().read().unwrap().clone())
    }

    pub fn first_key(&self) -> Option<K> {
        self.inner.front().map(|e| e.key().clone())
    }

    pub fn last_key(&self) -> Option<K> {
        self.inner.back().map(|e| e.key().clone())
    }

    pub fn lower_key(&self, key: &K) -> Option<K> {
        self.inner
            .range((std::ops::Bound::Unbounded, std::ops::Bound::Excluded(key.clone())))
            .next_back()
            .map(|e| e.key().clone())
    }

    pub fn floor_key(&self, key: &K) -> Option<K> {
        self.inner
            .range((std::ops::Bound::Unbounded, std::ops::Bound::Included(key.clone())))
            .next_back()
            .map(|e| e.key().clone())
    }

    pub fn higher_key(&self, key: &K) -> Option<K> {
        self.inner
            .range((std::ops::Bound::Excluded(key.clone()), std::ops::Bound::Unbounded))
            .next()
            .map(|e| e.key().clone())
    }

    pub fn ceiling_key(&self, key: &K) -> Option<K> {
        self.inner
            .range((std::ops::Bound::Included(key.clone()), std::ops::Bound::Unbounded))
            .next()
            .map(|e| e.key().clone())
    }

    pub fn cursor(&self, from_key: Option<K>) -> StorageCursor<'_, K, V> {
        StorageCursor::new(self, from_key)
    }

    /// Approximate; includes uncommitted entries (spec.md §4.6).
    pub fn size_as_long(&self) -> u64 {
        self.inner.len() as u64
    }

    /// Used by compaction/restore to signal live cursors that the
    /// backing structure moved out from under them.
    pub fn bump_generation(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    pub fn clear(&self) {
        for entry in self.inner.iter() {
            entry.remove();
        }
        self.bump_generation();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{LogCounter, TransactionId};

    fn vv(payload: &str) -> VersionedValue<String> {
        VersionedValue::committed(Some(payload.to_string()))
    }

    #[test]
    fn put_then_get_round_trips() {
        let map: StorageMap<String, String> = StorageMap::new("t");

        map.put("a".to_string(), vv("1"));

        assert_eq!(map.get(&"a".to_string()), Some(vv("1")));
    }

    #[test]
    fn put_if_absent_does_not_overwrite() {
        let map: StorageMap<String, String> = StorageMap::new("t");

        let first = map.put_if_absent("a".to_string(), vv("1"));
        assert_eq!(first, None);

        let second = map.put_if_absent("a".to_string(), vv("2"));
        assert_eq!(second, Some(vv("1")));
        assert_eq!(map.get(&"a".to_string()), Some(vv("1")));
    }

    #[test]
    fn replace_requires_matching_expected() {
        let map: StorageMap<String, String> = StorageMap::new("t");
        map.put("a".to_string(), vv("1"));

        let wrong_expected = vv("not-current");
        assert!(!map.replace(&"a".to_string(), &wrong_expected, vv("2")));
        assert_eq!(map.get(&"a".to_string()), Some(vv("1")));

        let right_expected = vv("1");
        assert!(map.replace(&"a".to_string(), &right_expected, vv("2")));
        assert_eq!(map.get(&"a".to_string()), Some(vv("2")));
    }

    #[test]
    fn navigation_methods_walk_raw_keys() {
        let map: StorageMap<i32, String> = StorageMap::new("t");
        for k in [1, 3, 5, 7] {
            map.put(k, vv("x"));
        }

        assert_eq!(map.first_key(), Some(1));
        assert_eq!(map.last_key(), Some(7));
        assert_eq!(map.lower_key(&5), Some(3));
        assert_eq!(map.floor_key(&5), Some(5));
        assert_eq!(map.higher_key(&5), Some(7));
        assert_eq!(map.ceiling_key(&5), Some(5));
        assert_eq!(map.ceiling_key(&4), Some(5));
    }

    #[test]
    fn cursor_yields_in_key_order() {
        let map: StorageMap<i32, String> = StorageMap::new("t");
        for k in [3, 1, 2] {
            map.put(k, vv("x"));
        }

        let mut cursor = map.cursor(None);
        let mut seen = vec![];
        while let Some((k, _)) = cursor.next().unwrap() {
            seen.push(k);
        }

        assert_eq!(seen, vec![1, 2, 3]);
    }

    #[test]
    fn cursor_signals_chunk_not_found_after_compaction_and_resumes() {
        let map: StorageMap<i32, String> = StorageMap::new("t");
        for k in [1, 2, 3] {
            map.put(k, vv("x"));
        }

        let mut cursor = map.cursor(None);
        assert_eq!(cursor.next().unwrap(), Some((1, vv("x"))));

        map.bump_generation();

        let err = cursor.next().unwrap_err();
        assert!(err.is_retryable_cursor_error());

        cursor.reseek();
        assert_eq!(cursor.next().unwrap(), Some((2, vv("x"))));
        assert_eq!(cursor.next().unwrap(), Some((3, vv("x"))));
        assert_eq!(cursor.next().unwrap(), None);
    }

    #[test]
    fn remove_returns_previous_value() {
        let map: StorageMap<String, String> = StorageMap::new("t");
        map.put("a".to_string(), vv("1"));

        assert_eq!(map.remove(&"a".to_string()), Some(vv("1")));
        assert_eq!(map.get(&"a".to_string()), None);
    }

    #[test]
    fn size_as_long_counts_raw_entries() {
        let map: StorageMap<i32, String> = StorageMap::new("t");
        assert_eq!(map.size_as_long(), 0);

        map.put(1, vv("x"));
        map.put(2, vv("x"));

        assert_eq!(map.size_as_long(), 2);
    }
}

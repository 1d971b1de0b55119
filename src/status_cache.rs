//! Maps a transaction id to its outcome without walking the transaction
//! table itself, so `MVCCTransactionMap` reads don't contend with the
//! open-transaction skiplist on the hot path.
//!
//! No direct teacher analogue -- `PersonTable` visibility checks go
//! straight at the row's version vector. Grounded on the teacher's general
//! per-shard `RwLock` sharding idiom (seen in `request_manager.rs`'s
//! sender-selection-by-shard), applied here to spec.md §4.4's two-level
//! bucketed array.

use std::sync::RwLock;

use crate::ids::TransactionId;

/// Slot has never been written.
const UNKNOWN: i64 = -1;
/// Slot was written, but the transaction rolled back (or its commit
/// record aged out of retention).
const NOT_COMMITTED: i64 = -2;

pub struct TransactionStatusCache {
    buckets: Vec<RwLock<Vec<i64>>>,
    bucket_count: u64,
    bucket_size: u64,
}

impl TransactionStatusCache {
    /// `bucket_count` and `bucket_size` should each be a power of two
    /// (spec.md §4.4 defaults: 2^15 buckets x 2^14 slots); not enforced,
    /// since the mapping is correct for any positive value, just denser.
    pub fn new(bucket_count: u64, bucket_size: u64) -> Self {
        assert!(bucket_count > 0 && bucket_size > 0);

        let buckets = (0..bucket_count)
            .map(|_| RwLock::new(vec![UNKNOWN; bucket_size as usize]))
            .collect();

        Self {
            buckets,
            bucket_count,
            bucket_size,
        }
    }

    fn locate(&self, tid: TransactionId) -> (usize, usize) {
        let tid = tid.as_u64();
        let bucket = (tid / self.bucket_size) % self.bucket_count;
        let slot = tid % self.bucket_size;
        (bucket as usize, slot as usize)
    }

    /// Records that `tid` committed at `commit_ts` (spec.md §4.5 step 6).
    pub fn set_committed(&self, tid: TransactionId, commit_ts: u64) {
        let (bucket, slot) = self.locate(tid);
        self.buckets[bucket].write().unwrap()[slot] = commit_ts as i64;
    }

    /// Records that `tid` rolled back (spec.md §4.5's `rollback`: `set(t.tid, -2)`).
    pub fn set_not_committed(&self, tid: TransactionId) {
        let (bucket, slot) = self.locate(tid);
        self.buckets[bucket].write().unwrap()[slot] = NOT_COMMITTED;
    }

    /// `None` means unknown -- the cache is advisory; a miss must fall
    /// back to the engine's open-transaction map and the redo log
    /// (spec.md §4.4).
    pub fn get(&self, tid: TransactionId) -> Option<i64> {
        let (bucket, slot) = self.locate(tid);
        match self.buckets[bucket].read().unwrap()[slot] {
            UNKNOWN => None,
            other => Some(other),
        }
    }

    pub fn is_committed(&self, tid: TransactionId) -> Option<bool> {
        self.get(tid).map(|v| v != NOT_COMMITTED)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(0, 0, 0)]
    #[case(1, 0, 1)]
    #[case(4, 0, 0)]
    #[case(5, 0, 1)]
    #[case(9, 1, 1)]
    fn locate_matches_bucket_and_slot_formula(#[case] tid: u64, #[case] bucket: usize, #[case] slot: usize) {
        let cache = TransactionStatusCache::new(2, 4);
        assert_eq!(cache.locate(TransactionId(tid)), (bucket, slot));
    }

    #[test]
    fn records_and_looks_up_commit_timestamp() {
        let cache = TransactionStatusCache::new(4, 8);

        cache.set_committed(TransactionId(10), 11);

        assert_eq!(cache.get(TransactionId(10)), Some(11));
        assert_eq!(cache.is_committed(TransactionId(10)), Some(true));
    }

    #[test]
    fn unset_slot_is_unknown() {
        let cache = TransactionStatusCache::new(4, 8);

        assert_eq!(cache.get(TransactionId(999)), None);
        assert_eq!(cache.is_committed(TransactionId(999)), None);
    }

    #[test]
    fn rollback_records_not_committed_sentinel() {
        let cache = TransactionStatusCache::new(4, 8);

        cache.set_committed(TransactionId(10), 11);
        cache.set_not_committed(TransactionId(10));

        assert_eq!(cache.is_committed(TransactionId(10)), Some(false));
    }

    #[test]
    fn distinct_tids_in_same_bucket_different_slots_do_not_collide() {
        let cache = TransactionStatusCache::new(2, 4);

        // bucket = (tid / 4) % 2, slot = tid % 4
        // tid=1 -> bucket 0, slot 1
        // tid=9 -> bucket 0, slot 1 too (9/4=2, 2%2=0; 9%4=1) -- same slot
        // reused, so pick tids landing in the same bucket but distinct slots.
        cache.set_committed(TransactionId(1), 100); // bucket 0, slot 1
        cache.set_committed(TransactionId(2), 200); // bucket 0, slot 2

        assert_eq!(cache.get(TransactionId(1)), Some(100));
        assert_eq!(cache.get(TransactionId(2)), Some(200));
    }

    #[test]
    fn later_set_overwrites_older_entry_silently() {
        let cache = TransactionStatusCache::new(4, 8);

        cache.set_committed(TransactionId(10), 11);
        cache.set_committed(TransactionId(10), 999);

        assert_eq!(cache.get(TransactionId(10)), Some(999));
    }
}

use serde::{Deserialize, Serialize};

use crate::ids::{LogCounter, TransactionId};

/// The unit of storage for every row in a `StorageMap`: spec.md §3's
/// `(tid, logId, payload)` triple.
///
/// `tid == TransactionId::NONE` means committed. `payload == None` is a
/// tombstone (a deletion marker) -- collapsed from the teacher's
/// `PersonVersionState::{State, Delete}` enum into an `Option`, since the
/// generic map has no per-domain "state" type to distinguish.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct VersionedValue<V> {
    pub tid: TransactionId,
    pub log_id: LogCounter,
    pub payload: Option<V>,
}

impl<V> VersionedValue<V> {
    pub fn uncommitted(tid: TransactionId, log_id: LogCounter, payload: Option<V>) -> Self {
        Self {
            tid,
            log_id,
            payload,
        }
    }

    pub fn committed(payload: Option<V>) -> Self {
        Self {
            tid: TransactionId::NONE,
            log_id: LogCounter::zero(),
            payload,
        }
    }

    pub fn is_committed(&self) -> bool {
        self.tid.is_committed_marker()
    }

    pub fn is_tombstone(&self) -> bool {
        self.payload.is_none()
    }

    pub fn owned_by(&self, tid: TransactionId) -> bool {
        self.tid == tid
    }
}

impl<V: Clone> VersionedValue<V> {
    /// Rewrites the header to mark this value committed, keeping the
    /// payload (spec.md §4.5 step 5: "Rewrite each touched VersionedValue
    /// in-place ... to (0, 0, v)").
    pub fn mark_committed(&self) -> Self {
        Self::committed(self.payload.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn committed_marker_round_trips() {
        let vv = VersionedValue::committed(Some("a".to_string()));
        assert!(vv.is_committed());
        assert!(!vv.is_tombstone());
    }

    #[test]
    fn tombstone_has_no_payload() {
        let vv: VersionedValue<String> = VersionedValue::committed(None);
        assert!(vv.is_tombstone());
    }

    #[test]
    fn mark_committed_preserves_payload() {
        let vv = VersionedValue::uncommitted(TransactionId(5), LogCounter(2), Some(42));
        let committed = vv.mark_committed();

        assert!(committed.is_committed());
        assert_eq!(committed.payload, Some(42));
    }
}

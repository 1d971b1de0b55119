use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// New Type Pattern -- https://doc.rust-lang.org/rust-by-example/generics/new_types.html
///
/// Strictly increasing for the lifetime of the engine; never reused, even
/// across a rolled-back transaction (spec.md §3).
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TransactionId(pub u64);

impl TransactionId {
    pub const NONE: TransactionId = TransactionId(0);

    pub fn as_u64(self) -> u64 {
        self.0
    }

    pub fn is_committed_marker(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 0-based sequence within a single transaction, monotone, reset per
/// transaction (spec.md §3).
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LogCounter(pub u32);

impl LogCounter {
    pub fn zero() -> Self {
        LogCounter(0)
    }

    pub fn next(self) -> Self {
        LogCounter(self.0 + 1)
    }

    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for LogCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The key of the redo log; also the commit order (spec.md §3/§4.2).
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OperationId(pub u64);

impl OperationId {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Dense integer id for catalog objects (tables, indexes, sequences, ...).
/// Stable across restart (spec.md §3).
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId(pub i64);

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Strictly-increasing counter shared by transaction ids and operation ids.
///
/// Grounded on `persistence/transaction.rs::LocalClock` in the teacher
/// crate -- kept as the same "atomic fetch_add" shape, generalized to a
/// named, reusable type instead of a private field of `TransactionWAL`.
#[derive(Debug, Default)]
pub struct LocalClock {
    sequence: AtomicU64,
}

impl LocalClock {
    pub fn new() -> Self {
        Self {
            sequence: AtomicU64::new(1),
        }
    }

    pub fn starting_at(next: u64) -> Self {
        Self {
            sequence: AtomicU64::new(next),
        }
    }

    /// It is unlikely we need `SeqCst`; `AcqRel` would suffice, but the
    /// allocation rate here is far from a bottleneck.
    pub fn next_transaction_id(&self) -> TransactionId {
        TransactionId(self.sequence.fetch_add(1, Ordering::SeqCst))
    }

    pub fn next_operation_id(&self) -> OperationId {
        OperationId(self.sequence.fetch_add(1, Ordering::SeqCst))
    }

    pub fn peek(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }

    pub fn advance_past(&self, seen: u64) {
        let mut current = self.sequence.load(Ordering::SeqCst);

        while current <= seen {
            match self.sequence.compare_exchange_weak(
                current,
                seen + 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => break,
                Err(observed) => current = observed,
            }
        }
    }
}

//! MVCC transactional storage substrate for a distributed relational
//! database: a write buffer pool, a redo log with a pluggable sync
//! policy, a transaction-status cache, versioned per-row storage maps,
//! a transaction engine tying them together, and a catalog/session layer
//! on top.
//!
//! Grounded on the teacher crate's flat `database`/`model`/`persistence`/
//! `consts` top-level module layout (declared straight off the crate
//! root rather than nested behind a facade module), generalized to this
//! crate's module set.

pub mod buffer_pool;
pub mod catalog;
pub mod config;
pub mod crash;
pub mod error;
pub mod ids;
pub mod log_sync;
pub mod mvcc_map;
pub mod parser;
pub mod persistence;
pub mod redo_log;
pub mod session;
pub mod status_cache;
pub mod storage_map;
pub mod transaction;
pub mod transaction_engine;
pub mod versioned_value;
pub mod wire;

pub use error::{Error, ErrorFrame};

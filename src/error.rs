use thiserror::Error;

use crate::ids::TransactionId;

/// Single result-returning error taxonomy for the whole crate.
///
/// Replaces the "throw an exception" style of the system this was derived
/// from with one enum: every fallible operation in the core returns
/// `Result<T, Error>` and the session layer is responsible for mapping a
/// variant onto a wire `ErrorFrame`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("lock timeout: transaction {waiter} could not acquire row held by {holder}")]
    LockTimeout {
        waiter: TransactionId,
        holder: TransactionId,
    },

    #[error("transaction corrupt: undo chain referenced tid {0} which is neither open nor committed")]
    TransactionCorrupt(TransactionId),

    #[error("connection broken: {0}")]
    ConnectionBroken(String),

    #[error("database is read only")]
    DatabaseReadOnly,

    #[error("database is in exclusive mode")]
    DatabaseExclusiveMode,

    #[error("database is closed")]
    DatabaseClosed,

    #[error("schema not found: {0}")]
    SchemaNotFound(String),

    #[error("table not found: {0}")]
    TableNotFound(String),

    #[error("user not found: {0}")]
    UserNotFound(String),

    #[error("role not found: {0}")]
    RoleNotFound(String),

    #[error("setting not found: {0}")]
    SettingNotFound(String),

    #[error("sequence not found: {0}")]
    SequenceNotFound(String),

    #[error("schema already exists: {0}")]
    SchemaAlreadyExists(String),

    #[error("table already exists: {0}")]
    TableAlreadyExists(String),

    #[error("user already exists: {0}")]
    UserAlreadyExists(String),

    #[error("role already exists: {0}")]
    RoleAlreadyExists(String),

    #[error("sequence already exists: {0}")]
    SequenceAlreadyExists(String),

    #[error("invalid value: {0}")]
    InvalidValue(String),

    #[error("unsupported operation: {0}")]
    Unsupported(String),

    #[error("syntax error: {0}")]
    SyntaxError(String),

    /// Raised by a `StorageMap` cursor whose backing chunk was rewritten
    /// mid-scan; the MVCC cursor catches this in exactly one place and
    /// re-seeks from the last key it yielded (spec.md §4.6/§4.7).
    #[error("chunk not found, cursor must re-seek from {0:?}")]
    ChunkNotFound(Vec<u8>),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn is_retryable_cursor_error(&self) -> bool {
        matches!(self, Error::ChunkNotFound(_))
    }
}

/// What the session layer hands back over the wire: spec.md §6's error
/// frame shape, `(sqlstate, message, sql, errorCode)`, modeled without the
/// socket encoding (out of scope).
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorFrame {
    pub sql_state: &'static str,
    pub message: String,
    pub sql: Option<String>,
    pub error_code: u32,
}

impl ErrorFrame {
    pub fn from_error(err: &Error, sql: Option<String>) -> Self {
        let (sql_state, error_code) = match err {
            Error::LockTimeout { .. } => ("HYT00", 50200),
            Error::TransactionCorrupt(_) => ("XA000", 90100),
            Error::ConnectionBroken(_) => ("08006", 90067),
            Error::DatabaseReadOnly => ("90097", 90097),
            Error::DatabaseExclusiveMode => ("90098", 90098),
            Error::DatabaseClosed => ("08003", 90098),
            Error::SchemaNotFound(_) => ("90079", 90079),
            Error::TableNotFound(_) => ("42S02", 42102),
            Error::UserNotFound(_) => ("90096", 90096),
            Error::RoleNotFound(_) => ("90110", 90110),
            Error::SettingNotFound(_) => ("90125", 90125),
            Error::SequenceNotFound(_) => ("90126", 90126),
            Error::SchemaAlreadyExists(_) => ("90078", 90078),
            Error::TableAlreadyExists(_) => ("42S01", 42101),
            Error::UserAlreadyExists(_) => ("90095", 90095),
            Error::RoleAlreadyExists(_) => ("90111", 90111),
            Error::SequenceAlreadyExists(_) => ("90127", 90127),
            Error::InvalidValue(_) => ("42000", 90004),
            Error::Unsupported(_) => ("HYC00", 50100),
            Error::SyntaxError(_) => ("42001", 42001),
            Error::ChunkNotFound(_) => ("HY000", 50000),
            Error::Internal(_) => ("HY000", 50000),
        };

        Self {
            sql_state,
            message: err.to_string(),
            sql,
            error_code,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_frame_carries_stable_sqlstate() {
        let err = Error::TableNotFound("people".to_string());
        let frame = ErrorFrame::from_error(&err, Some("SELECT * FROM people".to_string()));

        assert_eq!(frame.sql_state, "42S02");
        assert_eq!(frame.sql.as_deref(), Some("SELECT * FROM people"));
    }

    #[test]
    fn chunk_not_found_is_retryable() {
        assert!(Error::ChunkNotFound(vec![1, 2, 3]).is_retryable_cursor_error());
        assert!(!Error::DatabaseClosed.is_retryable_cursor_error());
    }
}

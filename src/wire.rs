//! Wire protocol *shapes* (spec.md §6): status codes, message kinds,
//! value tags, and the connection preamble, modeled as plain
//! `serde`-derived data types so the session layer and tests can
//! construct and assert on them. Socket I/O, framing, and the
//! length-prefixed UTF-16 string encoding are explicitly out of scope
//! (spec.md §1) -- only the shapes are here.
//!
//! Grounded on `model/statement.rs::Statement`'s serde-derive idiom
//! (plain `#[derive(Serialize, Deserialize)]` enums/structs standing in
//! for a wire-format DTO) and spec.md §6's field list, which this module
//! transcribes one-to-one rather than reinterpreting.

use serde::{Deserialize, Serialize};

/// Connection preamble fields (spec.md §6): everything exchanged before
/// the first real message, prior to any per-message framing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionPreamble {
    pub magic: [u8; 4],
    pub min_version: i32,
    pub max_version: i32,
    pub database_name: String,
    pub url: String,
    pub user: String,
    pub user_password_hash: Vec<u8>,
    pub file_password_hash: Vec<u8>,
    pub file_encryption_key: Vec<u8>,
    pub properties: Vec<(String, String)>,
}

/// `OK=0`, `ERROR=1`, `CLOSED=2`, `OK_STATE_CHANGED=3` (spec.md §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i32)]
pub enum StatusCode {
    Ok = 0,
    Error = 1,
    Closed = 2,
    OkStateChanged = 3,
}

/// Message kinds the core reacts to (spec.md §6). The much larger set of
/// statement-execution/result-set message kinds the full wire protocol
/// carries is out of scope -- only the kinds this core's session layer
/// is the addressee for are modeled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    SessionSetId,
    SessionSetAutocommit,
    SessionCancelStatement,
    SessionClose,
    CommandExecuteDistributedCommit,
    CommandExecuteDistributedRollback,
    CommandExecuteDistributedSavepointAdd,
    CommandExecuteDistributedSavepointRollback,
    CommandExecuteTransactionValidate,
    LobRead,
}

/// A per-message envelope: message kind, correlation id, then
/// kind-specific payload bytes (spec.md §6). The payload is left opaque
/// here -- decoding it per `MessageKind` is a wire-I/O concern this crate
/// does not implement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub kind: MessageKind,
    pub correlation_id: i32,
    pub payload: Vec<u8>,
}

/// Value tags (spec.md §6). `Uuid` is carried as the two `i64` halves the
/// wire format uses rather than this crate's `uuid::Uuid`, since the tag
/// set is a transcription of the wire shape, not a re-typing of it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ValueTag {
    Null,
    Int(i32),
    Long(i64),
    Short(i16),
    Byte(i8),
    Boolean(bool),
    Double(f64),
    Float(f32),
    Decimal(String),
    Date(i64),
    Time(i64),
    Timestamp(i64),
    String(String),
    StringIgnoreCase(String),
    StringFixed(String),
    Bytes(Vec<u8>),
    Uuid(i64, i64),
    JavaObject(Vec<u8>),
    Array(Vec<ValueTag>),
    ResultSet,
    /// Inline BLOB/CLOB payload.
    Lob(Vec<u8>),
    /// By-reference BLOB/CLOB: an opaque handle plus its HMAC (spec.md
    /// §6's "inline or by reference with HMAC").
    LobRef { handle: Vec<u8>, hmac: Vec<u8> },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_code_round_trips_through_json() {
        let encoded = serde_json::to_string(&StatusCode::OkStateChanged).unwrap();
        let decoded: StatusCode = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, StatusCode::OkStateChanged);
    }

    #[test]
    fn envelope_carries_opaque_payload() {
        let envelope = Envelope {
            kind: MessageKind::CommandExecuteTransactionValidate,
            correlation_id: 7,
            payload: vec![1, 2, 3],
        };

        let encoded = serde_json::to_string(&envelope).unwrap();
        let decoded: Envelope = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn value_tag_array_nests() {
        let tag = ValueTag::Array(vec![ValueTag::Int(1), ValueTag::Null, ValueTag::String("x".to_string())]);
        let encoded = serde_json::to_string(&tag).unwrap();
        let decoded: ValueTag = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, tag);
    }

    #[test]
    fn lob_ref_carries_handle_and_hmac() {
        let tag = ValueTag::LobRef {
            handle: vec![9, 9],
            hmac: vec![1, 1, 1],
        };
        let encoded = serde_json::to_string(&tag).unwrap();
        let decoded: ValueTag = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, tag);
    }
}

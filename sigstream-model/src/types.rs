use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A record awaiting a signature. Records pre-exist in storage; the
/// pipeline only ever reads them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub id: i64,
    pub inserted_at: DateTime<Utc>,
}

/// A signing key as it travels on the wire. `is_in_use` is advisory only;
/// the authoritative lease state is the broker's pending-entry tracking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Key {
    pub id: i64,
    pub value: String,
    pub is_in_use: bool,
    pub last_used_at: DateTime<Utc>,
}

impl Key {
    /// A key that has never signed anything.
    pub fn fresh(id: i64, value: String) -> Self {
        Self {
            id,
            value,
            is_in_use: false,
            last_used_at: DateTime::UNIX_EPOCH,
        }
    }
}

/// A signature ready for insertion. Storage assigns `inserted_at` and
/// enforces global uniqueness of `value`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewSignature {
    pub record_id: i64,
    pub key_id: i64,
    pub value: String,
}

/// A persisted signature row. Immutable once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub record_id: i64,
    pub key_id: i64,
    pub value: String,
    pub inserted_at: DateTime<Utc>,
}

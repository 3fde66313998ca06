//! JSON wire format for batch and key messages.
//!
//! A batch message is a JSON array of records carrying only `id` and
//! `inserted_at`; a key message is a single JSON key object.

use crate::types::{Key, Record};

pub fn encode_records(records: &[Record]) -> serde_json::Result<Vec<u8>> {
    serde_json::to_vec(records)
}

pub fn decode_records(payload: &[u8]) -> serde_json::Result<Vec<Record>> {
    serde_json::from_slice(payload)
}

pub fn encode_key(key: &Key) -> serde_json::Result<Vec<u8>> {
    serde_json::to_vec(key)
}

pub fn decode_key(payload: &[u8]) -> serde_json::Result<Key> {
    serde_json::from_slice(payload)
}

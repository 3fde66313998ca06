//! Core data model definitions shared across sigstream crates.

pub mod batch;
pub mod subject;
pub mod types;
pub mod wire;

// Intentionally curated re-exports for downstream consumers.
pub use batch::{batch_id_for, total_batches};
pub use subject::{
    EVENTS_STREAM_NAME, KEYS_FILTER, RECORDS_FILTER, keys_subject,
    records_subject,
};
pub use types::{Key, NewSignature, Record, Signature};

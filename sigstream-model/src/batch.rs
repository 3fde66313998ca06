//! Deterministic partitioning of records into batches.
//!
//! A record belongs to batch `b` iff `((id - 1) % B) + 1 == b`. The rule is
//! order-independent, assigns every positive id to exactly one batch in
//! `[1, B]`, and keeps batch sizes within one of each other.

/// Batch id a record belongs to, for `total_batches >= 1`.
pub fn batch_id_for(record_id: i64, total_batches: i64) -> i64 {
    debug_assert!(record_id >= 1);
    debug_assert!(total_batches >= 1);
    ((record_id - 1) % total_batches) + 1
}

/// Number of batches needed to cover `total_records` at `batch_size`
/// records per batch (ceiling division).
pub fn total_batches(total_records: i64, batch_size: i64) -> i64 {
    debug_assert!(batch_size >= 1);
    (total_records + batch_size - 1) / batch_size
}

//! Subject addressing for the shared event stream.
//!
//! Two namespaces partition all traffic: `records.*` carries one message
//! per batch, `keys.*` one message per signing key. The fully-qualified
//! subject doubles as the idempotency token for publishes.

/// Logical stream carrying both namespaces.
pub const EVENTS_STREAM_NAME: &str = "sigstream-events";

/// Filter matching every batch message.
pub const RECORDS_FILTER: &str = "records";

/// Filter matching every key message.
pub const KEYS_FILTER: &str = "keys";

pub fn records_subject(batch_id: i64) -> String {
    format!("{RECORDS_FILTER}.{batch_id}")
}

pub fn keys_subject(key_id: i64) -> String {
    format!("{KEYS_FILTER}.{key_id}")
}

/// First dot-separated token of a subject, used by transports to route a
/// subject to its namespace.
pub fn namespace_of(subject: &str) -> &str {
    subject.split('.').next().unwrap_or(subject)
}

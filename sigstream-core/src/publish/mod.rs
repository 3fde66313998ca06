//! The two upstream producers feeding the coordinator.

pub mod keys;
pub mod records;

pub use keys::publish_keys;
pub use records::publish_batches;

use std::time::Duration;

/// Deadline for a single publish; exceeding it fails that publish.
pub const PUBLISH_TIMEOUT: Duration = Duration::from_secs(5);

//! # sigstream-core
//!
//! The signing pipeline core. A pool of keys and a partitioned set of
//! records flow through a durable message stream; the coordinator pairs
//! one batch with one key per iteration, signs the batch concurrently,
//! bulk-persists the signatures, and resolves both messages so that every
//! record is signed exactly once under at-least-once delivery.
//!
//! The crate is split the same way the runtime is:
//! - [`stream`]: the broker capability surface (publish with idempotency,
//!   durable pull consumers, ack/nak) and its Redis Streams and in-memory
//!   transports
//! - [`db`]: repository ports and their Postgres implementations
//! - [`keygen`] / [`signing`] / [`persist`]: key material, the signing
//!   scheme, and chunked bulk persistence
//! - [`publish`]: the two upstream producers
//! - [`coordinator`]: the pairing loop and its processing units

pub mod coordinator;
pub mod db;
pub mod error;
pub mod keygen;
pub mod persist;
pub mod publish;
pub mod signing;
pub mod stream;

pub use error::{PipelineError, Result};

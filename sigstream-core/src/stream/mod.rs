//! Broker capability surface.
//!
//! The pipeline needs four things from its broker: idempotent publish
//! keyed by subject, named durable consumers over a subject namespace,
//! a suspending pull, and explicit resolution of each pulled message.
//! Resolution is three-valued and carries the key-leasing protocol:
//!
//! - `ack` permanently retires the message (a processed batch),
//! - `nak` makes it immediately redeliverable (a recycled key, or a
//!   malformed payload handed back for retry),
//! - dropping the handle unresolved leaves it pending until the broker's
//!   idle timeout re-delivers it (a batch whose processing died mid-way).

pub mod memory;
pub mod redis;

use async_trait::async_trait;

use crate::error::Result;

/// Broker receipt for a successful publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishAck {
    /// Physical stream the message landed on.
    pub stream: String,
    /// Broker-assigned sequence within that stream.
    pub sequence: String,
}

#[async_trait]
pub trait StreamTransport: Send + Sync {
    /// Publish `payload` under `subject`, using the subject itself as the
    /// idempotency token: re-publishing an already-seen subject is a no-op
    /// that still returns an ack.
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<PublishAck>;

    /// Create or look up a named durable consumer over every subject in
    /// `filter`'s namespace, positioned at the start of the stream.
    async fn durable_consumer(
        &self,
        name: &str,
        filter: &str,
    ) -> Result<Box<dyn DurableConsumer>>;
}

#[async_trait]
pub trait DurableConsumer: Send + Sync {
    /// Pull the next undelivered message, suspending the caller until one
    /// is available. Messages previously pulled but never resolved become
    /// available again here once their idle deadline passes.
    async fn next(&mut self) -> Result<Box<dyn PulledMessage>>;
}

#[async_trait]
pub trait PulledMessage: Send + Sync {
    fn subject(&self) -> &str;

    fn payload(&self) -> &[u8];

    /// Permanently mark the message processed; it is never redelivered.
    async fn ack(self: Box<Self>) -> Result<()>;

    /// Negative-acknowledge: hand the message back for immediate
    /// redelivery.
    async fn nak(self: Box<Self>) -> Result<()>;
}

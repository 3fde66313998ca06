//! The signing coordinator: the pairing loop and its processing units.
//!
//! Each iteration pairs one batch message with one key message pulled from
//! two independent durable consumers, then dispatches a processing unit
//! that signs the batch, bulk-persists the signatures, and resolves both
//! messages. The key lease lives entirely in broker acknowledgment state:
//! a pulled, unresolved key message IS the lease; nak releases it; nothing
//! ever permanently retires a key.
//!
//! Resolution protocol per unit:
//! - success: nak the key first, then ack the batch. The key is only
//!   recycled once the batch it signed is durably committed, so a key is
//!   never advertised as free while work is still in flight against it.
//! - signing/persistence failure: leave both messages unresolved; the
//!   broker's idle deadline redelivers both, and the batch retries with
//!   whatever key it is paired with next.
//! - decode failure: nak immediately (batch alone if the key was never
//!   pulled, both otherwise) so the iteration never leaks a key lease.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use sigstream_model::{Key, Record, wire};

use crate::db::SignaturesRepository;
use crate::error::{PipelineError, Result};
use crate::persist::{self, INSERT_CHUNK_SIZE, INSERT_MAX_WRITERS};
use crate::signing;
use crate::stream::{DurableConsumer, PulledMessage};

#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    /// Number of (batch, key) pairs to dispatch before the loop ends;
    /// computed independently as ceil(total_records / batch_size).
    pub expected_batches: u64,
    /// Ceiling on concurrently-running processing units. The reference
    /// pipeline relied on consumer pull latency as an implicit throttle;
    /// this bound makes the fan-out explicit.
    pub max_in_flight: usize,
    /// Deadline for persisting one batch's signatures.
    pub persist_deadline: Duration,
    /// Pause after a failed pull before the next attempt. A dead broker
    /// fails every pull instantly; without the pause the loop spins.
    pub pull_retry_delay: Duration,
    pub insert_chunk_size: usize,
    pub insert_max_writers: usize,
}

impl CoordinatorSettings {
    pub fn new(expected_batches: u64, max_in_flight: usize) -> Self {
        Self {
            expected_batches,
            max_in_flight: max_in_flight.max(1),
            persist_deadline: Duration::from_secs(10),
            pull_retry_delay: Duration::from_secs(1),
            insert_chunk_size: INSERT_CHUNK_SIZE,
            insert_max_writers: INSERT_MAX_WRITERS,
        }
    }
}

pub struct SigningCoordinator {
    records: Box<dyn DurableConsumer>,
    keys: Box<dyn DurableConsumer>,
    signatures: Arc<dyn SignaturesRepository>,
    settings: CoordinatorSettings,
    signed_total: Arc<AtomicU64>,
}

impl SigningCoordinator {
    pub fn new(
        records: Box<dyn DurableConsumer>,
        keys: Box<dyn DurableConsumer>,
        signatures: Arc<dyn SignaturesRepository>,
        settings: CoordinatorSettings,
    ) -> Self {
        Self {
            records,
            keys,
            signatures,
            settings,
            signed_total: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Shared progress counter; reporting only, never used for
    /// correctness.
    pub fn signed_total(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.signed_total)
    }

    /// Run the pairing loop until `expected_batches` processing units have
    /// been dispatched, then wait for all of them. Returns the number of
    /// records signed by this process.
    pub async fn run(mut self) -> Result<u64> {
        let dispatch = Arc::new(Semaphore::new(self.settings.max_in_flight));
        let mut units = JoinSet::new();
        let mut dispatched: u64 = 0;

        while dispatched < self.settings.expected_batches {
            let Some((batch_msg, key_msg, records, key)) =
                self.next_pairing().await?
            else {
                continue;
            };

            let permit = Arc::clone(&dispatch)
                .acquire_owned()
                .await
                .map_err(|_| {
                    PipelineError::Internal(
                        "dispatch semaphore closed".to_string(),
                    )
                })?;
            let signatures = Arc::clone(&self.signatures);
            let settings = self.settings.clone();
            let signed_total = Arc::clone(&self.signed_total);
            units.spawn(async move {
                let _permit = permit;
                process_pairing(
                    batch_msg,
                    key_msg,
                    records,
                    key,
                    signatures,
                    settings,
                    signed_total,
                )
                .await;
            });
            dispatched += 1;
        }

        // Units already dispatched run to completion regardless of how the
        // loop ended.
        while let Some(joined) = units.join_next().await {
            if let Err(err) = joined {
                error!(error = %err, "processing unit panicked");
            }
        }

        Ok(self.signed_total.load(Ordering::Relaxed))
    }

    /// One iteration of the pairing state machine. `Ok(None)` means the
    /// iteration was abandoned (pull error or malformed payload) and
    /// nothing was dispatched.
    #[allow(clippy::type_complexity)]
    async fn next_pairing(
        &mut self,
    ) -> Result<
        Option<(
            Box<dyn PulledMessage>,
            Box<dyn PulledMessage>,
            Vec<Record>,
            Key,
        )>,
    > {
        let batch_msg = match self.records.next().await {
            Ok(msg) => msg,
            Err(err) => {
                warn!(error = %err, "failed pulling batch message");
                tokio::time::sleep(self.settings.pull_retry_delay).await;
                return Ok(None);
            }
        };

        let records = match wire::decode_records(batch_msg.payload()) {
            Ok(records) => records,
            Err(err) => {
                // Abandon before touching the keys consumer so a bad
                // batch never holds a key lease.
                warn!(
                    subject = batch_msg.subject(),
                    error = %err,
                    "malformed batch payload, scheduling redelivery"
                );
                resolve_nak(batch_msg).await;
                return Ok(None);
            }
        };
        debug!(batch_records = records.len(), "pulled batch");

        let key_msg = match self.keys.next().await {
            Ok(msg) => msg,
            Err(err) => {
                warn!(error = %err, "failed pulling key message");
                resolve_nak(batch_msg).await;
                tokio::time::sleep(self.settings.pull_retry_delay).await;
                return Ok(None);
            }
        };

        let key = match wire::decode_key(key_msg.payload()) {
            Ok(key) => key,
            Err(err) => {
                warn!(
                    subject = key_msg.subject(),
                    error = %err,
                    "malformed key payload, scheduling redelivery"
                );
                resolve_nak(key_msg).await;
                resolve_nak(batch_msg).await;
                return Ok(None);
            }
        };
        debug!(key_id = key.id, "pulled free key");

        Ok(Some((batch_msg, key_msg, records, key)))
    }
}

/// One processing unit: sign, persist, resolve. Failures leave both
/// messages unresolved so the broker redelivers them.
async fn process_pairing(
    batch_msg: Box<dyn PulledMessage>,
    key_msg: Box<dyn PulledMessage>,
    records: Vec<Record>,
    key: Key,
    repository: Arc<dyn SignaturesRepository>,
    settings: CoordinatorSettings,
    signed_total: Arc<AtomicU64>,
) {
    let signatures = match signing::sign_records(&records, &key).await {
        Ok(signatures) => signatures,
        Err(err) => {
            error!(key_id = key.id, error = %err, "failed signing batch");
            return;
        }
    };

    let persisted = tokio::time::timeout(
        settings.persist_deadline,
        persist::insert_signatures(
            repository,
            signatures,
            settings.insert_chunk_size,
            settings.insert_max_writers,
        ),
    )
    .await;
    match persisted {
        Ok(Ok(())) => {}
        Ok(Err(err)) => {
            error!(key_id = key.id, error = %err, "failed inserting signatures");
            return;
        }
        Err(_) => {
            error!(key_id = key.id, "signature insert exceeded its deadline");
            return;
        }
    }

    // Recycle the key only after its batch is durably committed.
    if let Err(err) = key_msg.nak().await {
        error!(key_id = key.id, error = %err, "failed recycling key");
    }
    if let Err(err) = batch_msg.ack().await {
        error!(error = %err, "failed acknowledging signed batch");
    }

    let total = signed_total
        .fetch_add(records.len() as u64, Ordering::Relaxed)
        + records.len() as u64;
    info!(
        batch_records = records.len(),
        key_id = key.id,
        total_signed = total,
        "batch processed"
    );
}

async fn resolve_nak(msg: Box<dyn PulledMessage>) {
    let subject = msg.subject().to_string();
    if let Err(err) = msg.nak().await {
        error!(subject, error = %err, "failed negative-acknowledging message");
    }
}

//! Key publisher: one message per key, subject-deduplicated.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info};

use sigstream_model::{Key, subject, wire};

use crate::error::{PipelineError, Result};
use crate::stream::StreamTransport;

/// Publish every key through a bounded worker pool. A publish failure is
/// fatal for the run: it signals broker unavailability, not a per-key
/// condition, so no per-item retry is attempted.
pub async fn publish_keys(
    transport: Arc<dyn StreamTransport>,
    keys: Vec<Key>,
    max_concurrency: usize,
    publish_timeout: Duration,
) -> Result<()> {
    let total = keys.len();
    let workers = Arc::new(Semaphore::new(max_concurrency.max(1)));
    let mut publishes: JoinSet<Result<()>> = JoinSet::new();

    for key in keys {
        let transport = Arc::clone(&transport);
        let workers = Arc::clone(&workers);
        publishes.spawn(async move {
            let _permit = workers.acquire_owned().await.map_err(|_| {
                PipelineError::Internal("publish semaphore closed".to_string())
            })?;

            let payload = wire::encode_key(&key)?;
            let subject = subject::keys_subject(key.id);
            let ack = tokio::time::timeout(
                publish_timeout,
                transport.publish(&subject, payload),
            )
            .await
            .map_err(|_| PipelineError::Timeout("key publish"))??;

            debug!(
                subject,
                stream = %ack.stream,
                sequence = %ack.sequence,
                "published key"
            );
            Ok(())
        });
    }

    while let Some(joined) = publishes.join_next().await {
        joined.unwrap_or_else(|err| {
            Err(PipelineError::Internal(format!(
                "key publish task failed: {err}"
            )))
        })?;
    }

    info!(total_keys = total, "all keys initially enqueued");
    Ok(())
}

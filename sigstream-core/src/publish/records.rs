//! Batch publisher: loads each batch from storage and publishes it as one
//! message, subject-deduplicated by batch id.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use sigstream_model::{subject, wire};

use crate::db::RecordsRepository;
use crate::error::{PipelineError, Result};
use crate::stream::StreamTransport;

/// Publish batches `1..=total_batches` through a bounded worker pool.
///
/// A storage-query failure for one batch is logged and that batch is
/// skipped; the remaining batches are independently processable and its
/// subject stays unpublished for a later run. A publish failure is fatal:
/// it is a broker-level fault, not a data-level one.
pub async fn publish_batches(
    transport: Arc<dyn StreamTransport>,
    records: Arc<dyn RecordsRepository>,
    total_batches: i64,
    max_concurrency: usize,
    publish_timeout: Duration,
) -> Result<()> {
    let workers = Arc::new(Semaphore::new(max_concurrency.max(1)));
    let mut publishes: JoinSet<Result<()>> = JoinSet::new();

    for batch_id in 1..=total_batches {
        let transport = Arc::clone(&transport);
        let records = Arc::clone(&records);
        let workers = Arc::clone(&workers);
        publishes.spawn(async move {
            let _permit = workers.acquire_owned().await.map_err(|_| {
                PipelineError::Internal("publish semaphore closed".to_string())
            })?;

            let batch = match records
                .records_in_batch(batch_id, total_batches)
                .await
            {
                Ok(batch) => batch,
                Err(err) => {
                    // Best-effort: other batches remain processable.
                    warn!(batch_id, error = %err, "batch query failed, skipping batch");
                    return Ok(());
                }
            };

            let payload = wire::encode_records(&batch)?;
            let subject = subject::records_subject(batch_id);
            let ack = tokio::time::timeout(
                publish_timeout,
                transport.publish(&subject, payload),
            )
            .await
            .map_err(|_| PipelineError::Timeout("batch publish"))??;

            debug!(
                batch_id,
                record_count = batch.len(),
                stream = %ack.stream,
                sequence = %ack.sequence,
                "published batch"
            );
            Ok(())
        });
    }

    while let Some(joined) = publishes.join_next().await {
        joined.unwrap_or_else(|err| {
            Err(PipelineError::Internal(format!(
                "batch publish task failed: {err}"
            )))
        })?;
    }

    info!(total_batches, "all record batches enqueued");
    Ok(())
}

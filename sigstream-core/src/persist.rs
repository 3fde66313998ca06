//! Chunked bulk persistence of signatures.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::info;

use sigstream_model::NewSignature;

use crate::db::SignaturesRepository;
use crate::error::{PipelineError, Result};

/// Rows per bulk-insert statement.
pub const INSERT_CHUNK_SIZE: usize = 10_000;

/// Concurrent chunk writers per batch.
pub const INSERT_MAX_WRITERS: usize = 2;

/// Write `signatures` in ceil(len / chunk_size) chunks with at most
/// `max_writers` writes in flight. The first chunk failure fails the whole
/// call; chunks already committed stay committed, and reconciling that
/// partial state is the caller's job (redelivery of the owning batch).
pub async fn insert_signatures(
    repository: Arc<dyn SignaturesRepository>,
    signatures: Vec<NewSignature>,
    chunk_size: usize,
    max_writers: usize,
) -> Result<()> {
    info!(total = signatures.len(), "inserting signature batch");

    let writers = Arc::new(Semaphore::new(max_writers.max(1)));
    let mut writes: JoinSet<Result<()>> = JoinSet::new();

    for chunk in signatures.chunks(chunk_size.max(1)) {
        let chunk = chunk.to_vec();
        let repository = Arc::clone(&repository);
        let writers = Arc::clone(&writers);
        writes.spawn(async move {
            let _permit = writers.acquire_owned().await.map_err(|_| {
                PipelineError::Internal("insert semaphore closed".to_string())
            })?;
            repository.insert_bulk(&chunk).await
        });
    }

    let mut first_error = None;
    while let Some(joined) = writes.join_next().await {
        let outcome = joined.unwrap_or_else(|err| {
            Err(PipelineError::Internal(format!(
                "insert task failed: {err}"
            )))
        });
        if let Err(err) = outcome {
            first_error.get_or_insert(err);
        }
    }

    match first_error {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

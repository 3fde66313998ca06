use async_trait::async_trait;

use sigstream_model::{NewSignature, Record};

use crate::error::Result;

/// Read/seed access to the records table. The pipeline never mutates an
/// existing record.
#[async_trait]
pub trait RecordsRepository: Send + Sync {
    /// Exactly the records of one batch under the modulo membership rule:
    /// `((id - 1) % total_batches) + 1 == batch_id`.
    async fn records_in_batch(
        &self,
        batch_id: i64,
        total_batches: i64,
    ) -> Result<Vec<Record>>;

    async fn count(&self) -> Result<i64>;

    /// Insert `total` fresh records (seeder only).
    async fn seed(&self, total: i64) -> Result<()>;

    /// Delete every record (seeder only).
    async fn clear(&self) -> Result<()>;
}

/// Write access to the signatures table. Storage enforces one signature
/// per record and global uniqueness of the signature value.
#[async_trait]
pub trait SignaturesRepository: Send + Sync {
    /// Insert one chunk of signatures in a single statement.
    async fn insert_bulk(&self, signatures: &[NewSignature]) -> Result<()>;

    async fn count(&self) -> Result<i64>;

    /// Delete every signature (seeder only).
    async fn clear(&self) -> Result<()>;
}

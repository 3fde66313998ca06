//! Shared doubles for pipeline integration tests.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};

use sigstream_core::db::{RecordsRepository, SignaturesRepository};
use sigstream_core::error::{PipelineError, Result};
use sigstream_model::{NewSignature, Record, batch};

/// In-memory stand-in for the signatures table, with a failure switch for
/// exercising the unresolved-message path.
#[derive(Default)]
pub struct MemorySignatures {
    rows: Mutex<Vec<NewSignature>>,
    fail_writes: AtomicBool,
}

impl MemorySignatures {
    pub fn failing() -> Self {
        let repo = Self::default();
        repo.fail_writes.store(true, Ordering::SeqCst);
        repo
    }

    pub fn rows(&self) -> Vec<NewSignature> {
        self.rows.lock().expect("rows lock poisoned").clone()
    }
}

#[async_trait]
impl SignaturesRepository for MemorySignatures {
    async fn insert_bulk(&self, signatures: &[NewSignature]) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(PipelineError::Internal(
                "forced persistence failure".to_string(),
            ));
        }
        self.rows
            .lock()
            .expect("rows lock poisoned")
            .extend_from_slice(signatures);
        Ok(())
    }

    async fn count(&self) -> Result<i64> {
        Ok(self.rows().len() as i64)
    }

    async fn clear(&self) -> Result<()> {
        self.rows.lock().expect("rows lock poisoned").clear();
        Ok(())
    }
}

/// Records table double backed by a fixed id set.
pub struct SeededRecords {
    records: Vec<Record>,
}

impl SeededRecords {
    pub fn with_ids(ids: impl IntoIterator<Item = i64>) -> Self {
        Self {
            records: ids.into_iter().map(record).collect(),
        }
    }
}

#[async_trait]
impl RecordsRepository for SeededRecords {
    async fn records_in_batch(
        &self,
        batch_id: i64,
        total_batches: i64,
    ) -> Result<Vec<Record>> {
        Ok(self
            .records
            .iter()
            .filter(|r| batch::batch_id_for(r.id, total_batches) == batch_id)
            .cloned()
            .collect())
    }

    async fn count(&self) -> Result<i64> {
        Ok(self.records.len() as i64)
    }

    async fn seed(&self, _total: i64) -> Result<()> {
        unimplemented!("seeding is not part of this double")
    }

    async fn clear(&self) -> Result<()> {
        unimplemented!("clearing is not part of this double")
    }
}

pub fn record(id: i64) -> Record {
    Record {
        id,
        inserted_at: Utc.with_ymd_and_hms(2026, 1, 15, 8, 0, 0).unwrap(),
    }
}

//! The signing scheme and per-batch fan-out.
//!
//! The scheme is a placeholder keyed hash over `"{record_id}:{key_value}"`,
//! kept byte-compatible with the reference pipeline. It is deterministic
//! per (record, key) pair and collision-free across distinct pairs, which
//! is what the storage-level uniqueness constraint relies on. Production
//! use would replace this with a real signature over the generated
//! Ed25519 key pair.

use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use sha2::{Digest, Sha256};

use sigstream_model::{Key, NewSignature, Record};

use crate::error::{PipelineError, Result};

pub fn sign_record(record: &Record, key: &Key) -> NewSignature {
    let digest = Sha256::digest(format!("{}:{}", record.id, key.value));
    NewSignature {
        record_id: record.id,
        key_id: key.id,
        value: BASE64.encode(digest),
    }
}

/// Sign every record concurrently, one task per record. Output order
/// matches input order regardless of completion order.
pub async fn sign_records(records: &[Record], key: &Key) -> Result<Vec<NewSignature>> {
    let key = Arc::new(key.clone());
    let handles: Vec<_> = records
        .iter()
        .cloned()
        .map(|record| {
            let key = Arc::clone(&key);
            tokio::spawn(async move { sign_record(&record, &key) })
        })
        .collect();

    let mut signatures = Vec::with_capacity(handles.len());
    for handle in handles {
        let signature = handle.await.map_err(|err| {
            PipelineError::Internal(format!("signing task failed: {err}"))
        })?;
        signatures.push(signature);
    }
    Ok(signatures)
}

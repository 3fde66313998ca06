//! Signing-key generation.
//!
//! Key material is a fresh Ed25519 key pair, base64-encoded into the
//! opaque string the rest of the pipeline treats as the key value. The
//! whole set is generated before anything is published: a single entropy
//! failure aborts the run rather than leaving a partial pool.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use ed25519_dalek::SigningKey;
use rand::TryRngCore;
use rand::rngs::OsRng;

use sigstream_model::Key;

use crate::error::{PipelineError, Result};

/// Generate `total` keys with ids `1..=total`. All-or-nothing.
pub fn generate_keys(total: i64) -> Result<Vec<Key>> {
    (1..=total).map(generate_key).collect()
}

fn generate_key(id: i64) -> Result<Key> {
    let mut seed = [0u8; 32];
    OsRng.try_fill_bytes(&mut seed).map_err(|err| {
        PipelineError::Entropy(format!("failed generating key {id}: {err}"))
    })?;
    let signing_key = SigningKey::from_bytes(&seed);
    let value = BASE64.encode(signing_key.to_keypair_bytes());
    Ok(Key::fresh(id, value))
}

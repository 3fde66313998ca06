//! Environment-driven configuration for the sigstream services.
//!
//! Every value is a required environment variable; a missing or malformed
//! one is a startup failure, never a runtime one. Each service loads only
//! the variables it actually uses.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{0} not set")]
    Missing(&'static str),

    #[error("invalid {name}: {value:?}")]
    Invalid { name: &'static str, value: String },
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Best-effort `.env` preload. Returns whether a file was loaded so the
/// caller can log it; absence is not an error.
pub fn preload_dotenv() -> bool {
    match dotenvy::dotenv() {
        Ok(path) => {
            tracing::info!(path = %path.display(), "loaded .env file");
            true
        }
        Err(err) if err.not_found() => false,
        Err(err) => {
            tracing::warn!(error = %err, "failed loading .env file");
            false
        }
    }
}

/// Configuration for the record seeder.
#[derive(Debug, Clone)]
pub struct SeederConfig {
    pub database_url: String,
    pub total_records: i64,
}

impl SeederConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database_url: require_var("DATABASE_URL")?,
            total_records: require_count("TOTAL_RECORDS")?,
        })
    }
}

/// Configuration for the key generator/publisher.
#[derive(Debug, Clone)]
pub struct KeysServiceConfig {
    pub broker_url: String,
    pub total_keys: i64,
    pub max_concurrency: usize,
}

impl KeysServiceConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            broker_url: require_var("SIGSTREAM_REDIS_URL")?,
            total_keys: require_count("TOTAL_KEYS")?,
            max_concurrency: require_concurrency("KEYS_MAX_CONCURRENCY")?,
        })
    }
}

/// Configuration for the batch partitioner/publisher.
#[derive(Debug, Clone)]
pub struct RecordsServiceConfig {
    pub database_url: String,
    pub broker_url: String,
    pub total_records: i64,
    pub batch_size: i64,
    pub max_concurrency: usize,
}

impl RecordsServiceConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database_url: require_var("DATABASE_URL")?,
            broker_url: require_var("SIGSTREAM_REDIS_URL")?,
            total_records: require_count("TOTAL_RECORDS")?,
            batch_size: require_positive("BATCH_SIZE")?,
            max_concurrency: require_concurrency("RECORDS_MAX_CONCURRENCY")?,
        })
    }

    pub fn total_batches(&self) -> i64 {
        ceil_div(self.total_records, self.batch_size)
    }
}

/// Configuration for the signing coordinator.
#[derive(Debug, Clone)]
pub struct SigningServiceConfig {
    pub database_url: String,
    pub broker_url: String,
    pub total_records: i64,
    pub batch_size: i64,
    pub max_concurrency: usize,
}

impl SigningServiceConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database_url: require_var("DATABASE_URL")?,
            broker_url: require_var("SIGSTREAM_REDIS_URL")?,
            total_records: require_count("TOTAL_RECORDS")?,
            batch_size: require_positive("BATCH_SIZE")?,
            max_concurrency: require_concurrency("SIGNER_MAX_CONCURRENCY")?,
        })
    }

    /// The coordinator dispatches exactly this many (batch, key) pairs.
    pub fn expected_batches(&self) -> i64 {
        ceil_div(self.total_records, self.batch_size)
    }
}

fn ceil_div(a: i64, b: i64) -> i64 {
    (a + b - 1) / b
}

fn require_var(name: &'static str) -> Result<String> {
    match std::env::var(name) {
        Ok(value) if !value.is_empty() => Ok(value),
        _ => Err(ConfigError::Missing(name)),
    }
}

fn require_int(name: &'static str) -> Result<i64> {
    let raw = require_var(name)?;
    parse_int(name, &raw)
}

/// A non-negative count (zero is a valid, if degenerate, target).
fn require_count(name: &'static str) -> Result<i64> {
    let value = require_int(name)?;
    if value < 0 {
        return Err(ConfigError::Invalid {
            name,
            value: value.to_string(),
        });
    }
    Ok(value)
}

fn require_positive(name: &'static str) -> Result<i64> {
    let value = require_int(name)?;
    if value < 1 {
        return Err(ConfigError::Invalid {
            name,
            value: value.to_string(),
        });
    }
    Ok(value)
}

fn require_concurrency(name: &'static str) -> Result<usize> {
    let value = require_positive(name)?;
    Ok(value as usize)
}

fn parse_int(name: &'static str, raw: &str) -> Result<i64> {
    raw.trim()
        .parse::<i64>()
        .map_err(|_| ConfigError::Invalid {
            name,
            value: raw.to_string(),
        })
}

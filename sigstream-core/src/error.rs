use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("broker error: {0}")]
    Broker(#[from] redis::RedisError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("entropy source failure: {0}")]
    Entropy(String),

    #[error("deadline exceeded during {0}")]
    Timeout(&'static str),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, PipelineError>;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum KvError {
    #[error("kv store is disabled (no connection string configured)")]
    Disabled,

    #[error("kv connect timed out after {0:?}")]
    ConnectTimeout(std::time::Duration),

    #[error("kv redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

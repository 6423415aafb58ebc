use thiserror::Error;

/// Error taxonomy for the progress bus (spec §4.5/§7).
#[derive(Debug, Error)]
pub enum BusError {
    #[error("request {0} is not registered")]
    NotRegistered(uuid::Uuid),

    #[error("request {0} has already started")]
    AlreadyStarted(uuid::Uuid),

    #[error("failed to encode progress event: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("failed to decrypt progress event: {0}")]
    Decrypt(#[from] gateway_envelope::EnvelopeError),

    #[error("kv store error: {0}")]
    Kv(#[from] gateway_kv::KvError),
}

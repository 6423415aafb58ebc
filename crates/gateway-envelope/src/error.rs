use thiserror::Error;

/// Error taxonomy for the symmetric envelope (spec §4.7).
#[derive(Debug, Error, Clone)]
pub enum EnvelopeError {
    #[error("envelope key must be {expected} bytes, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("malformed envelope: expected {expected} colon-delimited hex fields, got {actual}")]
    MalformedEnvelope { expected: usize, actual: usize },

    #[error("invalid hex in envelope field: {0}")]
    InvalidHex(String),

    #[error("decryption failed: authentication tag mismatch or corrupt ciphertext")]
    DecryptionFailed,
}

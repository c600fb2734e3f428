//! Error type shared by every crypto operation.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    /// No usable random source or crypto provider on this platform.
    #[error("crypto provider unavailable: {0}")]
    Unavailable(String),

    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    /// Exported key material could not be turned back into a live key.
    #[error("key import failed: {0}")]
    KeyImport(String),

    #[error("encryption failed: {0}")]
    Encrypt(String),

    #[error("decryption failed: {0}")]
    Decrypt(String),

    #[error("signing failed: {0}")]
    Sign(String),

    /// A payload was not valid JSON where JSON was required.
    #[error("invalid payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("invalid encoding: {0}")]
    Encoding(String),

    /// One entry of a batch failed; the batch as a whole has no result.
    #[error("batch entry {position} failed: {reason}")]
    BatchFailed { position: usize, reason: Box<CryptoError> },

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("crypto task failed: {0}")]
    Task(String),
}

impl From<tokio::task::JoinError> for CryptoError {
    fn from(e: tokio::task::JoinError) -> Self {
        CryptoError::Task(e.to_string())
    }
}

impl From<base64::DecodeError> for CryptoError {
    fn from(e: base64::DecodeError) -> Self {
        CryptoError::Encoding(e.to_string())
    }
}

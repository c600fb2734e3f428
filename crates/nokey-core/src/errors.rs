//! Error types for the hub.
//!
//! Every [`CoreError`] maps onto a wire-safe [`ErrorKind`] so that failures
//! can be reported to the requesting context on the dedicated `onError`
//! envelope without leaking internal detail into normal replies.

use thiserror::Error;

use nokey_crypto::CryptoError;
use nokey_proto::{ErrorKind, ErrorReport};

use crate::config::ConfigError;

/// Persistent storage failures.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend cannot be reached at all (missing directory, unreadable file).
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// A stored value exists but cannot be decoded.
    #[error("stored value {key:?} is corrupt: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Delivery failures on a single connection.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// The peer went away.
    #[error("peer disconnected")]
    Disconnected,

    /// The peer is not reading and its queue is full; the envelope was dropped.
    #[error("peer queue full")]
    Full,
}

/// File export failures.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("invalid file name: {0:?}")]
    InvalidName(String),

    #[error("no free name for {filename:?} after {attempts} attempts")]
    NoFreeName { filename: String, attempts: u32 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Umbrella error for hub operations.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Export(#[from] ExportError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl CoreError {
    /// Wire-safe category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::Crypto(e) => match e {
                CryptoError::Unavailable(_) => ErrorKind::CryptoUnavailable,
                CryptoError::KeyImport(_) => ErrorKind::KeyImportFailure,
                CryptoError::BatchFailed { .. } => ErrorKind::BatchFailure,
                CryptoError::Payload(_)
                | CryptoError::Encoding(_)
                | CryptoError::InvalidParameter(_) => ErrorKind::InvalidRequest,
                _ => ErrorKind::CryptoFailure,
            },
            CoreError::Store(_) => ErrorKind::StorageUnavailable,
            CoreError::Export(_) => ErrorKind::ExportFailure,
            CoreError::Config(_) => ErrorKind::Internal,
        }
    }

    /// Report for the `onError` envelope.
    pub fn report(&self, request: Option<&str>) -> ErrorReport {
        ErrorReport {
            kind: self.kind(),
            message: self.to_string(),
            request: request.map(str::to_owned),
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crypto_error_kinds() {
        let err = CoreError::from(CryptoError::KeyImport("bad n".into()));
        assert_eq!(err.kind(), ErrorKind::KeyImportFailure);

        let err = CoreError::from(CryptoError::BatchFailed {
            position: 3,
            reason: Box::new(CryptoError::Decrypt("padding".into())),
        });
        assert_eq!(err.kind(), ErrorKind::BatchFailure);
        assert!(err.to_string().contains("entry 3"));

        let err = CoreError::from(CryptoError::Unavailable("no rng".into()));
        assert_eq!(err.kind(), ErrorKind::CryptoUnavailable);
    }

    #[test]
    fn test_report_carries_request_tag() {
        let err = CoreError::from(StoreError::Unavailable("read-only".into()));
        let report = err.report(Some("storeState"));
        assert_eq!(report.kind, ErrorKind::StorageUnavailable);
        assert_eq!(report.request.as_deref(), Some("storeState"));
    }
}

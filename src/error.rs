//! Centralized error types for mailvault.

use std::path::PathBuf;
use thiserror::Error;

/// All errors produced by the mailvault library.
///
/// Fetch and normalization variants are per-item and non-fatal: the
/// orchestrator records them and moves on. Connection, search and storage
/// variants abort the call they occur in.
#[derive(Error, Debug)]
pub enum VaultError {
    /// The remote session could not be established after every retry.
    #[error("Could not connect to mail server after {attempts} attempt(s): {cause}")]
    ConnectionFailed { attempts: u32, cause: String },

    /// The session opened, but searching the window failed.
    #[error("Mailbox search failed: {cause}")]
    SearchFailed { cause: String },

    /// A single message could not be retrieved.
    #[error("Failed to fetch message {identifier}: {cause}")]
    FetchItemFailed { identifier: String, cause: String },

    /// A single message could not be normalized.
    #[error("Failed to normalize message {identifier}: {cause}")]
    NormalizationFailed { identifier: String, cause: String },

    /// The store could not complete the requested operation.
    #[error("Storage unavailable: {cause}")]
    StorageUnavailable { cause: String },

    /// No stored message belongs to the requested thread.
    #[error("Thread not found: {thread_id}")]
    ThreadNotFound { thread_id: String },

    /// I/O error with the associated file path.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The index file is corrupt or was written by an incompatible version.
    #[error("Corrupt or incompatible index '{path}': {reason}")]
    InvalidIndex { path: PathBuf, reason: String },
}

/// Convenience alias for `Result<T, VaultError>`.
pub type Result<T> = std::result::Result<T, VaultError>;

impl VaultError {
    /// Create an `Io` variant from a path and an `io::Error`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Wrap any storage-internal failure into `StorageUnavailable`.
    ///
    /// Errors that already carry the store boundary variant pass through.
    pub fn storage(err: impl Into<VaultError>) -> Self {
        match err.into() {
            e @ Self::StorageUnavailable { .. } => e,
            e @ Self::ThreadNotFound { .. } => e,
            other => Self::StorageUnavailable {
                cause: other.to_string(),
            },
        }
    }

    /// `true` for errors that abort the whole ingestion call.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Self::FetchItemFailed { .. }
                | Self::NormalizationFailed { .. }
                | Self::ThreadNotFound { .. }
        )
    }
}

/// Allow `?` on `std::io::Error` when no path context is available
/// (rare, prefer `VaultError::io`).
impl From<std::io::Error> for VaultError {
    fn from(source: std::io::Error) -> Self {
        Self::Io {
            path: PathBuf::from("<unknown>"),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_wraps_io() {
        let err = VaultError::storage(VaultError::io(
            "/tmp/x",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        ));
        match err {
            VaultError::StorageUnavailable { cause } => {
                assert!(cause.contains("/tmp/x"));
                assert!(cause.contains("denied"));
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn test_storage_keeps_lookup_miss() {
        let err = VaultError::storage(VaultError::ThreadNotFound {
            thread_id: "<t@x>".into(),
        });
        assert!(matches!(err, VaultError::ThreadNotFound { .. }));
    }

    #[test]
    fn test_fatality() {
        assert!(VaultError::ConnectionFailed {
            attempts: 3,
            cause: "refused".into()
        }
        .is_fatal());
        assert!(!VaultError::FetchItemFailed {
            identifier: "7".into(),
            cause: "timeout".into()
        }
        .is_fatal());
    }
}

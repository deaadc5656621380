//! Error taxonomy for the account store.

use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Rejected caller input, including oversized uploads and config files
    /// that do not parse.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Account already exists: {0}")]
    AlreadyExists(String),

    #[error("Account not found: {0}")]
    NotFound(String),

    /// Avatar filename extension outside the accepted set.
    #[error("Unsupported avatar format: {0} (use png, jpg, jpeg or gif)")]
    UnsupportedFormat(String),

    #[error("Corrupt document {}: {message}", path.display())]
    CorruptDocument { path: PathBuf, message: String },

    #[error("Storage failure on {}: {source}", path.display())]
    StorageFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StoreError {
    pub(crate) fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::StorageFailure {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn corrupt(path: impl Into<PathBuf>, message: impl ToString) -> Self {
        Self::CorruptDocument {
            path: path.into(),
            message: message.to_string(),
        }
    }

    /// Validation failures the caller can report back to the user and retry.
    ///
    /// `CorruptDocument` and `StorageFailure` are fatal to the operation.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::InvalidInput(_)
                | Self::AlreadyExists(_)
                | Self::NotFound(_)
                | Self::UnsupportedFormat(_)
        )
    }
}

use thiserror::Error;

use super::model::{DownloadId, DownloadStatus};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AppError {
    #[error("Invalid extension format '{0}'. Use publisher.extension-name")]
    InvalidIdentifier(String),

    #[error("Extension not found: {0}")]
    NotFound(String),

    #[error("Failed to query VS Code Marketplace: {0}")]
    UpstreamUnavailable(String),

    #[error("Network error: {0}")]
    NetworkFailure(String),

    #[error("Download cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Unknown download {0}")]
    UnknownDownload(DownloadId),

    #[error("Download {0} is already registered")]
    DuplicateDownload(DownloadId),

    #[error("Cannot {operation} download {id} while it is {status}")]
    InvalidTransition {
        id: DownloadId,
        status: DownloadStatus,
        operation: &'static str,
    },

    #[error("Nothing cached for download {0}")]
    NothingCached(DownloadId),

    #[error("Download {0} has no source URL yet")]
    NoSourceUrl(DownloadId),

    #[error("I/O error: {0}")]
    Io(String),
}

impl AppError {
    /// HTTP status the resolution endpoint reports for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            AppError::InvalidIdentifier(_) => 400,
            AppError::NotFound(_) => 404,
            _ => 500,
        }
    }
}

//! Unified error type for the update agent.

use std::path::PathBuf;

use thiserror::Error;

use super::category::ErrorCategory;
use crate::session::SessionState;
use crate::traits::{ChannelError, HttpError};

/// Error type shared by the store, downloader, applier and session.
#[derive(Debug, Error)]
pub enum OtaError {
    /// A record with this id is already known to the store.
    #[error("Update record '{id}' already exists")]
    DuplicateRecord { id: String },

    /// No record, or no archive, exists for this id.
    #[error("Update '{id}' not found")]
    NotFound { id: String },

    /// The record cannot be stored (for example its id is not a valid
    /// directory name).
    #[error("Invalid update record '{id}': {reason}")]
    InvalidRecord { id: String, reason: String },

    /// The session is not in a state that accepts the command.
    #[error("Cannot {operation} while session is {state}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },

    /// A staged update from the previous run is still being confirmed.
    #[error("Cannot {operation} while update '{id}' awaits confirmation")]
    ConfirmationPending { operation: &'static str, id: String },

    /// Filesystem operation failed.
    #[error("I/O error during {operation}{}: {source}", display_path(.path))]
    Io {
        operation: String,
        path: Option<PathBuf>,
        #[source]
        source: std::io::Error,
    },

    /// Record metadata could not be read or written.
    #[error("Invalid metadata at '{}': {source}", .path.display())]
    Metadata {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// HTTP transport failure.
    #[error("Download failed: {0}")]
    Http(#[from] HttpError),

    /// Download server answered with an unexpected status.
    #[error("Server returned HTTP {status} for '{url}'")]
    ServerError { status: u16, url: String },

    /// Downloaded archive length differs from the announced size.
    #[error("Size mismatch: expected {expected} bytes, got {actual} bytes")]
    SizeMismatch { expected: u64, actual: u64 },

    /// Downloaded archive hash differs from the announced hash.
    #[error("Checksum mismatch: expected '{expected}', got '{actual}'")]
    ChecksumMismatch { expected: String, actual: String },

    /// The update package has no usable payload.
    #[error("Invalid update package: {reason}")]
    InvalidPackage { reason: String },

    /// The archive could not be extracted.
    #[error("Failed to extract update archive: {message}")]
    Extract { message: String },

    /// The device reset hook failed after the application was shut down.
    #[error("Device reset failed: {source}")]
    ResetFailed {
        #[source]
        source: std::io::Error,
    },

    /// Control channel failure.
    #[error("Control channel error: {0}")]
    Channel(#[from] ChannelError),

    /// Configuration could not be loaded.
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// The session actor is no longer running.
    #[error("Update session is not running")]
    SessionClosed,
}

fn display_path(path: &Option<PathBuf>) -> String {
    match path {
        Some(p) => format!(" at '{}'", p.display()),
        None => String::new(),
    }
}

impl OtaError {
    /// Build an I/O error with the operation and path it happened on.
    pub fn io(operation: impl Into<String>, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        OtaError::Io {
            operation: operation.into(),
            path: Some(path.into()),
            source,
        }
    }

    /// Get the category of this error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            OtaError::DuplicateRecord { .. }
            | OtaError::NotFound { .. }
            | OtaError::InvalidRecord { .. }
            | OtaError::Metadata { .. } => ErrorCategory::Storage,

            OtaError::Io { source, .. } => classify_io_error(source),

            OtaError::InvalidState { .. }
            | OtaError::ConfirmationPending { .. }
            | OtaError::SessionClosed
            | OtaError::ResetFailed { .. } => ErrorCategory::State,

            OtaError::Http(_) | OtaError::Channel(_) => ErrorCategory::Network,

            OtaError::ServerError { .. } => ErrorCategory::Server,

            OtaError::SizeMismatch { .. } | OtaError::ChecksumMismatch { .. } => {
                ErrorCategory::Verification
            }

            OtaError::InvalidPackage { .. } | OtaError::Extract { .. } => ErrorCategory::Package,

            OtaError::Config { .. } => ErrorCategory::Configuration,
        }
    }

    /// Check if this error is likely transient and the operation can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            // A short download leaves a partial file that a later retrieve resumes.
            OtaError::SizeMismatch { .. } => true,
            _ => self.category().is_retryable(),
        }
    }

    /// Get a short error code suitable for logging.
    pub fn error_code(&self) -> &'static str {
        match self {
            OtaError::DuplicateRecord { .. } => "E_DUPLICATE",
            OtaError::NotFound { .. } => "E_NOT_FOUND",
            OtaError::InvalidRecord { .. } => "E_INVALID_RECORD",
            OtaError::InvalidState { .. } => "E_INVALID_STATE",
            OtaError::ConfirmationPending { .. } => "E_CONFIRM_PENDING",
            OtaError::Io { .. } => "E_IO",
            OtaError::Metadata { .. } => "E_METADATA",
            OtaError::Http(_) => "E_HTTP",
            OtaError::ServerError { .. } => "E_SERVER",
            OtaError::SizeMismatch { .. } => "E_SIZE_MISMATCH",
            OtaError::ChecksumMismatch { .. } => "E_CHECKSUM",
            OtaError::InvalidPackage { .. } => "E_INVALID_PACKAGE",
            OtaError::Extract { .. } => "E_EXTRACT",
            OtaError::ResetFailed { .. } => "E_RESET",
            OtaError::Channel(_) => "E_CHANNEL",
            OtaError::Config { .. } => "E_CONFIG",
            OtaError::SessionClosed => "E_SESSION_CLOSED",
        }
    }
}

/// Classify an I/O error by its kind.
///
/// Interrupted transfers count as network trouble; everything else that
/// touches the filesystem is a storage problem.
pub fn classify_io_error(err: &std::io::Error) -> ErrorCategory {
    use std::io::ErrorKind;

    match err.kind() {
        ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted
        | ErrorKind::ConnectionRefused
        | ErrorKind::BrokenPipe
        | ErrorKind::TimedOut
        | ErrorKind::UnexpectedEof => ErrorCategory::Network,
        _ => ErrorCategory::Storage,
    }
}

/// Check if an I/O error means the disk is full.
pub(crate) fn is_disk_space_error(err: &std::io::Error) -> bool {
    #[cfg(unix)]
    {
        // ENOSPC = 28 on most Unix systems
        err.raw_os_error() == Some(28)
    }
    #[cfg(not(unix))]
    {
        let msg = err.to_string().to_lowercase();
        msg.contains("no space") || msg.contains("disk full")
    }
}

impl From<zip::result::ZipError> for OtaError {
    fn from(e: zip::result::ZipError) -> Self {
        match e {
            zip::result::ZipError::Io(source) => OtaError::Io {
                operation: "extract".to_string(),
                path: None,
                source,
            },
            other => OtaError::Extract {
                message: other.to_string(),
            },
        }
    }
}

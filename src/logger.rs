//! Update pipeline logging.
//!
//! Download, verification and apply milestones are logged through
//! [`UpdateLogger`] so they share one target (`ota_agent::update`), one
//! level mapping and one message format.

use std::path::Path;
use std::time::{Duration, Instant};

use crate::error::OtaError;

/// Log level for update events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateLogLevel {
    /// Debug information (detailed progress)
    Debug,
    /// Informational messages (normal operations)
    Info,
    /// Warnings (recoverable issues)
    Warn,
    /// Errors (operation failures)
    Error,
}

/// Milestones of the update pipeline.
#[derive(Debug, Clone)]
pub enum UpdateLogEvent {
    // ========== Download Events ==========
    /// Starting a download
    DownloadStarted {
        id: String,
        url: String,
        resume_from: u64,
    },
    /// Download progress update
    DownloadProgress {
        id: String,
        bytes_downloaded: u64,
        total_bytes: Option<u64>,
        percent: Option<f32>,
    },
    /// Download completed successfully
    DownloadCompleted {
        id: String,
        file_path: String,
        file_size: u64,
        duration: Duration,
    },
    /// Download failed
    DownloadFailed {
        id: String,
        error: String,
        error_code: String,
        duration: Duration,
    },

    // ========== Verification Events ==========
    /// The announcement carried no hash
    HashMissing { id: String },
    /// The archive hash differs from the announced one
    HashMismatch {
        id: String,
        expected: String,
        actual: String,
        rejected: bool,
    },

    // ========== Apply Events ==========
    /// Starting to apply an update
    ApplyStarted {
        id: String,
        version: String,
        staging_path: String,
    },
    /// Archive extracted into staging
    PackageExtracted {
        id: String,
        entries: usize,
        duration: Duration,
    },
    /// Staged content has no payload
    PackageInvalid { id: String, reason: String },
    /// Apply failed before the reset
    ApplyFailed {
        id: String,
        error: String,
        error_code: String,
        duration: Duration,
    },
    /// Shutdown hook did not finish in time
    ShutdownTimedOut { timeout: Duration },
    /// Device reset is about to be triggered
    ResetRequested { id: String },

    // ========== Post-boot Events ==========
    /// A previously staged update was confirmed after restart
    UpdateConfirmed { id: String, version: String },
    /// Staging directory removed
    StagingCleared { path: String },
}

impl UpdateLogEvent {
    /// Get the log level for this event.
    pub fn level(&self) -> UpdateLogLevel {
        match self {
            UpdateLogEvent::DownloadStarted { .. }
            | UpdateLogEvent::DownloadProgress { .. }
            | UpdateLogEvent::PackageExtracted { .. }
            | UpdateLogEvent::StagingCleared { .. } => UpdateLogLevel::Debug,

            UpdateLogEvent::DownloadCompleted { .. }
            | UpdateLogEvent::ApplyStarted { .. }
            | UpdateLogEvent::ResetRequested { .. }
            | UpdateLogEvent::UpdateConfirmed { .. } => UpdateLogLevel::Info,

            UpdateLogEvent::HashMissing { .. }
            | UpdateLogEvent::PackageInvalid { .. }
            | UpdateLogEvent::ShutdownTimedOut { .. } => UpdateLogLevel::Warn,

            UpdateLogEvent::HashMismatch { rejected, .. } => {
                if *rejected {
                    UpdateLogLevel::Error
                } else {
                    UpdateLogLevel::Warn
                }
            }

            UpdateLogEvent::DownloadFailed { .. } | UpdateLogEvent::ApplyFailed { .. } => {
                UpdateLogLevel::Error
            }
        }
    }

    /// Short name of the event, used as a structured field.
    pub fn kind(&self) -> &'static str {
        match self {
            UpdateLogEvent::DownloadStarted { .. } => "download_started",
            UpdateLogEvent::DownloadProgress { .. } => "download_progress",
            UpdateLogEvent::DownloadCompleted { .. } => "download_completed",
            UpdateLogEvent::DownloadFailed { .. } => "download_failed",
            UpdateLogEvent::HashMissing { .. } => "hash_missing",
            UpdateLogEvent::HashMismatch { .. } => "hash_mismatch",
            UpdateLogEvent::ApplyStarted { .. } => "apply_started",
            UpdateLogEvent::PackageExtracted { .. } => "package_extracted",
            UpdateLogEvent::PackageInvalid { .. } => "package_invalid",
            UpdateLogEvent::ApplyFailed { .. } => "apply_failed",
            UpdateLogEvent::ShutdownTimedOut { .. } => "shutdown_timed_out",
            UpdateLogEvent::ResetRequested { .. } => "reset_requested",
            UpdateLogEvent::UpdateConfirmed { .. } => "update_confirmed",
            UpdateLogEvent::StagingCleared { .. } => "staging_cleared",
        }
    }

    /// Get a human-readable message for this event.
    pub fn message(&self) -> String {
        match self {
            UpdateLogEvent::DownloadStarted {
                id,
                url,
                resume_from,
            } => {
                if *resume_from > 0 {
                    format!(
                        "Resuming download of '{}' from {} at {}",
                        id,
                        url,
                        format_bytes(*resume_from)
                    )
                } else {
                    format!("Starting download of '{}' from {}", id, url)
                }
            }
            UpdateLogEvent::DownloadProgress {
                id,
                bytes_downloaded,
                total_bytes,
                percent,
            } => {
                let bytes_str = format_bytes(*bytes_downloaded);
                match (total_bytes, percent) {
                    (Some(total), Some(pct)) => format!(
                        "Downloading '{}': {} / {} ({:.1}%)",
                        id,
                        bytes_str,
                        format_bytes(*total),
                        pct
                    ),
                    _ => format!("Downloading '{}': {}", id, bytes_str),
                }
            }
            UpdateLogEvent::DownloadCompleted {
                id,
                file_path,
                file_size,
                duration,
            } => format!(
                "Download complete: '{}' ({}) saved to {} in {:.1}s",
                id,
                format_bytes(*file_size),
                file_path,
                duration.as_secs_f32()
            ),
            UpdateLogEvent::DownloadFailed {
                id,
                error,
                error_code,
                duration,
            } => format!(
                "Download of '{}' failed [{}]: {} (after {:.1}s)",
                id,
                error_code,
                error,
                duration.as_secs_f32()
            ),
            UpdateLogEvent::HashMissing { id } => format!(
                "Update '{}' has no download hash, accepting archive unverified",
                id
            ),
            UpdateLogEvent::HashMismatch {
                id,
                expected,
                actual,
                rejected,
            } => {
                let outcome = if *rejected {
                    "archive rejected"
                } else {
                    "accepting archive anyway"
                };
                format!(
                    "Hash mismatch for '{}': expected {}, got {} ({})",
                    id, expected, actual, outcome
                )
            }
            UpdateLogEvent::ApplyStarted {
                id,
                version,
                staging_path,
            } => format!("Applying '{}' ({}) via {}", id, version, staging_path),
            UpdateLogEvent::PackageExtracted {
                id,
                entries,
                duration,
            } => format!(
                "Extracted {} entries of '{}' in {:.1}s",
                entries,
                id,
                duration.as_secs_f32()
            ),
            UpdateLogEvent::PackageInvalid { id, reason } => {
                format!("Package '{}' is not applicable: {}", id, reason)
            }
            UpdateLogEvent::ApplyFailed {
                id,
                error,
                error_code,
                duration,
            } => format!(
                "Applying '{}' failed [{}]: {} (after {:.1}s)",
                id,
                error_code,
                error,
                duration.as_secs_f32()
            ),
            UpdateLogEvent::ShutdownTimedOut { timeout } => format!(
                "Application did not shut down within {:.1}s, resetting anyway",
                timeout.as_secs_f32()
            ),
            UpdateLogEvent::ResetRequested { id } => {
                format!("Resetting device to activate '{}'", id)
            }
            UpdateLogEvent::UpdateConfirmed { id, version } => {
                format!("Update '{}' ({}) is running", id, version)
            }
            UpdateLogEvent::StagingCleared { path } => {
                format!("Cleared staging directory {}", path)
            }
        }
    }
}

/// Format bytes in a human-readable way.
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}

/// Logger for one download or apply operation.
///
/// Remembers when the operation started so completion and failure events
/// carry a duration.
#[derive(Debug)]
pub struct UpdateLogger {
    operation_start: Option<Instant>,
}

impl Default for UpdateLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl UpdateLogger {
    /// Create a new UpdateLogger.
    pub fn new() -> Self {
        Self {
            operation_start: None,
        }
    }

    /// Start timing an operation.
    pub fn start_operation(&mut self) {
        self.operation_start = Some(Instant::now());
    }

    /// Get the elapsed duration since the operation started.
    pub fn elapsed(&self) -> Duration {
        self.operation_start
            .map(|start| start.elapsed())
            .unwrap_or_default()
    }

    /// Log an update event.
    pub fn log(&self, event: &UpdateLogEvent) {
        let message = event.message();
        let kind = event.kind();

        match event.level() {
            UpdateLogLevel::Debug => {
                tracing::debug!(target: "ota_agent::update", event_type = kind, "{}", message);
            }
            UpdateLogLevel::Info => {
                tracing::info!(target: "ota_agent::update", event_type = kind, "{}", message);
            }
            UpdateLogLevel::Warn => {
                tracing::warn!(target: "ota_agent::update", event_type = kind, "{}", message);
            }
            UpdateLogLevel::Error => {
                tracing::error!(target: "ota_agent::update", event_type = kind, "{}", message);
            }
        }
    }

    /// Log an error with its code and category.
    pub fn log_error(&self, error: &OtaError, context: &str) {
        tracing::error!(
            target: "ota_agent::update",
            error_code = %error.error_code(),
            error_category = %error.category(),
            retryable = %error.is_retryable(),
            context = %context,
            "Update error: {}",
            error
        );
    }

    // ========== Convenience methods for common events ==========

    /// Log the start of a download.
    pub fn log_download_started(&mut self, id: &str, url: &str, resume_from: u64) {
        self.start_operation();
        self.log(&UpdateLogEvent::DownloadStarted {
            id: id.to_string(),
            url: url.to_string(),
            resume_from,
        });
    }

    /// Log download progress.
    pub fn log_download_progress(&self, id: &str, bytes_downloaded: u64, total_bytes: Option<u64>) {
        let percent = total_bytes
            .filter(|total| *total > 0)
            .map(|total| (bytes_downloaded as f32 / total as f32) * 100.0);
        self.log(&UpdateLogEvent::DownloadProgress {
            id: id.to_string(),
            bytes_downloaded,
            total_bytes,
            percent,
        });
    }

    /// Log a successful download.
    pub fn log_download_completed(&self, id: &str, file_path: &Path, file_size: u64) {
        self.log(&UpdateLogEvent::DownloadCompleted {
            id: id.to_string(),
            file_path: file_path.display().to_string(),
            file_size,
            duration: self.elapsed(),
        });
    }

    /// Log a failed download.
    pub fn log_download_failed(&self, id: &str, error: &OtaError) {
        self.log(&UpdateLogEvent::DownloadFailed {
            id: id.to_string(),
            error: error.to_string(),
            error_code: error.error_code().to_string(),
            duration: self.elapsed(),
        });
    }

    /// Log the start of an apply.
    pub fn log_apply_started(&mut self, id: &str, version: &str, staging: &Path) {
        self.start_operation();
        self.log(&UpdateLogEvent::ApplyStarted {
            id: id.to_string(),
            version: version.to_string(),
            staging_path: staging.display().to_string(),
        });
    }

    /// Log a failed apply.
    pub fn log_apply_failed(&self, id: &str, error: &OtaError) {
        self.log(&UpdateLogEvent::ApplyFailed {
            id: id.to_string(),
            error: error.to_string(),
            error_code: error.error_code().to_string(),
            duration: self.elapsed(),
        });
    }
}

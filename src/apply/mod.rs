//! Applying a downloaded update.
//!
//! The apply sequence is:
//! 1. Resolve the archive (fails with `NotFound` when not retrieved)
//! 2. Empty the staging directory and extract the whole archive into it
//! 3. Check that an `app/` or `os/` payload with files was staged
//! 4. Leave a [`PendingMarker`] for post-boot confirmation
//! 5. Ask the application to shut down, bounded by a timeout
//! 6. Cancel the [`RunToken`] and reset the device
//!
//! Marking the record applied happens on the next start, see
//! [`reconcile_pending`].

mod extract;
mod pending;

pub use extract::PAYLOAD_DIRS;
pub use pending::{reconcile_pending, PendingMarker, PENDING_MARKER_FILE};

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::error::{OtaError, OtaResult};
use crate::logger::{UpdateLogEvent, UpdateLogger};
use crate::models::UpdateRecord;
use crate::store::UpdateStore;
use crate::traits::Platform;

/// Default bound on the application shutdown hook.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared flag telling the host's supervisor not to restart the main loop.
#[derive(Debug, Clone, Default)]
pub struct RunToken {
    cancelled: Arc<AtomicBool>,
}

impl RunToken {
    /// Create a token that is not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel the token. Every clone observes it.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Whether the token has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Extracts, validates and activates downloaded updates.
pub struct Applier {
    store: Arc<UpdateStore>,
    platform: Arc<dyn Platform>,
    staging_dir: PathBuf,
    shutdown_timeout: Duration,
    run_token: RunToken,
}

impl Applier {
    /// Create an applier staging into `staging_dir`.
    pub fn new(store: Arc<UpdateStore>, platform: Arc<dyn Platform>, staging_dir: impl Into<PathBuf>) -> Self {
        Self {
            store,
            platform,
            staging_dir: staging_dir.into(),
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            run_token: RunToken::new(),
        }
    }

    /// Set the bound on the application shutdown hook.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Share a run token with the host application.
    pub fn with_run_token(mut self, token: RunToken) -> Self {
        self.run_token = token;
        self
    }

    /// The run token cancelled right before the device reset.
    pub fn run_token(&self) -> &RunToken {
        &self.run_token
    }

    /// Staging directory used for extraction.
    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    /// Apply `record`.
    ///
    /// On real hardware a successful apply does not return because the
    /// device resets. Errors before the shutdown hook leave the running
    /// system untouched; [`OtaError::ResetFailed`] means the application
    /// was already asked to stop.
    pub async fn apply(&self, record: &UpdateRecord) -> OtaResult<()> {
        let mut logger = UpdateLogger::new();
        logger.log_apply_started(&record.id, &record.version, &self.staging_dir);

        let result = self.run(record, &logger).await;
        if let Err(e) = &result {
            logger.log_apply_failed(&record.id, e);
        }
        result
    }

    async fn run(&self, record: &UpdateRecord, logger: &UpdateLogger) -> OtaResult<()> {
        // A partial download leaves a file behind; only a retrieved record counts
        if !self.store.get(&record.id).is_some_and(|stored| stored.retrieved) {
            return Err(OtaError::NotFound {
                id: record.id.clone(),
            });
        }
        let archive = self.store.archive_path(&record.id)?;
        self.stage(record, archive, logger).await?;

        PendingMarker::for_record(record).save(&self.staging_dir)?;

        if tokio::time::timeout(self.shutdown_timeout, self.platform.shutdown_application())
            .await
            .is_err()
        {
            logger.log(&UpdateLogEvent::ShutdownTimedOut {
                timeout: self.shutdown_timeout,
            });
        }

        self.run_token.cancel();
        logger.log(&UpdateLogEvent::ResetRequested {
            id: record.id.clone(),
        });

        let platform = self.platform.clone();
        match tokio::task::spawn_blocking(move || platform.reset_device()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(source)) => Err(OtaError::ResetFailed { source }),
            Err(e) => Err(OtaError::ResetFailed {
                source: std::io::Error::new(std::io::ErrorKind::Other, e),
            }),
        }
    }

    /// Extract and validate on a blocking thread.
    async fn stage(&self, record: &UpdateRecord, archive: PathBuf, logger: &UpdateLogger) -> OtaResult<()> {
        let staging = self.staging_dir.clone();
        let started = Instant::now();

        let staged = tokio::task::spawn_blocking(move || {
            extract::reset_dir(&staging)?;
            let entries = extract::extract_archive(&archive, &staging)?;
            Ok::<_, OtaError>((entries, extract::validate_payload(&staging)))
        })
        .await
        .map_err(|e| OtaError::Extract {
            message: e.to_string(),
        })??;

        let (entries, payload) = staged;
        logger.log(&UpdateLogEvent::PackageExtracted {
            id: record.id.clone(),
            entries,
            duration: started.elapsed(),
        });

        match payload {
            Ok(found) => {
                debug!("Staged payload for '{}': {}", record.id, found.join(", "));
                Ok(())
            }
            Err(e) => {
                if let OtaError::InvalidPackage { reason } = &e {
                    logger.log(&UpdateLogEvent::PackageInvalid {
                        id: record.id.clone(),
                        reason: reason.clone(),
                    });
                }
                Err(e)
            }
        }
    }
}

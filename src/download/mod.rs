//! Archive download with resume and hash verification.
//!
//! [`Downloader::retrieve`] streams a record's archive into the store,
//! continuing a partial file when the [`ResumeStrategy`] allows it, checks
//! the final size and hash, and marks the record retrieved.

mod strategy;

pub use strategy::{HashPolicy, ResumeStrategy};

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::error::{is_disk_space_error, OtaError, OtaResult};
use crate::logger::{UpdateLogEvent, UpdateLogger};
use crate::models::UpdateRecord;
use crate::store::{compute_hash, hashes_match, ArchiveFile, UpdateStore};
use crate::traits::{Headers, HttpClient};

/// Downloads update archives into the store.
pub struct Downloader {
    store: Arc<UpdateStore>,
    client: Arc<dyn HttpClient>,
    range_resume: bool,
    hash_policy: HashPolicy,
}

impl Downloader {
    /// Create a downloader with range resume enabled and the default hash policy.
    pub fn new(store: Arc<UpdateStore>, client: Arc<dyn HttpClient>) -> Self {
        Self {
            store,
            client,
            range_resume: true,
            hash_policy: HashPolicy::default(),
        }
    }

    /// Enable or disable range resume.
    pub fn with_range_resume(mut self, enabled: bool) -> Self {
        self.range_resume = enabled;
        self
    }

    /// Set the hash mismatch policy.
    pub fn with_hash_policy(mut self, policy: HashPolicy) -> Self {
        self.hash_policy = policy;
        self
    }

    /// Strategy used for the next download.
    pub fn strategy(&self) -> ResumeStrategy {
        ResumeStrategy::select(self.range_resume, self.client.supports_range())
    }

    /// Download and verify the archive of `record`.
    ///
    /// Returns the record with `retrieved` set. On failure the partial file
    /// is kept so the next call can resume, except when the hash policy
    /// rejects the archive.
    pub async fn retrieve(&self, record: &UpdateRecord) -> OtaResult<UpdateRecord> {
        let mut logger = UpdateLogger::new();
        let result = self.fetch(record, &mut logger).await;
        if let Err(e) = &result {
            logger.log_download_failed(&record.id, e);
        }
        result
    }

    async fn fetch(&self, record: &UpdateRecord, logger: &mut UpdateLogger) -> OtaResult<UpdateRecord> {
        let mut archive = self.store.open_archive_for_write(&record.id)?;
        let path = archive.path().to_path_buf();
        let expected = record.download_size;
        let strategy = self.strategy();
        let mut headers = Headers::new();

        match strategy {
            ResumeStrategy::FullRestart => {
                if archive.resume_from() > 0 {
                    debug!(
                        "Discarding {} partial bytes of '{}'",
                        archive.resume_from(),
                        record.id
                    );
                }
                truncate(&mut archive)?;
            }
            ResumeStrategy::RangeResume => {
                let existing = archive.resume_from();
                if expected > 0 && existing > expected {
                    warn!(
                        "Partial archive of '{}' is longer than announced ({} > {}), restarting",
                        record.id, existing, expected
                    );
                    truncate(&mut archive)?;
                } else if expected > 0 && existing == expected {
                    debug!("Archive of '{}' already complete, skipping request", record.id);
                    drop(archive);
                    return self.finish(record, &path, logger).await;
                }
                if archive.resume_from() > 0 {
                    headers.insert(
                        "Range".to_string(),
                        format!("bytes={}-", archive.resume_from()),
                    );
                }
            }
        }

        logger.log_download_started(&record.id, &record.download_url, archive.resume_from());
        let response = self.client.get_stream(&record.download_url, &headers).await?;
        let resumed = archive.resume_from() > 0;

        match response.status {
            206 if resumed => {}
            416 if resumed => {
                debug!(
                    "Server reports nothing left to fetch for '{}'",
                    record.id
                );
                drop(archive);
                return self.finish(record, &path, logger).await;
            }
            status if (200..300).contains(&status) => {
                if resumed {
                    info!(
                        "Server ignored range request for '{}', downloading from the start",
                        record.id
                    );
                    truncate(&mut archive)?;
                }
            }
            status => {
                return Err(OtaError::ServerError {
                    status,
                    url: record.download_url.clone(),
                })
            }
        }

        let base = archive.resume_from();
        let total = if expected > 0 {
            Some(expected)
        } else {
            response.content_length.map(|len| len + base)
        };

        let mut file = tokio::fs::File::from_std(archive.into_file());
        let mut body = response.body;
        let mut written = base;
        let mut next_report = 10;

        while let Some(chunk) = body.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    // Keep what arrived so the next attempt can resume
                    let _ = file.flush().await;
                    return Err(e.into());
                }
            };
            file.write_all(&chunk)
                .await
                .map_err(|e| write_error(&path, e))?;
            written += chunk.len() as u64;

            if let Some(total) = total.filter(|t| *t > 0) {
                let percent = written.saturating_mul(100) / total;
                if percent >= next_report {
                    logger.log_download_progress(&record.id, written, Some(total));
                    next_report = (percent / 10 + 1) * 10;
                }
            }
        }

        file.flush().await.map_err(|e| write_error(&path, e))?;
        file.sync_all()
            .await
            .map_err(|e| OtaError::io("sync archive", &path, e))?;
        drop(file);

        self.finish(record, &path, logger).await
    }

    /// Validate the completed file and mark the record retrieved.
    async fn finish(
        &self,
        record: &UpdateRecord,
        path: &Path,
        logger: &UpdateLogger,
    ) -> OtaResult<UpdateRecord> {
        let actual = tokio::fs::metadata(path)
            .await
            .map_err(|e| OtaError::io("stat archive", path, e))?
            .len();
        if record.download_size > 0 && actual != record.download_size {
            return Err(OtaError::SizeMismatch {
                expected: record.download_size,
                actual,
            });
        }

        self.verify_hash(record, path.to_path_buf(), logger).await?;

        let updated = self.store.mark_retrieved(&record.id)?;
        logger.log_download_completed(&record.id, path, actual);
        Ok(updated)
    }

    async fn verify_hash(
        &self,
        record: &UpdateRecord,
        path: PathBuf,
        logger: &UpdateLogger,
    ) -> OtaResult<()> {
        if !record.has_hash() {
            logger.log(&UpdateLogEvent::HashMissing {
                id: record.id.clone(),
            });
            return Ok(());
        }

        let hash_path = path.clone();
        let actual = tokio::task::spawn_blocking(move || compute_hash(&hash_path))
            .await
            .map_err(|e| {
                OtaError::io(
                    "hash archive",
                    &path,
                    std::io::Error::new(std::io::ErrorKind::Other, e),
                )
            })??;

        if hashes_match(&record.download_hash, &actual) {
            debug!("Hash verified for '{}'", record.id);
            return Ok(());
        }

        let rejected = self.hash_policy == HashPolicy::Reject;
        logger.log(&UpdateLogEvent::HashMismatch {
            id: record.id.clone(),
            expected: record.download_hash.clone(),
            actual: actual.clone(),
            rejected,
        });

        if rejected {
            self.store.discard_archive(&record.id)?;
            return Err(OtaError::ChecksumMismatch {
                expected: record.download_hash.clone(),
                actual,
            });
        }
        Ok(())
    }
}

fn truncate(archive: &mut ArchiveFile) -> OtaResult<()> {
    let path = archive.path().to_path_buf();
    archive
        .truncate()
        .map_err(|e| OtaError::io("truncate archive", path, e))
}

fn write_error(path: &Path, e: std::io::Error) -> OtaError {
    if is_disk_space_error(&e) {
        warn!("No space left on device while writing {}", path.display());
    }
    OtaError::io("write archive", path, e)
}

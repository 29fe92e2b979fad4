//! Pending-update marker and post-boot reconciliation.
//!
//! The device reset ends the process, so an update cannot be marked applied
//! by the code that triggers the reset. Instead the applier leaves a marker
//! in the staging directory and the next agent start confirms the update.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{OtaError, OtaResult};
use crate::logger::{UpdateLogEvent, UpdateLogger};
use crate::models::UpdateRecord;
use crate::store::UpdateStore;

/// Marker file name inside the staging directory.
pub const PENDING_MARKER_FILE: &str = ".pending.json";

/// Record of an update that was staged and handed to the device reset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingMarker {
    /// Id of the staged record
    pub id: String,
    /// Version of the staged record
    #[serde(default)]
    pub version: String,
    /// When the package was staged
    pub staged_at: DateTime<Utc>,
}

impl PendingMarker {
    /// Marker for a record staged now.
    pub fn for_record(record: &UpdateRecord) -> Self {
        Self {
            id: record.id.clone(),
            version: record.version.clone(),
            staged_at: Utc::now(),
        }
    }

    /// Location of the marker in `staging`.
    pub fn path(staging: &Path) -> PathBuf {
        staging.join(PENDING_MARKER_FILE)
    }

    /// Write the marker and sync it to disk.
    pub fn save(&self, staging: &Path) -> OtaResult<()> {
        let path = Self::path(staging);
        let file = File::create(&path).map_err(|e| OtaError::io("write pending marker", &path, e))?;

        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, self).map_err(|source| OtaError::Metadata {
            path: path.clone(),
            source,
        })?;
        writer
            .flush()
            .map_err(|e| OtaError::io("write pending marker", &path, e))?;
        writer
            .get_ref()
            .sync_all()
            .map_err(|e| OtaError::io("sync pending marker", &path, e))
    }

    /// Read the marker from `staging`.
    ///
    /// Returns `None` if there is no marker or it cannot be parsed.
    pub fn load(staging: &Path) -> Option<Self> {
        let path = Self::path(staging);
        let file = File::open(&path).ok()?;

        match serde_json::from_reader(BufReader::new(file)) {
            Ok(marker) => Some(marker),
            Err(e) => {
                warn!("Unreadable pending marker {}: {}", path.display(), e);
                None
            }
        }
    }
}

/// Confirm an update staged before the last reset.
///
/// Does nothing when the staging directory has no marker. Otherwise waits
/// `grace` so the new software has run for a while, marks the record
/// applied (which reclaims its archive) and removes the staging directory.
/// If the marker was replaced or removed meanwhile, staging is left as is.
/// Returns the confirmed record, or `None` when there was nothing to confirm.
pub async fn reconcile_pending(
    store: &UpdateStore,
    staging: &Path,
    grace: Duration,
) -> OtaResult<Option<UpdateRecord>> {
    let marker_path = PendingMarker::path(staging);
    if !marker_path.exists() {
        return Ok(None);
    }

    let marker = PendingMarker::load(staging);
    debug!(
        "Pending update marker found, confirming after {:?}",
        grace
    );
    tokio::time::sleep(grace).await;

    // Staging belongs to whoever wrote the current marker
    if !staging.exists() || PendingMarker::load(staging) != marker {
        warn!(
            "Pending marker in {} changed during the grace period, leaving it alone",
            staging.display()
        );
        return Ok(None);
    }

    let logger = UpdateLogger::new();
    let confirmed = match marker.as_ref().and_then(|m| store.get(&m.id)) {
        Some(record) if record.applied => {
            debug!("Update '{}' was already confirmed", record.id);
            None
        }
        Some(record) => {
            let record = store.mark_applied(&record.id)?;
            logger.log(&UpdateLogEvent::UpdateConfirmed {
                id: record.id.clone(),
                version: record.version.clone(),
            });
            Some(record)
        }
        None => {
            warn!(
                "Pending marker does not name a known update, discarding staging directory {}",
                staging.display()
            );
            None
        }
    };

    fs::remove_dir_all(staging).map_err(|e| OtaError::io("remove staging directory", staging, e))?;
    logger.log(&UpdateLogEvent::StagingCleared {
        path: staging.display().to_string(),
    });
    Ok(confirmed)
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Persisted description of one available update.
///
/// Serialized as the `info.json` metadata file of the update store. Apart
/// from the `retrieved` and `applied` flags a record never changes once it
/// has been added.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateRecord {
    /// Backend-assigned identifier, unique and immutable
    pub id: String,
    /// When the backend published the update
    pub published_on: DateTime<Utc>,
    /// Version label of the update
    #[serde(default)]
    pub version: String,
    /// Where the archive is downloaded from
    pub download_url: String,
    /// Announced archive size in bytes (0 when unknown)
    #[serde(default)]
    pub download_size: u64,
    /// Expected SHA-256 of the archive as hex (empty when not supplied)
    #[serde(default)]
    pub download_hash: String,
    /// Short human-readable summary
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    /// Longer release notes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Archive fully downloaded (and hash-checked when a hash was supplied)
    #[serde(default)]
    pub retrieved: bool,
    /// Payload handed to the device for activation
    #[serde(default)]
    pub applied: bool,
}

impl UpdateRecord {
    /// Create a record with both flags cleared.
    pub fn new(
        id: impl Into<String>,
        version: impl Into<String>,
        download_url: impl Into<String>,
        published_on: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            published_on,
            version: version.into(),
            download_url: download_url.into(),
            download_size: 0,
            download_hash: String::new(),
            summary: None,
            detail: None,
            retrieved: false,
            applied: false,
        }
    }

    /// Set the announced archive size.
    pub fn with_size(mut self, size: u64) -> Self {
        self.download_size = size;
        self
    }

    /// Set the expected archive hash.
    pub fn with_hash(mut self, hash: impl Into<String>) -> Self {
        self.download_hash = hash.into();
        self
    }

    /// Set the summary text.
    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }

    /// Whether the backend supplied a hash to verify against.
    pub fn has_hash(&self) -> bool {
        !self.download_hash.trim().is_empty()
    }

    /// Name of the archive file inside the record's store directory.
    pub fn archive_file_name(&self) -> String {
        archive_file_name(&self.id)
    }
}

/// Archive file name for a record id.
pub(crate) fn archive_file_name(id: &str) -> String {
    format!("{}.zip", id)
}

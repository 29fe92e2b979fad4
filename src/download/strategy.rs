use serde::{Deserialize, Serialize};

/// How a partially downloaded archive is continued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeStrategy {
    /// Request the missing tail with `Range: bytes=<len>-` and append.
    RangeResume,
    /// Discard any partial file and download from byte 0.
    FullRestart,
}

impl ResumeStrategy {
    /// Pick the strategy for a download.
    ///
    /// Appending is only safe when the server returns the requested tail,
    /// so range resume needs both the setting and a client that forwards
    /// `Range` headers.
    pub fn select(range_resume_enabled: bool, client_supports_range: bool) -> Self {
        if range_resume_enabled && client_supports_range {
            ResumeStrategy::RangeResume
        } else {
            ResumeStrategy::FullRestart
        }
    }
}

impl std::fmt::Display for ResumeStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResumeStrategy::RangeResume => write!(f, "range-resume"),
            ResumeStrategy::FullRestart => write!(f, "full-restart"),
        }
    }
}

/// What to do when a downloaded archive does not match its announced hash.
///
/// `WarnOnly` keeps the long-standing behavior: the mismatch is logged and
/// the archive is accepted, because deployed backends still publish
/// packages with stale or missing hashes. Switch to `Reject` once the
/// backend is known to publish correct hashes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HashPolicy {
    /// Log the mismatch and mark the update retrieved anyway.
    #[default]
    WarnOnly,
    /// Delete the archive and fail the retrieval.
    Reject,
}

impl HashPolicy {
    /// Parse the names accepted in configuration and environment overrides.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "warn-only" | "warn" => Some(HashPolicy::WarnOnly),
            "reject" | "strict" => Some(HashPolicy::Reject),
            _ => None,
        }
    }
}

impl std::fmt::Display for HashPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HashPolicy::WarnOnly => write!(f, "warn-only"),
            HashPolicy::Reject => write!(f, "reject"),
        }
    }
}

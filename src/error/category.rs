//! Error category classification for unified error handling.
//!
//! Categories drive the agent's handling decisions: transient connectivity
//! problems are retried by the session loop, everything else is reported
//! through events and logs.

use std::fmt;

/// High-level categorization of errors for handling decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Control channel or HTTP connectivity (connect, timeout, disconnect).
    /// Generally transient and retryable.
    Network,

    /// Backend returned an error status or unexpected response.
    /// Generally transient and retryable after delay.
    Server,

    /// Local store, staging directory or archive I/O.
    Storage,

    /// Downloaded content failed size or hash checks.
    Verification,

    /// Update package is malformed or has no payload.
    Package,

    /// A command was issued in a session state that does not accept it.
    State,

    /// Configuration errors (missing settings, invalid config files).
    Configuration,
}

impl ErrorCategory {
    /// Returns true if errors in this category are generally transient
    /// and the operation can be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorCategory::Network | ErrorCategory::Server)
    }

    /// Returns a short label for the category suitable for logging.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Network => "network",
            ErrorCategory::Server => "server",
            ErrorCategory::Storage => "storage",
            ErrorCategory::Verification => "verification",
            ErrorCategory::Package => "package",
            ErrorCategory::State => "state",
            ErrorCategory::Configuration => "configuration",
        }
    }

    /// Returns a human-readable description of the category.
    pub fn description(&self) -> &'static str {
        match self {
            ErrorCategory::Network => "Network connectivity issue",
            ErrorCategory::Server => "Update backend issue",
            ErrorCategory::Storage => "Local storage problem",
            ErrorCategory::Verification => "Download verification failed",
            ErrorCategory::Package => "Invalid update package",
            ErrorCategory::State => "Operation not allowed in current session state",
            ErrorCategory::Configuration => "Configuration problem",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

use serde::Serialize;

/// Lifecycle state of the update session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SessionState {
    /// Not started, or stopped
    Dead,
    /// Waiting for the network or for the reconnect backoff
    Disconnected,
    /// Opening the control channel
    Connecting,
    /// Channel open, subscription pending
    Connected,
    /// Subscribed and listening for announcements
    Idle,
    /// An archive download is running
    DownloadingFile,
    /// An update is being applied; the device resets at the end
    UpdateInProgress,
}

impl SessionState {
    /// Get the state name.
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Dead => "Dead",
            SessionState::Disconnected => "Disconnected",
            SessionState::Connecting => "Connecting",
            SessionState::Connected => "Connected",
            SessionState::Idle => "Idle",
            SessionState::DownloadingFile => "DownloadingFile",
            SessionState::UpdateInProgress => "UpdateInProgress",
        }
    }

    /// Whether a download or apply task owns the session.
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            SessionState::DownloadingFile | SessionState::UpdateInProgress
        )
    }

    /// Whether the control channel is subscribed in this state.
    pub fn is_subscribed(&self) -> bool {
        matches!(self, SessionState::Idle) || self.is_busy()
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

//! Agent configuration.
//!
//! Loaded from an optional JSON file, then overridden from the environment:
//!
//! | Variable          | Field         |
//! |-------------------|---------------|
//! | `OTA_ROOT`        | `root`        |
//! | `OTA_BROKER_URL`  | `broker_url`  |
//! | `OTA_TOPIC`       | `topic`       |
//! | `OTA_HASH_POLICY` | `hash_policy` |
//!
//! Durations are written in milliseconds.
//!
//! # Example
//!
//! ```ignore
//! use ota_agent::config::AgentConfig;
//!
//! let config = AgentConfig::load("/etc/ota-agent.json")?
//!     .with_env_overrides()?
//!     .with_broker_url("wss://broker.example.com/ws");
//! ```

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::apply::DEFAULT_SHUTDOWN_TIMEOUT;
use crate::download::HashPolicy;
use crate::error::{OtaError, OtaResult};
use crate::session::{SessionConfig, DEFAULT_TOPIC};
use crate::store::STORE_DIR_NAME;

/// Directory name under the root where packages are staged.
pub const STAGING_DIR_NAME: &str = "update";

const APP_DIR_NAME: &str = "ota-agent";
const FALLBACK_ROOT: &str = "/var/lib/ota-agent";

/// Configuration of the agent binary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentConfig {
    /// Root directory holding the store and the staging directory
    pub root: PathBuf,
    /// Control channel broker (`ws://` or `wss://`)
    pub broker_url: String,
    /// Update topic, may contain `{deviceId}`
    pub topic: String,
    /// Resume partial downloads with `Range` requests
    pub range_resume: bool,
    /// What to do with an archive whose hash does not match
    pub hash_policy: HashPolicy,
    /// Download announced updates without waiting for an operator
    pub auto_retrieve: bool,
    /// Apply retrieved updates without waiting for an operator
    pub auto_apply: bool,
    #[serde(with = "duration_ms")]
    pub startup_delay: Duration,
    #[serde(with = "duration_ms")]
    pub network_retry_interval: Duration,
    #[serde(with = "duration_ms")]
    pub connect_timeout: Duration,
    #[serde(with = "duration_ms")]
    pub connect_backoff: Duration,
    #[serde(with = "duration_ms")]
    pub subscribe_timeout: Duration,
    #[serde(with = "duration_ms")]
    pub shutdown_timeout: Duration,
    #[serde(with = "duration_ms")]
    pub reconcile_grace: Duration,
    /// Command asking the application to stop (empty: none)
    pub shutdown_command: Vec<String>,
    /// Command resetting the device
    pub reset_command: Vec<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        let session = SessionConfig::default();
        Self {
            root: default_root(),
            broker_url: "ws://localhost:9001/ws".to_string(),
            topic: DEFAULT_TOPIC.to_string(),
            range_resume: true,
            hash_policy: HashPolicy::default(),
            auto_retrieve: true,
            auto_apply: false,
            startup_delay: session.startup_delay,
            network_retry_interval: session.network_retry_interval,
            connect_timeout: session.connect_timeout,
            connect_backoff: session.connect_backoff,
            subscribe_timeout: Duration::from_secs(10),
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            reconcile_grace: session.reconcile_grace,
            shutdown_command: Vec::new(),
            reset_command: vec!["reboot".to_string()],
        }
    }
}

/// Default root: the platform data directory, else `/var/lib/ota-agent`.
pub fn default_root() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join(APP_DIR_NAME))
        .unwrap_or_else(|| PathBuf::from(FALLBACK_ROOT))
}

impl AgentConfig {
    /// Create a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a JSON config file. Missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> OtaResult<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| OtaError::io("read config", path, e))?;
        serde_json::from_reader(BufReader::new(file)).map_err(|e| OtaError::Config {
            message: format!("{}: {}", path.display(), e),
        })
    }

    /// Apply `OTA_*` environment overrides.
    pub fn with_env_overrides(self) -> OtaResult<Self> {
        self.with_overrides(|name| std::env::var(name).ok())
    }

    /// Apply overrides from `lookup`, keyed by environment variable name.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> OtaResult<Self> {
        if let Some(root) = lookup("OTA_ROOT").filter(|v| !v.is_empty()) {
            self.root = PathBuf::from(root);
        }
        if let Some(url) = lookup("OTA_BROKER_URL").filter(|v| !v.is_empty()) {
            self.broker_url = url;
        }
        if let Some(topic) = lookup("OTA_TOPIC").filter(|v| !v.is_empty()) {
            self.topic = topic;
        }
        if let Some(policy) = lookup("OTA_HASH_POLICY").filter(|v| !v.is_empty()) {
            self.hash_policy = HashPolicy::parse(&policy).ok_or_else(|| OtaError::Config {
                message: format!("invalid OTA_HASH_POLICY '{}'", policy),
            })?;
        }
        Ok(self)
    }

    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    pub fn with_broker_url(mut self, url: impl Into<String>) -> Self {
        self.broker_url = url.into();
        self
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    pub fn with_range_resume(mut self, enabled: bool) -> Self {
        self.range_resume = enabled;
        self
    }

    pub fn with_hash_policy(mut self, policy: HashPolicy) -> Self {
        self.hash_policy = policy;
        self
    }

    /// Directory of the update store.
    pub fn store_dir(&self) -> PathBuf {
        self.root.join(STORE_DIR_NAME)
    }

    /// Directory packages are extracted into.
    pub fn staging_dir(&self) -> PathBuf {
        self.root.join(STAGING_DIR_NAME)
    }

    /// Session timing and addressing.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig::default()
            .with_startup_delay(self.startup_delay)
            .with_network_retry_interval(self.network_retry_interval)
            .with_connect_timeout(self.connect_timeout)
            .with_connect_backoff(self.connect_backoff)
            .with_reconcile_grace(self.reconcile_grace)
            .with_topic(self.topic.clone())
    }

    /// Check values the agent cannot run with.
    pub fn validate(&self) -> OtaResult<()> {
        if !(self.broker_url.starts_with("ws://") || self.broker_url.starts_with("wss://")) {
            return Err(OtaError::Config {
                message: format!("broker URL '{}' must be ws:// or wss://", self.broker_url),
            });
        }
        if self.topic.trim().is_empty() {
            return Err(OtaError::Config {
                message: "topic must not be empty".to_string(),
            });
        }
        if self.reset_command.is_empty() {
            return Err(OtaError::Config {
                message: "reset command must not be empty".to_string(),
            });
        }
        Ok(())
    }
}

/// Serialize a `Duration` as whole milliseconds.
mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = AgentConfig::default();
        assert!(config.range_resume);
        assert_eq!(config.hash_policy, HashPolicy::WarnOnly);
        assert!(config.auto_retrieve);
        assert!(!config.auto_apply);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(5));
        assert_eq!(config.topic, DEFAULT_TOPIC);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_derived_paths() {
        let config = AgentConfig::default().with_root("/data/ota");
        assert_eq!(config.store_dir(), PathBuf::from("/data/ota/update-store"));
        assert_eq!(config.staging_dir(), PathBuf::from("/data/ota/update"));
    }

    #[test]
    fn test_load_partial_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("agent.json");
        std::fs::write(
            &path,
            r#"{"brokerUrl":"wss://broker/ws","hashPolicy":"reject","connectBackoff":2500}"#,
        )
        .unwrap();

        let config = AgentConfig::load(&path).unwrap();

        assert_eq!(config.broker_url, "wss://broker/ws");
        assert_eq!(config.hash_policy, HashPolicy::Reject);
        assert_eq!(config.connect_backoff, Duration::from_millis(2500));
        assert_eq!(config.startup_delay, AgentConfig::default().startup_delay);
    }

    #[test]
    fn test_load_errors() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            AgentConfig::load(dir.path().join("missing.json")),
            Err(OtaError::Io { .. })
        ));

        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{ nope").unwrap();
        assert!(matches!(AgentConfig::load(&path), Err(OtaError::Config { .. })));
    }

    #[test]
    fn test_serialized_durations_are_millis() {
        let json = serde_json::to_value(AgentConfig::default()).unwrap();
        assert_eq!(json["shutdownTimeout"], 5000);
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [
            ("OTA_ROOT", "/tmp/ota"),
            ("OTA_TOPIC", "fleet/{deviceId}"),
            ("OTA_HASH_POLICY", "strict"),
            ("OTA_BROKER_URL", ""),
        ]
        .into_iter()
        .collect();

        let config = AgentConfig::default()
            .with_overrides(|name| env.get(name).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.root, PathBuf::from("/tmp/ota"));
        assert_eq!(config.topic, "fleet/{deviceId}");
        assert_eq!(config.hash_policy, HashPolicy::Reject);
        assert_eq!(config.broker_url, AgentConfig::default().broker_url);
        assert_eq!(config.session_config().topic_for("d1"), "fleet/d1");
    }

    #[test]
    fn test_invalid_hash_policy_override() {
        let result = AgentConfig::default().with_overrides(|name| {
            (name == "OTA_HASH_POLICY").then(|| "sometimes".to_string())
        });
        assert!(matches!(result, Err(OtaError::Config { .. })));
    }

    #[test]
    fn test_validate_rejects_http_broker() {
        let config = AgentConfig::default().with_broker_url("http://broker");
        assert!(config.validate().is_err());
    }
}

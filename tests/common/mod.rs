//! Common test utilities for integration tests.
//!
//! Provides a test agent wired to mock collaborators over a temporary root,
//! plus helpers for waiting on session events.
//!
//! # Example
//!
//! ```ignore
//! let agent = TestAgentBuilder::new().with_http(serving(URL, &archive)).build();
//! agent.session.start().await.unwrap();
//! ```

#![allow(dead_code)]

pub mod mocks;

pub use mocks::*;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use ota_agent::apply::{Applier, RunToken};
use ota_agent::download::{Downloader, HashPolicy};
use ota_agent::session::{SessionConfig, SessionState, UpdateEvent, UpdateSession};
use ota_agent::store::UpdateStore;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Topic the mock platform's device subscribes to.
pub const TOPIC: &str = "devices/test-device/updates";

/// Generous bound for anything the tests wait on.
pub const WAIT: Duration = Duration::from_secs(5);

/// Session timings short enough for tests.
pub fn fast_session_config() -> SessionConfig {
    SessionConfig::default()
        .with_startup_delay(Duration::from_millis(10))
        .with_network_retry_interval(Duration::from_millis(20))
        .with_connect_timeout(Duration::from_millis(500))
        .with_connect_backoff(Duration::from_millis(30))
        .with_reconcile_grace(Duration::from_millis(20))
}

/// An agent over mock collaborators.
pub struct TestAgent {
    pub root: PathBuf,
    pub store: Arc<UpdateStore>,
    pub channel: MockControlChannel,
    pub platform: MockPlatform,
    pub http: MockHttpClient,
    pub run_token: RunToken,
    pub session: UpdateSession,
    pub actor: JoinHandle<()>,
}

impl TestAgent {
    pub fn staging_dir(&self) -> PathBuf {
        self.root.join("update")
    }

    /// Start the session and wait for it to subscribe.
    pub async fn start_and_subscribe(&self) {
        self.session.start().await.unwrap();
        assert!(
            self.session.wait_for_state(SessionState::Idle, WAIT).await,
            "session did not reach Idle"
        );
    }

    /// Deliver an announcement on the update topic.
    pub fn announce(&self, payload: &str) {
        self.channel.inject_message(TOPIC, payload);
    }
}

/// Builder for [`TestAgent`].
pub struct TestAgentBuilder {
    root: Option<PathBuf>,
    http: MockHttpClient,
    platform: MockPlatform,
    hash_policy: HashPolicy,
    session_config: SessionConfig,
}

impl TestAgentBuilder {
    pub fn new() -> Self {
        Self {
            root: None,
            http: MockHttpClient::new(),
            platform: MockPlatform::new(),
            hash_policy: HashPolicy::WarnOnly,
            session_config: fast_session_config(),
        }
    }

    /// Reuse an existing root, as a restarted agent would.
    pub fn with_root(mut self, root: &Path) -> Self {
        self.root = Some(root.to_path_buf());
        self
    }

    pub fn with_http(mut self, http: MockHttpClient) -> Self {
        self.http = http;
        self
    }

    pub fn with_platform(mut self, platform: MockPlatform) -> Self {
        self.platform = platform;
        self
    }

    pub fn with_hash_policy(mut self, policy: HashPolicy) -> Self {
        self.hash_policy = policy;
        self
    }

    /// Let a staged update run this long before it is confirmed.
    pub fn with_reconcile_grace(mut self, grace: Duration) -> Self {
        self.session_config = self.session_config.with_reconcile_grace(grace);
        self
    }

    /// Build the agent. `root` must outlive it; pass a `TempDir` path.
    pub fn build(self) -> TestAgent {
        let root = self.root.expect("root is required");
        let store = Arc::new(UpdateStore::load(root.join("update-store")).unwrap());
        let channel = MockControlChannel::new();
        let run_token = RunToken::new();

        let downloader = Downloader::new(store.clone(), Arc::new(self.http.clone()))
            .with_hash_policy(self.hash_policy);
        let applier = Applier::new(store.clone(), Arc::new(self.platform.clone()), root.join("update"))
            .with_shutdown_timeout(Duration::from_millis(100))
            .with_run_token(run_token.clone());

        let (session, actor) = UpdateSession::spawn(
            self.session_config,
            store.clone(),
            Arc::new(channel.clone()),
            Arc::new(self.platform.clone()),
            downloader,
            applier,
        );

        TestAgent {
            root,
            store,
            channel,
            platform: self.platform,
            http: self.http,
            run_token,
            session,
            actor,
        }
    }
}

impl Default for TestAgentBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Next event, failing the test after [`WAIT`].
pub async fn next_event(rx: &mut broadcast::Receiver<UpdateEvent>) -> UpdateEvent {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for an update event")
        .expect("event bus closed")
}

/// Skip events until one of `kind` arrives.
pub async fn wait_for_event(rx: &mut broadcast::Receiver<UpdateEvent>, kind: &str) -> UpdateEvent {
    loop {
        let event = next_event(rx).await;
        if event.kind() == kind {
            return event;
        }
    }
}

//! Mock device platform for testing.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::traits::Platform;

/// Mock platform with switchable connectivity and counted hooks.
#[derive(Debug, Clone)]
pub struct MockPlatform {
    device_id: String,
    network_up: Arc<AtomicBool>,
    shutdown_delay: Duration,
    reset_fails: bool,
    shutdown_calls: Arc<AtomicUsize>,
    reset_calls: Arc<AtomicUsize>,
}

impl MockPlatform {
    /// Create a platform with the network up and device id `test-device`.
    pub fn new() -> Self {
        Self {
            device_id: "test-device".to_string(),
            network_up: Arc::new(AtomicBool::new(true)),
            shutdown_delay: Duration::ZERO,
            reset_fails: false,
            shutdown_calls: Arc::new(AtomicUsize::new(0)),
            reset_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Use a different device id.
    pub fn with_device_id(mut self, id: &str) -> Self {
        self.device_id = id.to_string();
        self
    }

    /// Make the shutdown hook take this long.
    pub fn with_shutdown_delay(mut self, delay: Duration) -> Self {
        self.shutdown_delay = delay;
        self
    }

    /// Make the reset hook return an error.
    pub fn with_reset_failure(mut self) -> Self {
        self.reset_fails = true;
        self
    }

    /// Switch network connectivity. Clones observe the change.
    pub fn set_network_up(&self, up: bool) {
        self.network_up.store(up, Ordering::SeqCst);
    }

    /// Number of shutdown hook invocations.
    pub fn shutdown_calls(&self) -> usize {
        self.shutdown_calls.load(Ordering::SeqCst)
    }

    /// Number of reset hook invocations.
    pub fn reset_calls(&self) -> usize {
        self.reset_calls.load(Ordering::SeqCst)
    }
}

impl Default for MockPlatform {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Platform for MockPlatform {
    fn is_network_up(&self) -> bool {
        self.network_up.load(Ordering::SeqCst)
    }

    fn device_id(&self) -> String {
        self.device_id.clone()
    }

    async fn shutdown_application(&self) {
        self.shutdown_calls.fetch_add(1, Ordering::SeqCst);
        if !self.shutdown_delay.is_zero() {
            tokio::time::sleep(self.shutdown_delay).await;
        }
    }

    fn reset_device(&self) -> std::io::Result<()> {
        self.reset_calls.fetch_add(1, Ordering::SeqCst);
        if self.reset_fails {
            Err(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "reset not permitted",
            ))
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_hooks_are_counted() {
        let platform = MockPlatform::new();
        let clone = platform.clone();

        clone.shutdown_application().await;
        clone.reset_device().unwrap();

        assert_eq!(platform.shutdown_calls(), 1);
        assert_eq!(platform.reset_calls(), 1);
    }

    #[test]
    fn test_network_toggle() {
        let platform = MockPlatform::new().with_device_id("d-42");
        assert!(platform.is_network_up());
        platform.set_network_up(false);
        assert!(!platform.clone().is_network_up());
        assert_eq!(platform.device_id(), "d-42");
    }

    #[test]
    fn test_reset_failure() {
        let platform = MockPlatform::new().with_reset_failure();
        assert!(platform.reset_device().is_err());
    }
}

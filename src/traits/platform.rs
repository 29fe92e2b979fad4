//! Device platform hooks consumed by the agent.

use async_trait::async_trait;

/// Narrow view of the host device: connectivity, identity, and the two
/// hooks used when applying an update.
#[async_trait]
pub trait Platform: Send + Sync {
    /// Whether any network interface is up.
    fn is_network_up(&self) -> bool;

    /// Stable unique identifier of this device.
    fn device_id(&self) -> String;

    /// Ask the running application to shut down. Best effort; the caller
    /// bounds this with its own timeout.
    async fn shutdown_application(&self);

    /// Reset the device.
    ///
    /// On real hardware this does not return on success. An `Err` means the
    /// reset could not be triggered.
    fn reset_device(&self) -> std::io::Result<()>;
}

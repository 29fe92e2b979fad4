//! Linux implementation of the [`Platform`] hooks.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::traits::Platform;

const SYS_CLASS_NET: &str = "/sys/class/net";
const MACHINE_ID: &str = "/etc/machine-id";

/// Platform hooks backed by sysfs and shell commands.
///
/// - network: any non-loopback interface whose `operstate` is `up`
/// - identity: `/etc/machine-id`, else the host name
/// - shutdown: optional command, awaited
/// - reset: the reboot command (default `reboot`)
#[derive(Debug, Clone)]
pub struct LinuxPlatform {
    net_dir: PathBuf,
    machine_id_path: PathBuf,
    shutdown_command: Option<Vec<String>>,
    reset_command: Vec<String>,
}

impl LinuxPlatform {
    pub fn new() -> Self {
        Self {
            net_dir: PathBuf::from(SYS_CLASS_NET),
            machine_id_path: PathBuf::from(MACHINE_ID),
            shutdown_command: None,
            reset_command: vec!["reboot".to_string()],
        }
    }

    /// Command run by the application shutdown hook.
    pub fn with_shutdown_command(mut self, command: Vec<String>) -> Self {
        self.shutdown_command = (!command.is_empty()).then_some(command);
        self
    }

    /// Command run to reset the device. An empty command keeps the default.
    pub fn with_reset_command(mut self, command: Vec<String>) -> Self {
        if !command.is_empty() {
            self.reset_command = command;
        }
        self
    }

    /// Read interfaces and identity from other locations (tests, chroots).
    pub fn with_roots(mut self, net_dir: impl Into<PathBuf>, machine_id: impl Into<PathBuf>) -> Self {
        self.net_dir = net_dir.into();
        self.machine_id_path = machine_id.into();
        self
    }

    fn interface_up(dir: &Path) -> bool {
        fs::read_to_string(dir.join("operstate"))
            .map(|state| state.trim() == "up")
            .unwrap_or(false)
    }
}

impl Default for LinuxPlatform {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Platform for LinuxPlatform {
    fn is_network_up(&self) -> bool {
        let Ok(entries) = fs::read_dir(&self.net_dir) else {
            return false;
        };
        entries
            .flatten()
            .filter(|entry| entry.file_name() != "lo")
            .any(|entry| Self::interface_up(&entry.path()))
    }

    fn device_id(&self) -> String {
        match fs::read_to_string(&self.machine_id_path) {
            Ok(id) if !id.trim().is_empty() => id.trim().to_string(),
            _ => hostname::get()
                .map(|h| h.to_string_lossy().to_string())
                .unwrap_or_else(|_| "unknown".to_string()),
        }
    }

    async fn shutdown_application(&self) {
        let Some(command) = &self.shutdown_command else {
            debug!("No shutdown command configured");
            return;
        };
        let Some((program, args)) = command.split_first() else {
            return;
        };

        info!("Running shutdown command: {}", command.join(" "));
        match tokio::process::Command::new(program).args(args).status().await {
            Ok(status) if status.success() => {}
            Ok(status) => warn!("Shutdown command exited with {}", status),
            Err(e) => warn!("Failed to run shutdown command: {}", e),
        }
    }

    fn reset_device(&self) -> io::Result<()> {
        let (program, args) = self
            .reset_command
            .split_first()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "empty reset command"))?;

        info!("Resetting device: {}", self.reset_command.join(" "));
        let status = Command::new(program).args(args).status()?;
        if status.success() {
            Ok(())
        } else {
            Err(io::Error::new(
                io::ErrorKind::Other,
                format!("reset command exited with {}", status),
            ))
        }
    }
}

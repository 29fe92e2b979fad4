//! CLI module for the agent.
//!
//! Handles argument parsing, configuration loading and the one-shot
//! commands. `run` is handled by `main`, which owns the async runtime.
//!
//! ```ignore
//! use ota_agent::cli::{parse_args, run_cli_command, CliCommand};
//!
//! let command = parse_args(std::env::args());
//! if let Some(result) = run_cli_command(&command) {
//!     if let Err(e) = result {
//!         eprintln!("Error: {}", e);
//!         std::process::exit(1);
//!     }
//!     std::process::exit(0);
//! }
//! ```

pub mod args;
pub mod version;

pub use args::{parse_args, CliCommand};
pub use version::{version_string, USAGE, VERSION};

use std::io::Write;
use std::path::Path;

use color_eyre::eyre::{eyre, WrapErr};
use color_eyre::Result;

use crate::apply::PendingMarker;
use crate::config::AgentConfig;
use crate::logger::format_bytes;
use crate::models::UpdateRecord;
use crate::store::UpdateStore;

/// Load the config file (if any) and apply environment overrides.
pub fn load_config(path: Option<&Path>) -> Result<AgentConfig> {
    let config = match path {
        Some(path) => AgentConfig::load(path)
            .wrap_err_with(|| format!("Failed to load config from {}", path.display()))?,
        None => AgentConfig::default(),
    };
    let config = config.with_env_overrides()?;
    config.validate()?;
    Ok(config)
}

/// Run a one-shot CLI command.
///
/// Returns `None` for [`CliCommand::Run`], which `main` handles.
pub fn run_cli_command(command: &CliCommand) -> Option<Result<()>> {
    let stdout = std::io::stdout();
    match command {
        CliCommand::Version => Some(writeln!(stdout.lock(), "{}", version_string()).map_err(Into::into)),
        CliCommand::Help => Some(writeln!(stdout.lock(), "{}", USAGE).map_err(Into::into)),
        CliCommand::Invalid(message) => Some(Err(eyre!("{}\n\n{}", message, USAGE))),
        CliCommand::List { config } => Some(
            load_config(config.as_deref()).and_then(|c| handle_list_command(&c, &mut stdout.lock())),
        ),
        CliCommand::Clear { config } => Some(
            load_config(config.as_deref()).and_then(|c| handle_clear_command(&c, &mut stdout.lock())),
        ),
        CliCommand::Run { .. } => None,
    }
}

/// Print every known record.
pub fn handle_list_command(config: &AgentConfig, out: &mut impl Write) -> Result<()> {
    let store = UpdateStore::load(config.store_dir())?;
    let records = store.records();
    if records.is_empty() {
        writeln!(out, "No updates in {}", store.root().display())?;
        return Ok(());
    }
    for record in &records {
        writeln!(out, "{}", describe(record))?;
    }
    Ok(())
}

/// Delete every record and archive.
///
/// Refused while a staged update waits for the agent to confirm it.
pub fn handle_clear_command(config: &AgentConfig, out: &mut impl Write) -> Result<()> {
    let staging = config.staging_dir();
    if PendingMarker::path(&staging).exists() {
        let id = PendingMarker::load(&staging)
            .map(|marker| marker.id)
            .unwrap_or_else(|| "<unreadable>".to_string());
        return Err(eyre!(
            "Update '{}' is staged in {} and not yet confirmed; start the agent to confirm it before clearing",
            id,
            staging.display()
        ));
    }

    let store = UpdateStore::load(config.store_dir())?;
    let count = store.len();
    store.clear()?;
    writeln!(out, "Removed {} update(s)", count)?;
    Ok(())
}

fn describe(record: &UpdateRecord) -> String {
    let status = if record.applied {
        "applied"
    } else if record.retrieved {
        "retrieved"
    } else {
        "available"
    };
    let size = if record.download_size > 0 {
        format_bytes(record.download_size)
    } else {
        "?".to_string()
    };
    format!(
        "{:<24} {:<12} {:<10} {:>10}  {}",
        record.id,
        record.version,
        status,
        size,
        record.published_on.format("%Y-%m-%d %H:%M")
    )
}

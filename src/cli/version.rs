//! Version and usage text.

/// The current version of the agent, read from Cargo.toml at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Usage text printed by `--help`.
pub const USAGE: &str = "\
Usage: ota-agent [--config <path>] [run|list|clear]

Commands:
  run      Connect to the broker and handle updates (default)
  list     Print known update records
  clear    Delete every update record and archive; stop the agent first.
           Refused while a staged update awaits confirmation.

Options:
  -c, --config <path>  JSON configuration file
  -V, --version        Print version
  -h, --help           Print this help

Environment:
  OTA_ROOT, OTA_BROKER_URL, OTA_TOPIC, OTA_HASH_POLICY override the file;
  RUST_LOG sets the log filter (default ota_agent=info).";

/// Version line, `ota-agent <version>`.
pub fn version_string() -> String {
    format!("ota-agent {}", VERSION)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_is_not_empty() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_version_format() {
        // Version should be in semver format (e.g., "0.1.0")
        let parts: Vec<&str> = VERSION.split('.').collect();
        assert!(parts.len() >= 2, "Version should have at least major.minor");
        assert!(version_string().starts_with("ota-agent "));
    }

    #[test]
    fn test_usage_lists_commands() {
        for command in ["run", "list", "clear", "--config"] {
            assert!(USAGE.contains(command));
        }
    }
}

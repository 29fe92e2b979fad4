//! Command-line argument parsing for the agent.

use std::path::PathBuf;

/// Parsed CLI command to execute.
#[derive(Debug, Clone, PartialEq)]
pub enum CliCommand {
    /// Show version information
    Version,
    /// Show usage
    Help,
    /// List known update records
    List { config: Option<PathBuf> },
    /// Delete every record and archive
    Clear { config: Option<PathBuf> },
    /// Run the agent (default)
    Run { config: Option<PathBuf> },
    /// Arguments could not be parsed
    Invalid(String),
}

/// Parse command-line arguments and return the appropriate command.
///
/// `--version` and `--help` win wherever they appear. The first bare word
/// selects the subcommand; `--config <path>` may come before or after it.
///
/// # Examples
///
/// ```
/// use ota_agent::cli::args::{parse_args, CliCommand};
///
/// let args = vec!["ota-agent".to_string(), "--version".to_string()];
/// assert_eq!(parse_args(args.into_iter()), CliCommand::Version);
/// ```
pub fn parse_args<I>(args: I) -> CliCommand
where
    I: Iterator<Item = String>,
{
    let mut config = None;
    let mut subcommand: Option<String> = None;
    // Skip the program name
    let mut args = args.skip(1);

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--version" | "-V" => return CliCommand::Version,
            "--help" | "-h" => return CliCommand::Help,
            "--config" | "-c" => match args.next() {
                Some(path) => config = Some(PathBuf::from(path)),
                None => return CliCommand::Invalid("--config requires a path".to_string()),
            },
            other if other.starts_with("--config=") => {
                config = Some(PathBuf::from(&other["--config=".len()..]));
            }
            other if other.starts_with('-') => {
                return CliCommand::Invalid(format!("unknown option '{}'", other));
            }
            other => {
                if let Some(first) = &subcommand {
                    return CliCommand::Invalid(format!(
                        "unexpected argument '{}' after '{}'",
                        other, first
                    ));
                }
                subcommand = Some(other.to_string());
            }
        }
    }

    match subcommand.as_deref() {
        None | Some("run") => CliCommand::Run { config },
        Some("list") => CliCommand::List { config },
        Some("clear") => CliCommand::Clear { config },
        Some(other) => CliCommand::Invalid(format!("unknown command '{}'", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> CliCommand {
        let mut all = vec!["ota-agent".to_string()];
        all.extend(args.iter().map(|a| a.to_string()));
        parse_args(all.into_iter())
    }

    #[test]
    fn test_parse_version_flag() {
        assert_eq!(parse(&["--version"]), CliCommand::Version);
        assert_eq!(parse(&["list", "-V"]), CliCommand::Version);
    }

    #[test]
    fn test_parse_help_flag() {
        assert_eq!(parse(&["-h"]), CliCommand::Help);
    }

    #[test]
    fn test_parse_no_args() {
        assert_eq!(parse(&[]), CliCommand::Run { config: None });
    }

    #[test]
    fn test_parse_subcommands_with_config() {
        let config = Some(PathBuf::from("/etc/ota.json"));
        assert_eq!(
            parse(&["--config", "/etc/ota.json", "list"]),
            CliCommand::List { config: config.clone() }
        );
        assert_eq!(
            parse(&["clear", "--config=/etc/ota.json"]),
            CliCommand::Clear { config: config.clone() }
        );
        assert_eq!(parse(&["run", "-c", "/etc/ota.json"]), CliCommand::Run { config });
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(parse(&["--config"]), CliCommand::Invalid(_)));
        assert!(matches!(parse(&["--unknown"]), CliCommand::Invalid(_)));
        assert!(matches!(parse(&["upgrade"]), CliCommand::Invalid(_)));
        assert!(matches!(parse(&["list", "clear"]), CliCommand::Invalid(_)));
    }
}

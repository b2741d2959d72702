//! Command line interface of the `flowledger` maintenance binary.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Maintenance for the flowledger status ledger and its payload archive.
#[derive(Debug, Parser)]
#[command(name = "flowledger", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Configuration file.
    #[arg(long, global = true, default_value = flowledger::config::DEFAULT_PATH)]
    pub config: PathBuf,

    /// JSON store snapshot to operate on.
    #[arg(long, global = true, default_value = "flow-store.json")]
    pub store: PathBuf,

    /// Enables debug logging.
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Archives hot payloads older than the compression timeout.
    Compress {
        /// Only statuses owned by records of this kind.
        kind: Option<String>,

        /// Compress a single status instead of sweeping.
        #[arg(long, conflicts_with = "kind")]
        id: Option<u64>,
    },

    /// Drops restored payloads older than the purge timeout.
    Purge {
        /// Purge a single status instead of sweeping.
        #[arg(long)]
        id: Option<u64>,
    },

    /// Restores an archived payload into its status row and prints it.
    Extract {
        status_id: u64,
    },

    /// Prints the status history of one record.
    History {
        kind: String,
        id: u64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_parses_compress_with_kind() {
        let cli = Cli::parse_from(["flowledger", "compress", "payment"]);
        match cli.command {
            Command::Compress { kind, id } => {
                assert_eq!(kind.as_deref(), Some("payment"));
                assert!(id.is_none());
            }
            _ => panic!("expected Compress command"),
        }
        assert_eq!(cli.config, PathBuf::from("flow.toml"));
        assert_eq!(cli.store, PathBuf::from("flow-store.json"));
    }

    #[test]
    fn cli_parses_global_flags() {
        let cli = Cli::parse_from([
            "flowledger",
            "--config",
            "/etc/flow.toml",
            "--store",
            "/var/lib/flow.json",
            "--verbose",
            "purge",
        ]);
        assert!(cli.verbose);
        assert_eq!(cli.config, PathBuf::from("/etc/flow.toml"));
        assert_eq!(cli.store, PathBuf::from("/var/lib/flow.json"));
        assert!(matches!(cli.command, Command::Purge { id: None }));
    }

    #[test]
    fn cli_parses_history() {
        let cli = Cli::parse_from(["flowledger", "history", "order", "42"]);
        match cli.command {
            Command::History { kind, id } => {
                assert_eq!(kind, "order");
                assert_eq!(id, 42);
            }
            _ => panic!("expected History command"),
        }
    }

    #[test]
    fn single_compress_excludes_kind() {
        assert!(Cli::try_parse_from(["flowledger", "compress", "order", "--id", "3"]).is_err());
        let cli = Cli::parse_from(["flowledger", "extract", "7"]);
        assert!(matches!(cli.command, Command::Extract { status_id: 7 }));
    }

    #[test]
    fn cli_verify() {
        Cli::command().debug_assert();
    }
}

//! Command-line interface

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};

/// Reliability control plane for multi-provider payment integrations
#[derive(Parser, Debug)]
#[command(name = "payments-reliability")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "PAYMENTS_RELIABILITY_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        long,
        default_value = "info",
        env = "PAYMENTS_RELIABILITY_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "PAYMENTS_RELIABILITY_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand (optional - defaults to serve)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run every control loop, ingesting JSON-line events from stdin (default)
    Serve,

    /// Audit ledger commands
    #[command(subcommand)]
    Audit(AuditCommand),

    /// Print the effective configuration
    Config {
        /// Output format
        #[arg(short, long, value_enum, default_value_t = ConfigFormat::Yaml)]
        format: ConfigFormat,
    },
}

/// Audit subcommands
#[derive(Subcommand, Debug)]
pub enum AuditCommand {
    /// Re-verify the hash chain of a persisted ledger
    Verify {
        /// Ledger storage directory
        #[arg(required = true)]
        dir: PathBuf,
    },

    /// Export persisted entries
    Export {
        /// Ledger storage directory
        #[arg(required = true)]
        dir: PathBuf,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = ExportFormat::Json)]
        format: ExportFormat,

        /// Only entries with this action
        #[arg(long)]
        action: Option<String>,

        /// Only entries by this actor id
        #[arg(long)]
        actor: Option<String>,

        /// Only entries at or after this RFC 3339 timestamp
        #[arg(long)]
        since: Option<DateTime<Utc>>,

        /// Maximum entries (newest first)
        #[arg(short, long)]
        limit: Option<usize>,

        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

/// Audit export formats
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExportFormat {
    /// Pretty-printed JSON array
    Json,
    /// CSV with a header row
    Csv,
}

/// Config dump formats
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfigFormat {
    /// YAML
    Yaml,
    /// JSON
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_subcommand_means_serve() {
        let cli = Cli::parse_from(["payments-reliability"]);
        assert!(cli.command.is_none());
        assert_eq!(cli.log_level, "info");
    }

    #[test]
    fn audit_export_parses_filters() {
        let cli = Cli::parse_from([
            "payments-reliability",
            "audit",
            "export",
            "/var/lib/audit",
            "--format",
            "csv",
            "--action",
            "scaling.forced",
            "--since",
            "2024-07-01T00:00:00Z",
            "--limit",
            "10",
        ]);

        match cli.command {
            Some(Command::Audit(AuditCommand::Export {
                dir,
                format,
                action,
                since,
                limit,
                ..
            })) => {
                assert_eq!(dir, PathBuf::from("/var/lib/audit"));
                assert_eq!(format, ExportFormat::Csv);
                assert_eq!(action.as_deref(), Some("scaling.forced"));
                assert!(since.is_some());
                assert_eq!(limit, Some(10));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn global_flags_follow_subcommands() {
        let cli = Cli::parse_from([
            "payments-reliability",
            "config",
            "--log-format",
            "json",
            "--config",
            "reliability.yaml",
        ]);
        assert_eq!(cli.log_format.as_deref(), Some("json"));
        assert_eq!(cli.config, Some(PathBuf::from("reliability.yaml")));
    }
}

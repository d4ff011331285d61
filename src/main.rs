//! Payments Reliability - control plane runner and audit tooling

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

use payments_reliability::{
    audit::{AuditFilter, AuditLedger, verify_directory},
    cli::{AuditCommand, Cli, Command, ConfigFormat, ExportFormat},
    config::{AuditConfig, Config},
    plane::{InboundEvent, ReliabilityPlane},
    setup_tracing,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    match cli.command {
        Some(Command::Audit(cmd)) => run_audit_command(cmd),
        Some(Command::Config { format }) => run_config(cli.config.as_deref(), format),
        Some(Command::Serve) | None => run_server(cli.config.as_deref()).await,
    }
}

fn load_config(path: Option<&Path>) -> Option<Config> {
    match Config::load(path) {
        Ok(config) => Some(config),
        Err(e) => {
            eprintln!("❌ Failed to load config: {e}");
            None
        }
    }
}

/// Print the effective configuration
fn run_config(path: Option<&Path>, format: ConfigFormat) -> ExitCode {
    let Some(config) = load_config(path) else {
        return ExitCode::FAILURE;
    };
    let rendered = match format {
        ConfigFormat::Yaml => serde_yaml::to_string(&config).map_err(|e| e.to_string()),
        ConfigFormat::Json => serde_json::to_string_pretty(&config).map_err(|e| e.to_string()),
    };
    match rendered {
        Ok(text) => {
            println!("{text}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("❌ Failed to render config: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Run audit ledger commands
fn run_audit_command(cmd: AuditCommand) -> ExitCode {
    match cmd {
        AuditCommand::Verify { dir } => match verify_directory(&dir) {
            Ok(report) => {
                match serde_json::to_string_pretty(&report) {
                    Ok(json) => println!("{json}"),
                    Err(e) => eprintln!("❌ Failed to serialize report: {e}"),
                }
                if report.valid {
                    eprintln!("✅ {} entries verified", report.entries_checked);
                    ExitCode::SUCCESS
                } else {
                    eprintln!("❌ {} integrity error(s)", report.errors.len());
                    ExitCode::FAILURE
                }
            }
            Err(e) => {
                eprintln!("❌ Verification failed: {e}");
                ExitCode::FAILURE
            }
        },

        AuditCommand::Export {
            dir,
            format,
            action,
            actor,
            since,
            limit,
            output,
        } => {
            let filter = AuditFilter {
                action,
                actor_id: actor,
                since,
                limit,
                ..AuditFilter::default()
            };
            match export(&dir, format, &filter, output.as_ref()) {
                Ok(()) => ExitCode::SUCCESS,
                Err(e) => {
                    eprintln!("❌ Export failed: {e}");
                    ExitCode::FAILURE
                }
            }
        }
    }
}

fn export(
    dir: &Path,
    format: ExportFormat,
    filter: &AuditFilter,
    output: Option<&PathBuf>,
) -> payments_reliability::Result<()> {
    if !dir.is_dir() {
        return Err(payments_reliability::Error::Config(format!(
            "Audit directory not found: {}",
            dir.display()
        )));
    }
    let ledger = AuditLedger::open(&AuditConfig {
        storage_dir: Some(dir.to_path_buf()),
        ..AuditConfig::default()
    })?;
    let rendered = match format {
        ExportFormat::Json => ledger.export_to_json(filter)?,
        ExportFormat::Csv => ledger.export_to_csv(filter)?,
    };
    match output {
        Some(path) => {
            std::fs::write(path, rendered)?;
            eprintln!("✅ Exported to {}", path.display());
        }
        None => println!("{rendered}"),
    }
    Ok(())
}

/// Run every control loop until stdin closes or a shutdown signal arrives
async fn run_server(path: Option<&Path>) -> ExitCode {
    let Some(config) = load_config(path) else {
        return ExitCode::FAILURE;
    };
    let plane = match ReliabilityPlane::new(&config) {
        Ok(plane) => plane,
        Err(e) => {
            error!(error = %e, "Failed to build reliability plane");
            return ExitCode::FAILURE;
        }
    };

    plane.start_all();
    info!("Reading events from stdin");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutdown signal received");
                break;
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<InboundEvent>(line) {
                        Ok(event) => plane.ingest(event),
                        Err(e) => warn!(error = %e, "Ignoring malformed event line"),
                    }
                }
                Ok(None) => {
                    info!("Input closed");
                    break;
                }
                Err(e) => {
                    error!(error = %e, "Failed to read stdin");
                    break;
                }
            }
        }
    }

    plane.stop_all();

    match serde_json::to_string_pretty(&plane.status()) {
        Ok(json) => {
            println!("{json}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("❌ Failed to serialize status: {e}");
            ExitCode::FAILURE
        }
    }
}

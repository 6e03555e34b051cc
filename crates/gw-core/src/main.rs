//! Gatewarden - update and recovery daemon for edge camera controllers
//!
//! The main entry point, handling:
//! - The foreground daemon (scheduled backups, update polling, recovery)
//! - Operator commands for backups, updates and recovery state
//! - Configuration inspection

use clap::{Args, Parser, Subcommand, ValueEnum};
use gw_common::{format_error_human, BackupId, OutputFormat, RunId, StructuredError, SCHEMA_VERSION};
use gw_config::{load_config, ConfigError, ConfigOptions, ConfigSnapshot, ResolvedConfig};
use gw_core::backup::{BackupType, RecordStatus, RestoreTarget};
use gw_core::daemon;
use gw_core::exit_codes::ExitCode;
use gw_core::logging::{init_logging, LogConfig, LogFormat, LogLevel};
use gw_core::recovery::{self, Domain, RecoveryStatus};
use gw_core::runtime::Runtime;
use gw_core::update::UpdateOutcome;
use gw_core::version::read_version;
use std::io::IsTerminal;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "gatewarden")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    global: GlobalOpts,
}

#[derive(Args, Debug)]
struct GlobalOpts {
    /// Path to gatewarden.json
    #[arg(long, global = true, env = "GW_CONFIG")]
    config: Option<String>,

    #[arg(long, short = 'f', global = true, default_value = "json")]
    format: OutputFormat,

    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[arg(short, long, global = true)]
    quiet: bool,

    #[arg(long, global = true)]
    no_color: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the backup, update and recovery loops until SIGINT/SIGTERM
    Run,

    Backup(BackupArgs),

    Update(UpdateArgs),

    Recovery(RecoveryArgs),

    Config(ConfigArgs),

    Version,
}

// ============================================================================
// Command argument structs
// ============================================================================

#[derive(Args, Debug)]
struct BackupArgs {
    #[command(subcommand)]
    command: BackupCommands,
}

#[derive(Subcommand, Debug)]
enum BackupCommands {
    /// Create a backup now
    Create {
        /// Registry items to include (defaults to the manual item set)
        #[arg(long, value_delimiter = ',')]
        items: Vec<String>,

        #[arg(long = "type", value_enum, default_value = "manual")]
        kind: BackupType,

        #[arg(long)]
        description: Option<String>,
    },
    /// List known backups, newest first
    List {
        #[arg(long = "type", value_enum)]
        kind: Option<BackupType>,

        #[arg(long)]
        limit: Option<usize>,
    },
    /// Show one backup record
    Show { id: BackupId },
    /// Restore a backup by id or archive path
    Restore {
        target: String,

        #[arg(long, value_delimiter = ',')]
        items: Vec<String>,
    },
    /// Check an archive's integrity without restoring
    Verify { target: String },
    /// Apply the retention policy now
    Cleanup,
    Stats,
    /// Restore audit trail
    History {
        #[arg(long)]
        limit: Option<usize>,
    },
}

#[derive(Args, Debug)]
struct UpdateArgs {
    #[command(subcommand)]
    command: UpdateCommands,
}

#[derive(Subcommand, Debug)]
enum UpdateCommands {
    /// Ask the update server for a newer version
    Check,
    /// Install the available update
    Apply {
        /// Install even when no earlier check reported an update
        #[arg(long)]
        force: bool,
    },
    Status,
    /// Turn automatic installation on or off
    Auto {
        #[arg(value_enum)]
        mode: Toggle,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Toggle {
    On,
    Off,
}

#[derive(Args, Debug)]
struct RecoveryArgs {
    #[command(subcommand)]
    command: RecoveryCommands,
}

#[derive(Subcommand, Debug)]
enum RecoveryCommands {
    /// Per-domain failure counters as last persisted by the daemon
    Status,
    /// Clear a domain's critical state; the daemon picks it up on its next tick
    Reset { domain: Domain },
}

#[derive(Args, Debug)]
struct ConfigArgs {
    #[command(subcommand)]
    command: ConfigCommands,
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Print the effective configuration
    Show,
    /// Load and validate the configuration
    Validate,
}

fn main() {
    let cli = Cli::parse();

    // Without -q/-v the environment decides the level.
    let log_level = (cli.global.quiet || cli.global.verbose > 0)
        .then(|| LogLevel::from_flags(cli.global.quiet, cli.global.verbose));
    let log_format = if matches!(cli.global.format, OutputFormat::Json) {
        LogFormat::Jsonl
    } else {
        LogFormat::Human
    };
    init_logging(&LogConfig::from_env(log_level, Some(log_format)));

    let exit_code = match cli.command {
        None | Some(Commands::Run) => run_daemon(&cli.global),
        Some(Commands::Backup(args)) => run_backup(&cli.global, &args),
        Some(Commands::Update(args)) => run_update(&cli.global, &args),
        Some(Commands::Recovery(args)) => run_recovery(&cli.global, &args),
        Some(Commands::Config(args)) => run_config(&cli.global, &args),
        Some(Commands::Version) => {
            print_version(&cli.global);
            ExitCode::Clean
        }
    };

    std::process::exit(exit_code.as_i32());
}

// ============================================================================
// Command handlers
// ============================================================================

fn run_daemon(global: &GlobalOpts) -> ExitCode {
    let runtime = match open_runtime(global, "run") {
        Ok(runtime) => runtime,
        Err(code) => return code,
    };
    match daemon::run_until_signal(&runtime) {
        Ok(true) => ExitCode::Clean,
        Ok(false) => ExitCode::Partial,
        Err(e) => output_error(global, "run", &e.into()),
    }
}

fn run_backup(global: &GlobalOpts, args: &BackupArgs) -> ExitCode {
    let command = "backup";
    let runtime = match open_runtime(global, command) {
        Ok(runtime) => runtime,
        Err(code) => return code,
    };
    let backups = &runtime.backups;

    let result: Result<(serde_json::Value, String, ExitCode), gw_common::Error> = (|| {
        Ok(match &args.command {
            BackupCommands::Create {
                items,
                kind,
                description,
            } => {
                let record = match (items.is_empty(), kind) {
                    (true, BackupType::Manual) => backups.create_manual(description.as_deref())?,
                    (true, BackupType::Daily) => backups.create_daily()?,
                    (true, BackupType::Weekly) => backups.create_weekly()?,
                    (false, _) => backups.create(items, *kind, description.as_deref())?,
                };
                let summary = format!(
                    "created {} ({} bytes, {})",
                    record.name,
                    record.size_bytes,
                    record.status.as_str()
                );
                let code = if record.status == RecordStatus::Partial {
                    ExitCode::Partial
                } else {
                    ExitCode::Clean
                };
                (serde_json::to_value(&record)?, summary, code)
            }
            BackupCommands::List { kind, limit } => {
                let listings = backups.list(*kind, *limit)?;
                let summary = format!("{} backups", listings.len());
                (serde_json::to_value(&listings)?, summary, ExitCode::Clean)
            }
            BackupCommands::Show { id } => {
                let listing = backups
                    .get(*id)?
                    .ok_or_else(|| gw_common::Error::NotFound(format!("backup {id}")))?;
                let summary = format!(
                    "#{} {} {} ({})",
                    listing.record.id,
                    listing.record.name,
                    listing.record.backup_type.as_str(),
                    if listing.exists { "on disk" } else { "missing" }
                );
                (serde_json::to_value(&listing)?, summary, ExitCode::Clean)
            }
            BackupCommands::Restore { target, items } => {
                let target = parse_target(target);
                let items = (!items.is_empty()).then_some(items.as_slice());
                let event = backups.restore(&target, items)?;
                let summary = format!(
                    "restored {} from {} ({})",
                    event.notes.join(","),
                    target,
                    event.status.as_str()
                );
                let code = if event.status == RecordStatus::Partial {
                    ExitCode::Partial
                } else {
                    ExitCode::Clean
                };
                (serde_json::to_value(&event)?, summary, code)
            }
            BackupCommands::Verify { target } => {
                let target = parse_target(target);
                let verified = backups.verify(&target)?;
                let data = serde_json::json!({
                    "path": verified.path.display().to_string(),
                    "valid": true,
                    "manifest": verified.manifest,
                });
                (data, format!("{target} is intact"), ExitCode::Clean)
            }
            BackupCommands::Cleanup => {
                let removed = backups.cleanup()?;
                let summary = format!("removed {} backups", removed.len());
                (serde_json::json!({ "removed": removed }), summary, ExitCode::Clean)
            }
            BackupCommands::Stats => {
                let stats = backups.stats()?;
                let summary = format!(
                    "{} bytes across {} backups, {} restores",
                    stats.total_size_bytes,
                    stats.by_type.values().sum::<u64>(),
                    stats.total_restores
                );
                (serde_json::to_value(&stats)?, summary, ExitCode::Clean)
            }
            BackupCommands::History { limit } => {
                let events = backups.history(*limit)?;
                let summary = format!("{} restores", events.len());
                (serde_json::to_value(&events)?, summary, ExitCode::Clean)
            }
        })
    })();

    match result {
        Ok((data, summary, code)) => {
            print_output(global, command, &data, &summary);
            code
        }
        Err(e) => output_error(global, command, &e),
    }
}

fn run_update(global: &GlobalOpts, args: &UpdateArgs) -> ExitCode {
    let command = "update";
    let runtime = match open_runtime(global, command) {
        Ok(runtime) => runtime,
        Err(code) => return code,
    };
    let updater = &runtime.updater;

    match &args.command {
        UpdateCommands::Check => match updater.check_now() {
            Ok(Some(offer)) => {
                let data = serde_json::json!({ "update_available": true, "offer": offer });
                print_output(global, command, &data, &format!("update {} available", offer.version));
                ExitCode::UpdateAvailable
            }
            Ok(None) => {
                let data = serde_json::json!({ "update_available": false });
                print_output(global, command, &data, "up to date");
                ExitCode::Clean
            }
            Err(e) => output_error(global, command, &e.into()),
        },
        UpdateCommands::Apply { force } => match updater.apply(*force) {
            Ok(outcome) => {
                let (summary, code) = match &outcome {
                    UpdateOutcome::Succeeded { from, to } => {
                        (format!("updated {from} -> {to}"), ExitCode::Clean)
                    }
                    UpdateOutcome::Failed {
                        version,
                        reason,
                        rolled_back: true,
                    } => (
                        format!("update to {version} failed and was rolled back: {reason}"),
                        ExitCode::RolledBack,
                    ),
                    UpdateOutcome::Failed { version, reason, .. } => (
                        format!("update to {version} failed: {reason}"),
                        ExitCode::IntegrityError,
                    ),
                    UpdateOutcome::NoUpdate | UpdateOutcome::Available { .. } => {
                        ("nothing installed".to_string(), ExitCode::Clean)
                    }
                };
                let data = serde_json::to_value(&outcome).unwrap_or_default();
                print_output(global, command, &data, &summary);
                code
            }
            Err(e) => output_error(global, command, &e.into()),
        },
        UpdateCommands::Status => {
            let report = updater.report();
            let summary = format!(
                "{} ({}), auto-update {}",
                report.current_version,
                report.status.phase,
                if report.auto_update_enabled { "on" } else { "off" }
            );
            let data = serde_json::to_value(&report).unwrap_or_default();
            print_output(global, command, &data, &summary);
            ExitCode::Clean
        }
        UpdateCommands::Auto { mode } => {
            let enabled = matches!(mode, Toggle::On);
            match updater.set_auto_update(enabled) {
                Ok(()) => {
                    let data = serde_json::json!({ "auto_update": enabled });
                    let summary = format!("auto-update {}", if enabled { "on" } else { "off" });
                    print_output(global, command, &data, &summary);
                    ExitCode::Clean
                }
                Err(e) => output_config_error(global, &e),
            }
        }
    }
}

fn run_recovery(global: &GlobalOpts, args: &RecoveryArgs) -> ExitCode {
    let command = "recovery";
    let resolved = match load(global) {
        Ok(resolved) => resolved,
        Err(code) => return code,
    };
    let state_dir = resolved.config.state_dir();

    match &args.command {
        RecoveryCommands::Status => {
            let status = RecoveryStatus::load(&recovery::status_path(&state_dir));
            let summary = match &status {
                Some(status) => {
                    let critical: Vec<String> = status
                        .domains
                        .iter()
                        .filter(|(_, state)| state.critical)
                        .map(|(domain, _)| domain.to_string())
                        .collect();
                    format!(
                        "{} domains tracked, critical: [{}], service restarts {}/{}",
                        status.domains.len(),
                        critical.join(","),
                        status.service_restarts.used,
                        status.service_restarts.max
                    )
                }
                None => "no recovery state recorded yet".to_string(),
            };
            let data = serde_json::to_value(&status).unwrap_or_default();
            print_output(global, command, &data, &summary);
            ExitCode::Clean
        }
        RecoveryCommands::Reset { domain } => match recovery::request_reset(&state_dir, *domain) {
            Ok(path) => {
                let data = serde_json::json!({
                    "domain": domain,
                    "request": path.display().to_string(),
                });
                print_output(global, command, &data, &format!("reset of {domain} requested"));
                ExitCode::Clean
            }
            Err(e) => output_error(global, command, &e.into()),
        },
    }
}

fn run_config(global: &GlobalOpts, args: &ConfigArgs) -> ExitCode {
    let resolved = match load(global) {
        Ok(resolved) => resolved,
        Err(code) => return code,
    };
    let snapshot = ConfigSnapshot::capture(&resolved.config, resolved.source, resolved.path.as_deref());

    match &args.command {
        ConfigCommands::Show => {
            let data = serde_json::json!({
                "snapshot": snapshot,
                "config": resolved.config,
            });
            let summary = format!("config from {} ({})", resolved.source, snapshot.content_hash);
            print_output(global, "config", &data, &summary);
        }
        ConfigCommands::Validate => {
            let data = serde_json::json!({
                "status": "valid",
                "snapshot": snapshot,
                "file_hash": resolved.file_hash,
            });
            print_output(global, "config", &data, &format!("valid ({})", resolved.source));
        }
    }
    ExitCode::Clean
}

// ============================================================================
// Helpers
// ============================================================================

fn parse_target(target: &str) -> RestoreTarget {
    match target.parse::<RestoreTarget>() {
        Ok(target) => target,
        Err(never) => match never {},
    }
}

fn load(global: &GlobalOpts) -> Result<ResolvedConfig, ExitCode> {
    let options = ConfigOptions {
        config_path: global.config.as_ref().map(PathBuf::from),
    };
    load_config(&options).map_err(|e| output_config_error(global, &e))
}

fn open_runtime(global: &GlobalOpts, command: &str) -> Result<Runtime, ExitCode> {
    let resolved = load(global)?;
    Runtime::system(resolved.config, resolved.path).map_err(|e| output_error(global, command, &e))
}

fn print_output(global: &GlobalOpts, command: &str, data: &serde_json::Value, summary: &str) {
    let run_id = RunId::new();
    match global.format {
        OutputFormat::Json => {
            let output = serde_json::json!({
                "schema_version": SCHEMA_VERSION,
                "run_id": run_id.to_string(),
                "generated_at": chrono::Utc::now().to_rfc3339(),
                "command": command,
                "data": data,
            });
            println!(
                "{}",
                serde_json::to_string_pretty(&output).unwrap_or_else(|_| output.to_string())
            );
        }
        OutputFormat::Summary => {
            println!("[{}] {}: {}", run_id, command, summary);
        }
        OutputFormat::Exitcode => {}
        OutputFormat::Md => {
            println!("# gatewarden {}", command);
            println!();
            println!("{}", summary);
            println!();
            println!("```json");
            println!(
                "{}",
                serde_json::to_string_pretty(data).unwrap_or_else(|_| data.to_string())
            );
            println!("```");
        }
    }
}

fn output_error(global: &GlobalOpts, command: &str, error: &gw_common::Error) -> ExitCode {
    match global.format {
        OutputFormat::Json => {
            let structured = StructuredError::from(error).with_context("command", command);
            eprintln!("{}", structured.to_json());
        }
        OutputFormat::Summary => {
            eprintln!("{} error: {}", command, error);
        }
        OutputFormat::Exitcode => {}
        OutputFormat::Md => {
            let color = !global.no_color && std::io::stderr().is_terminal();
            eprintln!("{}", format_error_human(error, color));
        }
    }
    ExitCode::from(error)
}

fn output_config_error(global: &GlobalOpts, error: &ConfigError) -> ExitCode {
    let exit_code = match error {
        ConfigError::IoError { .. } => ExitCode::IoError,
        ConfigError::NotFound { .. } | ConfigError::ParseError { .. } | ConfigError::Invalid(_) => {
            ExitCode::ConfigError
        }
    };

    let response = serde_json::json!({
        "schema_version": SCHEMA_VERSION,
        "generated_at": chrono::Utc::now().to_rfc3339(),
        "status": "error",
        "error": {
            "code": exit_code.code_name(),
            "message": error.to_string(),
        }
    });

    match global.format {
        OutputFormat::Json => {
            eprintln!("{}", response);
        }
        OutputFormat::Summary => {
            eprintln!("config error: {}", error);
        }
        OutputFormat::Exitcode => {}
        OutputFormat::Md => {
            eprintln!("# Configuration Error");
            eprintln!();
            eprintln!("Error: {}", error);
        }
    }

    exit_code
}

fn print_version(global: &GlobalOpts) {
    let software = load_config(&ConfigOptions::default())
        .ok()
        .map(|resolved| read_version(&resolved.config.version_file()));
    let version_info = serde_json::json!({
        "schema_version": SCHEMA_VERSION,
        "gatewarden_version": env!("CARGO_PKG_VERSION"),
        "software_version": software,
    });

    match global.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string_pretty(&version_info).unwrap_or_else(|_| version_info.to_string())
            );
        }
        OutputFormat::Exitcode => {}
        _ => {
            println!("gatewarden {}", env!("CARGO_PKG_VERSION"));
            println!("schema version: {}", SCHEMA_VERSION);
        }
    }
}

//! # tg-cli
//!
//! Command-line interface for Tollgate.
//!
//! - `tg evaluate`: run proposed actions (JSONL) through the governor
//! - `tg audit verify/tail`: inspect the tamper-evident audit trail
//! - `tg session status/release`: inspect and release quarantined sessions
//! - `tg kill-switch engage/release/status`: the process-wide stop
//! - `tg policy check/explain`: validate a policy document, trace a verdict

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tg_governor::GovernorConfig;
use tracing_subscriber::EnvFilter;

/// Tollgate CLI: govern agent actions before they take effect.
#[derive(Parser)]
#[command(name = "tg", version, about)]
struct Cli {
    /// Project root directory (defaults to current directory).
    #[arg(long, default_value = ".")]
    project_root: PathBuf,

    /// Config file (defaults to .tollgate/governance.toml).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Emit logs as JSON.
    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate proposed actions read as JSON lines.
    Evaluate {
        /// Input file, or "-" for stdin.
        #[arg(default_value = "-")]
        input: String,
        /// Print full evaluations as JSON lines instead of a table.
        #[arg(long)]
        json: bool,
    },
    /// Inspect the audit trail.
    Audit {
        #[command(subcommand)]
        command: commands::audit::AuditCommands,
    },
    /// Inspect and release sessions.
    Session {
        #[command(subcommand)]
        command: commands::session::SessionCommands,
    },
    /// Engage or release the process-wide kill-switch.
    KillSwitch {
        #[command(subcommand)]
        command: commands::session::KillSwitchCommands,
    },
    /// Validate and explain policy documents.
    Policy {
        #[command(subcommand)]
        command: commands::policy::PolicyCommands,
    },
}

fn init_logging(json: bool) -> anyhow::Result<()> {
    // Logs go to stderr; stdout carries command output.
    let filter = EnvFilter::from_default_env()
        .add_directive("tg_governor=info".parse()?)
        .add_directive("tg_cli=info".parse()?);
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_json)?;

    let project_root = cli
        .project_root
        .canonicalize()
        .unwrap_or(cli.project_root);
    let config = match &cli.config {
        Some(path) => {
            let mut config = GovernorConfig::load(path)?;
            let defaults = GovernorConfig::for_project(&project_root);
            config.paths.policy = config.paths.policy.or(defaults.paths.policy);
            config.paths.audit_log = config.paths.audit_log.or(defaults.paths.audit_log);
            config.paths.control_state =
                config.paths.control_state.or(defaults.paths.control_state);
            config
        }
        None => GovernorConfig::load_or_default(&project_root)?,
    };
    tracing::debug!(project_root = %project_root.display(), "configuration loaded");

    match &cli.command {
        Commands::Evaluate { input, json } => {
            commands::evaluate::execute(&config, input, *json).await
        }
        Commands::Audit { command } => commands::audit::execute(command, &config),
        Commands::Session { command } => commands::session::execute(command, &config),
        Commands::KillSwitch { command } => commands::session::execute_kill_switch(command, &config),
        Commands::Policy { command } => commands::policy::execute(command, &config),
    }
}

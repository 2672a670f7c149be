// session.rs — Control-state administration: sessions and the kill-switch.
//
// Both operate on the persisted control-state snapshot, so a release here
// takes effect for every governor that loads the same project.

use clap::Subcommand;
use tg_governor::{ControlMode, ControlState, ControlStateFile, Governor, GovernorConfig};

#[derive(Subcommand)]
pub enum SessionCommands {
    /// Show session modes.
    Status {
        /// Show only this session.
        #[arg(long)]
        session: Option<String>,
    },
    /// Release a quarantined session.
    Release {
        session: String,
        /// Operator identity recorded in the audit trail.
        #[arg(long)]
        operator: String,
    },
}

#[derive(Subcommand)]
pub enum KillSwitchCommands {
    /// Block every action of every session.
    Engage {
        #[arg(long)]
        reason: String,
        #[arg(long)]
        operator: String,
    },
    /// Resume normal evaluation.
    Release {
        #[arg(long)]
        operator: String,
    },
    /// Show whether the kill-switch is engaged.
    Status,
}

fn load_state(config: &GovernorConfig) -> anyhow::Result<ControlState> {
    let Some(path) = &config.paths.control_state else {
        anyhow::bail!("no control-state path configured");
    };
    Ok(ControlState::load_or_fail_closed(
        config.control.clone(),
        &ControlStateFile::new(path),
    ))
}

pub fn execute(cmd: &SessionCommands, config: &GovernorConfig) -> anyhow::Result<()> {
    match cmd {
        SessionCommands::Status { session } => {
            let state = load_state(config)?;
            let sessions: Vec<_> = state
                .sessions()
                .into_iter()
                .filter(|s| session.as_ref().map_or(true, |id| &s.session_id == id))
                .collect();

            if sessions.is_empty() {
                println!("No sessions recorded.");
                return Ok(());
            }

            println!("{:<20} {:<12} {:<20} REASON", "SESSION", "MODE", "SINCE");
            println!("{}", "-".repeat(80));
            for s in sessions {
                println!(
                    "{:<20} {:<12} {:<20} {}",
                    s.session_id,
                    s.record.mode.to_string(),
                    s.record.changed_at.format("%Y-%m-%d %H:%M:%S"),
                    s.record.reason
                );
            }
        }

        SessionCommands::Release { session, operator } => {
            let governor = Governor::builder(config.clone()).build()?;
            if governor.session_mode(session) != ControlMode::Quarantined {
                println!("Session {} is not quarantined.", session);
                return Ok(());
            }
            let transition = governor.release_session(session, operator)?;
            println!(
                "Session {} released by {} ({} -> {}).",
                session, operator, transition.from, transition.to
            );
        }
    }
    Ok(())
}

pub fn execute_kill_switch(cmd: &KillSwitchCommands, config: &GovernorConfig) -> anyhow::Result<()> {
    match cmd {
        KillSwitchCommands::Engage { reason, operator } => {
            let governor = Governor::builder(config.clone()).build()?;
            match governor.engage_kill_switch(reason, operator)? {
                Some(_) => println!("Kill-switch engaged: {}", reason),
                None => println!("Kill-switch was already engaged."),
            }
        }

        KillSwitchCommands::Release { operator } => {
            let governor = Governor::builder(config.clone()).build()?;
            governor.release_kill_switch(operator)?;
            println!("Kill-switch released by {}.", operator);
        }

        KillSwitchCommands::Status => {
            let state = load_state(config)?;
            match state.kill_switch() {
                Some(record) => println!(
                    "ENGAGED since {}: {}",
                    record.changed_at.format("%Y-%m-%d %H:%M:%S"),
                    record.reason
                ),
                None => println!("Not engaged."),
            }
        }
    }
    Ok(())
}

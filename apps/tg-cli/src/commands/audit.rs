// audit.rs — Audit subcommands: verify, tail.

use std::path::PathBuf;

use clap::Subcommand;
use tg_audit::{AuditError, AuditLog};
use tg_governor::GovernorConfig;

#[derive(Subcommand)]
pub enum AuditCommands {
    /// Verify the audit log hash chain integrity.
    Verify {
        /// Path to audit log (defaults to .tollgate/audit.jsonl).
        #[arg(long)]
        log: Option<PathBuf>,
    },
    /// Show recent audit events.
    Tail {
        /// Path to audit log (defaults to .tollgate/audit.jsonl).
        #[arg(long)]
        log: Option<PathBuf>,
        /// Number of events to show.
        #[arg(short, default_value = "10")]
        n: usize,
    },
}

fn log_path(log: &Option<PathBuf>, config: &GovernorConfig) -> anyhow::Result<PathBuf> {
    match log.clone().or_else(|| config.paths.audit_log.clone()) {
        Some(path) => Ok(path),
        None => anyhow::bail!("no audit log configured; pass --log"),
    }
}

pub fn execute(cmd: &AuditCommands, config: &GovernorConfig) -> anyhow::Result<()> {
    match cmd {
        AuditCommands::Verify { log } => {
            let path = log_path(log, config)?;
            if !path.exists() {
                println!("No audit log found at {}", path.display());
                return Ok(());
            }

            match AuditLog::verify_chain(&path) {
                Ok(summary) => {
                    println!(
                        "Audit log verified: {} event(s), hash chain intact.",
                        summary.events
                    );
                    if let Some(head) = summary.head {
                        println!("  Head: {}", head);
                    }
                }
                Err(AuditError::IntegrityViolation {
                    line,
                    expected,
                    actual,
                }) => {
                    println!("INTEGRITY VIOLATION at line {}:", line);
                    println!("  Expected previous_hash: {}", expected);
                    println!("  Actual previous_hash:   {}", actual);
                    println!();
                    println!("The audit log may have been tampered with.");
                    anyhow::bail!("Audit log integrity check failed");
                }
                Err(e) => return Err(e.into()),
            }
        }

        AuditCommands::Tail { log, n } => {
            let path = log_path(log, config)?;
            if !path.exists() {
                println!("No audit log found at {}", path.display());
                return Ok(());
            }

            let events = AuditLog::read_all(&path)?;
            let start = events.len().saturating_sub(*n);
            let recent = &events[start..];

            if recent.is_empty() {
                println!("No audit events.");
                return Ok(());
            }

            println!(
                "{:<20} {:<14} {:<20} DETAIL",
                "TIMESTAMP", "SESSION", "EVENT"
            );
            println!("{}", "-".repeat(90));

            for event in recent {
                println!(
                    "{:<20} {:<14} {:<20} {}",
                    event.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    event.session_id,
                    format!("{:?}", event.action),
                    detail(&event.metadata),
                );
            }
        }
    }

    Ok(())
}

/// One-line summary of an event's metadata.
fn detail(metadata: &serde_json::Value) -> String {
    if let Some(decision) = metadata.get("decision") {
        let field = |k: &str| {
            decision
                .get(k)
                .and_then(|v| v.as_str())
                .unwrap_or("-")
                .to_string()
        };
        return format!("{} [{}] {}", field("disposition"), field("stage"), field("reason"));
    }
    if let (Some(from), Some(to)) = (metadata.get("from"), metadata.get("to")) {
        let reason = metadata.get("reason").and_then(|v| v.as_str()).unwrap_or("");
        return format!(
            "{} -> {} {}",
            from.as_str().unwrap_or("-"),
            to.as_str().unwrap_or("-"),
            reason
        );
    }
    if metadata.is_null() {
        "-".to_string()
    } else {
        metadata.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detail_summarizes_decisions_and_transitions() {
        let decision = serde_json::json!({
            "decision": {"disposition": "block", "stage": "content", "reason": "flagged"}
        });
        assert_eq!(detail(&decision), "block [content] flagged");

        let transition = serde_json::json!({"from": "active", "to": "tracking", "reason": "3 blocks"});
        assert_eq!(detail(&transition), "active -> tracking 3 blocks");

        assert_eq!(detail(&serde_json::Value::Null), "-");
    }
}

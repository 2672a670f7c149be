// policy.rs — Policy subcommands: check, explain.

use std::path::PathBuf;

use clap::Subcommand;
use tg_governor::GovernorConfig;
use tg_policy::{PolicyDocument, PolicyEngine};

use super::evaluate::parse_requests;

#[derive(Subcommand)]
pub enum PolicyCommands {
    /// Validate a policy document and list its rules.
    Check {
        /// Policy file (defaults to .tollgate/policy.yaml, else the baseline).
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Show every rule checked for one action request (JSON).
    Explain {
        /// The request, in the same format `tg evaluate` reads.
        request: String,
        #[arg(long)]
        file: Option<PathBuf>,
    },
}

fn load_document(file: &Option<PathBuf>, config: &GovernorConfig) -> anyhow::Result<PolicyDocument> {
    match file.clone().or_else(|| config.paths.policy.clone()) {
        Some(path) if path.exists() => Ok(PolicyDocument::load(&path)?),
        Some(path) if file.is_some() => anyhow::bail!("policy file {} not found", path.display()),
        _ => Ok(PolicyDocument::baseline()),
    }
}

pub fn execute(cmd: &PolicyCommands, config: &GovernorConfig) -> anyhow::Result<()> {
    match cmd {
        PolicyCommands::Check { file } => {
            let doc = load_document(file, config)?;
            println!("Policy {} is valid: {} rule(s).", doc.version, doc.rules.len());
            println!();
            println!("{:<22} {:<9} {:<8} {:<16} APPLIES TO", "RULE", "TIER", "EFFECT", "CHECK");
            println!("{}", "-".repeat(80));
            for rule in &doc.rules {
                let applies = if rule.applies_to.is_empty() {
                    "*".to_string()
                } else {
                    rule.applies_to.join(", ")
                };
                println!(
                    "{:<22} {:<9} {:<8} {:<16} {}",
                    rule.id,
                    rule.tier.to_string(),
                    format!("{:?}", rule.effect).to_lowercase(),
                    rule.check.kind(),
                    applies
                );
            }
        }

        PolicyCommands::Explain { request, file } => {
            let engine = PolicyEngine::new(load_document(file, config)?);
            let mut requests = parse_requests(request.as_bytes())?;
            let Some(request) = requests.pop() else {
                anyhow::bail!("empty request");
            };
            let (action, _context) = request.into_parts();
            let trace = engine.evaluate_with_trace(&action);
            println!("{}", serde_json::to_string_pretty(&trace)?);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn document_falls_back_to_baseline_unless_named() {
        let dir = tempdir().unwrap();
        let config = GovernorConfig::for_project(dir.path());
        let baseline = PolicyDocument::baseline();

        // No project policy yet.
        assert_eq!(load_document(&None, &config).unwrap(), baseline);

        // A file named on the command line must exist.
        let missing = Some(dir.path().join("absent.yaml"));
        assert!(load_document(&missing, &config).is_err());

        let mut custom = baseline.clone();
        custom.version = "desk-7".to_string();
        let path = dir.path().join("desk.yaml");
        std::fs::write(&path, custom.to_yaml_string().unwrap()).unwrap();
        assert_eq!(load_document(&Some(path), &config).unwrap().version, "desk-7");
    }
}

// error.rs — Error types for the governor.
//
// Verdicts (BLOCK, ESCALATE, QUARANTINE) are never errors. An error from
// `Governor::evaluate` means no decision could be produced at all.

use std::path::PathBuf;

use thiserror::Error;

use crate::control::ControlMode;

/// Control-state failures.
#[derive(Debug, Error)]
pub enum ControlError {
    /// The requested transition violates the state machine.
    #[error("illegal transition for session '{session_id}': {from} -> {to}")]
    IllegalTransition {
        session_id: String,
        from: ControlMode,
        to: ControlMode,
    },

    /// Release was requested for a session that is not quarantined.
    #[error("session '{session_id}' is not quarantined (mode {mode})")]
    NotQuarantined {
        session_id: String,
        mode: ControlMode,
    },

    #[error("kill-switch is not engaged")]
    KillSwitchNotEngaged,

    /// An administrative operation was attempted without naming an operator.
    #[error("administrative operations require an operator identity")]
    MissingOperator,

    #[error("control state I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("control state serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Configuration loading and validation failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid config value for {field}: {reason}")]
    Invalid { field: String, reason: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: &str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum GovernorError {
    /// The state machine refused a transition the governor computed. The
    /// evaluation is aborted: no decision, no credential.
    #[error("control state corruption: {0}")]
    StateCorruption(ControlError),

    /// An administrative control operation failed.
    #[error(transparent)]
    Control(ControlError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Policy(#[from] tg_policy::PolicyError),

    #[error(transparent)]
    Risk(#[from] tg_risk::RiskError),

    #[error(transparent)]
    Consensus(#[from] tg_consensus::ConsensusError),

    #[error(transparent)]
    Credential(#[from] tg_credentials::CredentialError),

    #[error(transparent)]
    Audit(#[from] tg_audit::AuditError),
}

// decision.rs — Decision: the governor's answer for one proposed action.
//
// Dispositions are expected outcomes, not errors. BLOCK/ESCALATE/QUARANTINE
// always carry a reason and the stage that produced them so the audit trail
// explains every refusal.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What the agent may do with its proposed action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    /// Proceed; a scoped credential accompanies the decision.
    Allow,
    /// Do not proceed.
    Block,
    /// Do not proceed autonomously; more evidence or a human is required.
    Escalate,
    /// Do not proceed, and the session has been quarantined.
    Quarantine,
}

impl Disposition {
    /// Only ALLOW lets the effect-producing call run.
    pub fn permits_execution(self) -> bool {
        matches!(self, Disposition::Allow)
    }

    /// BLOCK and QUARANTINE both refuse the action outright.
    pub fn is_blocking(self) -> bool {
        matches!(self, Disposition::Block | Disposition::Quarantine)
    }
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Disposition::Allow => write!(f, "ALLOW"),
            Disposition::Block => write!(f, "BLOCK"),
            Disposition::Escalate => write!(f, "ESCALATE"),
            Disposition::Quarantine => write!(f, "QUARANTINE"),
        }
    }
}

/// The evaluation stage that produced a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Kill-switch or session quarantine, before the pipeline runs.
    ControlState,
    Policy,
    Risk,
    Barrier,
    Consensus,
    Content,
    Credential,
    Audit,
    /// Every stage passed.
    Pipeline,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::ControlState => "control_state",
            Stage::Policy => "policy",
            Stage::Risk => "risk",
            Stage::Barrier => "barrier",
            Stage::Consensus => "consensus",
            Stage::Content => "content",
            Stage::Credential => "credential",
            Stage::Audit => "audit",
            Stage::Pipeline => "pipeline",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The final disposition for one action, with its reason and origin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub disposition: Disposition,
    /// Human-readable explanation.
    pub reason: String,
    pub stage: Stage,
    pub decided_at: DateTime<Utc>,
}

impl Decision {
    pub fn new(disposition: Disposition, stage: Stage, reason: impl Into<String>) -> Self {
        Self {
            disposition,
            reason: reason.into(),
            stage,
            decided_at: Utc::now(),
        }
    }

    pub fn allow() -> Self {
        Self::new(Disposition::Allow, Stage::Pipeline, "all stages passed")
    }

    pub fn block(stage: Stage, reason: impl Into<String>) -> Self {
        Self::new(Disposition::Block, stage, reason)
    }

    pub fn escalate(stage: Stage, reason: impl Into<String>) -> Self {
        Self::new(Disposition::Escalate, stage, reason)
    }

    pub fn quarantine(stage: Stage, reason: impl Into<String>) -> Self {
        Self::new(Disposition::Quarantine, stage, reason)
    }

    pub fn is_allow(&self) -> bool {
        self.disposition.permits_execution()
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}] {}", self.disposition, self.stage, self.reason)
    }
}

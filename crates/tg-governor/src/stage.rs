// stage.rs — The evaluation pipeline as an ordered list of stages.
//
// The Governor folds the stages left to right:
//
// 1. PolicyStage:    any denied verdict → BLOCK
// 2. RiskStage:      p ≥ critical → BLOCK; barrier failure → ESCALATE
// 3. ConsensusStage: only when required; failed / timed out → BLOCK
// 4. ContentStage:   flagged → BLOCK
//
// ESCALATE does not stop the fold; the later stages still run and a later
// BLOCK wins. Each stage writes what it found into the EvaluationReport so
// the audit record carries every signal, including ones that did not
// decide the outcome.
//
// Stages do not mutate shared state. The risk stage only peeks at the
// derivative estimator; the Governor records the margin once the decision
// is settled, so an abandoned evaluation leaves no sample behind.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tg_action::{ProposedAction, SafetyContext, Stage};
use tg_consensus::{ConsensusOutcome, ConsensusVoter};
use tg_policy::{ContentVerifier, PolicyEngine, PolicyVerdict, ScanResult};
use tg_risk::{
    BarrierCheck, BarrierController, BarrierState, DerivativeEstimator, RiskAssessment, RiskModel,
};

use crate::control::ControlMode;
use crate::error::GovernorError;

/// What a stage sees of the evaluation.
pub struct StageInput<'a> {
    pub action: &'a Arc<ProposedAction>,
    pub context: &'a SafetyContext,
    /// Session mode when the evaluation started.
    pub mode: ControlMode,
}

/// Result of one stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    Pass,
    /// Raise the required evidence; the fold continues.
    Escalate { stage: Stage, reason: String },
    /// Stop the fold.
    Block { stage: Stage, reason: String },
}

/// Everything the pipeline found for one action.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy: Option<PolicyVerdict>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk: Option<RiskAssessment>,
    /// Full barrier snapshot: `h`, `ḣ`, `ḧ` and the gains.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub barrier: Option<BarrierState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub barrier_check: Option<BarrierCheck>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consensus: Option<ConsensusOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<ScanResult>,
    /// Stages that ran, in order.
    pub stages_run: Vec<Stage>,
    /// Set when a stage failed and the action was blocked fail-closed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

impl EvaluationReport {
    pub fn barrier_failed(&self) -> bool {
        self.barrier_check.as_ref().is_some_and(|c| !c.is_pass())
    }

    /// Consensus ran and did not pass.
    pub fn consensus_failed(&self) -> bool {
        self.consensus.as_ref().is_some_and(|c| !c.passed())
    }

    pub fn critical_violation(&self) -> bool {
        self.policy
            .as_ref()
            .is_some_and(|v| v.has_critical_violation())
    }
}

/// One step of the evaluation pipeline.
#[async_trait]
pub trait PipelineStage: Send + Sync {
    fn stage(&self) -> Stage;

    /// Whether this stage runs at all for the current evaluation.
    fn applies(&self, _input: &StageInput<'_>, _report: &EvaluationReport) -> bool {
        true
    }

    async fn run(
        &self,
        input: &StageInput<'_>,
        report: &mut EvaluationReport,
    ) -> Result<StageOutcome, GovernorError>;
}

pub struct PolicyStage {
    engine: PolicyEngine,
}

impl PolicyStage {
    pub fn new(engine: PolicyEngine) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &PolicyEngine {
        &self.engine
    }
}

#[async_trait]
impl PipelineStage for PolicyStage {
    fn stage(&self) -> Stage {
        Stage::Policy
    }

    async fn run(
        &self,
        input: &StageInput<'_>,
        report: &mut EvaluationReport,
    ) -> Result<StageOutcome, GovernorError> {
        let verdict = self.engine.evaluate(input.action);
        let outcome = if verdict.allowed {
            StageOutcome::Pass
        } else {
            StageOutcome::Block {
                stage: Stage::Policy,
                reason: format!("policy {} denied: {}", verdict.policy_version, verdict.summary()),
            }
        };
        report.policy = Some(verdict);
        Ok(outcome)
    }
}

/// Risk model, derivative estimation and the barrier check.
///
/// `report.barrier.h` is the margin the Governor records afterwards.
pub struct RiskStage {
    model: Arc<dyn RiskModel>,
    estimator: Arc<Mutex<DerivativeEstimator>>,
    controller: BarrierController,
    critical_probability: f64,
}

impl RiskStage {
    pub fn new(
        model: Arc<dyn RiskModel>,
        estimator: Arc<Mutex<DerivativeEstimator>>,
        critical_probability: f64,
    ) -> Self {
        Self {
            model,
            estimator,
            controller: BarrierController::new(),
            critical_probability,
        }
    }
}

#[async_trait]
impl PipelineStage for RiskStage {
    fn stage(&self) -> Stage {
        Stage::Risk
    }

    async fn run(
        &self,
        input: &StageInput<'_>,
        report: &mut EvaluationReport,
    ) -> Result<StageOutcome, GovernorError> {
        let assessment = self.model.estimate(input.action, input.context)?;
        report.risk = Some(assessment);

        let state = self
            .estimator
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .peek(&input.action.session_id, assessment.safety_margin)?;
        let check = self.controller.check(&state);
        report.barrier = Some(state);
        report.barrier_check = Some(check.clone());

        let p = assessment.failure_probability;
        if p >= self.critical_probability {
            return Ok(StageOutcome::Block {
                stage: Stage::Risk,
                reason: format!(
                    "failure probability {:.2} at or above critical threshold {:.2} ({})",
                    p,
                    self.critical_probability,
                    self.model.name()
                ),
            });
        }

        Ok(match check {
            BarrierCheck::Pass { .. } => StageOutcome::Pass,
            BarrierCheck::Fail { reason, .. } => StageOutcome::Escalate {
                stage: Stage::Barrier,
                reason,
            },
        })
    }
}

/// Majority vote, run only when the earlier stages ask for it.
pub struct ConsensusStage {
    voter: ConsensusVoter,
    timeout: Duration,
    escalation_probability: f64,
}

impl ConsensusStage {
    pub fn new(voter: ConsensusVoter, timeout: Duration, escalation_probability: f64) -> Self {
        Self {
            voter,
            timeout,
            escalation_probability,
        }
    }

    /// Why consensus is needed, if it is.
    fn trigger(&self, input: &StageInput<'_>, report: &EvaluationReport) -> Option<String> {
        if input.mode == ControlMode::Monitoring {
            return Some("session is monitored".to_string());
        }
        if let Some(verdict) = &report.policy {
            if verdict.tier.requires_consensus() {
                return Some(format!("risk tier {}", verdict.tier));
            }
        }
        if report.barrier_failed() {
            return Some("barrier failed".to_string());
        }
        if let Some(risk) = &report.risk {
            if risk.failure_probability > self.escalation_probability {
                return Some(format!(
                    "failure probability {:.2} above {:.2}",
                    risk.failure_probability, self.escalation_probability
                ));
            }
        }
        None
    }
}

#[async_trait]
impl PipelineStage for ConsensusStage {
    fn stage(&self) -> Stage {
        Stage::Consensus
    }

    fn applies(&self, input: &StageInput<'_>, report: &EvaluationReport) -> bool {
        self.trigger(input, report).is_some()
    }

    async fn run(
        &self,
        input: &StageInput<'_>,
        report: &mut EvaluationReport,
    ) -> Result<StageOutcome, GovernorError> {
        let trigger = self.trigger(input, report).unwrap_or_default();
        tracing::debug!(
            action_id = %input.action.action_id,
            trigger = %trigger,
            evaluators = self.voter.len(),
            "consensus required"
        );

        let outcome = self.voter.vote(Arc::clone(input.action), self.timeout).await;
        let result = if outcome.passed() {
            StageOutcome::Pass
        } else {
            StageOutcome::Block {
                stage: Stage::Consensus,
                reason: format!("{} ({})", outcome.summary(), trigger),
            }
        };
        report.consensus = Some(outcome);
        Ok(result)
    }
}

pub struct ContentStage {
    verifier: ContentVerifier,
}

impl ContentStage {
    pub fn new(verifier: ContentVerifier) -> Self {
        Self { verifier }
    }
}

#[async_trait]
impl PipelineStage for ContentStage {
    fn stage(&self) -> Stage {
        Stage::Content
    }

    async fn run(
        &self,
        input: &StageInput<'_>,
        report: &mut EvaluationReport,
    ) -> Result<StageOutcome, GovernorError> {
        let scan = self.verifier.scan(input.action);
        let outcome = match &scan {
            ScanResult::Clean => StageOutcome::Pass,
            ScanResult::Flagged {
                pattern_id,
                field,
                reason,
            } => StageOutcome::Block {
                stage: Stage::Content,
                reason: format!("content flagged by {} in '{}': {}", pattern_id, field, reason),
            },
        };
        report.content = Some(scan);
        Ok(outcome)
    }
}

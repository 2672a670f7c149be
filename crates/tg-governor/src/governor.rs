// governor.rs — Orchestrates one evaluation from proposed action to Decision.
//
// evaluate():
//
// 1. Kill-switch engaged or session QUARANTINED → BLOCK, pipeline not run
// 2. Fold the pipeline stages (policy, risk/barrier, consensus, content)
// 3. ALLOW → exchange a scoped credential; failure → BLOCK
// 4. Apply the evaluation's signals to the session state machine, then
//    record the barrier margin in the session's derivative window
// 5. Session now QUARANTINED → revoke its credentials
// 6. Emit the Decision audit event (exactly once), then transition and
//    credential events
// 7. Persist the control-state snapshot
//
// Only step 2 awaits, and it changes no shared state. Steps 3-7 run to
// completion once started, so a caller that drops the future mid-evaluation
// leaves neither a half-made transition nor an unaudited barrier sample.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tg_action::{Decision, Disposition, ProposedAction, SafetyContext, Stage};
use tg_audit::{AuditAction, AuditEvent, AuditSink, JsonlSink, TracingSink};
use tg_consensus::{ConsensusVoter, Evaluator, EvaluatorSpec};
use tg_credentials::{
    Credential, CredentialBroker, IdentityExchange, LocalTokenExchange, SessionGate,
};
use tg_policy::{ContentVerifier, PolicyDocument, PolicyEngine};
use tg_risk::{BarrierGains, DerivativeEstimator, ExposureLimits, ExposureRiskModel, RiskModel};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::cleanup::{spawn_cleanup, Sweep};
use crate::config::GovernorConfig;
use crate::control::{ControlMode, ControlState, ControlStateFile, Signals, Transition};
use crate::error::GovernorError;
use crate::stage::{
    ConsensusStage, ContentStage, EvaluationReport, PipelineStage, PolicyStage, RiskStage,
    StageInput, StageOutcome,
};

/// The result of one evaluation.
#[derive(Debug, Clone, Serialize)]
pub struct Evaluation {
    pub decision: Decision,
    /// Present only for ALLOW.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential: Option<Credential>,
    pub report: EvaluationReport,
    /// Session transitions this evaluation caused.
    pub transitions: Vec<Transition>,
    /// `None` when the audit sink failed.
    pub audit_event_id: Option<Uuid>,
}

/// Assembles a [`Governor`]. Anything not supplied is built from the config.
pub struct GovernorBuilder {
    config: GovernorConfig,
    policy: Option<PolicyDocument>,
    risk_model: Option<Arc<dyn RiskModel>>,
    evaluators: Option<Vec<Arc<dyn Evaluator>>>,
    exchange: Option<Arc<dyn IdentityExchange>>,
    audit: Option<Arc<dyn AuditSink>>,
    control: Option<Arc<ControlState>>,
}

impl GovernorBuilder {
    pub fn new(config: GovernorConfig) -> Self {
        Self {
            config,
            policy: None,
            risk_model: None,
            evaluators: None,
            exchange: None,
            audit: None,
            control: None,
        }
    }

    pub fn policy(mut self, document: PolicyDocument) -> Self {
        self.policy = Some(document);
        self
    }

    pub fn risk_model(mut self, model: Arc<dyn RiskModel>) -> Self {
        self.risk_model = Some(model);
        self
    }

    /// Replaces the evaluators listed in `[consensus]`.
    pub fn evaluators(mut self, evaluators: Vec<Arc<dyn Evaluator>>) -> Self {
        self.evaluators = Some(evaluators);
        self
    }

    pub fn identity_exchange(mut self, exchange: Arc<dyn IdentityExchange>) -> Self {
        self.exchange = Some(exchange);
        self
    }

    pub fn audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(sink);
        self
    }

    /// Share an existing control state instead of loading one.
    pub fn control_state(mut self, control: Arc<ControlState>) -> Self {
        self.control = Some(control);
        self
    }

    pub fn build(self) -> Result<Governor, GovernorError> {
        let config = self.config;
        config.validate()?;

        let policy = match self.policy {
            Some(document) => document,
            None => match &config.paths.policy {
                Some(path) if path.exists() => PolicyDocument::load(path)?,
                _ => {
                    tracing::info!("no policy document configured; using baseline policy");
                    PolicyDocument::baseline()
                }
            },
        };

        let risk_model: Arc<dyn RiskModel> = match self.risk_model {
            Some(model) => model,
            None => Arc::new(ExposureRiskModel::new(ExposureLimits {
                exposure_limit: config.risk.exposure_limit,
                max_drawdown: config.risk.max_drawdown,
            })),
        };

        let evaluators = match self.evaluators {
            Some(evaluators) => evaluators,
            None => config
                .consensus
                .evaluators
                .iter()
                .map(EvaluatorSpec::build)
                .collect::<Result<Vec<_>, _>>()?,
        };
        let voter = ConsensusVoter::new(evaluators)?;

        let verifier = ContentVerifier::new(
            &config.content.patterns,
            config.content.deceptive_tools.clone(),
        )?;

        let gains = BarrierGains::new(config.barrier.k1, config.barrier.k2)?;
        let estimator = Arc::new(Mutex::new(DerivativeEstimator::new(
            config.barrier.window,
            gains,
        )?));

        let state_file = config
            .paths
            .control_state
            .as_ref()
            .map(ControlStateFile::new);
        let control = match self.control {
            Some(control) => control,
            None => Arc::new(match &state_file {
                Some(file) => ControlState::load_or_fail_closed(config.control.clone(), file),
                None => ControlState::new(config.control.clone()),
            }),
        };

        let audit: Arc<dyn AuditSink> = match self.audit {
            Some(sink) => sink,
            None => match &config.paths.audit_log {
                Some(path) => Arc::new(JsonlSink::open(path)?),
                None => Arc::new(TracingSink),
            },
        };

        let exchange: Arc<dyn IdentityExchange> = match self.exchange {
            Some(exchange) => exchange,
            None => Arc::new(LocalTokenExchange),
        };
        let gate: Arc<dyn SessionGate> = control.clone();
        let broker = Arc::new(CredentialBroker::new(
            config.credentials.clone(),
            exchange,
            gate,
        )?);

        let stages: Vec<Box<dyn PipelineStage>> = vec![
            Box::new(PolicyStage::new(PolicyEngine::new(policy))),
            Box::new(RiskStage::new(
                risk_model,
                Arc::clone(&estimator),
                config.risk.critical_probability,
            )),
            Box::new(ConsensusStage::new(
                voter,
                config.consensus.timeout(),
                config.risk.escalation_probability,
            )),
            Box::new(ContentStage::new(verifier)),
        ];

        Ok(Governor {
            config,
            stages,
            estimator,
            control,
            state_file,
            persist_lock: Arc::new(Mutex::new(())),
            broker,
            audit,
        })
    }
}

/// The runtime governance control loop.
pub struct Governor {
    config: GovernorConfig,
    stages: Vec<Box<dyn PipelineStage>>,
    estimator: Arc<Mutex<DerivativeEstimator>>,
    control: Arc<ControlState>,
    state_file: Option<ControlStateFile>,
    persist_lock: Arc<Mutex<()>>,
    broker: Arc<CredentialBroker>,
    audit: Arc<dyn AuditSink>,
}

impl Governor {
    pub fn builder(config: GovernorConfig) -> GovernorBuilder {
        GovernorBuilder::new(config)
    }

    pub fn config(&self) -> &GovernorConfig {
        &self.config
    }

    pub fn control(&self) -> &Arc<ControlState> {
        &self.control
    }

    pub fn broker(&self) -> &Arc<CredentialBroker> {
        &self.broker
    }

    pub fn session_mode(&self, session_id: &str) -> ControlMode {
        self.control.mode(session_id)
    }

    /// Evaluate one proposed action. The action may execute only if the
    /// returned decision is ALLOW, and only with the returned credential.
    ///
    /// An `Err` means no decision was produced (state corruption); callers
    /// must treat it as BLOCK.
    pub async fn evaluate(
        &self,
        action: &ProposedAction,
        context: &SafetyContext,
    ) -> Result<Evaluation, GovernorError> {
        let action = Arc::new(action.clone());

        if let Some(decision) = self.gate(&action.session_id) {
            tracing::info!(
                session_id = %action.session_id,
                action_id = %action.action_id,
                reason = %decision.reason,
                "action blocked by control state"
            );
            let report = EvaluationReport::default();
            let audit_event_id = self.emit_decision(&action, &decision, &report).ok();
            return Ok(Evaluation {
                decision,
                credential: None,
                report,
                transitions: Vec::new(),
                audit_event_id,
            });
        }

        let mode = self.control.mode(&action.session_id);
        let mut report = EvaluationReport::default();
        let decision = self.run_pipeline(&action, context, mode, &mut report).await;
        self.settle(&action, decision, report)
    }

    /// The pre-pipeline check: kill-switch, then session quarantine.
    fn gate(&self, session_id: &str) -> Option<Decision> {
        if let Some(kill_switch) = self.control.kill_switch() {
            return Some(Decision::block(
                Stage::ControlState,
                format!("kill-switch engaged: {}", kill_switch.reason),
            ));
        }
        let record = self.control.session(session_id)?;
        (record.mode == ControlMode::Quarantined).then(|| {
            Decision::block(
                Stage::ControlState,
                format!("session {} is quarantined: {}", session_id, record.reason),
            )
        })
    }

    async fn run_pipeline(
        &self,
        action: &Arc<ProposedAction>,
        context: &SafetyContext,
        mode: ControlMode,
        report: &mut EvaluationReport,
    ) -> Decision {
        let input = StageInput {
            action,
            context,
            mode,
        };
        let tracking = mode == ControlMode::Tracking;
        let mut escalation: Option<Decision> = None;

        for stage in &self.stages {
            if !stage.applies(&input, report) {
                continue;
            }
            report.stages_run.push(stage.stage());

            let outcome = match stage.run(&input, report).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::error!(
                        session_id = %action.session_id,
                        action_id = %action.action_id,
                        stage = %stage.stage(),
                        error = %e,
                        "stage failed; blocking"
                    );
                    let reason = format!("{} stage failed: {}", stage.stage(), e);
                    report.failure = Some(reason.clone());
                    StageOutcome::Block {
                        stage: stage.stage(),
                        reason,
                    }
                }
            };

            if tracking {
                tracing::info!(
                    session_id = %action.session_id,
                    action_id = %action.action_id,
                    stage = %stage.stage(),
                    outcome = ?outcome,
                    "stage evaluated"
                );
            } else {
                tracing::debug!(
                    session_id = %action.session_id,
                    action_id = %action.action_id,
                    stage = %stage.stage(),
                    outcome = ?outcome,
                    "stage evaluated"
                );
            }

            match outcome {
                StageOutcome::Pass => {}
                StageOutcome::Escalate { stage, reason } => {
                    if escalation.is_none() {
                        escalation = Some(Decision::escalate(stage, reason));
                    }
                }
                StageOutcome::Block { stage, reason } => return Decision::block(stage, reason),
            }
        }

        escalation.unwrap_or_else(Decision::allow)
    }

    /// Everything after the pipeline. Synchronous by construction.
    fn settle(
        &self,
        action: &ProposedAction,
        mut decision: Decision,
        report: EvaluationReport,
    ) -> Result<Evaluation, GovernorError> {
        let session_id = action.session_id.as_str();

        let mut credential = None;
        if decision.is_allow() {
            match self.broker.issue(action, &decision) {
                Ok(issued) => credential = Some(issued),
                Err(e) => {
                    tracing::warn!(session_id, action_id = %action.action_id, error = %e, "credential issuance denied");
                    decision = Decision::block(
                        Stage::Credential,
                        format!("credential issuance failed: {}", e),
                    );
                }
            }
        }

        let signals = Signals {
            blocked: decision.disposition == Disposition::Block,
            barrier_failed: report.barrier_failed(),
            consensus_failed: report.consensus_failed(),
            critical_violation: report.critical_violation(),
            reason: decision.reason.clone(),
        };
        let transitions = match self
            .control
            .apply(session_id, &signals, decision.decided_at)
        {
            Ok(transitions) => transitions,
            Err(e) => {
                if let Some(issued) = credential.take() {
                    self.broker.revoke_action(issued.scope.action_id);
                }
                tracing::error!(session_id, action_id = %action.action_id, error = %e, "control state rejected transition");
                return Err(GovernorError::StateCorruption(e));
            }
        };

        if let Some(barrier) = &report.barrier {
            let recorded = self
                .estimator
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .record(session_id, barrier.h);
            if let Err(e) = recorded {
                tracing::warn!(session_id, error = %e, "barrier margin not recorded");
            }
        }

        let mut revoked = 0;
        if self.control.is_quarantined(session_id) {
            credential = None;
            revoked = self.broker.revoke_session(session_id);
            let entered = transitions
                .iter()
                .any(|t| t.to == ControlMode::Quarantined);
            if entered {
                decision = Decision::quarantine(decision.stage, decision.reason);
            } else if !decision.disposition.is_blocking() {
                decision = Decision::block(
                    Stage::ControlState,
                    format!("session {} was quarantined during evaluation", session_id),
                );
            }
        }

        let audit_event_id = match self.emit_decision(action, &decision, &report) {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::error!(session_id, action_id = %action.action_id, error = %e, "audit sink failed");
                if let Some(issued) = credential.take() {
                    self.broker.revoke_action(issued.scope.action_id);
                }
                if decision.is_allow() {
                    decision = Decision::block(Stage::Audit, format!("audit sink failed: {}", e));
                }
                None
            }
        };

        for transition in &transitions {
            self.emit_transition(AuditAction::StateTransition, transition, audit_event_id);
        }
        if let Some(issued) = &credential {
            self.emit_follow_up(
                AuditEvent::new(session_id, AuditAction::CredentialIssued)
                    .with_action_id(action.action_id)
                    .with_metadata(serde_json::json!({
                        "credential_id": issued.credential_id,
                        "tool": issued.scope.tool,
                        "expires_at": issued.expires_at,
                        "issuer": issued.issuer,
                    })),
                audit_event_id,
            );
        }
        if revoked > 0 {
            self.emit_follow_up(
                AuditEvent::new(session_id, AuditAction::CredentialRevoked)
                    .with_metadata(serde_json::json!({ "revoked": revoked })),
                audit_event_id,
            );
        }

        if !transitions.is_empty() {
            self.persist();
        }

        tracing::info!(
            session_id,
            action_id = %action.action_id,
            disposition = %decision.disposition,
            stage = %decision.stage,
            reason = %decision.reason,
            "decision"
        );

        Ok(Evaluation {
            decision,
            credential,
            report,
            transitions,
            audit_event_id,
        })
    }

    fn emit_decision(
        &self,
        action: &ProposedAction,
        decision: &Decision,
        report: &EvaluationReport,
    ) -> Result<Uuid, tg_audit::AuditError> {
        let event = AuditEvent::new(&action.session_id, AuditAction::Decision)
            .with_action_id(action.action_id)
            .with_action_hash(action.fingerprint())
            .with_metadata(serde_json::json!({
                "decision": decision,
                "action_type": action.action_type,
                "tool": action.tool,
                "agent_id": action.agent_id,
                "session_mode": self.control.mode(&action.session_id),
                "report": report,
            }));
        self.audit.emit(event)
    }

    fn emit_transition(&self, kind: AuditAction, transition: &Transition, parent: Option<Uuid>) {
        let event = AuditEvent::new(&transition.session_id, kind).with_metadata(serde_json::json!({
            "transition_id": transition.transition_id,
            "from": transition.from,
            "to": transition.to,
            "reason": transition.reason,
            "operator": transition.operator,
        }));
        self.emit_follow_up(event, parent);
    }

    fn emit_follow_up(&self, event: AuditEvent, parent: Option<Uuid>) {
        let event = match parent {
            Some(id) => event.with_parent(id),
            None => event,
        };
        if let Err(e) = self.audit.emit(event) {
            tracing::error!(error = %e, "audit sink failed");
        }
    }

    fn persist(&self) {
        if let Some(file) = &self.state_file {
            persist_snapshot(file, &self.persist_lock, &self.control);
        }
    }

    /// Administrative release of a quarantined session. The session's
    /// barrier history is dropped with it.
    pub fn release_session(
        &self,
        session_id: &str,
        operator: &str,
    ) -> Result<Transition, GovernorError> {
        let transition = self
            .control
            .release(session_id, operator)
            .map_err(GovernorError::Control)?;
        self.estimator
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .forget(session_id);
        self.emit_transition(AuditAction::AdminRelease, &transition, None);
        self.persist();
        Ok(transition)
    }

    /// Engage the process-wide kill-switch. Returns `None` if already engaged.
    pub fn engage_kill_switch(
        &self,
        reason: &str,
        operator: &str,
    ) -> Result<Option<Transition>, GovernorError> {
        let transition = self
            .control
            .engage_kill_switch(reason, operator)
            .map_err(GovernorError::Control)?;
        if let Some(t) = &transition {
            self.emit_transition(AuditAction::KillSwitch, t, None);
            self.persist();
        }
        Ok(transition)
    }

    pub fn release_kill_switch(&self, operator: &str) -> Result<Transition, GovernorError> {
        let transition = self
            .control
            .release_kill_switch(operator)
            .map_err(GovernorError::Control)?;
        self.emit_transition(AuditAction::AdminRelease, &transition, None);
        self.persist();
        Ok(transition)
    }

    /// Present a credential to execute `action`. Consumes it on success.
    pub fn redeem(&self, token: &str, action: &ProposedAction) -> Result<Uuid, GovernorError> {
        let credential_id = self.broker.redeem(token, action)?;
        self.emit_follow_up(
            AuditEvent::new(&action.session_id, AuditAction::CredentialRedeemed)
                .with_action_id(action.action_id)
                .with_action_hash(action.fingerprint())
                .with_metadata(serde_json::json!({ "credential_id": credential_id })),
            None,
        );
        Ok(credential_id)
    }

    /// The cleanup pass the background task runs.
    pub fn sweep(&self) -> Sweep {
        Sweep {
            broker: Arc::clone(&self.broker),
            control: Arc::clone(&self.control),
            estimator: Arc::clone(&self.estimator),
        }
    }

    /// Start the periodic cleanup on the current runtime: expired
    /// credentials and aged tombstones, then idle sessions with their
    /// barrier history. The snapshot is saved when sessions were dropped.
    pub fn spawn_cleanup(&self) -> JoinHandle<()> {
        let sweep = self.sweep();
        let control = Arc::clone(&self.control);
        let state_file = self.state_file.clone();
        let persist_lock = Arc::clone(&self.persist_lock);
        spawn_cleanup(
            Duration::from_secs(self.config.control.credential_cleanup_secs),
            move || {
                let stats = sweep.run(chrono::Utc::now());
                if stats.sessions_evicted > 0 {
                    if let Some(file) = &state_file {
                        persist_snapshot(file, &persist_lock, &control);
                    }
                }
            },
        )
    }
}

fn persist_snapshot(file: &ControlStateFile, lock: &Mutex<()>, control: &ControlState) {
    let _guard = lock.lock().unwrap_or_else(|p| p.into_inner());
    if let Err(e) = file.save(&control.snapshot()) {
        tracing::error!(path = %file.path().display(), error = %e, "failed to persist control state");
    }
}

// governance_loop.rs — End-to-end behaviour of the governance control loop.
//
// Each test drives a real Governor (baseline policy, exposure risk model,
// barrier controller, consensus, content scan, credential broker) and checks
// one externally visible guarantee:
//
//   - critical failure probability always blocks
//   - a converging safety margin escalates while h is still positive
//   - three consecutive blocks only start tracking
//   - quarantine short-circuits the pipeline until an operator releases it
//   - credentials are bound to one action instance and used once
//   - consensus with too few answers by the deadline never passes
//   - a cancelled evaluation leaves no barrier sample and no decision
//   - concurrent quarantine triggers record one transition
//   - control state and the audit chain survive a restart

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::tempdir;

use tg_action::{ActionType, Disposition, ProposedAction, SafetyContext, Stage};
use tg_audit::{AuditAction, AuditLog, MemorySink};
use tg_consensus::{ConsensusStatus, Evaluator, EvaluatorError, FnEvaluator, Vote};
use tg_credentials::CredentialError;
use tg_governor::{ControlMode, Governor, GovernorConfig, GovernorError};
use tg_risk::{ExposureRiskModel, RiskAssessment, RiskError, RiskModel};

fn governor(sink: Arc<MemorySink>) -> Governor {
    Governor::builder(GovernorConfig::default())
        .audit_sink(sink)
        .build()
        .unwrap()
}

fn order(session: &str, amount: f64) -> ProposedAction {
    ProposedAction::new(session, ActionType::PlaceOrder)
        .with_tool("broker")
        .with_param("amount", amount)
        .with_param("ticker", "ACME")
}

fn sanctioned_order(session: &str) -> ProposedAction {
    order(session, 1_000.0).with_param("ticker", "SANCTIONED-CORP")
}

fn calm() -> SafetyContext {
    SafetyContext::new()
        .with_exposure(10_000.0)
        .with_liquidity(1.0)
        .with_drawdown(0.0)
}

/// Counts calls so tests can prove the model was never consulted.
struct CountingModel {
    inner: ExposureRiskModel,
    calls: AtomicUsize,
}

impl RiskModel for CountingModel {
    fn name(&self) -> &str {
        "counting"
    }

    fn estimate(
        &self,
        action: &ProposedAction,
        context: &SafetyContext,
    ) -> Result<RiskAssessment, RiskError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.estimate(action, context)
    }

    fn confidence(&self) -> f64 {
        self.inner.confidence()
    }
}

/// Answers after a fixed delay.
struct SlowEvaluator {
    name: String,
    delay: Duration,
}

#[async_trait]
impl Evaluator for SlowEvaluator {
    fn name(&self) -> &str {
        &self.name
    }

    async fn evaluate(&self, _action: &ProposedAction) -> Result<Vote, EvaluatorError> {
        tokio::time::sleep(self.delay).await;
        Ok(Vote::Approve)
    }
}

#[tokio::test]
async fn critical_failure_probability_blocks_regardless_of_other_stages() {
    let gov = governor(Arc::new(MemorySink::new()));
    // Drawdown beyond the 2% limit puts p at 0.99.
    let ctx = calm().with_drawdown(0.05);
    let eval = gov.evaluate(&order("s1", 100.0), &ctx).await.unwrap();

    assert_eq!(eval.decision.disposition, Disposition::Block);
    assert_eq!(eval.decision.stage, Stage::Risk);
    assert!(eval.report.risk.unwrap().failure_probability >= 0.9);
    assert!(eval.credential.is_none());
}

#[tokio::test]
async fn converging_margin_escalates_while_h_is_positive() {
    let gov = governor(Arc::new(MemorySink::new()));
    let limit = gov.config().risk.exposure_limit;

    // h = limit - exposure: 5, 3, 0.5
    let mut last = None;
    for h in [5.0, 3.0, 0.5] {
        let ctx = SafetyContext::new().with_exposure(limit - h);
        let fetch = ProposedAction::new("s1", ActionType::NetworkFetch)
            .with_param("url", "https://quotes.example.com/acme");
        last = Some(gov.evaluate(&fetch, &ctx).await.unwrap());
    }
    let eval = last.unwrap();

    let barrier = eval.report.barrier.unwrap();
    assert!((barrier.h - 0.5).abs() < 1e-9);
    assert!((barrier.h_dot + 2.5).abs() < 1e-9);
    assert!((barrier.h_ddot + 0.5).abs() < 1e-9);
    assert!(barrier.value() < 0.0);

    assert_eq!(eval.decision.disposition, Disposition::Escalate);
    assert_eq!(eval.decision.stage, Stage::Barrier);
    assert!(eval.credential.is_none());
    assert_eq!(gov.session_mode("s1"), ControlMode::Monitoring);
}

#[tokio::test]
async fn three_blocks_start_tracking_without_changing_outcomes() {
    let gov = governor(Arc::new(MemorySink::new()));
    let dangerous = || {
        ProposedAction::new("s1", ActionType::ExecuteCode)
            .with_tool("sandbox")
            .with_param("code", "rm -rf /var/lib/data")
    };

    for _ in 0..3 {
        let eval = gov.evaluate(&dangerous(), &SafetyContext::new()).await.unwrap();
        assert_eq!(eval.decision.disposition, Disposition::Block);
        assert_eq!(eval.decision.stage, Stage::Content);
    }
    assert_eq!(gov.session_mode("s1"), ControlMode::Tracking);

    let eval = gov.evaluate(&order("s1", 1_000.0), &calm()).await.unwrap();
    assert!(eval.decision.is_allow(), "{}", eval.decision);
    assert!(eval.credential.is_some());
    assert_eq!(gov.session_mode("s1"), ControlMode::Tracking);
}

#[tokio::test]
async fn quarantine_short_circuits_until_released() {
    let model = Arc::new(CountingModel {
        inner: ExposureRiskModel::default(),
        calls: AtomicUsize::new(0),
    });
    let sink = Arc::new(MemorySink::new());
    let gov = Governor::builder(GovernorConfig::default())
        .audit_sink(sink.clone())
        .risk_model(model.clone())
        .build()
        .unwrap();

    let eval = gov.evaluate(&sanctioned_order("s1"), &calm()).await.unwrap();
    assert_eq!(eval.decision.disposition, Disposition::Quarantine);
    assert_eq!(eval.decision.stage, Stage::Policy);
    assert_eq!(gov.session_mode("s1"), ControlMode::Quarantined);

    for _ in 0..3 {
        let eval = gov.evaluate(&order("s1", 10.0), &calm()).await.unwrap();
        assert_eq!(eval.decision.disposition, Disposition::Block);
        assert_eq!(eval.decision.stage, Stage::ControlState);
        assert!(eval.report.stages_run.is_empty());
    }
    assert_eq!(model.calls.load(Ordering::SeqCst), 0);

    // Other sessions are unaffected.
    assert!(gov
        .evaluate(&order("s2", 10.0), &calm())
        .await
        .unwrap()
        .decision
        .is_allow());

    assert!(matches!(
        gov.release_session("s1", ""),
        Err(GovernorError::Control(_))
    ));
    gov.release_session("s1", "risk-officer").unwrap();

    let eval = gov.evaluate(&order("s1", 10.0), &calm()).await.unwrap();
    assert!(eval.decision.is_allow(), "{}", eval.decision);
    assert!(eval.report.stages_run.contains(&Stage::Policy));

    assert!(sink
        .events()
        .iter()
        .any(|e| e.action == AuditAction::AdminRelease));
}

#[tokio::test]
async fn credential_is_bound_to_one_action_instance_and_used_once() {
    let gov = governor(Arc::new(MemorySink::new()));
    let a1 = order("s1", 1_000.0);
    let a2 = order("s1", 1_000.0);

    let token = gov
        .evaluate(&a1, &calm())
        .await
        .unwrap()
        .credential
        .unwrap()
        .token;

    assert!(matches!(
        gov.redeem(&token, &a2),
        Err(GovernorError::Credential(CredentialError::ScopeMismatch { .. }))
    ));
    gov.redeem(&token, &a1).unwrap();

    // Re-evaluating the same instance passes the pipeline but gets no credential.
    let again = gov.evaluate(&a1, &calm()).await.unwrap();
    assert_eq!(again.decision.disposition, Disposition::Block);
    assert_eq!(again.decision.stage, Stage::Credential);
    assert!(again.credential.is_none());
}

#[tokio::test(start_paused = true)]
async fn consensus_with_one_answer_by_the_deadline_fails() {
    let evaluators: Vec<Arc<dyn Evaluator>> = vec![
        Arc::new(FnEvaluator::new("fast", |_: &ProposedAction| Ok(Vote::Approve))),
        Arc::new(SlowEvaluator {
            name: "slow-1".to_string(),
            delay: Duration::from_secs(10),
        }),
        Arc::new(SlowEvaluator {
            name: "slow-2".to_string(),
            delay: Duration::from_secs(10),
        }),
    ];
    let gov = Governor::builder(GovernorConfig::default())
        .audit_sink(Arc::new(MemorySink::new()))
        .evaluators(evaluators)
        .build()
        .unwrap();
    assert_eq!(gov.config().consensus.timeout(), Duration::from_secs(2));

    // Above 50k: HIGH tier, so consensus is mandatory.
    let eval = gov.evaluate(&order("s1", 75_000.0), &calm()).await.unwrap();

    let consensus = eval.report.consensus.unwrap();
    assert_eq!(consensus.status, ConsensusStatus::TimedOut);
    assert_eq!(consensus.tally.approvals, 1);
    assert_eq!(eval.decision.disposition, Disposition::Block);
    assert_eq!(eval.decision.stage, Stage::Consensus);
    assert_eq!(gov.session_mode("s1"), ControlMode::Monitoring);
}

#[tokio::test(start_paused = true)]
async fn cancelled_evaluation_leaves_no_barrier_sample() {
    let sink = Arc::new(MemorySink::new());
    let evaluators: Vec<Arc<dyn Evaluator>> = vec![Arc::new(SlowEvaluator {
        name: "slow".to_string(),
        delay: Duration::from_millis(1_500),
    })];
    let gov = Governor::builder(GovernorConfig::default())
        .audit_sink(sink.clone())
        .evaluators(evaluators)
        .build()
        .unwrap();

    // HIGH tier: the risk stage has already seen the margin when consensus
    // starts waiting on the slow evaluator.
    let big = order("s1", 75_000.0);
    let cancelled = tokio::time::timeout(
        Duration::from_millis(100),
        gov.evaluate(&big, &calm()),
    )
    .await;
    assert!(cancelled.is_err());

    let fetch = ProposedAction::new("s1", ActionType::NetworkFetch)
        .with_param("url", "https://quotes.example.com/acme");
    let eval = gov.evaluate(&fetch, &calm()).await.unwrap();
    let barrier = eval.report.barrier.unwrap();
    assert_eq!(barrier.h_dot, 0.0);
    assert_eq!(barrier.h_ddot, 0.0);

    // The next sample differences against the fetch alone.
    let again = gov.evaluate(&fetch, &calm().with_exposure(12_000.0)).await.unwrap();
    assert!((again.report.barrier.unwrap().h_dot + 2_000.0).abs() < 1e-9);

    let events = sink.events();
    assert!(!events
        .iter()
        .any(|e| e.action == AuditAction::Decision && e.action_id == Some(big.action_id)));
    assert_eq!(
        events
            .iter()
            .filter(|e| e.action == AuditAction::Decision)
            .count(),
        2
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_quarantine_triggers_record_one_transition() {
    let sink = Arc::new(MemorySink::new());
    let gov = Arc::new(governor(sink.clone()));

    let first = {
        let gov = Arc::clone(&gov);
        tokio::spawn(async move { gov.evaluate(&sanctioned_order("s1"), &calm()).await })
    };
    let second = {
        let gov = Arc::clone(&gov);
        tokio::spawn(async move { gov.evaluate(&sanctioned_order("s1"), &calm()).await })
    };
    let results = [first.await.unwrap().unwrap(), second.await.unwrap().unwrap()];

    let quarantines = results
        .iter()
        .filter(|e| e.decision.disposition == Disposition::Quarantine)
        .count();
    assert_eq!(quarantines, 1);
    assert!(results.iter().all(|e| !e.decision.is_allow()));

    let transitions: Vec<_> = sink
        .events()
        .into_iter()
        .filter(|e| e.action == AuditAction::StateTransition)
        .collect();
    assert_eq!(transitions.len(), 1);
    assert_eq!(transitions[0].metadata["to"], "quarantined");

    let decisions = sink
        .events()
        .iter()
        .filter(|e| e.action == AuditAction::Decision)
        .count();
    assert_eq!(decisions, 2);
}

#[tokio::test]
async fn control_state_and_audit_chain_survive_restart() {
    let root = tempdir().unwrap();
    let config = GovernorConfig::for_project(root.path());

    {
        let gov = Governor::builder(config.clone()).build().unwrap();
        gov.evaluate(&order("s1", 1_000.0), &calm()).await.unwrap();
        gov.evaluate(&sanctioned_order("s7"), &calm()).await.unwrap();
        gov.engage_kill_switch("end of day", "ops").unwrap();
    }

    let gov = Governor::builder(config.clone()).build().unwrap();
    assert_eq!(gov.session_mode("s7"), ControlMode::Quarantined);
    let eval = gov.evaluate(&order("s1", 1_000.0), &calm()).await.unwrap();
    assert_eq!(eval.decision.stage, Stage::ControlState);
    assert!(eval.decision.reason.contains("end of day"));

    gov.release_kill_switch("ops").unwrap();
    assert!(gov
        .evaluate(&order("s1", 1_000.0), &calm())
        .await
        .unwrap()
        .decision
        .is_allow());

    let audit_path = config.paths.audit_log.unwrap();
    let summary = AuditLog::verify_chain(&audit_path).unwrap();
    let events = AuditLog::read_all(&audit_path).unwrap();
    assert_eq!(summary.events, events.len());
    assert!(events.iter().any(|e| e.action == AuditAction::KillSwitch));
    assert!(events
        .iter()
        .filter(|e| e.action == AuditAction::Decision)
        .all(|e| e.action_hash.is_some()));
}

#[tokio::test]
async fn corrupt_control_state_fails_closed() {
    let root = tempdir().unwrap();
    let config = GovernorConfig::for_project(root.path());
    let state_path = config.paths.control_state.clone().unwrap();
    std::fs::create_dir_all(state_path.parent().unwrap()).unwrap();
    std::fs::write(&state_path, "not json").unwrap();

    let gov = Governor::builder(config).build().unwrap();
    let eval = gov.evaluate(&order("s1", 10.0), &calm()).await.unwrap();
    assert_eq!(eval.decision.disposition, Disposition::Block);
    assert_eq!(eval.decision.stage, Stage::ControlState);
}

// voter.rs — Concurrent fan-out with a bounded deadline.
//
// Every evaluator runs on its own task. The voter collects answers until
// the outcome is mathematically decided, every evaluator has answered, or
// the deadline passes. Whatever is still running at that point is aborted.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tg_action::ProposedAction;
use tokio::task::{AbortHandle, JoinSet};
use tokio::time::Instant;

use crate::error::ConsensusError;
use crate::evaluator::{Evaluator, Vote};

/// What became of one evaluator's ballot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum BallotResult {
    Approved,
    Rejected { reason: String },
    /// The evaluator returned an error.
    Error { error: String },
    /// The evaluator task panicked.
    Panicked,
    /// No answer before the voter stopped waiting.
    NoResponse,
}

impl BallotResult {
    fn from_vote(vote: Vote) -> Self {
        match vote {
            Vote::Approve => BallotResult::Approved,
            Vote::Reject { reason } => BallotResult::Rejected { reason },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ballot {
    pub evaluator: String,
    #[serde(flatten)]
    pub result: BallotResult,
}

/// Running vote count over a fixed number of evaluators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tally {
    /// Configured evaluator count: the denominator.
    pub total: usize,
    /// Approvals needed for a strict majority.
    pub required: usize,
    pub approvals: usize,
    pub rejections: usize,
    /// Errors and panics.
    pub failures: usize,
}

impl Tally {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            required: total / 2 + 1,
            approvals: 0,
            rejections: 0,
            failures: 0,
        }
    }

    pub fn against(&self) -> usize {
        self.rejections + self.failures
    }

    pub fn pending(&self) -> usize {
        self.total.saturating_sub(self.approvals + self.against())
    }

    fn record(&mut self, result: &BallotResult) {
        match result {
            BallotResult::Approved => self.approvals += 1,
            BallotResult::Rejected { .. } => self.rejections += 1,
            BallotResult::Error { .. } | BallotResult::Panicked => self.failures += 1,
            BallotResult::NoResponse => {}
        }
    }

    /// `Some` once the remaining ballots can no longer change the outcome.
    fn decided(&self) -> Option<ConsensusStatus> {
        if self.approvals >= self.required {
            Some(ConsensusStatus::Passed)
        } else if self.against() > self.total - self.required {
            Some(ConsensusStatus::Failed)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsensusStatus {
    Passed,
    Failed,
    /// The deadline passed before a majority either way.
    TimedOut,
}

impl fmt::Display for ConsensusStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsensusStatus::Passed => write!(f, "passed"),
            ConsensusStatus::Failed => write!(f, "failed"),
            ConsensusStatus::TimedOut => write!(f, "timed out"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusOutcome {
    pub status: ConsensusStatus,
    pub tally: Tally,
    /// One ballot per configured evaluator, in configuration order.
    pub ballots: Vec<Ballot>,
    pub elapsed_ms: u64,
}

impl ConsensusOutcome {
    pub fn passed(&self) -> bool {
        self.status == ConsensusStatus::Passed
    }

    pub fn summary(&self) -> String {
        format!(
            "consensus {}: {}/{} approve, {} reject, {} failed, {} pending",
            self.status,
            self.tally.approvals,
            self.tally.total,
            self.tally.rejections,
            self.tally.failures,
            self.tally.pending()
        )
    }
}

/// Aborts the wrapped task when dropped, so evaluators never outlive the vote.
struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Majority voting across a fixed set of evaluators.
#[derive(Clone)]
pub struct ConsensusVoter {
    evaluators: Vec<Arc<dyn Evaluator>>,
}

impl fmt::Debug for ConsensusVoter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsensusVoter")
            .field("evaluators", &self.names())
            .finish()
    }
}

impl ConsensusVoter {
    pub fn new(evaluators: Vec<Arc<dyn Evaluator>>) -> Result<Self, ConsensusError> {
        if evaluators.is_empty() {
            return Err(ConsensusError::NoEvaluators);
        }
        Ok(Self { evaluators })
    }

    pub fn names(&self) -> Vec<&str> {
        self.evaluators.iter().map(|e| e.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.evaluators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.evaluators.is_empty()
    }

    /// Ask every evaluator about `action` and wait at most `timeout`.
    pub async fn vote(&self, action: Arc<ProposedAction>, timeout: Duration) -> ConsensusOutcome {
        let started = Instant::now();
        let deadline = started + timeout;
        let total = self.evaluators.len();

        let mut set = JoinSet::new();
        for (idx, evaluator) in self.evaluators.iter().enumerate() {
            let evaluator = Arc::clone(evaluator);
            let action = Arc::clone(&action);
            set.spawn(async move {
                // The inner task isolates panics; the outer one always reports.
                let inner = tokio::spawn(async move { evaluator.evaluate(&action).await });
                let _guard = AbortOnDrop(inner.abort_handle());
                let result = match inner.await {
                    Ok(Ok(vote)) => BallotResult::from_vote(vote),
                    Ok(Err(e)) => BallotResult::Error {
                        error: e.to_string(),
                    },
                    Err(e) if e.is_panic() => BallotResult::Panicked,
                    Err(_) => BallotResult::NoResponse,
                };
                (idx, result)
            });
        }

        let mut tally = Tally::new(total);
        let mut results: Vec<Option<BallotResult>> = vec![None; total];

        let status = loop {
            if let Some(status) = tally.decided() {
                break status;
            }
            match tokio::time::timeout_at(deadline, set.join_next()).await {
                Err(_) => break ConsensusStatus::TimedOut,
                // Everyone answered without a majority: only possible with NoResponse ballots.
                Ok(None) => break ConsensusStatus::Failed,
                Ok(Some(Ok((idx, result)))) => {
                    tally.record(&result);
                    if let Some(slot) = results.get_mut(idx) {
                        *slot = Some(result);
                    }
                }
                Ok(Some(Err(e))) => {
                    tracing::warn!(error = %e, "consensus task failed; counting as a vote against");
                    tally.failures += 1;
                }
            }
        };
        set.abort_all();

        let ballots = self
            .evaluators
            .iter()
            .zip(results)
            .map(|(evaluator, result)| Ballot {
                evaluator: evaluator.name().to_string(),
                result: result.unwrap_or(BallotResult::NoResponse),
            })
            .collect();

        let outcome = ConsensusOutcome {
            status,
            tally,
            ballots,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };
        tracing::info!(
            action_id = %action.action_id,
            status = %outcome.status,
            approvals = tally.approvals,
            rejections = tally.rejections,
            failures = tally.failures,
            total,
            "consensus vote complete"
        );
        outcome
    }
}

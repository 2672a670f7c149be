// evaluator.rs — The capability each consensus participant implements.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tg_action::ProposedAction;

use crate::error::EvaluatorError;

/// One evaluator's answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "vote", rename_all = "snake_case")]
pub enum Vote {
    Approve,
    Reject { reason: String },
}

impl Vote {
    pub fn reject(reason: impl Into<String>) -> Self {
        Vote::Reject {
            reason: reason.into(),
        }
    }
}

/// An independent judge of a proposed action.
///
/// Implementations may call out to a remote model or service; the voter
/// bounds how long it waits, so `evaluate` does not need its own timeout.
#[async_trait]
pub trait Evaluator: Send + Sync {
    fn name(&self) -> &str;

    async fn evaluate(&self, action: &ProposedAction) -> Result<Vote, EvaluatorError>;
}

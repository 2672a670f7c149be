// error.rs — Error types for consensus voting.

use thiserror::Error;

/// A single evaluator could not produce a vote. Counted as a vote against.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EvaluatorError {
    #[error("evaluator unavailable: {0}")]
    Unavailable(String),

    #[error("malformed evaluator response: {0}")]
    Malformed(String),

    #[error("evaluator failed: {0}")]
    Failed(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConsensusError {
    /// A voter with nobody to ask can never reach a majority.
    #[error("consensus requires at least one evaluator")]
    NoEvaluators,

    #[error("invalid evaluator '{name}': {reason}")]
    InvalidEvaluator { name: String, reason: String },
}

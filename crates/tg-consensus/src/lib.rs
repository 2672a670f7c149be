//! # tg-consensus
//!
//! Majority voting for high-risk actions.
//!
//! A [`ConsensusVoter`] dispatches one proposed action to every configured
//! [`Evaluator`] concurrently and tallies the answers against a deadline.
//!
//! ## Key invariants
//!
//! - **Fixed denominator**: the majority is computed over the configured
//!   evaluator count. An evaluator that errors, panics or never answers is
//!   never dropped from it.
//! - **Fail-closed**: a tie, a rejection majority or a deadline without a
//!   majority never passes.

pub mod builtin;
pub mod error;
pub mod evaluator;
pub mod voter;

pub use builtin::{
    ActionTypeEvaluator, EvaluatorSpec, FnEvaluator, KeywordEvaluator, LimitEvaluator,
};
pub use error::{ConsensusError, EvaluatorError};
pub use evaluator::{Evaluator, Vote};
pub use voter::{Ballot, BallotResult, ConsensusOutcome, ConsensusStatus, ConsensusVoter, Tally};

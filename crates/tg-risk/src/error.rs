// error.rs — Error types for risk estimation.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum RiskError {
    /// The action type needs a context field or parameter that was not supplied.
    #[error("invalid context for '{action_type}': missing {missing}")]
    InvalidContext {
        action_type: String,
        missing: String,
    },

    /// A parameter is present but unusable (negative amount, NaN, ...).
    #[error("invalid parameter '{param}': {reason}")]
    InvalidParameter { param: String, reason: String },

    /// The safety margin is NaN or infinite.
    #[error("safety margin is not finite: {0}")]
    NonFiniteMargin(f64),

    /// Barrier gains must be finite and non-negative.
    #[error("invalid barrier gains k1={k1}, k2={k2}")]
    InvalidGains { k1: f64, k2: f64 },

    /// Derivative estimation needs at least three samples.
    #[error("derivative window must hold at least 3 samples, got {0}")]
    WindowTooSmall(usize),
}

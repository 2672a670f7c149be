//! # tg-risk
//!
//! Numeric risk signals for Tollgate.
//!
//! - [`RiskModel`] turns an action plus its [`SafetyContext`](tg_action::SafetyContext)
//!   into a [`RiskAssessment`]: cost, failure probability and the safety
//!   margin `h`. [`ExposureRiskModel`] is the stock constrained-cost model.
//! - [`DerivativeEstimator`] keeps a short per-session window of `h` and
//!   estimates its velocity and acceleration.
//! - [`BarrierController`] checks `h + K1·ḣ + K2·ḧ ≥ 0`, which fails on a
//!   trajectory converging toward the limit even while `h` is still positive.

pub mod barrier;
pub mod error;
pub mod estimator;
pub mod model;

pub use barrier::{BarrierCheck, BarrierController, BarrierGains, BarrierState};
pub use error::RiskError;
pub use estimator::DerivativeEstimator;
pub use model::{ExposureLimits, ExposureRiskModel, RiskAssessment, RiskModel};

// barrier.rs — Exponential control barrier check.
//
// Condition: h + K1·ḣ + K2·ḧ ≥ 0
//
// With K1 = 2, K2 = 1 the characteristic polynomial s² + 2s + 1 is
// critically damped at ω = 1 per step. A negative sum means the margin is
// shrinking fast enough to cross zero within a few steps.

use serde::{Deserialize, Serialize};

use crate::error::RiskError;

/// Controller gains. Both non-negative and finite.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BarrierGains {
    pub k1: f64,
    pub k2: f64,
}

impl BarrierGains {
    pub fn new(k1: f64, k2: f64) -> Result<Self, RiskError> {
        let gains = Self { k1, k2 };
        gains.validate()?;
        Ok(gains)
    }

    pub fn validate(&self) -> Result<(), RiskError> {
        let ok = |g: f64| g.is_finite() && g >= 0.0;
        if ok(self.k1) && ok(self.k2) {
            Ok(())
        } else {
            Err(RiskError::InvalidGains {
                k1: self.k1,
                k2: self.k2,
            })
        }
    }
}

impl Default for BarrierGains {
    fn default() -> Self {
        Self { k1: 2.0, k2: 1.0 }
    }
}

/// The safety margin, its estimated derivatives and the gains applied.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BarrierState {
    pub h: f64,
    pub h_dot: f64,
    pub h_ddot: f64,
    pub k1: f64,
    pub k2: f64,
}

impl BarrierState {
    /// `h + K1·ḣ + K2·ḧ`
    pub fn value(&self) -> f64 {
        self.h + self.k1 * self.h_dot + self.k2 * self.h_ddot
    }
}

/// Result of a barrier check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum BarrierCheck {
    Pass { value: f64 },
    Fail { value: f64, reason: String },
}

impl BarrierCheck {
    pub fn is_pass(&self) -> bool {
        matches!(self, BarrierCheck::Pass { .. })
    }

    pub fn value(&self) -> f64 {
        match self {
            BarrierCheck::Pass { value } | BarrierCheck::Fail { value, .. } => *value,
        }
    }
}

/// Evaluates the barrier inequality.
#[derive(Debug, Clone, Copy, Default)]
pub struct BarrierController;

impl BarrierController {
    pub fn new() -> Self {
        Self
    }

    pub fn check(&self, state: &BarrierState) -> BarrierCheck {
        let value = state.value();
        // NaN must fail: `NaN >= 0.0` is false.
        if value >= 0.0 {
            return BarrierCheck::Pass { value };
        }

        let reason = if state.h >= 0.0 {
            format!(
                "margin {:.2} is positive but converging on the limit (velocity {:.2}, acceleration {:.2}, barrier {:.2})",
                state.h, state.h_dot, state.h_ddot, value
            )
        } else {
            format!("margin {:.2} is already past the limit (barrier {:.2})", state.h, value)
        };
        BarrierCheck::Fail { value, reason }
    }
}

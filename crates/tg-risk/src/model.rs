// model.rs — RiskModel capability and the stock exposure model.
//
// The exposure model is a constrained-cost estimate: each action has a cost
// (the exposure it adds), and the constraint is that cumulative exposure
// stays under a limit and the day's drawdown stays under its own limit.
// The safety margin `h` is the headroom left under the exposure limit after
// the action.

use serde::{Deserialize, Serialize};
use tg_action::{ActionType, ProposedAction, SafetyContext};

use crate::error::RiskError;

/// Output of a risk model for one action.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    /// Cost the action adds, in account currency.
    pub cost: f64,
    /// Probability in [0, 1] that the action breaches a constraint.
    pub failure_probability: f64,
    /// Headroom under the exposure limit after the action (`h`).
    pub safety_margin: f64,
    /// The producing model's declared confidence. Recorded for audit only.
    pub confidence: f64,
}

/// A pluggable risk estimator.
///
/// Implementations must be deterministic for a given action and context so
/// decisions can be replayed from the audit trail.
pub trait RiskModel: Send + Sync {
    fn name(&self) -> &str;

    fn estimate(
        &self,
        action: &ProposedAction,
        context: &SafetyContext,
    ) -> Result<RiskAssessment, RiskError>;

    /// How far the failure probability can be trusted, in [0, 1].
    ///
    /// Copied into every [`RiskAssessment`] so reviewers can weigh the
    /// estimate after the fact. The governor compares the raw failure
    /// probability against its thresholds and never scales it by this
    /// value; a model that is unsure should say so in the probability.
    fn confidence(&self) -> f64;
}

/// Constraint limits for [`ExposureRiskModel`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExposureLimits {
    pub exposure_limit: f64,
    /// Maximum daily drawdown as a fraction (0.02 = 2%).
    pub max_drawdown: f64,
}

impl Default for ExposureLimits {
    fn default() -> Self {
        Self {
            exposure_limit: 1_000_000.0,
            max_drawdown: 0.02,
        }
    }
}

const P_DRAWDOWN_BREACH: f64 = 0.99;
const P_EXPOSURE_BREACH: f64 = 0.95;
const P_CODE_EXECUTION: f64 = 0.05;
const P_BASE: f64 = 0.01;
/// Added on top of the base probability as exposure approaches the limit.
const P_UTILIZATION_SPAN: f64 = 0.09;

/// Stock model: projects exposure after the action and checks it against
/// the exposure and drawdown limits.
#[derive(Debug, Clone, Default)]
pub struct ExposureRiskModel {
    limits: ExposureLimits,
}

impl ExposureRiskModel {
    pub fn new(limits: ExposureLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> ExposureLimits {
        self.limits
    }

    fn estimate_order(
        &self,
        action: &ProposedAction,
        context: &SafetyContext,
    ) -> Result<RiskAssessment, RiskError> {
        let missing = |what: &str| RiskError::InvalidContext {
            action_type: action.action_type.to_string(),
            missing: what.to_string(),
        };

        let exposure = context
            .risk_exposure
            .ok_or_else(|| missing("risk_exposure"))?;
        let amount = action
            .number("amount")
            .or_else(|| action.number("estimated_value"))
            .ok_or_else(|| missing("amount"))?;
        if !amount.is_finite() || amount < 0.0 {
            return Err(RiskError::InvalidParameter {
                param: "amount".to_string(),
                reason: format!("must be a finite non-negative number, got {}", amount),
            });
        }

        // Thin markets cost more to trade: slippage factor 1 + (1 - liquidity).
        let liquidity = context.liquidity_score.unwrap_or(1.0).clamp(0.0, 1.0);
        let cost = amount * (1.0 + (1.0 - liquidity));

        let selling = action
            .param("side")
            .and_then(|v| v.as_str())
            .is_some_and(|s| s.eq_ignore_ascii_case("sell"));
        let projected = if selling {
            (exposure - cost).max(0.0)
        } else {
            exposure + cost
        };

        let limit = self.limits.exposure_limit;
        let drawdown = context.daily_drawdown.unwrap_or(0.0);

        let failure_probability = if drawdown > self.limits.max_drawdown {
            tracing::warn!(drawdown, limit = self.limits.max_drawdown, "drawdown limit exceeded");
            P_DRAWDOWN_BREACH
        } else if projected > limit {
            tracing::warn!(projected, limit, "projected exposure exceeds limit");
            P_EXPOSURE_BREACH
        } else if limit > 0.0 {
            P_BASE + P_UTILIZATION_SPAN * (projected / limit)
        } else {
            P_BASE
        };

        Ok(RiskAssessment {
            cost,
            failure_probability,
            safety_margin: limit - projected,
            confidence: self.confidence(),
        })
    }
}

impl RiskModel for ExposureRiskModel {
    fn name(&self) -> &str {
        "exposure"
    }

    fn estimate(
        &self,
        action: &ProposedAction,
        context: &SafetyContext,
    ) -> Result<RiskAssessment, RiskError> {
        if action.action_type == ActionType::PlaceOrder {
            return self.estimate_order(action, context);
        }

        // Non-trading actions add no exposure; the margin is the current headroom.
        let exposure = context.risk_exposure.unwrap_or(0.0);
        let failure_probability = match action.action_type {
            ActionType::ExecuteCode => P_CODE_EXECUTION,
            _ => P_BASE,
        };
        Ok(RiskAssessment {
            cost: 0.0,
            failure_probability,
            safety_margin: self.limits.exposure_limit - exposure,
            confidence: self.confidence(),
        })
    }

    fn confidence(&self) -> f64 {
        0.8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model() -> ExposureRiskModel {
        ExposureRiskModel::new(ExposureLimits {
            exposure_limit: 10_000.0,
            max_drawdown: 0.02,
        })
    }

    fn buy(amount: f64) -> ProposedAction {
        ProposedAction::new("s1", ActionType::PlaceOrder).with_param("amount", amount)
    }

    #[test]
    fn order_without_exposure_is_invalid_context() {
        let err = model().estimate(&buy(100.0), &SafetyContext::new()).unwrap_err();
        assert_eq!(
            err,
            RiskError::InvalidContext {
                action_type: "place_order".to_string(),
                missing: "risk_exposure".to_string()
            }
        );
    }

    #[test]
    fn order_without_amount_is_invalid_context() {
        let action = ProposedAction::new("s1", ActionType::PlaceOrder);
        let err = model()
            .estimate(&action, &SafetyContext::new().with_exposure(0.0))
            .unwrap_err();
        assert!(matches!(err, RiskError::InvalidContext { missing, .. } if missing == "amount"));
    }

    #[test]
    fn margin_is_headroom_after_the_trade() {
        let ctx = SafetyContext::new().with_exposure(4_000.0);
        let risk = model().estimate(&buy(1_000.0), &ctx).unwrap();
        assert_eq!(risk.cost, 1_000.0);
        assert_eq!(risk.safety_margin, 5_000.0);
        assert!(risk.failure_probability < 0.1);
    }

    #[test]
    fn illiquid_market_doubles_cost() {
        let ctx = SafetyContext::new().with_exposure(0.0).with_liquidity(0.0);
        let risk = model().estimate(&buy(1_000.0), &ctx).unwrap();
        assert_eq!(risk.cost, 2_000.0);
        assert_eq!(risk.safety_margin, 8_000.0);
    }

    #[test]
    fn breaching_exposure_is_near_certain_failure() {
        let ctx = SafetyContext::new().with_exposure(9_500.0);
        let risk = model().estimate(&buy(1_000.0), &ctx).unwrap();
        assert_eq!(risk.failure_probability, 0.95);
        assert!(risk.safety_margin < 0.0);
    }

    #[test]
    fn drawdown_breach_dominates() {
        let ctx = SafetyContext::new().with_exposure(0.0).with_drawdown(0.03);
        let risk = model().estimate(&buy(10.0), &ctx).unwrap();
        assert_eq!(risk.failure_probability, 0.99);
    }

    #[test]
    fn selling_reduces_exposure() {
        let ctx = SafetyContext::new().with_exposure(6_000.0);
        let sell = buy(2_000.0).with_param("side", "SELL");
        let risk = model().estimate(&sell, &ctx).unwrap();
        assert_eq!(risk.safety_margin, 6_000.0);
    }

    #[test]
    fn negative_amount_is_rejected() {
        let ctx = SafetyContext::new().with_exposure(0.0);
        assert!(matches!(
            model().estimate(&buy(-5.0), &ctx),
            Err(RiskError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn code_execution_carries_higher_base_risk() {
        let m = model();
        let ctx = SafetyContext::new();
        let code = m
            .estimate(&ProposedAction::new("s1", ActionType::ExecuteCode), &ctx)
            .unwrap();
        let fetch = m
            .estimate(&ProposedAction::new("s1", ActionType::NetworkFetch), &ctx)
            .unwrap();
        assert_eq!(code.failure_probability, 0.05);
        assert_eq!(fetch.failure_probability, 0.01);
        assert_eq!(code.safety_margin, 10_000.0);
    }

    #[test]
    fn estimates_are_deterministic() {
        let ctx = SafetyContext::new().with_exposure(1_234.0).with_liquidity(0.7);
        let action = buy(321.0);
        assert_eq!(
            model().estimate(&action, &ctx).unwrap(),
            model().estimate(&action, &ctx).unwrap()
        );
    }
}

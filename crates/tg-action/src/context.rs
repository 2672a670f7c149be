// context.rs — SafetyContext: the situational snapshot supplied with an action.
//
// The calling agent framework computes this; the governor only reads it.
// Fields are optional because different action types need different facts
// (a trade needs exposure, a code run needs none). The risk model decides
// which fields are mandatory for which action type.

use serde::{Deserialize, Serialize};

/// Read-only situational state relevant to risk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SafetyContext {
    /// Total portfolio value in account currency.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub portfolio_value: Option<f64>,

    /// Current open risk exposure in account currency.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_exposure: Option<f64>,

    /// Today's drawdown as a fraction (0.02 = 2%).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub daily_drawdown: Option<f64>,

    /// Market volatility estimate (0.2 = 20% annualized).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub market_volatility: Option<f64>,

    /// Liquidity from 0.0 (illiquid) to 1.0 (highly liquid).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub liquidity_score: Option<f64>,

    /// Summary of the agent's reasoning leading up to the action.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_summary: Option<String>,

    /// Seconds since the session started.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_elapsed_secs: Option<u64>,
}

impl SafetyContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_exposure(mut self, risk_exposure: f64) -> Self {
        self.risk_exposure = Some(risk_exposure);
        self
    }

    pub fn with_portfolio_value(mut self, portfolio_value: f64) -> Self {
        self.portfolio_value = Some(portfolio_value);
        self
    }

    pub fn with_drawdown(mut self, daily_drawdown: f64) -> Self {
        self.daily_drawdown = Some(daily_drawdown);
        self
    }

    pub fn with_liquidity(mut self, liquidity_score: f64) -> Self {
        self.liquidity_score = Some(liquidity_score);
        self
    }

    pub fn with_volatility(mut self, market_volatility: f64) -> Self {
        self.market_volatility = Some(market_volatility);
        self
    }

    pub fn with_reasoning(mut self, summary: impl Into<String>) -> Self {
        self.reasoning_summary = Some(summary.into());
        self
    }
}

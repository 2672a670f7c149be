// builtin.rs — Evaluators that ship with Tollgate.
//
// Real deployments plug in model-backed evaluators through the Evaluator
// trait. These rule-based ones cover configuration-only setups and tests.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tg_action::ProposedAction;

use crate::error::{ConsensusError, EvaluatorError};
use crate::evaluator::{Evaluator, Vote};

/// Wraps a synchronous closure.
pub struct FnEvaluator<F> {
    name: String,
    f: F,
}

impl<F> FnEvaluator<F>
where
    F: Fn(&ProposedAction) -> Result<Vote, EvaluatorError> + Send + Sync,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

#[async_trait]
impl<F> Evaluator for FnEvaluator<F>
where
    F: Fn(&ProposedAction) -> Result<Vote, EvaluatorError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn evaluate(&self, action: &ProposedAction) -> Result<Vote, EvaluatorError> {
        (self.f)(action)
    }
}

/// Rejects when a numeric parameter exceeds `max`. Absent parameters approve.
#[derive(Debug, Clone)]
pub struct LimitEvaluator {
    name: String,
    param: String,
    max: f64,
}

impl LimitEvaluator {
    pub fn new(name: impl Into<String>, param: impl Into<String>, max: f64) -> Self {
        Self {
            name: name.into(),
            param: param.into(),
            max,
        }
    }
}

#[async_trait]
impl Evaluator for LimitEvaluator {
    fn name(&self) -> &str {
        &self.name
    }

    async fn evaluate(&self, action: &ProposedAction) -> Result<Vote, EvaluatorError> {
        let Some(value) = action.param(&self.param) else {
            return Ok(Vote::Approve);
        };
        match value.as_f64() {
            Some(n) if n <= self.max => Ok(Vote::Approve),
            Some(n) => Ok(Vote::reject(format!(
                "{} = {} above {}",
                self.param, n, self.max
            ))),
            None => Err(EvaluatorError::Malformed(format!(
                "'{}' is not numeric",
                self.param
            ))),
        }
    }
}

/// Rejects listed action types.
#[derive(Debug, Clone)]
pub struct ActionTypeEvaluator {
    name: String,
    deny: Vec<String>,
}

impl ActionTypeEvaluator {
    pub fn new(name: impl Into<String>, deny: Vec<String>) -> Self {
        Self {
            name: name.into(),
            deny,
        }
    }
}

#[async_trait]
impl Evaluator for ActionTypeEvaluator {
    fn name(&self) -> &str {
        &self.name
    }

    async fn evaluate(&self, action: &ProposedAction) -> Result<Vote, EvaluatorError> {
        let action_type = action.action_type.as_str();
        if self.deny.iter().any(|t| t == action_type) {
            Ok(Vote::reject(format!("{} is not acceptable", action_type)))
        } else {
            Ok(Vote::Approve)
        }
    }
}

/// Rejects when any text parameter contains one of the keywords
/// (case-insensitive).
#[derive(Debug, Clone)]
pub struct KeywordEvaluator {
    name: String,
    keywords: Vec<String>,
}

impl KeywordEvaluator {
    pub fn new(name: impl Into<String>, keywords: Vec<String>) -> Self {
        Self {
            name: name.into(),
            keywords: keywords.into_iter().map(|k| k.to_lowercase()).collect(),
        }
    }
}

#[async_trait]
impl Evaluator for KeywordEvaluator {
    fn name(&self) -> &str {
        &self.name
    }

    async fn evaluate(&self, action: &ProposedAction) -> Result<Vote, EvaluatorError> {
        for (field, text) in action.text_fields() {
            let lowered = text.to_lowercase();
            if let Some(k) = self.keywords.iter().find(|k| lowered.contains(k.as_str())) {
                return Ok(Vote::reject(format!("'{}' mentions '{}'", field, k)));
            }
        }
        Ok(Vote::Approve)
    }
}

/// Configuration form of the built-in evaluators, tagged by `kind`.
///
/// ```toml
/// [[consensus.evaluators]]
/// kind = "limit"
/// name = "notional-check"
/// param = "amount"
/// max = 5000000
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EvaluatorSpec {
    Limit {
        name: String,
        param: String,
        max: f64,
    },
    ActionTypes {
        name: String,
        deny: Vec<String>,
    },
    Keywords {
        name: String,
        keywords: Vec<String>,
    },
}

impl EvaluatorSpec {
    pub fn name(&self) -> &str {
        match self {
            EvaluatorSpec::Limit { name, .. }
            | EvaluatorSpec::ActionTypes { name, .. }
            | EvaluatorSpec::Keywords { name, .. } => name,
        }
    }

    pub fn build(&self) -> Result<Arc<dyn Evaluator>, ConsensusError> {
        let invalid = |reason: &str| ConsensusError::InvalidEvaluator {
            name: self.name().to_string(),
            reason: reason.to_string(),
        };
        if self.name().is_empty() {
            return Err(invalid("name must not be empty"));
        }
        Ok(match self {
            EvaluatorSpec::Limit { name, param, max } => {
                if !max.is_finite() {
                    return Err(invalid("max must be finite"));
                }
                Arc::new(LimitEvaluator::new(name.clone(), param.clone(), *max))
            }
            EvaluatorSpec::ActionTypes { name, deny } => {
                Arc::new(ActionTypeEvaluator::new(name.clone(), deny.clone()))
            }
            EvaluatorSpec::Keywords { name, keywords } => {
                if keywords.iter().any(|k| k.is_empty()) {
                    return Err(invalid("keywords must not be empty strings"));
                }
                Arc::new(KeywordEvaluator::new(name.clone(), keywords.clone()))
            }
        })
    }

    /// Three independent checks, mirroring a three-reviewer ensemble.
    pub fn defaults() -> Vec<EvaluatorSpec> {
        vec![
            EvaluatorSpec::Limit {
                name: "notional-limit".to_string(),
                param: "amount".to_string(),
                max: 5_000_000.0,
            },
            EvaluatorSpec::ActionTypes {
                name: "irreversible-types".to_string(),
                deny: vec!["delete_data".to_string(), "transfer_funds".to_string()],
            },
            EvaluatorSpec::Keywords {
                name: "ambiguity-check".to_string(),
                keywords: vec!["borderline".to_string(), "all-in".to_string()],
            },
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tg_action::ActionType;

    fn order(amount: f64) -> ProposedAction {
        ProposedAction::new("s1", ActionType::PlaceOrder).with_param("amount", amount)
    }

    #[tokio::test]
    async fn limit_evaluator() {
        let e = LimitEvaluator::new("lim", "amount", 100.0);
        assert_eq!(e.evaluate(&order(100.0)).await.unwrap(), Vote::Approve);
        assert!(matches!(
            e.evaluate(&order(101.0)).await.unwrap(),
            Vote::Reject { .. }
        ));
        let text = ProposedAction::new("s1", ActionType::PlaceOrder).with_param("amount", "huge");
        assert!(e.evaluate(&text).await.is_err());
    }

    #[tokio::test]
    async fn keyword_evaluator_is_case_insensitive() {
        let e = KeywordEvaluator::new("kw", vec!["Borderline".to_string()]);
        let action = order(1.0).with_param("note", "a BORDERLINE call");
        assert!(matches!(e.evaluate(&action).await.unwrap(), Vote::Reject { .. }));
        assert_eq!(e.evaluate(&order(1.0)).await.unwrap(), Vote::Approve);
    }

    #[tokio::test]
    async fn action_type_evaluator() {
        let e = ActionTypeEvaluator::new("types", vec!["execute_code".to_string()]);
        let code = ProposedAction::new("s1", ActionType::ExecuteCode);
        assert!(matches!(e.evaluate(&code).await.unwrap(), Vote::Reject { .. }));
    }

    #[test]
    fn specs_deserialize_by_kind_and_build() {
        let json = serde_json::json!([
            {"kind": "limit", "name": "notional", "param": "amount", "max": 1000},
            {"kind": "keywords", "name": "kw", "keywords": ["borderline"]}
        ]);
        let specs: Vec<EvaluatorSpec> = serde_json::from_value(json).unwrap();
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].build().unwrap().name(), "notional");
        assert_eq!(specs[1].name(), "kw");
    }

    #[test]
    fn invalid_specs_are_rejected() {
        let spec = EvaluatorSpec::Limit {
            name: "bad".to_string(),
            param: "amount".to_string(),
            max: f64::NAN,
        };
        assert!(matches!(
            spec.build(),
            Err(ConsensusError::InvalidEvaluator { .. })
        ));
        assert_eq!(EvaluatorSpec::defaults().len(), 3);
    }
}

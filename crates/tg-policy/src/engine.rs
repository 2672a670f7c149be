// engine.rs — Policy rule interpreter.
//
// The PolicyEngine walks every rule in the loaded document:
//
// 1. Does the rule apply to this action type? → No → skip
// 2. Does the rule's check fire? → No → passed
// 3. Effect `elevate` → raise the verdict tier
// 4. Effect `deny` → raise the verdict tier and record a violation
//
// Rules are conjunctive: one violation denies. All violations are collected
// so the audit trail shows every reason, not just the first one found.

use glob::{MatchOptions, Pattern};
use serde::{Deserialize, Serialize};
use tg_action::ProposedAction;

use crate::document::{PolicyDocument, RiskTier, Rule, RuleCheck, RuleEffect};

/// One reason the policy denied an action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    pub rule_id: String,
    /// Machine-readable code, e.g. `threshold_exceeded`.
    pub code: String,
    /// Tier of the rule that produced this violation.
    pub tier: RiskTier,
    pub message: String,
}

/// The result of evaluating one action against the policy document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyVerdict {
    pub allowed: bool,
    /// Highest tier among the rules that fired; LOW when none did.
    pub tier: RiskTier,
    /// Every violation, in document order.
    pub violations: Vec<Violation>,
    pub policy_version: String,
}

impl PolicyVerdict {
    /// True when at least one violation came from a CRITICAL rule.
    pub fn has_critical_violation(&self) -> bool {
        self.violations.iter().any(|v| v.tier == RiskTier::Critical)
    }

    /// Violation messages joined for a Decision reason.
    pub fn summary(&self) -> String {
        self.violations
            .iter()
            .map(|v| format!("{}: {}", v.rule_id, v.message))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// A step in the rule evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationStep {
    pub rule_id: String,
    /// The check kind (e.g., "threshold", "restricted_set").
    pub check: String,
    /// "skipped", "passed", "elevated: ..." or "violated: ...".
    pub outcome: String,
}

/// A verdict plus every rule the engine looked at.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationTrace {
    pub verdict: PolicyVerdict,
    pub steps: Vec<EvaluationStep>,
}

/// Interprets a [`PolicyDocument`] against proposed actions.
#[derive(Debug, Clone)]
pub struct PolicyEngine {
    document: PolicyDocument,
}

impl PolicyEngine {
    pub fn new(document: PolicyDocument) -> Self {
        Self { document }
    }

    pub fn version(&self) -> &str {
        &self.document.version
    }

    pub fn document(&self) -> &PolicyDocument {
        &self.document
    }

    /// Evaluate an action and return the verdict.
    pub fn evaluate(&self, action: &ProposedAction) -> PolicyVerdict {
        self.evaluate_with_trace(action).verdict
    }

    /// Evaluate an action, recording the outcome of every rule.
    pub fn evaluate_with_trace(&self, action: &ProposedAction) -> EvaluationTrace {
        let action_type = action.action_type.as_str();
        let mut tier = RiskTier::Low;
        let mut violations = Vec::new();
        let mut steps = Vec::with_capacity(self.document.rules.len());

        for rule in &self.document.rules {
            if !rule.applies_to_type(action_type) {
                steps.push(step(rule, "skipped".to_string()));
                continue;
            }

            let Some((code, message)) = check_rule(&rule.check, action) else {
                steps.push(step(rule, "passed".to_string()));
                continue;
            };

            tier = tier.max(rule.tier);
            match rule.effect {
                RuleEffect::Elevate => {
                    steps.push(step(rule, format!("elevated to {}: {}", rule.tier, message)));
                }
                RuleEffect::Deny => {
                    steps.push(step(rule, format!("violated: {}", message)));
                    violations.push(Violation {
                        rule_id: rule.id.clone(),
                        code: code.to_string(),
                        tier: rule.tier,
                        message,
                    });
                }
            }
        }

        tracing::debug!(
            action_id = %action.action_id,
            action_type,
            tier = %tier,
            violations = violations.len(),
            "policy evaluated"
        );

        EvaluationTrace {
            verdict: PolicyVerdict {
                allowed: violations.is_empty(),
                tier,
                violations,
                policy_version: self.document.version.clone(),
            },
            steps,
        }
    }
}

impl Default for PolicyEngine {
    fn default() -> Self {
        Self::new(PolicyDocument::baseline())
    }
}

fn step(rule: &Rule, outcome: String) -> EvaluationStep {
    EvaluationStep {
        rule_id: rule.id.clone(),
        check: rule.check.kind().to_string(),
        outcome,
    }
}

/// Returns `(code, message)` when the check fires.
fn check_rule(check: &RuleCheck, action: &ProposedAction) -> Option<(&'static str, String)> {
    match check {
        RuleCheck::Threshold {
            param,
            max,
            required,
        } => match action.param(param) {
            None if *required => Some((
                "missing_parameter",
                format!("required parameter '{}' is missing", param),
            )),
            None => None,
            Some(value) => match value.as_f64() {
                // NaN never compares greater, so it has to be rejected explicitly.
                Some(n) if n.is_nan() => Some((
                    "non_numeric_parameter",
                    format!("'{}' is not a number", param),
                )),
                Some(n) if n > *max => Some((
                    "threshold_exceeded",
                    format!("'{}' = {} exceeds limit {}", param, n, max),
                )),
                Some(_) => None,
                None => Some((
                    "non_numeric_parameter",
                    format!("'{}' is not a number", param),
                )),
            },
        },

        RuleCheck::RestrictedSet { param, entries } => {
            let value = action.param(param)?;
            value.texts().into_iter().find_map(|text| {
                entries
                    .iter()
                    .find(|entry| matches_entity_pattern(entry, text))
                    .map(|entry| {
                        (
                            "restricted_entity",
                            format!("'{}' = '{}' matches restricted entry '{}'", param, text, entry),
                        )
                    })
            })
        }

        RuleCheck::PermittedSet { param, entries } => {
            let value = action.param(param)?;
            value.texts().into_iter().find_map(|text| {
                let permitted = entries.iter().any(|entry| matches_entity_pattern(entry, text));
                (!permitted).then(|| {
                    (
                        "entity_not_permitted",
                        format!("'{}' = '{}' is not on the permitted list", param, text),
                    )
                })
            })
        }

        RuleCheck::ActionTypes { allow, deny } => {
            let action_type = action.action_type.as_str();
            if deny.iter().any(|t| t == action_type) {
                return Some((
                    "action_type_denied",
                    format!("action type '{}' is denied", action_type),
                ));
            }
            match allow {
                Some(allowed) if !allowed.iter().any(|t| t == action_type) => Some((
                    "action_type_not_allowed",
                    format!("action type '{}' is not on the allow list", action_type),
                )),
                _ => None,
            }
        }
    }
}

/// Case-insensitive glob match. Invalid patterns never match.
fn matches_entity_pattern(pattern: &str, value: &str) -> bool {
    let options = MatchOptions {
        case_sensitive: false,
        require_literal_separator: false,
        require_literal_leading_dot: false,
    };
    match Pattern::new(pattern) {
        Ok(p) => p.matches_with(value, options),
        Err(_) => false,
    }
}

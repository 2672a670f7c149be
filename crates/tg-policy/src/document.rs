// document.rs — Versioned, declarative policy documents.
//
// A policy document is a YAML file:
//
//   version: "2026.10"
//   rules:
//     - id: large-order
//       applies_to: [place_order]
//       tier: high
//       effect: elevate
//       check: { kind: threshold, param: amount, max: 50000 }
//
// The engine never hardcodes business limits; everything it enforces comes
// from a document like this one.

use std::collections::HashSet;
use std::fmt;
use std::path::Path;

use glob::Pattern;
use serde::{Deserialize, Serialize};

use crate::error::PolicyError;

/// Risk tier assigned by the policy. Ordered: `Low < Medium < High < Critical`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum RiskTier {
    #[default]
    Low,
    Medium,
    High,
    Critical,
}

impl RiskTier {
    /// HIGH and CRITICAL actions must pass consensus.
    pub fn requires_consensus(self) -> bool {
        self >= RiskTier::High
    }
}

impl fmt::Display for RiskTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RiskTier::Low => "LOW",
            RiskTier::Medium => "MEDIUM",
            RiskTier::High => "HIGH",
            RiskTier::Critical => "CRITICAL",
        };
        f.write_str(s)
    }
}

/// What happens when a rule's check fires.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleEffect {
    /// Record a violation: the action is denied.
    #[default]
    Deny,
    /// Raise the verdict's tier to the rule's tier without denying.
    Elevate,
}

/// The condition a rule tests. Tagged by `kind` in YAML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleCheck {
    /// Fires when the numeric parameter exceeds `max`.
    ///
    /// A present but non-numeric value fires too. A missing parameter fires
    /// only when `required` is set.
    Threshold {
        param: String,
        max: f64,
        #[serde(default)]
        required: bool,
    },

    /// Fires when any text value of `param` matches one of the glob `entries`.
    RestrictedSet { param: String, entries: Vec<String> },

    /// Fires when a present text value of `param` matches none of the glob
    /// `entries`.
    PermittedSet { param: String, entries: Vec<String> },

    /// Fires when the action type is on `deny`, or when `allow` is given and
    /// the action type is not on it.
    ActionTypes {
        #[serde(default)]
        allow: Option<Vec<String>>,
        #[serde(default)]
        deny: Vec<String>,
    },
}

impl RuleCheck {
    /// Short name used in traces and violation codes.
    pub fn kind(&self) -> &'static str {
        match self {
            RuleCheck::Threshold { .. } => "threshold",
            RuleCheck::RestrictedSet { .. } => "restricted_set",
            RuleCheck::PermittedSet { .. } => "permitted_set",
            RuleCheck::ActionTypes { .. } => "action_types",
        }
    }
}

/// A single declarative rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    /// Unique within the document; reported in violations.
    pub id: String,

    #[serde(default)]
    pub description: String,

    /// Action types this rule applies to. Empty means every action type.
    #[serde(default)]
    pub applies_to: Vec<String>,

    #[serde(default)]
    pub tier: RiskTier,

    #[serde(default)]
    pub effect: RuleEffect,

    pub check: RuleCheck,
}

impl Rule {
    pub fn applies_to_type(&self, action_type: &str) -> bool {
        self.applies_to.is_empty() || self.applies_to.iter().any(|t| t == action_type)
    }
}

/// A versioned rule set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyDocument {
    pub version: String,

    #[serde(default)]
    pub rules: Vec<Rule>,
}

impl PolicyDocument {
    /// Parse and validate a YAML document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, PolicyError> {
        let doc: PolicyDocument = serde_yaml::from_str(yaml)?;
        doc.validate()?;
        Ok(doc)
    }

    /// Load and validate a YAML document from disk.
    pub fn load(path: &Path) -> Result<Self, PolicyError> {
        let content = std::fs::read_to_string(path).map_err(|source| PolicyError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&content)
    }

    pub fn to_yaml_string(&self) -> Result<String, PolicyError> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Structural checks that YAML parsing alone cannot express.
    pub fn validate(&self) -> Result<(), PolicyError> {
        let mut seen = HashSet::new();
        for rule in &self.rules {
            if !seen.insert(rule.id.as_str()) {
                return Err(PolicyError::DuplicateRule {
                    rule_id: rule.id.clone(),
                });
            }

            match &rule.check {
                RuleCheck::Threshold { param, max, .. } => {
                    if param.is_empty() || !max.is_finite() {
                        return Err(PolicyError::InvalidRule {
                            rule_id: rule.id.clone(),
                            reason: "threshold needs a parameter and a finite max".to_string(),
                        });
                    }
                }
                RuleCheck::RestrictedSet { entries, .. } | RuleCheck::PermittedSet { entries, .. } => {
                    for entry in entries {
                        Pattern::new(entry).map_err(|e| PolicyError::InvalidPattern {
                            pattern: entry.clone(),
                            reason: e.to_string(),
                        })?;
                    }
                }
                RuleCheck::ActionTypes { allow, deny } => {
                    if allow.is_none() && deny.is_empty() {
                        return Err(PolicyError::InvalidRule {
                            rule_id: rule.id.clone(),
                            reason: "action_types rule needs an allow or deny list".to_string(),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    /// The stock trading-desk policy:
    ///
    /// - orders above 50k are HIGH (consensus required)
    /// - orders above 1M are CRITICAL (consensus required)
    /// - sanctioned tickers are a CRITICAL violation
    /// - exporting data to an external destination is denied
    pub fn baseline() -> Self {
        Self {
            version: "baseline-1".to_string(),
            rules: vec![
                Rule {
                    id: "significant-order".to_string(),
                    description: "Significant trade volume".to_string(),
                    applies_to: vec!["place_order".to_string()],
                    tier: RiskTier::High,
                    effect: RuleEffect::Elevate,
                    check: RuleCheck::Threshold {
                        param: "amount".to_string(),
                        max: 50_000.0,
                        required: false,
                    },
                },
                Rule {
                    id: "high-value-order".to_string(),
                    description: "High value trade".to_string(),
                    applies_to: vec!["place_order".to_string()],
                    tier: RiskTier::Critical,
                    effect: RuleEffect::Elevate,
                    check: RuleCheck::Threshold {
                        param: "amount".to_string(),
                        max: 1_000_000.0,
                        required: false,
                    },
                },
                Rule {
                    id: "sanctioned-entity".to_string(),
                    description: "Counterparty or ticker is sanctioned".to_string(),
                    applies_to: vec!["place_order".to_string()],
                    tier: RiskTier::Critical,
                    effect: RuleEffect::Deny,
                    check: RuleCheck::RestrictedSet {
                        param: "ticker".to_string(),
                        entries: vec!["SANCTIONED-*".to_string()],
                    },
                },
                Rule {
                    id: "external-export".to_string(),
                    description: "Data exfiltration to external destinations".to_string(),
                    applies_to: vec!["export_data".to_string()],
                    tier: RiskTier::High,
                    effect: RuleEffect::Deny,
                    check: RuleCheck::RestrictedSet {
                        param: "destination".to_string(),
                        entries: vec!["external_*".to_string(), "*@*".to_string()],
                    },
                },
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"
version: "2026.10"
rules:
  - id: large-order
    applies_to: [place_order]
    tier: high
    effect: elevate
    check: { kind: threshold, param: amount, max: 50000 }
  - id: no-shell
    tier: critical
    check:
      kind: action_types
      deny: [shell_exec]
  - id: blocked-hosts
    applies_to: [network_fetch]
    tier: medium
    check:
      kind: restricted_set
      param: url
      entries: ["*.onion/*", "http://169.254.169.254/*"]
"#;

    #[test]
    fn parses_yaml_with_defaults() {
        let doc = PolicyDocument::from_yaml_str(DOC).unwrap();
        assert_eq!(doc.version, "2026.10");
        assert_eq!(doc.rules.len(), 3);
        assert_eq!(doc.rules[0].effect, RuleEffect::Elevate);
        assert_eq!(doc.rules[1].effect, RuleEffect::Deny);
        assert!(doc.rules[1].applies_to.is_empty());
        assert_eq!(
            doc.rules[0].check,
            RuleCheck::Threshold {
                param: "amount".to_string(),
                max: 50_000.0,
                required: false
            }
        );
    }

    #[test]
    fn duplicate_rule_ids_are_rejected() {
        let yaml = r#"
version: "1"
rules:
  - id: a
    check: { kind: action_types, deny: [x] }
  - id: a
    check: { kind: action_types, deny: [y] }
"#;
        assert!(matches!(
            PolicyDocument::from_yaml_str(yaml),
            Err(PolicyError::DuplicateRule { .. })
        ));
    }

    #[test]
    fn malformed_glob_is_rejected() {
        let yaml = r#"
version: "1"
rules:
  - id: bad
    check: { kind: restricted_set, param: ticker, entries: ["[unclosed"] }
"#;
        assert!(matches!(
            PolicyDocument::from_yaml_str(yaml),
            Err(PolicyError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn empty_action_types_rule_is_rejected() {
        let yaml = r#"
version: "1"
rules:
  - id: nothing
    check: { kind: action_types }
"#;
        assert!(matches!(
            PolicyDocument::from_yaml_str(yaml),
            Err(PolicyError::InvalidRule { .. })
        ));
    }

    #[test]
    fn tiers_are_ordered() {
        assert!(RiskTier::Critical > RiskTier::High);
        assert!(RiskTier::High.requires_consensus());
        assert!(!RiskTier::Medium.requires_consensus());
    }

    #[test]
    fn baseline_round_trips_through_yaml() {
        let baseline = PolicyDocument::baseline();
        baseline.validate().unwrap();
        let yaml = baseline.to_yaml_string().unwrap();
        let parsed = PolicyDocument::from_yaml_str(&yaml).unwrap();
        assert_eq!(parsed, baseline);
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("policy.yaml");
        std::fs::write(&path, DOC).unwrap();
        let doc = PolicyDocument::load(&path).unwrap();
        assert_eq!(doc.rules[2].id, "blocked-hosts");

        let missing = PolicyDocument::load(&dir.path().join("nope.yaml"));
        assert!(matches!(missing, Err(PolicyError::Read { .. })));
    }
}

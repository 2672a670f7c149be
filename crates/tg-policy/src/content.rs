// content.rs — Pattern scan over an action's text content.
//
// Catches known unsafe constructs (shell invocation markers, prompt
// injection phrases, secret file paths) and tool names known to be used for
// social engineering. Misses are expected; this is one layer among several.

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use tg_action::ProposedAction;

use crate::error::PolicyError;

/// A named regular expression. Matching is case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentPattern {
    pub id: String,
    pub pattern: String,
}

impl ContentPattern {
    pub fn new(id: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            pattern: pattern.into(),
        }
    }

    /// The stock pattern set.
    pub fn defaults() -> Vec<ContentPattern> {
        vec![
            Self::new("prompt-injection", r"ignore\s+(all\s+)?previous\s+instructions"),
            Self::new("system-override", r"system_override"),
            Self::new("sql-drop", r"\bdrop\s+table\b"),
            Self::new("internal-logs", r"read_internal_logs"),
            Self::new("secret-path", r"/etc/(secrets\.txt|shadow|passwd)"),
            Self::new("shell-rm", r"\brm\s+-rf\b"),
            Self::new("os-system", r"\bos\.system\s*\("),
            Self::new("subprocess", r"\bsubprocess\.(run|call|popen|check_output)\b"),
            Self::new("pipe-to-shell", r"\b(curl|wget)\b[^|\n]*\|\s*(ba|z)?sh\b"),
        ]
    }
}

/// Tool names that impersonate maintenance or diagnostics.
pub fn default_deceptive_tools() -> Vec<String> {
    ["debug_system_check", "read_internal_logs", "read_file"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Outcome of a content scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ScanResult {
    Clean,
    Flagged {
        /// The pattern ID, or `deceptive_tool`.
        pattern_id: String,
        /// Where it matched: a parameter name, or `tool`.
        field: String,
        reason: String,
    },
}

impl ScanResult {
    pub fn is_clean(&self) -> bool {
        matches!(self, ScanResult::Clean)
    }
}

/// Scans action parameters and tool names.
#[derive(Debug, Clone)]
pub struct ContentVerifier {
    patterns: Vec<(String, Regex)>,
    deceptive_tools: Vec<String>,
}

impl ContentVerifier {
    /// Compile a verifier. Fails on the first invalid pattern.
    pub fn new(
        patterns: &[ContentPattern],
        deceptive_tools: Vec<String>,
    ) -> Result<Self, PolicyError> {
        let compiled = patterns
            .iter()
            .map(|p| {
                RegexBuilder::new(&p.pattern)
                    .case_insensitive(true)
                    .build()
                    .map(|re| (p.id.clone(), re))
                    .map_err(|source| PolicyError::InvalidContentPattern {
                        id: p.id.clone(),
                        source,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            patterns: compiled,
            deceptive_tools: deceptive_tools
                .into_iter()
                .map(|t| t.to_lowercase())
                .collect(),
        })
    }

    /// Verifier with the stock patterns and deceptive tool list.
    pub fn builtin() -> Result<Self, PolicyError> {
        Self::new(&ContentPattern::defaults(), default_deceptive_tools())
    }

    pub fn pattern_count(&self) -> usize {
        self.patterns.len()
    }

    /// Scan one action. Returns the first hit.
    pub fn scan(&self, action: &ProposedAction) -> ScanResult {
        for name in [action.tool.as_str(), action.action_type.as_str()] {
            let lowered = name.to_lowercase();
            if self.deceptive_tools.iter().any(|t| *t == lowered) {
                return ScanResult::Flagged {
                    pattern_id: "deceptive_tool".to_string(),
                    field: "tool".to_string(),
                    reason: format!("tool '{}' is on the deceptive tool list", name),
                };
            }
        }

        for (field, text) in action.text_fields() {
            if let Some((id, _)) = self.patterns.iter().find(|(_, re)| re.is_match(text)) {
                tracing::debug!(action_id = %action.action_id, pattern = %id, field, "content flagged");
                return ScanResult::Flagged {
                    pattern_id: id.clone(),
                    field: field.to_string(),
                    reason: format!("parameter '{}' matches unsafe pattern '{}'", field, id),
                };
            }
        }

        ScanResult::Clean
    }
}

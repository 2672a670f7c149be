// error.rs — Error types for the policy subsystem.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while loading policies or content patterns.
#[derive(Debug, Error)]
pub enum PolicyError {
    /// The policy document could not be read from disk.
    #[error("failed to read policy document {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The policy document is not valid YAML for the rule schema.
    #[error("failed to parse policy document: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// Two rules share the same identifier.
    #[error("duplicate rule id '{rule_id}'")]
    DuplicateRule { rule_id: String },

    /// A rule is structurally valid YAML but semantically unusable.
    #[error("invalid rule '{rule_id}': {reason}")]
    InvalidRule { rule_id: String, reason: String },

    /// A restricted-set entry is malformed and cannot be parsed as a glob.
    #[error("invalid entity pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// A content pattern is not a valid regular expression.
    #[error("invalid content pattern '{id}': {source}")]
    InvalidContentPattern {
        id: String,
        source: regex::Error,
    },
}

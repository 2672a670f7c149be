//! # tg-policy
//!
//! Declarative policy evaluation and content verification for Tollgate.
//!
//! A [`PolicyDocument`] is a versioned list of rules loaded from YAML. The
//! [`PolicyEngine`] interprets it against a proposed action and returns a
//! [`PolicyVerdict`]: allowed or denied, the highest risk tier any rule
//! assigned, and every violation found (not just the first).
//!
//! The [`ContentVerifier`] is a separate, pattern-based scan over the text
//! content of an action's parameters and its tool name.
//!
//! ## Key invariants
//!
//! - **Conjunctive**: any single `deny` violation denies the action; rule
//!   order never changes the allowed/denied result.
//! - **Fail-closed parameters**: a threshold parameter that is present but
//!   not numeric is a violation, not a pass.
//! - **Invalid patterns never match** a restricted set, and are rejected
//!   when a document is validated.

pub mod content;
pub mod document;
pub mod engine;
pub mod error;

pub use content::{default_deceptive_tools, ContentPattern, ContentVerifier, ScanResult};
pub use document::{PolicyDocument, RiskTier, Rule, RuleCheck, RuleEffect};
pub use engine::{EvaluationStep, EvaluationTrace, PolicyEngine, PolicyVerdict, Violation};
pub use error::PolicyError;

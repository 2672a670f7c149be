// error.rs — Reasons a credential is denied or refused.

use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CredentialError {
    /// Only an ALLOW decision can be exchanged for a credential.
    #[error("credential denied: decision is {disposition}, not ALLOW")]
    NotAllowed { disposition: String },

    #[error("credential denied: session '{session_id}' is quarantined")]
    SessionQuarantined { session_id: String },

    /// An unexpired, unused credential already exists for this action.
    #[error("credential already outstanding for action {action_id}")]
    AlreadyOutstanding { action_id: Uuid },

    /// The credential for this action was used; it is never issued again.
    #[error("credential for action {action_id} was already used")]
    AlreadyConsumed { action_id: Uuid },

    #[error("credential for action {action_id} was revoked")]
    Revoked { action_id: Uuid },

    /// The upstream identity exchange failed.
    #[error("identity exchange unavailable: {0}")]
    ExchangeUnavailable(String),

    #[error("credential ttl must be between 1 and 59 seconds, got {secs}")]
    InvalidTtl { secs: u64 },

    #[error("credential retention must cover the ttl and be at most 7 days, got {secs}s")]
    InvalidRetention { secs: u64 },

    /// The action was submitted longer ago than any credential record is kept.
    #[error("action {action_id} is too old to authorize")]
    StaleAction { action_id: Uuid },

    #[error("unknown credential token")]
    UnknownToken,

    #[error("credential expired")]
    Expired,

    /// The token was presented for a different tool or action than it was issued for.
    #[error("credential scope mismatch: {reason}")]
    ScopeMismatch { reason: String },
}

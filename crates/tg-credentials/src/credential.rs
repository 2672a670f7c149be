// credential.rs — The credential handed to the caller after an ALLOW.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Exactly what a credential authorizes: one tool, one action instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialScope {
    pub tool: String,
    pub action_id: Uuid,
    /// Fingerprint of the evaluated action; a modified action does not match.
    pub action_fingerprint: String,
}

/// Lifecycle of a ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialState {
    Outstanding,
    Consumed,
    Revoked,
    Expired,
}

/// A short-lived, single-use execution credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub credential_id: Uuid,
    /// Bearer token. Only the caller ever sees it; the broker keeps a hash.
    pub token: String,
    pub scope: CredentialScope,
    pub session_id: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub single_use: bool,
    pub issuer: String,
}

impl Credential {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn ttl_secs(&self) -> i64 {
        (self.expires_at - self.issued_at).num_seconds()
    }
}

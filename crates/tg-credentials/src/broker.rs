// broker.rs — Issues and redeems just-in-time credentials.
//
// Ledger invariant: at most one entry per action instance. The entry moves
// Outstanding → Consumed | Revoked | Expired. Consumed and Revoked entries
// stay as tombstones for `retention_secs` past expiry; expired outstanding
// entries may be replaced and are purged at expiry. Actions submitted more
// than `retention_secs` ago are refused outright, so a purged tombstone can
// never let the same action be authorized twice.
//
// The session gate is consulted while the ledger lock is held. Quarantine
// is set before `revoke_session` takes the same lock, so a credential is
// either revoked by it or never issued.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tg_action::{Decision, Disposition, ProposedAction};
use uuid::Uuid;

use crate::credential::{Credential, CredentialScope, CredentialState};
use crate::error::CredentialError;
use crate::exchange::{IdentityExchange, TokenRequest};

/// Tells the broker whether a session may hold credentials.
pub trait SessionGate: Send + Sync {
    fn is_quarantined(&self, session_id: &str) -> bool;
}

/// A gate that never quarantines. For standalone use of the broker.
#[derive(Debug, Default, Clone, Copy)]
pub struct OpenGate;

impl SessionGate for OpenGate {
    fn is_quarantined(&self, _session_id: &str) -> bool {
        false
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialConfig {
    /// Lifetime in seconds, 1..=59.
    pub ttl_secs: u64,
    /// How long consumed and revoked entries outlive their expiry. Also the
    /// oldest action submission a credential is issued for.
    pub retention_secs: u64,
    /// The privileged identity credentials are exchanged for.
    pub issuer: String,
}

impl Default for CredentialConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 30,
            retention_secs: 600,
            issuer: "tollgate-executor".to_string(),
        }
    }
}

impl CredentialConfig {
    pub fn validate(&self) -> Result<(), CredentialError> {
        if self.ttl_secs == 0 || self.ttl_secs >= 60 {
            return Err(CredentialError::InvalidTtl {
                secs: self.ttl_secs,
            });
        }
        if self.retention_secs < self.ttl_secs || self.retention_secs > MAX_RETENTION_SECS {
            return Err(CredentialError::InvalidRetention {
                secs: self.retention_secs,
            });
        }
        Ok(())
    }

    fn ttl(&self) -> Duration {
        Duration::seconds(self.ttl_secs as i64)
    }

    fn retention(&self) -> Duration {
        Duration::seconds(self.retention_secs as i64)
    }
}

const MAX_RETENTION_SECS: u64 = 7 * 24 * 3600;

#[derive(Debug, Clone)]
struct LedgerEntry {
    credential_id: Uuid,
    session_id: String,
    token_hash: String,
    scope: CredentialScope,
    expires_at: DateTime<Utc>,
    state: CredentialState,
}

/// Issues credentials after ALLOW and validates them at execution time.
pub struct CredentialBroker {
    config: CredentialConfig,
    exchange: Arc<dyn IdentityExchange>,
    gate: Arc<dyn SessionGate>,
    ledger: Mutex<HashMap<Uuid, LedgerEntry>>,
}

impl CredentialBroker {
    pub fn new(
        config: CredentialConfig,
        exchange: Arc<dyn IdentityExchange>,
        gate: Arc<dyn SessionGate>,
    ) -> Result<Self, CredentialError> {
        config.validate()?;
        Ok(Self {
            config,
            exchange,
            gate,
            ledger: Mutex::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &CredentialConfig {
        &self.config
    }

    fn ledger(&self) -> MutexGuard<'_, HashMap<Uuid, LedgerEntry>> {
        // Entries are replaced whole; a poisoned lock holds no torn state.
        self.ledger.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Issue a credential for `action` if `decision` is ALLOW.
    pub fn issue(
        &self,
        action: &ProposedAction,
        decision: &Decision,
    ) -> Result<Credential, CredentialError> {
        self.issue_at(action, decision, Utc::now())
    }

    pub fn issue_at(
        &self,
        action: &ProposedAction,
        decision: &Decision,
        now: DateTime<Utc>,
    ) -> Result<Credential, CredentialError> {
        if decision.disposition != Disposition::Allow {
            return Err(CredentialError::NotAllowed {
                disposition: decision.disposition.to_string(),
            });
        }

        if now - action.submitted_at > self.config.retention() {
            return Err(CredentialError::StaleAction {
                action_id: action.action_id,
            });
        }

        let mut ledger = self.ledger();

        if self.gate.is_quarantined(&action.session_id) {
            return Err(CredentialError::SessionQuarantined {
                session_id: action.session_id.clone(),
            });
        }

        if let Some(existing) = ledger.get(&action.action_id) {
            match existing.state {
                CredentialState::Outstanding if now < existing.expires_at => {
                    return Err(CredentialError::AlreadyOutstanding {
                        action_id: action.action_id,
                    })
                }
                CredentialState::Consumed => {
                    return Err(CredentialError::AlreadyConsumed {
                        action_id: action.action_id,
                    })
                }
                CredentialState::Revoked => {
                    return Err(CredentialError::Revoked {
                        action_id: action.action_id,
                    })
                }
                CredentialState::Outstanding | CredentialState::Expired => {}
            }
        }

        let request = TokenRequest {
            principal: self.config.issuer.clone(),
            tool: action.tool.clone(),
            action_id: action.action_id,
            ttl_secs: self.config.ttl_secs,
        };
        let token = self.exchange.exchange(&request).map_err(|e| match e {
            CredentialError::ExchangeUnavailable(_) => e,
            other => CredentialError::ExchangeUnavailable(other.to_string()),
        })?;

        let scope = CredentialScope {
            tool: action.tool.clone(),
            action_id: action.action_id,
            action_fingerprint: action.fingerprint(),
        };
        let credential = Credential {
            credential_id: Uuid::new_v4(),
            token: token.token,
            scope: scope.clone(),
            session_id: action.session_id.clone(),
            issued_at: now,
            expires_at: now + self.config.ttl(),
            single_use: true,
            issuer: self.config.issuer.clone(),
        };

        ledger.insert(
            action.action_id,
            LedgerEntry {
                credential_id: credential.credential_id,
                session_id: credential.session_id.clone(),
                token_hash: hash_token(&credential.token),
                scope,
                expires_at: credential.expires_at,
                state: CredentialState::Outstanding,
            },
        );

        tracing::info!(
            credential_id = %credential.credential_id,
            action_id = %action.action_id,
            session_id = %action.session_id,
            tool = %action.tool,
            ttl_secs = self.config.ttl_secs,
            "credential issued"
        );
        Ok(credential)
    }

    /// Present a token to execute `action`. Consumes the credential.
    pub fn redeem(&self, token: &str, action: &ProposedAction) -> Result<Uuid, CredentialError> {
        self.redeem_at(token, action, Utc::now())
    }

    pub fn redeem_at(
        &self,
        token: &str,
        action: &ProposedAction,
        now: DateTime<Utc>,
    ) -> Result<Uuid, CredentialError> {
        let token_hash = hash_token(token);
        let mut ledger = self.ledger();

        let entry = ledger
            .values_mut()
            .find(|e| e.token_hash == token_hash)
            .ok_or(CredentialError::UnknownToken)?;

        match entry.state {
            CredentialState::Outstanding => {}
            CredentialState::Consumed => {
                return Err(CredentialError::AlreadyConsumed {
                    action_id: entry.scope.action_id,
                })
            }
            CredentialState::Revoked => {
                return Err(CredentialError::Revoked {
                    action_id: entry.scope.action_id,
                })
            }
            CredentialState::Expired => return Err(CredentialError::Expired),
        }

        if now >= entry.expires_at {
            entry.state = CredentialState::Expired;
            return Err(CredentialError::Expired);
        }

        // A mismatched presentation does not burn the credential.
        if entry.scope.action_id != action.action_id {
            return Err(CredentialError::ScopeMismatch {
                reason: format!(
                    "issued for action {}, presented for {}",
                    entry.scope.action_id, action.action_id
                ),
            });
        }
        if entry.scope.tool != action.tool {
            return Err(CredentialError::ScopeMismatch {
                reason: format!(
                    "issued for tool '{}', presented for '{}'",
                    entry.scope.tool, action.tool
                ),
            });
        }
        if entry.scope.action_fingerprint != action.fingerprint() {
            return Err(CredentialError::ScopeMismatch {
                reason: "action was modified after evaluation".to_string(),
            });
        }

        if self.gate.is_quarantined(&entry.session_id) {
            entry.state = CredentialState::Revoked;
            return Err(CredentialError::SessionQuarantined {
                session_id: entry.session_id.clone(),
            });
        }

        entry.state = CredentialState::Consumed;
        tracing::info!(
            credential_id = %entry.credential_id,
            action_id = %action.action_id,
            "credential redeemed"
        );
        Ok(entry.credential_id)
    }

    /// Revoke every outstanding credential of a session. Returns how many.
    pub fn revoke_session(&self, session_id: &str) -> usize {
        let mut revoked = 0;
        for entry in self.ledger().values_mut() {
            if entry.session_id == session_id && entry.state == CredentialState::Outstanding {
                entry.state = CredentialState::Revoked;
                revoked += 1;
            }
        }
        if revoked > 0 {
            tracing::warn!(session_id, revoked, "session credentials revoked");
        }
        revoked
    }

    /// Revoke a single action's credential, if outstanding.
    pub fn revoke_action(&self, action_id: Uuid) -> bool {
        match self.ledger().get_mut(&action_id) {
            Some(entry) if entry.state == CredentialState::Outstanding => {
                entry.state = CredentialState::Revoked;
                true
            }
            _ => false,
        }
    }

    /// Drop outstanding and expired entries whose TTL has passed, and
    /// consumed or revoked tombstones older than the retention period.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let retention = self.config.retention();
        let mut ledger = self.ledger();
        let before = ledger.len();
        ledger.retain(|_, e| match e.state {
            CredentialState::Outstanding | CredentialState::Expired => now < e.expires_at,
            CredentialState::Consumed | CredentialState::Revoked => {
                now < e.expires_at + retention
            }
        });
        let purged = before - ledger.len();
        if purged > 0 {
            tracing::debug!(purged, "expired credentials purged");
        }
        purged
    }

    /// Ledger entries of any state.
    pub fn len(&self) -> usize {
        self.ledger().len()
    }

    pub fn is_empty(&self) -> bool {
        self.ledger().is_empty()
    }

    pub fn state_of(&self, action_id: Uuid) -> Option<CredentialState> {
        self.ledger().get(&action_id).map(|e| e.state)
    }

    /// Outstanding, unexpired credentials for a session.
    pub fn outstanding(&self, session_id: &str, now: DateTime<Utc>) -> usize {
        self.ledger()
            .values()
            .filter(|e| {
                e.session_id == session_id
                    && e.state == CredentialState::Outstanding
                    && now < e.expires_at
            })
            .count()
    }
}

fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::{ExchangedToken, LocalTokenExchange};
    use std::collections::HashSet;
    use tg_action::{ActionType, Stage};

    struct QuarantineSet(Mutex<HashSet<String>>);

    impl SessionGate for QuarantineSet {
        fn is_quarantined(&self, session_id: &str) -> bool {
            self.0.lock().unwrap().contains(session_id)
        }
    }

    struct DownExchange;

    impl IdentityExchange for DownExchange {
        fn exchange(&self, _request: &TokenRequest) -> Result<ExchangedToken, CredentialError> {
            Err(CredentialError::ExchangeUnavailable("iam endpoint timed out".to_string()))
        }
    }

    fn broker() -> CredentialBroker {
        CredentialBroker::new(
            CredentialConfig::default(),
            Arc::new(LocalTokenExchange),
            Arc::new(OpenGate),
        )
        .unwrap()
    }

    fn order() -> ProposedAction {
        ProposedAction::new("s1", ActionType::PlaceOrder)
            .with_tool("broker")
            .with_param("amount", 100.0)
    }

    #[test]
    fn only_allow_is_exchanged() {
        let b = broker();
        let err = b
            .issue(&order(), &Decision::escalate(Stage::Barrier, "trend"))
            .unwrap_err();
        assert!(matches!(err, CredentialError::NotAllowed { .. }));
    }

    #[test]
    fn issued_credential_is_scoped_and_short_lived() {
        let action = order();
        let cred = broker().issue(&action, &Decision::allow()).unwrap();
        assert_eq!(cred.scope.action_id, action.action_id);
        assert_eq!(cred.scope.tool, "broker");
        assert_eq!(cred.scope.action_fingerprint, action.fingerprint());
        assert_eq!(cred.ttl_secs(), 30);
        assert!(cred.single_use);
    }

    #[test]
    fn credential_cannot_authorize_another_instance() {
        let b = broker();
        let a1 = order();
        let a2 = order();
        let cred = b.issue(&a1, &Decision::allow()).unwrap();

        assert!(matches!(
            b.redeem(&cred.token, &a2),
            Err(CredentialError::ScopeMismatch { .. })
        ));
        // The failed presentation did not consume it.
        assert!(b.redeem(&cred.token, &a1).is_ok());
    }

    #[test]
    fn modified_action_does_not_match() {
        let b = broker();
        let action = order();
        let cred = b.issue(&action, &Decision::allow()).unwrap();
        let tampered = action.clone().with_param("amount", 1_000_000.0);
        assert!(matches!(
            b.redeem(&cred.token, &tampered),
            Err(CredentialError::ScopeMismatch { .. })
        ));
    }

    #[test]
    fn single_use_and_never_reissued() {
        let b = broker();
        let action = order();
        let cred = b.issue(&action, &Decision::allow()).unwrap();
        b.redeem(&cred.token, &action).unwrap();

        assert!(matches!(
            b.redeem(&cred.token, &action),
            Err(CredentialError::AlreadyConsumed { .. })
        ));
        assert!(matches!(
            b.issue(&action, &Decision::allow()),
            Err(CredentialError::AlreadyConsumed { .. })
        ));
    }

    #[test]
    fn one_outstanding_credential_per_action() {
        let b = broker();
        let action = order();
        b.issue(&action, &Decision::allow()).unwrap();
        assert!(matches!(
            b.issue(&action, &Decision::allow()),
            Err(CredentialError::AlreadyOutstanding { .. })
        ));
    }

    #[test]
    fn concurrent_issue_yields_exactly_one_credential() {
        let b = Arc::new(broker());
        let action = Arc::new(order());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let b = Arc::clone(&b);
                let action = Arc::clone(&action);
                std::thread::spawn(move || b.issue(&action, &Decision::allow()).is_ok())
            })
            .collect();
        let issued = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(issued, 1);
    }

    #[test]
    fn expiry_invalidates_and_allows_reissue() {
        let b = broker();
        let action = order();
        let t0 = Utc::now();
        let cred = b.issue_at(&action, &Decision::allow(), t0).unwrap();

        let later = t0 + Duration::seconds(31);
        assert_eq!(
            b.redeem_at(&cred.token, &action, later),
            Err(CredentialError::Expired)
        );
        let fresh = b.issue_at(&action, &Decision::allow(), later).unwrap();
        assert_ne!(fresh.credential_id, cred.credential_id);
        assert!(b.redeem_at(&fresh.token, &action, later).is_ok());
    }

    #[test]
    fn exchange_failure_denies() {
        let b = CredentialBroker::new(
            CredentialConfig::default(),
            Arc::new(DownExchange),
            Arc::new(OpenGate),
        )
        .unwrap();
        let action = order();
        assert!(matches!(
            b.issue(&action, &Decision::allow()),
            Err(CredentialError::ExchangeUnavailable(_))
        ));
        assert_eq!(b.state_of(action.action_id), None);
    }

    #[test]
    fn quarantined_session_gets_nothing_and_loses_outstanding() {
        let gate = Arc::new(QuarantineSet(Mutex::new(HashSet::new())));
        let b = CredentialBroker::new(
            CredentialConfig::default(),
            Arc::new(LocalTokenExchange),
            gate.clone(),
        )
        .unwrap();

        let first = order();
        let cred = b.issue(&first, &Decision::allow()).unwrap();
        gate.0.lock().unwrap().insert("s1".to_string());
        assert_eq!(b.revoke_session("s1"), 1);

        assert!(matches!(
            b.redeem(&cred.token, &first),
            Err(CredentialError::Revoked { .. })
        ));
        assert!(matches!(
            b.issue(&order(), &Decision::allow()),
            Err(CredentialError::SessionQuarantined { .. })
        ));
    }

    #[test]
    fn purge_keeps_tombstones_within_retention() {
        let b = broker();
        let t0 = Utc::now();
        let used = order();
        let stale = order();
        let cred = b.issue_at(&used, &Decision::allow(), t0).unwrap();
        b.redeem_at(&cred.token, &used, t0).unwrap();
        b.issue_at(&stale, &Decision::allow(), t0).unwrap();

        assert_eq!(b.purge_expired(t0 + Duration::seconds(120)), 1);
        assert_eq!(b.state_of(used.action_id), Some(CredentialState::Consumed));
        assert_eq!(b.state_of(stale.action_id), None);
    }

    #[test]
    fn ledger_shrinks_once_tombstones_age_out() {
        let b = broker();
        let t0 = Utc::now();
        let actions: Vec<_> = (0..1000).map(|_| order()).collect();
        for action in &actions {
            let cred = b.issue_at(action, &Decision::allow(), t0).unwrap();
            b.redeem_at(&cred.token, action, t0).unwrap();
        }
        assert_eq!(b.len(), 1000);

        assert_eq!(b.purge_expired(t0 + Duration::days(365)), 1000);
        assert!(b.is_empty());

        // The purged tombstones cannot be replaced: those actions are too old.
        assert!(matches!(
            b.issue_at(&actions[0], &Decision::allow(), t0 + Duration::days(365)),
            Err(CredentialError::StaleAction { .. })
        ));
    }

    #[test]
    fn ttl_is_bounded() {
        for secs in [0, 60] {
            let config = CredentialConfig {
                ttl_secs: secs,
                ..CredentialConfig::default()
            };
            assert!(matches!(
                CredentialBroker::new(config, Arc::new(LocalTokenExchange), Arc::new(OpenGate)),
                Err(CredentialError::InvalidTtl { .. })
            ));
        }
    }

    #[test]
    fn retention_must_cover_the_ttl() {
        let config = CredentialConfig {
            ttl_secs: 30,
            retention_secs: 10,
            ..CredentialConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(CredentialError::InvalidRetention { secs: 10 })
        ));
    }

    #[test]
    fn unknown_token_is_rejected() {
        assert_eq!(
            broker().redeem("tgc_forged", &order()),
            Err(CredentialError::UnknownToken)
        );
    }
}

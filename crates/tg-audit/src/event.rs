// event.rs — Audit event data model.
//
// One AuditEvent is written per governor decision, per control-state
// transition and per credential lifecycle step. The structured payload
// (decision, barrier snapshot, verdict, transition reason) lives in
// `metadata`; the sink does not interpret it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What kind of occurrence this event records.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    /// The governor produced a Decision for a proposed action.
    Decision,
    /// A session (or the global control state) changed mode.
    StateTransition,
    /// An operator released a quarantined session or the kill-switch.
    AdminRelease,
    /// The global kill-switch was engaged.
    KillSwitch,
    /// A scoped credential was issued after an ALLOW.
    CredentialIssued,
    /// A credential was presented and consumed.
    CredentialRedeemed,
    /// Outstanding credentials were revoked.
    CredentialRevoked,
}

/// A single audit event: one line in the JSONL audit log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: Uuid,

    pub timestamp: DateTime<Utc>,

    /// The agent session this event concerns ("*" for process-wide events).
    pub session_id: String,

    pub action: AuditAction,

    /// The proposed action this event concerns, if any.
    pub action_id: Option<Uuid>,

    /// SHA-256 fingerprint of the proposed action's canonical JSON.
    pub action_hash: Option<String>,

    /// Links this event to a parent event (e.g. a transition to its decision).
    pub parent_event_id: Option<Uuid>,

    /// Hash of the previous event in the log (for tamper detection).
    /// The first event in the log has this set to None.
    pub previous_hash: Option<String>,

    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl AuditEvent {
    /// Create a new audit event with the current timestamp and a random UUID.
    pub fn new(session_id: impl Into<String>, action: AuditAction) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            session_id: session_id.into(),
            action,
            action_id: None,
            action_hash: None,
            parent_event_id: None,
            previous_hash: None,
            metadata: serde_json::Value::Null,
        }
    }

    pub fn with_action_id(mut self, action_id: Uuid) -> Self {
        self.action_id = Some(action_id);
        self
    }

    pub fn with_action_hash(mut self, hash: impl Into<String>) -> Self {
        self.action_hash = Some(hash.into());
        self
    }

    pub fn with_parent(mut self, parent_id: Uuid) -> Self {
        self.parent_event_id = Some(parent_id);
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

// control.rs — Global and per-session control state machine.
//
// Session modes:
//
//   ACTIVE ──3 consecutive BLOCKs──▶ TRACKING
//     │                                 │
//     ├──barrier / consensus failure────┴──▶ MONITORING
//     │                                          │
//     └──CRITICAL violation──────────────────────┴──BLOCK──▶ QUARANTINED
//
// QUARANTINED is terminal until an operator calls `release`. The process-wide
// kill-switch is a separate global mode that blocks every session.
//
// All mutation happens under one mutex: each `apply` reads the session entry
// and transitions it in the same critical section, so two evaluations that
// both want to quarantine a session produce exactly one transition.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tg_credentials::SessionGate;
use uuid::Uuid;

use crate::config::ControlConfig;
use crate::error::ControlError;

/// Session ID used for process-wide transitions.
pub const GLOBAL_SESSION: &str = "*";

/// Transitions kept in memory for `history()`.
const HISTORY_LIMIT: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlMode {
    Active,
    /// Increased logging only.
    Tracking,
    /// Every action must pass consensus.
    Monitoring,
    /// Every action is blocked until released.
    Quarantined,
}

impl ControlMode {
    /// Legal automatic transitions. Leaving QUARANTINED is not one of them;
    /// only `ControlState::release` does that.
    pub fn can_transition_to(self, next: ControlMode) -> bool {
        matches!(
            (self, next),
            (ControlMode::Active, ControlMode::Tracking)
                | (ControlMode::Active, ControlMode::Monitoring)
                | (ControlMode::Tracking, ControlMode::Monitoring)
                | (ControlMode::Active, ControlMode::Quarantined)
                | (ControlMode::Tracking, ControlMode::Quarantined)
                | (ControlMode::Monitoring, ControlMode::Quarantined)
        )
    }
}

impl fmt::Display for ControlMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ControlMode::Active => "ACTIVE",
            ControlMode::Tracking => "TRACKING",
            ControlMode::Monitoring => "MONITORING",
            ControlMode::Quarantined => "QUARANTINED",
        };
        f.write_str(s)
    }
}

/// The facts about one evaluation that drive session transitions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Signals {
    /// The final disposition was BLOCK.
    pub blocked: bool,
    pub barrier_failed: bool,
    /// Consensus ran and did not pass.
    pub consensus_failed: bool,
    pub critical_violation: bool,
    /// Decision reason, recorded on any resulting transition.
    pub reason: String,
}

/// A recorded mode change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub transition_id: Uuid,
    /// The session, or `*` for the kill-switch.
    pub session_id: String,
    pub from: ControlMode,
    pub to: ControlMode,
    pub reason: String,
    pub at: DateTime<Utc>,
    /// Set for administrative transitions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator: Option<String>,
}

/// Current mode plus the last transition's reason and time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeRecord {
    pub mode: ControlMode,
    pub reason: String,
    pub changed_at: DateTime<Utc>,
}

impl ModeRecord {
    fn initial(now: DateTime<Utc>) -> Self {
        Self {
            mode: ControlMode::Active,
            reason: "initialized".to_string(),
            changed_at: now,
        }
    }
}

#[derive(Debug, Clone)]
struct SessionEntry {
    record: ModeRecord,
    /// Timestamps of the current run of consecutive BLOCKs.
    block_streak: VecDeque<DateTime<Utc>>,
    blocks_in_monitoring: u32,
    last_seen: DateTime<Utc>,
}

impl SessionEntry {
    fn new(now: DateTime<Utc>) -> Self {
        Self::with_record(ModeRecord::initial(now), now)
    }

    fn with_record(record: ModeRecord, now: DateTime<Utc>) -> Self {
        Self {
            record,
            block_streak: VecDeque::new(),
            blocks_in_monitoring: 0,
            last_seen: now,
        }
    }

    /// Nothing here that a fresh entry would not also hold.
    fn is_idle_since(&self, cutoff: DateTime<Utc>) -> bool {
        self.record.mode == ControlMode::Active
            && self.block_streak.is_empty()
            && self.last_seen < cutoff
    }
}

/// `secs` as a chrono duration; `None` if it does not fit.
fn seconds(secs: u64) -> Option<Duration> {
    i64::try_from(secs).ok().and_then(Duration::try_seconds)
}

#[derive(Debug)]
struct Inner {
    global: ModeRecord,
    sessions: HashMap<String, SessionEntry>,
    history: VecDeque<Transition>,
}

impl Inner {
    fn record(&mut self, transition: Transition) {
        if self.history.len() == HISTORY_LIMIT {
            self.history.pop_front();
        }
        self.history.push_back(transition);
    }
}

/// Compare-and-transition on one session entry.
fn transition_entry(
    session_id: &str,
    entry: &mut SessionEntry,
    to: ControlMode,
    reason: &str,
    now: DateTime<Utc>,
) -> Result<Option<Transition>, ControlError> {
    let from = entry.record.mode;
    if from == to {
        return Ok(None);
    }
    if !from.can_transition_to(to) {
        return Err(ControlError::IllegalTransition {
            session_id: session_id.to_string(),
            from,
            to,
        });
    }

    entry.record = ModeRecord {
        mode: to,
        reason: reason.to_string(),
        changed_at: now,
    };
    if to == ControlMode::Monitoring {
        entry.blocks_in_monitoring = 0;
    }
    Ok(Some(Transition {
        transition_id: Uuid::new_v4(),
        session_id: session_id.to_string(),
        from,
        to,
        reason: reason.to_string(),
        at: now,
        operator: None,
    }))
}

/// Per-session status for listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStatus {
    pub session_id: String,
    #[serde(flatten)]
    pub record: ModeRecord,
}

/// Serializable form of the control state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlSnapshot {
    pub global: ModeRecord,
    pub sessions: BTreeMap<String, ModeRecord>,
    pub saved_at: DateTime<Utc>,
}

/// The process-wide control state. Create one per process and share it.
#[derive(Debug)]
pub struct ControlState {
    config: ControlConfig,
    inner: Mutex<Inner>,
}

impl ControlState {
    /// Fresh state: kill-switch off, every session ACTIVE.
    pub fn new(config: ControlConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                global: ModeRecord::initial(Utc::now()),
                sessions: HashMap::new(),
                history: VecDeque::new(),
            }),
        }
    }

    /// Rebuild from a snapshot. Streak counters start empty.
    pub fn restore(config: ControlConfig, snapshot: ControlSnapshot) -> Self {
        let now = Utc::now();
        let sessions = snapshot
            .sessions
            .into_iter()
            .map(|(id, record)| (id, SessionEntry::with_record(record, now)))
            .collect();
        Self {
            config,
            inner: Mutex::new(Inner {
                global: snapshot.global,
                sessions,
                history: VecDeque::new(),
            }),
        }
    }

    /// Load from a snapshot file. A missing file gives fresh state; a file
    /// that cannot be read or parsed gives state with the kill-switch engaged.
    pub fn load_or_fail_closed(config: ControlConfig, file: &ControlStateFile) -> Self {
        match file.load() {
            Ok(Some(snapshot)) => Self::restore(config, snapshot),
            Ok(None) => Self::new(config),
            Err(e) => {
                tracing::error!(path = %file.path().display(), error = %e, "control state unreadable; engaging kill-switch");
                let state = Self::new(config);
                {
                    let mut inner = state.lock();
                    inner.global = ModeRecord {
                        mode: ControlMode::Quarantined,
                        reason: format!("control state unreadable: {}", e),
                        changed_at: Utc::now(),
                    };
                }
                state
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Every mutation completes inside the lock; a poisoned guard still holds consistent state.
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn config(&self) -> &ControlConfig {
        &self.config
    }

    /// Apply one evaluation's signals to a session atomically.
    ///
    /// Returns the transitions made, in order. A session already in
    /// QUARANTINED is left alone and yields no transitions.
    pub fn apply(
        &self,
        session_id: &str,
        signals: &Signals,
        now: DateTime<Utc>,
    ) -> Result<Vec<Transition>, ControlError> {
        let mut inner = self.lock();
        let entry = inner
            .sessions
            .entry(session_id.to_string())
            .or_insert_with(|| SessionEntry::new(now));
        entry.last_seen = entry.last_seen.max(now);

        let mut transitions = Vec::new();
        if entry.record.mode == ControlMode::Quarantined {
            return Ok(transitions);
        }

        if signals.critical_violation {
            let reason = format!("critical policy violation: {}", signals.reason);
            transitions.extend(transition_entry(
                session_id,
                entry,
                ControlMode::Quarantined,
                &reason,
                now,
            )?);
        } else {
            if signals.blocked {
                if entry.record.mode == ControlMode::Monitoring {
                    entry.blocks_in_monitoring += 1;
                    if entry.blocks_in_monitoring >= self.config.monitoring_block_limit {
                        let reason = format!("blocked while monitoring: {}", signals.reason);
                        transitions.extend(transition_entry(
                            session_id,
                            entry,
                            ControlMode::Quarantined,
                            &reason,
                            now,
                        )?);
                    }
                } else {
                    // An unrepresentable window never expires a BLOCK.
                    let window = seconds(self.config.block_window_secs);
                    entry.block_streak.push_back(now);
                    while entry
                        .block_streak
                        .front()
                        .is_some_and(|t| window.is_some_and(|w| now - *t > w))
                    {
                        entry.block_streak.pop_front();
                    }
                    if entry.record.mode == ControlMode::Active
                        && entry.block_streak.len() >= self.config.block_streak
                    {
                        let reason = format!(
                            "{} consecutive blocks: {}",
                            entry.block_streak.len(),
                            signals.reason
                        );
                        transitions.extend(transition_entry(
                            session_id,
                            entry,
                            ControlMode::Tracking,
                            &reason,
                            now,
                        )?);
                    }
                }
            } else {
                entry.block_streak.clear();
            }

            if (signals.barrier_failed || signals.consensus_failed)
                && entry.record.mode < ControlMode::Monitoring
            {
                let cause = if signals.barrier_failed {
                    "barrier failure"
                } else {
                    "consensus failure"
                };
                let reason = format!("{}: {}", cause, signals.reason);
                transitions.extend(transition_entry(
                    session_id,
                    entry,
                    ControlMode::Monitoring,
                    &reason,
                    now,
                )?);
            }
        }

        if entry.record.mode == ControlMode::Quarantined {
            entry.block_streak.clear();
        }
        for t in &transitions {
            tracing::warn!(session_id, from = %t.from, to = %t.to, reason = %t.reason, "session transition");
        }
        for t in &transitions {
            inner.record(t.clone());
        }
        Ok(transitions)
    }

    /// Forget ACTIVE sessions with no BLOCK streak that have not been
    /// evaluated for `session_idle_secs`. Returns the forgotten IDs.
    ///
    /// A forgotten session is indistinguishable from one never seen: it
    /// reads as ACTIVE with an empty streak.
    pub fn evict_idle(&self, now: DateTime<Utc>) -> Vec<String> {
        let Some(cutoff) =
            seconds(self.config.session_idle_secs).and_then(|idle| now.checked_sub_signed(idle))
        else {
            return Vec::new();
        };
        let mut inner = self.lock();
        let mut evicted = Vec::new();
        inner.sessions.retain(|id, entry| {
            let idle = entry.is_idle_since(cutoff);
            if idle {
                evicted.push(id.clone());
            }
            !idle
        });
        if !evicted.is_empty() {
            tracing::debug!(evicted = evicted.len(), "idle sessions forgotten");
        }
        evicted
    }

    /// Compare-and-transition a session to `to`. No-op if already there.
    pub fn transition(
        &self,
        session_id: &str,
        to: ControlMode,
        reason: &str,
    ) -> Result<Option<Transition>, ControlError> {
        let now = Utc::now();
        let mut inner = self.lock();
        let entry = inner
            .sessions
            .entry(session_id.to_string())
            .or_insert_with(|| SessionEntry::new(now));
        let transition = transition_entry(session_id, entry, to, reason, now)?;
        if let Some(t) = &transition {
            inner.record(t.clone());
        }
        Ok(transition)
    }

    /// Administrative release: the only way out of QUARANTINED.
    pub fn release(&self, session_id: &str, operator: &str) -> Result<Transition, ControlError> {
        if operator.trim().is_empty() {
            return Err(ControlError::MissingOperator);
        }
        let now = Utc::now();
        let mut inner = self.lock();
        let mode = inner
            .sessions
            .get(session_id)
            .map(|e| e.record.mode)
            .unwrap_or(ControlMode::Active);
        if mode != ControlMode::Quarantined {
            return Err(ControlError::NotQuarantined {
                session_id: session_id.to_string(),
                mode,
            });
        }

        let reason = format!("released by {}", operator);
        inner
            .sessions
            .insert(session_id.to_string(), SessionEntry::new(now));
        if let Some(entry) = inner.sessions.get_mut(session_id) {
            entry.record.reason = reason.clone();
        }

        let transition = Transition {
            transition_id: Uuid::new_v4(),
            session_id: session_id.to_string(),
            from: ControlMode::Quarantined,
            to: ControlMode::Active,
            reason,
            at: now,
            operator: Some(operator.to_string()),
        };
        inner.record(transition.clone());
        tracing::warn!(session_id, operator, "session released from quarantine");
        Ok(transition)
    }

    /// Engage the process-wide kill-switch. Idempotent: if already engaged,
    /// the original reason stands and `None` is returned.
    pub fn engage_kill_switch(
        &self,
        reason: &str,
        operator: &str,
    ) -> Result<Option<Transition>, ControlError> {
        if operator.trim().is_empty() {
            return Err(ControlError::MissingOperator);
        }
        let now = Utc::now();
        let mut inner = self.lock();
        if inner.global.mode == ControlMode::Quarantined {
            return Ok(None);
        }
        let from = inner.global.mode;
        inner.global = ModeRecord {
            mode: ControlMode::Quarantined,
            reason: reason.to_string(),
            changed_at: now,
        };
        let transition = Transition {
            transition_id: Uuid::new_v4(),
            session_id: GLOBAL_SESSION.to_string(),
            from,
            to: ControlMode::Quarantined,
            reason: reason.to_string(),
            at: now,
            operator: Some(operator.to_string()),
        };
        inner.record(transition.clone());
        tracing::error!(reason, operator, "kill-switch engaged");
        Ok(Some(transition))
    }

    pub fn release_kill_switch(&self, operator: &str) -> Result<Transition, ControlError> {
        if operator.trim().is_empty() {
            return Err(ControlError::MissingOperator);
        }
        let now = Utc::now();
        let mut inner = self.lock();
        if inner.global.mode != ControlMode::Quarantined {
            return Err(ControlError::KillSwitchNotEngaged);
        }
        let reason = format!("released by {}", operator);
        inner.global = ModeRecord {
            mode: ControlMode::Active,
            reason: reason.clone(),
            changed_at: now,
        };
        let transition = Transition {
            transition_id: Uuid::new_v4(),
            session_id: GLOBAL_SESSION.to_string(),
            from: ControlMode::Quarantined,
            to: ControlMode::Active,
            reason,
            at: now,
            operator: Some(operator.to_string()),
        };
        inner.record(transition.clone());
        tracing::warn!(operator, "kill-switch released");
        Ok(transition)
    }

    /// The kill-switch record, if engaged.
    pub fn kill_switch(&self) -> Option<ModeRecord> {
        let inner = self.lock();
        (inner.global.mode == ControlMode::Quarantined).then(|| inner.global.clone())
    }

    pub fn mode(&self, session_id: &str) -> ControlMode {
        self.lock()
            .sessions
            .get(session_id)
            .map(|e| e.record.mode)
            .unwrap_or(ControlMode::Active)
    }

    pub fn session(&self, session_id: &str) -> Option<ModeRecord> {
        self.lock().sessions.get(session_id).map(|e| e.record.clone())
    }

    /// All known sessions, sorted by ID.
    pub fn sessions(&self) -> Vec<SessionStatus> {
        let inner = self.lock();
        let mut list: Vec<_> = inner
            .sessions
            .iter()
            .map(|(id, e)| SessionStatus {
                session_id: id.clone(),
                record: e.record.clone(),
            })
            .collect();
        list.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        list
    }

    /// Recent transitions, oldest first.
    pub fn history(&self) -> Vec<Transition> {
        self.lock().history.iter().cloned().collect()
    }

    pub fn snapshot(&self) -> ControlSnapshot {
        let inner = self.lock();
        ControlSnapshot {
            global: inner.global.clone(),
            sessions: inner
                .sessions
                .iter()
                .map(|(id, e)| (id.clone(), e.record.clone()))
                .collect(),
            saved_at: Utc::now(),
        }
    }
}

impl SessionGate for ControlState {
    /// The kill-switch quarantines every session.
    fn is_quarantined(&self, session_id: &str) -> bool {
        let inner = self.lock();
        inner.global.mode == ControlMode::Quarantined
            || inner
                .sessions
                .get(session_id)
                .is_some_and(|e| e.record.mode == ControlMode::Quarantined)
    }
}

/// JSON file holding a [`ControlSnapshot`].
#[derive(Debug, Clone)]
pub struct ControlStateFile {
    path: PathBuf,
}

impl ControlStateFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `Ok(None)` when the file does not exist.
    pub fn load(&self) -> Result<Option<ControlSnapshot>, ControlError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let json = std::fs::read_to_string(&self.path).map_err(|source| ControlError::Io {
            path: self.path.clone(),
            source,
        })?;
        Ok(Some(serde_json::from_str(&json)?))
    }

    /// Write via a temporary file and rename, so readers never see a partial snapshot.
    pub fn save(&self, snapshot: &ControlSnapshot) -> Result<(), ControlError> {
        let io_err = |source| ControlError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(io_err)?;
            }
        }
        let json = serde_json::to_string_pretty(snapshot)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(io_err)?;
        std::fs::rename(&tmp, &self.path).map_err(io_err)?;
        Ok(())
    }
}

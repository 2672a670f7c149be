// sink.rs — Where audit events go.
//
// The governor emits each decision exactly once through an AuditSink. The
// wire format of the real observability collector is not ours to define;
// these sinks cover the local cases: a hash-chained JSONL file, an
// in-memory buffer for tests and embedding, and structured tracing output.

use std::path::Path;
use std::sync::Mutex;

use uuid::Uuid;

use crate::error::AuditError;
use crate::event::AuditEvent;
use crate::log::AuditLog;

/// Receives audit events. Implementations must be safe to share across
/// concurrently evaluating sessions.
pub trait AuditSink: Send + Sync {
    /// Record one event and return its ID.
    fn emit(&self, event: AuditEvent) -> Result<Uuid, AuditError>;
}

/// File-backed sink: appends to a hash-chained [`AuditLog`].
pub struct JsonlSink {
    log: Mutex<AuditLog>,
}

impl JsonlSink {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AuditError> {
        Ok(Self {
            log: Mutex::new(AuditLog::open(path)?),
        })
    }
}

impl AuditSink for JsonlSink {
    fn emit(&self, mut event: AuditEvent) -> Result<Uuid, AuditError> {
        // A panic while holding the lock cannot leave a half-written line
        // (append flushes whole lines), so a poisoned lock is still usable.
        let mut log = self.log.lock().unwrap_or_else(|p| p.into_inner());
        log.append(&mut event)?;
        Ok(event.event_id)
    }
}

/// In-memory sink that keeps every event.
#[derive(Default)]
pub struct MemorySink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything emitted so far.
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AuditSink for MemorySink {
    fn emit(&self, event: AuditEvent) -> Result<Uuid, AuditError> {
        let id = event.event_id;
        self.events
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(event);
        Ok(id)
    }
}

/// Emits each event as a structured `tracing` record on the `tg_audit` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl AuditSink for TracingSink {
    fn emit(&self, event: AuditEvent) -> Result<Uuid, AuditError> {
        let payload = serde_json::to_string(&event.metadata)?;
        tracing::info!(
            target: "tg_audit",
            event_id = %event.event_id,
            session_id = %event.session_id,
            action = ?event.action,
            action_hash = event.action_hash.as_deref().unwrap_or("-"),
            payload = %payload,
            "audit event"
        );
        Ok(event.event_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::AuditAction;
    use tempfile::tempdir;

    #[test]
    fn memory_sink_keeps_order() {
        let sink = MemorySink::new();
        assert!(sink.is_empty());
        sink.emit(AuditEvent::new("s1", AuditAction::Decision))
            .unwrap();
        sink.emit(AuditEvent::new("s1", AuditAction::StateTransition))
            .unwrap();

        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].action, AuditAction::StateTransition);
    }

    #[test]
    fn jsonl_sink_writes_a_valid_chain() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let sink = JsonlSink::open(&path).unwrap();

        let first = sink
            .emit(AuditEvent::new("s1", AuditAction::Decision))
            .unwrap();
        sink.emit(AuditEvent::new("s1", AuditAction::CredentialIssued).with_parent(first))
            .unwrap();

        assert_eq!(AuditLog::verify_chain(&path).unwrap().events, 2);
        let events = AuditLog::read_all(&path).unwrap();
        assert_eq!(events[0].event_id, first);
        assert_eq!(events[1].parent_event_id, Some(first));
    }

    #[test]
    fn tracing_sink_returns_event_id() {
        let event = AuditEvent::new("s1", AuditAction::KillSwitch);
        let id = event.event_id;
        assert_eq!(TracingSink.emit(event).unwrap(), id);
    }
}

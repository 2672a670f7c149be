//! # tg-audit
//!
//! Append-only audit trail for Tollgate.
//!
//! Every decision, state transition and credential lifecycle event is
//! recorded as an [`AuditEvent`] and handed to an [`AuditSink`]. The
//! file-backed sink writes a JSONL log in which each line carries the
//! SHA-256 of the previous line, so insertions, deletions and edits are
//! detectable with [`AuditLog::verify_chain`].
//!
//! ## Quick Example
//!
//! ```rust,no_run
//! use tg_audit::{AuditAction, AuditEvent, AuditSink, JsonlSink};
//!
//! let sink = JsonlSink::open("/tmp/audit.jsonl").unwrap();
//! let event = AuditEvent::new("session-1", AuditAction::Decision)
//!     .with_action_hash("9f2c…");
//! sink.emit(event).unwrap();
//! ```

pub mod error;
pub mod event;
pub mod hasher;
pub mod log;
pub mod sink;

pub use error::AuditError;
pub use event::{AuditAction, AuditEvent};
pub use log::{AuditLog, ChainSummary};
pub use sink::{AuditSink, JsonlSink, MemorySink, TracingSink};

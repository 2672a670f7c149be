//! # tg-action
//!
//! Shared data model for Tollgate's governance pipeline.
//!
//! An agent submits a [`ProposedAction`] together with a [`SafetyContext`]
//! snapshot. The governor answers with a [`Decision`] whose [`Disposition`]
//! is one of ALLOW, BLOCK, ESCALATE or QUARANTINE, tagged with the [`Stage`]
//! that produced it.
//!
//! ## Key invariants
//!
//! - **Immutable submissions**: the pipeline only ever borrows a
//!   `ProposedAction`; nothing downstream mutates it.
//! - **Stable fingerprints**: parameters live in a `BTreeMap`, so the
//!   canonical JSON (and therefore [`ProposedAction::fingerprint`]) does not
//!   depend on insertion order.

pub mod action;
pub mod context;
pub mod decision;

pub use action::{ActionType, ParamValue, ProposedAction};
pub use context::SafetyContext;
pub use decision::{Decision, Disposition, Stage};

//! # tg-governor
//!
//! The runtime governance control loop. Every side-effecting action an
//! agent proposes passes through [`Governor::evaluate`] before it may run.
//!
//! The pipeline folds four stages in fixed order (policy, risk and barrier,
//! consensus, content) and short-circuits on the first BLOCK. The result is
//! a [`Decision`](tg_action::Decision); only ALLOW comes with a scoped,
//! single-use credential.
//!
//! ## Control state
//!
//! [`ControlState`] holds the process-wide kill-switch and a mode per
//! session (ACTIVE, TRACKING, MONITORING, QUARANTINED). It is owned
//! explicitly and shared by `Arc`; there is no global static.
//!
//! ## Key invariants
//!
//! - **Fail-closed**: a stage error, an exchange outage or an audit sink
//!   failure is a BLOCK, never an ALLOW.
//! - **Quarantine is terminal** until [`Governor::release_session`]; a
//!   quarantined session never reaches the pipeline.
//! - **One transition per trigger**: concurrent evaluations that both
//!   quarantine a session record exactly one transition.
//! - **Exactly one Decision audit event** per evaluation, carrying the
//!   action hash and the full barrier snapshot.

pub mod cleanup;
pub mod config;
pub mod control;
pub mod error;
pub mod governor;
pub mod stage;

pub use cleanup::{spawn_cleanup, spawn_credential_cleanup, Sweep, SweepStats};
pub use config::{
    BarrierConfig, ConsensusConfig, ContentConfig, ControlConfig, GovernorConfig, PathsConfig,
    RiskConfig,
};
pub use control::{
    ControlMode, ControlSnapshot, ControlState, ControlStateFile, ModeRecord, SessionStatus,
    Signals, Transition, GLOBAL_SESSION,
};
pub use error::{ConfigError, ControlError, GovernorError};
pub use governor::{Evaluation, Governor, GovernorBuilder};
pub use stage::{EvaluationReport, PipelineStage, StageInput, StageOutcome};

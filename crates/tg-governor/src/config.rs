// config.rs — Governor configuration.
//
// GovernorConfig is loaded from `.tollgate/governance.toml`. Every section
// is optional; missing sections and fields take the defaults below. The
// `for_project()` constructor places the policy document, audit log and
// control-state snapshot under `.tollgate/` in the project root.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tg_consensus::EvaluatorSpec;
use tg_credentials::{CredentialConfig, CredentialError};
use tg_policy::ContentPattern;

use crate::error::ConfigError;

/// Name of the per-project state directory.
pub const STATE_DIR: &str = ".tollgate";
pub const CONFIG_FILE: &str = "governance.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GovernorConfig {
    #[serde(default)]
    pub paths: PathsConfig,

    #[serde(default)]
    pub risk: RiskConfig,

    #[serde(default)]
    pub barrier: BarrierConfig,

    #[serde(default)]
    pub consensus: ConsensusConfig,

    #[serde(default)]
    pub content: ContentConfig,

    #[serde(default)]
    pub control: ControlConfig,

    #[serde(default)]
    pub credentials: CredentialConfig,
}

/// Where the governor keeps its files. `None` disables the file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PathsConfig {
    /// YAML policy document. Without one the baseline policy applies.
    pub policy: Option<PathBuf>,
    /// Hash-chained JSONL audit log. Without one, audit goes to tracing.
    pub audit_log: Option<PathBuf>,
    /// JSON snapshot of the control state.
    pub control_state: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Failure probability at or above which the action is blocked.
    #[serde(default = "default_critical_probability")]
    pub critical_probability: f64,

    /// Failure probability above which consensus is required.
    #[serde(default = "default_escalation_probability")]
    pub escalation_probability: f64,

    #[serde(default = "default_exposure_limit")]
    pub exposure_limit: f64,

    /// Daily drawdown limit as a fraction.
    #[serde(default = "default_max_drawdown")]
    pub max_drawdown: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            critical_probability: default_critical_probability(),
            escalation_probability: default_escalation_probability(),
            exposure_limit: default_exposure_limit(),
            max_drawdown: default_max_drawdown(),
        }
    }
}

/// Barrier gains and derivative window. The gains are tuning parameters to
/// be validated against recorded trajectories, not derived constants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BarrierConfig {
    #[serde(default = "default_k1")]
    pub k1: f64,

    #[serde(default = "default_k2")]
    pub k2: f64,

    /// Samples kept per session.
    #[serde(default = "default_window")]
    pub window: usize,
}

impl Default for BarrierConfig {
    fn default() -> Self {
        Self {
            k1: default_k1(),
            k2: default_k2(),
            window: default_window(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusConfig {
    #[serde(default = "default_consensus_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "EvaluatorSpec::defaults")]
    pub evaluators: Vec<EvaluatorSpec>,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_consensus_timeout_ms(),
            evaluators: EvaluatorSpec::defaults(),
        }
    }
}

impl ConsensusConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentConfig {
    #[serde(default = "ContentPattern::defaults")]
    pub patterns: Vec<ContentPattern>,

    #[serde(default = "tg_policy::default_deceptive_tools")]
    pub deceptive_tools: Vec<String>,
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            patterns: ContentPattern::defaults(),
            deceptive_tools: tg_policy::default_deceptive_tools(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlConfig {
    /// Consecutive BLOCKs that move a session to TRACKING.
    #[serde(default = "default_block_streak")]
    pub block_streak: usize,

    /// The streak only counts BLOCKs within this many seconds of the
    /// oldest BLOCK still in it. At most one day.
    #[serde(default = "default_block_window_secs")]
    pub block_window_secs: u64,

    /// BLOCKs in MONITORING before the session is quarantined.
    #[serde(default = "default_monitoring_block_limit")]
    pub monitoring_block_limit: u32,

    /// Seconds between cleanup sweeps. Must be positive.
    #[serde(default = "default_cleanup_interval_secs")]
    pub credential_cleanup_secs: u64,

    /// ACTIVE sessions with no BLOCK streak are forgotten after this many
    /// idle seconds, along with their barrier history.
    #[serde(default = "default_session_idle_secs")]
    pub session_idle_secs: u64,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            block_streak: default_block_streak(),
            block_window_secs: default_block_window_secs(),
            monitoring_block_limit: default_monitoring_block_limit(),
            credential_cleanup_secs: default_cleanup_interval_secs(),
            session_idle_secs: default_session_idle_secs(),
        }
    }
}

// Serde default functions
fn default_critical_probability() -> f64 {
    0.9
}

fn default_escalation_probability() -> f64 {
    0.2
}

fn default_exposure_limit() -> f64 {
    1_000_000.0
}

fn default_max_drawdown() -> f64 {
    0.02
}

fn default_k1() -> f64 {
    2.0
}

fn default_k2() -> f64 {
    1.0
}

fn default_window() -> usize {
    3
}

fn default_consensus_timeout_ms() -> u64 {
    2_000
}

fn default_block_streak() -> usize {
    3
}

fn default_block_window_secs() -> u64 {
    300
}

fn default_monitoring_block_limit() -> u32 {
    1
}

fn default_cleanup_interval_secs() -> u64 {
    30
}

fn default_session_idle_secs() -> u64 {
    3_600
}

const MAX_BLOCK_WINDOW_SECS: u64 = 86_400;
const MAX_SESSION_IDLE_SECS: u64 = 30 * 86_400;

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            paths: PathsConfig::default(),
            risk: RiskConfig::default(),
            barrier: BarrierConfig::default(),
            consensus: ConsensusConfig::default(),
            content: ContentConfig::default(),
            control: ControlConfig::default(),
            credentials: CredentialConfig::default(),
        }
    }
}

impl GovernorConfig {
    /// Default config with the standard `.tollgate/` layout for a project.
    pub fn for_project(project_root: impl AsRef<Path>) -> Self {
        let dir = state_dir(project_root);
        Self {
            paths: PathsConfig {
                policy: Some(dir.join("policy.yaml")),
                audit_log: Some(dir.join("audit.jsonl")),
                control_state: Some(dir.join("control-state.json")),
            },
            ..Self::default()
        }
    }

    /// Parse and validate a TOML config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: GovernorConfig =
            toml::from_str(&content).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Load `.tollgate/governance.toml` if present, else the project defaults.
    /// Paths the file leaves unset fall back to the `.tollgate/` layout.
    pub fn load_or_default(project_root: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let root = project_root.as_ref();
        let path = state_dir(root).join(CONFIG_FILE);
        let defaults = Self::for_project(root);
        if !path.exists() {
            return Ok(defaults);
        }

        let mut config = Self::load(&path)?;
        config.paths.policy = config.paths.policy.or(defaults.paths.policy);
        config.paths.audit_log = config.paths.audit_log.or(defaults.paths.audit_log);
        config.paths.control_state = config.paths.control_state.or(defaults.paths.control_state);
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let probability = |field: &str, p: f64| {
            if (0.0..=1.0).contains(&p) {
                Ok(())
            } else {
                Err(ConfigError::invalid(field, format!("{} is outside [0, 1]", p)))
            }
        };
        probability("risk.critical_probability", self.risk.critical_probability)?;
        probability("risk.escalation_probability", self.risk.escalation_probability)?;
        if self.risk.escalation_probability > self.risk.critical_probability {
            return Err(ConfigError::invalid(
                "risk.escalation_probability",
                "must not exceed critical_probability",
            ));
        }
        if !(self.risk.exposure_limit.is_finite() && self.risk.exposure_limit > 0.0) {
            return Err(ConfigError::invalid("risk.exposure_limit", "must be positive"));
        }
        probability("risk.max_drawdown", self.risk.max_drawdown)?;

        for (field, gain) in [("barrier.k1", self.barrier.k1), ("barrier.k2", self.barrier.k2)] {
            if !(gain.is_finite() && gain >= 0.0) {
                return Err(ConfigError::invalid(field, format!("{} must be non-negative", gain)));
            }
        }
        if self.barrier.window < 3 {
            return Err(ConfigError::invalid(
                "barrier.window",
                format!("{} is below the minimum of 3", self.barrier.window),
            ));
        }

        if self.consensus.evaluators.is_empty() {
            return Err(ConfigError::invalid("consensus.evaluators", "at least one is required"));
        }
        if self.consensus.timeout_ms == 0 {
            return Err(ConfigError::invalid("consensus.timeout_ms", "must be positive"));
        }

        if self.control.block_streak == 0 {
            return Err(ConfigError::invalid("control.block_streak", "must be positive"));
        }
        if !(1..=MAX_BLOCK_WINDOW_SECS).contains(&self.control.block_window_secs) {
            return Err(ConfigError::invalid(
                "control.block_window_secs",
                format!("{} is outside 1..={}", self.control.block_window_secs, MAX_BLOCK_WINDOW_SECS),
            ));
        }
        if self.control.monitoring_block_limit == 0 {
            return Err(ConfigError::invalid(
                "control.monitoring_block_limit",
                "must be positive",
            ));
        }

        if self.control.credential_cleanup_secs == 0 {
            return Err(ConfigError::invalid(
                "control.credential_cleanup_secs",
                "must be positive",
            ));
        }
        if !(1..=MAX_SESSION_IDLE_SECS).contains(&self.control.session_idle_secs) {
            return Err(ConfigError::invalid(
                "control.session_idle_secs",
                format!("{} is outside 1..={}", self.control.session_idle_secs, MAX_SESSION_IDLE_SECS),
            ));
        }

        self.credentials.validate().map_err(|e| {
            let field = match e {
                CredentialError::InvalidRetention { .. } => "credentials.retention_secs",
                _ => "credentials.ttl_secs",
            };
            ConfigError::invalid(field, e.to_string())
        })?;
        Ok(())
    }
}

pub fn state_dir(project_root: impl AsRef<Path>) -> PathBuf {
    project_root.as_ref().join(STATE_DIR)
}

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use super::run::Phase;

/// Main configuration structure for pact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Dispatch and concurrency policy
    #[serde(default)]
    pub scheduling: SchedulingConfig,

    /// Spend cap and per-call estimate
    #[serde(default)]
    pub budget: BudgetConfig,

    /// Retry bound and narrative context policy
    #[serde(default)]
    pub diagnosis: DiagnosisConfig,

    /// Structural validation policy
    #[serde(default)]
    pub validation: ValidationConfig,

    /// Agent backend selection
    #[serde(default)]
    pub backend: BackendConfig,

    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Optional Shape phase
    #[serde(default)]
    pub shaping: ShapingConfig,
}

/// Scheduling policy flags
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SchedulingConfig {
    /// Dispatch several ready components per tick
    #[serde(default)]
    pub parallel_components: bool,

    /// Concurrency bound for one tick's fan-out (1-64)
    #[serde(default = "default_max_concurrent_agents")]
    pub max_concurrent_agents: usize,

    /// Dispatch several independent attempts per component
    #[serde(default)]
    pub competitive_implementations: bool,

    /// Attempts per component in competitive mode (1-16)
    #[serde(default = "default_competitive_agents")]
    pub competitive_agents: usize,

    /// Halt natural progression after Validate
    #[serde(default)]
    pub plan_only: bool,

    /// Per-invocation timeout in seconds
    #[serde(default = "default_attempt_timeout_secs")]
    pub attempt_timeout_secs: u64,

    /// Root directory for isolated attempt workspaces
    #[serde(default = "default_workspace_root")]
    pub workspace_root: PathBuf,
}

const fn default_max_concurrent_agents() -> usize {
    4
}

const fn default_competitive_agents() -> usize {
    2
}

const fn default_attempt_timeout_secs() -> u64 {
    600
}

fn default_workspace_root() -> PathBuf {
    PathBuf::from(".pact/workspaces")
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            parallel_components: false,
            max_concurrent_agents: default_max_concurrent_agents(),
            competitive_implementations: false,
            competitive_agents: default_competitive_agents(),
            plan_only: false,
            attempt_timeout_secs: default_attempt_timeout_secs(),
            workspace_root: default_workspace_root(),
        }
    }
}

impl SchedulingConfig {
    /// Attempts dispatched per component under the current policy.
    pub fn slots_per_component(&self) -> usize {
        if self.competitive_implementations {
            self.competitive_agents.max(1)
        } else {
            1
        }
    }

    /// Components acted on per tick under the current policy.
    pub fn units_per_tick(&self) -> usize {
        if self.parallel_components {
            self.max_concurrent_agents.max(1)
        } else {
            1
        }
    }
}

/// Budget configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct BudgetConfig {
    /// Default spend cap for new runs, in USD
    #[serde(default = "default_cap_usd")]
    pub cap_usd: f64,

    /// Projected cost of one paid invocation, in USD
    #[serde(default = "default_per_call_estimate_usd")]
    pub per_call_estimate_usd: f64,

    /// Fraction of the cap at which a warning is logged
    #[serde(default = "default_warning_threshold_pct")]
    pub warning_threshold_pct: f64,

    /// Spend caps per phase, as fractions of the run cap. Unlisted phases
    /// are limited by the run cap alone.
    #[serde(default)]
    pub phase_caps: BTreeMap<Phase, f64>,
}

const fn default_cap_usd() -> f64 {
    10.0
}

const fn default_per_call_estimate_usd() -> f64 {
    0.5
}

const fn default_warning_threshold_pct() -> f64 {
    0.8
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            cap_usd: default_cap_usd(),
            per_call_estimate_usd: default_per_call_estimate_usd(),
            warning_threshold_pct: default_warning_threshold_pct(),
            phase_caps: BTreeMap::new(),
        }
    }
}

/// How an attempt round in which every attempt timed out is counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutPolicy {
    /// Consumes retry budget like any failing round
    CountsAsFailure,
    /// Tracked in a separate counter with the same bound
    Forgiven,
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self::CountsAsFailure
    }
}

/// Diagnosis configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DiagnosisConfig {
    /// Failed rounds per component before it is permanently failed
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default)]
    pub timeout_policy: TimeoutPolicy,

    /// Upper bound on narrative context fragments per component
    #[serde(default = "default_max_context_fragments")]
    pub max_context_fragments: usize,

    /// Same-pattern failures in one tick that pause the run
    #[serde(default = "default_systemic_threshold")]
    pub systemic_threshold: usize,
}

const fn default_max_retries() -> u32 {
    3
}

const fn default_max_context_fragments() -> usize {
    20
}

const fn default_systemic_threshold() -> usize {
    3
}

impl Default for DiagnosisConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            timeout_policy: TimeoutPolicy::default(),
            max_context_fragments: default_max_context_fragments(),
            systemic_threshold: default_systemic_threshold(),
        }
    }
}

/// Validation policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ValidationConfig {
    #[serde(default = "default_min_children")]
    pub min_children: usize,

    #[serde(default = "default_max_children")]
    pub max_children: usize,

    /// Report a missing contract or suite as an error
    #[serde(default = "default_true")]
    pub require_contract_for_every_node: bool,
}

const fn default_min_children() -> usize {
    2
}

const fn default_max_children() -> usize {
    7
}

const fn default_true() -> bool {
    true
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            min_children: default_min_children(),
            max_children: default_max_children(),
            require_contract_for_every_node: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Mock,
    Command,
}

impl Default for BackendKind {
    fn default() -> Self {
        Self::Mock
    }
}

/// Agent backend configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub struct BackendConfig {
    #[serde(default)]
    pub kind: BackendKind,

    #[serde(default)]
    pub command: CommandBackendConfig,
}

/// External program exchanging JSON over stdin/stdout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CommandBackendConfig {
    #[serde(default)]
    pub program: String,

    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default = "default_contract_subcommand")]
    pub contract_subcommand: String,

    #[serde(default = "default_tests_subcommand")]
    pub tests_subcommand: String,

    #[serde(default = "default_implement_subcommand")]
    pub implement_subcommand: String,

    #[serde(default = "default_compose_subcommand")]
    pub compose_subcommand: String,

    #[serde(default = "default_run_tests_subcommand")]
    pub run_tests_subcommand: String,
}

fn default_contract_subcommand() -> String {
    "contract".to_string()
}

fn default_tests_subcommand() -> String {
    "tests".to_string()
}

fn default_implement_subcommand() -> String {
    "implement".to_string()
}

fn default_compose_subcommand() -> String {
    "compose".to_string()
}

fn default_run_tests_subcommand() -> String {
    "run-tests".to_string()
}

impl Default for CommandBackendConfig {
    fn default() -> Self {
        Self {
            program: String::new(),
            args: Vec::new(),
            contract_subcommand: default_contract_subcommand(),
            tests_subcommand: default_tests_subcommand(),
            implement_subcommand: default_implement_subcommand(),
            compose_subcommand: default_compose_subcommand(),
            run_tests_subcommand: default_run_tests_subcommand(),
        }
    }
}

/// Database configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DatabaseConfig {
    /// Path to `SQLite` database file
    #[serde(default = "default_database_path")]
    pub path: String,

    /// Maximum number of database connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_database_path() -> String {
    ".pact/pact.db".to_string()
}

const fn default_max_connections() -> u32 {
    5
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            max_connections: default_max_connections(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RotationPolicy {
    Daily,
    Hourly,
    Never,
}

impl Default for RotationPolicy {
    fn default() -> Self {
        Self::Daily
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: LogFormat,

    /// Directory for rolling log files; stderr only when unset
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    #[serde(default)]
    pub rotation: RotationPolicy,
}

fn default_log_level() -> String {
    "info".to_string()
}

const fn default_log_format() -> LogFormat {
    LogFormat::Pretty
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            log_dir: None,
            rotation: RotationPolicy::default(),
        }
    }
}

/// Shape phase configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub struct ShapingConfig {
    /// When false the Shape phase is recorded as skipped
    #[serde(default)]
    pub enabled: bool,
}

use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use std::path::Path;
use thiserror::Error;

use crate::domain::models::{BackendKind, Config, Phase};

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid max_concurrent_agents: {0}. Must be between 1 and 64")]
    InvalidMaxConcurrentAgents(usize),

    #[error("Invalid competitive_agents: {0}. Must be between 1 and 16")]
    InvalidCompetitiveAgents(usize),

    #[error("Invalid attempt_timeout_secs: {0}. Must be at least 1")]
    InvalidAttemptTimeout(u64),

    #[error("Invalid budget cap: {0}. Must be a positive amount")]
    InvalidBudgetCap(f64),

    #[error("Invalid per_call_estimate_usd: {0}. Cannot be negative")]
    InvalidCallEstimate(f64),

    #[error("Invalid warning_threshold_pct: {0}. Must be in (0, 1]")]
    InvalidWarningThreshold(f64),

    #[error("Invalid phase cap for {0}: {1}. Must be in (0, 1]")]
    InvalidPhaseCap(Phase, f64),

    #[error("Invalid max_retries: {0}. Cannot be 0")]
    InvalidMaxRetries(u32),

    #[error("Invalid child range: min_children ({0}) must not exceed max_children ({1})")]
    InvalidChildRange(usize, usize),

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Database path cannot be empty")]
    EmptyDatabasePath,

    #[error("Invalid max_connections: {0}. Must be at least 1")]
    InvalidMaxConnections(u32),

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration for the project in the current directory.
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults
    /// 2. .pact/config.yaml
    /// 3. .pact/local.yaml
    /// 4. Environment variables (PACT_* prefix, `__` separates sections)
    pub fn load() -> Result<Config> {
        Self::load_from(Path::new("."))
    }

    /// Load configuration for the project rooted at `root`.
    pub fn load_from(root: &Path) -> Result<Config> {
        let dir = root.join(".pact");
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(dir.join("config.yaml")))
            .merge(Yaml::file(dir.join("local.yaml")))
            .merge(Env::prefixed("PACT_").split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file, without environment overrides.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .extract()
            .with_context(|| format!("Failed to load config from {}", path.as_ref().display()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        let scheduling = &config.scheduling;
        if !(1..=64).contains(&scheduling.max_concurrent_agents) {
            return Err(ConfigError::InvalidMaxConcurrentAgents(scheduling.max_concurrent_agents));
        }
        if !(1..=16).contains(&scheduling.competitive_agents) {
            return Err(ConfigError::InvalidCompetitiveAgents(scheduling.competitive_agents));
        }
        if scheduling.attempt_timeout_secs == 0 {
            return Err(ConfigError::InvalidAttemptTimeout(0));
        }

        let budget = &config.budget;
        if !budget.cap_usd.is_finite() || budget.cap_usd <= 0.0 {
            return Err(ConfigError::InvalidBudgetCap(budget.cap_usd));
        }
        if !budget.per_call_estimate_usd.is_finite() || budget.per_call_estimate_usd < 0.0 {
            return Err(ConfigError::InvalidCallEstimate(budget.per_call_estimate_usd));
        }
        if !(budget.warning_threshold_pct > 0.0 && budget.warning_threshold_pct <= 1.0) {
            return Err(ConfigError::InvalidWarningThreshold(budget.warning_threshold_pct));
        }
        if let Some((phase, fraction)) = budget
            .phase_caps
            .iter()
            .find(|(_, fraction)| !(**fraction > 0.0 && **fraction <= 1.0))
        {
            return Err(ConfigError::InvalidPhaseCap(*phase, *fraction));
        }

        if config.diagnosis.max_retries == 0 {
            return Err(ConfigError::InvalidMaxRetries(0));
        }

        let validation = &config.validation;
        if validation.min_children > validation.max_children {
            return Err(ConfigError::InvalidChildRange(
                validation.min_children,
                validation.max_children,
            ));
        }

        if config.backend.kind == BackendKind::Command && config.backend.command.program.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "backend.command.program is required for the command backend".to_string(),
            ));
        }

        if config.database.path.is_empty() {
            return Err(ConfigError::EmptyDatabasePath);
        }
        if config.database.max_connections == 0 {
            return Err(ConfigError::InvalidMaxConnections(0));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.to_lowercase().as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        Ok(())
    }
}

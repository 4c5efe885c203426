//! Orchestrator and chain-engine configuration.
//!
//! Configuration is consumed, not owned: callers build it from JSON, from the
//! environment, or in code with the builder methods.

use crate::core::StageName;
use crate::errors::AlertflowError;
use crate::pipeline::{JitterStrategy, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Per-stage overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageSettings {
    /// Whether the stage runs at all.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Attempt ceiling override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    /// Timeout override in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl Default for StageSettings {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            max_retries: None,
            timeout_ms: None,
        }
    }
}

/// Configuration for the fixed-stage orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Attempt ceiling per stage (first attempt included).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Delay before the first retry in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Multiplier applied per further attempt.
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
    /// Delay cap in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Jitter applied to retry delays.
    #[serde(default)]
    pub jitter: JitterStrategy,
    /// Timeout enforced at the stage boundary in milliseconds.
    #[serde(default = "default_stage_timeout_ms")]
    pub stage_timeout_ms: u64,
    /// Substitute a degraded analysis when the analyze stage fails.
    #[serde(default = "default_enabled")]
    pub intelligence_fallback_enabled: bool,
    /// Default environment tag for runs that do not carry one.
    #[serde(default = "default_environment")]
    pub environment: String,
    /// Per-stage overrides.
    #[serde(default)]
    pub stages: HashMap<StageName, StageSettings>,
}

fn default_enabled() -> bool {
    true
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_backoff_factor() -> f64 {
    2.0
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_stage_timeout_ms() -> u64 {
    30_000
}

fn default_environment() -> String {
    "production".to_string()
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            backoff_factor: default_backoff_factor(),
            max_delay_ms: default_max_delay_ms(),
            jitter: JitterStrategy::default(),
            stage_timeout_ms: default_stage_timeout_ms(),
            intelligence_fallback_enabled: default_enabled(),
            environment: default_environment(),
            stages: HashMap::new(),
        }
    }
}

impl OrchestratorConfig {
    /// Creates a config with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a config from JSON; missing fields take defaults.
    pub fn from_json(json: &str) -> Result<Self, AlertflowError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Builds a config from `ALERTFLOW_*` environment variables.
    pub fn from_env() -> Result<Self, AlertflowError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AlertflowError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = lookup("ALERTFLOW_MAX_RETRIES") {
            config.max_retries = parse_var("ALERTFLOW_MAX_RETRIES", &v)?;
        }
        if let Some(v) = lookup("ALERTFLOW_BACKOFF_FACTOR") {
            config.backoff_factor = parse_var("ALERTFLOW_BACKOFF_FACTOR", &v)?;
        }
        if let Some(v) = lookup("ALERTFLOW_BASE_DELAY_MS") {
            config.base_delay_ms = parse_var("ALERTFLOW_BASE_DELAY_MS", &v)?;
        }
        if let Some(v) = lookup("ALERTFLOW_MAX_DELAY_MS") {
            config.max_delay_ms = parse_var("ALERTFLOW_MAX_DELAY_MS", &v)?;
        }
        if let Some(v) = lookup("ALERTFLOW_STAGE_TIMEOUT_MS") {
            config.stage_timeout_ms = parse_var("ALERTFLOW_STAGE_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("ALERTFLOW_INTELLIGENCE_FALLBACK") {
            config.intelligence_fallback_enabled = parse_bool("ALERTFLOW_INTELLIGENCE_FALLBACK", &v)?;
        }
        if let Some(v) = lookup("ALERTFLOW_ENVIRONMENT") {
            config.environment = v;
        }
        if let Some(v) = lookup("ALERTFLOW_DISABLED_STAGES") {
            for name in v.split(',').map(str::trim).filter(|s| !s.is_empty()) {
                let stage = StageName::parse(name).ok_or_else(|| {
                    AlertflowError::Validation(format!(
                        "ALERTFLOW_DISABLED_STAGES: unknown stage '{name}'"
                    ))
                })?;
                config = config.with_stage_disabled(stage);
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Rejects settings the retry policy cannot honour.
    pub fn validate(&self) -> Result<(), AlertflowError> {
        if self.max_retries == 0 {
            return Err(AlertflowError::Validation(
                "max_retries must be at least 1".to_string(),
            ));
        }
        if !self.backoff_factor.is_finite() || self.backoff_factor < 1.0 {
            return Err(AlertflowError::Validation(format!(
                "backoff_factor must be >= 1.0, got {}",
                self.backoff_factor
            )));
        }
        Ok(())
    }

    /// Sets the attempt ceiling.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the base delay.
    #[must_use]
    pub fn with_base_delay_ms(mut self, delay: u64) -> Self {
        self.base_delay_ms = delay;
        self
    }

    /// Sets the backoff factor.
    #[must_use]
    pub fn with_backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor;
        self
    }

    /// Sets the jitter strategy.
    #[must_use]
    pub fn with_jitter(mut self, jitter: JitterStrategy) -> Self {
        self.jitter = jitter;
        self
    }

    /// Sets the stage timeout.
    #[must_use]
    pub fn with_stage_timeout_ms(mut self, timeout: u64) -> Self {
        self.stage_timeout_ms = timeout;
        self
    }

    /// Enables or disables the intelligence fallback.
    #[must_use]
    pub fn with_intelligence_fallback(mut self, enabled: bool) -> Self {
        self.intelligence_fallback_enabled = enabled;
        self
    }

    /// Sets the default environment.
    #[must_use]
    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = environment.into();
        self
    }

    /// Disables a stage.
    #[must_use]
    pub fn with_stage_disabled(mut self, stage: StageName) -> Self {
        self.stages.entry(stage).or_default().enabled = false;
        self
    }

    /// Overrides settings for one stage.
    #[must_use]
    pub fn with_stage_settings(mut self, stage: StageName, settings: StageSettings) -> Self {
        self.stages.insert(stage, settings);
        self
    }

    /// Returns true unless the stage was disabled.
    #[must_use]
    pub fn is_stage_enabled(&self, stage: StageName) -> bool {
        self.stages.get(&stage).map_or(true, |s| s.enabled)
    }

    /// Retry policy for one stage.
    #[must_use]
    pub fn retry_policy_for(&self, stage: StageName) -> RetryPolicy {
        let max_retries = self
            .stages
            .get(&stage)
            .and_then(|s| s.max_retries)
            .unwrap_or(self.max_retries);
        RetryPolicy::new()
            .with_max_retries(max_retries)
            .with_base_delay_ms(self.base_delay_ms)
            .with_backoff_factor(self.backoff_factor)
            .with_max_delay_ms(self.max_delay_ms)
            .with_jitter(self.jitter)
    }

    /// Timeout for one stage.
    #[must_use]
    pub fn timeout_for(&self, stage: StageName) -> Duration {
        let ms = self
            .stages
            .get(&stage)
            .and_then(|s| s.timeout_ms)
            .unwrap_or(self.stage_timeout_ms);
        Duration::from_millis(ms)
    }
}

/// Configuration for the definition-based chain engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Attempt ceiling per node (first attempt included).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Delay before the first retry in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Multiplier applied per further attempt.
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
    /// Delay cap in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Jitter applied to retry delays.
    #[serde(default)]
    pub jitter: JitterStrategy,
    /// Timeout enforced at the node boundary in milliseconds.
    #[serde(default = "default_stage_timeout_ms")]
    pub node_timeout_ms: u64,
    /// Default environment tag for chain runs.
    #[serde(default = "default_environment")]
    pub environment: String,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            backoff_factor: default_backoff_factor(),
            max_delay_ms: default_max_delay_ms(),
            jitter: JitterStrategy::default(),
            node_timeout_ms: default_stage_timeout_ms(),
            environment: default_environment(),
        }
    }
}

impl ChainConfig {
    /// Creates a config with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the attempt ceiling.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the base delay.
    #[must_use]
    pub fn with_base_delay_ms(mut self, delay: u64) -> Self {
        self.base_delay_ms = delay;
        self
    }

    /// Sets the jitter strategy.
    #[must_use]
    pub fn with_jitter(mut self, jitter: JitterStrategy) -> Self {
        self.jitter = jitter;
        self
    }

    /// Sets the node timeout.
    #[must_use]
    pub fn with_node_timeout_ms(mut self, timeout: u64) -> Self {
        self.node_timeout_ms = timeout;
        self
    }

    /// Sets the default environment.
    #[must_use]
    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = environment.into();
        self
    }

    /// Retry policy for a node, honouring a `max_retries` override.
    #[must_use]
    pub fn retry_policy(&self, max_retries_override: Option<u32>) -> RetryPolicy {
        RetryPolicy::new()
            .with_max_retries(max_retries_override.unwrap_or(self.max_retries))
            .with_base_delay_ms(self.base_delay_ms)
            .with_backoff_factor(self.backoff_factor)
            .with_max_delay_ms(self.max_delay_ms)
            .with_jitter(self.jitter)
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, AlertflowError> {
    value
        .trim()
        .parse()
        .map_err(|_| AlertflowError::Validation(format!("{key}: cannot parse '{value}'")))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, AlertflowError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(AlertflowError::Validation(format!(
            "{key}: expected a boolean, got '{value}'"
        ))),
    }
}

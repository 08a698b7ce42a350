//! Engine Configuration
//!
//! The host application decides what happens when a compute function fails.
//! An interactive host usually wants [`ErrorPolicy::Contain`]: the failing
//! cell caches a fallback and the rest of the redraw carries on. A debug or
//! test harness may prefer [`ErrorPolicy::Fatal`], which logs and halts the
//! process at the first failure so the diagnostic is not buried.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Environment variable read by [`EngineConfig::from_env`].
pub const ERROR_POLICY_ENV: &str = "CELLGRAPH_ERROR_POLICY";

/// What the runtime does with a failed compute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPolicy {
    /// Log the failure, cache the fallback value, and mark the cell valid.
    #[default]
    Contain,

    /// Log the failure and exit the process immediately.
    Fatal,
}

impl ErrorPolicy {
    /// Parse a policy name as used in JSON and the environment.
    pub fn parse(name: &str) -> Result<Self, ConfigError> {
        match name.trim().to_ascii_lowercase().as_str() {
            "contain" => Ok(ErrorPolicy::Contain),
            "fatal" => Ok(ErrorPolicy::Fatal),
            _ => Err(ConfigError::UnknownPolicy(name.to_string())),
        }
    }
}

/// Runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Policy applied when a compute function fails.
    pub error_policy: ErrorPolicy,

    /// Number of diagnostics retained by the runtime. Older records are
    /// discarded first. Zero disables retention (events are still logged).
    pub max_diagnostics: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            error_policy: ErrorPolicy::Contain,
            max_diagnostics: 256,
        }
    }
}

impl EngineConfig {
    /// Parse a config from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Defaults, with the error policy overridden by `CELLGRAPH_ERROR_POLICY`
    /// when it is set.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Ok(name) = std::env::var(ERROR_POLICY_ENV) {
            config.error_policy = ErrorPolicy::parse(&name)?;
        }
        Ok(config)
    }

    /// Builder-style override of the error policy.
    pub fn with_error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.error_policy = policy;
        self
    }
}

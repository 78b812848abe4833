// SPDX-License-Identifier: MIT OR Apache-2.0
//! Configuration loading, validation, and merging for Agent Forge.
//!
//! This crate provides [`ForgeConfig`], the recognized runtime options,
//! together with helpers for loading from TOML files, applying `FORGE_*`
//! environment overrides, and producing advisory [`ConfigWarning`]s.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::Path;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur during configuration loading or validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The requested configuration file was not found.
    #[error("config file not found: {path}")]
    FileNotFound {
        /// Path that was requested.
        path: String,
    },

    /// The file could not be parsed as valid TOML.
    #[error("failed to parse config: {reason}")]
    ParseError {
        /// Human-readable parse error detail.
        reason: String,
    },

    /// Semantic validation failed (one or more problems).
    #[error("config validation failed: {reasons:?}")]
    ValidationError {
        /// Individual validation failure messages.
        reasons: Vec<String>,
    },
}

// ---------------------------------------------------------------------------
// Warnings
// ---------------------------------------------------------------------------

/// Advisory-level issues that do not prevent operation but deserve attention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigWarning {
    /// `max_repair_attempts` is zero; modules will never be repaired.
    RepairDisabled,
    /// The retry delay cap is unusually large.
    LargeRetryCap {
        /// Configured cap in milliseconds.
        cap_ms: u64,
    },
    /// Debug observability is enabled, which is costly outside incidents.
    DebugObservability,
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigWarning::RepairDisabled => {
                write!(f, "max_repair_attempts is 0; failed builds will never be repaired")
            }
            ConfigWarning::LargeRetryCap { cap_ms } => {
                write!(f, "retry_cap_ms is very large ({cap_ms} ms)")
            }
            ConfigWarning::DebugObservability => {
                write!(f, "observability_mode=debug enables verbose structured logs")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Config types
// ---------------------------------------------------------------------------

/// Default sandbox policy profile selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum PolicyProfileName {
    /// Stdlib-only, network blocked.
    #[default]
    Default,
    /// Adds http-client/testing/data-processing import categories.
    ModuleValidation,
    /// Allowlisted outbound domains for integration tests.
    IntegrationTest,
}

/// Observability verbosity mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum ObservabilityMode {
    /// Lean structured logging for steady-state operation.
    #[default]
    Shipping,
    /// Verbose structured logs + metrics for a bounded post-incident window.
    Debug,
}

/// Recognized runtime options for Agent Forge.
///
/// Every field has a spec-mandated default; a missing file or variable never
/// prevents startup.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(default)]
pub struct ForgeConfig {
    /// Maximum repair-loop iterations per build job.
    pub max_repair_attempts: u32,
    /// Maximum provider call attempts per preference.
    pub retry_max_attempts: u32,
    /// Base delay for exponential backoff, in milliseconds.
    pub retry_base_delay_ms: u64,
    /// Delay cap for exponential backoff, in milliseconds.
    pub retry_cap_ms: u64,
    /// Jitter fraction in `[0.0, 1.0]`.
    pub retry_jitter_fraction: f64,
    /// Default sandbox policy profile.
    pub policy_profile: PolicyProfileName,
    /// Default hop budget for new conversations.
    pub hop_budget_default: u32,
    /// Observability verbosity.
    pub observability_mode: ObservabilityMode,
}

impl Default for ForgeConfig {
    fn default() -> Self {
        Self {
            max_repair_attempts: 10,
            retry_max_attempts: 5,
            retry_base_delay_ms: 1_000,
            retry_cap_ms: 30_000,
            retry_jitter_fraction: 0.5,
            policy_profile: PolicyProfileName::Default,
            hop_budget_default: 5,
            observability_mode: ObservabilityMode::Shipping,
        }
    }
}

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Threshold above which the retry cap generates a warning (2 minutes).
const LARGE_RETRY_CAP_MS: u64 = 120_000;

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Load a [`ForgeConfig`] from an optional TOML file path.
///
/// * If `path` is `Some`, reads and parses the file.
/// * If `path` is `None`, returns [`ForgeConfig::default()`].
///
/// Environment variable overrides are applied on top in both cases.
///
/// # Errors
///
/// Returns [`ConfigError`] if the file is missing or unparseable.
pub fn load_config(path: Option<&Path>) -> Result<ForgeConfig, ConfigError> {
    let mut config = match path {
        Some(p) => {
            let content = std::fs::read_to_string(p).map_err(|_| ConfigError::FileNotFound {
                path: p.display().to_string(),
            })?;
            parse_toml(&content)?
        }
        None => ForgeConfig::default(),
    };
    apply_env_overrides(&mut config);
    Ok(config)
}

/// Parse a TOML string into a [`ForgeConfig`].
///
/// # Errors
///
/// Returns [`ConfigError::ParseError`] on malformed TOML.
pub fn parse_toml(content: &str) -> Result<ForgeConfig, ConfigError> {
    toml::from_str::<ForgeConfig>(content).map_err(|e| ConfigError::ParseError {
        reason: e.to_string(),
    })
}

// ---------------------------------------------------------------------------
// Env overrides
// ---------------------------------------------------------------------------

/// Apply environment variable overrides.
///
/// Recognised variables (unparseable values are ignored):
/// - `FORGE_MAX_REPAIR_ATTEMPTS`
/// - `FORGE_RETRY_MAX_ATTEMPTS`
/// - `FORGE_RETRY_BASE_DELAY_MS`
/// - `FORGE_RETRY_CAP_MS`
/// - `FORGE_RETRY_JITTER_FRACTION`
/// - `FORGE_POLICY_PROFILE` (`default` | `module_validation` | `integration_test`)
/// - `FORGE_HOP_BUDGET_DEFAULT`
/// - `FORGE_OBSERVABILITY_MODE` (`shipping` | `debug`)
pub fn apply_env_overrides(config: &mut ForgeConfig) {
    fn parse_var<T: std::str::FromStr>(name: &str) -> Option<T> {
        std::env::var(name).ok().and_then(|v| v.parse().ok())
    }

    if let Some(v) = parse_var("FORGE_MAX_REPAIR_ATTEMPTS") {
        config.max_repair_attempts = v;
    }
    if let Some(v) = parse_var("FORGE_RETRY_MAX_ATTEMPTS") {
        config.retry_max_attempts = v;
    }
    if let Some(v) = parse_var("FORGE_RETRY_BASE_DELAY_MS") {
        config.retry_base_delay_ms = v;
    }
    if let Some(v) = parse_var("FORGE_RETRY_CAP_MS") {
        config.retry_cap_ms = v;
    }
    if let Some(v) = parse_var("FORGE_RETRY_JITTER_FRACTION") {
        config.retry_jitter_fraction = v;
    }
    if let Ok(v) = std::env::var("FORGE_POLICY_PROFILE") {
        match v.as_str() {
            "default" => config.policy_profile = PolicyProfileName::Default,
            "module_validation" => config.policy_profile = PolicyProfileName::ModuleValidation,
            "integration_test" => config.policy_profile = PolicyProfileName::IntegrationTest,
            _ => {}
        }
    }
    if let Some(v) = parse_var("FORGE_HOP_BUDGET_DEFAULT") {
        config.hop_budget_default = v;
    }
    if let Ok(v) = std::env::var("FORGE_OBSERVABILITY_MODE") {
        match v.as_str() {
            "shipping" => config.observability_mode = ObservabilityMode::Shipping,
            "debug" => config.observability_mode = ObservabilityMode::Debug,
            _ => {}
        }
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate a parsed configuration, returning advisory warnings.
///
/// Hard errors (zero retry attempts, out-of-range jitter, zero hop budget)
/// are returned as a [`ConfigError::ValidationError`]; soft issues come back
/// as warnings.
pub fn validate_config(config: &ForgeConfig) -> Result<Vec<ConfigWarning>, ConfigError> {
    let mut errors: Vec<String> = Vec::new();
    let mut warnings: Vec<ConfigWarning> = Vec::new();

    if config.retry_max_attempts == 0 {
        errors.push("retry_max_attempts must be a positive integer".into());
    }
    if config.hop_budget_default == 0 {
        errors.push("hop_budget_default must be a positive integer".into());
    }
    if !(0.0..=1.0).contains(&config.retry_jitter_fraction) {
        errors.push(format!(
            "retry_jitter_fraction {} is outside [0.0, 1.0]",
            config.retry_jitter_fraction
        ));
    }
    if config.retry_cap_ms < config.retry_base_delay_ms {
        errors.push(format!(
            "retry_cap_ms ({}) must be >= retry_base_delay_ms ({})",
            config.retry_cap_ms, config.retry_base_delay_ms
        ));
    }

    if config.max_repair_attempts == 0 {
        warnings.push(ConfigWarning::RepairDisabled);
    }
    if config.retry_cap_ms > LARGE_RETRY_CAP_MS {
        warnings.push(ConfigWarning::LargeRetryCap {
            cap_ms: config.retry_cap_ms,
        });
    }
    if config.observability_mode == ObservabilityMode::Debug {
        warnings.push(ConfigWarning::DebugObservability);
    }

    if errors.is_empty() {
        Ok(warnings)
    } else {
        Err(ConfigError::ValidationError { reasons: errors })
    }
}

//! Controller configuration (`whisk.toml`).
//!
//! Every section and field has a default, so an empty file is a valid
//! configuration. Durations are written in compact form ("1s", "500ms").

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::duration::serde_str;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub balancer: BalancerConfig,
    pub health: HealthSettings,
    pub limits: LimitsConfig,
}

/// Scheduling and capacity settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BalancerConfig {
    /// Share of the fleet (taken from the end of the invoker list) that
    /// serves blackbox actions.
    pub blackbox_fraction: f64,
    /// Multiplier applied to each invoker's memory before rejecting a
    /// reservation. `1.0` means no over-commit.
    pub over_provision_factor: f64,
    /// Added to an action's time limit before the activation is timed out.
    #[serde(with = "serde_str")]
    pub timeout_grace: Duration,
    /// Upper bound on probes per scheduling decision; `0` means the pool
    /// size is the only bound.
    pub max_probes: usize,
}

impl Default for BalancerConfig {
    fn default() -> Self {
        Self {
            blackbox_fraction: 0.1,
            over_provision_factor: 1.0,
            timeout_grace: Duration::from_secs(60),
            max_probes: 0,
        }
    }
}

/// Heartbeat-driven health tracking settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthSettings {
    /// Interval at which invokers are expected to heartbeat.
    #[serde(with = "serde_str")]
    pub heartbeat_interval: Duration,
    /// Missed heartbeats before a healthy invoker becomes unhealthy.
    pub unhealthy_after_missed: u32,
    /// Missed heartbeats before an invoker becomes unresponsive.
    pub unresponsive_after_missed: u32,
    /// How often the monitor re-evaluates missed heartbeats.
    #[serde(with = "serde_str")]
    pub sweep_interval: Duration,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(1),
            unhealthy_after_missed: 3,
            unresponsive_after_missed: 10,
            sweep_interval: Duration::from_secs(1),
        }
    }
}

/// Platform bounds on per-action limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub min_memory_mb: u64,
    pub max_memory_mb: u64,
    #[serde(with = "serde_str")]
    pub min_timeout: Duration,
    #[serde(with = "serde_str")]
    pub max_timeout: Duration,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            min_memory_mb: 128,
            max_memory_mb: 512,
            min_timeout: Duration::from_millis(100),
            max_timeout: Duration::from_secs(300),
        }
    }
}

/// A configuration value outside its allowed range.
#[derive(Debug, thiserror::Error, PartialEq)]
#[error("invalid config value for {field}: {reason}")]
pub struct ConfigError {
    pub field: &'static str,
    pub reason: String,
}

impl ControllerConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        Ok(config)
    }

    pub fn from_toml_str(s: &str) -> anyhow::Result<Self> {
        let config: ControllerConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let b = &self.balancer;
        if !(0.0..=1.0).contains(&b.blackbox_fraction) {
            return Err(ConfigError {
                field: "balancer.blackbox_fraction",
                reason: format!("{} is not within 0.0..=1.0", b.blackbox_fraction),
            });
        }
        if !(b.over_provision_factor >= 1.0) {
            return Err(ConfigError {
                field: "balancer.over_provision_factor",
                reason: format!("{} must be at least 1.0", b.over_provision_factor),
            });
        }

        let h = &self.health;
        if h.unhealthy_after_missed == 0 {
            return Err(ConfigError {
                field: "health.unhealthy_after_missed",
                reason: "must be at least 1".to_string(),
            });
        }
        if h.unresponsive_after_missed <= h.unhealthy_after_missed {
            return Err(ConfigError {
                field: "health.unresponsive_after_missed",
                reason: format!(
                    "{} must exceed unhealthy_after_missed ({})",
                    h.unresponsive_after_missed, h.unhealthy_after_missed
                ),
            });
        }
        if h.heartbeat_interval.is_zero() {
            return Err(ConfigError {
                field: "health.heartbeat_interval",
                reason: "must be non-zero".to_string(),
            });
        }

        let l = &self.limits;
        if l.min_memory_mb > l.max_memory_mb {
            return Err(ConfigError {
                field: "limits.min_memory_mb",
                reason: "exceeds max_memory_mb".to_string(),
            });
        }
        if l.min_timeout > l.max_timeout {
            return Err(ConfigError {
                field: "limits.min_timeout",
                reason: "exceeds max_timeout".to_string(),
            });
        }
        Ok(())
    }
}

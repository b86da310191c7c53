//! Configuration management for Keywarden.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration for the Keywarden service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeywardenConfig {
    /// Admission policy configuration
    #[serde(default)]
    pub limiter: LimiterConfig,

    /// Blacklist sweep scheduling configuration
    #[serde(default)]
    pub sweep: SweepConfig,
}

/// Admission policy configuration.
///
/// The defaults reproduce the reference behavior: a one-minute window, a
/// blacklist threshold at four times the key's limit, and a 24-hour penalty.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Requests allowed per window for keys issued without an explicit limit
    #[serde(default = "default_limit")]
    pub default_limit: u64,

    /// Fixed window size in seconds, independent of per-key limits
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// Blacklist threshold as a multiple of the key's limit
    #[serde(default = "default_blacklist_multiplier")]
    pub blacklist_multiplier: u64,

    /// Blacklist penalty duration in seconds
    #[serde(default = "default_blacklist_duration_secs")]
    pub blacklist_duration_secs: u64,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            default_limit: default_limit(),
            window_secs: default_window_secs(),
            blacklist_multiplier: default_blacklist_multiplier(),
            blacklist_duration_secs: default_blacklist_duration_secs(),
        }
    }
}

fn default_limit() -> u64 {
    60
}

fn default_window_secs() -> u64 {
    60
}

fn default_blacklist_multiplier() -> u64 {
    4
}

fn default_blacklist_duration_secs() -> u64 {
    24 * 60 * 60
}

/// Blacklist sweep scheduling configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepConfig {
    /// Interval between bulk blacklist sweeps, in seconds
    #[serde(default = "default_sweep_interval_secs")]
    pub interval_secs: u64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_sweep_interval_secs(),
        }
    }
}

fn default_sweep_interval_secs() -> u64 {
    3600
}

impl KeywardenConfig {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> crate::error::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: KeywardenConfig = serde_yaml::from_str(&contents)
            .map_err(|e| crate::error::KeywardenError::Config(e.to_string()))?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = KeywardenConfig::default();
        assert_eq!(config.limiter.default_limit, 60);
        assert_eq!(config.limiter.window_secs, 60);
        assert_eq!(config.limiter.blacklist_multiplier, 4);
        assert_eq!(config.limiter.blacklist_duration_secs, 86400);
        assert_eq!(config.sweep.interval_secs, 3600);
    }

    #[test]
    fn test_parse_partial_config() {
        let yaml = r#"
limiter:
  window_secs: 30
  blacklist_multiplier: 2
"#;
        let config: KeywardenConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.limiter.window_secs, 30);
        assert_eq!(config.limiter.blacklist_multiplier, 2);
        // Untouched fields keep their defaults
        assert_eq!(config.limiter.default_limit, 60);
        assert_eq!(config.sweep.interval_secs, 3600);
    }

    #[test]
    fn test_parse_sweep_section() {
        let yaml = r#"
sweep:
  interval_secs: 600
"#;
        let config: KeywardenConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.sweep.interval_secs, 600);
        assert_eq!(config.limiter.window_secs, 60);
    }

    #[test]
    fn test_from_file_missing() {
        let result = KeywardenConfig::from_file("/nonexistent/keywarden.yaml");
        assert!(matches!(
            result,
            Err(crate::error::KeywardenError::Io(_))
        ));
    }
}

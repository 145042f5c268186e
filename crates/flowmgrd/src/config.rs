//! Daemon configuration.
//!
//! Every field has a default, so an empty YAML document (or no file at all)
//! is a valid configuration. Command line flags override file values.

use flow_types::SwitchId;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Id ranges handed out to flows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceConfig {
    pub cookie_min: u32,
    pub cookie_max: u32,
    pub meter_min: u32,
    pub meter_max: u32,
    pub transit_vlan_min: u16,
    pub transit_vlan_max: u16,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            cookie_min: 1,
            cookie_max: 128 * 1024,
            meter_min: 32,
            meter_max: 4095,
            transit_vlan_min: 2,
            transit_vlan_max: 4094,
        }
    }
}

/// Runtime feature toggles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureToggles {
    /// Allow cache sync to reinstall missing and remove stale rules.
    pub sync_rules: bool,
    /// Reinstall a switch's flow rules when it reconnects.
    pub reflow_on_switch_activation: bool,
}

impl Default for FeatureToggles {
    fn default() -> Self {
        Self {
            sync_rules: true,
            reflow_on_switch_activation: true,
        }
    }
}

/// One inter-switch link known to the standalone path computer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IslConfig {
    pub source_switch: SwitchId,
    pub src_port: u32,
    pub target_switch: SwitchId,
    pub dst_port: u32,
    #[serde(default)]
    pub latency: u64,
    /// Unlimited when absent.
    #[serde(default)]
    pub available_bandwidth: Option<i64>,
}

/// Top-level configuration for flowmgrd.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowMgrConfig {
    /// Number of partition workers.
    pub workers: usize,
    /// Deadline for switch acknowledgements of one operation.
    pub transaction_timeout_ms: u64,
    /// How often workers look for expired deadlines.
    pub sweep_interval_ms: u64,
    pub resources: ResourceConfig,
    pub features: FeatureToggles,
    pub isls: Vec<IslConfig>,
}

impl Default for FlowMgrConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            transaction_timeout_ms: 30_000,
            sweep_interval_ms: 1_000,
            resources: ResourceConfig::default(),
            features: FeatureToggles::default(),
            isls: Vec::new(),
        }
    }
}

impl FlowMgrConfig {
    /// Loads and validates a YAML configuration file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&text)
    }

    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        let config: FlowMgrConfig = if text.trim().is_empty() {
            FlowMgrConfig::default()
        } else {
            serde_yaml::from_str(text)?
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::Invalid("workers must be at least 1".to_string()));
        }
        if self.transaction_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "transaction_timeout_ms must be positive".to_string(),
            ));
        }
        if self.sweep_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "sweep_interval_ms must be positive".to_string(),
            ));
        }
        let r = &self.resources;
        if r.cookie_min == 0 || r.meter_min == 0 {
            return Err(ConfigError::Invalid(
                "cookie and meter ranges must start at 1 or above".to_string(),
            ));
        }
        if r.cookie_min > r.cookie_max || r.meter_min > r.meter_max {
            return Err(ConfigError::Invalid(
                "resource ranges must have min <= max".to_string(),
            ));
        }
        if r.transit_vlan_min == 0 || r.transit_vlan_min > r.transit_vlan_max || r.transit_vlan_max > 4094 {
            return Err(ConfigError::Invalid(format!(
                "transit vlan range {}-{} must be within 1-4094",
                r.transit_vlan_min, r.transit_vlan_max
            )));
        }
        Ok(())
    }

    pub fn transaction_timeout(&self) -> Duration {
        Duration::from_millis(self.transaction_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

//! spotgrid.toml configuration parser.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::duration::parse_duration;

/// Default tag key marking a group as controller-managed.
pub const DEFAULT_MANAGED_TAG_KEY: &str = "SpotGrid";
/// Default tag value marking a group as controller-managed.
pub const DEFAULT_MANAGED_TAG_VALUE: &str = "true";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FleetConfig {
    #[serde(default)]
    pub controller: ControllerConfig,
    #[serde(default)]
    pub provisioner: ProvisionerConfig,
    #[serde(default)]
    pub actions: ActionsConfig,
    #[serde(default)]
    pub recommender: RecommenderConfig,
    #[serde(default)]
    pub cloud: CloudConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ControllerConfig {
    pub region: String,
    /// Period of the fast classification loop.
    pub check_interval: String,
    /// Period of the slow rebalancing loop.
    pub reevaluate_interval: String,
    /// Number of concurrent action executors.
    pub workers: usize,
    /// Capacity of the task queue between collector and dispatcher.
    pub queue_size: usize,
    /// Delete controller-created launch configurations of groups that are
    /// no longer managed.
    pub cleanup_launch_configurations: bool,
    pub managed_tag: ManagedTag,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            region: "eu-west-1".to_string(),
            check_interval: "10s".to_string(),
            reevaluate_interval: "60s".to_string(),
            workers: 5,
            queue_size: 100,
            cleanup_launch_configurations: true,
            managed_tag: ManagedTag::default(),
        }
    }
}

impl ControllerConfig {
    pub fn check_interval(&self) -> Duration {
        parse_duration(&self.check_interval).unwrap_or(Duration::from_secs(10))
    }

    pub fn reevaluate_interval(&self) -> Duration {
        parse_duration(&self.reevaluate_interval).unwrap_or(Duration::from_secs(60))
    }
}

/// The key/value pair that selects controller-managed groups.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ManagedTag {
    pub key: String,
    pub value: String,
}

impl Default for ManagedTag {
    fn default() -> Self {
        Self {
            key: DEFAULT_MANAGED_TAG_KEY.to_string(),
            value: DEFAULT_MANAGED_TAG_VALUE.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProvisionerConfig {
    /// Sleep between spot fulfilment / instance state polls.
    pub poll_interval: String,
}

impl Default for ProvisionerConfig {
    fn default() -> Self {
        Self {
            poll_interval: "1s".to_string(),
        }
    }
}

impl ProvisionerConfig {
    pub fn poll_interval(&self) -> Duration {
        parse_duration(&self.poll_interval).unwrap_or(Duration::from_secs(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ActionsConfig {
    /// Sleep between group polls inside action executors.
    pub poll_interval: String,
    pub upscale_wait_iterations: u32,
    pub downscale_wait_iterations: u32,
}

impl Default for ActionsConfig {
    fn default() -> Self {
        Self {
            poll_interval: "1s".to_string(),
            upscale_wait_iterations: 10,
            downscale_wait_iterations: 32,
        }
    }
}

impl ActionsConfig {
    pub fn poll_interval(&self) -> Duration {
        parse_duration(&self.poll_interval).unwrap_or(Duration::from_secs(1))
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RecommenderBackend {
    #[default]
    Http,
    Static,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RecommenderConfig {
    pub backend: RecommenderBackend,
    /// Base URL of the recommender service (`http` backend).
    pub url: Option<String>,
    pub timeout: String,
    /// Recommendation table file (`static` backend).
    pub table: Option<PathBuf>,
}

impl Default for RecommenderConfig {
    fn default() -> Self {
        Self {
            backend: RecommenderBackend::Http,
            url: Some("http://127.0.0.1:9090".to_string()),
            timeout: "10s".to_string(),
            table: None,
        }
    }
}

impl RecommenderConfig {
    pub fn timeout(&self) -> Duration {
        parse_duration(&self.timeout).unwrap_or(Duration::from_secs(10))
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CloudBackend {
    #[default]
    Simulated,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CloudConfig {
    pub backend: CloudBackend,
    /// Seed file describing the simulated fleet.
    pub fleet: Option<PathBuf>,
}

impl FleetConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: FleetConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Scaffold a configuration for `region` using a simulated fleet and
    /// a static recommendation table.
    pub fn scaffold(region: &str) -> Self {
        FleetConfig {
            controller: ControllerConfig {
                region: region.to_string(),
                ..Default::default()
            },
            recommender: RecommenderConfig {
                backend: RecommenderBackend::Static,
                table: Some(PathBuf::from("fleet.toml")),
                ..Default::default()
            },
            cloud: CloudConfig {
                backend: CloudBackend::Simulated,
                fleet: Some(PathBuf::from("fleet.toml")),
            },
            ..Default::default()
        }
    }

    /// Reject values the controller cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let durations = [
            ("controller.check_interval", &self.controller.check_interval),
            ("controller.reevaluate_interval", &self.controller.reevaluate_interval),
            ("provisioner.poll_interval", &self.provisioner.poll_interval),
            ("actions.poll_interval", &self.actions.poll_interval),
            ("recommender.timeout", &self.recommender.timeout),
        ];
        for (field, value) in durations {
            if parse_duration(value).is_none() {
                return Err(ConfigError::Invalid(format!(
                    "{field}: cannot parse duration {value:?}"
                )));
            }
        }

        if self.controller.check_interval().is_zero()
            || self.controller.reevaluate_interval().is_zero()
        {
            return Err(ConfigError::Invalid(
                "polling intervals must be greater than zero".to_string(),
            ));
        }
        if self.controller.workers == 0 {
            return Err(ConfigError::Invalid(
                "controller.workers must be at least 1".to_string(),
            ));
        }
        if self.controller.queue_size == 0 {
            return Err(ConfigError::Invalid(
                "controller.queue_size must be at least 1".to_string(),
            ));
        }
        if self.controller.region.is_empty() {
            return Err(ConfigError::Invalid("controller.region is empty".to_string()));
        }
        if self.controller.managed_tag.key.is_empty() {
            return Err(ConfigError::Invalid(
                "controller.managed_tag.key is empty".to_string(),
            ));
        }

        match self.recommender.backend {
            RecommenderBackend::Http if self.recommender.url.is_none() => Err(
                ConfigError::Invalid("recommender.url is required for the http backend".to_string()),
            ),
            RecommenderBackend::Static if self.recommender.table.is_none() => Err(
                ConfigError::Invalid("recommender.table is required for the static backend".to_string()),
            ),
            _ => Ok(()),
        }
    }
}

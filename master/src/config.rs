//! Layered configuration: built-in defaults, overridden by an optional TOML
//! file, overridden by `SCANM_`-prefixed environment variables.

use config::{Config, Environment, File, FileFormat};
use scan_shared::config::{LoggingConfig, TransportConfig};
use serde::{Deserialize, Serialize};

use crate::error::{MasterError, MasterResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub tick_interval_secs: u64,
    pub max_concurrent_tasks: usize,
    pub queue_depth: usize,
    pub cron_lookahead_minutes: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: 1,
            max_concurrent_tasks: 10,
            queue_depth: 1000,
            cron_lookahead_minutes: 60 * 24,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    pub heartbeat_interval_secs: u64,
    pub liveness_multiplier: u32,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: 15,
            liveness_multiplier: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MasterConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

fn default_data_dir() -> String {
    "./data/master".to_string()
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            logging: LoggingConfig::default(),
            transport: TransportConfig::default(),
            scheduler: SchedulerConfig::default(),
            registry: RegistryConfig::default(),
            data_dir: default_data_dir(),
        }
    }
}

impl MasterConfig {
    pub fn load(config_path: Option<&str>) -> MasterResult<Self> {
        let defaults = toml::to_string(&MasterConfig::default())
            .map_err(|e| MasterError::Config(e.to_string()))?;

        let mut builder =
            Config::builder().add_source(File::from_str(&defaults, FileFormat::Toml));

        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path).required(false));
        }

        builder = builder.add_source(Environment::with_prefix("SCANM").separator("__"));

        let config = builder
            .build()
            .map_err(|e| MasterError::Config(e.to_string()))?;

        config
            .try_deserialize()
            .map_err(|e| MasterError::Config(e.to_string()))
    }
}

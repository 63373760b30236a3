//! Layered configuration mirroring `master::config`'s loader shape: built-in
//! defaults, optional TOML file, `SCANA_`-prefixed environment overrides.

use config::{Config, Environment, File, FileFormat};
use scan_shared::config::LoggingConfig;
use serde::{Deserialize, Serialize};

use crate::error::{AgentError, AgentResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MasterConnection {
    pub base_url: String,
    pub registration_retries: u32,
    pub registration_backoff_secs: u64,
}

impl Default for MasterConnection {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:7443".to_string(),
            registration_retries: 10,
            registration_backoff_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterConfig {
    pub initial: u32,
    pub min: u32,
    pub max: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterConfigs {
    pub alive_probe: LimiterConfig,
    pub port_scan: LimiterConfig,
    pub service_scan: LimiterConfig,
}

impl Default for LimiterConfigs {
    fn default() -> Self {
        Self {
            alive_probe: LimiterConfig { initial: 200, min: 20, max: 5000 },
            port_scan: LimiterConfig { initial: 500, min: 50, max: 5000 },
            service_scan: LimiterConfig { initial: 20, min: 5, max: 200 },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub master: MasterConnection,
    #[serde(default)]
    pub limiters: LimiterConfigs,
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,
    #[serde(default = "default_hostname")]
    pub hostname: String,
}

fn default_heartbeat_interval() -> u64 {
    15
}

fn default_hostname() -> String {
    hostname_or_unknown()
}

fn hostname_or_unknown() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown-agent".to_string())
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            logging: LoggingConfig::default(),
            master: MasterConnection::default(),
            limiters: LimiterConfigs::default(),
            heartbeat_interval_secs: default_heartbeat_interval(),
            hostname: default_hostname(),
        }
    }
}

impl AgentConfig {
    pub fn load(config_path: Option<&str>) -> AgentResult<Self> {
        let defaults = toml::to_string(&AgentConfig::default()).map_err(|e| AgentError::Config(e.to_string()))?;

        let mut builder = Config::builder().add_source(File::from_str(&defaults, FileFormat::Toml));
        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path).required(false));
        }
        builder = builder.add_source(Environment::with_prefix("SCANA").separator("__"));

        let config = builder.build().map_err(|e| AgentError::Config(e.to_string()))?;
        config.try_deserialize().map_err(|e| AgentError::Config(e.to_string()))
    }
}

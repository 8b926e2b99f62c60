//! Environment-variable configuration, loaded once at startup via
//! `dotenv` so a `.env` file works the same as exported shell variables.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

const DEFAULT_MOUNTROOT: &str = "/flocker";
const DEFAULT_LOOPBACK_ROOT: &str = "/var/lib/flocker/loopback";
const DEFAULT_TICK_INTERVAL_SECS: u64 = 10;
const DEFAULT_CONFIG_PATH: &str = "flocker-agent.json";

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub hostname: String,
    pub mountroot: PathBuf,
    pub loopback_root: PathBuf,
    pub tick_interval: Duration,
    pub config_path: PathBuf,
}

impl AgentConfig {
    /// Load configuration from the environment, applying `.env` first if
    /// present.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();

        let hostname = std::env::var("FLOCKER_HOSTNAME")
            .map_err(|_| ConfigError::MissingVar("FLOCKER_HOSTNAME"))?;

        let mountroot = std::env::var("FLOCKER_MOUNTROOT")
            .unwrap_or_else(|_| DEFAULT_MOUNTROOT.to_string())
            .into();

        let loopback_root = std::env::var("FLOCKER_LOOPBACK_ROOT")
            .unwrap_or_else(|_| DEFAULT_LOOPBACK_ROOT.to_string())
            .into();

        let tick_interval_secs = match std::env::var("FLOCKER_TICK_INTERVAL_SECS") {
            Ok(value) => value
                .parse::<u64>()
                .map_err(|_| ConfigError::InvalidVar {
                    name: "FLOCKER_TICK_INTERVAL_SECS",
                    value,
                })?,
            Err(_) => DEFAULT_TICK_INTERVAL_SECS,
        };

        let config_path = std::env::var("FLOCKER_CONFIG_PATH")
            .unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string())
            .into();

        Ok(Self {
            hostname,
            mountroot,
            loopback_root,
            tick_interval: Duration::from_secs(tick_interval_secs),
            config_path,
        })
    }
}

//! Service configuration: environment variables plus a JSON servers file

use serde::{Deserialize, Serialize};
use thiserror::Error;

use neor_types::ServerDescriptor;

use crate::sweeper::DEFAULT_SWEEP_INTERVAL;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("environment variable {0} is not set")]
    MissingVar(&'static str),
    #[error("environment variable {var} is invalid: {reason}")]
    InvalidVar { var: &'static str, reason: String },
    #[error("failed to read servers file {path}: {source}")]
    ServersFile {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse servers file {path}: {source}")]
    ServersFormat {
        path: String,
        source: serde_json::Error,
    },
    #[error("servers file {0} lists no servers")]
    NoServers(String),
}

/// Runtime configuration of the provisioning service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Postgres connection string (ledger + cache).
    pub database_url: String,
    /// Path to the JSON servers file.
    #[serde(default = "default_servers_file")]
    pub servers_file: String,
    /// Seconds between expiry sweep cycles.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Domain of the synthetic per-user owner emails.
    #[serde(default = "default_email_domain")]
    pub email_domain: String,
    /// Per-operation timeout on the management channel, in seconds.
    #[serde(default = "default_channel_timeout_secs")]
    pub channel_timeout_secs: u64,
}

fn default_servers_file() -> String {
    "servers.json".to_string()
}

fn default_sweep_interval_secs() -> u64 {
    DEFAULT_SWEEP_INTERVAL.as_secs()
}

fn default_email_domain() -> String {
    "neor.vpn".to_string()
}

fn default_channel_timeout_secs() -> u64 {
    10
}

impl ServiceConfig {
    /// Build the configuration from `DATABASE_URL`, `NEOR_SERVERS_FILE`,
    /// `NEOR_SWEEP_INTERVAL_SECS`, `NEOR_EMAIL_DOMAIN` and
    /// `NEOR_CHANNEL_TIMEOUT_SECS`. Only `DATABASE_URL` is required.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            database_url: std::env::var("DATABASE_URL")
                .map_err(|_| ConfigError::MissingVar("DATABASE_URL"))?,
            servers_file: std::env::var("NEOR_SERVERS_FILE")
                .unwrap_or_else(|_| default_servers_file()),
            sweep_interval_secs: parse_var("NEOR_SWEEP_INTERVAL_SECS")?
                .unwrap_or_else(default_sweep_interval_secs),
            email_domain: std::env::var("NEOR_EMAIL_DOMAIN")
                .unwrap_or_else(|_| default_email_domain()),
            channel_timeout_secs: parse_var("NEOR_CHANNEL_TIMEOUT_SECS")?
                .unwrap_or_else(default_channel_timeout_secs),
        })
    }

    /// Load and validate the servers file.
    pub fn load_servers(&self) -> Result<Vec<ServerDescriptor>, ConfigError> {
        let raw =
            std::fs::read_to_string(&self.servers_file).map_err(|source| ConfigError::ServersFile {
                path: self.servers_file.clone(),
                source,
            })?;
        let servers: Vec<ServerDescriptor> =
            serde_json::from_str(&raw).map_err(|source| ConfigError::ServersFormat {
                path: self.servers_file.clone(),
                source,
            })?;
        if servers.is_empty() {
            return Err(ConfigError::NoServers(self.servers_file.clone()));
        }
        Ok(servers)
    }
}

fn parse_var(var: &'static str) -> Result<Option<u64>, ConfigError> {
    match std::env::var(var) {
        Ok(raw) => raw
            .parse()
            .map(Some)
            .map_err(|e: std::num::ParseIntError| ConfigError::InvalidVar {
                var,
                reason: e.to_string(),
            }),
        Err(_) => Ok(None),
    }
}

//! Server configuration, read from the environment.

use std::net::SocketAddr;

use stockwire_events::{ConfigError, NotifierConfig};

pub const ENV_BIND: &str = "STOCKWIRE_BIND";
pub const DEFAULT_BIND: &str = "0.0.0.0:4567";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    pub notifier: NotifierConfig,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let raw = lookup(ENV_BIND).unwrap_or_else(|| DEFAULT_BIND.to_string());
        let bind = raw.trim().parse::<SocketAddr>().map_err(|e| ConfigError::InvalidValue {
            key: ENV_BIND.to_string(),
            value: raw.clone(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            bind,
            notifier: NotifierConfig::from_lookup(&lookup)?,
        })
    }
}

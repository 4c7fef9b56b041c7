//! Notifier configuration (timers, queue sizes, eviction policy).

use std::time::Duration;

use thiserror::Error;

pub const ENV_HEARTBEAT_SECS: &str = "STOCKWIRE_HEARTBEAT_SECS";
pub const ENV_REAPER_SECS: &str = "STOCKWIRE_REAPER_SECS";
pub const ENV_STALE_TIMEOUT_SECS: &str = "STOCKWIRE_STALE_TIMEOUT_SECS";
pub const ENV_SEND_TIMEOUT_SECS: &str = "STOCKWIRE_SEND_TIMEOUT_SECS";
pub const ENV_CLIENT_QUEUE: &str = "STOCKWIRE_CLIENT_QUEUE";
pub const ENV_MAX_CONNECTION_AGE_SECS: &str = "STOCKWIRE_MAX_CONNECTION_AGE_SECS";

/// Longest accepted value for any configured duration (one year). Timers add
/// these to the current instant, which must not overflow.
pub const MAX_DURATION: Duration = Duration::from_secs(365 * 24 * 60 * 60);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment value could not be parsed.
    #[error("invalid value for {key}: '{value}' ({reason})")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    /// Values parsed but do not make sense together.
    #[error("invalid notifier configuration: {0}")]
    Constraint(String),
}

/// Notifier configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifierConfig {
    /// How often every client receives a heartbeat frame
    pub heartbeat_interval: Duration,
    /// How often the reaper sweeps the registry
    pub reaper_interval: Duration,
    /// Idle time after which a client counts as stale
    pub stale_timeout: Duration,
    /// Upper bound on a single transport write
    pub send_timeout: Duration,
    /// Frames buffered per client before it counts as too slow
    pub client_queue_capacity: usize,
    /// Optional absolute connection lifetime cap (disabled when `None`)
    pub max_connection_age: Option<Duration>,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(15),
            reaper_interval: Duration::from_secs(30),
            stale_timeout: Duration::from_secs(60),
            send_timeout: Duration::from_secs(5),
            client_queue_capacity: 64,
            max_connection_age: None,
        }
    }
}

impl NotifierConfig {
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_reaper_interval(mut self, interval: Duration) -> Self {
        self.reaper_interval = interval;
        self
    }

    pub fn with_stale_timeout(mut self, timeout: Duration) -> Self {
        self.stale_timeout = timeout;
        self
    }

    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    pub fn with_client_queue_capacity(mut self, capacity: usize) -> Self {
        self.client_queue_capacity = capacity;
        self
    }

    pub fn with_max_connection_age(mut self, age: Duration) -> Self {
        self.max_connection_age = Some(age);
        self
    }

    /// Load from the process environment, falling back to defaults for unset keys.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using an arbitrary key lookup (environment, file, test map).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        if let Some(secs) = parse_secs(&lookup, ENV_HEARTBEAT_SECS)? {
            cfg.heartbeat_interval = secs;
        }
        if let Some(secs) = parse_secs(&lookup, ENV_REAPER_SECS)? {
            cfg.reaper_interval = secs;
        }
        if let Some(secs) = parse_secs(&lookup, ENV_STALE_TIMEOUT_SECS)? {
            cfg.stale_timeout = secs;
        }
        if let Some(secs) = parse_secs(&lookup, ENV_SEND_TIMEOUT_SECS)? {
            cfg.send_timeout = secs;
        }
        if let Some(raw) = lookup(ENV_CLIENT_QUEUE) {
            cfg.client_queue_capacity = raw.trim().parse().map_err(|e| ConfigError::InvalidValue {
                key: ENV_CLIENT_QUEUE.to_string(),
                value: raw.clone(),
                reason: format!("{e}"),
            })?;
        }
        cfg.max_connection_age = parse_secs(&lookup, ENV_MAX_CONNECTION_AGE_SECS)?;

        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject configurations that would evict healthy clients or spin timers.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let durations = [
            ("heartbeat_interval", Some(self.heartbeat_interval)),
            ("reaper_interval", Some(self.reaper_interval)),
            ("stale_timeout", Some(self.stale_timeout)),
            ("send_timeout", Some(self.send_timeout)),
            ("max_connection_age", self.max_connection_age),
        ];
        for (name, value) in durations {
            let Some(value) = value else { continue };
            if value.is_zero() {
                return Err(ConfigError::Constraint(format!("{name} must be non-zero")));
            }
            if value > MAX_DURATION {
                return Err(ConfigError::Constraint(format!(
                    "{name} ({}s) exceeds the {}s limit",
                    value.as_secs(),
                    MAX_DURATION.as_secs()
                )));
            }
        }
        if self.client_queue_capacity == 0 {
            return Err(ConfigError::Constraint(
                "client_queue_capacity must be at least 1".to_string(),
            ));
        }
        // An idle but healthy client is only touched by heartbeats.
        if self.heartbeat_interval >= self.stale_timeout {
            return Err(ConfigError::Constraint(format!(
                "heartbeat_interval ({:?}) must be shorter than stale_timeout ({:?})",
                self.heartbeat_interval, self.stale_timeout
            )));
        }
        Ok(())
    }
}

fn parse_secs<F>(lookup: &F, key: &str) -> Result<Option<Duration>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    let secs: u64 = raw.trim().parse().map_err(|e| ConfigError::InvalidValue {
        key: key.to_string(),
        value: raw.clone(),
        reason: format!("{e}"),
    })?;
    Ok(Some(Duration::from_secs(secs)))
}

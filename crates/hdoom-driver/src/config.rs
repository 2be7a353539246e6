use std::time::Duration;

use hdoom_protocol::FIFO_SIZE;
use thiserror::Error;

pub const PING_INTERVAL_ENV: &str = "HDOOM_PING_INTERVAL";
pub const STALL_WARN_ENV: &str = "HDOOM_STALL_WARN_MS";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid {name}={value:?}: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: &'static str,
    },
}

/// Per-device driver settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceConfig {
    /// Commands between two automatic `PING_ASYNC` markers. Must stay below the FIFO depth so a
    /// full FIFO always holds a marker that will eventually report progress.
    pub ping_interval: u32,
    /// How long a wait on the device may take before it is reported.
    pub stall_warning: Duration,
    /// Front-end microcode uploaded on attach. Empty for devices that boot with their own.
    pub microcode: Vec<u32>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            ping_interval: FIFO_SIZE / 4,
            stall_warning: Duration::from_secs(1),
            microcode: Vec::new(),
        }
    }
}

impl DeviceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds a config from defaults overridden by whatever `lookup` returns.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(raw) = lookup(PING_INTERVAL_ENV) {
            config.ping_interval = parse_u32(PING_INTERVAL_ENV, &raw)?;
        }
        if let Some(raw) = lookup(STALL_WARN_ENV) {
            let ms = parse_u32(STALL_WARN_ENV, &raw)?;
            config.stall_warning = Duration::from_millis(u64::from(ms));
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ping_interval == 0 || self.ping_interval >= FIFO_SIZE {
            return Err(ConfigError::Invalid {
                name: "ping_interval",
                value: self.ping_interval.to_string(),
                reason: "must be between 1 and the FIFO depth",
            });
        }
        if self.stall_warning.is_zero() {
            return Err(ConfigError::Invalid {
                name: "stall_warning",
                value: format!("{:?}", self.stall_warning),
                reason: "must be non-zero",
            });
        }
        Ok(())
    }
}

fn parse_u32(name: &'static str, raw: &str) -> Result<u32, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::Invalid {
        name,
        value: raw.to_owned(),
        reason: "not an unsigned integer",
    })
}

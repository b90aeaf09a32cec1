use event_bus::consumer_retry::{RetryConfig, RetryConfigError};
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Which transport the service runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusKind {
    InMemory,
    Nats,
}

impl FromStr for BusKind {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_lowercase().as_str() {
            "inmemory" => Ok(BusKind::InMemory),
            "nats" => Ok(BusKind::Nats),
            _ => Err(ConfigError::Invalid {
                key: "BUS_TYPE",
                value: value.to_string(),
                reason: "must be 'inmemory' or 'nats'".to_string(),
            }),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("invalid {key}={value}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("invalid retry configuration: {0}")]
    Retry(#[from] RetryConfigError),
}

/// Application configuration parsed from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub bus_type: BusKind,
    pub nats_url: String,
    pub gateway_addr: String,
    pub host: String,
    pub port: u16,
    pub retry: RetryConfig,
    pub consumer_group_prefix: String,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build and validate the config from any key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let or_default =
            |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let bus_type: BusKind = or_default("BUS_TYPE", "inmemory").parse()?;

        let nats_url = or_default("NATS_URL", "nats://localhost:4222");

        let gateway_addr = lookup("GATEWAY_ADDR")
            .filter(|addr| !addr.trim().is_empty())
            .ok_or(ConfigError::Missing("GATEWAY_ADDR"))?;

        let host = or_default("HOST", "0.0.0.0");
        let port: u16 = parse("PORT", or_default("PORT", "8080"))?;

        let retry = RetryConfig {
            max_retries: parse("RETRY_MAX_RETRIES", or_default("RETRY_MAX_RETRIES", "10"))?,
            initial_interval: Duration::from_millis(parse(
                "RETRY_INITIAL_INTERVAL_MS",
                or_default("RETRY_INITIAL_INTERVAL_MS", "100"),
            )?),
            max_interval: Duration::from_millis(parse(
                "RETRY_MAX_INTERVAL_MS",
                or_default("RETRY_MAX_INTERVAL_MS", "1000"),
            )?),
            multiplier: parse("RETRY_MULTIPLIER", or_default("RETRY_MULTIPLIER", "2.0"))?,
        };
        retry.validate()?;

        let consumer_group_prefix = or_default("CONSUMER_GROUP_PREFIX", "svc-tickets");
        if consumer_group_prefix.is_empty() {
            return Err(ConfigError::Invalid {
                key: "CONSUMER_GROUP_PREFIX",
                value: consumer_group_prefix,
                reason: "must not be empty".to_string(),
            });
        }

        Ok(Config {
            bus_type,
            nats_url,
            gateway_addr,
            host,
            port,
            retry,
            consumer_group_prefix,
        })
    }
}

fn parse<T>(key: &'static str, value: String) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|e: T::Err| ConfigError::Invalid {
        key,
        reason: e.to_string(),
        value,
    })
}

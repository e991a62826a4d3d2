//! Environment-driven configuration.

use std::env;
use std::net::SocketAddr;
use std::num::NonZeroUsize;

use crate::aggregation::AggregatorConfig;
use crate::history::DEFAULT_HISTORY_CAPACITY;

/// Default HTTP port if not specified via environment variable.
pub const DEFAULT_PORT: u16 = 3000;

/// Default depth of the ingest channel.
pub const DEFAULT_CHANNEL_CAPACITY: NonZeroUsize = NonZeroUsize::new(256).unwrap();

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{var}: cannot parse {value:?}")]
    Invalid { var: &'static str, value: String },

    #[error("{var}: must be at least 1")]
    Zero { var: &'static str },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Port for the HTTP read API.
    pub port: u16,

    pub aggregator: AggregatorConfig,

    /// Capacity of the channel between transports and the ingest task.
    pub channel_capacity: NonZeroUsize,

    /// Address for the newline-delimited TCP telemetry feed, if enabled.
    pub feed_addr: Option<SocketAddr>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            aggregator: AggregatorConfig::default(),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            feed_addr: None,
        }
    }
}

impl Config {
    /// Read configuration from `CROWDGUARD_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    /// Build configuration from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let port = parse(&lookup, "CROWDGUARD_PORT")?.unwrap_or(defaults.port);
        let history_capacity = parse_non_zero(&lookup, "CROWDGUARD_HISTORY_CAPACITY")?
            .unwrap_or(DEFAULT_HISTORY_CAPACITY);
        let event_log_cap = parse_non_zero(&lookup, "CROWDGUARD_EVENT_LOG_CAP")?;
        let channel_capacity = parse_non_zero(&lookup, "CROWDGUARD_CHANNEL_CAPACITY")?
            .unwrap_or(defaults.channel_capacity);
        let feed_addr = parse(&lookup, "CROWDGUARD_FEED_ADDR")?;

        Ok(Self {
            port,
            aggregator: AggregatorConfig {
                history_capacity,
                event_log_cap,
            },
            channel_capacity,
            feed_addr,
        })
    }
}

fn parse<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(var) {
        None => Ok(None),
        Some(value) => match value.trim().parse() {
            Ok(parsed) => Ok(Some(parsed)),
            Err(_) => Err(ConfigError::Invalid { var, value }),
        },
    }
}

fn parse_non_zero(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<NonZeroUsize>, ConfigError> {
    match parse::<usize>(lookup, var)? {
        None => Ok(None),
        Some(n) => NonZeroUsize::new(n).map(Some).ok_or(ConfigError::Zero { var }),
    }
}

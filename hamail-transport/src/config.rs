use std::{collections::HashMap, fmt, str::FromStr, time::Duration};

use hamail_common::ConnectTarget;
use serde::{Deserialize, Serialize};

use crate::{error::ConfigError, grouping::GroupingStrategy};

/// Keys understood by [`PoolConfig::from_properties`].
pub mod properties {
    pub const POOL_SIZE: &str = "mail.transport.pool-size";
    pub const SENDER_STRATEGY: &str = "mail.transport.sender-strategy";
    /// Seconds.
    pub const CONNECT_RETRY_PERIOD: &str = "mail.transport.connect-retry-period";
    /// Seconds, `0` waits forever.
    pub const CONNECT_TIMEOUT: &str = "mail.transport.connect-timeout";
    pub const PROTOCOL: &str = "mail.transport.protocol";
    pub const HOST: &str = "mail.host";
    pub const PORT: &str = "mail.port";
    pub const USER: &str = "mail.user";
    pub const PASSWORD: &str = "mail.password";
}

const fn default_pool_size() -> usize {
    1
}

const fn default_connect_retry_period_ms() -> u64 {
    60_000
}

fn default_protocol() -> String {
    "smtp".to_string()
}

/// Pool sizing, timing and target configuration for a [`TransportProxy`].
///
/// [`TransportProxy`]: crate::TransportProxy
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Connections (and send workers) per configured host
    #[serde(default = "default_pool_size")]
    pub pool_size_per_host: usize,

    /// Delay between connection attempts of one slot
    ///
    /// Default: 60 seconds
    #[serde(default = "default_connect_retry_period_ms")]
    pub connect_retry_period_ms: u64,

    /// How long `connect` waits for the first connection, `0` waits forever
    #[serde(default)]
    pub connect_timeout_ms: u64,

    /// Protocol of the underlying transports
    #[serde(default = "default_protocol")]
    pub protocol: String,

    /// Hosts, assigned round-robin to connection slots
    #[serde(default)]
    pub hosts: Vec<String>,

    #[serde(default)]
    pub port: Option<u16>,

    #[serde(default)]
    pub user: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    #[serde(default)]
    pub grouping: GroupingStrategy,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            pool_size_per_host: default_pool_size(),
            connect_retry_period_ms: default_connect_retry_period_ms(),
            connect_timeout_ms: 0,
            protocol: default_protocol(),
            hosts: Vec::new(),
            port: None,
            user: None,
            password: None,
            grouping: GroupingStrategy::default(),
        }
    }
}

impl fmt::Debug for PoolConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolConfig")
            .field("pool_size_per_host", &self.pool_size_per_host)
            .field("connect_retry_period_ms", &self.connect_retry_period_ms)
            .field("connect_timeout_ms", &self.connect_timeout_ms)
            .field("protocol", &self.protocol)
            .field("hosts", &self.hosts)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("grouping", &self.grouping)
            .finish()
    }
}

impl PoolConfig {
    #[must_use]
    pub fn with_hosts<I, S>(mut self, hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.hosts = hosts.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub const fn retry_period(&self) -> Duration {
        Duration::from_millis(self.connect_retry_period_ms)
    }

    /// `None` means wait forever.
    #[must_use]
    pub const fn connect_timeout(&self) -> Option<Duration> {
        if self.connect_timeout_ms == 0 {
            None
        } else {
            Some(Duration::from_millis(self.connect_timeout_ms))
        }
    }

    /// Number of connection slots, and of send workers.
    #[must_use]
    pub const fn total_slots(&self) -> usize {
        self.pool_size_per_host.saturating_mul(self.hosts.len())
    }

    /// Connection target for slot `index`; hosts are assigned round-robin.
    #[must_use]
    pub fn target_for(&self, index: usize) -> Option<ConnectTarget> {
        if self.hosts.is_empty() {
            return None;
        }

        Some(ConnectTarget {
            protocol: self.protocol.clone(),
            host: self.hosts[index % self.hosts.len()].clone(),
            port: self.port,
            user: self.user.clone(),
            password: self.password.clone(),
        })
    }

    ///
    /// Check the configuration can back a pool.
    ///
    /// # Errors
    /// If the pool size is zero, no host is configured, or the slot count
    /// does not fit in a `usize`.
    ///
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool_size_per_host == 0 {
            return Err(ConfigError::InvalidPoolSize(self.pool_size_per_host));
        }

        if self.hosts.is_empty() || self.hosts.iter().any(|h| h.trim().is_empty()) {
            return Err(ConfigError::MissingHost);
        }

        if self
            .pool_size_per_host
            .checked_mul(self.hosts.len())
            .is_none()
        {
            return Err(ConfigError::InvalidPoolSize(self.pool_size_per_host));
        }

        Ok(())
    }

    ///
    /// Build a configuration from a flat, string keyed property source.
    ///
    /// Hosts are read from `mail.<protocol>.host`, falling back to
    /// `mail.host`, as a comma separated list. Periods are in seconds.
    ///
    /// # Errors
    /// If a numeric value does not parse, the grouping strategy is unknown, or
    /// the resulting configuration does not [`validate`](Self::validate).
    ///
    pub fn from_properties(props: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let protocol = props
            .get(properties::PROTOCOL)
            .map_or_else(default_protocol, |p| p.trim().to_string());

        let hosts = props
            .get(&format!("mail.{protocol}.host"))
            .filter(|h| !h.trim().is_empty())
            .or_else(|| props.get(properties::HOST))
            .map(|h| split_hosts(h))
            .unwrap_or_default();

        let config = Self {
            pool_size_per_host: parse_or(props, properties::POOL_SIZE, default_pool_size())?,
            connect_retry_period_ms: parse_or(
                props,
                properties::CONNECT_RETRY_PERIOD,
                default_connect_retry_period_ms() / 1000,
            )?
            .saturating_mul(1000),
            connect_timeout_ms: parse_or(props, properties::CONNECT_TIMEOUT, 0u64)?
                .saturating_mul(1000),
            port: props
                .get(&format!("mail.{protocol}.port"))
                .or_else(|| props.get(properties::PORT))
                .map(|p| parse_value(properties::PORT, p))
                .transpose()?,
            user: props
                .get(&format!("mail.{protocol}.user"))
                .or_else(|| props.get(properties::USER))
                .cloned(),
            password: props.get(properties::PASSWORD).cloned(),
            grouping: props
                .get(properties::SENDER_STRATEGY)
                .map(|s| s.parse::<GroupingStrategy>())
                .transpose()?
                .unwrap_or_default(),
            protocol,
            hosts,
        };

        config.validate()?;
        Ok(config)
    }
}

/// Splits a comma separated host list, dropping blanks.
pub(crate) fn split_hosts(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        })
}

fn parse_or<T: FromStr>(
    props: &HashMap<String, String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError> {
    props
        .get(key)
        .map_or(Ok(default), |value| parse_value(key, value))
}

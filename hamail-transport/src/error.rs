//! Errors surfaced synchronously to callers of the proxy.
//!
//! Failures of individual deliveries never show up here: once a message has
//! been handed to a send worker its outcome is only logged.

use std::time::Duration;

use hamail_common::TransportError;
use thiserror::Error;

/// Invalid or incomplete pool configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Pool size {0} is out of range")]
    InvalidPoolSize(usize),

    #[error("No transport host specified")]
    MissingHost,

    #[error("Could not find an appropriate {0} provider")]
    NoProvider(String),

    #[error("Unknown grouping strategy: {0}")]
    UnknownStrategy(String),

    #[error("Invalid value for {key}: {value:?}")]
    InvalidValue { key: String, value: String },
}

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to create {protocol} transport: {source}")]
    Provider {
        protocol: String,
        #[source]
        source: TransportError,
    },

    #[error("Transport not connected")]
    NotConnected,

    #[error("Transport already connected")]
    AlreadyConnected,

    #[error("Connect timeout ({} ms) exceeded", .0.as_millis())]
    ConnectTimeout(Duration),

    #[error("Message contains no recipients")]
    NoRecipients,

    #[error("Transport pool is closed")]
    Closed,
}

impl ProxyError {
    /// Returns `true` for errors raised while building the proxy.
    #[must_use]
    pub const fn is_config(&self) -> bool {
        matches!(self, Self::Config(_) | Self::Provider { .. })
    }
}

impl From<ProxyError> for TransportError {
    fn from(error: ProxyError) -> Self {
        match error {
            ProxyError::Config(_) | ProxyError::Provider { .. } => {
                Self::Configuration(error.to_string())
            }
            ProxyError::NotConnected | ProxyError::Closed => Self::NotConnected,
            ProxyError::ConnectTimeout(_) => Self::Connect {
                target: "transport pool".to_string(),
                reason: error.to_string(),
            },
            ProxyError::AlreadyConnected | ProxyError::NoRecipients => {
                Self::Protocol(error.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            ProxyError::ConnectTimeout(Duration::from_secs(5)).to_string(),
            "Connect timeout (5000 ms) exceeded"
        );
        assert_eq!(
            ProxyError::from(ConfigError::NoProvider("smtp".to_string())).to_string(),
            "Configuration error: Could not find an appropriate smtp provider"
        );
    }

    #[test]
    fn test_error_classification() {
        assert!(ProxyError::from(ConfigError::MissingHost).is_config());
        assert!(!ProxyError::NoRecipients.is_config());
    }

    #[test]
    fn test_transport_error_conversion() {
        let err: TransportError = ProxyError::NotConnected.into();
        assert!(matches!(err, TransportError::NotConnected));

        let err: TransportError = ProxyError::ConnectTimeout(Duration::from_millis(10)).into();
        assert!(matches!(err, TransportError::Connect { .. }));
    }
}

//! Error types for the transport collaborator boundary.
//!
//! `TransportError` covers connection management (connect, close), while
//! `DeliveryError` classifies a failed delivery so that a pool can decide
//! whether the connection it used is still healthy.

use std::io;

use thiserror::Error;

use crate::address::Address;

/// Errors produced while parsing addresses.
#[derive(Debug, Error)]
pub enum AddressError {
    #[error("Invalid address {input:?}: {reason}")]
    Invalid { input: String, reason: String },

    #[error("Expected exactly one address in {input:?}, found {count}")]
    NotSingle { input: String, count: usize },
}

/// Errors produced while opening or closing a transport connection.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The remote end could not be reached or refused the session.
    #[error("Connection to {target} failed: {reason}")]
    Connect { target: String, reason: String },

    /// Credentials were rejected.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// TLS negotiation failed.
    #[error("TLS error: {0}")]
    Tls(String),

    /// The remote end violated the wire protocol.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The transport could not be built from its configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// An operation required a connection that is not open.
    #[error("Transport is not connected")]
    NotConnected,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Outcome classification of a failed delivery attempt.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The session is fine but some recipients were refused.
    #[error("Recipients rejected ({}): {reason}", crate::address::AddressList(.rejected.clone()))]
    RecipientsRejected {
        rejected: Vec<Address>,
        reason: String,
    },

    /// The connection itself is unusable and has to be re-established.
    #[error("Connection broken: {0}")]
    ConnectionBroken(String),

    /// Anything else; the connection is assumed to still be usable.
    #[error("Unexpected delivery failure: {0}")]
    Unexpected(String),
}

impl DeliveryError {
    #[must_use]
    pub const fn is_connection_broken(&self) -> bool {
        matches!(self, Self::ConnectionBroken(_))
    }

    #[must_use]
    pub const fn is_recipient_rejection(&self) -> bool {
        matches!(self, Self::RecipientsRejected { .. })
    }
}

impl From<TransportError> for DeliveryError {
    fn from(error: TransportError) -> Self {
        match error {
            TransportError::Auth(_)
            | TransportError::Protocol(_)
            | TransportError::Configuration(_) => {
                Self::Unexpected(error.to_string())
            }
            TransportError::Connect { .. }
            | TransportError::Tls(_)
            | TransportError::NotConnected
            | TransportError::Io(_) => Self::ConnectionBroken(error.to_string()),
        }
    }
}

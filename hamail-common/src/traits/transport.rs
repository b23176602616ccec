use std::{fmt, sync::Arc};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
    address::Address,
    error::{DeliveryError, TransportError},
    event::TransportListener,
    message::Message,
};

/// Where, and as whom, a transport connection is opened.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectTarget {
    pub protocol: String,
    pub host: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl ConnectTarget {
    #[must_use]
    pub fn new(protocol: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            protocol: protocol.into(),
            host: host.into(),
            ..Default::default()
        }
    }

    /// Same port and credentials, different host.
    #[must_use]
    pub fn with_host(&self, host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..self.clone()
        }
    }
}

impl fmt::Display for ConnectTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://", self.protocol)?;
        if let Some(user) = &self.user {
            write!(f, "{user}@")?;
        }
        f.write_str(&self.host)?;
        if let Some(port) = self.port {
            write!(f, ":{port}")?;
        }
        Ok(())
    }
}

// The password must never reach a log line.
impl fmt::Debug for ConnectTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectTarget")
            .field("protocol", &self.protocol)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

/// One connection to a mail server speaking some wire protocol.
///
/// Implementations are driven by a single caller at a time.
#[async_trait]
pub trait Transport: Send + Sync {
    /// The protocol name this transport speaks, e.g. `smtp`.
    fn protocol(&self) -> &str;

    ///
    /// Open a connection to `target`.
    ///
    /// # Errors
    /// If the server cannot be reached, refuses the session or rejects the credentials.
    ///
    async fn connect(&mut self, target: &ConnectTarget) -> Result<(), TransportError>;

    fn is_connected(&self) -> bool;

    ///
    /// Close the connection.
    ///
    /// # Errors
    /// If the connection could not be shut down cleanly. The transport is
    /// considered disconnected afterwards either way.
    ///
    async fn close(&mut self) -> Result<(), TransportError>;

    ///
    /// Deliver `message` to `addresses`.
    ///
    /// # Errors
    /// The returned [`DeliveryError`] tells the caller whether the
    /// connection may be reused.
    ///
    async fn deliver(
        &mut self,
        message: &Message,
        addresses: &[Address],
    ) -> Result<(), DeliveryError>;

    async fn add_listener(&mut self, listener: Arc<dyn TransportListener>);

    async fn remove_listener(&mut self, listener: &Arc<dyn TransportListener>);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_display_hides_password() {
        let target = ConnectTarget {
            protocol: "smtp".to_string(),
            host: "mx1.example.org".to_string(),
            port: Some(587),
            user: Some("relay".to_string()),
            password: Some("hunter2".to_string()),
        };

        assert_eq!(target.to_string(), "smtp://relay@mx1.example.org:587");
        assert!(!format!("{target:?}").contains("hunter2"));
        assert_eq!(target.with_host("mx2").to_string(), "smtp://relay@mx2:587");
    }
}

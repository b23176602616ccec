use std::sync::Arc;

use async_trait::async_trait;
use hamail_common::{
    Address, ConnectTarget, DeliveryError, ListenerSet, Message, Transport, TransportError,
    TransportEvent, TransportListener, TransportProvider, internal, outgoing, tracing,
};

use crate::{
    client::{ClientError, Response, SmtpClient},
    config::SmtpConfig,
};

pub const PROTOCOL: &str = "smtp";

impl From<ClientError> for TransportError {
    fn from(error: ClientError) -> Self {
        match error {
            ClientError::Io(err) => Self::Io(err),
            ClientError::TlsError(reason) => Self::Tls(reason),
            other => Self::Protocol(other.to_string()),
        }
    }
}

impl From<ClientError> for DeliveryError {
    fn from(error: ClientError) -> Self {
        Self::ConnectionBroken(error.to_string())
    }
}

/// A persistent SMTP connection that delivers any number of messages.
pub struct SmtpTransport {
    config: Arc<SmtpConfig>,
    client: Option<SmtpClient>,
    host: Option<String>,
    listeners: ListenerSet,
}

impl SmtpTransport {
    #[must_use]
    pub fn new(config: Arc<SmtpConfig>) -> Self {
        Self {
            config,
            client: None,
            host: None,
            listeners: ListenerSet::default(),
        }
    }

    /// Host of the current connection.
    #[must_use]
    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    #[must_use]
    pub fn is_tls(&self) -> bool {
        self.client.as_ref().is_some_and(SmtpClient::is_tls)
    }

    /// Open and greet a session. `None` means an opportunistic STARTTLS
    /// failed and the session should be retried without it.
    async fn open(
        &self,
        target: &ConnectTarget,
        try_tls: bool,
    ) -> Result<Option<SmtpClient>, TransportError> {
        let timeouts = &self.config.timeouts;
        let port = target.port.unwrap_or(self.config.default_port);
        let address = format!("{}:{port}", target.host);

        let mut client = SmtpClient::connect(&address, target.host.clone(), timeouts.connect())
            .await
            .map_err(|err| TransportError::Connect {
                target: target.to_string(),
                reason: err.to_string(),
            })?
            .accept_invalid_certs(self.config.accept_invalid_certs);

        let greeting = client.read_greeting(timeouts.command()).await?;
        if !greeting.is_success() {
            return Err(TransportError::Connect {
                target: target.to_string(),
                reason: format!("Server rejected connection: {}", greeting.message()),
            });
        }

        let ehlo = self.greet(&mut client).await?;

        if try_tls && (self.config.require_tls || ehlo.has_extension("STARTTLS")) {
            match client.starttls(timeouts.command()).await {
                Ok(response) if response.is_success() => {
                    let ehlo = client.ehlo(&self.config.helo_name, timeouts.command()).await?;
                    if !ehlo.is_success() {
                        return Err(TransportError::Protocol(format!(
                            "Server rejected EHLO after STARTTLS: {}",
                            ehlo.message()
                        )));
                    }
                    outgoing!(level = DEBUG, host = %target.host, "TLS negotiated via STARTTLS");
                }
                outcome => {
                    let reason = match outcome {
                        Ok(response) => format!("Server rejected STARTTLS: {}", response.message()),
                        Err(err) => err.to_string(),
                    };

                    if self.config.require_tls {
                        return Err(TransportError::Tls(reason));
                    }

                    internal!(
                        level = INFO,
                        host = %target.host,
                        reason = %reason,
                        "STARTTLS failed, retrying without TLS"
                    );
                    return Ok(None);
                }
            }
        }

        if let (Some(user), Some(password)) = (&target.user, &target.password) {
            let response = client
                .auth_plain(user, password, timeouts.command())
                .await?;
            if !response.is_success() {
                return Err(TransportError::Auth(response.message()));
            }
        }

        Ok(Some(client))
    }

    /// EHLO, falling back to HELO.
    async fn greet(&self, client: &mut SmtpClient) -> Result<Response, TransportError> {
        let timeout = self.config.timeouts.command();

        let ehlo = client.ehlo(&self.config.helo_name, timeout).await?;
        if ehlo.is_success() {
            return Ok(ehlo);
        }

        let helo = client.helo(&self.config.helo_name, timeout).await?;
        if helo.is_success() {
            return Ok(helo);
        }

        Err(TransportError::Protocol(format!(
            "Server rejected HELO: {}",
            helo.message()
        )))
    }

    async fn transaction(
        client: &mut SmtpClient,
        config: &SmtpConfig,
        listeners: &ListenerSet,
        message: &Message,
        addresses: &[Address],
    ) -> Result<(), DeliveryError> {
        let timeouts = &config.timeouts;
        let from = message
            .from
            .as_ref()
            .map(|a| a.email.as_str())
            .unwrap_or_default();

        let response = client.mail_from(from, timeouts.mail_from()).await?;
        if !response.is_success() {
            return Self::abort(client, config, "MAIL FROM", &response).await;
        }

        let mut accepted = Vec::with_capacity(addresses.len());
        let mut rejected = Vec::new();
        let mut reason = String::new();

        for address in addresses {
            let response = client.rcpt_to(&address.email, timeouts.rcpt_to()).await?;
            if response.is_shutdown() {
                return Err(DeliveryError::ConnectionBroken(response.message()));
            }

            if response.is_success() {
                accepted.push(address.clone());
            } else {
                outgoing!(
                    level = DEBUG,
                    recipient = %address,
                    code = response.code,
                    "Recipient refused"
                );
                reason = format!("{} {}", response.code, response.message());
                rejected.push(address.clone());
            }
        }

        if accepted.is_empty() {
            Self::reset(client, config).await?;
            listeners.notify(&TransportEvent::from_outcome(Vec::new(), rejected.clone()));
            return Err(DeliveryError::RecipientsRejected { rejected, reason });
        }

        let response = client.data(timeouts.data()).await?;
        if !response.is_intermediate() {
            return Self::abort(client, config, "DATA", &response).await;
        }

        let response = client.send_data(&message.render(), timeouts.data()).await?;
        if response.is_shutdown() {
            return Err(DeliveryError::ConnectionBroken(response.message()));
        }
        if !response.is_success() {
            return Err(DeliveryError::Unexpected(format!(
                "Server rejected message: {} {}",
                response.code,
                response.message()
            )));
        }

        listeners.notify(&TransportEvent::from_outcome(accepted, rejected.clone()));

        if rejected.is_empty() {
            Ok(())
        } else {
            Err(DeliveryError::RecipientsRejected { rejected, reason })
        }
    }

    async fn abort(
        client: &mut SmtpClient,
        config: &SmtpConfig,
        command: &str,
        response: &Response,
    ) -> Result<(), DeliveryError> {
        if response.is_shutdown() {
            return Err(DeliveryError::ConnectionBroken(response.message()));
        }

        Self::reset(client, config).await?;
        Err(DeliveryError::Unexpected(format!(
            "Server rejected {command}: {} {}",
            response.code,
            response.message()
        )))
    }

    async fn reset(client: &mut SmtpClient, config: &SmtpConfig) -> Result<(), DeliveryError> {
        let response = client.rset(config.timeouts.command()).await?;
        if response.is_success() {
            Ok(())
        } else {
            Err(DeliveryError::ConnectionBroken(format!(
                "RSET failed: {}",
                response.message()
            )))
        }
    }
}

#[async_trait]
impl Transport for SmtpTransport {
    fn protocol(&self) -> &str {
        PROTOCOL
    }

    #[tracing::instrument(skip_all, fields(peer = %target))]
    async fn connect(&mut self, target: &ConnectTarget) -> Result<(), TransportError> {
        if self.client.is_some()
            && let Err(err) = self.close().await
        {
            internal!(
                level = INFO,
                host = self.host.as_deref().unwrap_or_default(),
                error = %err,
                "Failed to close previous session"
            );
        }

        let client = match self.open(target, true).await? {
            Some(client) => client,
            None => self.open(target, false).await?.ok_or_else(|| {
                TransportError::Tls("STARTTLS failed on plaintext session".to_string())
            })?,
        };

        outgoing!(level = DEBUG, tls = client.is_tls(), "Session established");
        self.client = Some(client);
        self.host = Some(target.host.clone());
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.client.is_some()
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        let Some(mut client) = self.client.take() else {
            return Ok(());
        };

        client.quit(self.config.timeouts.quit()).await?;
        Ok(())
    }

    async fn deliver(
        &mut self,
        message: &Message,
        addresses: &[Address],
    ) -> Result<(), DeliveryError> {
        let Some(client) = self.client.as_mut() else {
            return Err(DeliveryError::ConnectionBroken(
                "SMTP transport is not connected".to_string(),
            ));
        };

        let result =
            Self::transaction(client, &self.config, &self.listeners, message, addresses).await;

        if matches!(result, Err(DeliveryError::ConnectionBroken(_))) {
            self.client = None;
        }

        result
    }

    async fn add_listener(&mut self, listener: Arc<dyn TransportListener>) {
        self.listeners.add(listener);
    }

    async fn remove_listener(&mut self, listener: &Arc<dyn TransportListener>) {
        self.listeners.remove(listener);
    }
}

/// Creates [`SmtpTransport`]s sharing one configuration.
#[derive(Debug, Clone, Default)]
pub struct SmtpProvider {
    config: Arc<SmtpConfig>,
}

impl SmtpProvider {
    #[must_use]
    pub fn new(config: SmtpConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }
}

impl TransportProvider for SmtpProvider {
    fn protocol(&self) -> &str {
        PROTOCOL
    }

    fn create(&self) -> Result<Box<dyn Transport>, TransportError> {
        Ok(Box::new(SmtpTransport::new(Arc::clone(&self.config))))
    }
}

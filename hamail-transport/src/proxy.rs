use std::{fmt, sync::Arc};

use async_trait::async_trait;
use hamail_common::{
    Address, ConnectTarget, DeliveryError, Message, ProviderRegistry, Transport, TransportError,
    TransportListener, internal, tracing,
};
use parking_lot::Mutex;
use tokio::sync::RwLock;

use crate::{
    config::{PoolConfig, split_hosts},
    connector::{ConnectorPool, ConnectorState},
    error::{ConfigError, ProxyError},
    sender::SendWorkers,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Disconnected,
    Connecting,
    Connected,
    Closing,
}

/// A single logical transport backed by a pool of `pool_size_per_host`
/// connections per configured host.
///
/// Sends are fire-and-forget: [`send_message`](Self::send_message) returns
/// once every recipient group has been taken by a send worker, and delivery
/// failures are only logged. [`close`](Self::close) must be awaited before
/// dropping a connected proxy so that in-flight sends are drained.
pub struct TransportProxy {
    config: PoolConfig,
    connectors: Arc<ConnectorPool>,
    senders: Arc<SendWorkers>,
    state: Mutex<State>,
    // Held shared by `send_message` until every group has a worker; `close`
    // takes it exclusively before draining.
    dispatching: RwLock<()>,
}

impl fmt::Debug for TransportProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportProxy")
            .field("config", &self.config)
            .field("state", &*self.state.lock())
            .field("idle_connectors", &self.idle_connectors())
            .field("idle_senders", &self.idle_senders())
            .finish()
    }
}

impl TransportProxy {
    ///
    /// Build an unconnected proxy, creating every underlying transport up front.
    ///
    /// # Errors
    /// If the configuration is invalid, no non-proxy provider serves the
    /// configured protocol, or the provider fails to create a transport.
    ///
    pub fn new(config: PoolConfig, providers: &ProviderRegistry) -> Result<Self, ProxyError> {
        config.validate()?;

        let provider = providers
            .resolve(&config.protocol)
            .ok_or_else(|| ConfigError::NoProvider(config.protocol.clone()))?;

        let transports = (0..config.total_slots())
            .map(|_| provider.create())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|source| ProxyError::Provider {
                protocol: config.protocol.clone(),
                source,
            })?;

        let connectors = Arc::new(ConnectorPool::new(transports, config.retry_period()));
        let senders = Arc::new(SendWorkers::new(Arc::clone(&connectors)));

        internal!(
            level = DEBUG,
            protocol = %config.protocol,
            slots = connectors.len(),
            grouping = %config.grouping,
            "Created transport pool"
        );

        Ok(Self {
            config,
            connectors,
            senders,
            state: Mutex::new(State::Disconnected),
            dispatching: RwLock::new(()),
        })
    }

    #[must_use]
    pub const fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Number of connection slots, which equals the number of send workers.
    #[must_use]
    pub fn size(&self) -> usize {
        self.connectors.len()
    }

    #[must_use]
    pub fn idle_connectors(&self) -> usize {
        self.connectors.idle()
    }

    #[must_use]
    pub fn idle_senders(&self) -> usize {
        self.senders.idle()
    }

    #[must_use]
    pub fn connector_states(&self) -> Vec<ConnectorState> {
        self.connectors.states()
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        *self.state.lock() == State::Connected
    }

    ///
    /// Connect to the configured hosts.
    ///
    /// # Errors
    /// See [`connect_with`](Self::connect_with).
    ///
    pub async fn connect(&self) -> Result<(), ProxyError> {
        let template = ConnectTarget {
            protocol: self.config.protocol.clone(),
            host: self.config.hosts.join(","),
            port: self.config.port,
            user: self.config.user.clone(),
            password: self.config.password.clone(),
        };

        self.connect_with(&template).await
    }

    ///
    /// Start connecting every slot, and return as soon as one of them is usable.
    ///
    /// `template.host` may hold a comma separated list, assigned round-robin
    /// to the slots; when blank the configured hosts are used. Missing port
    /// and credentials fall back to the configuration as well.
    ///
    /// # Errors
    /// [`ProxyError::AlreadyConnected`] unless disconnected, and
    /// [`ProxyError::ConnectTimeout`] if no slot connected within the
    /// configured timeout. In the latter case every slot has been shut down.
    ///
    #[tracing::instrument(skip_all, fields(protocol = %self.config.protocol))]
    pub async fn connect_with(&self, template: &ConnectTarget) -> Result<(), ProxyError> {
        {
            let mut state = self.state.lock();
            if *state != State::Disconnected {
                return Err(ProxyError::AlreadyConnected);
            }
            *state = State::Connecting;
        }

        let mut hosts = split_hosts(&template.host);
        if hosts.is_empty() {
            hosts.clone_from(&self.config.hosts);
        }

        let effective = PoolConfig {
            hosts,
            port: template.port.or(self.config.port),
            user: template.user.clone().or_else(|| self.config.user.clone()),
            password: template
                .password
                .clone()
                .or_else(|| self.config.password.clone()),
            ..self.config.clone()
        };
        let targets = (0..self.size())
            .filter_map(|index| effective.target_for(index))
            .collect();

        self.connectors.start(targets);

        if self
            .connectors
            .wait_first(self.config.connect_timeout())
            .await
        {
            *self.state.lock() = State::Connected;
            internal!(
                level = INFO,
                idle = self.idle_connectors(),
                slots = self.size(),
                "Transport pool connected"
            );
            return Ok(());
        }

        let timeout = self.config.connect_timeout().unwrap_or_default();
        tracing::warn!(
            timeout_ms = timeout.as_millis(),
            "No connection established in time, shutting down pool"
        );

        self.shutdown().await;
        *self.state.lock() = State::Disconnected;

        Err(ProxyError::ConnectTimeout(timeout))
    }

    ///
    /// Hand `message` to the pool for delivery to `addresses`.
    ///
    /// Missing subject and body are filled with empty strings. The recipients
    /// are split by the configured grouping strategy and each group is given
    /// to its own send worker; this waits for idle workers but not for
    /// delivery. An empty `addresses` slice is accepted and does nothing.
    ///
    /// # Errors
    /// [`ProxyError::NotConnected`] if the pool is not connected,
    /// [`ProxyError::Closed`] if it is closing, and
    /// [`ProxyError::NoRecipients`] if the message names no recipient.
    ///
    pub async fn send_message(
        &self,
        message: &Message,
        addresses: &[Address],
    ) -> Result<(), ProxyError> {
        // Taken before reading the state: a send that sees `Connected` holds
        // off `close` until every group has a worker.
        let _dispatching = self.dispatching.read().await;
        let state = *self.state.lock();
        match state {
            State::Connected => {}
            State::Closing => return Err(ProxyError::Closed),
            State::Disconnected | State::Connecting => return Err(ProxyError::NotConnected),
        }

        if addresses.is_empty() {
            return Ok(());
        }

        let mut message = message.clone();
        message.apply_defaults();

        if message.recipient_count() == 0 {
            return Err(ProxyError::NoRecipients);
        }

        let message = Arc::new(message);
        for group in self.config.grouping.partition(addresses) {
            self.senders
                .dispatch(Arc::clone(&message), group)
                .await
                .map_err(|_| ProxyError::Closed)?;
        }

        Ok(())
    }

    ///
    /// Drain in-flight sends, stop reconnecting and close every connection.
    ///
    /// Closing a proxy that is not connected does nothing.
    ///
    #[tracing::instrument(skip_all, fields(protocol = %self.config.protocol))]
    pub async fn close(&self) {
        {
            let mut state = self.state.lock();
            if *state != State::Connected {
                return;
            }
            *state = State::Closing;
        }

        // Sends that saw `Connected` finish handing off their groups.
        drop(self.dispatching.write().await);

        self.shutdown().await;
        *self.state.lock() = State::Disconnected;

        internal!(level = INFO, "Transport pool closed");
    }

    async fn shutdown(&self) {
        internal!(level = INFO, "Waiting for active senders to complete...");
        self.senders.wait_all_idle().await;

        self.connectors.interrupt_all();

        internal!(level = INFO, "Waiting for active connectors to stop...");
        self.connectors.wait_all_idle().await;

        self.connectors.close_all().await;
    }

    /// Registers `listener` with every underlying transport.
    pub async fn add_listener(&self, listener: Arc<dyn TransportListener>) {
        for connector in self.connectors.iter() {
            connector.add_listener(Arc::clone(&listener)).await;
        }
    }

    pub async fn remove_listener(&self, listener: &Arc<dyn TransportListener>) {
        for connector in self.connectors.iter() {
            connector.remove_listener(listener).await;
        }
    }
}

impl Drop for TransportProxy {
    fn drop(&mut self) {
        let state = *self.state.get_mut();
        if state != State::Disconnected {
            tracing::warn!(
                ?state,
                "Transport pool dropped without being closed, abandoning in-flight sends"
            );
        }

        self.connectors.interrupt_all();
        self.connectors.close();
        self.senders.close();
    }
}

#[async_trait]
impl Transport for TransportProxy {
    fn protocol(&self) -> &str {
        &self.config.protocol
    }

    async fn connect(&mut self, target: &ConnectTarget) -> Result<(), TransportError> {
        Ok(self.connect_with(target).await?)
    }

    fn is_connected(&self) -> bool {
        Self::is_connected(self)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        Self::close(self).await;
        Ok(())
    }

    async fn deliver(
        &mut self,
        message: &Message,
        addresses: &[Address],
    ) -> Result<(), DeliveryError> {
        self.send_message(message, addresses)
            .await
            .map_err(|err| TransportError::from(err).into())
    }

    async fn add_listener(&mut self, listener: Arc<dyn TransportListener>) {
        Self::add_listener(self, listener).await;
    }

    async fn remove_listener(&mut self, listener: &Arc<dyn TransportListener>) {
        Self::remove_listener(self, listener).await;
    }
}

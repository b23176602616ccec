//! Connection slots and their background reconnect loops.

use std::{fmt, panic::AssertUnwindSafe, sync::Arc, time::Duration};

use futures_util::FutureExt;
use hamail_common::{
    Address, ConnectTarget, DeliveryError, Message, Transport, TransportListener, internal,
    tracing,
};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::registry::{IdleRegistry, RegistryClosed};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectorState {
    Disconnected,
    Connecting,
    Connected,
    /// The reconnect loop was stopped during shutdown.
    Interrupted,
}

/// One pooled connection.
///
/// The transport is only touched by whoever took the slot out of the idle
/// registry: either the reconnect loop or a send worker, never both.
pub(crate) struct Connector {
    index: usize,
    transport: tokio::sync::Mutex<Box<dyn Transport>>,
    target: Mutex<Option<ConnectTarget>>,
    state: Mutex<ConnectorState>,
    interrupt: Mutex<CancellationToken>,
    retry_period: Duration,
    idle: Arc<IdleRegistry>,
}

impl fmt::Debug for Connector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connector")
            .field("index", &self.index)
            .field("target", &*self.target.lock())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Connector {
    pub(crate) const fn index(&self) -> usize {
        self.index
    }

    pub(crate) fn state(&self) -> ConnectorState {
        *self.state.lock()
    }

    fn set_state(&self, state: ConnectorState) {
        *self.state.lock() = state;
    }

    pub(crate) fn host(&self) -> String {
        self.target
            .lock()
            .as_ref()
            .map_or_else(String::new, |t| t.host.clone())
    }

    /// Record `target` and start connecting in the background.
    pub(crate) fn connect(self: &Arc<Self>, target: ConnectTarget) {
        *self.target.lock() = Some(target);
        *self.interrupt.lock() = CancellationToken::new();
        self.reconnect();
    }

    /// Start a fresh reconnect loop. The caller must hold the slot.
    pub(crate) fn reconnect(self: &Arc<Self>) {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.run().await });
    }

    /// Stop the current reconnect loop, including its retry sleep.
    pub(crate) fn interrupt(&self) {
        self.interrupt.lock().cancel();
    }

    /// Runs until connected or interrupted, then releases the slot either way.
    async fn run(self: Arc<Self>) {
        let interrupt = self.interrupt.lock().clone();
        let target = self.target.lock().clone();

        if let Some(target) = target {
            self.establish(&target, &interrupt).await;
        } else {
            self.set_state(ConnectorState::Disconnected);
        }

        self.idle.release(self.index);
    }

    /// The transport lock is only held for single `close` and `connect`
    /// calls, never across the retry sleep.
    async fn establish(&self, target: &ConnectTarget, interrupt: &CancellationToken) {
        self.close_stale(target).await;

        loop {
            if interrupt.is_cancelled() {
                self.set_state(ConnectorState::Interrupted);
                return;
            }

            self.set_state(ConnectorState::Connecting);
            let attempt = async {
                let mut transport = self.transport.lock().await;
                AssertUnwindSafe(transport.connect(target))
                    .catch_unwind()
                    .await
            };

            let result = tokio::select! {
                () = interrupt.cancelled() => {
                    self.set_state(ConnectorState::Interrupted);
                    return;
                }
                result = attempt => result,
            };

            match result {
                Ok(Ok(())) => {
                    internal!(
                        level = INFO,
                        slot = self.index,
                        "Successfully opened {} connection to {}",
                        target.protocol,
                        target.host
                    );
                    self.set_state(ConnectorState::Connected);
                    return;
                }
                Ok(Err(err)) => {
                    tracing::warn!(
                        slot = self.index,
                        peer = %target,
                        error = %err,
                        "Failed to connect transport"
                    );
                }
                Err(_) => {
                    tracing::error!(
                        slot = self.index,
                        peer = %target,
                        "Transport panicked while connecting"
                    );
                }
            }

            self.set_state(ConnectorState::Disconnected);

            tokio::select! {
                () = interrupt.cancelled() => {
                    self.set_state(ConnectorState::Interrupted);
                    return;
                }
                () = tokio::time::sleep(self.retry_period) => {}
            }
        }
    }

    async fn close_stale(&self, target: &ConnectTarget) {
        let mut transport = self.transport.lock().await;
        if !transport.is_connected() {
            return;
        }

        if let Err(err) = transport.close().await {
            internal!(
                level = INFO,
                slot = self.index,
                host = %target.host,
                error = %err,
                "Failed to close stale connection"
            );
        }
    }

    pub(crate) async fn deliver(
        &self,
        message: &Message,
        addresses: &[Address],
    ) -> Result<(), DeliveryError> {
        self.transport.lock().await.deliver(message, addresses).await
    }

    /// Marks the connection dead and hands the slot to a new reconnect loop.
    pub(crate) fn mark_broken(self: &Arc<Self>) {
        self.set_state(ConnectorState::Disconnected);
        self.reconnect();
    }

    /// Close the transport if it is connected. The caller must hold the slot.
    pub(crate) async fn shutdown(&self) {
        let mut transport = self.transport.lock().await;
        if !transport.is_connected() {
            return;
        }

        let protocol = transport.protocol().to_string();
        let host = self.host();

        match transport.close().await {
            Ok(()) => internal!(
                level = INFO,
                slot = self.index,
                "Successfully closed {protocol} connection to {host}"
            ),
            Err(err) => tracing::warn!(
                slot = self.index,
                error = %err,
                "Failed to close {protocol} connection to {host}"
            ),
        }

        self.set_state(ConnectorState::Disconnected);
    }

    pub(crate) async fn add_listener(&self, listener: Arc<dyn TransportListener>) {
        self.transport.lock().await.add_listener(listener).await;
    }

    pub(crate) async fn remove_listener(&self, listener: &Arc<dyn TransportListener>) {
        self.transport.lock().await.remove_listener(listener).await;
    }
}

/// All connection slots of a proxy plus their idle registry.
#[derive(Debug)]
pub(crate) struct ConnectorPool {
    connectors: Vec<Arc<Connector>>,
    idle: Arc<IdleRegistry>,
}

impl ConnectorPool {
    /// Slots start disconnected, hence not idle.
    pub(crate) fn new(transports: Vec<Box<dyn Transport>>, retry_period: Duration) -> Self {
        let idle = Arc::new(IdleRegistry::new("connector", transports.len()));

        let connectors = transports
            .into_iter()
            .enumerate()
            .map(|(index, transport)| {
                Arc::new(Connector {
                    index,
                    transport: tokio::sync::Mutex::new(transport),
                    target: Mutex::new(None),
                    state: Mutex::new(ConnectorState::Disconnected),
                    interrupt: Mutex::new(CancellationToken::new()),
                    retry_period,
                    idle: Arc::clone(&idle),
                })
            })
            .collect();

        Self { connectors, idle }
    }

    pub(crate) fn len(&self) -> usize {
        self.connectors.len()
    }

    pub(crate) fn idle(&self) -> usize {
        self.idle.idle()
    }

    pub(crate) fn states(&self) -> Vec<ConnectorState> {
        self.connectors.iter().map(|c| c.state()).collect()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Arc<Connector>> {
        self.connectors.iter()
    }

    /// Start every slot's reconnect loop; `targets[i]` belongs to slot `i`.
    pub(crate) fn start(&self, targets: Vec<ConnectTarget>) {
        for (connector, target) in self.connectors.iter().zip(targets) {
            connector.connect(target);
        }
    }

    /// Wait until any slot is connected. `None` waits forever.
    pub(crate) async fn wait_first(&self, timeout: Option<Duration>) -> bool {
        let first = self.idle.wait_for_idle(1);

        match timeout {
            Some(timeout) => tokio::time::timeout(timeout, first).await.is_ok(),
            None => {
                first.await;
                true
            }
        }
    }

    pub(crate) async fn acquire(&self) -> Result<Arc<Connector>, RegistryClosed> {
        let index = self.idle.acquire().await?;
        Ok(Arc::clone(&self.connectors[index]))
    }

    pub(crate) fn release(&self, connector: &Connector) {
        self.idle.release(connector.index());
    }

    pub(crate) fn interrupt_all(&self) {
        for connector in &self.connectors {
            connector.interrupt();
        }
    }

    pub(crate) async fn wait_all_idle(&self) {
        self.idle.wait_for_idle(self.connectors.len()).await;
    }

    /// Take every slot back out of the registry and close its transport.
    ///
    /// Only valid once every reconnect loop and send worker has finished.
    pub(crate) async fn close_all(&self) {
        for index in self.idle.drain().await {
            self.connectors[index].shutdown().await;
        }
    }

    pub(crate) fn close(&self) {
        self.idle.close();
    }
}

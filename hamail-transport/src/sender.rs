//! Send workers: each one carries a single recipient group to completion.

use std::{panic::AssertUnwindSafe, sync::Arc};

use futures_util::FutureExt;
use hamail_common::{Address, AddressList, DeliveryError, Message, internal, tracing};

use crate::{
    connector::ConnectorPool,
    registry::{IdleRegistry, RegistryClosed},
};

#[derive(Debug)]
pub(crate) struct SendWorkers {
    idle: IdleRegistry,
    connectors: Arc<ConnectorPool>,
}

impl SendWorkers {
    /// Workers start out idle.
    pub(crate) fn new(connectors: Arc<ConnectorPool>) -> Self {
        let size = connectors.len();
        let idle = IdleRegistry::new("sender", size);
        for index in 0..size {
            idle.release(index);
        }

        Self { idle, connectors }
    }

    pub(crate) fn idle(&self) -> usize {
        self.idle.idle()
    }

    ///
    /// Take an idle worker and hand `recipients` to it. Returns once the
    /// worker owns the group, not when delivery is done.
    ///
    /// # Errors
    /// If the pool was shut down while waiting for a worker.
    ///
    pub(crate) async fn dispatch(
        self: &Arc<Self>,
        message: Arc<Message>,
        recipients: Vec<Address>,
    ) -> Result<(), RegistryClosed> {
        let worker = self.idle.acquire().await?;
        let this = Arc::clone(self);

        tokio::spawn(async move {
            this.run(worker, &message, &recipients).await;
            this.idle.release(worker);
        });

        Ok(())
    }

    /// Deliver on any idle connection, moving to another one for as long as
    /// the connections turn out dead.
    async fn run(&self, worker: usize, message: &Message, recipients: &[Address]) {
        loop {
            let connector = match self.connectors.acquire().await {
                Ok(connector) => connector,
                Err(err) => {
                    tracing::warn!(
                        worker,
                        recipients = %AddressList(recipients.to_vec()),
                        "Dropping message: {err}"
                    );
                    return;
                }
            };

            let slot = connector.index();
            let outcome = AssertUnwindSafe(connector.deliver(message, recipients))
                .catch_unwind()
                .await;

            match outcome {
                Ok(Ok(())) => {
                    internal!(
                        level = DEBUG,
                        worker,
                        slot,
                        "Delivered message to {} recipient(s)",
                        recipients.len()
                    );
                }
                Ok(Err(DeliveryError::RecipientsRejected { rejected, reason })) => {
                    tracing::error!(
                        worker,
                        slot,
                        reason = %reason,
                        "Failed to send message to invalid addresses: {}",
                        AddressList(rejected)
                    );
                }
                Ok(Err(DeliveryError::ConnectionBroken(reason))) => {
                    internal!(
                        level = DEBUG,
                        worker,
                        slot,
                        reason = %reason,
                        "Failed to send message, connection to {} is dead",
                        connector.host()
                    );
                    // The slot now belongs to its reconnect loop.
                    connector.mark_broken();
                    continue;
                }
                Ok(Err(DeliveryError::Unexpected(reason))) => {
                    tracing::error!(
                        worker,
                        slot,
                        reason = %reason,
                        "Unexpected failure while sending message via {}",
                        connector.host()
                    );
                }
                Err(_) => {
                    tracing::error!(
                        worker,
                        slot,
                        "Unexpected failure while sending message via {}: transport panicked",
                        connector.host()
                    );
                }
            }

            self.connectors.release(&connector);
            return;
        }
    }

    /// Resolves once no worker is busy.
    pub(crate) async fn wait_all_idle(&self) {
        self.idle.wait_for_idle(self.idle.capacity()).await;
    }

    pub(crate) fn close(&self) {
        self.idle.close();
    }
}

use hamail_common::{ProviderRegistry, Transport, TransportError, TransportProvider};

use crate::{config::PoolConfig, proxy::TransportProxy};

/// Serves [`TransportProxy`] instances under the pool's protocol.
///
/// The wrapped registry may contain this provider too; it reports itself as
/// a proxy so that resolution always lands on a direct transport.
#[derive(Debug, Clone)]
pub struct ProxyProvider {
    config: PoolConfig,
    providers: ProviderRegistry,
}

impl ProxyProvider {
    #[must_use]
    pub const fn new(config: PoolConfig, providers: ProviderRegistry) -> Self {
        Self { config, providers }
    }
}

impl TransportProvider for ProxyProvider {
    fn protocol(&self) -> &str {
        &self.config.protocol
    }

    fn create(&self) -> Result<Box<dyn Transport>, TransportError> {
        let proxy = TransportProxy::new(self.config.clone(), &self.providers)?;
        Ok(Box::new(proxy))
    }

    fn is_proxy(&self) -> bool {
        true
    }
}

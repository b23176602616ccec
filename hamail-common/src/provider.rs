//! Lookup of transport implementations by protocol name.

use std::{fmt, sync::Arc};

use crate::{error::TransportError, traits::transport::Transport};

/// Factory for fresh, unconnected transports of one protocol.
pub trait TransportProvider: Send + Sync {
    fn protocol(&self) -> &str;

    ///
    /// Create a new, unconnected transport.
    ///
    /// # Errors
    /// If the provider cannot build a transport from its configuration.
    ///
    fn create(&self) -> Result<Box<dyn Transport>, TransportError>;

    /// Providers that wrap other providers of the same protocol return `true`
    /// so they are never chosen as their own backing transport.
    fn is_proxy(&self) -> bool {
        false
    }
}

#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: Vec<Arc<dyn TransportProvider>>,
}

impl ProviderRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, provider: Arc<dyn TransportProvider>) {
        self.providers.push(provider);
    }

    #[must_use]
    pub fn with(mut self, provider: Arc<dyn TransportProvider>) -> Self {
        self.register(provider);
        self
    }

    /// First registered non-proxy provider for `protocol`.
    #[must_use]
    pub fn resolve(&self, protocol: &str) -> Option<Arc<dyn TransportProvider>> {
        self.providers
            .iter()
            .find(|p| !p.is_proxy() && p.protocol().eq_ignore_ascii_case(protocol))
            .cloned()
    }

    #[must_use]
    pub fn protocols(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.protocol()).collect()
    }
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(
                self.providers
                    .iter()
                    .map(|p| (p.protocol(), p.is_proxy())),
            )
            .finish()
    }
}

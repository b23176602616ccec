//! Test support for the transport pool
#![allow(dead_code)]

pub mod mock_transport;

use std::{sync::Arc, time::Duration};

use hamail_common::{Address, Message, ProviderRegistry};
use hamail_transport::{PoolConfig, TransportProxy};

pub use mock_transport::{ConnectBehaviour, DeliverBehaviour, MockProvider};

pub const PROTOCOL: &str = "mock";

pub fn config(pool_size_per_host: usize, hosts: &[&str]) -> PoolConfig {
    PoolConfig {
        pool_size_per_host,
        connect_retry_period_ms: 20,
        protocol: PROTOCOL.to_string(),
        ..PoolConfig::default()
    }
    .with_hosts(hosts.iter().copied())
}

pub fn proxy(config: PoolConfig) -> (TransportProxy, Arc<MockProvider>) {
    let provider = MockProvider::new(PROTOCOL);
    let registry = ProviderRegistry::new().with(provider.clone());
    let proxy = TransportProxy::new(config, &registry).expect("valid pool configuration");
    (proxy, provider)
}

pub fn message() -> Message {
    Message::new()
        .from_address(Address::new("sender@example.org"))
        .to(Address::new("someone@example.org"))
        .subject("Greetings")
}

pub fn addresses(emails: &[&str]) -> Vec<Address> {
    emails.iter().map(|e| Address::new(*e)).collect()
}

/// Polls `condition` until it holds, failing the test after two seconds.
pub async fn eventually(what: &str, condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

//! High-availability transport pool.
//!
//! [`TransportProxy`] presents a single logical [`Transport`] backed by a
//! fixed pool of underlying connections:
//! - connections are (re)established in the background with a retry period
//! - `connect` returns as soon as the first connection is usable
//! - each recipient group is handed to a send worker which picks any idle
//!   connection, and moves on to another one if the connection turns out dead
//! - `close` drains in-flight sends before tearing the connections down
//!
//! [`Transport`]: hamail_common::Transport

mod config;
mod connector;
mod error;
mod grouping;
mod provider;
mod proxy;
mod registry;
mod sender;

pub use config::{PoolConfig, properties};
pub use connector::ConnectorState;
pub use error::{ConfigError, ProxyError};
pub use grouping::GroupingStrategy;
pub use provider::ProxyProvider;
pub use proxy::TransportProxy;
pub use registry::{IdleRegistry, RegistryClosed};

//! Types shared by every hamail crate: addresses, messages, the transport
//! collaborator traits and the logging setup.

pub mod address;
pub mod error;
pub mod event;
pub mod logging;
pub mod message;
pub mod provider;
pub mod traits;

pub use address::{Address, AddressList};
pub use error::{AddressError, DeliveryError, TransportError};
pub use event::{EventKind, ListenerSet, TransportEvent, TransportListener};
pub use message::Message;
pub use provider::{ProviderRegistry, TransportProvider};
pub use traits::transport::{ConnectTarget, Transport};
pub use tracing;

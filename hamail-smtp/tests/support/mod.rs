#![allow(dead_code)]

pub mod mock_server;

use std::sync::{Arc, Mutex};

use hamail_common::{Address, ConnectTarget, Message, TransportEvent, TransportListener};
use hamail_smtp::{SmtpConfig, SmtpTransport};

pub use mock_server::{MockSmtpServer, SmtpCommand};

pub fn transport() -> SmtpTransport {
    transport_with(SmtpConfig::default())
}

pub fn transport_with(config: SmtpConfig) -> SmtpTransport {
    SmtpTransport::new(Arc::new(config))
}

pub fn target(server: &MockSmtpServer) -> ConnectTarget {
    ConnectTarget {
        port: Some(server.port()),
        ..ConnectTarget::new(hamail_smtp::PROTOCOL, "127.0.0.1")
    }
}

pub fn message(subject: &str) -> Message {
    Message::new()
        .from_address(Address::new("sender@example.org"))
        .to(Address::new("alice@example.org"))
        .subject(subject)
        .body("Hello there")
}

pub fn addresses(emails: &[&str]) -> Vec<Address> {
    emails.iter().map(|e| Address::new(*e)).collect()
}

#[derive(Default)]
pub struct RecordingListener {
    pub events: Mutex<Vec<TransportEvent>>,
}

impl TransportListener for RecordingListener {
    fn on_event(&self, event: &TransportEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

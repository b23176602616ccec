//! Scriptable in-memory transport
//!
//! Every transport created by one [`MockProvider`] shares a [`Script`], which
//! decides how connects behave per host and how successive deliveries end,
//! and records what happened so tests can assert on it.
#![allow(dead_code)] // Test utility module - not all methods used in every test

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use hamail_common::{
    Address, ConnectTarget, DeliveryError, ListenerSet, Message, Transport, TransportError,
    TransportEvent, TransportListener, TransportProvider,
};
use parking_lot::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectBehaviour {
    Succeed,
    Fail,
    /// Fail the first `n` attempts against the host, then succeed
    FailTimes(usize),
    /// Never complete
    Hang,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliverBehaviour {
    Succeed,
    Reject,
    Break,
    Unexpected,
    Panic,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub transport: usize,
    pub host: String,
    pub recipients: Vec<String>,
    pub subject: Option<String>,
}

#[derive(Debug, Default)]
pub struct Script {
    connect: Mutex<HashMap<String, ConnectBehaviour>>,
    deliver: Mutex<VecDeque<DeliverBehaviour>>,
    deliver_delay: Mutex<Duration>,

    attempts: Mutex<HashMap<String, usize>>,
    deliveries: Mutex<Vec<Delivery>>,
    open: AtomicUsize,
    closes: AtomicUsize,
    listeners: AtomicUsize,
}

impl Script {
    pub fn connect(&self, host: &str, behaviour: ConnectBehaviour) -> &Self {
        self.connect.lock().insert(host.to_string(), behaviour);
        self
    }

    /// Outcomes for the next deliveries, across all transports; afterwards
    /// deliveries succeed.
    pub fn deliver(&self, outcomes: impl IntoIterator<Item = DeliverBehaviour>) -> &Self {
        self.deliver.lock().extend(outcomes);
        self
    }

    pub fn deliver_delay(&self, delay: Duration) -> &Self {
        *self.deliver_delay.lock() = delay;
        self
    }

    pub fn attempts(&self, host: &str) -> usize {
        self.attempts.lock().get(host).copied().unwrap_or_default()
    }

    pub fn total_attempts(&self) -> usize {
        self.attempts.lock().values().sum()
    }

    pub fn deliveries(&self) -> Vec<Delivery> {
        self.deliveries.lock().clone()
    }

    /// Connections currently open.
    pub fn open(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn listeners(&self) -> usize {
        self.listeners.load(Ordering::SeqCst)
    }
}

pub struct MockTransport {
    id: usize,
    protocol: String,
    host: Option<String>,
    connected: bool,
    listeners: ListenerSet,
    script: Arc<Script>,
}

impl MockTransport {
    fn disconnect(&mut self) {
        if self.connected {
            self.connected = false;
            self.script.open.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn protocol(&self) -> &str {
        &self.protocol
    }

    async fn connect(&mut self, target: &ConnectTarget) -> Result<(), TransportError> {
        let attempt = {
            let mut attempts = self.script.attempts.lock();
            let count = attempts.entry(target.host.clone()).or_default();
            *count += 1;
            *count
        };

        let behaviour = self
            .script
            .connect
            .lock()
            .get(&target.host)
            .copied()
            .unwrap_or(ConnectBehaviour::Succeed);

        let succeed = match behaviour {
            ConnectBehaviour::Succeed => true,
            ConnectBehaviour::Fail => false,
            ConnectBehaviour::FailTimes(n) => attempt > n,
            ConnectBehaviour::Hang => std::future::pending().await,
        };

        if !succeed {
            return Err(TransportError::Connect {
                target: target.to_string(),
                reason: "connection refused".to_string(),
            });
        }

        self.host = Some(target.host.clone());
        self.connected = true;
        self.script.open.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.disconnect();
        self.script.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn deliver(
        &mut self,
        message: &Message,
        addresses: &[Address],
    ) -> Result<(), DeliveryError> {
        if !self.connected {
            return Err(DeliveryError::ConnectionBroken("not connected".to_string()));
        }

        let delay = *self.script.deliver_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let behaviour = self
            .script
            .deliver
            .lock()
            .pop_front()
            .unwrap_or(DeliverBehaviour::Succeed);

        self.script.deliveries.lock().push(Delivery {
            transport: self.id,
            host: self.host.clone().unwrap_or_default(),
            recipients: addresses.iter().map(|a| a.email.clone()).collect(),
            subject: message.subject.clone(),
        });

        match behaviour {
            DeliverBehaviour::Succeed => {
                self.listeners
                    .notify(&TransportEvent::from_outcome(addresses.to_vec(), vec![]));
                Ok(())
            }
            DeliverBehaviour::Reject => Err(DeliveryError::RecipientsRejected {
                rejected: addresses.to_vec(),
                reason: "550 User unknown".to_string(),
            }),
            DeliverBehaviour::Break => {
                self.disconnect();
                Err(DeliveryError::ConnectionBroken("connection reset".to_string()))
            }
            DeliverBehaviour::Unexpected => {
                Err(DeliveryError::Unexpected("message too large".to_string()))
            }
            DeliverBehaviour::Panic => panic!("mock transport panicked"),
        }
    }

    async fn add_listener(&mut self, listener: Arc<dyn TransportListener>) {
        self.listeners.add(listener);
        self.script.listeners.fetch_add(1, Ordering::SeqCst);
    }

    async fn remove_listener(&mut self, listener: &Arc<dyn TransportListener>) {
        let before = self.listeners.len();
        self.listeners.remove(listener);
        if self.listeners.len() < before {
            self.script.listeners.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

pub struct MockProvider {
    protocol: String,
    created: AtomicUsize,
    pub script: Arc<Script>,
}

impl MockProvider {
    pub fn new(protocol: &str) -> Arc<Self> {
        Arc::new(Self {
            protocol: protocol.to_string(),
            created: AtomicUsize::new(0),
            script: Arc::new(Script::default()),
        })
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

impl TransportProvider for MockProvider {
    fn protocol(&self) -> &str {
        &self.protocol
    }

    fn create(&self) -> Result<Box<dyn Transport>, TransportError> {
        let id = self.created.fetch_add(1, Ordering::SeqCst);

        Ok(Box::new(MockTransport {
            id,
            protocol: self.protocol.clone(),
            host: None,
            connected: false,
            listeners: ListenerSet::default(),
            script: Arc::clone(&self.script),
        }))
    }
}

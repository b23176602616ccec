//! Delivery notifications raised by transports.

use std::sync::Arc;

use crate::address::Address;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Delivered,
    NotDelivered,
    PartiallyDelivered,
}

/// Outcome of one delivery as seen by the transport that performed it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportEvent {
    pub kind: EventKind,
    pub delivered: Vec<Address>,
    pub undelivered: Vec<Address>,
    pub invalid: Vec<Address>,
}

impl TransportEvent {
    /// Builds an event from the split of accepted and refused recipients.
    #[must_use]
    pub fn from_outcome(delivered: Vec<Address>, invalid: Vec<Address>) -> Self {
        let kind = match (delivered.is_empty(), invalid.is_empty()) {
            (false, true) => EventKind::Delivered,
            (true, _) => EventKind::NotDelivered,
            (false, false) => EventKind::PartiallyDelivered,
        };

        Self {
            kind,
            delivered,
            undelivered: Vec::new(),
            invalid,
        }
    }
}

pub trait TransportListener: Send + Sync {
    fn on_event(&self, event: &TransportEvent);
}

/// Registered listeners of a single transport. Identity is pointer identity.
#[derive(Default, Clone)]
pub struct ListenerSet {
    listeners: Vec<Arc<dyn TransportListener>>,
}

impl ListenerSet {
    pub fn add(&mut self, listener: Arc<dyn TransportListener>) {
        self.listeners.push(listener);
    }

    /// Removes one registration of `listener`, if present.
    pub fn remove(&mut self, listener: &Arc<dyn TransportListener>) {
        if let Some(pos) = self
            .listeners
            .iter()
            .position(|l| Arc::ptr_eq(l, listener))
        {
            self.listeners.remove(pos);
        }
    }

    pub fn notify(&self, event: &TransportEvent) {
        for listener in &self.listeners {
            listener.on_event(event);
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}

impl std::fmt::Debug for ListenerSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerSet")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[derive(Default)]
    struct Counter(AtomicUsize);

    impl TransportListener for Counter {
        fn on_event(&self, _event: &TransportEvent) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_event_kind_from_outcome() {
        let a = Address::new("a@x.org");
        let b = Address::new("b@y.org");

        let event = TransportEvent::from_outcome(vec![a.clone()], vec![]);
        assert_eq!(event.kind, EventKind::Delivered);

        let event = TransportEvent::from_outcome(vec![a], vec![b.clone()]);
        assert_eq!(event.kind, EventKind::PartiallyDelivered);

        let event = TransportEvent::from_outcome(vec![], vec![b]);
        assert_eq!(event.kind, EventKind::NotDelivered);
    }

    #[test]
    fn test_listener_set_add_remove() {
        let counter = Arc::new(Counter::default());
        let listener: Arc<dyn TransportListener> = counter.clone();

        let mut set = ListenerSet::default();
        set.add(listener.clone());
        set.notify(&TransportEvent::from_outcome(vec![], vec![]));
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);

        set.remove(&listener);
        assert!(set.is_empty());
        set.notify(&TransportEvent::from_outcome(vec![], vec![]));
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }
}

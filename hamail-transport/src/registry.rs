//! Blocking registry of idle slot indices.
//!
//! A slot index is present in the registry exactly when the slot is not in
//! use. Acquiring waits while the registry is empty, and waiters are served
//! in the order they started waiting.

use hamail_common::tracing;
use thiserror::Error;
use tokio::sync::{Mutex, mpsc, watch};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("{0} registry is closed")]
pub struct RegistryClosed(pub &'static str);

#[derive(Debug)]
pub struct IdleRegistry {
    kind: &'static str,
    capacity: usize,
    tx: mpsc::UnboundedSender<usize>,
    // Lock order on this mutex is FIFO, which gives first-blocked-first-served.
    rx: Mutex<mpsc::UnboundedReceiver<usize>>,
    idle: watch::Sender<usize>,
    closed: CancellationToken,
}

impl IdleRegistry {
    /// An empty registry for `capacity` slots.
    #[must_use]
    pub fn new(kind: &'static str, capacity: usize) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (idle, _) = watch::channel(0);

        Self {
            kind,
            capacity,
            tx,
            rx: Mutex::new(rx),
            idle,
            closed: CancellationToken::new(),
        }
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of slots currently idle.
    #[must_use]
    pub fn idle(&self) -> usize {
        *self.idle.borrow()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.idle() == 0
    }

    /// Mark slot `index` idle, waking the longest waiting acquirer.
    pub fn release(&self, index: usize) {
        debug_assert!(index < self.capacity, "slot {index} out of range");

        if self.closed.is_cancelled() {
            tracing::debug!(kind = self.kind, index, "Released slot into closed registry");
            return;
        }

        // Count first, so an acquirer never decrements below zero.
        self.idle.send_modify(|idle| *idle += 1);
        if self.tx.send(index).is_err() {
            self.idle.send_modify(|idle| *idle -= 1);
        }
    }

    ///
    /// Take an idle slot, waiting until one is released.
    ///
    /// # Errors
    /// If the registry is closed, before or while waiting.
    ///
    pub async fn acquire(&self) -> Result<usize, RegistryClosed> {
        let next = async {
            let mut rx = self.rx.lock().await;
            rx.recv().await
        };

        let index = tokio::select! {
            biased;
            () = self.closed.cancelled() => None,
            index = next => index,
        }
        .ok_or(RegistryClosed(self.kind))?;

        self.idle.send_modify(|idle| *idle -= 1);
        Ok(index)
    }

    /// Wait until at least `count` slots are idle, without taking any.
    pub async fn wait_for_idle(&self, count: usize) {
        let mut idle = self.idle.subscribe();
        // The sender lives in `self`, so this only returns once satisfied.
        let _ = idle.wait_for(|idle| *idle >= count).await;
    }

    /// Remove every idle slot without waiting, returning their indices.
    pub async fn drain(&self) -> Vec<usize> {
        let mut rx = self.rx.lock().await;
        let mut drained = Vec::new();

        while let Ok(index) = rx.try_recv() {
            self.idle.send_modify(|idle| *idle -= 1);
            drained.push(index);
        }

        drained
    }

    /// Refuse further releases and fail every current and future acquirer.
    pub fn close(&self) {
        self.closed.cancel();
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

//! Per-epoch fan-out of raw transport events. Queues are unbounded and ordered.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex, MutexGuard, PoisonError, Weak,
};

use shared::protocol::{EventKind, TransportEvent};
use tokio::sync::mpsc;
use tracing::trace;

struct Subscriber {
    id: u64,
    kind: EventKind,
    tx: mpsc::UnboundedSender<TransportEvent>,
}

pub struct EventSource {
    epoch: u64,
    next_id: AtomicU64,
    subscribers: Mutex<Vec<Subscriber>>,
}

impl EventSource {
    pub fn new(epoch: u64) -> Arc<Self> {
        Arc::new(Self {
            epoch,
            next_id: AtomicU64::new(1),
            subscribers: Mutex::new(Vec::new()),
        })
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn subscribe(self: &Arc<Self>, kind: EventKind) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers().push(Subscriber { id, kind, tx });
        Subscription {
            id,
            kind,
            rx,
            source: Arc::downgrade(self),
        }
    }

    /// Delivers `event` to every live subscriber of its kind and returns how
    /// many received it.
    pub fn publish(&self, event: TransportEvent) -> usize {
        let kind = event.kind();
        let mut subscribers = self.subscribers();
        subscribers.retain(|subscriber| !subscriber.tx.is_closed());
        let mut delivered = 0;
        for subscriber in subscribers.iter().filter(|s| s.kind == kind) {
            if subscriber.tx.send(event.clone()).is_ok() {
                delivered += 1;
            }
        }
        trace!(epoch = self.epoch, ?kind, delivered, "events: published");
        delivered
    }

    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.subscribers()
            .iter()
            .filter(|subscriber| subscriber.kind == kind && !subscriber.tx.is_closed())
            .count()
    }

    /// Detaches every subscriber; their queues end after draining.
    pub fn close(&self) {
        self.subscribers().clear();
    }

    fn unsubscribe(&self, id: u64) {
        self.subscribers().retain(|subscriber| subscriber.id != id);
    }

    fn subscribers(&self) -> MutexGuard<'_, Vec<Subscriber>> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct Subscription {
    id: u64,
    kind: EventKind,
    rx: mpsc::UnboundedReceiver<TransportEvent>,
    source: Weak<EventSource>,
}

impl Subscription {
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub async fn recv(&mut self) -> Option<TransportEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<TransportEvent> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(source) = self.source.upgrade() {
            source.unsubscribe(self.id);
        }
    }
}

#[cfg(test)]
#[path = "tests/event_source_tests.rs"]
mod tests;

//! Fan-out of [`StatusEvent`]s to passive listeners.
//!
//! One broadcaster is built at boot and shared through `AppState`.
//! Delivery is best effort: no buffering beyond each listener's channel,
//! no replay for late subscribers.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use qd_domain::status::StatusEvent;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use uuid::Uuid;

/// Per-listener channel depth. A listener this far behind misses events.
const LISTENER_BUFFER: usize = 64;

/// Outcome of one [`StatusBroadcaster::publish`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: usize,
    /// Listeners whose channel was closed; they are no longer registered.
    pub removed: usize,
    /// Listeners whose buffer was full; they stay registered.
    pub skipped: usize,
}

pub struct StatusBroadcaster {
    listeners: RwLock<HashMap<Uuid, mpsc::Sender<Arc<str>>>>,
}

impl Default for StatusBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusBroadcaster {
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(HashMap::new()),
        }
    }

    /// Register a listener whose first frame is a `connected` event
    /// carrying the listener count (including itself).
    ///
    /// The frame is queued before the listener becomes visible to
    /// [`publish`](Self::publish), so no event can overtake it.
    pub fn subscribe(self: &Arc<Self>) -> Subscription {
        let (tx, rx) = mpsc::channel(LISTENER_BUFFER);

        let clients = self.listener_count() + 1;
        if let Some(frame) = encode(&StatusEvent::connected(clients)) {
            let _ = tx.try_send(frame);
        }
        let id = self.register(tx);
        tracing::debug!(listener_id = %id, clients, "status listener connected");

        Subscription {
            id,
            rx,
            registry: Arc::clone(self),
        }
    }

    /// Add a raw sender to the registry. [`subscribe`](Self::subscribe) is
    /// the usual entry point.
    pub fn register(&self, tx: mpsc::Sender<Arc<str>>) -> Uuid {
        let id = Uuid::new_v4();
        self.listeners.write().insert(id, tx);
        id
    }

    /// Remove a listener. Unknown ids are ignored.
    pub fn unsubscribe(&self, id: &Uuid) {
        if self.listeners.write().remove(id).is_some() {
            tracing::debug!(listener_id = %id, "status listener removed");
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// Serialize `event` once and offer it to every listener.
    ///
    /// A closed channel removes that listener; the rest still receive the
    /// event.
    pub fn publish(&self, event: &StatusEvent) -> PublishReport {
        let mut report = PublishReport::default();
        let Some(frame) = encode(event) else {
            return report;
        };

        let mut closed = Vec::new();
        {
            let listeners = self.listeners.read();
            for (id, tx) in listeners.iter() {
                match tx.try_send(Arc::clone(&frame)) {
                    Ok(()) => report.delivered += 1,
                    Err(TrySendError::Closed(_)) => closed.push(*id),
                    Err(TrySendError::Full(_)) => {
                        report.skipped += 1;
                        tracing::warn!(listener_id = %id, kind = event.kind(), "status listener lagging, event dropped");
                    }
                }
            }
        }

        if !closed.is_empty() {
            let mut listeners = self.listeners.write();
            for id in &closed {
                listeners.remove(id);
                tracing::debug!(listener_id = %id, "status listener channel closed, removed");
            }
            report.removed = closed.len();
        }

        tracing::trace!(
            kind = event.kind(),
            delivered = report.delivered,
            removed = report.removed,
            "status event published"
        );
        report
    }
}

fn encode(event: &StatusEvent) -> Option<Arc<str>> {
    match serde_json::to_string(event) {
        Ok(json) => Some(Arc::from(json)),
        Err(e) => {
            tracing::warn!(error = %e, kind = event.kind(), "failed to serialize status event");
            None
        }
    }
}

// ── Subscription ─────────────────────────────────────────────────────

/// A registered listener. Dropping it unsubscribes.
pub struct Subscription {
    id: Uuid,
    rx: mpsc::Receiver<Arc<str>>,
    registry: Arc<StatusBroadcaster>,
}

impl Subscription {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Next serialized event, or `None` once unsubscribed.
    pub async fn recv(&mut self) -> Option<Arc<str>> {
        self.rx.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.registry.unsubscribe(&self.id);
    }
}

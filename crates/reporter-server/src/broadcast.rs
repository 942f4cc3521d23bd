//! Fan-out of detection events to live subscribers.
//!
//! Each subscriber owns a bounded channel. A publish snapshots the registry,
//! then offers the serialized event to every subscriber concurrently, each
//! with its own timeout. A subscriber that does not accept within the
//! timeout, or whose receiver is gone, is evicted; dropping its sender
//! closes the channel.

use futures_util::future::join_all;
use reporter_types::DetectionEvent;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;
use uuid::Uuid;

/// A serialized event as delivered to subscribers.
pub type Message = Arc<str>;

type SubscriberMap = HashMap<Uuid, mpsc::Sender<Message>>;

#[derive(Debug)]
struct Registry {
    subscribers: Mutex<SubscriberMap>,
    delivery_timeout: Duration,
    buffer: usize,
}

impl Registry {
    fn lock(&self) -> MutexGuard<'_, SubscriberMap> {
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn remove(&self, id: Uuid) -> bool {
        self.lock().remove(&id).is_some()
    }
}

/// Registry of subscribers and the publish loop over them.
///
/// Cheap to clone; clones share the same registry.
#[derive(Debug, Clone)]
pub struct Broadcaster {
    registry: Arc<Registry>,
}

impl Broadcaster {
    /// Creates a broadcaster.
    ///
    /// `buffer` is the per-subscriber channel capacity and must be at least 1.
    pub fn new(delivery_timeout: Duration, buffer: usize) -> Self {
        Self {
            registry: Arc::new(Registry {
                subscribers: Mutex::new(HashMap::new()),
                delivery_timeout,
                buffer: buffer.max(1),
            }),
        }
    }

    /// Registers a new subscriber.
    ///
    /// The subscriber receives every event published after this call returns.
    pub fn subscribe(&self) -> SubscriberHandle {
        let (tx, rx) = mpsc::channel(self.registry.buffer);

        let id = {
            let mut subscribers = self.registry.lock();
            loop {
                let id = Uuid::new_v4();
                if let Entry::Vacant(slot) = subscribers.entry(id) {
                    slot.insert(tx);
                    break id;
                }
            }
        };

        tracing::debug!(subscriber = %id, "subscriber registered");
        SubscriberHandle {
            id,
            rx,
            registry: Arc::clone(&self.registry),
        }
    }

    /// Removes a subscriber. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, id: Uuid) -> bool {
        let removed = self.registry.remove(id);
        if removed {
            tracing::debug!(subscriber = %id, "subscriber unregistered");
        }
        removed
    }

    /// Number of currently registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.registry.lock().len()
    }

    /// Delivers `event` to every registered subscriber.
    ///
    /// Returns the number of subscribers that accepted it.
    pub async fn publish(&self, event: &DetectionEvent) -> usize {
        match serde_json::to_string(event) {
            Ok(json) => self.publish_message(json.into()).await,
            Err(e) => {
                tracing::error!(id = event.id, "failed to serialize detection event: {}", e);
                0
            }
        }
    }

    /// Delivers an already-serialized message to every registered subscriber.
    pub async fn publish_message(&self, message: Message) -> usize {
        let targets: Vec<(Uuid, mpsc::Sender<Message>)> = self
            .registry
            .lock()
            .iter()
            .map(|(id, tx)| (*id, tx.clone()))
            .collect();

        let timeout = self.registry.delivery_timeout;
        let outcomes = join_all(targets.into_iter().map(|(id, tx)| {
            let message = Arc::clone(&message);
            async move { (id, tx.send_timeout(message, timeout).await) }
        }))
        .await;

        let mut delivered = 0;
        for (id, outcome) in outcomes {
            match outcome {
                Ok(()) => delivered += 1,
                Err(SendTimeoutError::Timeout(_)) => {
                    if self.registry.remove(id) {
                        tracing::warn!(
                            subscriber = %id,
                            timeout_ms = timeout.as_millis() as u64,
                            "subscriber did not accept event in time; dropping it"
                        );
                    }
                }
                Err(SendTimeoutError::Closed(_)) => {
                    if self.registry.remove(id) {
                        tracing::debug!(subscriber = %id, "subscriber went away; dropping it");
                    }
                }
            }
        }
        delivered
    }
}

/// A subscriber's receiving end.
///
/// Dropping the handle unregisters the subscriber.
#[derive(Debug)]
pub struct SubscriberHandle {
    id: Uuid,
    rx: mpsc::Receiver<Message>,
    registry: Arc<Registry>,
}

impl SubscriberHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Waits for the next event.
    ///
    /// Returns `None` once the subscriber has been evicted and its buffered
    /// events are drained.
    pub async fn recv(&mut self) -> Option<Message> {
        self.rx.recv().await
    }

    /// Returns the next buffered event without waiting.
    pub fn try_recv(&mut self) -> Option<Message> {
        self.rx.try_recv().ok()
    }
}

impl Drop for SubscriberHandle {
    fn drop(&mut self) {
        if self.registry.remove(self.id) {
            tracing::debug!(subscriber = %self.id, "subscriber disconnected");
        }
    }
}

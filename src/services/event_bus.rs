//! EventBus service for lifecycle event streaming and distribution.
//!
//! Provides a broadcast-based event system with sequence numbering and
//! optional persistence. Persistence failures are logged and never block
//! the caller.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::domain::models::LifecycleEvent;
use crate::domain::ports::EventStore;

/// Configuration for the EventBus.
#[derive(Debug, Clone)]
pub struct EventBusConfig {
    /// Channel capacity for the broadcast channel.
    pub channel_capacity: usize,
    /// Whether to persist events to storage.
    pub persist_events: bool,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
            persist_events: true,
        }
    }
}

/// Central event bus for broadcasting lifecycle events to multiple consumers.
pub struct EventBus {
    sender: broadcast::Sender<LifecycleEvent>,
    sequence: AtomicU64,
    store: Option<Arc<dyn EventStore>>,
    config: EventBusConfig,
}

impl EventBus {
    /// Create a new EventBus with the given configuration.
    pub fn new(config: EventBusConfig) -> Self {
        let (sender, _) = broadcast::channel(config.channel_capacity);
        Self {
            sender,
            sequence: AtomicU64::new(0),
            store: None,
            config,
        }
    }

    /// Add an event store for persistence.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn EventStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Continue numbering after events persisted by an earlier run.
    #[must_use]
    pub fn starting_at(self, next_sequence: u64) -> Self {
        self.sequence.store(next_sequence, Ordering::SeqCst);
        self
    }

    /// Publish an event.
    pub async fn publish(&self, mut event: LifecycleEvent) {
        event.sequence = self.sequence.fetch_add(1, Ordering::SeqCst);

        if self.config.persist_events {
            if let Some(ref store) = self.store {
                if let Err(e) = store.append(&event).await {
                    tracing::warn!(
                        event_type = %event.event_type,
                        "Failed to persist event: {}",
                        e
                    );
                }
            }
        }

        // No subscribers is fine
        let _ = self.sender.send(event);
    }

    /// Subscribe to the event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.sender.subscribe()
    }

    /// Next sequence number to be assigned.
    pub fn current_sequence(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }

    /// Get the event store if configured.
    pub fn store(&self) -> Option<Arc<dyn EventStore>> {
        self.store.clone()
    }

    /// Get the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(EventBusConfig::default())
    }
}

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, trace, warn};

/// Default channel capacity for engine event buses
pub const EVENT_BUS_CAPACITY: usize = 100;

/// An event that can flow through an [`EventBus`]
pub trait BusEvent: Clone + Send + 'static {
    /// Short label used for per-variant statistics
    fn label(&self) -> &'static str;
}

/// Statistics about bus activity
#[derive(Debug, Clone, Default)]
pub struct EventBusStats {
    /// Number of events delivered to at least one subscriber
    pub events_published: u64,
    /// Number of events published while nobody was listening
    pub events_dropped: u64,
    /// Count of events by variant label
    pub type_counts: HashMap<&'static str, u64>,
}

/// Typed broadcast channel connecting the engine to its host surfaces.
///
/// This replaces the original fire-and-forget runtime messaging: each
/// surface (popup, options page, background worker) subscribes and
/// receives every state-change event published after its subscription.
/// Delivery is still eventually consistent - a surface that subscribes
/// late re-reads state explicitly rather than replaying missed events.
pub struct EventBus<T: BusEvent> {
    sender: broadcast::Sender<T>,
    capacity: usize,
    stats: Arc<RwLock<EventBusStats>>,
}

impl<T: BusEvent> EventBus<T> {
    /// Create a new event bus with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        debug!(capacity, "Creating event bus");
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            capacity,
            stats: Arc::new(RwLock::new(EventBusStats::default())),
        }
    }

    /// Get a receiver to subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<T> {
        trace!("New subscriber registered");
        self.sender.subscribe()
    }

    /// Publish an event to all subscribers, returning how many received it.
    ///
    /// Publishing with no subscribers is not an error: the event is
    /// counted as dropped and 0 is returned. State changes must never
    /// fail because nobody is listening yet.
    pub async fn publish(&self, event: T) -> usize {
        let label = event.label();

        match self.sender.send(event) {
            Ok(receivers) => {
                let mut stats = self.stats.write().await;
                stats.events_published += 1;
                *stats.type_counts.entry(label).or_insert(0) += 1;
                trace!(label, receivers, "Event published");
                receivers
            }
            Err(_) => {
                let mut stats = self.stats.write().await;
                stats.events_dropped += 1;
                warn!(label, "No subscribers for event, dropped");
                0
            }
        }
    }

    /// Get current bus statistics
    pub async fn stats(&self) -> EventBusStats {
        self.stats.read().await.clone()
    }

    /// Reset all statistics counters
    pub async fn reset_stats(&self) {
        *self.stats.write().await = EventBusStats::default();
    }

    /// Configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Current number of subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl<T: BusEvent> Clone for EventBus<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            capacity: self.capacity,
            stats: Arc::clone(&self.stats),
        }
    }
}

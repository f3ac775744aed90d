//! Event bus for internal communication
//!
//! Broadcast-based event system for decoupled communication between the
//! pipeline, the reconciler, and any front-end observer. The refresh
//! signal that re-reads observed state travels on this bus.

use tokio::sync::broadcast;
use tracing::{debug, warn};

use alloy_primitives::Address;

/// Event types that can be broadcast through the system
#[derive(Debug, Clone)]
pub enum AppEvent {
    // Stream connection events
    StreamConnected,
    StreamDisconnected,
    /// One parsed server-sent event frame: event name plus data payload.
    StreamFrame { event: String, data: String },

    /// Re-read observed state for every cached vault.
    Refresh,
    /// One vault's cached record changed.
    VaultUpdated { vault: Address },

    // Pipeline progress
    PlanStarted { vault: Address, steps: usize },
    PlanCompleted { vault: Address },
    PlanHalted { vault: Address, step: usize },
}

/// Event bus for broadcasting events to multiple subscribers
pub struct EventBus {
    sender: broadcast::Sender<AppEvent>,
    capacity: usize,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender, capacity }
    }

    /// Get a sender for publishing events
    pub fn sender(&self) -> broadcast::Sender<AppEvent> {
        self.sender.clone()
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<AppEvent> {
        self.sender.subscribe()
    }

    /// Publish an event
    pub fn publish(&self, event: AppEvent) {
        match self.sender.send(event) {
            Ok(count) => {
                debug!("Event sent to {} receivers", count);
            }
            Err(_) => {
                // No receivers - this is fine during startup/shutdown
                debug!("No event receivers");
            }
        }
    }

    /// Get number of active receivers
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

/// Event processor that handles events from the bus
pub struct EventProcessor {
    receiver: broadcast::Receiver<AppEvent>,
    name: String,
}

impl EventProcessor {
    pub fn new(bus: &EventBus, name: &str) -> Self {
        Self {
            receiver: bus.subscribe(),
            name: name.to_string(),
        }
    }

    /// Process next event (blocking)
    pub async fn next(&mut self) -> Option<AppEvent> {
        match self.receiver.recv().await {
            Ok(event) => Some(event),
            Err(broadcast::error::RecvError::Lagged(count)) => {
                warn!(
                    "Event processor '{}' lagged by {} messages",
                    self.name, count
                );
                self.receiver.recv().await.ok()
            }
            Err(broadcast::error::RecvError::Closed) => {
                debug!("Event bus closed for processor '{}'", self.name);
                None
            }
        }
    }

    /// Try to receive event without blocking
    pub fn try_next(&mut self) -> Option<AppEvent> {
        self.receiver.try_recv().ok()
    }
}

/// Helper to create typed event handlers
pub fn spawn_event_handler<F, Fut>(
    bus: &EventBus,
    name: &str,
    mut handler: F,
) -> tokio::task::JoinHandle<()>
where
    F: FnMut(AppEvent) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send,
{
    let mut processor = EventProcessor::new(bus, name);
    let name = name.to_string();

    tokio::spawn(async move {
        debug!("Event handler '{}' started", name);
        while let Some(event) = processor.next().await {
            handler(event).await;
        }
        debug!("Event handler '{}' stopped", name);
    })
}

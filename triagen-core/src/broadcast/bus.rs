//! Event broadcaster
//!
//! Fire-and-forget fan-out to the current members of a topic. Every observer
//! owns one FIFO channel, so two publishes made one after the other by the
//! same caller reach each observer in that order. Nothing is retried and
//! nothing is kept for late joiners.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

use super::message::{Envelope, EventName};
use super::registry::{ObserverId, SharedRegistry};
use super::topic::Topic;

/// Shared reference to the broadcaster
pub type SharedBroadcaster = Arc<Broadcaster>;

/// Delivery counts for one publish
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: usize,
    /// Observer buffer was full
    pub dropped: usize,
    /// Observer had gone away; it has been pruned
    pub closed: usize,
}

/// Publishes domain events to topic members
pub struct Broadcaster {
    registry: SharedRegistry,
}

impl Broadcaster {
    pub fn new(registry: SharedRegistry) -> Self {
        Self { registry }
    }

    /// Create a shared reference to this broadcaster
    pub fn shared(self) -> SharedBroadcaster {
        Arc::new(self)
    }

    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    /// Publish `payload` under `name` to every member of `topic`.
    ///
    /// Never fails: serialization problems and slow or vanished observers
    /// are logged and skipped.
    pub fn publish<T: Serialize + ?Sized>(
        &self,
        topic: &Topic,
        name: EventName,
        payload: &T,
    ) -> PublishReport {
        let payload = match serde_json::to_value(payload) {
            Ok(value) => value,
            Err(e) => {
                warn!(topic = %topic, event = %name, "Failed to serialize payload: {}", e);
                return PublishReport::default();
            }
        };

        let envelope = Arc::new(Envelope {
            topic: topic.clone(),
            name,
            payload,
            published_at: Utc::now(),
        });

        let mut report = PublishReport::default();
        let mut gone: Vec<ObserverId> = Vec::new();

        for (observer, sender) in self.registry.senders(topic) {
            match sender.try_send(envelope.clone()) {
                Ok(()) => report.delivered += 1,
                Err(TrySendError::Full(_)) => {
                    report.dropped += 1;
                    warn!(observer = %observer, topic = %topic, event = %name, "Observer buffer full, dropping event");
                }
                Err(TrySendError::Closed(_)) => {
                    report.closed += 1;
                    gone.push(observer);
                }
            }
        }

        for observer in gone {
            self.registry.disconnect(observer);
        }

        debug!(
            topic = %topic,
            event = %name,
            receivers = report.delivered,
            "Event published"
        );
        report
    }
}

//! Real-time fan-out of incident changes to connected observers
//!
//! # Architecture
//!
//! 1. **Topics** (`topic.rs`): `general`, `team:<id>`, `incident:<id>`.
//!
//! 2. **Registry** (`registry.rs`): which live observers are joined to
//!    which topics. Connection-scoped, never persisted.
//!
//! 3. **Broadcaster** (`bus.rs`): best-effort publish to the current
//!    members of a topic.
//!
//! 4. **Messages** (`message.rs`): event names, envelopes and the tagged
//!    timeline changes observers reconcile against.
//!
//! # Flow
//!
//! ```text
//! ┌──────────────┐     ┌──────────────┐     ┌──────────────┐
//! │  Lifecycle   │────▶│ Broadcaster  │────▶│  Observers   │
//! │  / Scheduler │     │  (publish)   │     │ (mpsc recv)  │
//! └──────────────┘     └──────┬───────┘     └──────────────┘
//!                             │ members(topic)
//!                             ▼
//!                      ┌──────────────┐
//!                      │   Registry   │
//!                      └──────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use triagen_core::broadcast::{Broadcaster, EventName, SubscriptionRegistry, Topic};
//!
//! let registry = SubscriptionRegistry::default().shared();
//! let bus = Broadcaster::new(registry.clone()).shared();
//!
//! let mut observer = registry.connect(&actor);
//! registry.join(observer.id, Topic::incident(&incident.id))?;
//!
//! bus.publish(&Topic::incident(&incident.id), EventName::IncidentUpdated, &incident);
//! let envelope = observer.recv().await;
//! ```

pub mod bus;
pub mod message;
pub mod registry;
pub mod topic;

pub use bus::{Broadcaster, PublishReport, SharedBroadcaster};
pub use message::{EscalationNotice, Envelope, EventName, Removed, Timeline, TimelineChange};
pub use registry::{
    ObserverHandle, ObserverId, SharedRegistry, SubscriptionRegistry, DEFAULT_OBSERVER_BUFFER,
};
pub use topic::Topic;

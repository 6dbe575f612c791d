//! Triagen incident lifecycle engine
//!
//! This library provides:
//! - Version-guarded incident updates (optimistic concurrency)
//! - SLA-driven escalation checks on a durable delayed-task queue
//! - Topic-scoped real-time fan-out to connected observers
//!
//! # Components
//!
//! - [`lifecycle`]: create / update / delete incidents, comments, attachments
//! - [`scheduler`]: response and SLA escalation checks
//! - [`broadcast`]: subscription registry and event broadcaster
//! - [`store`] / [`blob`]: persistence collaborators with in-process implementations
//! - [`engine`]: wiring plus the escalation worker lifecycle
//!
//! # Usage
//!
//! ```ignore
//! use triagen_core::{Actor, Engine, EngineConfig, NewIncident, Role, Severity};
//!
//! let mut engine = Engine::from_config(EngineConfig::default())?;
//! engine.start();
//!
//! let actor = Actor::new("u-1", Role::Responder).with_team(team_id);
//! let incident = engine
//!     .manager()
//!     .create(&actor, NewIncident::new("checkout 500s", Severity::High))
//!     .await?;
//! ```

#![allow(clippy::uninlined_format_args)]

pub mod blob;
pub mod broadcast;
pub mod config;
pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod model;
pub mod scheduler;
pub mod store;

pub use config::{ConfigError, EngineConfig};
pub use engine::Engine;
pub use error::{TriageError, TriageResult};
pub use lifecycle::{LifecycleManager, UploadTicket};
pub use model::{
    Actor, Attachment, EventKind, Incident, IncidentDetail, IncidentEvent, IncidentPatch,
    ListFilter, NewAttachment, NewIncident, Role, Scope, Severity, Status, Team,
};
pub use scheduler::{CheckKind, EscalationScheduler, FireOutcome};

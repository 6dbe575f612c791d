//! Domain model: incidents, timeline events, teams, attachments and the
//! verified actor performing each operation.

pub mod actor;
pub mod types;

pub use actor::{Actor, Role};
pub use types::{
    Attachment, AttachmentId, EventId, EventKind, Incident, IncidentDetail, IncidentEvent,
    IncidentId, IncidentPatch, ListFilter, NewAttachment, NewIncident, Scope, Severity, Status,
    Team, TeamId, UserId,
};

/// Author label for entries the engine writes on its own behalf
pub const SYSTEM_AUTHOR: &str = "system";

//! Transactional store contract for incidents and their owned records.
//!
//! The engine never reads-then-writes to enforce the version guard: the
//! single [`IncidentStore::update_if_version`] call compares, applies and
//! bumps the version atomically, reporting a mismatch instead of writing.
//!
//! # Usage
//!
//! ```ignore
//! use triagen_core::store::{CasOutcome, IncidentStore, MemoryStore};
//!
//! let store = MemoryStore::new().shared();
//! match store.update_if_version(&id, 3, &IncidentPatch::status(Status::Resolved)).await? {
//!     CasOutcome::Applied { current, .. } => assert_eq!(current.version, 4),
//!     CasOutcome::VersionMismatch { actual } => { /* someone else won */ }
//!     CasOutcome::Missing => { /* deleted meanwhile */ }
//! }
//! ```

pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;

use crate::model::{
    Attachment, EventKind, Incident, IncidentEvent, IncidentPatch, Severity, Status, Team,
};

pub use memory::MemoryStore;

/// Error type for store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Duplicate key: {0}")]
    Duplicate(String),

    #[error("Lock poisoned")]
    LockPoisoned,
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Shared reference to a store implementation
pub type SharedIncidentStore = Arc<dyn IncidentStore>;

/// Outcome of a version-guarded write
#[derive(Debug, Clone)]
pub enum CasOutcome {
    /// Patch applied; `current.version == previous.version + 1`
    Applied {
        previous: Box<Incident>,
        current: Box<Incident>,
    },
    /// Stored version differed from the expected one; nothing written
    VersionMismatch { actual: u64 },
    /// No incident with that id
    Missing,
}

/// Store-level listing predicate (all set fields must match)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IncidentQuery {
    pub status: Option<Status>,
    pub severity: Option<Severity>,
    pub assignee_id: Option<String>,
    pub team_id: Option<String>,
}

impl IncidentQuery {
    pub fn matches(&self, incident: &Incident) -> bool {
        if let Some(status) = self.status {
            if incident.status != status {
                return false;
            }
        }
        if let Some(severity) = self.severity {
            if incident.severity != severity {
                return false;
            }
        }
        if let Some(ref assignee) = self.assignee_id {
            if incident.assignee_id.as_ref() != Some(assignee) {
                return false;
            }
        }
        if let Some(ref team) = self.team_id {
            if incident.team_id.as_ref() != Some(team) {
                return false;
            }
        }
        true
    }
}

/// Durable store for incidents, timeline events, teams and attachments
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IncidentStore: Send + Sync {
    // ---- incidents ---------------------------------------------------------

    /// Insert a freshly created incident
    async fn insert_incident(&self, incident: Incident) -> StoreResult<Incident>;

    async fn get_incident(&self, id: &str) -> StoreResult<Option<Incident>>;

    /// Apply `patch` and bump the version by one only if the stored version
    /// equals `expected_version`, as one atomic step.
    async fn update_if_version(
        &self,
        id: &str,
        expected_version: u64,
        patch: &IncidentPatch,
    ) -> StoreResult<CasOutcome>;

    /// Delete the incident and anything it still owns. Returns whether it existed.
    async fn delete_incident(&self, id: &str) -> StoreResult<bool>;

    /// Incidents matching `query`, newest first
    async fn list_incidents(&self, query: &IncidentQuery) -> StoreResult<Vec<Incident>>;

    // ---- timeline ----------------------------------------------------------

    async fn append_event(&self, event: IncidentEvent) -> StoreResult<IncidentEvent>;

    async fn get_event(&self, id: &str) -> StoreResult<Option<IncidentEvent>>;

    /// Replace an event's message, returning the updated event if it exists
    async fn update_event_message(
        &self,
        id: &str,
        message: &str,
    ) -> StoreResult<Option<IncidentEvent>>;

    async fn delete_event(&self, id: &str) -> StoreResult<bool>;

    /// Timeline for an incident in append order
    async fn list_events(&self, incident_id: &str) -> StoreResult<Vec<IncidentEvent>>;

    /// Count of timeline entries of one kind (used for audits and tests)
    async fn count_events(&self, incident_id: &str, kind: EventKind) -> StoreResult<usize>;

    /// Delete the whole timeline of an incident, returning how many went
    async fn delete_events_for(&self, incident_id: &str) -> StoreResult<usize>;

    // ---- teams -------------------------------------------------------------

    async fn insert_team(&self, team: Team) -> StoreResult<Team>;

    async fn get_team(&self, id: &str) -> StoreResult<Option<Team>>;

    async fn find_team_by_name(&self, name: &str) -> StoreResult<Option<Team>>;

    // ---- attachments -------------------------------------------------------

    async fn insert_attachment(&self, attachment: Attachment) -> StoreResult<Attachment>;

    async fn get_attachment(&self, id: &str) -> StoreResult<Option<Attachment>>;

    async fn list_attachments(&self, incident_id: &str) -> StoreResult<Vec<Attachment>>;

    async fn delete_attachment(&self, id: &str) -> StoreResult<bool>;
}

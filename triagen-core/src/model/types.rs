//! Core entity types for incident tracking

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for incidents
pub type IncidentId = String;

/// Unique identifier for timeline events
pub type EventId = String;

/// Unique identifier for users (supplied by the identity provider)
pub type UserId = String;

/// Unique identifier for teams
pub type TeamId = String;

/// Unique identifier for attachments
pub type AttachmentId = String;

pub(crate) fn new_id() -> String {
    Uuid::new_v4().to_string()
}

// ============================================================================
// Severity / Status
// ============================================================================

/// Incident severity, ordered from least to most urgent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub const ALL: [Severity; 4] = [
        Severity::Low,
        Severity::Medium,
        Severity::High,
        Severity::Critical,
    ];

    /// Hours allowed before the SLA check escalates
    pub fn default_sla_hours(self) -> i64 {
        match self {
            Severity::Critical => 1,
            Severity::High => 4,
            Severity::Medium => 24,
            Severity::Low => 48,
        }
    }

    pub fn default_sla(self) -> Duration {
        Duration::hours(self.default_sla_hours())
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "LOW"),
            Self::Medium => write!(f, "MEDIUM"),
            Self::High => write!(f, "HIGH"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Incident workflow status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Open,
    Acknowledged,
    Resolved,
    Closed,
}

impl Status {
    /// RESOLVED and CLOSED end escalation for good
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Resolved | Status::Closed)
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open => write!(f, "OPEN"),
            Self::Acknowledged => write!(f, "ACKNOWLEDGED"),
            Self::Resolved => write!(f, "RESOLVED"),
            Self::Closed => write!(f, "CLOSED"),
        }
    }
}

// ============================================================================
// Incident
// ============================================================================

/// A reported incident
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    pub id: IncidentId,
    pub title: String,
    pub description: Option<String>,
    pub severity: Severity,
    pub status: Status,
    /// Bumped by exactly one on every successful write
    pub version: u64,
    pub reporter_id: UserId,
    pub assignee_id: Option<UserId>,
    pub team_id: Option<TeamId>,
    /// `created_at` plus the severity's SLA window, fixed at creation
    pub sla_deadline: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Incident {
    /// Create a new OPEN incident at version 0
    pub fn new(
        title: String,
        description: Option<String>,
        severity: Severity,
        reporter_id: UserId,
        team_id: Option<TeamId>,
        sla_window: Duration,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: new_id(),
            title,
            description,
            severity,
            status: Status::Open,
            version: 0,
            reporter_id,
            assignee_id: None,
            team_id,
            sla_deadline: Some(now + sla_window),
            tags: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Time between creation and the SLA deadline
    pub fn sla_window(&self) -> Option<Duration> {
        self.sla_deadline.map(|deadline| deadline - self.created_at)
    }
}

/// Partial update applied through the version-guarded write.
///
/// `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IncidentPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub severity: Option<Severity>,
    pub status: Option<Status>,
    pub assignee_id: Option<UserId>,
    pub team_id: Option<TeamId>,
    pub tags: Option<Vec<String>>,
}

impl IncidentPatch {
    pub fn severity(severity: Severity) -> Self {
        Self {
            severity: Some(severity),
            ..Self::default()
        }
    }

    pub fn status(status: Status) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Apply the set fields onto `incident`. Version and timestamps are the
    /// store's responsibility.
    pub fn apply_to(&self, incident: &mut Incident) {
        if let Some(title) = &self.title {
            incident.title = title.clone();
        }
        if let Some(description) = &self.description {
            incident.description = Some(description.clone());
        }
        if let Some(severity) = self.severity {
            incident.severity = severity;
        }
        if let Some(status) = self.status {
            incident.status = status;
        }
        if let Some(assignee) = &self.assignee_id {
            incident.assignee_id = Some(assignee.clone());
        }
        if let Some(team) = &self.team_id {
            incident.team_id = Some(team.clone());
        }
        if let Some(tags) = &self.tags {
            incident.tags = tags.clone();
        }
    }
}

/// Input for creating an incident
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewIncident {
    pub title: String,
    pub description: Option<String>,
    pub severity: Severity,
    /// Explicit team; wins over `team_name`
    pub team_id: Option<TeamId>,
    /// Team looked up by name when no id is given
    pub team_name: Option<String>,
}

impl NewIncident {
    pub fn new(title: impl Into<String>, severity: Severity) -> Self {
        Self {
            title: title.into(),
            description: None,
            severity,
            team_id: None,
            team_name: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_team_id(mut self, team_id: impl Into<TeamId>) -> Self {
        self.team_id = Some(team_id.into());
        self
    }

    pub fn with_team_name(mut self, name: impl Into<String>) -> Self {
        self.team_name = Some(name.into());
        self
    }
}

// ============================================================================
// Timeline events
// ============================================================================

/// Kind of timeline entry.
///
/// `Edited` and `Deleted` are never stored; they tag republished changes so
/// observers patch an existing entry instead of appending a new one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    Comment,
    StatusChange,
    Assignment,
    SystemAlert,
    Edited,
    Deleted,
}

impl EventKind {
    /// Whether the authoring user may later edit or delete the entry
    pub fn is_user_editable(self) -> bool {
        match self {
            EventKind::Comment => true,
            EventKind::StatusChange
            | EventKind::Assignment
            | EventKind::SystemAlert
            | EventKind::Edited
            | EventKind::Deleted => false,
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Comment => write!(f, "COMMENT"),
            Self::StatusChange => write!(f, "STATUS_CHANGE"),
            Self::Assignment => write!(f, "ASSIGNMENT"),
            Self::SystemAlert => write!(f, "SYSTEM_ALERT"),
            Self::Edited => write!(f, "EDITED"),
            Self::Deleted => write!(f, "DELETED"),
        }
    }
}

/// One entry in an incident's timeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentEvent {
    pub id: EventId,
    pub incident_id: IncidentId,
    /// `None` for entries written by the engine itself
    pub user_id: Option<UserId>,
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

impl IncidentEvent {
    pub fn new(
        incident_id: impl Into<IncidentId>,
        user_id: Option<UserId>,
        kind: EventKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: new_id(),
            incident_id: incident_id.into(),
            user_id,
            kind,
            message: message.into(),
            created_at: Utc::now(),
        }
    }

    /// Entry written by the engine, not attributed to any person
    pub fn system(
        incident_id: impl Into<IncidentId>,
        kind: EventKind,
        message: impl Into<String>,
    ) -> Self {
        Self::new(incident_id, None, kind, message)
    }

    pub fn is_authored_by(&self, user_id: &str) -> bool {
        self.user_id.as_deref() == Some(user_id)
    }

    /// Display name for the author column
    pub fn author_label(&self) -> &str {
        self.user_id.as_deref().unwrap_or(super::SYSTEM_AUTHOR)
    }
}

// ============================================================================
// Teams / attachments
// ============================================================================

/// An operations team
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    pub id: TeamId,
    pub name: String,
}

impl Team {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            name: name.into(),
        }
    }
}

/// Metadata for a file held by the blob store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub id: AttachmentId,
    pub incident_id: IncidentId,
    pub filename: String,
    /// Blob key, always prefixed by `<incident_id>/`
    pub file_key: String,
    pub content_type: String,
    pub size_bytes: u64,
    pub uploaded_by: UserId,
    pub created_at: DateTime<Utc>,
}

/// Input for recording an uploaded attachment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAttachment {
    pub filename: String,
    pub file_key: String,
    pub content_type: String,
    pub size_bytes: u64,
}

impl Attachment {
    pub fn new(incident_id: impl Into<IncidentId>, uploaded_by: UserId, input: NewAttachment) -> Self {
        Self {
            id: new_id(),
            incident_id: incident_id.into(),
            filename: input.filename,
            file_key: input.file_key,
            content_type: input.content_type,
            size_bytes: input.size_bytes,
            uploaded_by,
            created_at: Utc::now(),
        }
    }
}

/// Incident together with its timeline and attachments
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncidentDetail {
    pub incident: Incident,
    pub events: Vec<IncidentEvent>,
    pub attachments: Vec<Attachment>,
}

// ============================================================================
// Listing
// ============================================================================

/// Which incidents a listing covers, relative to the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// Assigned to the caller
    Mine,
    /// Owned by the caller's team
    Team,
    #[default]
    All,
}

/// Caller-facing listing filter
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListFilter {
    pub status: Option<Status>,
    pub severity: Option<Severity>,
    #[serde(default)]
    pub scope: Scope,
}

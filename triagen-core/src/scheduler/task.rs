//! Escalation task identity and scheduling records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::{IncidentId, Status};

/// Which of the two independent escalation checks a task runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckKind {
    /// Fixed delay after creation; escalates only if nobody acknowledged
    Response,
    /// Severity-derived SLA window; escalates anything not yet terminal
    Sla,
}

impl CheckKind {
    pub const ALL: [CheckKind; 2] = [CheckKind::Response, CheckKind::Sla];

    /// Whether an incident in `status` should still be escalated by this check
    pub fn escalates_from(self, status: Status) -> bool {
        match self {
            CheckKind::Response => status == Status::Open,
            CheckKind::Sla => !status.is_terminal(),
        }
    }

    /// Message recorded on the timeline when this check escalates
    pub fn alert_message(self) -> &'static str {
        match self {
            CheckKind::Response => {
                "Auto-escalated: no response received within the response window."
            }
            CheckKind::Sla => "SLA breached: auto-escalated to CRITICAL severity.",
        }
    }
}

impl std::fmt::Display for CheckKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Response => write!(f, "response"),
            Self::Sla => write!(f, "sla"),
        }
    }
}

/// Dedupe key: at most one pending task per incident per check kind
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskKey {
    pub incident_id: IncidentId,
    pub kind: CheckKind,
}

impl TaskKey {
    pub fn new(incident_id: impl Into<IncidentId>, kind: CheckKind) -> Self {
        Self {
            incident_id: incident_id.into(),
            kind,
        }
    }
}

impl std::fmt::Display for TaskKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.kind, self.incident_id)
    }
}

/// A pending delayed task as held by the queue and its journal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub key: TaskKey,
    /// Wall-clock fire time, persisted so a restart can re-arm the task
    pub fire_at: DateTime<Utc>,
    pub enqueued_at: DateTime<Utc>,
    /// Changes on every (re-)schedule; an acknowledgement only removes the
    /// schedule it was delivered for
    pub token: Uuid,
}

impl ScheduledTask {
    pub fn new(key: TaskKey, fire_at: DateTime<Utc>) -> Self {
        Self {
            key,
            fire_at,
            enqueued_at: Utc::now(),
            token: Uuid::new_v4(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_check_only_escalates_open() {
        assert!(CheckKind::Response.escalates_from(Status::Open));
        assert!(!CheckKind::Response.escalates_from(Status::Acknowledged));
        assert!(!CheckKind::Response.escalates_from(Status::Resolved));
    }

    #[test]
    fn test_sla_check_escalates_any_non_terminal() {
        assert!(CheckKind::Sla.escalates_from(Status::Open));
        assert!(CheckKind::Sla.escalates_from(Status::Acknowledged));
        assert!(!CheckKind::Sla.escalates_from(Status::Resolved));
        assert!(!CheckKind::Sla.escalates_from(Status::Closed));
    }

    #[test]
    fn test_key_display_matches_job_ids() {
        assert_eq!(TaskKey::new("abc", CheckKind::Sla).to_string(), "sla-abc");
        assert_eq!(
            TaskKey::new("abc", CheckKind::Response).to_string(),
            "response-abc"
        );
    }
}

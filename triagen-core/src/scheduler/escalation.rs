//! Escalation Scheduler — SLA enforcement for incidents nobody resolved
//!
//! Two independent checks are armed when an incident is created:
//!
//! ```text
//! create ──┬── Response check (fixed delay)  ── fires ── still OPEN?            ──▶ escalate
//!          └── SLA check (severity window)   ── fires ── OPEN or ACKNOWLEDGED? ──▶ escalate
//!
//! resolve/close/delete ──▶ cancel both
//! ```
//!
//! Firing never trusts state captured at schedule time: [`EscalationScheduler::on_fire`]
//! re-reads the incident and writes through the same version-guarded store
//! call as human edits. A duplicate delivery finds the incident already
//! CRITICAL and does nothing.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use super::queue::{SharedTaskStore, TaskHandler};
use super::task::{CheckKind, ScheduledTask, TaskKey};
use crate::broadcast::{EscalationNotice, EventName, SharedBroadcaster, TimelineChange, Topic};
use crate::error::{TriageError, TriageResult};
use crate::model::{EventKind, Incident, IncidentEvent, IncidentPatch, Severity, Status};
use crate::store::{CasOutcome, SharedIncidentStore};

/// Tunables for the scheduler
#[derive(Debug, Clone)]
pub struct EscalationPolicy {
    /// Delay of the fixed response check
    pub response_delay: Duration,
    /// How many times a firing re-reads after losing a version race
    pub max_cas_attempts: u32,
}

impl Default for EscalationPolicy {
    fn default() -> Self {
        Self {
            response_delay: Duration::from_secs(120),
            max_cas_attempts: 3,
        }
    }
}

/// Why a firing left the incident alone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Incident no longer exists
    Missing,
    /// Incident is RESOLVED or CLOSED
    Terminal(Status),
    /// Status is outside what this check escalates (e.g. ACKNOWLEDGED for the response check)
    NotEligible(Status),
    /// Already CRITICAL; covers duplicate deliveries
    AlreadyCritical,
}

/// Result of one firing
#[derive(Debug, Clone)]
pub enum FireOutcome {
    Escalated(Box<Incident>),
    Skipped(SkipReason),
}

impl FireOutcome {
    pub fn escalated(&self) -> bool {
        matches!(self, FireOutcome::Escalated(_))
    }
}

/// Schedules, cancels and executes escalation checks
pub struct EscalationScheduler {
    store: SharedIncidentStore,
    queue: SharedTaskStore,
    broadcaster: SharedBroadcaster,
    policy: EscalationPolicy,
}

impl EscalationScheduler {
    pub fn new(
        store: SharedIncidentStore,
        queue: SharedTaskStore,
        broadcaster: SharedBroadcaster,
        policy: EscalationPolicy,
    ) -> Self {
        Self {
            store,
            queue,
            broadcaster,
            policy,
        }
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn policy(&self) -> &EscalationPolicy {
        &self.policy
    }

    /// Arm one check. A pending check with the same key is replaced.
    pub async fn schedule(
        &self,
        incident_id: &str,
        kind: CheckKind,
        delay: Duration,
    ) -> TriageResult<ScheduledTask> {
        let task = self
            .queue
            .enqueue(TaskKey::new(incident_id, kind), delay)
            .await?;
        info!(
            incident_id = %incident_id,
            check = %kind,
            fire_at = %task.fire_at,
            "Scheduled escalation check"
        );
        Ok(task)
    }

    /// Arm both checks for a freshly created incident
    pub async fn schedule_for(&self, incident: &Incident) -> TriageResult<Vec<ScheduledTask>> {
        let sla_delay = incident
            .sla_window()
            .and_then(|window| window.to_std().ok())
            .unwrap_or_else(|| {
                Severity::Low
                    .default_sla()
                    .to_std()
                    .unwrap_or(Duration::from_secs(48 * 3600))
            });

        let response = self
            .schedule(&incident.id, CheckKind::Response, self.policy.response_delay)
            .await?;
        let sla = self.schedule(&incident.id, CheckKind::Sla, sla_delay).await?;
        Ok(vec![response, sla])
    }

    /// Drop every pending check for an incident. Absent or already-fired
    /// checks are ignored. Returns how many were pending.
    pub async fn cancel(&self, incident_id: &str) -> TriageResult<usize> {
        let mut cancelled = 0;
        for kind in CheckKind::ALL {
            if self.queue.cancel(&TaskKey::new(incident_id, kind)).await? {
                cancelled += 1;
            }
        }
        if cancelled > 0 {
            info!(incident_id = %incident_id, cancelled, "Cancelled escalation checks");
        }
        Ok(cancelled)
    }

    /// Execute a check against the incident's current state
    pub async fn on_fire(&self, incident_id: &str, kind: CheckKind) -> TriageResult<FireOutcome> {
        debug!(incident_id = %incident_id, check = %kind, "Checking incident for escalation");

        let attempts = self.policy.max_cas_attempts.max(1);
        let mut last_conflict = None;

        for _ in 0..attempts {
            let Some(incident) = self.store.get_incident(incident_id).await? else {
                return Ok(FireOutcome::Skipped(SkipReason::Missing));
            };

            if let Some(reason) = Self::skip_reason(&incident, kind) {
                debug!(incident_id = %incident_id, check = %kind, ?reason, "Escalation not needed");
                return Ok(FireOutcome::Skipped(reason));
            }

            match self
                .store
                .update_if_version(
                    incident_id,
                    incident.version,
                    &IncidentPatch::severity(Severity::Critical),
                )
                .await?
            {
                CasOutcome::Applied { current, .. } => {
                    // The severity write is authoritative from here on.
                    self.record_escalation(&current, kind).await;
                    return Ok(FireOutcome::Escalated(current));
                }
                CasOutcome::VersionMismatch { actual } => {
                    debug!(
                        incident_id = %incident_id,
                        expected = incident.version,
                        actual,
                        "Incident changed under escalation, re-checking"
                    );
                    last_conflict = Some((incident.version, actual));
                }
                CasOutcome::Missing => return Ok(FireOutcome::Skipped(SkipReason::Missing)),
            }
        }

        let (expected, actual) = last_conflict.unwrap_or_default();
        Err(TriageError::conflict(incident_id, expected, actual))
    }

    fn skip_reason(incident: &Incident, kind: CheckKind) -> Option<SkipReason> {
        if incident.status.is_terminal() {
            return Some(SkipReason::Terminal(incident.status));
        }
        if !kind.escalates_from(incident.status) {
            return Some(SkipReason::NotEligible(incident.status));
        }
        if incident.severity == Severity::Critical {
            return Some(SkipReason::AlreadyCritical);
        }
        None
    }

    async fn record_escalation(&self, incident: &Incident, kind: CheckKind) {
        let alert = self
            .store
            .append_event(IncidentEvent::system(
                incident.id.clone(),
                EventKind::SystemAlert,
                kind.alert_message(),
            ))
            .await;

        warn!(
            incident_id = %incident.id,
            check = %kind,
            version = incident.version,
            "SLA breach: incident escalated to CRITICAL"
        );

        let room = Topic::incident(&incident.id);
        self.broadcaster
            .publish(&room, EventName::IncidentUpdated, incident);
        match alert {
            Ok(alert) => {
                self.broadcaster
                    .publish(&room, EventName::Timeline, &TimelineChange::Appended(alert));
            }
            Err(e) => error!(
                incident_id = %incident.id,
                check = %kind,
                "Failed to record escalation alert: {}",
                e
            ),
        }

        if let Some(team_id) = &incident.team_id {
            let notice = EscalationNotice {
                id: incident.id.clone(),
                title: incident.title.clone(),
                severity: incident.severity,
                message: format!("Incident \"{}\" has been auto-escalated", incident.title),
            };
            self.broadcaster
                .publish(&Topic::team(team_id), EventName::IncidentEscalated, &notice);
        }
    }
}

#[async_trait]
impl TaskHandler for EscalationScheduler {
    async fn handle(&self, task: &ScheduledTask) {
        match self.on_fire(&task.key.incident_id, task.key.kind).await {
            Ok(FireOutcome::Escalated(_)) => {}
            Ok(FireOutcome::Skipped(reason)) => {
                debug!(task = %task.key, ?reason, "Escalation check finished without change");
            }
            Err(e) => {
                // Not retried; the sibling check may still catch the breach.
                error!(task = %task.key, code = e.code(), "Escalation check failed: {}", e);
            }
        }
    }
}

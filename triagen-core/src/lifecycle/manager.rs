//! Incident create / update / delete / read under the version guard

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tracing::{debug, error, info, warn};

use crate::blob::SharedBlobStore;
use crate::broadcast::{EventName, Removed, SharedBroadcaster, TimelineChange, Topic};
use crate::config::{EngineConfig, SlaHours};
use crate::error::{TriageError, TriageResult};
use crate::model::{
    Actor, EventKind, Incident, IncidentDetail, IncidentEvent, IncidentPatch, ListFilter,
    NewIncident, Scope, Severity, TeamId,
};
use crate::scheduler::EscalationScheduler;
use crate::store::{CasOutcome, IncidentQuery, SharedIncidentStore};

/// Shared reference to the lifecycle manager
pub type SharedLifecycleManager = Arc<LifecycleManager>;

/// Lifecycle tunables
#[derive(Debug, Clone)]
pub struct LifecycleSettings {
    pub sla_hours: SlaHours,
    /// Attempts for an update without an expected version
    pub update_retry_limit: u32,
    pub presign_ttl: Duration,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

impl From<&EngineConfig> for LifecycleSettings {
    fn from(config: &EngineConfig) -> Self {
        Self {
            sla_hours: config.sla_hours,
            update_retry_limit: config.update_retry_limit,
            presign_ttl: config.presign_ttl(),
        }
    }
}

impl LifecycleSettings {
    pub fn sla_window(&self, severity: Severity) -> chrono::Duration {
        chrono::Duration::hours(self.sla_hours.hours(severity))
    }
}

/// Entry point for every caller-driven incident mutation
pub struct LifecycleManager {
    pub(super) store: SharedIncidentStore,
    pub(super) blobs: SharedBlobStore,
    pub(super) scheduler: Arc<EscalationScheduler>,
    pub(super) broadcaster: SharedBroadcaster,
    pub(super) settings: LifecycleSettings,
}

impl LifecycleManager {
    pub fn new(
        store: SharedIncidentStore,
        blobs: SharedBlobStore,
        scheduler: Arc<EscalationScheduler>,
        broadcaster: SharedBroadcaster,
        settings: LifecycleSettings,
    ) -> Self {
        Self {
            store,
            blobs,
            scheduler,
            broadcaster,
            settings,
        }
    }

    pub fn shared(self) -> SharedLifecycleManager {
        Arc::new(self)
    }

    pub fn settings(&self) -> &LifecycleSettings {
        &self.settings
    }

    // ========================================================================
    // Create
    // ========================================================================

    /// Report a new incident.
    ///
    /// Both escalation checks are armed afterwards. A scheduling failure is
    /// logged and does not undo the create.
    pub async fn create(&self, actor: &Actor, input: NewIncident) -> TriageResult<Incident> {
        let title = input.title.trim();
        if title.is_empty() {
            return Err(TriageError::validation("title must not be empty"));
        }
        let team_id = self.resolve_team(actor, &input).await?;

        let incident = Incident::new(
            title.to_string(),
            input.description.filter(|d| !d.trim().is_empty()),
            input.severity,
            actor.id.clone(),
            team_id,
            self.settings.sla_window(input.severity),
        );
        let incident = self.store.insert_incident(incident).await?;

        info!(
            incident_id = %incident.id,
            severity = %incident.severity,
            team_id = ?incident.team_id,
            reporter = %actor.id,
            "Incident created"
        );

        if let Err(e) = self.scheduler.schedule_for(&incident).await {
            error!(incident_id = %incident.id, "Failed to schedule escalation checks: {}", e);
        }

        self.broadcaster
            .publish(&Topic::General, EventName::IncidentCreated, &incident);
        if let Some(team_id) = &incident.team_id {
            self.broadcaster
                .publish(&Topic::team(team_id), EventName::IncidentCreated, &incident);
        }

        Ok(incident)
    }

    /// Explicit id first, then a name lookup, then the actor's own team
    async fn resolve_team(&self, actor: &Actor, input: &NewIncident) -> TriageResult<Option<TeamId>> {
        if let Some(team_id) = &input.team_id {
            return match self.store.get_team(team_id).await? {
                Some(team) => Ok(Some(team.id)),
                None => Err(TriageError::not_found("team", team_id.clone())),
            };
        }
        if let Some(name) = input.team_name.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
            if let Some(team) = self.store.find_team_by_name(name).await? {
                return Ok(Some(team.id));
            }
            warn!(team = %name, actor = %actor.id, "Unknown team name, using the reporter's team");
        }
        Ok(actor.team_id.clone())
    }

    // ========================================================================
    // Update
    // ========================================================================

    /// Apply `patch` through the version-guarded write.
    ///
    /// With `expected_version` set, a stale version fails with Conflict and
    /// nothing is written. Without it the current version is read and the
    /// write retried on lost races up to the configured limit.
    pub async fn update(
        &self,
        id: &str,
        actor: &Actor,
        expected_version: Option<u64>,
        patch: IncidentPatch,
    ) -> TriageResult<Incident> {
        if patch.is_empty() {
            return Err(TriageError::validation("update carries no changes"));
        }
        if matches!(&patch.title, Some(title) if title.trim().is_empty()) {
            return Err(TriageError::validation("title must not be empty"));
        }

        let (previous, current) = match expected_version {
            Some(expected) => match self.store.update_if_version(id, expected, &patch).await? {
                CasOutcome::Applied { previous, current } => (previous, current),
                CasOutcome::VersionMismatch { actual } => {
                    debug!(incident_id = %id, expected, actual, "Rejected stale update");
                    return Err(TriageError::conflict(id, expected, actual));
                }
                CasOutcome::Missing => return Err(TriageError::not_found("incident", id)),
            },
            None => self.update_latest(id, &patch).await?,
        };

        info!(
            incident_id = %id,
            actor = %actor.id,
            version = current.version,
            "Incident updated"
        );

        self.broadcaster
            .publish(&Topic::incident(id), EventName::IncidentUpdated, &*current);
        self.after_update(actor, &previous, &current).await;

        Ok(*current)
    }

    async fn update_latest(
        &self,
        id: &str,
        patch: &IncidentPatch,
    ) -> TriageResult<(Box<Incident>, Box<Incident>)> {
        let mut conflict = (0, 0);
        for attempt in 1..=self.settings.update_retry_limit.max(1) {
            let incident = self.require_incident(id).await?;
            match self
                .store
                .update_if_version(id, incident.version, patch)
                .await?
            {
                CasOutcome::Applied { previous, current } => return Ok((previous, current)),
                CasOutcome::VersionMismatch { actual } => {
                    debug!(incident_id = %id, attempt, actual, "Lost update race, retrying");
                    conflict = (incident.version, actual);
                }
                CasOutcome::Missing => return Err(TriageError::not_found("incident", id)),
            }
        }
        Err(TriageError::conflict(id, conflict.0, conflict.1))
    }

    /// Timeline entries and escalation cancellation following a write.
    /// The write has already happened, so failures here are only logged.
    async fn after_update(&self, actor: &Actor, previous: &Incident, current: &Incident) {
        if previous.status != current.status {
            self.record(
                actor,
                current,
                EventKind::StatusChange,
                format!("changed status to {}", current.status),
            )
            .await;

            if current.status.is_terminal() {
                if let Err(e) = self.scheduler.cancel(&current.id).await {
                    error!(incident_id = %current.id, "Failed to cancel escalation checks: {}", e);
                }
            }
        }

        if let Some(assignee) = &current.assignee_id {
            if previous.assignee_id.as_ref() != Some(assignee) {
                self.record(
                    actor,
                    current,
                    EventKind::Assignment,
                    format!("assigned to {}", assignee),
                )
                .await;
                if let Some(team_id) = &current.team_id {
                    self.broadcaster
                        .publish(&Topic::team(team_id), EventName::IncidentAssigned, current);
                }
            }
        }
    }

    async fn record(&self, actor: &Actor, incident: &Incident, kind: EventKind, message: String) {
        let event = IncidentEvent::new(incident.id.clone(), Some(actor.id.clone()), kind, message);
        match self.store.append_event(event).await {
            Ok(event) => self.publish_timeline(&incident.id, &TimelineChange::Appended(event)),
            Err(e) => {
                error!(incident_id = %incident.id, kind = %kind, "Failed to record timeline entry: {}", e)
            }
        }
    }

    // ========================================================================
    // Delete
    // ========================================================================

    /// Delete an incident with its attachments and timeline.
    /// Only the reporter or an admin may do this.
    pub async fn delete(&self, id: &str, actor: &Actor) -> TriageResult<()> {
        let incident = self.require_incident(id).await?;
        if !actor.is_admin() && incident.reporter_id != actor.id {
            return Err(TriageError::forbidden(
                "You do not have permission to delete this incident",
            ));
        }

        self.scheduler.cancel(id).await?;

        let attachments = self.store.list_attachments(id).await?;
        let results = join_all(attachments.iter().map(|a| self.blobs.delete(&a.file_key))).await;
        for (attachment, result) in attachments.iter().zip(results) {
            if let Err(e) = result {
                warn!(incident_id = %id, key = %attachment.file_key, "Failed to delete blob: {}", e);
            }
        }
        for attachment in &attachments {
            self.store.delete_attachment(&attachment.id).await?;
        }

        let events = self.store.delete_events_for(id).await?;
        if !self.store.delete_incident(id).await? {
            return Err(TriageError::not_found("incident", id));
        }

        info!(
            incident_id = %id,
            actor = %actor.id,
            attachments = attachments.len(),
            events,
            "Incident deleted"
        );

        let removed = Removed::incident(&incident.id);
        self.broadcaster
            .publish(&Topic::incident(id), EventName::IncidentDeleted, &removed);
        self.broadcaster
            .publish(&Topic::General, EventName::IncidentDeleted, &removed);
        Ok(())
    }

    // ========================================================================
    // Read
    // ========================================================================

    /// Incident with its ordered timeline and attachments
    pub async fn get(&self, id: &str) -> TriageResult<IncidentDetail> {
        let incident = self.require_incident(id).await?;
        let events = self.store.list_events(id).await?;
        let attachments = self.store.list_attachments(id).await?;
        Ok(IncidentDetail {
            incident,
            events,
            attachments,
        })
    }

    /// Incidents visible under `filter`, newest first
    pub async fn list(&self, actor: &Actor, filter: &ListFilter) -> TriageResult<Vec<Incident>> {
        let mut query = IncidentQuery {
            status: filter.status,
            severity: filter.severity,
            ..IncidentQuery::default()
        };
        match filter.scope {
            Scope::Mine => query.assignee_id = Some(actor.id.clone()),
            Scope::Team => query.team_id = actor.team_id.clone(),
            Scope::All => {}
        }
        Ok(self.store.list_incidents(&query).await?)
    }

    // ========================================================================
    // Helpers shared with comments / attachments
    // ========================================================================

    pub(super) async fn require_incident(&self, id: &str) -> TriageResult<Incident> {
        self.store
            .get_incident(id)
            .await?
            .ok_or_else(|| TriageError::not_found("incident", id))
    }

    pub(super) fn publish_timeline(&self, incident_id: &str, change: &TimelineChange) {
        self.broadcaster
            .publish(&Topic::incident(incident_id), EventName::Timeline, change);
    }
}

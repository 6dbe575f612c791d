//! In-process reference implementation of [`IncidentStore`].
//!
//! Each incident lives behind its own mutex; the map-level lock is held only
//! long enough to find or insert a slot, so writes to unrelated incidents
//! never wait on each other.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::Utc;

use super::{CasOutcome, IncidentQuery, IncidentStore, SharedIncidentStore, StoreError, StoreResult};
use crate::model::{
    Attachment, AttachmentId, EventId, EventKind, Incident, IncidentEvent, IncidentId,
    IncidentPatch, Team, TeamId,
};

/// `None` once the incident has been deleted, so a writer that grabbed the
/// slot before the delete sees it as missing.
type IncidentSlot = Arc<Mutex<Option<Incident>>>;

#[derive(Default)]
struct EventTable {
    by_id: HashMap<EventId, IncidentEvent>,
    /// Append order per incident
    order: HashMap<IncidentId, Vec<EventId>>,
}

/// Lock-per-incident in-memory store
#[derive(Default)]
pub struct MemoryStore {
    incidents: RwLock<HashMap<IncidentId, IncidentSlot>>,
    events: RwLock<EventTable>,
    teams: RwLock<HashMap<TeamId, Team>>,
    attachments: RwLock<HashMap<AttachmentId, Attachment>>,
}

fn read<T>(lock: &RwLock<T>) -> StoreResult<RwLockReadGuard<'_, T>> {
    lock.read().map_err(|_| StoreError::LockPoisoned)
}

fn write<T>(lock: &RwLock<T>) -> StoreResult<RwLockWriteGuard<'_, T>> {
    lock.write().map_err(|_| StoreError::LockPoisoned)
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a shared reference to this store
    pub fn shared(self) -> SharedIncidentStore {
        Arc::new(self)
    }

    fn slot(&self, id: &str) -> StoreResult<Option<IncidentSlot>> {
        Ok(read(&self.incidents)?.get(id).cloned())
    }
}

#[async_trait]
impl IncidentStore for MemoryStore {
    async fn insert_incident(&self, incident: Incident) -> StoreResult<Incident> {
        let mut incidents = write(&self.incidents)?;
        if incidents.contains_key(&incident.id) {
            return Err(StoreError::Duplicate(incident.id));
        }
        incidents.insert(
            incident.id.clone(),
            Arc::new(Mutex::new(Some(incident.clone()))),
        );
        Ok(incident)
    }

    async fn get_incident(&self, id: &str) -> StoreResult<Option<Incident>> {
        let Some(slot) = self.slot(id)? else {
            return Ok(None);
        };
        let guard = slot.lock().map_err(|_| StoreError::LockPoisoned)?;
        Ok(guard.clone())
    }

    async fn update_if_version(
        &self,
        id: &str,
        expected_version: u64,
        patch: &IncidentPatch,
    ) -> StoreResult<CasOutcome> {
        let Some(slot) = self.slot(id)? else {
            return Ok(CasOutcome::Missing);
        };
        let mut guard = slot.lock().map_err(|_| StoreError::LockPoisoned)?;
        let Some(incident) = guard.as_mut() else {
            return Ok(CasOutcome::Missing);
        };

        if incident.version != expected_version {
            return Ok(CasOutcome::VersionMismatch {
                actual: incident.version,
            });
        }

        let previous = incident.clone();
        patch.apply_to(incident);
        incident.version += 1;
        incident.updated_at = Utc::now();

        Ok(CasOutcome::Applied {
            previous: Box::new(previous),
            current: Box::new(incident.clone()),
        })
    }

    async fn delete_incident(&self, id: &str) -> StoreResult<bool> {
        let Some(slot) = write(&self.incidents)?.remove(id) else {
            return Ok(false);
        };
        let existed = slot
            .lock()
            .map_err(|_| StoreError::LockPoisoned)?
            .take()
            .is_some();

        self.delete_events_for(id).await?;
        write(&self.attachments)?.retain(|_, a| a.incident_id != id);

        Ok(existed)
    }

    async fn list_incidents(&self, query: &IncidentQuery) -> StoreResult<Vec<Incident>> {
        let slots: Vec<IncidentSlot> = read(&self.incidents)?.values().cloned().collect();

        let mut incidents = Vec::new();
        for slot in slots {
            let guard = slot.lock().map_err(|_| StoreError::LockPoisoned)?;
            if let Some(incident) = guard.as_ref() {
                if query.matches(incident) {
                    incidents.push(incident.clone());
                }
            }
        }

        incidents.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(incidents)
    }

    async fn append_event(&self, event: IncidentEvent) -> StoreResult<IncidentEvent> {
        let mut table = write(&self.events)?;
        if table.by_id.contains_key(&event.id) {
            return Err(StoreError::Duplicate(event.id));
        }
        table
            .order
            .entry(event.incident_id.clone())
            .or_default()
            .push(event.id.clone());
        table.by_id.insert(event.id.clone(), event.clone());
        Ok(event)
    }

    async fn get_event(&self, id: &str) -> StoreResult<Option<IncidentEvent>> {
        Ok(read(&self.events)?.by_id.get(id).cloned())
    }

    async fn update_event_message(
        &self,
        id: &str,
        message: &str,
    ) -> StoreResult<Option<IncidentEvent>> {
        let mut table = write(&self.events)?;
        Ok(table.by_id.get_mut(id).map(|event| {
            event.message = message.to_string();
            event.clone()
        }))
    }

    async fn delete_event(&self, id: &str) -> StoreResult<bool> {
        let mut table = write(&self.events)?;
        let Some(event) = table.by_id.remove(id) else {
            return Ok(false);
        };
        if let Some(order) = table.order.get_mut(&event.incident_id) {
            order.retain(|event_id| event_id != id);
        }
        Ok(true)
    }

    async fn list_events(&self, incident_id: &str) -> StoreResult<Vec<IncidentEvent>> {
        let table = read(&self.events)?;
        Ok(table
            .order
            .get(incident_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| table.by_id.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn count_events(&self, incident_id: &str, kind: EventKind) -> StoreResult<usize> {
        Ok(self
            .list_events(incident_id)
            .await?
            .iter()
            .filter(|e| e.kind == kind)
            .count())
    }

    async fn delete_events_for(&self, incident_id: &str) -> StoreResult<usize> {
        let mut table = write(&self.events)?;
        let ids = table.order.remove(incident_id).unwrap_or_default();
        for id in &ids {
            table.by_id.remove(id);
        }
        Ok(ids.len())
    }

    async fn insert_team(&self, team: Team) -> StoreResult<Team> {
        let mut teams = write(&self.teams)?;
        if teams.values().any(|t| t.name == team.name) {
            return Err(StoreError::Duplicate(team.name));
        }
        teams.insert(team.id.clone(), team.clone());
        Ok(team)
    }

    async fn get_team(&self, id: &str) -> StoreResult<Option<Team>> {
        Ok(read(&self.teams)?.get(id).cloned())
    }

    async fn find_team_by_name(&self, name: &str) -> StoreResult<Option<Team>> {
        Ok(read(&self.teams)?.values().find(|t| t.name == name).cloned())
    }

    async fn insert_attachment(&self, attachment: Attachment) -> StoreResult<Attachment> {
        let mut attachments = write(&self.attachments)?;
        if attachments.contains_key(&attachment.id) {
            return Err(StoreError::Duplicate(attachment.id));
        }
        attachments.insert(attachment.id.clone(), attachment.clone());
        Ok(attachment)
    }

    async fn get_attachment(&self, id: &str) -> StoreResult<Option<Attachment>> {
        Ok(read(&self.attachments)?.get(id).cloned())
    }

    async fn list_attachments(&self, incident_id: &str) -> StoreResult<Vec<Attachment>> {
        let mut attachments: Vec<Attachment> = read(&self.attachments)?
            .values()
            .filter(|a| a.incident_id == incident_id)
            .cloned()
            .collect();
        attachments.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(attachments)
    }

    async fn delete_attachment(&self, id: &str) -> StoreResult<bool> {
        Ok(write(&self.attachments)?.remove(id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Severity, Status};

    fn incident(severity: Severity) -> Incident {
        Incident::new(
            "api latency".into(),
            None,
            severity,
            "reporter".into(),
            None,
            severity.default_sla(),
        )
    }

    #[tokio::test]
    async fn test_cas_applies_and_bumps_version() {
        let store = MemoryStore::new();
        let inc = store.insert_incident(incident(Severity::Low)).await.unwrap();

        let outcome = store
            .update_if_version(&inc.id, 0, &IncidentPatch::status(Status::Acknowledged))
            .await
            .unwrap();

        match outcome {
            CasOutcome::Applied { previous, current } => {
                assert_eq!(previous.version, 0);
                assert_eq!(current.version, 1);
                assert_eq!(current.status, Status::Acknowledged);
            }
            other => panic!("expected applied, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_cas_rejects_stale_version_without_writing() {
        let store = MemoryStore::new();
        let inc = store.insert_incident(incident(Severity::Low)).await.unwrap();
        store
            .update_if_version(&inc.id, 0, &IncidentPatch::severity(Severity::High))
            .await
            .unwrap();

        let outcome = store
            .update_if_version(&inc.id, 0, &IncidentPatch::status(Status::Closed))
            .await
            .unwrap();
        assert!(matches!(outcome, CasOutcome::VersionMismatch { actual: 1 }));

        let stored = store.get_incident(&inc.id).await.unwrap().unwrap();
        assert_eq!(stored.status, Status::Open);
        assert_eq!(stored.version, 1);
    }

    #[tokio::test]
    async fn test_cas_on_missing_incident() {
        let store = MemoryStore::new();
        let outcome = store
            .update_if_version("nope", 0, &IncidentPatch::default())
            .await
            .unwrap();
        assert!(matches!(outcome, CasOutcome::Missing));
    }

    #[tokio::test]
    async fn test_concurrent_cas_exactly_one_wins() {
        let store = Arc::new(MemoryStore::new());
        let inc = store.insert_incident(incident(Severity::Medium)).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..8 {
            let store = store.clone();
            let id = inc.id.clone();
            handles.push(tokio::spawn(async move {
                let patch = IncidentPatch {
                    assignee_id: Some(format!("user-{i}")),
                    ..Default::default()
                };
                store.update_if_version(&id, 0, &patch).await.unwrap()
            }));
        }

        let mut applied = 0;
        for handle in handles {
            if matches!(handle.await.unwrap(), CasOutcome::Applied { .. }) {
                applied += 1;
            }
        }
        assert_eq!(applied, 1);
        assert_eq!(store.get_incident(&inc.id).await.unwrap().unwrap().version, 1);
    }

    #[tokio::test]
    async fn test_delete_cascades_owned_records() {
        let store = MemoryStore::new();
        let inc = store.insert_incident(incident(Severity::High)).await.unwrap();
        store
            .append_event(IncidentEvent::new(
                inc.id.clone(),
                Some("u".into()),
                EventKind::Comment,
                "looking",
            ))
            .await
            .unwrap();

        assert!(store.delete_incident(&inc.id).await.unwrap());
        assert!(store.get_incident(&inc.id).await.unwrap().is_none());
        assert!(store.list_events(&inc.id).await.unwrap().is_empty());
        assert!(!store.delete_incident(&inc.id).await.unwrap());

        let outcome = store
            .update_if_version(&inc.id, 0, &IncidentPatch::default())
            .await
            .unwrap();
        assert!(matches!(outcome, CasOutcome::Missing));
    }

    #[tokio::test]
    async fn test_events_keep_append_order() {
        let store = MemoryStore::new();
        for msg in ["first", "second", "third"] {
            store
                .append_event(IncidentEvent::new("inc", Some("u".into()), EventKind::Comment, msg))
                .await
                .unwrap();
        }
        let messages: Vec<String> = store
            .list_events("inc")
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.message)
            .collect();
        assert_eq!(messages, vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn test_team_names_are_unique() {
        let store = MemoryStore::new();
        store.insert_team(Team::new("Ops")).await.unwrap();
        let err = store.insert_team(Team::new("Ops")).await.unwrap_err();
        assert!(matches!(err, StoreError::Duplicate(_)));
        assert!(store.find_team_by_name("Ops").await.unwrap().is_some());
        assert!(store.find_team_by_name("ops").await.unwrap().is_none());
    }
}

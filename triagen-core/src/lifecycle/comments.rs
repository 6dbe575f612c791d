//! Timeline comments
//!
//! Only the author of a comment may edit or delete it. Edits and deletes
//! are republished as [`TimelineChange::Edited`] / [`TimelineChange::Deleted`]
//! so observers patch the entry they already hold.

use tracing::info;

use super::manager::LifecycleManager;
use crate::broadcast::TimelineChange;
use crate::error::{TriageError, TriageResult};
use crate::model::{Actor, EventKind, IncidentEvent};

fn require_message(message: &str) -> TriageResult<&str> {
    let message = message.trim();
    if message.is_empty() {
        return Err(TriageError::validation("message must not be empty"));
    }
    Ok(message)
}

impl LifecycleManager {
    /// Append a comment to an incident's timeline
    pub async fn add_comment(
        &self,
        incident_id: &str,
        actor: &Actor,
        message: &str,
    ) -> TriageResult<IncidentEvent> {
        let message = require_message(message)?;
        self.require_incident(incident_id).await?;

        let event = self
            .store
            .append_event(IncidentEvent::new(
                incident_id,
                Some(actor.id.clone()),
                EventKind::Comment,
                message,
            ))
            .await?;

        info!(incident_id = %incident_id, event_id = %event.id, actor = %actor.id, "Comment added");
        self.publish_timeline(incident_id, &TimelineChange::Appended(event.clone()));
        Ok(event)
    }

    pub async fn edit_comment(
        &self,
        event_id: &str,
        actor: &Actor,
        message: &str,
    ) -> TriageResult<IncidentEvent> {
        let message = require_message(message)?;
        let event = self.authored_event(event_id, actor, "edit").await?;

        let updated = self
            .store
            .update_event_message(&event.id, message)
            .await?
            .ok_or_else(|| TriageError::not_found("event", event_id))?;

        info!(incident_id = %updated.incident_id, event_id = %event_id, "Comment edited");
        self.publish_timeline(&updated.incident_id, &TimelineChange::Edited(updated.clone()));
        Ok(updated)
    }

    pub async fn delete_comment(&self, event_id: &str, actor: &Actor) -> TriageResult<()> {
        let event = self.authored_event(event_id, actor, "delete").await?;

        if !self.store.delete_event(&event.id).await? {
            return Err(TriageError::not_found("event", event_id));
        }

        info!(incident_id = %event.incident_id, event_id = %event_id, "Comment deleted");
        self.publish_timeline(
            &event.incident_id,
            &TimelineChange::Deleted {
                id: event.id.clone(),
                incident_id: event.incident_id.clone(),
            },
        );
        Ok(())
    }

    async fn authored_event(
        &self,
        event_id: &str,
        actor: &Actor,
        action: &str,
    ) -> TriageResult<IncidentEvent> {
        let event = self
            .store
            .get_event(event_id)
            .await?
            .ok_or_else(|| TriageError::not_found("event", event_id))?;

        if !event.is_authored_by(&actor.id) || !event.kind.is_user_editable() {
            return Err(TriageError::forbidden(format!(
                "You can only {} your own comments",
                action
            )));
        }
        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::blob::MemoryBlobStore;
    use crate::broadcast::{
        Broadcaster, EventName, SharedRegistry, SubscriptionRegistry, TimelineChange, Topic,
    };
    use crate::lifecycle::{LifecycleManager, LifecycleSettings};
    use crate::model::{Actor, EventKind, IncidentPatch, NewIncident, Role, Severity, Status};
    use crate::scheduler::{EscalationPolicy, EscalationScheduler, JournaledTaskQueue};
    use crate::store::{IncidentStore, MemoryStore};

    fn setup() -> (Arc<MemoryStore>, SharedRegistry, LifecycleManager) {
        let store = Arc::new(MemoryStore::new());
        let registry = SubscriptionRegistry::default().shared();
        let broadcaster = Broadcaster::new(registry.clone()).shared();
        let scheduler = EscalationScheduler::new(
            store.clone(),
            JournaledTaskQueue::in_memory().shared(),
            broadcaster.clone(),
            EscalationPolicy::default(),
        )
        .shared();
        let manager = LifecycleManager::new(
            store.clone(),
            MemoryBlobStore::new("test").shared(),
            scheduler,
            broadcaster,
            LifecycleSettings::default(),
        );
        (store, registry, manager)
    }

    #[tokio::test]
    async fn test_add_comment_publishes_append() {
        let (store, registry, manager) = setup();
        let alice = Actor::new("alice", Role::Responder);
        let inc = manager
            .create(&alice, NewIncident::new("api 500s", Severity::High))
            .await
            .unwrap();

        let mut watcher = registry.connect(&Actor::new("w", Role::Member));
        registry.join(watcher.id, Topic::incident(&inc.id)).unwrap();

        let event = manager.add_comment(&inc.id, &alice, "  looking  ").await.unwrap();
        assert_eq!(event.message, "looking");
        assert_eq!(store.count_events(&inc.id, EventKind::Comment).await.unwrap(), 1);

        let envelope = watcher.recv().await.unwrap();
        assert_eq!(envelope.name, EventName::Timeline);
        let change: TimelineChange = envelope.decode().unwrap();
        assert_eq!(change.kind(), EventKind::Comment);
    }

    #[tokio::test]
    async fn test_comment_validation_and_missing_incident() {
        let (_store, _registry, manager) = setup();
        let alice = Actor::new("alice", Role::Responder);

        let err = manager.add_comment("x", &alice, "   ").await.unwrap_err();
        assert_eq!(err.code(), "VALIDATION");
        let err = manager.add_comment("x", &alice, "hello").await.unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_only_author_may_edit_or_delete() {
        let (store, registry, manager) = setup();
        let alice = Actor::new("alice", Role::Responder);
        let mallory = Actor::new("mallory", Role::Admin);
        let inc = manager
            .create(&alice, NewIncident::new("api 500s", Severity::High))
            .await
            .unwrap();
        let event = manager.add_comment(&inc.id, &alice, "first").await.unwrap();

        let err = manager.edit_comment(&event.id, &mallory, "mine now").await.unwrap_err();
        assert_eq!(err.code(), "FORBIDDEN");
        let err = manager.delete_comment(&event.id, &mallory).await.unwrap_err();
        assert_eq!(err.code(), "FORBIDDEN");

        let mut watcher = registry.connect(&Actor::new("w", Role::Member));
        registry.join(watcher.id, Topic::incident(&inc.id)).unwrap();

        let edited = manager.edit_comment(&event.id, &alice, "second").await.unwrap();
        assert_eq!(edited.message, "second");
        let change: TimelineChange = watcher.recv().await.unwrap().decode().unwrap();
        assert_eq!(change.kind(), EventKind::Edited);

        manager.delete_comment(&event.id, &alice).await.unwrap();
        let change: TimelineChange = watcher.recv().await.unwrap().decode().unwrap();
        assert_eq!(change.kind(), EventKind::Deleted);
        assert!(store.get_event(&event.id).await.unwrap().is_none());

        let err = manager.delete_comment(&event.id, &alice).await.unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_status_entries_are_not_editable() {
        let (store, _registry, manager) = setup();
        let alice = Actor::new("alice", Role::Responder);
        let inc = manager
            .create(&alice, NewIncident::new("api 500s", Severity::High))
            .await
            .unwrap();
        manager
            .update(
                &inc.id,
                &alice,
                None,
                IncidentPatch::status(Status::Acknowledged),
            )
            .await
            .unwrap();

        let status_entry = store.list_events(&inc.id).await.unwrap().remove(0);
        assert!(status_entry.is_authored_by("alice"));
        let err = manager
            .edit_comment(&status_entry.id, &alice, "rewrite history")
            .await
            .unwrap_err();
        assert_eq!(err.code(), "FORBIDDEN");
    }
}

//! Subscription registry
//!
//! Tracks which connected observers are joined to which topics. Membership
//! lives exactly as long as the connection: nothing here is persisted, and
//! an observer that reconnects starts from its default topics.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

use super::message::Envelope;
use super::topic::Topic;
use crate::error::{TriageError, TriageResult};
use crate::model::{Actor, UserId};

/// Default per-observer buffer
pub const DEFAULT_OBSERVER_BUFFER: usize = 256;

/// Connection-scoped observer identifier
pub type ObserverId = Uuid;

/// Shared reference to the registry
pub type SharedRegistry = Arc<SubscriptionRegistry>;

struct ObserverEntry {
    user_id: UserId,
    sender: mpsc::Sender<Arc<Envelope>>,
    topics: HashSet<Topic>,
}

#[derive(Default)]
struct RegistryState {
    topics: HashMap<Topic, HashSet<ObserverId>>,
    observers: HashMap<ObserverId, ObserverEntry>,
}

impl RegistryState {
    fn add(&mut self, id: ObserverId, topic: Topic) -> bool {
        let Some(entry) = self.observers.get_mut(&id) else {
            return false;
        };
        entry.topics.insert(topic.clone());
        self.topics.entry(topic).or_default().insert(id)
    }

    fn remove(&mut self, id: ObserverId, topic: &Topic) -> bool {
        if let Some(entry) = self.observers.get_mut(&id) {
            entry.topics.remove(topic);
        }
        let Some(members) = self.topics.get_mut(topic) else {
            return false;
        };
        let removed = members.remove(&id);
        if members.is_empty() {
            self.topics.remove(topic);
        }
        removed
    }
}

/// Receiving side handed to a connected observer
pub struct ObserverHandle {
    pub id: ObserverId,
    receiver: mpsc::Receiver<Arc<Envelope>>,
}

impl ObserverHandle {
    /// Wait for the next delivered envelope; `None` once disconnected
    pub async fn recv(&mut self) -> Option<Arc<Envelope>> {
        self.receiver.recv().await
    }

    /// Next envelope if one is already buffered
    pub fn try_recv(&mut self) -> Option<Arc<Envelope>> {
        self.receiver.try_recv().ok()
    }

    /// Drain everything currently buffered
    pub fn drain(&mut self) -> Vec<Arc<Envelope>> {
        let mut out = Vec::new();
        while let Ok(envelope) = self.receiver.try_recv() {
            out.push(envelope);
        }
        out
    }
}

/// Topic membership for live observers
pub struct SubscriptionRegistry {
    state: RwLock<RegistryState>,
    buffer: usize,
}

impl SubscriptionRegistry {
    pub fn new(buffer: usize) -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
            buffer: buffer.max(1),
        }
    }

    /// Create a shared reference to this registry
    pub fn shared(self) -> SharedRegistry {
        Arc::new(self)
    }

    fn read(&self) -> RwLockReadGuard<'_, RegistryState> {
        self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryState> {
        self.state
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a verified connection and join its default topics
    /// (`general`, plus `team:<id>` when the actor has a team).
    pub fn connect(&self, actor: &Actor) -> ObserverHandle {
        let (sender, receiver) = mpsc::channel(self.buffer);
        let id = Uuid::new_v4();

        let mut state = self.write();
        state.observers.insert(
            id,
            ObserverEntry {
                user_id: actor.id.clone(),
                sender,
                topics: HashSet::new(),
            },
        );
        state.add(id, Topic::General);
        if let Some(team_id) = &actor.team_id {
            state.add(id, Topic::team(team_id.clone()));
        }
        drop(state);

        info!(observer = %id, user = %actor.id, "Observer connected");
        ObserverHandle { id, receiver }
    }

    /// Join an additional topic. Joining twice is harmless.
    pub fn join(&self, id: ObserverId, topic: Topic) -> TriageResult<()> {
        let mut state = self.write();
        if !state.observers.contains_key(&id) {
            return Err(TriageError::not_found("observer", id.to_string()));
        }
        debug!(observer = %id, topic = %topic, "Joined topic");
        state.add(id, topic);
        Ok(())
    }

    /// Join a topic given as a raw observer-supplied string
    pub fn join_raw(&self, id: ObserverId, raw: &str) -> TriageResult<Topic> {
        let topic: Topic = raw.parse()?;
        self.join(id, topic.clone())?;
        Ok(topic)
    }

    /// Leave a topic; returns whether the observer was a member
    pub fn leave(&self, id: ObserverId, topic: &Topic) -> bool {
        let removed = self.write().remove(id, topic);
        if removed {
            debug!(observer = %id, topic = %topic, "Left topic");
        }
        removed
    }

    /// Drop every membership of an observer; returns how many topics it held
    pub fn disconnect(&self, id: ObserverId) -> usize {
        let mut state = self.write();
        let Some(entry) = state.observers.remove(&id) else {
            return 0;
        };
        for topic in &entry.topics {
            if let Some(members) = state.topics.get_mut(topic) {
                members.remove(&id);
                if members.is_empty() {
                    state.topics.remove(topic);
                }
            }
        }
        drop(state);

        info!(observer = %id, user = %entry.user_id, topics = entry.topics.len(), "Observer disconnected");
        entry.topics.len()
    }

    pub fn is_member(&self, id: ObserverId, topic: &Topic) -> bool {
        self.read()
            .topics
            .get(topic)
            .is_some_and(|members| members.contains(&id))
    }

    /// Topics an observer is currently joined to
    pub fn topics_of(&self, id: ObserverId) -> Vec<Topic> {
        let mut topics: Vec<Topic> = self
            .read()
            .observers
            .get(&id)
            .map(|entry| entry.topics.iter().cloned().collect())
            .unwrap_or_default();
        topics.sort();
        topics
    }

    pub fn member_count(&self, topic: &Topic) -> usize {
        self.read().topics.get(topic).map_or(0, HashSet::len)
    }

    pub fn observer_count(&self) -> usize {
        self.read().observers.len()
    }

    /// Senders for every current member of `topic`, taken under one read
    /// lock so a publisher sees a consistent membership snapshot.
    pub(crate) fn senders(&self, topic: &Topic) -> Vec<(ObserverId, mpsc::Sender<Arc<Envelope>>)> {
        let state = self.read();
        state
            .topics
            .get(topic)
            .map(|members| {
                members
                    .iter()
                    .filter_map(|id| {
                        state
                            .observers
                            .get(id)
                            .map(|entry| (*id, entry.sender.clone()))
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_OBSERVER_BUFFER)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Role;

    #[test]
    fn test_connect_joins_default_topics() {
        let registry = SubscriptionRegistry::default();
        let alice = Actor::new("alice", Role::Responder).with_team("ops");
        let bob = Actor::new("bob", Role::Member);

        let a = registry.connect(&alice);
        let b = registry.connect(&bob);

        assert_eq!(registry.topics_of(a.id), vec![Topic::General, Topic::team("ops")]);
        assert_eq!(registry.topics_of(b.id), vec![Topic::General]);
        assert_eq!(registry.member_count(&Topic::General), 2);
    }

    #[test]
    fn test_join_and_leave() {
        let registry = SubscriptionRegistry::default();
        let handle = registry.connect(&Actor::new("alice", Role::Member));

        let topic = registry.join_raw(handle.id, "incident:7").unwrap();
        assert!(registry.is_member(handle.id, &topic));

        assert!(registry.leave(handle.id, &topic));
        assert!(!registry.leave(handle.id, &topic));
        assert_eq!(registry.member_count(&topic), 0);
    }

    #[test]
    fn test_join_unknown_observer_fails() {
        let registry = SubscriptionRegistry::default();
        let err = registry
            .join(Uuid::new_v4(), Topic::incident("1"))
            .unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
    }

    #[test]
    fn test_join_rejects_bad_topic() {
        let registry = SubscriptionRegistry::default();
        let handle = registry.connect(&Actor::new("alice", Role::Member));
        let err = registry.join_raw(handle.id, "room-42").unwrap_err();
        assert_eq!(err.code(), "VALIDATION");
    }

    #[test]
    fn test_disconnect_removes_all_memberships() {
        let registry = SubscriptionRegistry::default();
        let handle = registry.connect(&Actor::new("alice", Role::Member).with_team("ops"));
        registry.join(handle.id, Topic::incident("9")).unwrap();

        assert_eq!(registry.disconnect(handle.id), 3);
        assert_eq!(registry.observer_count(), 0);
        assert_eq!(registry.member_count(&Topic::General), 0);
        assert_eq!(registry.member_count(&Topic::incident("9")), 0);
        assert_eq!(registry.disconnect(handle.id), 0);
    }

    #[test]
    fn test_reconnect_starts_fresh() {
        let registry = SubscriptionRegistry::default();
        let actor = Actor::new("alice", Role::Member);
        let first = registry.connect(&actor);
        registry.join(first.id, Topic::incident("9")).unwrap();
        registry.disconnect(first.id);

        let second = registry.connect(&actor);
        assert_eq!(registry.topics_of(second.id), vec![Topic::General]);
    }
}

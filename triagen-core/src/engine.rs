//! Engine assembly
//!
//! Wires the store, blob store, escalation queue, subscription registry,
//! broadcaster, scheduler and lifecycle manager from one [`EngineConfig`],
//! and owns the background worker that delivers due escalation checks.
//!
//! ```ignore
//! let mut engine = Engine::from_config(EngineConfig::load(path)?)?;
//! engine.seed_teams().await?;
//! engine.start();
//! // ... serve callers through engine.manager() and engine.registry() ...
//! engine.shutdown().await;
//! ```

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::blob::{MemoryBlobStore, SharedBlobStore};
use crate::broadcast::{Broadcaster, SharedBroadcaster, SharedRegistry, SubscriptionRegistry};
use crate::config::EngineConfig;
use crate::error::TriageResult;
use crate::lifecycle::{LifecycleManager, LifecycleSettings, SharedLifecycleManager};
use crate::model::Team;
use crate::scheduler::{EscalationPolicy, EscalationScheduler, JournaledTaskQueue};
use crate::store::{MemoryStore, SharedIncidentStore};

/// A fully wired incident engine
pub struct Engine {
    config: EngineConfig,
    store: SharedIncidentStore,
    queue: Arc<JournaledTaskQueue>,
    registry: SharedRegistry,
    broadcaster: SharedBroadcaster,
    scheduler: Arc<EscalationScheduler>,
    manager: SharedLifecycleManager,
    shutdown: CancellationToken,
    worker: Option<JoinHandle<()>>,
}

impl Engine {
    /// Engine backed by the in-process store and blob store
    pub fn from_config(config: EngineConfig) -> TriageResult<Self> {
        let blobs = MemoryBlobStore::new(config.blob_bucket.clone()).shared();
        Self::with_collaborators(config, MemoryStore::new().shared(), blobs)
    }

    /// Engine over caller-supplied persistence collaborators
    pub fn with_collaborators(
        config: EngineConfig,
        store: SharedIncidentStore,
        blobs: SharedBlobStore,
    ) -> TriageResult<Self> {
        let queue = match &config.journal_path {
            Some(path) => JournaledTaskQueue::open(path.clone())?,
            None => {
                warn!("No journal configured, pending escalations will not survive a restart");
                JournaledTaskQueue::in_memory()
            }
        }
        .shared();

        let registry = SubscriptionRegistry::new(config.observer_buffer).shared();
        let broadcaster = Broadcaster::new(registry.clone()).shared();

        let scheduler = EscalationScheduler::new(
            store.clone(),
            queue.clone(),
            broadcaster.clone(),
            EscalationPolicy {
                response_delay: config.response_check_delay(),
                max_cas_attempts: config.escalation_retry_limit,
            },
        )
        .shared();

        let manager = LifecycleManager::new(
            store.clone(),
            blobs,
            scheduler.clone(),
            broadcaster.clone(),
            LifecycleSettings::from(&config),
        )
        .shared();

        Ok(Self {
            config,
            store,
            queue,
            registry,
            broadcaster,
            scheduler,
            manager,
            shutdown: CancellationToken::new(),
            worker: None,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn manager(&self) -> &SharedLifecycleManager {
        &self.manager
    }

    pub fn scheduler(&self) -> &Arc<EscalationScheduler> {
        &self.scheduler
    }

    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    pub fn broadcaster(&self) -> &SharedBroadcaster {
        &self.broadcaster
    }

    pub fn store(&self) -> &SharedIncidentStore {
        &self.store
    }

    pub fn queue(&self) -> &Arc<JournaledTaskQueue> {
        &self.queue
    }

    /// Create every configured team that does not exist yet.
    /// Returns how many were created.
    pub async fn seed_teams(&self) -> TriageResult<usize> {
        let mut created = 0;
        for name in &self.config.teams {
            if self.store.find_team_by_name(name).await?.is_none() {
                self.store.insert_team(Team::new(name.clone())).await?;
                created += 1;
            }
        }
        if created > 0 {
            info!(created, "Seeded teams");
        }
        Ok(created)
    }

    /// Start delivering due escalation checks. Calling twice is a no-op.
    pub fn start(&mut self) {
        if self.worker.is_some() {
            return;
        }
        self.worker = Some(
            self.queue
                .spawn(self.scheduler.clone(), self.shutdown.child_token()),
        );
        info!(pending = self.queue.len(), "Escalation worker started");
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    /// Stop the worker and wait for in-flight checks to finish
    pub async fn shutdown(mut self) {
        self.shutdown.cancel();
        if let Some(worker) = self.worker.take() {
            if let Err(e) = worker.await {
                warn!("Escalation worker ended abnormally: {}", e);
            }
        }
        info!("Engine stopped");
    }
}

//! Durable delayed-task queue
//!
//! Pending tasks are journaled to disk on every enqueue, cancel and
//! acknowledgement, and re-armed from the journal on start. The journal is
//! written before the in-memory table changes, so a failed write leaves both
//! untouched. A task leaves the
//! journal only after its handler returned, so a crash mid-delivery means the
//! task is delivered again after restart (at-least-once).
//!
//! Deadlines are tracked on the tokio clock; the wall-clock `fire_at` is what
//! gets persisted. Overdue tasks found on reload fire immediately, never
//! before their time.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex as AsyncMutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::task::{ScheduledTask, TaskKey};

/// Error type for queue operations
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Journal IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Journal encoding error: {0}")]
    Journal(#[from] serde_json::Error),

    #[error("Delay out of range: {0:?}")]
    DelayOutOfRange(Duration),

    #[error("Journal writer failed: {0}")]
    Writer(#[from] tokio::task::JoinError),

    #[error("Lock poisoned")]
    LockPoisoned,
}

/// Result type for queue operations
pub type QueueResult<T> = Result<T, QueueError>;

/// Shared reference to a delayed-task store
pub type SharedTaskStore = Arc<dyn DelayedTaskStore>;

/// Delayed-task collaborator used by the escalation scheduler.
///
/// Re-enqueueing an existing key replaces the pending task; cancelling an
/// absent key is a no-op.
#[async_trait]
pub trait DelayedTaskStore: Send + Sync {
    async fn enqueue(&self, key: TaskKey, delay: Duration) -> QueueResult<ScheduledTask>;

    /// Remove a pending task; returns whether one was pending
    async fn cancel(&self, key: &TaskKey) -> QueueResult<bool>;

    async fn pending(&self) -> QueueResult<Vec<ScheduledTask>>;
}

/// Receives tasks once they are due. May be called more than once per task.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, task: &ScheduledTask);
}

struct Entry {
    task: ScheduledTask,
    deadline: Instant,
    in_flight: bool,
}

/// Journal-backed delayed-task queue with a background delivery worker
pub struct JournaledTaskQueue {
    journal: Option<PathBuf>,
    entries: Mutex<HashMap<TaskKey, Entry>>,
    /// Serializes snapshot + write so journal writes land in order
    writer: AsyncMutex<()>,
    wake: Notify,
}

impl JournaledTaskQueue {
    /// Queue without a journal. Pending tasks do not survive a restart.
    pub fn in_memory() -> Self {
        Self {
            journal: None,
            entries: Mutex::new(HashMap::new()),
            writer: AsyncMutex::new(()),
            wake: Notify::new(),
        }
    }

    /// Open (or create) a journaled queue, re-arming every task it holds
    pub fn open(path: impl Into<PathBuf>) -> QueueResult<Self> {
        let path = path.into();
        let tasks = Self::load_journal(&path)?;

        let now = Instant::now();
        let wall_now = Utc::now();
        let entries: HashMap<TaskKey, Entry> = tasks
            .into_iter()
            .map(|task| {
                let remaining = (task.fire_at - wall_now).to_std().unwrap_or(Duration::ZERO);
                (
                    task.key.clone(),
                    Entry {
                        task,
                        deadline: now + remaining,
                        in_flight: false,
                    },
                )
            })
            .collect();

        info!(path = %path.display(), pending = entries.len(), "Task journal loaded");

        Ok(Self {
            journal: Some(path),
            entries: Mutex::new(entries),
            writer: AsyncMutex::new(()),
            wake: Notify::new(),
        })
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn journal_path(&self) -> Option<&Path> {
        self.journal.as_deref()
    }

    fn load_journal(path: &Path) -> QueueResult<Vec<ScheduledTask>> {
        if !path.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(path)?;
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(&content)?)
    }

    fn lock(&self) -> QueueResult<MutexGuard<'_, HashMap<TaskKey, Entry>>> {
        self.entries.lock().map_err(|_| QueueError::LockPoisoned)
    }

    /// Pending tasks except `skip`, as they would be journaled
    fn snapshot_without(&self, skip: &TaskKey) -> QueueResult<Vec<ScheduledTask>> {
        Ok(self
            .lock()?
            .values()
            .filter(|e| &e.task.key != skip)
            .map(|e| e.task.clone())
            .collect())
    }

    /// Rewrite the journal on the blocking pool. Callers hold `writer`.
    async fn write_journal(&self, mut tasks: Vec<ScheduledTask>) -> QueueResult<()> {
        let Some(path) = self.journal.clone() else {
            return Ok(());
        };
        tasks.sort_by(|a, b| a.fire_at.cmp(&b.fire_at).then_with(|| a.key.cmp(&b.key)));
        tokio::task::spawn_blocking(move || write_atomic(&path, &tasks)).await?
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove the task if it is still the schedule that was delivered
    async fn ack(&self, task: &ScheduledTask) -> QueueResult<bool> {
        let _writer = self.writer.lock().await;
        if !self.is_current(task) {
            return Ok(false);
        }
        let tasks = self.snapshot_without(&task.key)?;
        self.write_journal(tasks).await?;
        self.lock()?.remove(&task.key);
        Ok(true)
    }

    fn is_current(&self, task: &ScheduledTask) -> bool {
        self.entries
            .lock()
            .map(|entries| {
                entries
                    .get(&task.key)
                    .is_some_and(|e| e.task.token == task.token)
            })
            .unwrap_or(false)
    }

    fn take_due(&self, now: Instant) -> QueueResult<Vec<ScheduledTask>> {
        let mut entries = self.lock()?;
        Ok(entries
            .values_mut()
            .filter(|e| !e.in_flight && e.deadline <= now)
            .map(|e| {
                e.in_flight = true;
                e.task.clone()
            })
            .collect())
    }

    fn next_deadline(&self) -> QueueResult<Option<Instant>> {
        Ok(self
            .lock()?
            .values()
            .filter(|e| !e.in_flight)
            .map(|e| e.deadline)
            .min())
    }

    /// Deliver due tasks to `handler` until `shutdown` is cancelled
    pub async fn run(self: Arc<Self>, handler: Arc<dyn TaskHandler>, shutdown: CancellationToken) {
        info!(pending = self.len(), "Delayed-task worker started");

        loop {
            let due = match self.take_due(Instant::now()) {
                Ok(due) => due,
                Err(e) => {
                    error!("Delayed-task worker cannot read queue: {}", e);
                    break;
                }
            };

            // Deliveries run detached so one slow handler never holds back
            // later deadlines or shutdown. In-flight tasks stay journaled.
            for task in due {
                let queue = self.clone();
                let handler = handler.clone();
                tokio::spawn(async move {
                    if !queue.is_current(&task) {
                        debug!(task = %task.key, "Task cancelled or replaced before delivery");
                        return;
                    }
                    handler.handle(&task).await;
                    // Unacknowledged tasks stay in the journal and fire again on restart.
                    if let Err(e) = queue.ack(&task).await {
                        warn!(task = %task.key, "Failed to acknowledge task: {}", e);
                    }
                });
            }

            let next = match self.next_deadline() {
                Ok(next) => next,
                Err(e) => {
                    error!("Delayed-task worker cannot read queue: {}", e);
                    break;
                }
            };

            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!("Delayed-task worker stopping");
                    break;
                }
                _ = self.wake.notified() => {}
                _ = async {
                    match next {
                        Some(deadline) => tokio::time::sleep_until(deadline).await,
                        None => std::future::pending::<()>().await,
                    }
                } => {}
            }
        }
    }

    /// Spawn [`Self::run`] on the current runtime
    pub fn spawn(
        self: &Arc<Self>,
        handler: Arc<dyn TaskHandler>,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(self.clone().run(handler, shutdown))
    }
}

#[async_trait]
impl DelayedTaskStore for JournaledTaskQueue {
    async fn enqueue(&self, key: TaskKey, delay: Duration) -> QueueResult<ScheduledTask> {
        let offset =
            chrono::Duration::from_std(delay).map_err(|_| QueueError::DelayOutOfRange(delay))?;
        let task = ScheduledTask::new(key.clone(), Utc::now() + offset);

        {
            let _writer = self.writer.lock().await;
            let mut tasks = self.snapshot_without(&key)?;
            tasks.push(task.clone());
            self.write_journal(tasks).await?;

            let replaced = self
                .lock()?
                .insert(
                    key.clone(),
                    Entry {
                        task: task.clone(),
                        deadline: Instant::now() + delay,
                        in_flight: false,
                    },
                )
                .is_some();
            debug!(task = %key, delay_secs = delay.as_secs(), replaced, "Task enqueued");
        }

        self.wake.notify_one();
        Ok(task)
    }

    async fn cancel(&self, key: &TaskKey) -> QueueResult<bool> {
        let _writer = self.writer.lock().await;
        if !self.lock()?.contains_key(key) {
            return Ok(false);
        }
        let tasks = self.snapshot_without(key)?;
        self.write_journal(tasks).await?;
        self.lock()?.remove(key);
        debug!(task = %key, "Task cancelled");
        Ok(true)
    }

    async fn pending(&self) -> QueueResult<Vec<ScheduledTask>> {
        let mut tasks: Vec<ScheduledTask> =
            self.lock()?.values().map(|e| e.task.clone()).collect();
        tasks.sort_by(|a, b| a.fire_at.cmp(&b.fire_at));
        Ok(tasks)
    }
}

/// Temp file + rename, so a crash never leaves a half-written journal
fn write_atomic(path: &Path, tasks: &[ScheduledTask]) -> QueueResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, serde_json::to_vec_pretty(tasks)?)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::task::CheckKind;
    use tempfile::tempdir;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<TaskKey>>,
    }

    impl Recorder {
        fn seen(&self) -> Vec<TaskKey> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl TaskHandler for Recorder {
        async fn handle(&self, task: &ScheduledTask) {
            self.seen.lock().unwrap().push(task.key.clone());
        }
    }

    fn start(queue: &Arc<JournaledTaskQueue>) -> (Arc<Recorder>, CancellationToken) {
        let recorder = Arc::new(Recorder::default());
        let shutdown = CancellationToken::new();
        queue.spawn(recorder.clone(), shutdown.clone());
        (recorder, shutdown)
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_after_delay_never_before() {
        let queue = JournaledTaskQueue::in_memory().shared();
        let (recorder, shutdown) = start(&queue);
        let key = TaskKey::new("inc-1", CheckKind::Response);

        queue.enqueue(key.clone(), Duration::from_secs(120)).await.unwrap();

        tokio::time::sleep(Duration::from_secs(119)).await;
        assert!(recorder.seen().is_empty());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(recorder.seen(), vec![key]);
        assert!(queue.is_empty());
        shutdown.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_reenqueue_replaces_pending_task() {
        let queue = JournaledTaskQueue::in_memory().shared();
        let (recorder, shutdown) = start(&queue);
        let key = TaskKey::new("inc-1", CheckKind::Sla);

        queue.enqueue(key.clone(), Duration::from_secs(10)).await.unwrap();
        queue.enqueue(key.clone(), Duration::from_secs(100)).await.unwrap();
        assert_eq!(queue.pending().await.unwrap().len(), 1);

        tokio::time::sleep(Duration::from_secs(50)).await;
        assert!(recorder.seen().is_empty());

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(recorder.seen().len(), 1);
        shutdown.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_before_fire_and_cancel_is_noop_after() {
        let queue = JournaledTaskQueue::in_memory().shared();
        let (recorder, shutdown) = start(&queue);
        let key = TaskKey::new("inc-1", CheckKind::Sla);

        queue.enqueue(key.clone(), Duration::from_secs(10)).await.unwrap();
        assert!(queue.cancel(&key).await.unwrap());

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(recorder.seen().is_empty());
        assert!(!queue.cancel(&key).await.unwrap());

        queue.enqueue(key.clone(), Duration::from_secs(1)).await.unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(recorder.seen().len(), 1);
        assert!(!queue.cancel(&key).await.unwrap());
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_journal_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tasks.json");
        let sla = TaskKey::new("inc-1", CheckKind::Sla);
        let response = TaskKey::new("inc-1", CheckKind::Response);

        {
            let queue = JournaledTaskQueue::open(&path).unwrap();
            queue.enqueue(sla.clone(), Duration::from_secs(3600)).await.unwrap();
            queue.enqueue(response.clone(), Duration::from_secs(120)).await.unwrap();
            queue.cancel(&response).await.unwrap();
        }

        let reopened = JournaledTaskQueue::open(&path).unwrap();
        let pending = reopened.pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].key, sla);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reloaded_tasks_are_delivered() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("tasks.json");
        let key = TaskKey::new("inc-2", CheckKind::Sla);

        {
            let queue = JournaledTaskQueue::open(&path).unwrap();
            queue.enqueue(key.clone(), Duration::from_secs(600)).await.unwrap();
        }

        let queue = JournaledTaskQueue::open(&path).unwrap().shared();
        let (recorder, shutdown) = start(&queue);
        tokio::time::sleep(Duration::from_secs(601)).await;

        assert_eq!(recorder.seen(), vec![key]);
        let reopened = JournaledTaskQueue::open(&path).unwrap();
        assert!(reopened.pending().await.unwrap().is_empty());
        shutdown.cancel();
    }

    /// Holds one key's delivery open for an hour
    struct Stalling {
        stalled: TaskKey,
        finished: Mutex<Vec<TaskKey>>,
    }

    #[async_trait]
    impl TaskHandler for Stalling {
        async fn handle(&self, task: &ScheduledTask) {
            if task.key == self.stalled {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            self.finished.lock().unwrap().push(task.key.clone());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_delivery_does_not_hold_back_later_tasks() {
        let queue = JournaledTaskQueue::in_memory().shared();
        let slow = TaskKey::new("inc-1", CheckKind::Response);
        let fast = TaskKey::new("inc-2", CheckKind::Response);
        let handler = Arc::new(Stalling {
            stalled: slow.clone(),
            finished: Mutex::new(Vec::new()),
        });
        let shutdown = CancellationToken::new();
        let worker = queue.spawn(handler.clone(), shutdown.clone());

        queue.enqueue(slow.clone(), Duration::from_secs(1)).await.unwrap();
        queue.enqueue(fast.clone(), Duration::from_secs(5)).await.unwrap();

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(handler.finished.lock().unwrap().clone(), vec![fast]);
        // Still in flight, so still pending.
        assert_eq!(queue.pending().await.unwrap().len(), 1);

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), worker)
            .await
            .expect("worker should stop while a delivery is in flight")
            .unwrap();
    }

    #[tokio::test]
    async fn test_failed_journal_write_leaves_queue_unchanged() {
        let dir = tempdir().unwrap();
        let journal_dir = dir.path().join("journal");
        let path = journal_dir.join("tasks.json");
        let kept = TaskKey::new("inc-1", CheckKind::Sla);

        let queue = JournaledTaskQueue::open(&path).unwrap();
        queue.enqueue(kept.clone(), Duration::from_secs(3600)).await.unwrap();

        // Replace the journal directory with a plain file so writes fail.
        std::fs::remove_dir_all(&journal_dir).unwrap();
        std::fs::write(&journal_dir, "").unwrap();

        let added = TaskKey::new("inc-2", CheckKind::Sla);
        assert!(queue.enqueue(added, Duration::from_secs(60)).await.is_err());
        assert!(queue.cancel(&kept).await.is_err());

        let pending = queue.pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].key, kept);
    }

    #[test]
    fn test_corrupt_journal_is_reported() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tasks.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            JournaledTaskQueue::open(&path),
            Err(QueueError::Journal(_))
        ));
    }
}

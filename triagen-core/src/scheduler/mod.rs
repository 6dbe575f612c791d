//! Delayed escalation checks
//!
//! - `task.rs`: check kinds, dedupe keys and scheduled task records
//! - `queue.rs`: journal-backed delayed-task queue and its delivery worker
//! - `escalation.rs`: schedules, cancels and executes escalation checks
//!
//! ```text
//! EscalationScheduler::schedule ──▶ JournaledTaskQueue ──(due)──▶ TaskHandler::handle
//!                                        │                              │
//!                                   journal.json            EscalationScheduler::on_fire
//! ```

pub mod escalation;
pub mod queue;
pub mod task;

pub use escalation::{EscalationPolicy, EscalationScheduler, FireOutcome, SkipReason};
pub use queue::{
    DelayedTaskStore, JournaledTaskQueue, QueueError, QueueResult, SharedTaskStore, TaskHandler,
};
pub use task::{CheckKind, ScheduledTask, TaskKey};

//! Lifecycle Manager — every caller-driven change to an incident
//!
//! ```text
//! caller ──▶ LifecycleManager ──▶ store.update_if_version ──▶ EscalationScheduler (schedule / cancel)
//!                                                          └─▶ Broadcaster.publish
//! ```
//!
//! - `manager.rs`: create, update, delete, get, list
//! - `comments.rs`: author-only comment edits and deletes
//! - `attachments.rs`: presigned uploads and attachment records
//!
//! A broadcast never rolls back a write, and a failed broadcast never fails
//! the caller.

pub mod attachments;
pub mod comments;
pub mod manager;

pub use attachments::UploadTicket;
pub use manager::{LifecycleManager, LifecycleSettings, SharedLifecycleManager};

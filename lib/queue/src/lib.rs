//! Durable job queue for the flowline engine.
//!
//! Jobs are the queueable, lockable units of work that drive one
//! execution each. The queue provides at-least-once delivery:
//!
//! - **Claim** is a single atomic find-and-modify, so concurrent
//!   workers never both take the same job
//! - **Retry** is pure data: the next eligible time is computed from
//!   the attempt count, so backoff survives process restarts
//! - **Stale locks** (a processing job whose worker stopped checking
//!   in) become claimable again after a bounded threshold

pub mod error;
pub mod job;
pub mod memory;
pub mod store;

pub use error::QueueError;
pub use job::{backoff_delay, FailureKind, Job, JobStatus, DEFAULT_STALE_LOCK, JOB_RETENTION};
pub use memory::InMemoryJobStore;
pub use store::JobStore;

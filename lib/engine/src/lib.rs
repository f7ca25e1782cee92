//! The flowline engine: event dispatch, version management, and the
//! worker loop.
//!
//! This crate wires the lower layers together. Inbound events flow
//! through trigger matching and admission into execution records and
//! queued jobs; workers claim those jobs and drive a
//! [`WorkflowRunner`]; the version manager owns publish and rollback.

pub mod engine;
pub mod error;
pub mod runner;
pub mod versions;
pub mod worker;

pub use engine::{Dispatch, Engine};
pub use error::EngineError;
pub use runner::{RunOutcome, RunRequest, RunnerError, WorkflowRunner};
pub use versions::VersionManager;
pub use worker::{Worker, WorkerConfig};

//! Core domain types for the flowline workflow engine.
//!
//! This crate provides the strongly-typed identifiers shared by every
//! other crate in the workspace. Domain-specific error types live in
//! the crates that produce them.

pub mod id;

pub use id::{ExecutionId, JobId, ParseIdError, TenantId, TriggerId, WorkflowId};

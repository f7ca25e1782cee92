//! Execution lifecycle records and log sink for flowline.
//!
//! The execution record is the audit trail of one workflow run. This
//! crate owns its state machine (terminal records are immutable), the
//! structured log entries emitted alongside it, and the storage seams
//! the server and engine implement.

pub mod error;
pub mod log;
pub mod record;
pub mod store;

pub use error::ExecutionError;
pub use log::{ExecutionLogEntry, LogLevel, LOG_RETENTION};
pub use record::{
    Execution, ExecutionContext, ExecutionFailure, ExecutionMetrics, ExecutionStatus,
    ExecutionUpdate, EXECUTION_RETENTION,
};
pub use store::{ExecutionStore, InMemoryExecutionStore, InMemoryLogSink, LogSink};

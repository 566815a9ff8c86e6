//! Task domain module.
//!
//! The lifecycle rules for delegated automation work, implemented as pure,
//! deterministic logic (no IO, no storage). Stores call into these rules so
//! every backend enforces the same state machine.

pub mod payload;
pub mod report;
pub mod task;

pub use payload::{ApplyPayload, ScrapePayload, TaskPayload};
pub use report::{ReportStatus, TaskReport};
pub use task::{Task, TaskStatus, TaskType, TransitionError, TransitionOutcome};

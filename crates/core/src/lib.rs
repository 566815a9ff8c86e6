//! `jobrelay-core`: identifiers and the domain error model.
//!
//! This crate has no infrastructure concerns and no knowledge of tasks,
//! agents or browsers.

pub mod error;
pub mod id;

pub use error::{DomainError, DomainResult};
pub use id::{AgentRecordId, BlueprintId, OwnerId, TaskId};

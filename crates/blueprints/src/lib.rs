//! Blueprint domain module.
//!
//! Recurring search/apply profiles: when they are due, what task they
//! produce, and which in-flight tasks a state change invalidates.

pub mod blueprint;
pub mod filters;

pub use blueprint::{cancellation_scope, Blueprint, BlueprintPatch, BlueprintStatus, CancelScope};
pub use filters::{BlueprintFilters, DatePosted, ExperienceLevel, JobType, Portal, WorkMode};

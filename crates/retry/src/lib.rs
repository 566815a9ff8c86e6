//! Retry/backoff engine.
//!
//! - `policy`: declarative retry policies and the delay curve
//! - `error`: automation error taxonomy and classifier
//! - `log`: bounded error history
//! - `engine`: the generic async retry wrapper

pub mod engine;
pub mod error;
pub mod log;
pub mod policy;

pub use engine::RetryEngine;
pub use error::{classify, AutomationError, Classification, Severity};
pub use log::{ErrorLog, ErrorRecord, ErrorSummary, ERROR_LOG_CAPACITY};
pub use policy::{BackoffStrategy, RetryPolicy};

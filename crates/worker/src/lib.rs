//! Remote browser agent: claims tasks from the relay server and executes
//! them in a local browser.

pub mod client;
pub mod config;
pub mod heartbeat;
pub mod profile;
pub mod runner;

#[cfg(test)]
mod testing;

pub use client::{AgentApi, ClientError, HttpFieldMapper, ServerClient, ServerCodeSource};
pub use config::{ConfigError, WorkerConfig};
pub use heartbeat::spawn_heartbeat;
pub use profile::{LocalResumeStore, load_profile};
pub use runner::{Limits, Runner};

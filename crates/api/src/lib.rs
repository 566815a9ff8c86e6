//! HTTP API: the agent protocol plus task and blueprint management.

pub mod app;
pub mod context;
pub mod middleware;

//! Agent domain module: liveness and hourly rate-limit rules for paired
//! remote workers. Pure logic; the registry in `jobrelay-infra` persists it.

pub mod agent;

pub use agent::{Agent, AgentStatus, HEARTBEAT_TIMEOUT_SECS, RATE_WINDOW_SECS};

//! Server configuration loaded from the environment.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use jobrelay_core::OwnerId;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// One accepted bearer key and the owner it acts for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiKeyEntry {
    pub key: String,
    pub owner: OwnerId,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    /// `None` selects the in-memory stores.
    pub database_url: Option<String>,
    pub api_keys: Vec<ApiKeyEntry>,
    pub heartbeat_sweep_interval: Duration,
    pub rate_limit_sweep_interval: Duration,
    pub scheduler_tick_interval: Duration,
    pub default_max_tasks_per_hour: u32,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; `from_env` passes the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let bind_addr = parse_or(&lookup, "BIND_ADDR", SocketAddr::from(([0, 0, 0, 0], 8080)))?;
        let database_url = lookup("DATABASE_URL").filter(|v| !v.trim().is_empty());
        let api_keys = parse_api_keys(&lookup("API_KEYS").ok_or(ConfigError::Missing("API_KEYS"))?)?;

        Ok(Self {
            bind_addr,
            database_url,
            api_keys,
            heartbeat_sweep_interval: Duration::from_secs(parse_or(&lookup, "HEARTBEAT_SWEEP_SECS", 120)?),
            rate_limit_sweep_interval: Duration::from_secs(parse_or(&lookup, "RATE_LIMIT_SWEEP_SECS", 300)?),
            scheduler_tick_interval: Duration::from_secs(parse_or(&lookup, "SCHEDULER_TICK_SECS", 60)?),
            default_max_tasks_per_hour: parse_or(&lookup, "DEFAULT_MAX_TASKS_PER_HOUR", 10)?,
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            reason: e.to_string(),
        }),
    }
}

/// `key=owner_uuid,key2=owner_uuid2`
fn parse_api_keys(raw: &str) -> Result<Vec<ApiKeyEntry>, ConfigError> {
    let mut entries = Vec::new();
    for pair in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (key, owner) = pair.split_once('=').ok_or_else(|| ConfigError::Invalid {
            key: "API_KEYS",
            reason: format!("expected key=owner, got {pair:?}"),
        })?;
        let key = key.trim();
        if key.is_empty() {
            return Err(ConfigError::Invalid {
                key: "API_KEYS",
                reason: "empty key".to_string(),
            });
        }
        let owner = owner.trim().parse::<OwnerId>().map_err(|e| ConfigError::Invalid {
            key: "API_KEYS",
            reason: e.to_string(),
        })?;
        entries.push(ApiKeyEntry {
            key: key.to_string(),
            owner,
        });
    }
    if entries.is_empty() {
        return Err(ConfigError::Missing("API_KEYS"));
    }
    Ok(entries)
}

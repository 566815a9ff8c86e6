//! Agent process configuration loaded from the environment.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use reqwest::Url;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub server_url: Url,
    pub api_key: String,
    /// Stable pairing identity reported on every request.
    pub agent_id: String,
    pub agent_name: Option<String>,
    pub headless: bool,
    /// Browser binary; auto-detected when unset.
    pub chrome_path: Option<String>,
    pub profile_path: PathBuf,
    pub resume_dir: PathBuf,
    /// Remote field mapper; the built-in keyword mapper is used when unset.
    pub field_mapper_url: Option<Url>,
    pub poll_interval: Duration,
    pub heartbeat_interval: Duration,
    pub auto_apply_limit: usize,
    pub deep_scrape_limit: usize,
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &'static str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or(ConfigError::Missing(key))
        };
        let url = |key: &'static str, raw: &str| {
            Url::parse(raw).map_err(|e| ConfigError::Invalid {
                key,
                reason: e.to_string(),
            })
        };

        let server_url = url("JOBRELAY_SERVER_URL", &required("JOBRELAY_SERVER_URL")?)?;
        let field_mapper_url = match lookup("FIELD_MAPPER_URL").filter(|v| !v.trim().is_empty()) {
            Some(raw) => Some(url("FIELD_MAPPER_URL", raw.trim())?),
            None => None,
        };

        Ok(Self {
            server_url,
            api_key: required("JOBRELAY_API_KEY")?,
            agent_id: required("JOBRELAY_AGENT_ID")?,
            agent_name: lookup("JOBRELAY_AGENT_NAME").filter(|v| !v.trim().is_empty()),
            headless: parse_or(&lookup, "BROWSER_HEADLESS", true)?,
            chrome_path: lookup("CHROME_PATH").filter(|v| !v.trim().is_empty()),
            profile_path: PathBuf::from(lookup("PROFILE_PATH").unwrap_or_else(|| "profile.json".into())),
            resume_dir: PathBuf::from(lookup("RESUME_DIR").unwrap_or_else(|| "resumes".into())),
            field_mapper_url,
            poll_interval: Duration::from_secs(parse_or(&lookup, "POLL_INTERVAL_SECS", 10)?),
            heartbeat_interval: Duration::from_secs(parse_or(&lookup, "HEARTBEAT_INTERVAL_SECS", 30)?),
            auto_apply_limit: parse_or(&lookup, "AUTO_APPLY_LIMIT", 5)?,
            deep_scrape_limit: parse_or(&lookup, "DEEP_SCRAPE_LIMIT", 10)?,
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k: &str| map.get(k).cloned()
    }

    const BASE: &[(&str, &str)] = &[
        ("JOBRELAY_SERVER_URL", "http://relay.local:8080/"),
        ("JOBRELAY_API_KEY", "k-123"),
        ("JOBRELAY_AGENT_ID", "laptop-1"),
    ];

    #[test]
    fn defaults_apply() {
        let cfg = WorkerConfig::from_lookup(lookup(BASE)).unwrap();
        assert_eq!(cfg.server_url.as_str(), "http://relay.local:8080/");
        assert!(cfg.headless);
        assert_eq!(cfg.poll_interval, Duration::from_secs(10));
        assert_eq!(cfg.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(cfg.auto_apply_limit, 5);
        assert!(cfg.field_mapper_url.is_none());
    }

    #[test]
    fn agent_id_is_required() {
        let err = WorkerConfig::from_lookup(lookup(&BASE[..2])).unwrap_err();
        assert_eq!(err, ConfigError::Missing("JOBRELAY_AGENT_ID"));
    }

    #[test]
    fn bad_values_name_their_key() {
        let mut pairs = BASE.to_vec();
        pairs.push(("BROWSER_HEADLESS", "sometimes"));
        let err = WorkerConfig::from_lookup(lookup(&pairs)).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "BROWSER_HEADLESS", .. }));

        let mut pairs = BASE.to_vec();
        pairs.push(("FIELD_MAPPER_URL", "not a url"));
        let err = WorkerConfig::from_lookup(lookup(&pairs)).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "FIELD_MAPPER_URL", .. }));
    }
}

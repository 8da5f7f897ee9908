//! Ingestion pipeline configuration.
//!
//! Defaults work out of the box; overrides come from builder methods, JSON,
//! or `BUILDUP_*` environment variables.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const ENV_PAGE_SIZE: &str = "BUILDUP_PAGE_SIZE";
pub const ENV_REPLAY_RETRIES: &str = "BUILDUP_REPLAY_RETRIES";
pub const ENV_CONFLICT_RETRIES: &str = "BUILDUP_CONFLICT_RETRIES";
pub const ENV_IDLE_TIMEOUT_MS: &str = "BUILDUP_IDLE_TIMEOUT_MS";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}: {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("page size must be positive")]
    ZeroPageSize,

    #[error("malformed pipeline config: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Used in log fields to tell pipelines apart.
    pub name: String,
    /// Events per page when replaying a stream's history.
    pub page_size: usize,
    /// Extra attempts after a failed history load (no backoff).
    pub replay_retries: u32,
    /// Extra attempts after a rejected (stale) snapshot write.
    pub conflict_retries: u32,
    /// A stream worker with nothing to do for this long stops; the next event
    /// of its stream starts a new one. `0` keeps workers until the bus ends.
    pub idle_timeout_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            name: "buildup".to_string(),
            page_size: 100,
            replay_retries: 5,
            conflict_retries: 3,
            idle_timeout_ms: 300_000,
        }
    }
}

impl PipelineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_replay_retries(mut self, retries: u32) -> Self {
        self.replay_retries = retries;
        self
    }

    pub fn with_conflict_retries(mut self, retries: u32) -> Self {
        self.conflict_retries = retries;
        self
    }

    pub fn with_idle_timeout(mut self, idle: Option<Duration>) -> Self {
        self.idle_timeout_ms = idle.map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX));
        self
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_ms > 0).then(|| Duration::from_millis(self.idle_timeout_ms))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.page_size == 0 {
            return Err(ConfigError::ZeroPageSize);
        }
        Ok(())
    }

    /// Defaults overridden by `BUILDUP_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for the `BUILDUP_*` keys.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(value) = lookup(ENV_PAGE_SIZE) {
            config.page_size = parse(ENV_PAGE_SIZE, &value)?;
        }
        if let Some(value) = lookup(ENV_REPLAY_RETRIES) {
            config.replay_retries = parse(ENV_REPLAY_RETRIES, &value)?;
        }
        if let Some(value) = lookup(ENV_CONFLICT_RETRIES) {
            config.conflict_retries = parse(ENV_CONFLICT_RETRIES, &value)?;
        }
        if let Some(value) = lookup(ENV_IDLE_TIMEOUT_MS) {
            config.idle_timeout_ms = parse(ENV_IDLE_TIMEOUT_MS, &value)?;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }
}

fn parse<T>(key: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: core::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key,
        value: value.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.page_size, 100);
        assert_eq!(config.replay_retries, 5);
        assert_eq!(config.conflict_retries, 3);
        assert_eq!(config.idle_timeout(), Some(Duration::from_secs(300)));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn lookup_overrides_defaults() {
        let config = PipelineConfig::from_lookup(lookup(&[
            (ENV_PAGE_SIZE, "25"),
            (ENV_CONFLICT_RETRIES, " 7 "),
        ]))
        .unwrap();
        assert_eq!(config.page_size, 25);
        assert_eq!(config.replay_retries, 5);
        assert_eq!(config.conflict_retries, 7);
    }

    #[test]
    fn zero_idle_timeout_keeps_workers() {
        let config = PipelineConfig::from_lookup(lookup(&[(ENV_IDLE_TIMEOUT_MS, "0")])).unwrap();
        assert_eq!(config.idle_timeout(), None);

        let config = PipelineConfig::new().with_idle_timeout(Some(Duration::from_millis(250)));
        assert_eq!(config.idle_timeout_ms, 250);
        assert_eq!(config.with_idle_timeout(None).idle_timeout(), None);
    }

    #[test]
    fn lookup_rejects_garbage() {
        let err = PipelineConfig::from_lookup(lookup(&[(ENV_REPLAY_RETRIES, "lots")])).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                key: ENV_REPLAY_RETRIES,
                ..
            }
        ));

        let err = PipelineConfig::from_lookup(lookup(&[(ENV_PAGE_SIZE, "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::ZeroPageSize));
    }

    #[test]
    fn json_fills_missing_fields_with_defaults() {
        let config = PipelineConfig::from_json(r#"{"name":"ledger","page_size":10}"#).unwrap();
        assert_eq!(config, PipelineConfig::new().with_name("ledger").with_page_size(10));

        assert!(matches!(
            PipelineConfig::from_json("{not json"),
            Err(ConfigError::Json(_))
        ));
    }
}

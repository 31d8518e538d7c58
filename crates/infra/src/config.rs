//! Engine configuration.
//!
//! Defaults are suitable for a single worker per content repository. Every
//! value can be overridden through `CONTENT_REPOSITORY_*` environment variables.

use std::time::Duration;

use thiserror::Error;

pub const ENV_LOCK_TIMEOUT_MS: &str = "CONTENT_REPOSITORY_LOCK_TIMEOUT_MS";
pub const ENV_LOCK_RETRY_MS: &str = "CONTENT_REPOSITORY_LOCK_RETRY_MS";
pub const ENV_BATCH_LIMIT: &str = "CONTENT_REPOSITORY_BATCH_LIMIT";
pub const ENV_POLL_INTERVAL_MS: &str = "CONTENT_REPOSITORY_POLL_INTERVAL_MS";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value '{value}' for {key}: {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Upper bound for acquiring all subscription locks of a batch.
    pub lock_timeout: Duration,
    /// Pause between two lock attempts.
    pub lock_retry_interval: Duration,
    /// Default message limit per batch (`None` = drain the stream).
    pub batch_limit: Option<usize>,
    /// Pause between two runs of a background worker.
    pub poll_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_secs(5),
            lock_retry_interval: Duration::from_millis(10),
            batch_limit: None,
            poll_interval: Duration::from_millis(250),
        }
    }
}

impl EngineConfig {
    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    pub fn with_lock_retry_interval(mut self, lock_retry_interval: Duration) -> Self {
        self.lock_retry_interval = lock_retry_interval;
        self
    }

    pub fn with_batch_limit(mut self, batch_limit: Option<usize>) -> Self {
        self.batch_limit = batch_limit;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Read overrides from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read overrides through `lookup`; absent keys keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(ms) = parse(&lookup, ENV_LOCK_TIMEOUT_MS)? {
            config.lock_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parse(&lookup, ENV_LOCK_RETRY_MS)? {
            config.lock_retry_interval = Duration::from_millis(ms);
        }
        if let Some(limit) = parse::<usize>(&lookup, ENV_BATCH_LIMIT)? {
            if limit == 0 {
                return Err(ConfigError::InvalidValue {
                    key: ENV_BATCH_LIMIT,
                    value: limit.to_string(),
                    reason: "must be greater than zero".to_string(),
                });
            }
            config.batch_limit = Some(limit);
        }
        if let Some(ms) = parse(&lookup, ENV_POLL_INTERVAL_MS)? {
            config.poll_interval = Duration::from_millis(ms);
        }
        Ok(config)
    }
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    raw.trim()
        .parse()
        .map(Some)
        .map_err(|e: T::Err| ConfigError::InvalidValue {
            key,
            value: raw.clone(),
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
    fn absent_values_keep_defaults() {
        let config = EngineConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.lock_timeout, Duration::from_secs(5));
    }

    #[test]
    fn overrides_are_applied() {
        let config = EngineConfig::from_lookup(lookup(&[
            (ENV_LOCK_TIMEOUT_MS, "250"),
            (ENV_BATCH_LIMIT, " 100 "),
        ]))
        .unwrap();
        assert_eq!(config.lock_timeout, Duration::from_millis(250));
        assert_eq!(config.batch_limit, Some(100));
        assert_eq!(config.poll_interval, Duration::from_millis(250));
    }

    #[test]
    fn malformed_values_are_rejected() {
        let err = EngineConfig::from_lookup(lookup(&[(ENV_LOCK_RETRY_MS, "soon")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key: ENV_LOCK_RETRY_MS, .. }));
        assert!(EngineConfig::from_lookup(lookup(&[(ENV_BATCH_LIMIT, "0")])).is_err());
    }
}

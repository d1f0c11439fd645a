// Worker Pool Configuration
//
// Pool sizing and shutdown behaviour, loaded from environment variables.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Environment variable holding the worker count
pub const ENV_POOL_SIZE: &str = "WORKER_POOL_SIZE";
/// Environment variable holding the queue capacity
pub const ENV_QUEUE_SIZE: &str = "WORKER_QUEUE_SIZE";
/// Environment variable holding the shutdown mode (`abandon` or `drain`)
pub const ENV_SHUTDOWN_MODE: &str = "WORKER_SHUTDOWN_MODE";
/// Environment variable holding the drain timeout in milliseconds
pub const ENV_SHUTDOWN_TIMEOUT_MS: &str = "WORKER_SHUTDOWN_TIMEOUT_MS";

/// What `stop` does with jobs that are still queued
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownMode {
    /// Cancel immediately; queued jobs never run
    #[default]
    Abandon,
    /// Run every queued job before exiting, bounded by the shutdown timeout
    Drain,
}

impl FromStr for ShutdownMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "abandon" => Ok(Self::Abandon),
            "drain" => Ok(Self::Drain),
            other => Err(ConfigError::InvalidValue {
                key: ENV_SHUTDOWN_MODE,
                value: other.to_string(),
                reason: "expected `abandon` or `drain`".to_string(),
            }),
        }
    }
}

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable could not be parsed
    #[error("invalid value {value:?} for {key}: {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },

    /// The configuration parsed but is not usable
    #[error("invalid worker pool configuration: {0}")]
    Invalid(String),
}

/// Worker pool configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerPoolConfig {
    /// Number of worker tasks spawned by `start`
    pub workers: usize,

    /// Capacity of the pending job queue
    pub queue_capacity: usize,

    /// Behaviour of `stop` towards queued jobs
    pub shutdown_mode: ShutdownMode,

    /// Upper bound on draining before running jobs are cancelled
    /// (only used by [`ShutdownMode::Drain`])
    #[serde(with = "duration_millis")]
    pub shutdown_timeout: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            workers: 10,
            queue_capacity: 100,
            shutdown_mode: ShutdownMode::Abandon,
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl WorkerPoolConfig {
    /// Create a configuration with the given worker count and queue capacity
    pub fn new(workers: usize, queue_capacity: usize) -> Self {
        Self {
            workers,
            queue_capacity,
            ..Default::default()
        }
    }

    /// Create configuration from environment variables
    ///
    /// Environment variables:
    /// - `WORKER_POOL_SIZE`: number of workers (default: 10)
    /// - `WORKER_QUEUE_SIZE`: queue capacity (default: 100)
    /// - `WORKER_SHUTDOWN_MODE`: `abandon` or `drain` (default: abandon)
    /// - `WORKER_SHUTDOWN_TIMEOUT_MS`: drain timeout (default: 30000)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup
    ///
    /// Unset or empty keys fall back to the defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let workers = match get(ENV_POOL_SIZE) {
            Some(v) => parse_number(ENV_POOL_SIZE, &v)?,
            None => defaults.workers,
        };
        let queue_capacity = match get(ENV_QUEUE_SIZE) {
            Some(v) => parse_number(ENV_QUEUE_SIZE, &v)?,
            None => defaults.queue_capacity,
        };
        let shutdown_mode = match get(ENV_SHUTDOWN_MODE) {
            Some(v) => v.parse()?,
            None => defaults.shutdown_mode,
        };
        let shutdown_timeout = match get(ENV_SHUTDOWN_TIMEOUT_MS) {
            Some(v) => Duration::from_millis(parse_number(ENV_SHUTDOWN_TIMEOUT_MS, &v)?),
            None => defaults.shutdown_timeout,
        };

        let config = Self {
            workers,
            queue_capacity,
            shutdown_mode,
            shutdown_timeout,
        };
        config.validate()?;
        Ok(config)
    }

    /// Set the worker count
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Set the queue capacity
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Set the shutdown mode
    pub fn with_shutdown_mode(mut self, mode: ShutdownMode) -> Self {
        self.shutdown_mode = mode;
        self
    }

    /// Set the drain timeout
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::Invalid("workers must be at least 1".into()));
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "queue_capacity must be at least 1".into(),
            ));
        }
        // tokio's bounded channel panics above this
        if self.queue_capacity > tokio::sync::Semaphore::MAX_PERMITS {
            return Err(ConfigError::Invalid(format!(
                "queue_capacity must be at most {}",
                tokio::sync::Semaphore::MAX_PERMITS
            )));
        }
        Ok(())
    }
}

fn parse_number<T: FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::InvalidValue {
            key,
            value: value.to_string(),
            reason: e.to_string(),
        })
}

/// Serde support for Duration as milliseconds
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = WorkerPoolConfig::default();
        assert_eq!(config.workers, 10);
        assert_eq!(config.queue_capacity, 100);
        assert_eq!(config.shutdown_mode, ShutdownMode::Abandon);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = WorkerPoolConfig::new(2, 5)
            .with_shutdown_mode(ShutdownMode::Drain)
            .with_shutdown_timeout(Duration::from_millis(250));

        assert_eq!(config.workers, 2);
        assert_eq!(config.queue_capacity, 5);
        assert_eq!(config.shutdown_mode, ShutdownMode::Drain);
        assert_eq!(config.shutdown_timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_from_lookup_uses_defaults_when_unset() {
        let config = WorkerPoolConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, WorkerPoolConfig::default());
    }

    #[test]
    fn test_from_lookup_reads_all_keys() {
        let config = WorkerPoolConfig::from_lookup(lookup(&[
            (ENV_POOL_SIZE, "4"),
            (ENV_QUEUE_SIZE, " 32 "),
            (ENV_SHUTDOWN_MODE, "Drain"),
            (ENV_SHUTDOWN_TIMEOUT_MS, "1500"),
        ]))
        .unwrap();

        assert_eq!(config.workers, 4);
        assert_eq!(config.queue_capacity, 32);
        assert_eq!(config.shutdown_mode, ShutdownMode::Drain);
        assert_eq!(config.shutdown_timeout, Duration::from_millis(1500));
    }

    #[test]
    fn test_from_lookup_ignores_empty_values() {
        let config = WorkerPoolConfig::from_lookup(lookup(&[(ENV_POOL_SIZE, "")])).unwrap();
        assert_eq!(config.workers, 10);
    }

    #[test]
    fn test_from_lookup_rejects_garbage() {
        let err = WorkerPoolConfig::from_lookup(lookup(&[(ENV_QUEUE_SIZE, "lots")])).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue { key: ENV_QUEUE_SIZE, .. }
        ));

        let err =
            WorkerPoolConfig::from_lookup(lookup(&[(ENV_SHUTDOWN_MODE, "later")])).unwrap_err();
        assert!(err.to_string().contains("abandon"));
    }

    #[test]
    fn test_validate_rejects_zero_sizes() {
        assert!(WorkerPoolConfig::new(0, 10).validate().is_err());
        assert!(WorkerPoolConfig::new(1, 0).validate().is_err());
        assert!(WorkerPoolConfig::from_lookup(lookup(&[(ENV_POOL_SIZE, "0")])).is_err());
    }

    #[test]
    fn test_validate_rejects_oversized_queue() {
        let config = WorkerPoolConfig::new(1, usize::MAX);
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let config = WorkerPoolConfig::new(1, tokio::sync::Semaphore::MAX_PERMITS);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_lookup_rejects_oversized_queue() {
        let huge = usize::MAX.to_string();
        let result = WorkerPoolConfig::from_lookup(lookup(&[(ENV_QUEUE_SIZE, huge.as_str())]));
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_config_serialization() {
        let config = WorkerPoolConfig::new(3, 7).with_shutdown_mode(ShutdownMode::Drain);
        let json = serde_json::to_value(&config).unwrap();

        assert_eq!(json["shutdown_mode"], "drain");
        assert_eq!(json["shutdown_timeout"], 30_000);

        let parsed: WorkerPoolConfig = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, config);
    }
}

//! Executor configuration
//!
//! Loaded from TOML or built in code. Every blocking wait in a job is bounded
//! by the single `timeout_ms` value.
//!
//! ```toml
//! parallelism = 8
//! queue_capacity = 1000
//! poll_interval_ms = 10
//! timeout_ms = 60000
//! stream_failure = "fail"   # or "truncate"
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Default capacity of puller queues and the worker queue
pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;

/// Default short poll before the bounded wait
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 10;

/// Default bound on every blocking wait
pub const DEFAULT_TIMEOUT_MS: u64 = 60_000;

/// Errors raised while loading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read
    #[error("Failed to read config file: {0}")]
    Read(#[from] std::io::Error),
    /// The TOML could not be parsed
    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),
    /// A value is out of range
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// What to do when a stream stops because its storage read failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamFailurePolicy {
    /// Abort the job with [`OlapError::StreamRead`](crate::OlapError::StreamRead)
    #[default]
    Fail,
    /// Log and treat the stream as exhausted; its remaining data is silently missing
    Truncate,
}

/// Executor tuning knobs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Number of worker slots running the vertex program
    pub parallelism: usize,
    /// Capacity of every puller queue and of the worker queue
    pub queue_capacity: usize,
    /// Short first-phase poll per stream, in milliseconds
    pub poll_interval_ms: u64,
    /// Bound on stream starvation, worker shutdown and puller join, in milliseconds
    pub timeout_ms: u64,
    /// Handling of failed stream reads
    pub stream_failure: StreamFailurePolicy,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            parallelism: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            stream_failure: StreamFailurePolicy::default(),
        }
    }
}

impl ExecutorConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Reject values the executor cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.parallelism == 0 {
            return Err(ConfigError::Invalid("parallelism must be at least 1".into()));
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::Invalid("queue_capacity must be at least 1".into()));
        }
        if self.timeout_ms == 0 {
            return Err(ConfigError::Invalid("timeout_ms must be positive".into()));
        }
        if self.poll_interval_ms > self.timeout_ms {
            return Err(ConfigError::Invalid(format!(
                "poll_interval_ms ({}) exceeds timeout_ms ({})",
                self.poll_interval_ms, self.timeout_ms
            )));
        }
        Ok(())
    }

    /// Set the number of worker slots
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism;
        self
    }

    /// Set the queue capacity
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Set the short poll interval
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Set the bound on every blocking wait
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the stream failure policy
    pub fn with_stream_failure(mut self, policy: StreamFailurePolicy) -> Self {
        self.stream_failure = policy;
        self
    }

    /// Short poll as a [`Duration`]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Bounded wait as a [`Duration`]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = ExecutorConfig::default();
        assert!(config.parallelism >= 1);
        assert_eq!(config.queue_capacity, 1000);
        assert_eq!(config.timeout(), Duration::from_secs(60));
        assert_eq!(config.stream_failure, StreamFailurePolicy::Fail);
        config.validate().unwrap();
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = ExecutorConfig::from_toml_str(
            r#"
parallelism = 3
stream_failure = "truncate"
"#,
        )
        .unwrap();

        assert_eq!(config.parallelism, 3);
        assert_eq!(config.stream_failure, StreamFailurePolicy::Truncate);
        assert_eq!(config.poll_interval_ms, DEFAULT_POLL_INTERVAL_MS);
    }

    #[test]
    fn test_validation_rejects_zeroes() {
        assert!(matches!(
            ExecutorConfig::from_toml_str("parallelism = 0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            ExecutorConfig::from_toml_str("queue_capacity = 0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            ExecutorConfig::from_toml_str("timeout_ms = 5\npoll_interval_ms = 10"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            ExecutorConfig::from_toml_str("parallelism = \"many\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "timeout_ms = 1500\nqueue_capacity = 8").unwrap();

        let config = ExecutorConfig::from_file(file.path()).unwrap();
        assert_eq!(config.timeout(), Duration::from_millis(1500));
        assert_eq!(config.queue_capacity, 8);

        assert!(matches!(
            ExecutorConfig::from_file("/nonexistent/olap.toml"),
            Err(ConfigError::Read(_))
        ));
    }

    #[test]
    fn test_builder_methods() {
        let config = ExecutorConfig::default()
            .with_parallelism(2)
            .with_queue_capacity(16)
            .with_poll_interval(Duration::from_millis(1))
            .with_timeout(Duration::from_millis(200))
            .with_stream_failure(StreamFailurePolicy::Truncate);

        assert_eq!(config.parallelism, 2);
        assert_eq!(config.queue_capacity, 16);
        assert_eq!(config.poll_interval(), Duration::from_millis(1));
        assert_eq!(config.timeout(), Duration::from_millis(200));
        config.validate().unwrap();
    }
}

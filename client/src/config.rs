use crate::RetryPolicy;
use cometa_types::UserId;
use serde::{Deserialize, Serialize};
use std::{str::FromStr, time::Duration};
use thiserror::Error;
use tracing::Level;
use url::Url;

/// Configuration of a client process, as read from YAML.
#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    pub url: String,
    pub user: UserId,

    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub json_logs: bool,

    /// Interval at which snapshots are published.
    #[serde(default = "default_frame_interval_ms")]
    pub frame_interval_ms: u64,
    #[serde(default = "default_mailbox_size")]
    pub mailbox_size: usize,
    /// Decoded frames buffered between the socket and the driver; 0 keeps the
    /// stream default.
    #[serde(default)]
    pub update_buffer: usize,
    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub engine: cometa_engine::Config,
}

/// Retries of read-only requests to the authority.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: usize,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            initial_backoff_ms: policy.initial_backoff.as_millis() as u64,
            max_backoff_ms: policy.max_backoff.as_millis() as u64,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid url {value}: {source}")]
    InvalidUrl {
        value: String,
        #[source]
        source: url::ParseError,
    },
    #[error("invalid url scheme: {value} (expected http or https)")]
    InvalidScheme { value: String },
    #[error("invalid log level: {value}")]
    InvalidLogLevel { value: String },
    #[error("{field} must be > 0 (got {value})")]
    InvalidNonZero { field: &'static str, value: u64 },
    #[error("{field} must be a probability in [0, 1] (got {value})")]
    InvalidProbability { field: &'static str, value: f64 },
    #[error("could not parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
}

#[derive(Debug)]
pub struct ValidatedConfig {
    pub url: Url,
    pub user: UserId,
    pub log_level: Level,
    pub json_logs: bool,
    pub frame_interval: Duration,
    pub mailbox_size: usize,
    pub update_buffer: usize,
    pub retry_policy: RetryPolicy,
    pub engine: cometa_engine::Config,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_frame_interval_ms() -> u64 {
    16
}

fn default_mailbox_size() -> usize {
    1024
}

impl Config {
    /// Config for `url` and `user` with every other field at its default.
    pub fn new(url: impl Into<String>, user: UserId) -> Self {
        Self {
            url: url.into(),
            user,
            log_level: default_log_level(),
            json_logs: false,
            frame_interval_ms: default_frame_interval_ms(),
            mailbox_size: default_mailbox_size(),
            update_buffer: 0,
            retry: RetryConfig::default(),
            engine: cometa_engine::Config::default(),
        }
    }

    pub fn from_yaml(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(raw)?)
    }

    pub fn validate(self) -> Result<ValidatedConfig, ConfigError> {
        let url = Url::parse(&self.url).map_err(|source| ConfigError::InvalidUrl {
            value: self.url.clone(),
            source,
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidScheme {
                value: url.scheme().to_string(),
            });
        }
        if self.frame_interval_ms == 0 {
            return Err(ConfigError::InvalidNonZero {
                field: "frame_interval_ms",
                value: 0,
            });
        }
        if self.mailbox_size == 0 {
            return Err(ConfigError::InvalidNonZero {
                field: "mailbox_size",
                value: 0,
            });
        }
        if self.engine.expected_tick_ms == 0 {
            return Err(ConfigError::InvalidNonZero {
                field: "engine.expected_tick_ms",
                value: 0,
            });
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::InvalidNonZero {
                field: "retry.max_attempts",
                value: 0,
            });
        }
        let crowd = &self.engine.crowd;
        for (field, value) in [
            ("engine.crowd.burst_probability", crowd.burst_probability),
            ("engine.crowd.null_target_fraction", crowd.null_target_fraction),
            ("engine.crowd.reaction_probability", crowd.reaction_probability),
        ] {
            // Also rejects NaN.
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::InvalidProbability { field, value });
            }
        }

        let log_level =
            Level::from_str(&self.log_level).map_err(|_| ConfigError::InvalidLogLevel {
                value: self.log_level.clone(),
            })?;

        Ok(ValidatedConfig {
            url,
            user: self.user,
            log_level,
            json_logs: self.json_logs,
            frame_interval: Duration::from_millis(self.frame_interval_ms),
            mailbox_size: self.mailbox_size,
            update_buffer: self.update_buffer,
            retry_policy: RetryPolicy {
                max_attempts: self.retry.max_attempts,
                initial_backoff: Duration::from_millis(self.retry.initial_backoff_ms),
                max_backoff: Duration::from_millis(self.retry.max_backoff_ms),
            },
            engine: self.engine,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_yaml() {
        let config = Config::from_yaml("url: http://localhost:8080\nuser: 42\n")
            .unwrap()
            .validate()
            .unwrap();
        assert_eq!(config.user, 42);
        assert_eq!(config.log_level, Level::INFO);
        assert_eq!(config.frame_interval, Duration::from_millis(16));
        assert_eq!(config.update_buffer, 0);
        assert_eq!(config.retry_policy, RetryPolicy::default());
        assert_eq!(config.engine, cometa_engine::Config::default());
    }

    #[test]
    fn test_nested_engine_config() {
        let raw = r#"
url: https://cometa.example
user: 1
log_level: debug
json_logs: true
engine:
  expected_tick_ms: 500
  crowd:
    max_population: 30
"#;
        let config = Config::from_yaml(raw).unwrap().validate().unwrap();
        assert!(config.json_logs);
        assert_eq!(config.log_level, Level::DEBUG);
        assert_eq!(config.engine.stale_after_ms(), 1_000);
        assert_eq!(config.engine.crowd.max_population, 30);
        assert_eq!(config.engine.crowd.min_population, 15);
    }

    #[test]
    fn test_update_buffer_and_retry() {
        let raw = r#"
url: http://localhost:8080
user: 1
update_buffer: 64
retry:
  max_attempts: 5
  initial_backoff_ms: 50
"#;
        let config = Config::from_yaml(raw).unwrap().validate().unwrap();
        assert_eq!(config.update_buffer, 64);
        assert_eq!(
            config.retry_policy,
            RetryPolicy {
                max_attempts: 5,
                initial_backoff: Duration::from_millis(50),
                max_backoff: RetryPolicy::default().max_backoff,
            }
        );

        let raw = "url: http://localhost:8080\nuser: 1\nretry:\n  max_attempts: 0\n";
        assert!(matches!(
            Config::from_yaml(raw).unwrap().validate(),
            Err(ConfigError::InvalidNonZero {
                field: "retry.max_attempts",
                ..
            })
        ));
    }

    #[test]
    fn test_rejects_non_finite_crowd_probabilities() {
        let raw = r#"
url: http://localhost:8080
user: 1
engine:
  crowd:
    reaction_probability: .nan
"#;
        assert!(matches!(
            Config::from_yaml(raw).unwrap().validate(),
            Err(ConfigError::InvalidProbability {
                field: "engine.crowd.reaction_probability",
                ..
            })
        ));

        let mut config = Config::new("http://localhost", 1);
        config.engine.crowd.burst_probability = f64::INFINITY;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidProbability {
                field: "engine.crowd.burst_probability",
                ..
            })
        ));

        let mut config = Config::new("http://localhost", 1);
        config.engine.crowd.null_target_fraction = 1.5;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidProbability { .. })
        ));
    }

    #[test]
    fn test_rejects_bad_values() {
        let mut config = Config::new("ws://localhost:8080", 1);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidScheme { .. })
        ));

        config = Config::new("not a url", 1);
        assert!(matches!(config.validate(), Err(ConfigError::InvalidUrl { .. })));

        config = Config::new("http://localhost", 1);
        config.frame_interval_ms = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidNonZero {
                field: "frame_interval_ms",
                ..
            })
        ));

        config = Config::new("http://localhost", 1);
        config.log_level = "loud".into();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidLogLevel { .. })
        ));
    }
}

//! Runtime configuration, read from the environment.

use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use stockroom_core::DomainError;
pub use stockroom_observability::LogFormat;

use crate::jobs::{JobExecutorConfig, RetryPolicy};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("invalid value for {var}: '{value}'")]
    Invalid { var: &'static str, value: String },
}

impl From<ConfigError> for DomainError {
    fn from(value: ConfigError) -> Self {
        DomainError::validation(value.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// `None` runs against the in-memory store.
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub lock_timeout_ms: u64,
    pub worker_concurrency: usize,
    pub worker_poll_interval_ms: u64,
    pub job_max_attempts: u32,
    pub job_base_delay_ms: u64,
    pub job_max_delay_ms: u64,
    pub alert_recipients: Vec<String>,
    /// 0 disables the scheduled digest.
    pub digest_interval_secs: u64,
    /// 0 disables the periodic resend/prune sweep.
    pub maintenance_interval_secs: u64,
    /// Age at which completed and cancelled jobs are pruned.
    pub job_retention_secs: u64,
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: None,
            database_max_connections: 10,
            lock_timeout_ms: 5_000,
            worker_concurrency: 4,
            worker_poll_interval_ms: 100,
            job_max_attempts: 3,
            job_base_delay_ms: 10_000,
            job_max_delay_ms: 300_000,
            alert_recipients: vec!["admin@localhost".to_string()],
            digest_interval_secs: 86_400,
            maintenance_interval_secs: 300,
            job_retention_secs: 604_800,
            log_format: LogFormat::Json,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from any variable source. Unset variables keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let alert_recipients = match var("ALERT_RECIPIENTS") {
            Some(raw) => {
                let list: Vec<String> = raw
                    .split(',')
                    .map(str::trim)
                    .filter(|r| !r.is_empty())
                    .map(str::to_string)
                    .collect();
                if list.is_empty() {
                    return Err(ConfigError::Invalid {
                        var: "ALERT_RECIPIENTS",
                        value: raw,
                    });
                }
                list
            }
            None => defaults.alert_recipients,
        };

        let log_format = match var("LOG_FORMAT") {
            Some(raw) => raw.parse().map_err(|_| ConfigError::Invalid {
                var: "LOG_FORMAT",
                value: raw.clone(),
            })?,
            None => defaults.log_format,
        };

        let config = Self {
            database_url: var("DATABASE_URL"),
            database_max_connections: parse(
                var("DATABASE_MAX_CONNECTIONS"),
                "DATABASE_MAX_CONNECTIONS",
                defaults.database_max_connections,
            )?,
            lock_timeout_ms: parse(var("LOCK_TIMEOUT_MS"), "LOCK_TIMEOUT_MS", defaults.lock_timeout_ms)?,
            worker_concurrency: parse(
                var("WORKER_CONCURRENCY"),
                "WORKER_CONCURRENCY",
                defaults.worker_concurrency,
            )?,
            worker_poll_interval_ms: parse(
                var("WORKER_POLL_INTERVAL_MS"),
                "WORKER_POLL_INTERVAL_MS",
                defaults.worker_poll_interval_ms,
            )?,
            job_max_attempts: parse(var("JOB_MAX_ATTEMPTS"), "JOB_MAX_ATTEMPTS", defaults.job_max_attempts)?,
            job_base_delay_ms: parse(
                var("JOB_BASE_DELAY_MS"),
                "JOB_BASE_DELAY_MS",
                defaults.job_base_delay_ms,
            )?,
            job_max_delay_ms: parse(var("JOB_MAX_DELAY_MS"), "JOB_MAX_DELAY_MS", defaults.job_max_delay_ms)?,
            alert_recipients,
            digest_interval_secs: parse(
                var("LOW_STOCK_DIGEST_INTERVAL_SECS"),
                "LOW_STOCK_DIGEST_INTERVAL_SECS",
                defaults.digest_interval_secs,
            )?,
            maintenance_interval_secs: parse(
                var("MAINTENANCE_INTERVAL_SECS"),
                "MAINTENANCE_INTERVAL_SECS",
                defaults.maintenance_interval_secs,
            )?,
            job_retention_secs: parse(
                var("JOB_RETENTION_SECS"),
                "JOB_RETENTION_SECS",
                defaults.job_retention_secs,
            )?,
            log_format,
        };

        if config.job_max_attempts == 0 {
            return Err(ConfigError::Invalid {
                var: "JOB_MAX_ATTEMPTS",
                value: "0".to_string(),
            });
        }
        if config.worker_concurrency == 0 {
            return Err(ConfigError::Invalid {
                var: "WORKER_CONCURRENCY",
                value: "0".to_string(),
            });
        }
        Ok(config)
    }

    /// The URL, or `Missing` when the binary needs one.
    pub fn require_database_url(&self) -> Result<&str, ConfigError> {
        self.database_url
            .as_deref()
            .ok_or(ConfigError::Missing("DATABASE_URL"))
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::exponential(
            self.job_max_attempts,
            Duration::from_millis(self.job_base_delay_ms),
            Duration::from_millis(self.job_max_delay_ms),
        )
    }

    pub fn executor_config(&self) -> JobExecutorConfig {
        JobExecutorConfig::default()
            .with_name("stockroom-worker")
            .with_concurrency(self.worker_concurrency)
            .with_poll_interval(Duration::from_millis(self.worker_poll_interval_ms))
    }

    pub fn digest_interval(&self) -> Option<Duration> {
        (self.digest_interval_secs > 0).then(|| Duration::from_secs(self.digest_interval_secs))
    }

    pub fn maintenance_interval(&self) -> Option<Duration> {
        (self.maintenance_interval_secs > 0)
            .then(|| Duration::from_secs(self.maintenance_interval_secs))
    }

    pub fn job_retention(&self) -> Duration {
        Duration::from_secs(self.job_retention_secs)
    }
}

fn parse<T: FromStr>(raw: Option<String>, var: &'static str, default: T) -> Result<T, ConfigError> {
    match raw {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { var, value }),
        None => Ok(default),
    }
}

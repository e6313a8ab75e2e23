//! Typed configuration from environment variables.
//!
//! Loads once at startup, fails fast if a value is malformed.
//! The store URL is wrapped in secrecy::SecretString to prevent log leaks.

pub mod secrets;

use std::time::Duration;

use crate::error::{Error, Result};
use secrecy::SecretString;

#[derive(Debug)]
pub struct Config {
    /// Postgres URL for the key/value table and pgmq lanes.
    pub database_url: Option<SecretString>,
    pub jobs: JobSettings,
    pub api_host: String,
    pub api_port: u16,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

/// Retention, timeout and claim policy shared by admission and workers.
#[derive(Debug, Clone)]
pub struct JobSettings {
    /// How long a `finished` record stays readable.
    pub result_ttl: Duration,
    /// How long a `failed` or `cancelled` record stays readable.
    pub failure_ttl: Duration,
    /// Wall-clock ceiling per job.
    pub task_timeout: Duration,
    /// Added to a task's expected duration to get its claim TTL.
    pub idempotency_margin: Duration,
    /// Release the claim as soon as a job fails. When false the claim is left
    /// to expire on its own TTL, blocking resubmission until then.
    pub release_on_failure: bool,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            result_ttl: Duration::from_secs(3600),
            failure_ttl: Duration::from_secs(86_400),
            task_timeout: Duration::from_secs(600),
            idempotency_margin: Duration::from_secs(300),
            release_on_failure: true,
        }
    }
}

impl JobSettings {
    /// Claim TTL for a task expected to run for `expected`.
    pub fn claim_ttl(&self, expected: Duration) -> Duration {
        expected + self.idempotency_margin
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        let defaults = JobSettings::default();
        Ok(Self {
            database_url: std::env::var("DATABASE_URL").ok().map(SecretString::from),
            jobs: JobSettings {
                result_ttl: secs_var("RESULT_TTL", defaults.result_ttl)?,
                failure_ttl: secs_var("FAILURE_TTL", defaults.failure_ttl)?,
                task_timeout: secs_var("TASK_TIMEOUT", defaults.task_timeout)?,
                idempotency_margin: secs_var("IDEMP_MARGIN", defaults.idempotency_margin)?,
                release_on_failure: bool_var("RELEASE_ON_FAILURE", defaults.release_on_failure)?,
            },
            api_host: std::env::var("API_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            api_port: parsed_var("API_PORT", 8000)?,
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }

    /// The store URL, for commands that need the Postgres backend.
    pub fn require_database_url(&self) -> Result<&SecretString> {
        self.database_url.as_ref().ok_or_else(|| {
            Error::Config("required environment variable DATABASE_URL is not set".to_string())
        })
    }
}

fn parsed_var<T: std::str::FromStr>(name: &str, default: T) -> Result<T> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| Error::Config(format!("{name} has an invalid value: {raw:?}"))),
        Err(_) => Ok(default),
    }
}

fn secs_var(name: &str, default: Duration) -> Result<Duration> {
    parsed_var(name, default.as_secs()).map(Duration::from_secs)
}

fn bool_var(name: &str, default: bool) -> Result<bool> {
    parsed_var(name, default)
}

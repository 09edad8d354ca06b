use std::env;
use std::fmt::Display;
use std::ops::RangeInclusive;
use std::str::FromStr;

use tracing::info;

use crate::error::{PulseError, Result};

/// Longest anomaly baseline, in days.
const MAX_BASELINE_DAYS: u32 = 90;
/// Longest lease or time budget, in seconds.
const MAX_RUN_SECS: u64 = 86_400;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Postgres
    pub database_url: String,

    // API server
    pub api_host: String,
    pub api_port: u16,

    // Batch sizes
    pub trend_batch_size: usize,
    pub anomaly_batch_size: usize,
    pub attribution_batch_size: usize,

    // Anomaly detection
    pub anomaly_baseline_days: u32,
    pub anomaly_z_threshold: f64,
    pub anomaly_critical_z: f64,
    pub anomaly_volume_floor: f64,

    // Run control
    pub job_lease_ttl_secs: u64,
    pub job_time_budget_secs: u64,
    pub retry_max_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub breaker_max_failures: u32,
}

impl Config {
    /// Load configuration for the batch jobs and API server.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database_url: required_env("DATABASE_URL")?,
            api_host: env::var("API_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            api_port: parsed_env("API_PORT", 3000)?,
            trend_batch_size: parsed_env("TREND_BATCH_SIZE", 500)?,
            anomaly_batch_size: parsed_env("ANOMALY_BATCH_SIZE", 500)?,
            attribution_batch_size: parsed_env("ATTRIBUTION_BATCH_SIZE", 200)?,
            anomaly_baseline_days: bounded_env(
                "ANOMALY_BASELINE_DAYS",
                7,
                1..=MAX_BASELINE_DAYS,
            )?,
            anomaly_z_threshold: parsed_env("ANOMALY_Z_THRESHOLD", 2.5)?,
            anomaly_critical_z: parsed_env("ANOMALY_CRITICAL_Z", 4.0)?,
            anomaly_volume_floor: parsed_env("ANOMALY_VOLUME_FLOOR", 50.0)?,
            job_lease_ttl_secs: bounded_env("JOB_LEASE_TTL_SECS", 900, 1..=MAX_RUN_SECS)?,
            job_time_budget_secs: bounded_env("JOB_TIME_BUDGET_SECS", 240, 1..=MAX_RUN_SECS)?,
            retry_max_attempts: parsed_env("RETRY_MAX_ATTEMPTS", 3)?,
            retry_base_delay_ms: parsed_env("RETRY_BASE_DELAY_MS", 200)?,
            breaker_max_failures: parsed_env("BREAKER_MAX_FAILURES", 5)?,
        })
    }

    /// Log the effective configuration with credentials stripped from the database URL.
    pub fn log_redacted(&self) {
        info!(
            database_url = %redact_url(&self.database_url),
            api = %format!("{}:{}", self.api_host, self.api_port),
            trend_batch_size = self.trend_batch_size,
            anomaly_batch_size = self.anomaly_batch_size,
            attribution_batch_size = self.attribution_batch_size,
            anomaly_baseline_days = self.anomaly_baseline_days,
            anomaly_z_threshold = self.anomaly_z_threshold,
            job_lease_ttl_secs = self.job_lease_ttl_secs,
            job_time_budget_secs = self.job_time_budget_secs,
            breaker_max_failures = self.breaker_max_failures,
            "Loaded config"
        );
    }
}

fn required_env(key: &str) -> Result<String> {
    env::var(key).map_err(|_| PulseError::Config(format!("{key} environment variable is required")))
}

fn parsed_env<T: FromStr>(key: &str, default: T) -> Result<T> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| PulseError::Config(format!("{key} has invalid value '{raw}'"))),
        Err(_) => Ok(default),
    }
}

fn bounded_env<T>(key: &str, default: T, range: RangeInclusive<T>) -> Result<T>
where
    T: FromStr + PartialOrd + Display,
{
    let value = parsed_env(key, default)?;
    if !range.contains(&value) {
        return Err(PulseError::Config(format!(
            "{key} must be between {} and {}, got {value}",
            range.start(),
            range.end()
        )));
    }
    Ok(value)
}

const REDACTED: &str = "***";

/// Mask the password in the userinfo and in any `password` query parameter.
fn redact_url(raw: &str) -> String {
    let Ok(mut parsed) = url::Url::parse(raw) else {
        return "<unparseable url>".to_string();
    };

    if parsed.password().is_some() {
        // Only fails for URLs that cannot carry credentials at all.
        let _ = parsed.set_password(Some(REDACTED));
    }

    if parsed.query_pairs().any(|(key, _)| key == "password") {
        let pairs: Vec<(String, String)> = parsed
            .query_pairs()
            .map(|(k, v)| {
                let value = if k == "password" {
                    REDACTED.to_string()
                } else {
                    v.into_owned()
                };
                (k.into_owned(), value)
            })
            .collect();
        parsed.query_pairs_mut().clear().extend_pairs(pairs);
    }

    parsed.to_string()
}

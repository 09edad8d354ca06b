use std::time::Duration;

use pulse_common::Config;

use crate::retry::RetryPolicy;

/// Tunables for the batch jobs, derived from [`Config`].
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub trend_batch_size: usize,
    pub anomaly_batch_size: usize,
    pub attribution_batch_size: usize,
    pub anomaly: AnomalyThresholds,
    pub lease_ttl: chrono::Duration,
    pub time_budget: Duration,
    pub retry: RetryPolicy,
    /// Consecutive failed runs before a job type disables itself.
    pub breaker_max_failures: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct AnomalyThresholds {
    /// Trailing days used as the baseline distribution.
    pub baseline_days: u32,
    /// Flag threshold; above it an anomaly is at least `High`.
    pub z_threshold: f64,
    pub critical_z: f64,
    /// Absolute excess over the baseline mean that makes a flagged count spike critical.
    pub volume_floor: f64,
}

impl Default for AnomalyThresholds {
    fn default() -> Self {
        Self {
            baseline_days: 7,
            z_threshold: 2.5,
            critical_z: 4.0,
            volume_floor: 50.0,
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            trend_batch_size: 500,
            anomaly_batch_size: 500,
            attribution_batch_size: 200,
            anomaly: AnomalyThresholds::default(),
            lease_ttl: chrono::Duration::seconds(900),
            time_budget: Duration::from_secs(240),
            retry: RetryPolicy::default(),
            breaker_max_failures: 5,
        }
    }
}

impl From<&Config> for EngineSettings {
    fn from(config: &Config) -> Self {
        Self {
            trend_batch_size: config.trend_batch_size,
            anomaly_batch_size: config.anomaly_batch_size,
            attribution_batch_size: config.attribution_batch_size,
            anomaly: AnomalyThresholds {
                baseline_days: config.anomaly_baseline_days,
                z_threshold: config.anomaly_z_threshold,
                critical_z: config.anomaly_critical_z,
                volume_floor: config.anomaly_volume_floor,
            },
            lease_ttl: chrono::Duration::seconds(
                i64::try_from(config.job_lease_ttl_secs).unwrap_or(i64::MAX / 1000),
            ),
            time_budget: Duration::from_secs(config.job_time_budget_secs),
            retry: RetryPolicy {
                max_attempts: config.retry_max_attempts.max(1),
                base_delay: Duration::from_millis(config.retry_base_delay_ms),
            },
            breaker_max_failures: config.breaker_max_failures,
        }
    }
}

//! Run control shared by every batch job: lease, circuit breaker, time budget.
//!
//! A run acquires the job type's lease, executes, and always releases the
//! lease, whatever the outcome. A crashed run's lease simply expires. The
//! job's health row counts consecutive failed runs; at the configured limit
//! the job type is disabled until [`reset_job_health`] is called.

use std::future::Future;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};
use uuid::Uuid;

use pulse_common::{ErrorClass, JobHealth, JobType, PulseError, Result, RunSummary};
use pulse_store::JobStore;

use crate::retry::with_retry;
use crate::settings::EngineSettings;

/// Wall-clock budget for one run. Checked between items, never mid-write.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Option<Instant>,
}

impl Deadline {
    pub fn after(budget: std::time::Duration) -> Self {
        Self {
            at: Instant::now().checked_add(budget),
        }
    }

    pub fn unbounded() -> Self {
        Self { at: None }
    }

    pub fn expired(&self) -> bool {
        self.at.is_some_and(|at| Instant::now() >= at)
    }
}

fn fresh_health(job: JobType) -> JobHealth {
    JobHealth {
        job_type: job,
        consecutive_failures: 0,
        disabled: false,
        last_run_at: None,
        last_summary: None,
    }
}

/// A run failed when its batch could not be fetched or every item it tried failed.
pub fn run_failed(outcome: &Result<RunSummary>) -> bool {
    match outcome {
        Ok(summary) => summary.all_failed(),
        Err(_) => true,
    }
}

/// Health after a finished run.
pub fn next_health(
    previous: JobHealth,
    outcome: &Result<RunSummary>,
    finished_at: DateTime<Utc>,
    max_failures: u32,
) -> JobHealth {
    let consecutive_failures = if run_failed(outcome) {
        previous.consecutive_failures.saturating_add(1)
    } else {
        0
    };
    JobHealth {
        job_type: previous.job_type,
        consecutive_failures,
        disabled: max_failures > 0 && consecutive_failures >= max_failures,
        last_run_at: Some(finished_at),
        last_summary: match outcome {
            Ok(summary) => Some(summary.clone()),
            Err(_) => previous.last_summary,
        },
    }
}

/// Run `body` under the job's lease and breaker.
pub async fn run_job<S, F, Fut>(
    store: &S,
    settings: &EngineSettings,
    job: JobType,
    body: F,
) -> Result<RunSummary>
where
    S: JobStore + ?Sized,
    F: FnOnce(Deadline) -> Fut,
    Fut: Future<Output = Result<RunSummary>>,
{
    let health = store
        .job_health(job)
        .await?
        .unwrap_or_else(|| fresh_health(job));
    if health.disabled {
        warn!(
            job = %job,
            consecutive_failures = health.consecutive_failures,
            "Job type disabled, skipping run"
        );
        return Err(PulseError::JobDisabled(job));
    }

    let holder = Uuid::new_v4();
    let acquired = with_retry(&settings.retry, "acquire lease", || {
        store.try_acquire_lease(job, holder, Utc::now(), settings.lease_ttl)
    })
    .await?;
    if !acquired {
        info!(job = %job, "Another run holds the lease, skipping");
        return Err(PulseError::LeaseConflict(job));
    }
    info!(job = %job, holder = %holder, "Run started");

    let mut outcome = body(Deadline::after(settings.time_budget)).await;
    let finished_at = Utc::now();
    if let Ok(summary) = outcome.as_mut() {
        summary.finished_at = Some(finished_at);
    }

    // Always release, even on failure
    if let Err(e) = store.release_lease(job, holder).await {
        error!(job = %job, error = %e, "Failed to release job lease; it will expire");
    }

    let health = next_health(health, &outcome, finished_at, settings.breaker_max_failures);
    if health.disabled {
        error!(
            job = %job,
            consecutive_failures = health.consecutive_failures,
            "Job type disabled after consecutive failed runs"
        );
    }
    if let Err(e) = store.put_job_health(&health).await {
        warn!(job = %job, error = %e, "Failed to record job health");
    }

    match &outcome {
        Ok(summary) => info!(
            job = %job,
            processed = summary.processed,
            skipped = summary.skipped,
            deferred = summary.deferred,
            errored = summary.errored,
            truncated = summary.truncated,
            "Run complete"
        ),
        Err(e) => error!(job = %job, error = %e, "Run failed"),
    }
    outcome
}

/// Re-enable a disabled job type and clear its failure count.
pub async fn reset_job_health<S: JobStore + ?Sized>(store: &S, job: JobType) -> Result<()> {
    let previous = store.job_health(job).await?;
    let health = JobHealth {
        last_run_at: previous.as_ref().and_then(|h| h.last_run_at),
        last_summary: previous.and_then(|h| h.last_summary),
        ..fresh_health(job)
    };
    store.put_job_health(&health).await?;
    info!(job = %job, "Job health reset");
    Ok(())
}

/// Count one failed item in the summary according to its error class.
pub(crate) fn record_failure(summary: &mut RunSummary, item: &str, err: &PulseError) {
    match err.class() {
        ErrorClass::Transient => {
            summary.deferred += 1;
            warn!(item, error = %err, "Deferred to next run");
        }
        ErrorClass::DataQuality => {
            summary.skipped += 1;
            warn!(item, error = %err, "Skipped record");
        }
        ErrorClass::Logic | ErrorClass::RunControl => {
            summary.errored += 1;
            error!(item, error = %err, "Record failed");
        }
    }
    summary.note(format!("{item}: {err}"));
}

/// Stop the batch if the budget is spent. Returns true when the caller should break.
pub(crate) fn budget_spent(summary: &mut RunSummary, deadline: &Deadline, remaining: usize) -> bool {
    if !deadline.expired() {
        return false;
    }
    summary.truncated = true;
    summary.note(format!("time budget reached with {remaining} items left"));
    warn!(job = %summary.job, remaining, "Time budget reached, stopping batch");
    true
}

use std::sync::Arc;

use chrono::Utc;
use tracing::warn;

use pulse_common::{JobType, Result, RunSummary};
use pulse_store::Store;

use crate::anomaly::detect_anomalies;
use crate::attribution::run_attribution;
use crate::matcher::match_watchlists;
use crate::run::{reset_job_health, run_job};
use crate::settings::EngineSettings;
use crate::trends::aggregate_trends;

/// Entry point for the scheduler: each method is one complete, leased run.
///
/// Nothing is cached between runs. Every run reads what it needs from the
/// store, so the same `Engine` can be reused or rebuilt freely.
pub struct Engine<S: ?Sized> {
    store: Arc<S>,
    settings: EngineSettings,
}

impl<S: Store + ?Sized> Engine<S> {
    pub fn new(store: Arc<S>, settings: EngineSettings) -> Self {
        Self { store, settings }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub async fn run_trends(&self) -> Result<RunSummary> {
        let store = self.store.as_ref();
        run_job(store, &self.settings, JobType::TrendAggregation, |deadline| {
            aggregate_trends(store, &self.settings, Utc::now(), deadline)
        })
        .await
    }

    pub async fn run_anomalies(&self) -> Result<RunSummary> {
        let store = self.store.as_ref();
        run_job(store, &self.settings, JobType::AnomalyDetection, |deadline| {
            detect_anomalies(store, &self.settings, Utc::now(), deadline)
        })
        .await
    }

    pub async fn run_matcher(&self) -> Result<RunSummary> {
        let store = self.store.as_ref();
        run_job(store, &self.settings, JobType::WatchlistMatching, |deadline| {
            match_watchlists(store, &self.settings, Utc::now(), deadline)
        })
        .await
    }

    /// Attribute pending donations; with `force`, recompute exactly those transactions.
    pub async fn run_attribution(&self, force: &[String]) -> Result<RunSummary> {
        let store = self.store.as_ref();
        run_job(store, &self.settings, JobType::Attribution, |deadline| {
            run_attribution(store, &self.settings, Utc::now(), deadline, force)
        })
        .await
    }

    pub async fn run(&self, job: JobType) -> Result<RunSummary> {
        match job {
            JobType::TrendAggregation => self.run_trends().await,
            JobType::AnomalyDetection => self.run_anomalies().await,
            JobType::WatchlistMatching => self.run_matcher().await,
            JobType::Attribution => self.run_attribution(&[]).await,
        }
    }

    /// Run every job type in pipeline order. One job failing does not stop the rest.
    pub async fn run_all(&self) -> Vec<(JobType, Result<RunSummary>)> {
        let mut results = Vec::with_capacity(JobType::ALL.len());
        for job in JobType::ALL {
            let outcome = self.run(job).await;
            if let Err(e) = &outcome {
                warn!(job = %job, error = %e, "Job did not complete, continuing with the next");
            }
            results.push((job, outcome));
        }
        results
    }

    pub async fn reset(&self, job: JobType) -> Result<()> {
        reset_job_health(self.store.as_ref(), job).await
    }
}

use thiserror::Error;

use crate::types::JobType;

pub type Result<T, E = PulseError> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum PulseError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    #[error("Donor identity not linked: {0}")]
    Unlinkable(String),

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Job lease conflict: another {0} run is in progress")]
    LeaseConflict(JobType),

    #[error("Job disabled after repeated failed runs: {0}")]
    JobDisabled(JobType),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

/// How a failure is handled by the batch jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Retried with backoff, then deferred to the next scheduled run.
    Transient,
    /// The single record is skipped and logged.
    DataQuality,
    /// Counted as an error for that record and reported in the run summary.
    Logic,
    /// The whole run did not start (lease held or job type disabled).
    RunControl,
}

impl PulseError {
    pub fn class(&self) -> ErrorClass {
        match self {
            PulseError::Unavailable(_) | PulseError::RateLimited(_) => ErrorClass::Transient,
            PulseError::InvalidRecord(_) | PulseError::Unlinkable(_) => ErrorClass::DataQuality,
            PulseError::LeaseConflict(_) | PulseError::JobDisabled(_) => ErrorClass::RunControl,
            PulseError::Constraint(_)
            | PulseError::Database(_)
            | PulseError::Config(_)
            | PulseError::Anyhow(_) => ErrorClass::Logic,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.class() == ErrorClass::Transient
    }
}

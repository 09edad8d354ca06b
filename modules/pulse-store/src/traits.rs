// Trait seams between the batch jobs and persistence.
//
// One trait per table or log. Reads the jobs need are batch-shaped (a slice of
// keys in, rows out) so each run does its fetches up front and only writes
// mid-batch.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use uuid::Uuid;

use pulse_common::{
    Alert, AlertStatus, AlertWrite, Anomaly, AttributionRecord, Donation, EntityActivity,
    EntityKey, EntityTrend, EntityType, IdentityLink, JobHealth, JobType, Mention,
    OrganizationProfile, ResponseCounts, Result, Severity, Touchpoint, WatchlistEntry,
};

// ---------------------------------------------------------------------------
// Mentions (append-only, deduplicated)
// ---------------------------------------------------------------------------

#[async_trait]
pub trait MentionStore: Send + Sync {
    /// Insert, or update in place on `(entity_name, source_id, source_type)`.
    /// Returns true when a new row was created.
    async fn upsert_mention(&self, mention: &Mention) -> Result<bool>;

    /// Entities with at least one mention at or after `since`, busiest first.
    async fn active_entities(&self, since: DateTime<Utc>, limit: usize)
        -> Result<Vec<EntityActivity>>;

    /// All mentions of the given entities at or after `since`.
    async fn mentions_since(
        &self,
        entities: &[EntityKey],
        since: DateTime<Utc>,
    ) -> Result<Vec<Mention>>;

    /// Most recent distinct source ids per entity, newest first.
    async fn recent_source_ids(
        &self,
        entities: &[EntityKey],
        since: DateTime<Utc>,
        per_entity: usize,
    ) -> Result<HashMap<EntityKey, Vec<String>>>;
}

// ---------------------------------------------------------------------------
// Trends
// ---------------------------------------------------------------------------

#[async_trait]
pub trait TrendStore: Send + Sync {
    async fn trends_for(&self, entities: &[EntityKey]) -> Result<Vec<EntityTrend>>;

    /// Upsert by `(entity_name, entity_type)`. Returns false (and writes nothing)
    /// when the stored row has a later `calculated_at`.
    async fn upsert_trend(&self, trend: &EntityTrend) -> Result<bool>;

    /// Rows ordered by momentum, then 24h volume. With `since`, rows last
    /// calculated before it are left out.
    async fn list_trends(
        &self,
        trending_only: bool,
        since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<EntityTrend>>;
}

// ---------------------------------------------------------------------------
// Anomalies
// ---------------------------------------------------------------------------

#[async_trait]
pub trait AnomalyStore: Send + Sync {
    /// Upsert by `(entity_name, entity_type, anomaly_type, day)`.
    async fn upsert_anomaly(&self, anomaly: &Anomaly) -> Result<()>;

    async fn anomalies_on(&self, day: NaiveDate, min_severity: Severity) -> Result<Vec<Anomaly>>;
}

// ---------------------------------------------------------------------------
// Watchlists
// ---------------------------------------------------------------------------

#[async_trait]
pub trait WatchlistStore: Send + Sync {
    async fn active_watchlist(&self) -> Result<Vec<WatchlistEntry>>;

    async fn upsert_watchlist_entry(&self, entry: &WatchlistEntry) -> Result<()>;

    /// Soft-deactivate. Returns false if the entry does not exist.
    async fn deactivate_watchlist_entry(&self, id: Uuid) -> Result<bool>;

    async fn organization_profiles(&self) -> Result<Vec<OrganizationProfile>>;

    async fn upsert_organization_profile(&self, profile: &OrganizationProfile) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Alerts
// ---------------------------------------------------------------------------

#[async_trait]
pub trait AlertStore: Send + Sync {
    async fn alerts_on(&self, day: NaiveDate) -> Result<Vec<Alert>>;

    /// Upsert by `(organization_id, entity_name, day)`. An existing row keeps its
    /// id, status and `created_at`; everything else is refreshed.
    async fn upsert_alert(&self, alert: &Alert) -> Result<AlertWrite>;

    async fn unread_alerts(&self, organization_id: Uuid) -> Result<Vec<Alert>>;

    /// Returns false if the alert does not exist.
    async fn set_alert_status(&self, id: Uuid, status: AlertStatus) -> Result<bool>;

    /// Historical alert outcomes per organization and entity type.
    async fn response_counts(
        &self,
        organization_ids: &[Uuid],
    ) -> Result<HashMap<(Uuid, EntityType), ResponseCounts>>;
}

// ---------------------------------------------------------------------------
// Touchpoints & identity links
// ---------------------------------------------------------------------------

#[async_trait]
pub trait TouchpointStore: Send + Sync {
    async fn append_touchpoint(&self, touchpoint: &Touchpoint) -> Result<()>;

    /// Touchpoints for the given donors strictly before `before`, oldest first.
    async fn touchpoints_for_donors(
        &self,
        donors: &[String],
        before: DateTime<Utc>,
    ) -> Result<Vec<Touchpoint>>;

    /// Record a resolution-key link. A probabilistic link never replaces a
    /// deterministic one; returns false when the write was refused.
    async fn link_identity(&self, link: &IdentityLink) -> Result<bool>;

    async fn resolve_identity(&self, resolution_key: &str) -> Result<Option<IdentityLink>>;
}

// ---------------------------------------------------------------------------
// Donations & attribution
// ---------------------------------------------------------------------------

#[async_trait]
pub trait DonationStore: Send + Sync {
    /// Upsert by `transaction_id`.
    async fn record_donation(&self, donation: &Donation) -> Result<()>;

    /// Donations without an attribution record, oldest first.
    async fn pending_donations(&self, limit: usize) -> Result<Vec<Donation>>;

    async fn donations_by_id(&self, transaction_ids: &[String]) -> Result<Vec<Donation>>;
}

#[async_trait]
pub trait AttributionStore: Send + Sync {
    /// Upsert by `transaction_id`.
    async fn upsert_attribution(&self, record: &AttributionRecord) -> Result<()>;

    async fn get_attribution(&self, transaction_id: &str) -> Result<Option<AttributionRecord>>;
}

// ---------------------------------------------------------------------------
// Job leases & health
// ---------------------------------------------------------------------------

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Take the lease for `job` if it is free, expired, or already ours.
    async fn try_acquire_lease(
        &self,
        job: JobType,
        holder: Uuid,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<bool>;

    /// Release the lease if `holder` still owns it.
    async fn release_lease(&self, job: JobType, holder: Uuid) -> Result<()>;

    async fn job_health(&self, job: JobType) -> Result<Option<JobHealth>>;

    async fn put_job_health(&self, health: &JobHealth) -> Result<()>;

    async fn all_job_health(&self) -> Result<Vec<JobHealth>>;
}

/// Everything the jobs and the API need.
pub trait Store:
    MentionStore
    + TrendStore
    + AnomalyStore
    + WatchlistStore
    + AlertStore
    + TouchpointStore
    + DonationStore
    + AttributionStore
    + JobStore
{
}

impl<T> Store for T where
    T: MentionStore
        + TrendStore
        + AnomalyStore
        + WatchlistStore
        + AlertStore
        + TouchpointStore
        + DonationStore
        + AttributionStore
        + JobStore
{
}

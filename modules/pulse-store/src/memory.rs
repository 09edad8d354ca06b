// In-memory store with the same upsert semantics as PgStore.
//
// Backs the engine and API tests: no database, no Docker. Failures can be
// injected per operation (and optionally per record key) to exercise the
// retry, skip and error paths of the batch jobs.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use uuid::Uuid;

use pulse_common::{
    Alert, AlertStatus, AlertWrite, Anomaly, AnomalyType, AttributionRecord, Donation,
    EntityActivity, EntityKey, EntityTrend, EntityType, IdentityLink, JobHealth, JobLease,
    JobType, Mention, OrganizationProfile, PulseError, ResponseCounts, Result, Severity,
    SourceType, Touchpoint, WatchlistEntry,
};

use crate::traits::{
    AlertStore, AnomalyStore, AttributionStore, DonationStore, JobStore, MentionStore,
    TouchpointStore, TrendStore, WatchlistStore,
};

/// Operations that accept injected failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOp {
    ActiveEntities,
    UpsertTrend,
    UpsertAnomaly,
    ActiveWatchlist,
    UpsertAlert,
    PendingDonations,
    UpsertAttribution,
    AcquireLease,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Surfaces as `PulseError::Unavailable`.
    Transient,
    /// Surfaces as `PulseError::Constraint`.
    Constraint,
}

struct InjectedFailure {
    op: StoreOp,
    key: Option<String>,
    remaining: u32,
    kind: FailureKind,
}

type MentionKey = (String, String, SourceType);
type AnomalyKey = (EntityKey, AnomalyType, NaiveDate);

#[derive(Default)]
struct Inner {
    mentions: HashMap<MentionKey, Mention>,
    trends: HashMap<EntityKey, EntityTrend>,
    anomalies: HashMap<AnomalyKey, Anomaly>,
    watchlist: HashMap<Uuid, WatchlistEntry>,
    profiles: HashMap<Uuid, OrganizationProfile>,
    alerts: HashMap<Uuid, Alert>,
    touchpoints: Vec<Touchpoint>,
    links: HashMap<String, IdentityLink>,
    donations: HashMap<String, Donation>,
    attributions: HashMap<String, AttributionRecord>,
    leases: HashMap<JobType, JobLease>,
    health: HashMap<JobType, JobHealth>,
    failures: Vec<InjectedFailure>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `times` calls of `op`. With `key`, only calls for that
    /// record (entity name, transaction id) fail.
    pub fn inject_failure(&self, op: StoreOp, key: Option<&str>, times: u32, kind: FailureKind) {
        self.lock().failures.push(InjectedFailure {
            op,
            key: key.map(str::to_string),
            remaining: times,
            kind,
        });
    }

    pub fn mention_count(&self) -> usize {
        self.lock().mentions.len()
    }

    pub fn alert_count(&self) -> usize {
        self.lock().alerts.len()
    }

    pub fn attribution_count(&self) -> usize {
        self.lock().attributions.len()
    }

    pub fn all_alerts(&self) -> Vec<Alert> {
        self.lock().alerts.values().cloned().collect()
    }

    pub fn all_anomalies(&self) -> Vec<Anomaly> {
        self.lock().anomalies.values().cloned().collect()
    }

    /// Overwrite a lease directly, e.g. to simulate a crashed holder.
    pub fn put_lease(&self, lease: JobLease) {
        self.lock().leases.insert(lease.job_type, lease);
    }

    pub fn lease(&self, job: JobType) -> Option<JobLease> {
        self.lock().leases.get(&job).cloned()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Inner {
    fn check_failure(&mut self, op: StoreOp, key: &str) -> Result<()> {
        let hit = self.failures.iter_mut().find(|f| {
            f.op == op && f.remaining > 0 && f.key.as_deref().map_or(true, |k| k == key)
        });
        let Some(failure) = hit else {
            return Ok(());
        };
        failure.remaining -= 1;
        let msg = format!("injected failure for {op:?} ({key})");
        match failure.kind {
            FailureKind::Transient => Err(PulseError::Unavailable(msg)),
            FailureKind::Constraint => Err(PulseError::Constraint(msg)),
        }
    }
}

fn key_set(entities: &[EntityKey]) -> HashSet<&EntityKey> {
    entities.iter().collect()
}

#[async_trait]
impl MentionStore for MemoryStore {
    async fn upsert_mention(&self, mention: &Mention) -> Result<bool> {
        mention.validate()?;
        let previous = self.lock().mentions.insert(mention.dedup_key(), mention.clone());
        Ok(previous.is_none())
    }

    async fn active_entities(
        &self,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<EntityActivity>> {
        let mut inner = self.lock();
        inner.check_failure(StoreOp::ActiveEntities, "")?;

        let mut counts: HashMap<EntityKey, u32> = HashMap::new();
        for m in inner.mentions.values().filter(|m| m.mentioned_at >= since) {
            *counts.entry(m.key()).or_default() += 1;
        }
        let mut active: Vec<EntityActivity> = counts
            .into_iter()
            .map(|(key, mentions)| EntityActivity { key, mentions })
            .collect();
        active.sort_by(|a, b| b.mentions.cmp(&a.mentions).then_with(|| a.key.cmp(&b.key)));
        active.truncate(limit);
        Ok(active)
    }

    async fn mentions_since(
        &self,
        entities: &[EntityKey],
        since: DateTime<Utc>,
    ) -> Result<Vec<Mention>> {
        let wanted = key_set(entities);
        let inner = self.lock();
        let mut out: Vec<Mention> = inner
            .mentions
            .values()
            .filter(|m| m.mentioned_at >= since && wanted.contains(&m.key()))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.mentioned_at.cmp(&b.mentioned_at));
        Ok(out)
    }

    async fn recent_source_ids(
        &self,
        entities: &[EntityKey],
        since: DateTime<Utc>,
        per_entity: usize,
    ) -> Result<HashMap<EntityKey, Vec<String>>> {
        let wanted = key_set(entities);
        let inner = self.lock();
        let mut recent: Vec<&Mention> = inner
            .mentions
            .values()
            .filter(|m| m.mentioned_at >= since && wanted.contains(&m.key()))
            .collect();
        recent.sort_by(|a, b| {
            b.mentioned_at
                .cmp(&a.mentioned_at)
                .then_with(|| a.source_id.cmp(&b.source_id))
        });

        let mut out: HashMap<EntityKey, Vec<String>> = HashMap::new();
        for m in recent {
            let ids = out.entry(m.key()).or_default();
            if ids.len() < per_entity && !ids.contains(&m.source_id) {
                ids.push(m.source_id.clone());
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl TrendStore for MemoryStore {
    async fn trends_for(&self, entities: &[EntityKey]) -> Result<Vec<EntityTrend>> {
        let inner = self.lock();
        Ok(entities
            .iter()
            .filter_map(|k| inner.trends.get(k).cloned())
            .collect())
    }

    async fn upsert_trend(&self, trend: &EntityTrend) -> Result<bool> {
        let mut inner = self.lock();
        inner.check_failure(StoreOp::UpsertTrend, &trend.entity_name)?;
        let key = trend.key();
        if let Some(existing) = inner.trends.get(&key) {
            if existing.calculated_at > trend.calculated_at {
                return Ok(false);
            }
        }
        inner.trends.insert(key, trend.clone());
        Ok(true)
    }

    async fn list_trends(
        &self,
        trending_only: bool,
        since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<EntityTrend>> {
        let inner = self.lock();
        let mut rows: Vec<EntityTrend> = inner
            .trends
            .values()
            .filter(|t| !trending_only || t.is_trending)
            .filter(|t| since.map_or(true, |s| t.calculated_at >= s))
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            b.momentum
                .total_cmp(&a.momentum)
                .then_with(|| b.mentions_24h.cmp(&a.mentions_24h))
                .then_with(|| a.entity_name.cmp(&b.entity_name))
        });
        rows.truncate(limit);
        Ok(rows)
    }
}

#[async_trait]
impl AnomalyStore for MemoryStore {
    async fn upsert_anomaly(&self, anomaly: &Anomaly) -> Result<()> {
        let mut inner = self.lock();
        inner.check_failure(StoreOp::UpsertAnomaly, &anomaly.entity_name)?;
        inner.anomalies.insert(
            (anomaly.key(), anomaly.anomaly_type, anomaly.day),
            anomaly.clone(),
        );
        Ok(())
    }

    async fn anomalies_on(&self, day: NaiveDate, min_severity: Severity) -> Result<Vec<Anomaly>> {
        let inner = self.lock();
        let mut out: Vec<Anomaly> = inner
            .anomalies
            .values()
            .filter(|a| a.day == day && a.severity >= min_severity)
            .cloned()
            .collect();
        out.sort_by(|a, b| {
            b.severity
                .cmp(&a.severity)
                .then_with(|| a.entity_name.cmp(&b.entity_name))
        });
        Ok(out)
    }
}

#[async_trait]
impl WatchlistStore for MemoryStore {
    async fn active_watchlist(&self) -> Result<Vec<WatchlistEntry>> {
        let mut inner = self.lock();
        inner.check_failure(StoreOp::ActiveWatchlist, "")?;
        let mut out: Vec<WatchlistEntry> = inner
            .watchlist
            .values()
            .filter(|e| e.is_active)
            .cloned()
            .collect();
        out.sort_by(|a, b| {
            a.organization_id
                .cmp(&b.organization_id)
                .then_with(|| a.entity_name.cmp(&b.entity_name))
        });
        Ok(out)
    }

    async fn upsert_watchlist_entry(&self, entry: &WatchlistEntry) -> Result<()> {
        self.lock().watchlist.insert(entry.id, entry.clone());
        Ok(())
    }

    async fn deactivate_watchlist_entry(&self, id: Uuid) -> Result<bool> {
        let mut inner = self.lock();
        match inner.watchlist.get_mut(&id) {
            Some(entry) => {
                entry.is_active = false;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn organization_profiles(&self) -> Result<Vec<OrganizationProfile>> {
        Ok(self.lock().profiles.values().cloned().collect())
    }

    async fn upsert_organization_profile(&self, profile: &OrganizationProfile) -> Result<()> {
        self.lock()
            .profiles
            .insert(profile.organization_id, profile.clone());
        Ok(())
    }
}

#[async_trait]
impl AlertStore for MemoryStore {
    async fn alerts_on(&self, day: NaiveDate) -> Result<Vec<Alert>> {
        Ok(self
            .lock()
            .alerts
            .values()
            .filter(|a| a.day == day)
            .cloned()
            .collect())
    }

    async fn upsert_alert(&self, alert: &Alert) -> Result<AlertWrite> {
        let mut inner = self.lock();
        inner.check_failure(StoreOp::UpsertAlert, &alert.entity_name)?;
        let bucket = alert.bucket();
        let existing = inner.alerts.values_mut().find(|a| a.bucket() == bucket);
        match existing {
            Some(row) => {
                row.watchlist_entry_id = alert.watchlist_entry_id;
                row.entity_type = alert.entity_type;
                row.alert_type = alert.alert_type;
                row.actionable_score = alert.actionable_score;
                row.velocity = alert.velocity;
                row.current_mentions = alert.current_mentions;
                row.sample_sources = alert.sample_sources.clone();
                row.updated_at = alert.updated_at;
                Ok(AlertWrite::Updated)
            }
            None => {
                inner.alerts.insert(alert.id, alert.clone());
                Ok(AlertWrite::Created)
            }
        }
    }

    async fn unread_alerts(&self, organization_id: Uuid) -> Result<Vec<Alert>> {
        let inner = self.lock();
        let mut out: Vec<Alert> = inner
            .alerts
            .values()
            .filter(|a| a.organization_id == organization_id && a.status == AlertStatus::Unread)
            .cloned()
            .collect();
        out.sort_by(|a, b| {
            b.actionable_score
                .total_cmp(&a.actionable_score)
                .then_with(|| b.created_at.cmp(&a.created_at))
        });
        Ok(out)
    }

    async fn set_alert_status(&self, id: Uuid, status: AlertStatus) -> Result<bool> {
        let mut inner = self.lock();
        match inner.alerts.get_mut(&id) {
            Some(alert) => {
                alert.status = status;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn response_counts(
        &self,
        organization_ids: &[Uuid],
    ) -> Result<HashMap<(Uuid, EntityType), ResponseCounts>> {
        let inner = self.lock();
        let mut out: HashMap<(Uuid, EntityType), ResponseCounts> = HashMap::new();
        for alert in inner
            .alerts
            .values()
            .filter(|a| organization_ids.contains(&a.organization_id))
        {
            let counts = out
                .entry((alert.organization_id, alert.entity_type))
                .or_default();
            match alert.status {
                AlertStatus::Read => counts.read += 1,
                AlertStatus::Dismissed => counts.dismissed += 1,
                AlertStatus::Unread => counts.unread += 1,
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl TouchpointStore for MemoryStore {
    async fn append_touchpoint(&self, touchpoint: &Touchpoint) -> Result<()> {
        self.lock().touchpoints.push(touchpoint.clone());
        Ok(())
    }

    async fn touchpoints_for_donors(
        &self,
        donors: &[String],
        before: DateTime<Utc>,
    ) -> Result<Vec<Touchpoint>> {
        let inner = self.lock();
        let mut out: Vec<Touchpoint> = inner
            .touchpoints
            .iter()
            .filter(|t| t.occurred_at < before && donors.contains(&t.donor_identity))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.occurred_at.cmp(&b.occurred_at).then_with(|| a.id.cmp(&b.id)));
        Ok(out)
    }

    async fn link_identity(&self, link: &IdentityLink) -> Result<bool> {
        let mut inner = self.lock();
        if let Some(existing) = inner.links.get(&link.resolution_key) {
            if existing.method.is_deterministic() && !link.method.is_deterministic() {
                return Ok(false);
            }
        }
        inner.links.insert(link.resolution_key.clone(), link.clone());
        Ok(true)
    }

    async fn resolve_identity(&self, resolution_key: &str) -> Result<Option<IdentityLink>> {
        Ok(self.lock().links.get(resolution_key).cloned())
    }
}

#[async_trait]
impl DonationStore for MemoryStore {
    async fn record_donation(&self, donation: &Donation) -> Result<()> {
        self.lock()
            .donations
            .insert(donation.transaction_id.clone(), donation.clone());
        Ok(())
    }

    async fn pending_donations(&self, limit: usize) -> Result<Vec<Donation>> {
        let mut inner = self.lock();
        inner.check_failure(StoreOp::PendingDonations, "")?;
        let mut out: Vec<Donation> = inner
            .donations
            .values()
            .filter(|d| !inner.attributions.contains_key(&d.transaction_id))
            .cloned()
            .collect();
        out.sort_by(|a, b| {
            a.donated_at
                .cmp(&b.donated_at)
                .then_with(|| a.transaction_id.cmp(&b.transaction_id))
        });
        out.truncate(limit);
        Ok(out)
    }

    async fn donations_by_id(&self, transaction_ids: &[String]) -> Result<Vec<Donation>> {
        let inner = self.lock();
        Ok(transaction_ids
            .iter()
            .filter_map(|id| inner.donations.get(id).cloned())
            .collect())
    }
}

#[async_trait]
impl AttributionStore for MemoryStore {
    async fn upsert_attribution(&self, record: &AttributionRecord) -> Result<()> {
        let mut inner = self.lock();
        inner.check_failure(StoreOp::UpsertAttribution, &record.transaction_id)?;
        inner
            .attributions
            .insert(record.transaction_id.clone(), record.clone());
        Ok(())
    }

    async fn get_attribution(&self, transaction_id: &str) -> Result<Option<AttributionRecord>> {
        Ok(self.lock().attributions.get(transaction_id).cloned())
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn try_acquire_lease(
        &self,
        job: JobType,
        holder: Uuid,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<bool> {
        let mut inner = self.lock();
        inner.check_failure(StoreOp::AcquireLease, "")?;
        if let Some(existing) = inner.leases.get(&job) {
            if existing.holder != holder && existing.expires_at > now {
                return Ok(false);
            }
        }
        inner.leases.insert(
            job,
            JobLease {
                job_type: job,
                holder,
                acquired_at: now,
                expires_at: now + ttl,
            },
        );
        Ok(true)
    }

    async fn release_lease(&self, job: JobType, holder: Uuid) -> Result<()> {
        let mut inner = self.lock();
        if inner.leases.get(&job).is_some_and(|l| l.holder == holder) {
            inner.leases.remove(&job);
        }
        Ok(())
    }

    async fn job_health(&self, job: JobType) -> Result<Option<JobHealth>> {
        Ok(self.lock().health.get(&job).cloned())
    }

    async fn put_job_health(&self, health: &JobHealth) -> Result<()> {
        self.lock().health.insert(health.job_type, health.clone());
        Ok(())
    }

    async fn all_job_health(&self) -> Result<Vec<JobHealth>> {
        let mut out: Vec<JobHealth> = self.lock().health.values().cloned().collect();
        out.sort_by_key(|h| h.job_type);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pulse_common::{LinkMethod, SourceType};

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, hour, 0, 0).unwrap()
    }

    fn mention(name: &str, source_id: &str, hour: u32, sentiment: f64) -> Mention {
        Mention {
            entity_name: name.into(),
            entity_type: EntityType::Topic,
            source_type: SourceType::News,
            source_id: source_id.into(),
            mentioned_at: at(hour),
            sentiment,
        }
    }

    #[tokio::test]
    async fn reingested_mention_updates_in_place() {
        let store = MemoryStore::new();
        assert!(store.upsert_mention(&mention("Gaza", "a1", 1, 0.1)).await.unwrap());
        assert!(!store.upsert_mention(&mention("Gaza", "a1", 1, -0.4)).await.unwrap());
        assert_eq!(store.mention_count(), 1);

        let stored = store
            .mentions_since(&[EntityKey::new("Gaza", EntityType::Topic)], at(0))
            .await
            .unwrap();
        assert_eq!(stored[0].sentiment, -0.4);
    }

    #[tokio::test]
    async fn same_source_id_from_other_source_type_is_distinct() {
        let store = MemoryStore::new();
        store.upsert_mention(&mention("Gaza", "a1", 1, 0.0)).await.unwrap();
        let mut social = mention("Gaza", "a1", 1, 0.0);
        social.source_type = SourceType::Social;
        store.upsert_mention(&social).await.unwrap();
        assert_eq!(store.mention_count(), 2);
    }

    #[tokio::test]
    async fn malformed_mention_is_rejected() {
        let store = MemoryStore::new();
        let err = store
            .upsert_mention(&mention("Gaza", "a1", 1, 3.0))
            .await
            .unwrap_err();
        assert!(matches!(err, PulseError::InvalidRecord(_)));
        assert_eq!(store.mention_count(), 0);
    }

    #[tokio::test]
    async fn active_entities_busiest_first() {
        let store = MemoryStore::new();
        store.upsert_mention(&mention("A", "1", 5, 0.0)).await.unwrap();
        store.upsert_mention(&mention("B", "2", 5, 0.0)).await.unwrap();
        store.upsert_mention(&mention("B", "3", 6, 0.0)).await.unwrap();
        store.upsert_mention(&mention("C", "4", 1, 0.0)).await.unwrap();

        let active = store.active_entities(at(4), 10).await.unwrap();
        let names: Vec<_> = active.iter().map(|a| a.key.entity_name.as_str()).collect();
        assert_eq!(names, vec!["B", "A"]);
        assert_eq!(store.active_entities(at(4), 1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn stale_trend_write_is_ignored() {
        let store = MemoryStore::new();
        let fresh = EntityTrend {
            entity_name: "Gaza".into(),
            entity_type: EntityType::Topic,
            mentions_1h: 0,
            mentions_6h: 20,
            mentions_24h: 59,
            mentions_7d: 59,
            velocity: 35.6,
            momentum: 0.0,
            previous_velocity: 0.0,
            is_trending: true,
            sentiment_avg: 0.0,
            sentiment_change: 0.0,
            calculated_at: at(12),
        };
        let mut stale = fresh.clone();
        stale.velocity = 1.0;
        stale.calculated_at = at(11);

        assert!(store.upsert_trend(&fresh).await.unwrap());
        assert!(!store.upsert_trend(&stale).await.unwrap());
        let rows = store.trends_for(&[fresh.key()]).await.unwrap();
        assert_eq!(rows[0].velocity, 35.6);
    }

    #[tokio::test]
    async fn probabilistic_link_never_replaces_deterministic() {
        let store = MemoryStore::new();
        let det = IdentityLink {
            resolution_key: "refcode:abc".into(),
            donor_identity: "donor-1".into(),
            method: LinkMethod::Refcode,
            linked_at: at(1),
        };
        let prob = IdentityLink {
            donor_identity: "donor-2".into(),
            method: LinkMethod::Probabilistic,
            linked_at: at(2),
            ..det.clone()
        };
        assert!(store.link_identity(&det).await.unwrap());
        assert!(!store.link_identity(&prob).await.unwrap());
        let resolved = store.resolve_identity("refcode:abc").await.unwrap().unwrap();
        assert_eq!(resolved.donor_identity, "donor-1");
    }

    #[tokio::test]
    async fn expired_lease_can_be_taken_over() {
        let store = MemoryStore::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let ttl = Duration::minutes(15);
        let job = JobType::TrendAggregation;

        assert!(store.try_acquire_lease(job, a, at(1), ttl).await.unwrap());
        assert!(!store.try_acquire_lease(job, b, at(1), ttl).await.unwrap());
        assert!(store.try_acquire_lease(job, b, at(2), ttl).await.unwrap());

        // A late release from the crashed holder must not drop the new lease.
        store.release_lease(job, a).await.unwrap();
        assert_eq!(store.lease(job).unwrap().holder, b);
    }
}

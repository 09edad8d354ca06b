//! PgStore: every store trait backed by Postgres.
//!
//! Upserts are keyed on natural identity so overlapping or retried runs are
//! safe without row locks. Queries are runtime-checked; no database is needed
//! to build.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::warn;
use uuid::Uuid;

use pulse_common::{
    Alert, AlertStatus, AlertType, AlertWrite, Anomaly, AnomalyType, AttributionRecord, Donation,
    EntityActivity, EntityKey, EntityTrend, EntityType, IdentityLink, JobHealth, JobType,
    LinkMethod, Mention, OrganizationProfile, PulseError, ResponseCounts, Result, RunSummary,
    Severity, SourceType, TouchCredit, Touchpoint, TouchpointType, WatchlistEntry,
};

use crate::traits::{
    AlertStore, AnomalyStore, AttributionStore, DonationStore, JobStore, MentionStore,
    TouchpointStore, TrendStore, WatchlistStore,
};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPool::connect(database_url).await.map_err(db_err)?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Map driver errors onto the transient / constraint / logic taxonomy.
pub(crate) fn db_err(e: sqlx::Error) -> PulseError {
    match &e {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            PulseError::Unavailable(e.to_string())
        }
        sqlx::Error::Database(db)
            if db.is_unique_violation()
                || db.is_foreign_key_violation()
                || db.is_check_violation() =>
        {
            PulseError::Constraint(e.to_string())
        }
        _ => PulseError::Database(e.to_string()),
    }
}

// --- Row helpers ---

fn count(v: u32) -> i64 {
    i64::from(v)
}

fn to_u32(v: i64) -> u32 {
    u32::try_from(v.max(0)).unwrap_or(u32::MAX)
}

fn get<'r, T>(row: &'r PgRow, col: &str) -> Result<T>
where
    T: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
{
    row.try_get(col).map_err(db_err)
}

fn unknown(column: &str, value: &str) -> PulseError {
    PulseError::Database(format!("unknown {column} '{value}' in stored row"))
}

fn entity_type_col(row: &PgRow, col: &str) -> Result<EntityType> {
    let raw: String = get(row, col)?;
    EntityType::parse(&raw).ok_or_else(|| unknown(col, &raw))
}

fn key_arrays(entities: &[EntityKey]) -> (Vec<String>, Vec<String>) {
    entities
        .iter()
        .map(|k| (k.entity_name.clone(), k.entity_type.to_string()))
        .unzip()
}

fn mention_from_row(row: &PgRow) -> Result<Mention> {
    let source_type: String = get(row, "source_type")?;
    Ok(Mention {
        entity_name: get(row, "entity_name")?,
        entity_type: entity_type_col(row, "entity_type")?,
        source_type: SourceType::from_str_loose(&source_type),
        source_id: get(row, "source_id")?,
        mentioned_at: get(row, "mentioned_at")?,
        sentiment: get(row, "sentiment")?,
    })
}

fn trend_from_row(row: &PgRow) -> Result<EntityTrend> {
    Ok(EntityTrend {
        entity_name: get(row, "entity_name")?,
        entity_type: entity_type_col(row, "entity_type")?,
        mentions_1h: to_u32(get(row, "mentions_1h")?),
        mentions_6h: to_u32(get(row, "mentions_6h")?),
        mentions_24h: to_u32(get(row, "mentions_24h")?),
        mentions_7d: to_u32(get(row, "mentions_7d")?),
        velocity: get(row, "velocity")?,
        momentum: get(row, "momentum")?,
        previous_velocity: get(row, "previous_velocity")?,
        is_trending: get(row, "is_trending")?,
        sentiment_avg: get(row, "sentiment_avg")?,
        sentiment_change: get(row, "sentiment_change")?,
        calculated_at: get(row, "calculated_at")?,
    })
}

fn anomaly_from_row(row: &PgRow) -> Result<Anomaly> {
    let anomaly_type: String = get(row, "anomaly_type")?;
    let severity: String = get(row, "severity")?;
    Ok(Anomaly {
        entity_name: get(row, "entity_name")?,
        entity_type: entity_type_col(row, "entity_type")?,
        anomaly_type: AnomalyType::parse(&anomaly_type)
            .ok_or_else(|| unknown("anomaly_type", &anomaly_type))?,
        z_score: get(row, "z_score")?,
        current_value: get(row, "current_value")?,
        baseline_value: get(row, "baseline_value")?,
        severity: Severity::parse(&severity).ok_or_else(|| unknown("severity", &severity))?,
        day: get(row, "day")?,
        detected_at: get(row, "detected_at")?,
    })
}

fn watchlist_from_row(row: &PgRow) -> Result<WatchlistEntry> {
    let entity_type: Option<String> = get(row, "entity_type")?;
    let entity_type = match entity_type.as_deref() {
        None | Some("") => None,
        Some(raw) => Some(EntityType::parse(raw).ok_or_else(|| unknown("entity_type", raw))?),
    };
    Ok(WatchlistEntry {
        id: get(row, "id")?,
        organization_id: get(row, "organization_id")?,
        entity_name: get(row, "entity_name")?,
        entity_type,
        aliases: get(row, "aliases")?,
        alert_threshold: get(row, "alert_threshold")?,
        sentiment_alert: get(row, "sentiment_alert")?,
        is_active: get(row, "is_active")?,
    })
}

fn alert_from_row(row: &PgRow) -> Result<Alert> {
    let alert_type: String = get(row, "alert_type")?;
    let status: String = get(row, "status")?;
    Ok(Alert {
        id: get(row, "id")?,
        organization_id: get(row, "organization_id")?,
        watchlist_entry_id: get(row, "watchlist_entry_id")?,
        entity_name: get(row, "entity_name")?,
        entity_type: entity_type_col(row, "entity_type")?,
        alert_type: AlertType::parse(&alert_type).ok_or_else(|| unknown("alert_type", &alert_type))?,
        actionable_score: get(row, "actionable_score")?,
        velocity: get(row, "velocity")?,
        current_mentions: to_u32(get(row, "current_mentions")?),
        sample_sources: get(row, "sample_sources")?,
        day: get(row, "day")?,
        created_at: get(row, "created_at")?,
        updated_at: get(row, "updated_at")?,
        status: AlertStatus::parse(&status).ok_or_else(|| unknown("status", &status))?,
    })
}

fn touchpoint_from_row(row: &PgRow) -> Result<Touchpoint> {
    let touchpoint_type: String = get(row, "touchpoint_type")?;
    let link_method: String = get(row, "link_method")?;
    Ok(Touchpoint {
        id: get(row, "id")?,
        donor_identity: get(row, "donor_identity")?,
        touchpoint_type: TouchpointType::parse(&touchpoint_type)
            .ok_or_else(|| unknown("touchpoint_type", &touchpoint_type))?,
        campaign_id: get(row, "campaign_id")?,
        link_method: LinkMethod::parse(&link_method)
            .ok_or_else(|| unknown("link_method", &link_method))?,
        occurred_at: get(row, "occurred_at")?,
    })
}

fn donation_from_row(row: &PgRow) -> Result<Donation> {
    Ok(Donation {
        transaction_id: get(row, "transaction_id")?,
        donor_identity: get(row, "donor_identity")?,
        amount_cents: get(row, "amount_cents")?,
        donated_at: get(row, "donated_at")?,
    })
}

fn attribution_from_row(row: &PgRow) -> Result<AttributionRecord> {
    let middle: serde_json::Value = get(row, "middle_touches")?;
    let middle_touches: Vec<TouchCredit> = serde_json::from_value(middle)
        .map_err(|e| PulseError::Database(format!("middle_touches: {e}")))?;
    Ok(AttributionRecord {
        transaction_id: get(row, "transaction_id")?,
        is_organic: get(row, "is_organic")?,
        touch_count: to_u32(get(row, "touch_count")?),
        first_touch_channel: get(row, "first_touch_channel")?,
        first_touch_campaign: get(row, "first_touch_campaign")?,
        first_touch_weight: get(row, "first_touch_weight")?,
        middle_touches,
        middle_touches_weight: get(row, "middle_touches_weight")?,
        last_touch_channel: get(row, "last_touch_channel")?,
        last_touch_campaign: get(row, "last_touch_campaign")?,
        last_touch_weight: get(row, "last_touch_weight")?,
        attributed_at: get(row, "attributed_at")?,
    })
}

fn health_from_row(row: &PgRow) -> Result<JobHealth> {
    let job_type: String = get(row, "job_type")?;
    let summary: Option<serde_json::Value> = get(row, "last_summary")?;
    let last_summary = match summary {
        Some(v) => Some(
            serde_json::from_value::<RunSummary>(v)
                .map_err(|e| PulseError::Database(format!("last_summary: {e}")))?,
        ),
        None => None,
    };
    Ok(JobHealth {
        job_type: JobType::parse(&job_type).ok_or_else(|| unknown("job_type", &job_type))?,
        consecutive_failures: to_u32(get(row, "consecutive_failures")?),
        disabled: get(row, "disabled")?,
        last_run_at: get(row, "last_run_at")?,
        last_summary,
    })
}

// --- Mentions ---

#[async_trait]
impl MentionStore for PgStore {
    async fn upsert_mention(&self, mention: &Mention) -> Result<bool> {
        mention.validate()?;
        let row = sqlx::query(
            r#"
            INSERT INTO mentions (entity_name, entity_type, source_type, source_id, mentioned_at, sentiment)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (entity_name, source_id, source_type) DO UPDATE
               SET entity_type  = EXCLUDED.entity_type,
                   mentioned_at = EXCLUDED.mentioned_at,
                   sentiment    = EXCLUDED.sentiment
            RETURNING (xmax = 0) AS inserted
            "#,
        )
        .bind(&mention.entity_name)
        .bind(mention.entity_type.to_string())
        .bind(mention.source_type.to_string())
        .bind(&mention.source_id)
        .bind(mention.mentioned_at)
        .bind(mention.sentiment)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        get(&row, "inserted")
    }

    async fn active_entities(
        &self,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<EntityActivity>> {
        let rows = sqlx::query(
            r#"
            SELECT entity_name, entity_type, COUNT(*) AS mentions
            FROM mentions
            WHERE mentioned_at >= $1
            GROUP BY entity_name, entity_type
            ORDER BY mentions DESC, entity_name ASC, entity_type ASC
            LIMIT $2
            "#,
        )
        .bind(since)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            let raw_type: String = get(row, "entity_type")?;
            let Some(entity_type) = EntityType::parse(&raw_type) else {
                warn!(entity_type = raw_type.as_str(), "Skipping mentions with unknown entity type");
                continue;
            };
            let name: String = get(row, "entity_name")?;
            out.push(EntityActivity {
                key: EntityKey::new(&name, entity_type),
                mentions: to_u32(get(row, "mentions")?),
            });
        }
        Ok(out)
    }

    async fn mentions_since(
        &self,
        entities: &[EntityKey],
        since: DateTime<Utc>,
    ) -> Result<Vec<Mention>> {
        let (names, types) = key_arrays(entities);
        let rows = sqlx::query(
            r#"
            SELECT m.entity_name, m.entity_type, m.source_type, m.source_id, m.mentioned_at, m.sentiment
            FROM mentions m
            JOIN UNNEST($1::text[], $2::text[]) AS k(entity_name, entity_type)
              ON m.entity_name = k.entity_name AND m.entity_type = k.entity_type
            WHERE m.mentioned_at >= $3
            ORDER BY m.mentioned_at ASC
            "#,
        )
        .bind(names)
        .bind(types)
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter().map(mention_from_row).collect()
    }

    async fn recent_source_ids(
        &self,
        entities: &[EntityKey],
        since: DateTime<Utc>,
        per_entity: usize,
    ) -> Result<HashMap<EntityKey, Vec<String>>> {
        let (names, types) = key_arrays(entities);
        let rows = sqlx::query(
            r#"
            SELECT entity_name, entity_type, source_id
            FROM (
                SELECT entity_name, entity_type, source_id,
                       ROW_NUMBER() OVER (
                           PARTITION BY entity_name, entity_type
                           ORDER BY last_seen DESC, source_id ASC
                       ) AS rn
                FROM (
                    SELECT m.entity_name, m.entity_type, m.source_id, MAX(m.mentioned_at) AS last_seen
                    FROM mentions m
                    JOIN UNNEST($1::text[], $2::text[]) AS k(entity_name, entity_type)
                      ON m.entity_name = k.entity_name AND m.entity_type = k.entity_type
                    WHERE m.mentioned_at >= $3
                    GROUP BY m.entity_name, m.entity_type, m.source_id
                ) grouped
            ) ranked
            WHERE rn <= $4
            ORDER BY entity_name, entity_type, rn
            "#,
        )
        .bind(names)
        .bind(types)
        .bind(since)
        .bind(per_entity as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let mut out: HashMap<EntityKey, Vec<String>> = HashMap::new();
        for row in &rows {
            let name: String = get(row, "entity_name")?;
            let key = EntityKey::new(&name, entity_type_col(row, "entity_type")?);
            out.entry(key).or_default().push(get(row, "source_id")?);
        }
        Ok(out)
    }
}

// --- Trends ---

#[async_trait]
impl TrendStore for PgStore {
    async fn trends_for(&self, entities: &[EntityKey]) -> Result<Vec<EntityTrend>> {
        let (names, types) = key_arrays(entities);
        let rows = sqlx::query(
            r#"
            SELECT t.*
            FROM entity_trends t
            JOIN UNNEST($1::text[], $2::text[]) AS k(entity_name, entity_type)
              ON t.entity_name = k.entity_name AND t.entity_type = k.entity_type
            "#,
        )
        .bind(names)
        .bind(types)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter().map(trend_from_row).collect()
    }

    async fn upsert_trend(&self, trend: &EntityTrend) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO entity_trends (
                entity_name, entity_type, mentions_1h, mentions_6h, mentions_24h, mentions_7d,
                velocity, momentum, previous_velocity, is_trending,
                sentiment_avg, sentiment_change, calculated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (entity_name, entity_type) DO UPDATE
               SET mentions_1h       = EXCLUDED.mentions_1h,
                   mentions_6h       = EXCLUDED.mentions_6h,
                   mentions_24h      = EXCLUDED.mentions_24h,
                   mentions_7d       = EXCLUDED.mentions_7d,
                   velocity          = EXCLUDED.velocity,
                   momentum          = EXCLUDED.momentum,
                   previous_velocity = EXCLUDED.previous_velocity,
                   is_trending       = EXCLUDED.is_trending,
                   sentiment_avg     = EXCLUDED.sentiment_avg,
                   sentiment_change  = EXCLUDED.sentiment_change,
                   calculated_at     = EXCLUDED.calculated_at
             WHERE entity_trends.calculated_at <= EXCLUDED.calculated_at
            "#,
        )
        .bind(&trend.entity_name)
        .bind(trend.entity_type.to_string())
        .bind(count(trend.mentions_1h))
        .bind(count(trend.mentions_6h))
        .bind(count(trend.mentions_24h))
        .bind(count(trend.mentions_7d))
        .bind(trend.velocity)
        .bind(trend.momentum)
        .bind(trend.previous_velocity)
        .bind(trend.is_trending)
        .bind(trend.sentiment_avg)
        .bind(trend.sentiment_change)
        .bind(trend.calculated_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_trends(
        &self,
        trending_only: bool,
        since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<EntityTrend>> {
        let rows = sqlx::query(
            r#"
            SELECT *
            FROM entity_trends
            WHERE ($1 = false OR is_trending)
              AND ($2::timestamptz IS NULL OR calculated_at >= $2)
            ORDER BY momentum DESC, mentions_24h DESC, entity_name ASC
            LIMIT $3
            "#,
        )
        .bind(trending_only)
        .bind(since)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter().map(trend_from_row).collect()
    }
}

// --- Anomalies ---

#[async_trait]
impl AnomalyStore for PgStore {
    async fn upsert_anomaly(&self, anomaly: &Anomaly) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO anomalies (
                entity_name, entity_type, anomaly_type, day,
                z_score, current_value, baseline_value, severity, detected_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (entity_name, entity_type, anomaly_type, day) DO UPDATE
               SET z_score        = EXCLUDED.z_score,
                   current_value  = EXCLUDED.current_value,
                   baseline_value = EXCLUDED.baseline_value,
                   severity       = EXCLUDED.severity,
                   detected_at    = EXCLUDED.detected_at
            "#,
        )
        .bind(&anomaly.entity_name)
        .bind(anomaly.entity_type.to_string())
        .bind(anomaly.anomaly_type.to_string())
        .bind(anomaly.day)
        .bind(anomaly.z_score)
        .bind(anomaly.current_value)
        .bind(anomaly.baseline_value)
        .bind(anomaly.severity.to_string())
        .bind(anomaly.detected_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn anomalies_on(&self, day: NaiveDate, min_severity: Severity) -> Result<Vec<Anomaly>> {
        let rows = sqlx::query("SELECT * FROM anomalies WHERE day = $1 ORDER BY entity_name")
            .bind(day)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            let anomaly = anomaly_from_row(row)?;
            if anomaly.severity >= min_severity {
                out.push(anomaly);
            }
        }
        out.sort_by(|a, b| b.severity.cmp(&a.severity));
        Ok(out)
    }
}

// --- Watchlists ---

#[async_trait]
impl WatchlistStore for PgStore {
    async fn active_watchlist(&self) -> Result<Vec<WatchlistEntry>> {
        let rows = sqlx::query(
            "SELECT * FROM watchlist_entries WHERE is_active ORDER BY organization_id, entity_name",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        // A row this build cannot read is one organization's bad data, not a reason to stop.
        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            match watchlist_from_row(row) {
                Ok(entry) => out.push(entry),
                Err(e) => warn!(error = %e, "Skipping unreadable watchlist entry"),
            }
        }
        Ok(out)
    }

    async fn upsert_watchlist_entry(&self, entry: &WatchlistEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO watchlist_entries (
                id, organization_id, entity_name, entity_type, aliases,
                alert_threshold, sentiment_alert, is_active
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (id) DO UPDATE
               SET entity_name     = EXCLUDED.entity_name,
                   entity_type     = EXCLUDED.entity_type,
                   aliases         = EXCLUDED.aliases,
                   alert_threshold = EXCLUDED.alert_threshold,
                   sentiment_alert = EXCLUDED.sentiment_alert,
                   is_active       = EXCLUDED.is_active,
                   updated_at      = now()
            "#,
        )
        .bind(entry.id)
        .bind(entry.organization_id)
        .bind(&entry.entity_name)
        .bind(entry.entity_type.map(|t| t.to_string()))
        .bind(&entry.aliases)
        .bind(entry.alert_threshold)
        .bind(entry.sentiment_alert)
        .bind(entry.is_active)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn deactivate_watchlist_entry(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE watchlist_entries SET is_active = false, updated_at = now() WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn organization_profiles(&self) -> Result<Vec<OrganizationProfile>> {
        let rows = sqlx::query("SELECT organization_id, topics FROM organization_profiles")
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.iter()
            .map(|row| {
                Ok(OrganizationProfile {
                    organization_id: get(row, "organization_id")?,
                    topics: get(row, "topics")?,
                })
            })
            .collect()
    }

    async fn upsert_organization_profile(&self, profile: &OrganizationProfile) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO organization_profiles (organization_id, topics)
            VALUES ($1, $2)
            ON CONFLICT (organization_id) DO UPDATE SET topics = EXCLUDED.topics
            "#,
        )
        .bind(profile.organization_id)
        .bind(&profile.topics)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }
}

// --- Alerts ---

#[async_trait]
impl AlertStore for PgStore {
    async fn alerts_on(&self, day: NaiveDate) -> Result<Vec<Alert>> {
        let rows = sqlx::query("SELECT * FROM alerts WHERE day = $1")
            .bind(day)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.iter().map(alert_from_row).collect()
    }

    async fn upsert_alert(&self, alert: &Alert) -> Result<AlertWrite> {
        let row = sqlx::query(
            r#"
            INSERT INTO alerts (
                id, organization_id, watchlist_entry_id, entity_name, entity_type, alert_type,
                actionable_score, velocity, current_mentions, sample_sources, day,
                created_at, updated_at, status
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            ON CONFLICT (organization_id, entity_name, day) DO UPDATE
               SET watchlist_entry_id = EXCLUDED.watchlist_entry_id,
                   entity_type        = EXCLUDED.entity_type,
                   alert_type         = EXCLUDED.alert_type,
                   actionable_score   = EXCLUDED.actionable_score,
                   velocity           = EXCLUDED.velocity,
                   current_mentions   = EXCLUDED.current_mentions,
                   sample_sources     = EXCLUDED.sample_sources,
                   updated_at         = EXCLUDED.updated_at
            RETURNING (xmax = 0) AS inserted
            "#,
        )
        .bind(alert.id)
        .bind(alert.organization_id)
        .bind(alert.watchlist_entry_id)
        .bind(&alert.entity_name)
        .bind(alert.entity_type.to_string())
        .bind(alert.alert_type.to_string())
        .bind(alert.actionable_score)
        .bind(alert.velocity)
        .bind(count(alert.current_mentions))
        .bind(&alert.sample_sources)
        .bind(alert.day)
        .bind(alert.created_at)
        .bind(alert.updated_at)
        .bind(alert.status.to_string())
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        let inserted: bool = get(&row, "inserted")?;
        Ok(if inserted {
            AlertWrite::Created
        } else {
            AlertWrite::Updated
        })
    }

    async fn unread_alerts(&self, organization_id: Uuid) -> Result<Vec<Alert>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM alerts
            WHERE organization_id = $1 AND status = 'unread'
            ORDER BY actionable_score DESC, created_at DESC
            "#,
        )
        .bind(organization_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.iter().map(alert_from_row).collect()
    }

    async fn set_alert_status(&self, id: Uuid, status: AlertStatus) -> Result<bool> {
        let result = sqlx::query("UPDATE alerts SET status = $2, updated_at = now() WHERE id = $1")
            .bind(id)
            .bind(status.to_string())
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn response_counts(
        &self,
        organization_ids: &[Uuid],
    ) -> Result<HashMap<(Uuid, EntityType), ResponseCounts>> {
        let rows = sqlx::query(
            r#"
            SELECT organization_id, entity_type, status, COUNT(*) AS n
            FROM alerts
            WHERE organization_id = ANY($1)
            GROUP BY organization_id, entity_type, status
            "#,
        )
        .bind(organization_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let mut out: HashMap<(Uuid, EntityType), ResponseCounts> = HashMap::new();
        for row in &rows {
            let org: Uuid = get(row, "organization_id")?;
            let entity_type = entity_type_col(row, "entity_type")?;
            let status: String = get(row, "status")?;
            let n = to_u32(get(row, "n")?);
            let counts = out.entry((org, entity_type)).or_default();
            match AlertStatus::parse(&status) {
                Some(AlertStatus::Read) => counts.read += n,
                Some(AlertStatus::Dismissed) => counts.dismissed += n,
                Some(AlertStatus::Unread) => counts.unread += n,
                None => warn!(status = status.as_str(), "Ignoring alerts with unknown status"),
            }
        }
        Ok(out)
    }
}

// --- Touchpoints & identity ---

#[async_trait]
impl TouchpointStore for PgStore {
    async fn append_touchpoint(&self, touchpoint: &Touchpoint) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO touchpoints (id, donor_identity, touchpoint_type, campaign_id, link_method, occurred_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(touchpoint.id)
        .bind(&touchpoint.donor_identity)
        .bind(touchpoint.touchpoint_type.to_string())
        .bind(&touchpoint.campaign_id)
        .bind(touchpoint.link_method.to_string())
        .bind(touchpoint.occurred_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn touchpoints_for_donors(
        &self,
        donors: &[String],
        before: DateTime<Utc>,
    ) -> Result<Vec<Touchpoint>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM touchpoints
            WHERE donor_identity = ANY($1) AND occurred_at < $2
            ORDER BY occurred_at ASC, id ASC
            "#,
        )
        .bind(donors)
        .bind(before)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.iter().map(touchpoint_from_row).collect()
    }

    async fn link_identity(&self, link: &IdentityLink) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO identity_links (resolution_key, donor_identity, method, linked_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (resolution_key) DO UPDATE
               SET donor_identity = EXCLUDED.donor_identity,
                   method         = EXCLUDED.method,
                   linked_at      = EXCLUDED.linked_at
             WHERE NOT (identity_links.method <> 'probabilistic' AND EXCLUDED.method = 'probabilistic')
            "#,
        )
        .bind(&link.resolution_key)
        .bind(&link.donor_identity)
        .bind(link.method.to_string())
        .bind(link.linked_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn resolve_identity(&self, resolution_key: &str) -> Result<Option<IdentityLink>> {
        let row = sqlx::query("SELECT * FROM identity_links WHERE resolution_key = $1")
            .bind(resolution_key)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        let Some(row) = row else {
            return Ok(None);
        };
        let method: String = get(&row, "method")?;
        Ok(Some(IdentityLink {
            resolution_key: get(&row, "resolution_key")?,
            donor_identity: get(&row, "donor_identity")?,
            method: LinkMethod::parse(&method).ok_or_else(|| unknown("method", &method))?,
            linked_at: get(&row, "linked_at")?,
        }))
    }
}

// --- Donations & attribution ---

#[async_trait]
impl DonationStore for PgStore {
    async fn record_donation(&self, donation: &Donation) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO donations (transaction_id, donor_identity, amount_cents, donated_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (transaction_id) DO UPDATE
               SET donor_identity = EXCLUDED.donor_identity,
                   amount_cents   = EXCLUDED.amount_cents,
                   donated_at     = EXCLUDED.donated_at
            "#,
        )
        .bind(&donation.transaction_id)
        .bind(&donation.donor_identity)
        .bind(donation.amount_cents)
        .bind(donation.donated_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn pending_donations(&self, limit: usize) -> Result<Vec<Donation>> {
        let rows = sqlx::query(
            r#"
            SELECT d.transaction_id, d.donor_identity, d.amount_cents, d.donated_at
            FROM donations d
            LEFT JOIN attribution_records a ON a.transaction_id = d.transaction_id
            WHERE a.transaction_id IS NULL
            ORDER BY d.donated_at ASC, d.transaction_id ASC
            LIMIT $1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.iter().map(donation_from_row).collect()
    }

    async fn donations_by_id(&self, transaction_ids: &[String]) -> Result<Vec<Donation>> {
        let rows = sqlx::query(
            "SELECT * FROM donations WHERE transaction_id = ANY($1) ORDER BY donated_at ASC",
        )
        .bind(transaction_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.iter().map(donation_from_row).collect()
    }
}

#[async_trait]
impl AttributionStore for PgStore {
    async fn upsert_attribution(&self, record: &AttributionRecord) -> Result<()> {
        let middle = serde_json::to_value(&record.middle_touches)
            .map_err(|e| PulseError::InvalidRecord(format!("middle_touches: {e}")))?;
        sqlx::query(
            r#"
            INSERT INTO attribution_records (
                transaction_id, is_organic, touch_count,
                first_touch_channel, first_touch_campaign, first_touch_weight,
                middle_touches, middle_touches_weight,
                last_touch_channel, last_touch_campaign, last_touch_weight,
                attributed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (transaction_id) DO UPDATE
               SET is_organic            = EXCLUDED.is_organic,
                   touch_count           = EXCLUDED.touch_count,
                   first_touch_channel   = EXCLUDED.first_touch_channel,
                   first_touch_campaign  = EXCLUDED.first_touch_campaign,
                   first_touch_weight    = EXCLUDED.first_touch_weight,
                   middle_touches        = EXCLUDED.middle_touches,
                   middle_touches_weight = EXCLUDED.middle_touches_weight,
                   last_touch_channel    = EXCLUDED.last_touch_channel,
                   last_touch_campaign   = EXCLUDED.last_touch_campaign,
                   last_touch_weight     = EXCLUDED.last_touch_weight,
                   attributed_at         = EXCLUDED.attributed_at
            "#,
        )
        .bind(&record.transaction_id)
        .bind(record.is_organic)
        .bind(count(record.touch_count))
        .bind(&record.first_touch_channel)
        .bind(&record.first_touch_campaign)
        .bind(record.first_touch_weight)
        .bind(middle)
        .bind(record.middle_touches_weight)
        .bind(&record.last_touch_channel)
        .bind(&record.last_touch_campaign)
        .bind(record.last_touch_weight)
        .bind(record.attributed_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn get_attribution(&self, transaction_id: &str) -> Result<Option<AttributionRecord>> {
        let row = sqlx::query("SELECT * FROM attribution_records WHERE transaction_id = $1")
            .bind(transaction_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(attribution_from_row).transpose()
    }
}

// --- Job leases & health ---

#[async_trait]
impl JobStore for PgStore {
    async fn try_acquire_lease(
        &self,
        job: JobType,
        holder: Uuid,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<bool> {
        // Atomic check-and-take: only replaces an expired lease or our own.
        let result = sqlx::query(
            r#"
            INSERT INTO job_leases (job_type, holder, acquired_at, expires_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (job_type) DO UPDATE
               SET holder      = EXCLUDED.holder,
                   acquired_at = EXCLUDED.acquired_at,
                   expires_at  = EXCLUDED.expires_at
             WHERE job_leases.expires_at <= $3 OR job_leases.holder = $2
            "#,
        )
        .bind(job.to_string())
        .bind(holder)
        .bind(now)
        .bind(now + ttl)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn release_lease(&self, job: JobType, holder: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM job_leases WHERE job_type = $1 AND holder = $2")
            .bind(job.to_string())
            .bind(holder)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn job_health(&self, job: JobType) -> Result<Option<JobHealth>> {
        let row = sqlx::query("SELECT * FROM job_health WHERE job_type = $1")
            .bind(job.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(health_from_row).transpose()
    }

    async fn put_job_health(&self, health: &JobHealth) -> Result<()> {
        let summary = health
            .last_summary
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| PulseError::InvalidRecord(format!("last_summary: {e}")))?;
        sqlx::query(
            r#"
            INSERT INTO job_health (job_type, consecutive_failures, disabled, last_run_at, last_summary)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (job_type) DO UPDATE
               SET consecutive_failures = EXCLUDED.consecutive_failures,
                   disabled             = EXCLUDED.disabled,
                   last_run_at          = EXCLUDED.last_run_at,
                   last_summary         = EXCLUDED.last_summary
            "#,
        )
        .bind(health.job_type.to_string())
        .bind(count(health.consecutive_failures))
        .bind(health.disabled)
        .bind(health.last_run_at)
        .bind(summary)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn all_job_health(&self) -> Result<Vec<JobHealth>> {
        let rows = sqlx::query("SELECT * FROM job_health ORDER BY job_type")
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.iter().map(health_from_row).collect()
    }
}

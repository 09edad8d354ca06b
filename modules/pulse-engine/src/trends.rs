//! Trend aggregation: windowed mention counts, velocity, momentum, trending flag.
//!
//! Velocity compares the 6h hourly rate against the 24h hourly rate. A 1h-only
//! window is too sparse to be useful (it is zero most of the time), and the
//! 24h baseline plus a volume floor keeps a single mention from looking like
//! an explosion.
//!
//! Each run covers the busiest entities of the last 24h, bounded by the batch
//! size. Entities with no recent activity keep their last row untouched, and
//! readers treat a row older than [`activity_cutoff`] as no longer current.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use pulse_common::{
    EntityKey, EntityTrend, JobType, Mention, Result, RunSummary, WindowCounts,
};
use pulse_store::{MentionStore, TrendStore};

use crate::retry::with_retry;
use crate::run::{budget_spent, record_failure, Deadline};
use crate::settings::EngineSettings;

/// Velocity (percent) above which an entity with enough volume is trending.
pub const TRENDING_VELOCITY: f64 = 50.0;
/// Minimum 24h mentions for the velocity clause to count.
pub const TRENDING_MIN_24H: u32 = 3;
/// 6h mentions that make an entity trending on their own.
pub const TRENDING_MIN_6H: u32 = 5;
/// Velocity reported for a brand-new topic with no 24h baseline.
pub const NEW_TOPIC_VELOCITY: f64 = 500.0;
/// Entities mentioned within this many hours are recomputed on each run.
pub const ACTIVITY_WINDOW_HOURS: i64 = 24;

/// Oldest `calculated_at` a trend row may carry and still describe current activity.
pub fn activity_cutoff(now: DateTime<Utc>) -> DateTime<Utc> {
    now - Duration::hours(ACTIVITY_WINDOW_HOURS)
}

pub fn compute_velocity(counts: &WindowCounts) -> f64 {
    let six_hour_avg = counts.mentions_6h as f64 / 6.0;
    let daily_avg = counts.mentions_24h as f64 / 24.0;
    if daily_avg > 0.0 {
        ((six_hour_avg - daily_avg) / daily_avg) * 100.0
    } else if counts.mentions_6h > 0 {
        NEW_TOPIC_VELOCITY
    } else {
        0.0
    }
}

pub fn is_trending(velocity: f64, counts: &WindowCounts) -> bool {
    (velocity > TRENDING_VELOCITY && counts.mentions_24h >= TRENDING_MIN_24H)
        || counts.mentions_6h >= TRENDING_MIN_6H
}

fn within(m: &Mention, now: DateTime<Utc>, window: Duration) -> bool {
    m.mentioned_at > now - window && m.mentioned_at <= now
}

/// Counts over `(now - window, now]` for each trend window.
pub fn window_counts(mentions: &[&Mention], now: DateTime<Utc>) -> WindowCounts {
    let count = |window: Duration| mentions.iter().filter(|m| within(m, now, window)).count() as u32;
    WindowCounts {
        mentions_1h: count(Duration::hours(1)),
        mentions_6h: count(Duration::hours(6)),
        mentions_24h: count(Duration::hours(24)),
        mentions_7d: count(Duration::days(7)),
    }
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    (n > 0).then(|| sum / n as f64)
}

/// `(avg over the last 24h, that avg minus the avg of the 24h before it)`.
pub fn sentiment_windows(mentions: &[&Mention], now: DateTime<Utc>) -> (f64, f64) {
    let day = Duration::hours(24);
    let current = mean(
        mentions
            .iter()
            .filter(|m| within(m, now, day))
            .map(|m| m.sentiment),
    );
    let previous = mean(
        mentions
            .iter()
            .filter(|m| within(m, now - day, day))
            .map(|m| m.sentiment),
    );
    match (current, previous) {
        (Some(c), Some(p)) => (c, c - p),
        (Some(c), None) => (c, 0.0),
        _ => (0.0, 0.0),
    }
}

/// Build the new trend row for one entity.
///
/// When the window counts match the stored row, velocity and momentum carry
/// forward unchanged so re-running over an unchanged store only moves
/// `calculated_at`.
pub fn compute_trend(
    key: &EntityKey,
    mentions: &[&Mention],
    previous: Option<&EntityTrend>,
    now: DateTime<Utc>,
) -> EntityTrend {
    let counts = window_counts(mentions, now);
    let (sentiment_avg, sentiment_change) = sentiment_windows(mentions, now);

    let (velocity, momentum, previous_velocity) = match previous {
        Some(prev) if prev.counts() == counts => {
            (prev.velocity, prev.momentum, prev.previous_velocity)
        }
        Some(prev) => {
            let velocity = compute_velocity(&counts);
            (velocity, velocity - prev.velocity, prev.velocity)
        }
        None => (compute_velocity(&counts), 0.0, 0.0),
    };

    EntityTrend {
        entity_name: key.entity_name.clone(),
        entity_type: key.entity_type,
        mentions_1h: counts.mentions_1h,
        mentions_6h: counts.mentions_6h,
        mentions_24h: counts.mentions_24h,
        mentions_7d: counts.mentions_7d,
        velocity,
        momentum,
        previous_velocity,
        is_trending: is_trending(velocity, &counts),
        sentiment_avg,
        sentiment_change,
        calculated_at: now,
    }
}

pub async fn aggregate_trends<S>(
    store: &S,
    settings: &EngineSettings,
    now: DateTime<Utc>,
    deadline: Deadline,
) -> Result<RunSummary>
where
    S: MentionStore + TrendStore + ?Sized,
{
    let mut summary = RunSummary::new(JobType::TrendAggregation, now);
    let retry = &settings.retry;

    // Batch fetch up front; failing here fails the run.
    let active = with_retry(retry, "active entities", || {
        store.active_entities(activity_cutoff(now), settings.trend_batch_size)
    })
    .await?;
    if active.is_empty() {
        info!("No entities mentioned in the last 24h");
        return Ok(summary);
    }
    let keys: Vec<EntityKey> = active.into_iter().map(|a| a.key).collect();
    let mentions = with_retry(retry, "window mentions", || {
        store.mentions_since(&keys, now - Duration::days(7))
    })
    .await?;
    let stored = with_retry(retry, "stored trends", || store.trends_for(&keys)).await?;

    let mut by_entity: HashMap<EntityKey, Vec<&Mention>> = HashMap::new();
    for m in &mentions {
        if let Err(e) = m.validate() {
            warn!(entity = %m.entity_name, source_id = %m.source_id, error = %e, "Ignoring malformed mention");
            continue;
        }
        by_entity.entry(m.key()).or_default().push(m);
    }
    let stored: HashMap<EntityKey, EntityTrend> =
        stored.into_iter().map(|t| (t.key(), t)).collect();

    info!(entities = keys.len(), mentions = mentions.len(), "Aggregating trends");

    let mut trending = 0u32;
    for (i, key) in keys.iter().enumerate() {
        if budget_spent(&mut summary, &deadline, keys.len() - i) {
            break;
        }
        let item = key.to_string();
        let Some(entity_mentions) = by_entity.get(key) else {
            summary.skipped += 1;
            summary.note(format!("{item}: no valid mentions in window"));
            continue;
        };

        let trend = compute_trend(key, entity_mentions, stored.get(key), now);
        match with_retry(retry, "upsert trend", || store.upsert_trend(&trend)).await {
            Ok(true) => {
                summary.processed += 1;
                if trend.is_trending {
                    trending += 1;
                }
            }
            Ok(false) => {
                debug!(entity = %item, "A newer trend row exists, leaving it");
                summary.skipped += 1;
            }
            Err(e) => record_failure(&mut summary, &item, &e),
        }
    }

    summary.note(format!("{trending} entities trending"));
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pulse_common::{EntityType, SourceType};

    fn counts(h1: u32, h6: u32, h24: u32) -> WindowCounts {
        WindowCounts {
            mentions_1h: h1,
            mentions_6h: h6,
            mentions_24h: h24,
            mentions_7d: h24,
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap()
    }

    fn mention_at(minutes_ago: i64, sentiment: f64) -> Mention {
        Mention {
            entity_name: "Gaza".into(),
            entity_type: EntityType::Location,
            source_type: SourceType::News,
            source_id: format!("src-{minutes_ago}"),
            mentioned_at: now() - Duration::minutes(minutes_ago),
            sentiment,
        }
    }

    #[test]
    fn zero_baseline_velocity() {
        let c = counts(0, 0, 0);
        assert_eq!(compute_velocity(&c), 0.0);
        assert!(!is_trending(compute_velocity(&c), &c));

        assert_eq!(compute_velocity(&counts(0, 5, 0)), NEW_TOPIC_VELOCITY);
    }

    #[test]
    fn trending_needs_volume_floor() {
        assert!(is_trending(51.0, &counts(0, 1, 3)));
        assert!(!is_trending(1000.0, &counts(0, 1, 2)));
        assert!(is_trending(1000.0, &counts(0, 5, 2)));
    }

    #[test]
    fn gaza_scenario_trends_through_six_hour_volume() {
        let c = counts(0, 20, 59);
        let v = compute_velocity(&c);
        assert!((v - 35.59).abs() < 0.01, "velocity was {v}");
        assert!(v < TRENDING_VELOCITY);
        assert!(is_trending(v, &c));
    }

    #[test]
    fn windows_are_half_open() {
        let exactly_one_hour = mention_at(60, 0.0);
        let just_inside = mention_at(59, 0.0);
        let refs = vec![&exactly_one_hour, &just_inside];
        let c = window_counts(&refs, now());
        assert_eq!(c.mentions_1h, 1);
        assert_eq!(c.mentions_6h, 2);
    }

    #[test]
    fn sentiment_change_against_previous_day() {
        let today = mention_at(60, 0.5);
        let yesterday = mention_at(30 * 60, -0.1);
        let refs = vec![&today, &yesterday];
        let (avg, change) = sentiment_windows(&refs, now());
        assert_eq!(avg, 0.5);
        assert!((change - 0.6).abs() < 1e-9);
    }

    #[test]
    fn unchanged_counts_carry_velocity_forward() {
        let m = mention_at(30, 0.2);
        let refs = vec![&m];
        let key = EntityKey::new("Gaza", EntityType::Location);

        let first = compute_trend(&key, &refs, None, now());
        let mut stored = first.clone();
        stored.momentum = 12.0;
        let second = compute_trend(&key, &refs, Some(&stored), now() + Duration::minutes(1));
        assert_eq!(second.velocity, first.velocity);
        assert_eq!(second.momentum, 12.0);
        assert_eq!(second.counts(), first.counts());
    }

    #[test]
    fn changed_counts_update_momentum() {
        let key = EntityKey::new("Gaza", EntityType::Location);
        let a = mention_at(30, 0.0);
        let b = mention_at(20 * 60, 0.0);
        let stored = compute_trend(&key, &[&a, &b], None, now());

        let c = mention_at(10, 0.0);
        let next = compute_trend(&key, &[&a, &b, &c], Some(&stored), now());
        assert_eq!(next.previous_velocity, stored.velocity);
        assert!((next.momentum - (next.velocity - stored.velocity)).abs() < 1e-9);
    }
}

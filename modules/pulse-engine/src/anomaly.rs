//! Anomaly detection: z-scores of current activity against each entity's own
//! trailing baseline.
//!
//! Three signals per entity, each compared to the same time slot on the
//! prior `baseline_days` days:
//! - `mention_spike`: mentions in the last 24h vs daily counts.
//! - `velocity_spike`: mentions in the last 6h vs the same 6h slot each day.
//! - `sentiment_shift`: mean sentiment of the last 24h vs daily means.
//!
//! Count signals only flag spikes; sentiment flags shifts in either direction.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};

use pulse_common::{
    Anomaly, AnomalyType, EntityKey, JobType, Mention, Result, RunSummary, Severity,
};
use pulse_store::{AnomalyStore, MentionStore};

use crate::retry::with_retry;
use crate::run::{budget_spent, record_failure, Deadline};
use crate::settings::{AnomalyThresholds, EngineSettings};

/// |z| above this is recorded as `Medium`. Never surfaced.
pub const MEDIUM_Z: f64 = 2.0;
/// Count signals below this volume are not anomalous against a baseline with
/// spread. Against a constant baseline any new activity is a first occurrence.
pub const MIN_ANOMALY_COUNT: f64 = 3.0;
/// Smallest absolute sentiment move worth flagging.
pub const MIN_SENTIMENT_SHIFT: f64 = 0.25;
/// Prior days with mentions needed before sentiment has a baseline.
const MIN_SENTIMENT_DAYS: usize = 2;

const ZERO_VARIANCE: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Baseline {
    pub mean: f64,
    /// Population standard deviation.
    pub stddev: f64,
}

impl Baseline {
    pub fn from_values(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        Some(Self {
            mean,
            stddev: variance.sqrt(),
        })
    }

    /// `None` for a constant baseline.
    pub fn z_score(&self, current: f64) -> Option<f64> {
        (self.stddev > ZERO_VARIANCE).then(|| (current - self.mean) / self.stddev)
    }
}

/// How a signal's deviation is judged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Only values above the baseline count (mention volumes).
    SpikeOnly,
    /// Deviation in either direction counts (sentiment).
    Either,
}

/// Outcome of comparing one value with its baseline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Classified {
    pub z_score: Option<f64>,
    pub severity: Severity,
}

/// Severity of `current` against `baseline`, or `None` when it is not anomalous.
///
/// A constant baseline has no spread to measure against: any nonzero current
/// value that differs from it in the judged direction is treated as a
/// first-ever occurrence and is critical.
pub fn classify(
    current: f64,
    baseline: &Baseline,
    direction: Direction,
    thresholds: &AnomalyThresholds,
) -> Option<Classified> {
    let excess = current - baseline.mean;
    let deviation = match direction {
        Direction::SpikeOnly => excess,
        Direction::Either => excess.abs(),
    };

    let Some(z) = baseline.z_score(current) else {
        let differs = deviation > ZERO_VARIANCE;
        return (current != 0.0 && differs).then_some(Classified {
            z_score: None,
            severity: Severity::Critical,
        });
    };

    let effective = match direction {
        Direction::SpikeOnly => z,
        Direction::Either => z.abs(),
    };
    let flagged = effective > thresholds.z_threshold;
    let volume_spike = direction == Direction::SpikeOnly && excess > thresholds.volume_floor;

    let severity = if effective > thresholds.critical_z || (flagged && volume_spike) {
        Severity::Critical
    } else if flagged {
        Severity::High
    } else if effective > MEDIUM_Z {
        Severity::Medium
    } else {
        return None;
    };
    Some(Classified {
        z_score: Some(z),
        severity,
    })
}

fn count_in(mentions: &[&Mention], end: DateTime<Utc>, window: Duration) -> f64 {
    mentions
        .iter()
        .filter(|m| m.mentioned_at > end - window && m.mentioned_at <= end)
        .count() as f64
}

fn mean_sentiment_in(mentions: &[&Mention], end: DateTime<Utc>, window: Duration) -> Option<f64> {
    let values: Vec<f64> = mentions
        .iter()
        .filter(|m| m.mentioned_at > end - window && m.mentioned_at <= end)
        .map(|m| m.sentiment)
        .collect();
    (!values.is_empty()).then(|| values.iter().sum::<f64>() / values.len() as f64)
}

/// Current value and baseline values for one signal.
#[derive(Debug, Clone, PartialEq)]
pub struct Signal {
    pub anomaly_type: AnomalyType,
    pub current: f64,
    pub history: Vec<f64>,
}

/// Extract the three signals for one entity's mentions.
pub fn signals(mentions: &[&Mention], now: DateTime<Utc>, baseline_days: u32) -> Vec<Signal> {
    let day = Duration::hours(24);
    let six_hours = Duration::hours(6);
    let prior_days: Vec<DateTime<Utc>> = (1..=i64::from(baseline_days))
        .map(|d| now - Duration::days(d))
        .collect();

    let mut out = vec![
        Signal {
            anomaly_type: AnomalyType::MentionSpike,
            current: count_in(mentions, now, day),
            history: prior_days.iter().map(|end| count_in(mentions, *end, day)).collect(),
        },
        Signal {
            anomaly_type: AnomalyType::VelocitySpike,
            current: count_in(mentions, now, six_hours),
            history: prior_days
                .iter()
                .map(|end| count_in(mentions, *end, six_hours))
                .collect(),
        },
    ];

    let sentiment_history: Vec<f64> = prior_days
        .iter()
        .filter_map(|end| mean_sentiment_in(mentions, *end, day))
        .collect();
    if let Some(current) = mean_sentiment_in(mentions, now, day) {
        if sentiment_history.len() >= MIN_SENTIMENT_DAYS {
            out.push(Signal {
                anomaly_type: AnomalyType::SentimentShift,
                current,
                history: sentiment_history,
            });
        }
    }
    out
}

/// All anomalies for one entity at `now`, including unsurfaced `Medium` ones.
pub fn detect_for_entity(
    key: &EntityKey,
    mentions: &[&Mention],
    now: DateTime<Utc>,
    thresholds: &AnomalyThresholds,
) -> Vec<Anomaly> {
    signals(mentions, now, thresholds.baseline_days)
        .into_iter()
        .filter_map(|signal| {
            let baseline = Baseline::from_values(&signal.history)?;
            let classified = match signal.anomaly_type {
                AnomalyType::SentimentShift => {
                    if (signal.current - baseline.mean).abs() < MIN_SENTIMENT_SHIFT {
                        return None;
                    }
                    classify(signal.current, &baseline, Direction::Either, thresholds)?
                }
                AnomalyType::MentionSpike | AnomalyType::VelocitySpike => {
                    let measurable = baseline.z_score(signal.current).is_some();
                    if measurable && signal.current < MIN_ANOMALY_COUNT {
                        return None;
                    }
                    classify(signal.current, &baseline, Direction::SpikeOnly, thresholds)?
                }
            };
            Some(Anomaly {
                entity_name: key.entity_name.clone(),
                entity_type: key.entity_type,
                anomaly_type: signal.anomaly_type,
                z_score: classified.z_score,
                current_value: signal.current,
                baseline_value: baseline.mean,
                severity: classified.severity,
                day: now.date_naive(),
                detected_at: now,
            })
        })
        .collect()
}

pub async fn detect_anomalies<S>(
    store: &S,
    settings: &EngineSettings,
    now: DateTime<Utc>,
    deadline: Deadline,
) -> Result<RunSummary>
where
    S: MentionStore + AnomalyStore + ?Sized,
{
    let mut summary = RunSummary::new(JobType::AnomalyDetection, now);
    let retry = &settings.retry;
    let thresholds = settings.anomaly;
    let lookback = Duration::days(i64::from(thresholds.baseline_days) + 1);

    let active = with_retry(retry, "active entities", || {
        store.active_entities(now - Duration::hours(24), settings.anomaly_batch_size)
    })
    .await?;
    if active.is_empty() {
        return Ok(summary);
    }
    let keys: Vec<EntityKey> = active.into_iter().map(|a| a.key).collect();
    let mentions = with_retry(retry, "baseline mentions", || {
        store.mentions_since(&keys, now - lookback)
    })
    .await?;

    let mut by_entity: HashMap<EntityKey, Vec<&Mention>> = HashMap::new();
    for m in &mentions {
        if let Err(e) = m.validate() {
            warn!(entity = %m.entity_name, source_id = %m.source_id, error = %e, "Ignoring malformed mention");
            continue;
        }
        by_entity.entry(m.key()).or_default().push(m);
    }

    info!(entities = keys.len(), baseline_days = thresholds.baseline_days, "Detecting anomalies");

    let mut recorded = 0u32;
    let mut surfaced = 0u32;
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

        let anomalies = detect_for_entity(key, entity_mentions, now, &thresholds);
        let mut failed = false;
        for anomaly in &anomalies {
            match with_retry(retry, "upsert anomaly", || store.upsert_anomaly(anomaly)).await {
                Ok(()) => {
                    recorded += 1;
                    if anomaly.severity.is_surfaced() {
                        surfaced += 1;
                        info!(
                            entity = %item,
                            anomaly_type = %anomaly.anomaly_type,
                            severity = %anomaly.severity,
                            z_score = ?anomaly.z_score,
                            "Anomaly detected"
                        );
                    }
                }
                Err(e) => {
                    record_failure(&mut summary, &format!("{item} {}", anomaly.anomaly_type), &e);
                    failed = true;
                    break;
                }
            }
        }
        if !failed {
            summary.processed += 1;
        }
    }

    summary.note(format!("{recorded} anomalies recorded, {surfaced} surfaced"));
    Ok(summary)
}

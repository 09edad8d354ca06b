//! Actionable score: a fixed-weight blend of five 0–100 sub-scores.

use serde::Serialize;

use pulse_common::{AlertType, Anomaly, AnomalyType, EntityTrend, ResponseCounts, Severity};

use crate::matcher::MatchKind;
use crate::similarity::{is_fuzzy_match, normalize};
use crate::trends::{NEW_TOPIC_VELOCITY, TRENDING_VELOCITY};

pub const VELOCITY_WEIGHT: f64 = 0.25;
pub const RELEVANCE_WEIGHT: f64 = 0.25;
pub const TIME_SENSITIVITY_WEIGHT: f64 = 0.20;
pub const SENTIMENT_WEIGHT: f64 = 0.15;
pub const RESPONSE_RATE_WEIGHT: f64 = 0.15;

/// Velocity (percent) that earns a full velocity sub-score.
const FULL_VELOCITY: f64 = 200.0;
/// Resolved alerts needed before the response rate is trusted.
const MIN_RESOLVED_ALERTS: u32 = 3;
const NEUTRAL: f64 = 50.0;

/// What the matcher knows about a matched entity.
#[derive(Debug, Clone, Copy)]
pub struct ScoreInputs<'a> {
    pub trend: Option<&'a EntityTrend>,
    /// Surfaced anomalies for the entity today.
    pub anomalies: &'a [Anomaly],
    pub match_kind: MatchKind,
    /// The entity relates to one of the organization's declared topics.
    pub topic_match: bool,
    pub response: ResponseCounts,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScoreBreakdown {
    pub velocity: f64,
    pub relevance: f64,
    pub time_sensitivity: f64,
    pub sentiment: f64,
    pub response_rate: f64,
    pub total: f64,
}

fn clamp_score(v: f64) -> f64 {
    if v.is_finite() {
        v.clamp(0.0, 100.0)
    } else {
        0.0
    }
}

fn severity_score(severity: Severity) -> f64 {
    match severity {
        Severity::Medium => 40.0,
        Severity::High => 70.0,
        Severity::Critical => 100.0,
    }
}

fn strongest(anomalies: &[Anomaly], types: &[AnomalyType]) -> Option<Severity> {
    anomalies
        .iter()
        .filter(|a| types.contains(&a.anomaly_type))
        .map(|a| a.severity)
        .max()
}

pub fn velocity_score(trend: Option<&EntityTrend>, anomalies: &[Anomaly]) -> f64 {
    let from_trend = trend.map_or(0.0, |t| t.velocity / FULL_VELOCITY * 100.0);
    let from_anomaly = strongest(
        anomalies,
        &[AnomalyType::MentionSpike, AnomalyType::VelocitySpike],
    )
    .map_or(0.0, severity_score);
    clamp_score(from_trend.max(from_anomaly))
}

pub fn relevance_score(match_kind: MatchKind, topic_match: bool) -> f64 {
    if topic_match {
        return 100.0;
    }
    match match_kind {
        MatchKind::Exact => 60.0,
        MatchKind::Substring => 45.0,
        MatchKind::Fuzzy => 30.0,
    }
}

/// Share of the day's volume in the last 6h, plus a bonus for activity in the last hour.
pub fn time_sensitivity_score(trend: Option<&EntityTrend>) -> f64 {
    let Some(t) = trend else {
        return 0.0;
    };
    if t.mentions_24h == 0 {
        return if t.mentions_6h > 0 { 100.0 } else { 0.0 };
    }
    let recent_share = t.mentions_6h as f64 / t.mentions_24h as f64;
    let last_hour = if t.mentions_1h > 0 { 20.0 } else { 0.0 };
    clamp_score(recent_share * 80.0 + last_hour)
}

pub fn sentiment_score(trend: Option<&EntityTrend>, anomalies: &[Anomaly]) -> f64 {
    let from_trend = trend.map_or(0.0, |t| t.sentiment_change.abs() * 100.0);
    let from_anomaly =
        strongest(anomalies, &[AnomalyType::SentimentShift]).map_or(0.0, severity_score);
    clamp_score(from_trend.max(from_anomaly))
}

/// Share of resolved alerts the organization actually read. Neutral until enough history exists.
pub fn response_rate_score(counts: &ResponseCounts) -> f64 {
    let resolved = counts.read + counts.dismissed;
    if resolved < MIN_RESOLVED_ALERTS {
        return NEUTRAL;
    }
    clamp_score(counts.read as f64 / resolved as f64 * 100.0)
}

pub fn actionable_score(inputs: &ScoreInputs<'_>) -> ScoreBreakdown {
    let velocity = velocity_score(inputs.trend, inputs.anomalies);
    let relevance = relevance_score(inputs.match_kind, inputs.topic_match);
    let time_sensitivity = time_sensitivity_score(inputs.trend);
    let sentiment = sentiment_score(inputs.trend, inputs.anomalies);
    let response_rate = response_rate_score(&inputs.response);

    let total = velocity * VELOCITY_WEIGHT
        + relevance * RELEVANCE_WEIGHT
        + time_sensitivity * TIME_SENSITIVITY_WEIGHT
        + sentiment * SENTIMENT_WEIGHT
        + response_rate * RESPONSE_RATE_WEIGHT;

    ScoreBreakdown {
        velocity,
        relevance,
        time_sensitivity,
        sentiment,
        response_rate,
        total: (clamp_score(total) * 100.0).round() / 100.0,
    }
}

/// Does an entity relate to any of the organization's declared topics?
pub fn topic_relevant(entity_name: &str, topics: &[String]) -> bool {
    let name = normalize(entity_name);
    if name.is_empty() {
        return false;
    }
    topics.iter().any(|topic| {
        let topic = normalize(topic);
        !topic.is_empty()
            && (name.contains(&topic) || topic.contains(&name) || is_fuzzy_match(&name, &topic))
    })
}

pub fn alert_type_for(
    trend: Option<&EntityTrend>,
    anomalies: &[Anomaly],
    sentiment_alert: bool,
) -> AlertType {
    let has = |t: AnomalyType| anomalies.iter().any(|a| a.anomaly_type == t && a.severity.is_surfaced());

    if trend.is_some_and(|t| t.velocity >= NEW_TOPIC_VELOCITY && t.mentions_1h > 0) {
        AlertType::Breaking
    } else if sentiment_alert && has(AnomalyType::SentimentShift) {
        AlertType::SentimentShift
    } else if has(AnomalyType::MentionSpike) {
        AlertType::VolumeSpike
    } else if has(AnomalyType::VelocitySpike) {
        AlertType::Spike
    } else if trend.is_some_and(|t| t.is_trending && t.velocity > TRENDING_VELOCITY) {
        AlertType::TrendingSpike
    } else {
        AlertType::Trending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pulse_common::EntityType;

    fn trend(h1: u32, h6: u32, h24: u32, velocity: f64) -> EntityTrend {
        EntityTrend {
            entity_name: "Gaza".into(),
            entity_type: EntityType::Location,
            mentions_1h: h1,
            mentions_6h: h6,
            mentions_24h: h24,
            mentions_7d: h24,
            velocity,
            momentum: 0.0,
            previous_velocity: 0.0,
            is_trending: true,
            sentiment_avg: 0.0,
            sentiment_change: -0.3,
            calculated_at: Utc::now(),
        }
    }

    fn anomaly(anomaly_type: AnomalyType, severity: Severity) -> Anomaly {
        Anomaly {
            entity_name: "Gaza".into(),
            entity_type: EntityType::Location,
            anomaly_type,
            z_score: Some(3.0),
            current_value: 10.0,
            baseline_value: 2.0,
            severity,
            day: Utc::now().date_naive(),
            detected_at: Utc::now(),
        }
    }

    #[test]
    fn weights_sum_to_one() {
        let sum = VELOCITY_WEIGHT
            + RELEVANCE_WEIGHT
            + TIME_SENSITIVITY_WEIGHT
            + SENTIMENT_WEIGHT
            + RESPONSE_RATE_WEIGHT;
        assert!((sum - 1.0).abs() < 1e-12);
    }

    #[test]
    fn score_is_weighted_sum_of_subscores() {
        let t = trend(0, 20, 59, 35.6);
        let breakdown = actionable_score(&ScoreInputs {
            trend: Some(&t),
            anomalies: &[],
            match_kind: MatchKind::Exact,
            topic_match: true,
            response: ResponseCounts::default(),
        });
        assert!((breakdown.velocity - 17.8).abs() < 1e-9);
        assert_eq!(breakdown.relevance, 100.0);
        assert!((breakdown.sentiment - 30.0).abs() < 1e-9);
        assert_eq!(breakdown.response_rate, 50.0);
        let expected = 17.8 * 0.25 + 100.0 * 0.25 + (20.0 / 59.0 * 80.0) * 0.2 + 30.0 * 0.15 + 50.0 * 0.15;
        assert!((breakdown.total - expected).abs() < 0.01);
    }

    #[test]
    fn subscores_stay_in_range() {
        let t = trend(5, 5, 0, NEW_TOPIC_VELOCITY);
        let a = [anomaly(AnomalyType::MentionSpike, Severity::Critical)];
        let b = actionable_score(&ScoreInputs {
            trend: Some(&t),
            anomalies: &a,
            match_kind: MatchKind::Fuzzy,
            topic_match: false,
            response: ResponseCounts { read: 10, dismissed: 0, unread: 0 },
        });
        for v in [b.velocity, b.relevance, b.time_sensitivity, b.sentiment, b.response_rate, b.total] {
            assert!((0.0..=100.0).contains(&v), "{v} out of range");
        }
        assert_eq!(b.velocity, 100.0);
    }

    #[test]
    fn response_rate_needs_history() {
        let few = ResponseCounts { read: 2, dismissed: 0, unread: 9 };
        assert_eq!(response_rate_score(&few), 50.0);
        let many = ResponseCounts { read: 1, dismissed: 3, unread: 0 };
        assert_eq!(response_rate_score(&many), 25.0);
    }

    #[test]
    fn topic_relevance_is_loose() {
        let topics = vec!["civil rights".to_string(), "Gaza".to_string()];
        assert!(topic_relevant("Gaza Strip", &topics));
        assert!(!topic_relevant("Federal Reserve", &topics));
    }

    #[test]
    fn alert_type_priority() {
        let breaking = trend(2, 4, 0, NEW_TOPIC_VELOCITY);
        assert_eq!(alert_type_for(Some(&breaking), &[], false), AlertType::Breaking);

        let t = trend(0, 20, 59, 35.6);
        let sentiment = [anomaly(AnomalyType::SentimentShift, Severity::High)];
        assert_eq!(alert_type_for(Some(&t), &sentiment, true), AlertType::SentimentShift);
        assert_eq!(alert_type_for(Some(&t), &sentiment, false), AlertType::Trending);

        let volume = [anomaly(AnomalyType::MentionSpike, Severity::Critical)];
        assert_eq!(alert_type_for(Some(&t), &volume, false), AlertType::VolumeSpike);

        let fast = trend(0, 20, 30, 80.0);
        assert_eq!(alert_type_for(Some(&fast), &[], false), AlertType::TrendingSpike);
    }
}

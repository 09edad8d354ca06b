//! Watchlist matching: pair each organization's watchlist entries with the
//! current trending and anomalous entities, score the match, and write at most
//! one alert per `(organization, entity, day)` bucket.
//!
//! Matching tries exact, then substring, then fuzzy, across all candidates.
//! A fuzzy hit is only considered when no candidate matches more strictly, so
//! near-duplicate names never steal a match from the real entity.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use pulse_common::{
    Alert, AlertBucket, AlertStatus, AlertWrite, Anomaly, AnomalyType, EntityKey, EntityTrend,
    JobType, Result, RunSummary, Severity, WatchlistEntry,
};
use pulse_store::{AlertStore, AnomalyStore, MentionStore, TrendStore, WatchlistStore};

use crate::retry::with_retry;
use crate::run::{budget_spent, record_failure, Deadline};
use crate::scoring::{actionable_score, alert_type_for, topic_relevant, ScoreInputs};
use crate::settings::EngineSettings;
use crate::similarity::{normalize, similarity, FUZZY_MATCH_THRESHOLD};
use crate::trends::activity_cutoff;

/// Shortest term (in characters) allowed to match by containment.
pub const MIN_SUBSTRING_LEN: usize = 3;
/// Source ids attached to each alert.
pub const SAMPLE_SOURCES: usize = 5;

/// Match strength, strongest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    Exact,
    Substring,
    Fuzzy,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MatchHit {
    pub kind: MatchKind,
    /// The watchlist name or alias that matched.
    pub term: String,
    pub similarity: f64,
}

/// A trending or anomalous entity the matcher can alert on.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub key: EntityKey,
    pub trend: Option<EntityTrend>,
    /// Surfaced anomalies for today.
    pub anomalies: Vec<Anomaly>,
}

impl Candidate {
    fn current_mentions(&self) -> u32 {
        match &self.trend {
            Some(t) => t.mentions_24h,
            None => self
                .anomalies
                .iter()
                .find(|a| a.anomaly_type == AnomalyType::MentionSpike)
                .map_or(0, |a| a.current_value.max(0.0) as u32),
        }
    }
}

/// How `term` matches `name`, if at all.
pub fn match_term(term: &str, name: &str) -> Option<MatchHit> {
    let hit = |kind, similarity| {
        Some(MatchHit {
            kind,
            term: term.to_string(),
            similarity,
        })
    };

    if term.trim().is_empty() || name.trim().is_empty() {
        return None;
    }
    if term.trim().to_lowercase() == name.trim().to_lowercase() {
        return hit(MatchKind::Exact, 1.0);
    }

    let t = normalize(term);
    let n = normalize(name);
    let score = similarity(&t, &n);
    let (short, long) = if t.len() <= n.len() { (&t, &n) } else { (&n, &t) };
    // Whole-word containment, so "CAIR" never matches inside "Cairo".
    if short.chars().count() >= MIN_SUBSTRING_LEN
        && format!(" {long} ").contains(&format!(" {short} "))
    {
        return hit(MatchKind::Substring, score);
    }
    if score >= FUZZY_MATCH_THRESHOLD {
        return hit(MatchKind::Fuzzy, score);
    }
    None
}

/// Best candidate for a watchlist entry: strongest match kind first, then
/// highest similarity, then candidate order.
pub fn find_match(entry: &WatchlistEntry, candidates: &[Candidate]) -> Option<(usize, MatchHit)> {
    let mut best: Option<(usize, MatchHit)> = None;
    for (i, candidate) in candidates.iter().enumerate() {
        if entry
            .entity_type
            .is_some_and(|t| t != candidate.key.entity_type)
        {
            continue;
        }
        for term in entry.search_terms() {
            let Some(hit) = match_term(term, &candidate.key.entity_name) else {
                continue;
            };
            let better = match &best {
                None => true,
                Some((_, current)) => {
                    hit.kind < current.kind
                        || (hit.kind == current.kind && hit.similarity > current.similarity)
                }
            };
            if better {
                best = Some((i, hit));
            }
        }
    }
    best
}

struct Pending {
    alert: Alert,
    threshold: f64,
}

pub async fn match_watchlists<S>(
    store: &S,
    settings: &EngineSettings,
    now: DateTime<Utc>,
    deadline: Deadline,
) -> Result<RunSummary>
where
    S: WatchlistStore + TrendStore + AnomalyStore + AlertStore + MentionStore + ?Sized,
{
    let mut summary = RunSummary::new(JobType::WatchlistMatching, now);
    let retry = &settings.retry;
    let day = now.date_naive();

    // --- Prefetch everything the run needs ---

    let entries = with_retry(retry, "active watchlist", || store.active_watchlist()).await?;
    if entries.is_empty() {
        info!("No active watchlist entries");
        return Ok(summary);
    }

    // Rows the aggregator stopped refreshing describe past activity.
    let trending = with_retry(retry, "trending entities", || {
        store.list_trends(true, Some(activity_cutoff(now)), settings.trend_batch_size)
    })
    .await?;
    let anomalies = with_retry(retry, "surfaced anomalies", || {
        store.anomalies_on(day, Severity::High)
    })
    .await?;

    let mut candidates: Vec<Candidate> = trending
        .into_iter()
        .map(|t| Candidate {
            key: t.key(),
            trend: Some(t),
            anomalies: Vec::new(),
        })
        .collect();
    let mut index: HashMap<EntityKey, usize> = candidates
        .iter()
        .enumerate()
        .map(|(i, c)| (c.key.clone(), i))
        .collect();
    for anomaly in anomalies {
        let key = anomaly.key();
        let i = *index.entry(key.clone()).or_insert_with(|| {
            candidates.push(Candidate {
                key,
                trend: None,
                anomalies: Vec::new(),
            });
            candidates.len() - 1
        });
        candidates[i].anomalies.push(anomaly);
    }

    let untrended: Vec<EntityKey> = candidates
        .iter()
        .filter(|c| c.trend.is_none())
        .map(|c| c.key.clone())
        .collect();
    if !untrended.is_empty() {
        let rows = with_retry(retry, "anomalous entity trends", || store.trends_for(&untrended)).await?;
        for t in rows {
            if let Some(&i) = index.get(&t.key()) {
                candidates[i].trend = Some(t);
            }
        }
    }

    if candidates.is_empty() {
        info!(entries = entries.len(), "No trending or anomalous entities to match");
        return Ok(summary);
    }

    let candidate_keys: Vec<EntityKey> = candidates.iter().map(|c| c.key.clone()).collect();
    let samples = with_retry(retry, "sample sources", || {
        store.recent_source_ids(&candidate_keys, now - Duration::hours(24), SAMPLE_SOURCES)
    })
    .await?;

    let profiles: HashMap<Uuid, Vec<String>> =
        with_retry(retry, "organization profiles", || store.organization_profiles())
            .await?
            .into_iter()
            .map(|p| (p.organization_id, p.topics))
            .collect();

    let mut orgs: Vec<Uuid> = entries.iter().map(|e| e.organization_id).collect();
    orgs.sort();
    orgs.dedup();
    let responses = with_retry(retry, "response history", || store.response_counts(&orgs)).await?;

    let existing: HashSet<AlertBucket> = with_retry(retry, "today's alerts", || store.alerts_on(day))
        .await?
        .iter()
        .map(Alert::bucket)
        .collect();

    info!(
        entries = entries.len(),
        candidates = candidates.len(),
        "Matching watchlists"
    );

    // --- Match and score, keeping the best alert per bucket ---

    let mut order: Vec<AlertBucket> = Vec::new();
    let mut pending: HashMap<AlertBucket, Pending> = HashMap::new();
    for (i, entry) in entries.iter().enumerate() {
        if budget_spent(&mut summary, &deadline, entries.len() - i) {
            break;
        }
        let item = format!("watchlist {} ({})", entry.id, entry.entity_name);
        if let Err(e) = entry.validate() {
            record_failure(&mut summary, &item, &e);
            continue;
        }
        summary.processed += 1;

        let Some((idx, hit)) = find_match(entry, &candidates) else {
            continue;
        };
        let candidate = &candidates[idx];
        let topics = profiles
            .get(&entry.organization_id)
            .map(Vec::as_slice)
            .unwrap_or_default();
        let response = responses
            .get(&(entry.organization_id, candidate.key.entity_type))
            .copied()
            .unwrap_or_default();

        let score = actionable_score(&ScoreInputs {
            trend: candidate.trend.as_ref(),
            anomalies: &candidate.anomalies,
            match_kind: hit.kind,
            topic_match: topic_relevant(&candidate.key.entity_name, topics),
            response,
        });
        debug!(
            entry = %entry.entity_name,
            entity = %candidate.key,
            kind = ?hit.kind,
            term = %hit.term,
            score = score.total,
            "Watchlist match"
        );

        let alert = Alert {
            id: Uuid::new_v4(),
            organization_id: entry.organization_id,
            watchlist_entry_id: entry.id,
            entity_name: candidate.key.entity_name.clone(),
            entity_type: candidate.key.entity_type,
            alert_type: alert_type_for(
                candidate.trend.as_ref(),
                &candidate.anomalies,
                entry.sentiment_alert,
            ),
            actionable_score: score.total,
            velocity: candidate.trend.as_ref().map_or(0.0, |t| t.velocity),
            current_mentions: candidate.current_mentions(),
            sample_sources: samples.get(&candidate.key).cloned().unwrap_or_default(),
            day,
            created_at: now,
            updated_at: now,
            status: AlertStatus::Unread,
        };
        let bucket = alert.bucket();
        match pending.get_mut(&bucket) {
            Some(p) if p.alert.actionable_score >= alert.actionable_score => {}
            Some(p) => {
                *p = Pending {
                    alert,
                    threshold: entry.alert_threshold,
                }
            }
            None => {
                order.push(bucket.clone());
                pending.insert(
                    bucket,
                    Pending {
                        alert,
                        threshold: entry.alert_threshold,
                    },
                );
            }
        }
    }

    // --- Write: update existing buckets, create only above threshold ---

    let (mut created, mut updated, mut below) = (0u32, 0u32, 0u32);
    // Matched buckets are always written, even past the budget; the writes are the run's progress.
    for bucket in &order {
        let Some(p) = pending.get(bucket) else {
            continue;
        };
        if !existing.contains(bucket) && p.alert.actionable_score <= p.threshold {
            below += 1;
            continue;
        }
        let item = format!("alert {} / {}", bucket.organization_id, bucket.entity_name);
        match with_retry(retry, "upsert alert", || store.upsert_alert(&p.alert)).await {
            Ok(AlertWrite::Created) => {
                created += 1;
                info!(
                    organization = %bucket.organization_id,
                    entity = %bucket.entity_name,
                    alert_type = %p.alert.alert_type,
                    score = p.alert.actionable_score,
                    "Alert created"
                );
            }
            Ok(AlertWrite::Updated) => updated += 1,
            Err(e) => record_failure(&mut summary, &item, &e),
        }
    }

    summary.note(format!(
        "alerts: {created} created, {updated} updated, {below} below threshold"
    ));
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_common::EntityType;

    fn candidate(name: &str, entity_type: EntityType) -> Candidate {
        Candidate {
            key: EntityKey::new(name, entity_type),
            trend: None,
            anomalies: Vec::new(),
        }
    }

    fn entry(name: &str, aliases: &[&str]) -> WatchlistEntry {
        WatchlistEntry {
            id: Uuid::new_v4(),
            organization_id: Uuid::new_v4(),
            entity_name: name.into(),
            entity_type: None,
            aliases: aliases.iter().map(|a| a.to_string()).collect(),
            alert_threshold: 30.0,
            sentiment_alert: false,
            is_active: true,
        }
    }

    #[test]
    fn match_kinds() {
        assert_eq!(match_term("cair", "CAIR").unwrap().kind, MatchKind::Exact);
        assert_eq!(match_term("Gaza", "Gaza Strip").unwrap().kind, MatchKind::Substring);
        assert_eq!(match_term("Netanyahu", "Netanyahoo").unwrap().kind, MatchKind::Fuzzy);
        assert!(match_term("Gaza", "Ukraine").is_none());
    }

    #[test]
    fn containment_respects_word_boundaries() {
        let hit = match_term("CAIR", "Cairo");
        assert!(hit.map_or(true, |h| h.kind != MatchKind::Substring));
    }

    #[test]
    fn short_terms_do_not_match_by_containment() {
        assert!(match_term("EU", "EU Parliament").is_none());
    }

    #[test]
    fn exact_match_beats_earlier_fuzzy_candidate() {
        let candidates = vec![
            candidate("CAIRN", EntityType::Organization),
            candidate("CAIR", EntityType::Organization),
        ];
        assert!(match_term("CAIR", "CAIRN").is_some());

        let e = entry("CAIR", &["Council on American-Islamic Relations"]);
        let (idx, hit) = find_match(&e, &candidates).unwrap();
        assert_eq!(idx, 1);
        assert_eq!(hit.kind, MatchKind::Exact);
    }

    #[test]
    fn alias_matches_exactly() {
        let candidates = vec![candidate(
            "Council on American-Islamic Relations",
            EntityType::Organization,
        )];
        let e = entry("CAIR", &["Council on American-Islamic Relations"]);
        let (_, hit) = find_match(&e, &candidates).unwrap();
        assert_eq!(hit.kind, MatchKind::Exact);
        assert_eq!(hit.term, "Council on American-Islamic Relations");
    }

    #[test]
    fn entity_type_filter_applies() {
        let candidates = vec![candidate("Jordan", EntityType::Location)];
        let mut e = entry("Jordan", &[]);
        e.entity_type = Some(EntityType::Person);
        assert!(find_match(&e, &candidates).is_none());
    }
}

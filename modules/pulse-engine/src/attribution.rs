//! Multi-touch attribution with a fixed 40/20/40 model.
//!
//! - No touches: organic, full credit to the direct channel.
//! - One touch: full credit to it (it is both first and last).
//! - Two touches: 50/50. With no middle touch to take the 20%, first and
//!   last are renormalized to equal halves.
//! - Three or more: 40% first, 40% last, 20% split evenly across the middle.
//!
//! Only touchpoints tied to the donor by a deterministic link count, and
//! only those strictly before the donation.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use pulse_common::{
    AttributionRecord, Donation, JobType, PulseError, Result, RunSummary, TouchCredit,
    Touchpoint, DIRECT_CHANNEL,
};
use pulse_store::{AttributionStore, DonationStore, TouchpointStore};

use crate::retry::with_retry;
use crate::run::{budget_spent, record_failure, Deadline};
use crate::settings::EngineSettings;

pub const FIRST_TOUCH_WEIGHT: f64 = 0.4;
pub const MIDDLE_TOUCHES_WEIGHT: f64 = 0.2;
pub const LAST_TOUCH_WEIGHT: f64 = 0.4;
/// First and last each get this when there is no middle touch.
pub const TWO_TOUCH_WEIGHT: f64 = 0.5;
/// Allowed floating error in the sum of all weights.
pub const WEIGHT_TOLERANCE: f64 = 1e-6;

fn credit(t: &Touchpoint, weight: f64) -> TouchCredit {
    TouchCredit {
        channel: t.channel(),
        campaign_id: t.campaign_id.clone(),
        weight,
    }
}

/// Touches that count for a donation: deterministically linked, strictly
/// earlier, oldest first.
pub fn eligible_touches<'a>(
    touches: impl IntoIterator<Item = &'a Touchpoint>,
    donor: &str,
    donated_at: DateTime<Utc>,
) -> Vec<&'a Touchpoint> {
    let mut out: Vec<&Touchpoint> = touches
        .into_iter()
        .filter(|t| {
            t.donor_identity == donor
                && t.link_method.is_deterministic()
                && t.occurred_at < donated_at
        })
        .collect();
    out.sort_by(|a, b| a.occurred_at.cmp(&b.occurred_at).then_with(|| a.id.cmp(&b.id)));
    out
}

/// Split credit for one transaction. `touches` must be in time order.
pub fn attribute(
    transaction_id: &str,
    touches: &[&Touchpoint],
    attributed_at: DateTime<Utc>,
) -> AttributionRecord {
    let base = AttributionRecord {
        transaction_id: transaction_id.to_string(),
        is_organic: false,
        touch_count: touches.len() as u32,
        first_touch_channel: DIRECT_CHANNEL.to_string(),
        first_touch_campaign: None,
        first_touch_weight: 1.0,
        middle_touches: Vec::new(),
        middle_touches_weight: 0.0,
        last_touch_channel: DIRECT_CHANNEL.to_string(),
        last_touch_campaign: None,
        last_touch_weight: 0.0,
        attributed_at,
    };

    match touches {
        [] => AttributionRecord {
            is_organic: true,
            ..base
        },
        [only] => AttributionRecord {
            first_touch_channel: only.channel(),
            first_touch_campaign: only.campaign_id.clone(),
            last_touch_channel: only.channel(),
            last_touch_campaign: only.campaign_id.clone(),
            ..base
        },
        [first, last] => AttributionRecord {
            first_touch_channel: first.channel(),
            first_touch_campaign: first.campaign_id.clone(),
            first_touch_weight: TWO_TOUCH_WEIGHT,
            last_touch_channel: last.channel(),
            last_touch_campaign: last.campaign_id.clone(),
            last_touch_weight: TWO_TOUCH_WEIGHT,
            ..base
        },
        [first, middle @ .., last] => {
            let each = MIDDLE_TOUCHES_WEIGHT / middle.len() as f64;
            AttributionRecord {
                first_touch_channel: first.channel(),
                first_touch_campaign: first.campaign_id.clone(),
                first_touch_weight: FIRST_TOUCH_WEIGHT,
                middle_touches: middle.iter().map(|t| credit(t, each)).collect(),
                middle_touches_weight: MIDDLE_TOUCHES_WEIGHT,
                last_touch_channel: last.channel(),
                last_touch_campaign: last.campaign_id.clone(),
                last_touch_weight: LAST_TOUCH_WEIGHT,
                ..base
            }
        }
    }
}

/// Reject a record whose credits do not sum to one.
pub fn check_weights(record: &AttributionRecord) -> Result<()> {
    let sum: f64 = record.credits().iter().map(|c| c.weight).sum();
    if (sum - 1.0).abs() > WEIGHT_TOLERANCE {
        return Err(PulseError::Constraint(format!(
            "attribution weights for {} sum to {sum}",
            record.transaction_id
        )));
    }
    Ok(())
}

/// Attribute pending donations, or exactly the `force`d transactions when given.
pub async fn run_attribution<S>(
    store: &S,
    settings: &EngineSettings,
    now: DateTime<Utc>,
    deadline: Deadline,
    force: &[String],
) -> Result<RunSummary>
where
    S: DonationStore + TouchpointStore + AttributionStore + ?Sized,
{
    let mut summary = RunSummary::new(JobType::Attribution, now);
    let retry = &settings.retry;

    let donations: Vec<Donation> = if force.is_empty() {
        with_retry(retry, "pending donations", || {
            store.pending_donations(settings.attribution_batch_size)
        })
        .await?
    } else {
        let found = with_retry(retry, "forced donations", || store.donations_by_id(force)).await?;
        for missing in force
            .iter()
            .filter(|id| !found.iter().any(|d| &d.transaction_id == *id))
        {
            summary.skipped += 1;
            summary.note(format!("{missing}: no such donation"));
        }
        found
    };
    if donations.is_empty() {
        info!("No donations to attribute");
        return Ok(summary);
    }

    let mut donors: Vec<String> = donations
        .iter()
        .filter_map(|d| d.donor_identity.clone())
        .collect();
    donors.sort();
    donors.dedup();
    let latest = donations.iter().map(|d| d.donated_at).max().unwrap_or(now);
    let touchpoints = if donors.is_empty() {
        Vec::new()
    } else {
        with_retry(retry, "touchpoints", || {
            store.touchpoints_for_donors(&donors, latest)
        })
        .await?
    };
    let mut by_donor: HashMap<&str, Vec<&Touchpoint>> = HashMap::new();
    for t in &touchpoints {
        by_donor.entry(t.donor_identity.as_str()).or_default().push(t);
    }

    info!(
        donations = donations.len(),
        donors = donors.len(),
        touchpoints = touchpoints.len(),
        forced = !force.is_empty(),
        "Attributing donations"
    );

    let mut organic = 0u32;
    for (i, donation) in donations.iter().enumerate() {
        if budget_spent(&mut summary, &deadline, donations.len() - i) {
            break;
        }
        let txn = donation.transaction_id.as_str();

        let touches = match donation.donor_identity.as_deref() {
            Some(donor) => eligible_touches(
                by_donor.get(donor).into_iter().flatten().copied(),
                donor,
                donation.donated_at,
            ),
            None => {
                debug!(transaction_id = txn, "Donor identity not linked, attributing as organic");
                Vec::new()
            }
        };

        let record = attribute(txn, &touches, now);
        if let Err(e) = check_weights(&record) {
            record_failure(&mut summary, txn, &e);
            continue;
        }
        match with_retry(retry, "upsert attribution", || store.upsert_attribution(&record)).await {
            Ok(()) => {
                summary.processed += 1;
                if record.is_organic {
                    organic += 1;
                }
            }
            Err(e) => record_failure(&mut summary, txn, &e),
        }
    }

    summary.note(format!("{organic} attributed as organic"));
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use pulse_common::{LinkMethod, TouchpointType};
    use uuid::Uuid;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()
    }

    fn touch(kind: TouchpointType, hours: i64, campaign: &str) -> Touchpoint {
        Touchpoint {
            id: Uuid::new_v4(),
            donor_identity: "donor-1".into(),
            touchpoint_type: kind,
            campaign_id: Some(campaign.into()),
            link_method: LinkMethod::Refcode,
            occurred_at: t0() + Duration::hours(hours),
        }
    }

    fn total(record: &AttributionRecord) -> f64 {
        record.credits().iter().map(|c| c.weight).sum()
    }

    #[test]
    fn no_touches_is_organic_direct() {
        let r = attribute("txn-0", &[], t0());
        assert!(r.is_organic);
        assert_eq!(r.first_touch_channel, DIRECT_CHANNEL);
        assert_eq!(r.first_touch_weight, 1.0);
        assert!((total(&r) - 1.0).abs() < WEIGHT_TOLERANCE);
    }

    #[test]
    fn single_touch_takes_everything() {
        let sms = touch(TouchpointType::Sms, 0, "spring");
        let r = attribute("txn-1", &[&sms], t0());
        assert_eq!(r.first_touch_channel, r.last_touch_channel);
        assert_eq!(r.first_touch_channel, "sms");
        assert_eq!(r.credits().len(), 1);
        assert!((total(&r) - 1.0).abs() < WEIGHT_TOLERANCE);
    }

    #[test]
    fn two_touches_split_evenly() {
        let a = touch(TouchpointType::AdClick, 0, "a");
        let b = touch(TouchpointType::Email, 1, "b");
        let r = attribute("txn-2", &[&a, &b], t0());
        assert_eq!(r.first_touch_weight, 0.5);
        assert_eq!(r.last_touch_weight, 0.5);
        assert!(r.middle_touches.is_empty());
        assert!((total(&r) - 1.0).abs() < WEIGHT_TOLERANCE);
    }

    #[test]
    fn four_touches_forty_ten_ten_forty() {
        let ts: Vec<Touchpoint> = (0..4)
            .map(|h| touch(TouchpointType::Email, h, &format!("c{h}")))
            .collect();
        let refs: Vec<&Touchpoint> = ts.iter().collect();
        let r = attribute("txn-4", &refs, t0());
        let weights: Vec<f64> = r.credits().iter().map(|c| c.weight).collect();
        let expected = [0.4, 0.1, 0.1, 0.4];
        for (w, e) in weights.iter().zip(expected) {
            assert!((w - e).abs() < WEIGHT_TOLERANCE, "{weights:?}");
        }
        assert_eq!(r.middle_touches[0].campaign_id.as_deref(), Some("c1"));
        assert_eq!(r.last_touch_campaign.as_deref(), Some("c3"));
    }

    #[test]
    fn weights_sum_to_one_for_many_touches() {
        for n in 3..40 {
            let ts: Vec<Touchpoint> = (0..n)
                .map(|h| touch(TouchpointType::Sms, h, "c"))
                .collect();
            let refs: Vec<&Touchpoint> = ts.iter().collect();
            let r = attribute("txn-n", &refs, t0());
            assert!(check_weights(&r).is_ok(), "n = {n}");
        }
    }

    #[test]
    fn only_deterministic_earlier_touches_count() {
        let donated_at = t0() + Duration::hours(5);
        let before = touch(TouchpointType::Sms, 1, "a");
        let at_same_instant = touch(TouchpointType::Sms, 5, "b");
        let mut guessed = touch(TouchpointType::Email, 2, "c");
        guessed.link_method = LinkMethod::Probabilistic;
        let mut other_donor = touch(TouchpointType::Email, 3, "d");
        other_donor.donor_identity = "donor-2".into();

        let all = [before.clone(), at_same_instant, guessed, other_donor];
        let eligible = eligible_touches(all.iter(), "donor-1", donated_at);
        assert_eq!(eligible.len(), 1);
        assert_eq!(eligible[0].id, before.id);
    }

    #[test]
    fn recompute_is_identical() {
        let ts: Vec<Touchpoint> = (0..5)
            .map(|h| touch(TouchpointType::AdClick, h, "c"))
            .collect();
        let refs: Vec<&Touchpoint> = ts.iter().collect();
        let a = attribute("txn", &refs, t0());
        let b = attribute("txn", &refs, t0());
        assert_eq!(a, b);
    }
}

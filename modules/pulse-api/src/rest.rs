use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use pulse_common::{
    AlertStatus, Donation, ErrorClass, IdentityLink, LinkMethod, Mention, OrganizationProfile,
    PulseError, Touchpoint, TouchpointType, WatchlistEntry,
};
use pulse_engine::identity::{resolve_deterministic, resolve_donor};
use pulse_engine::trends::activity_cutoff;

use crate::AppState;

const DEFAULT_TRENDS_LIMIT: usize = 50;
const MAX_TRENDS_LIMIT: usize = 500;

// --- Request structs ---

#[derive(Deserialize)]
pub struct TouchpointRequest {
    donor_identity: Option<String>,
    /// Resolved through the identity links when `donor_identity` is absent.
    resolution_key: Option<String>,
    link_method: Option<LinkMethod>,
    touchpoint_type: TouchpointType,
    campaign_id: Option<String>,
    occurred_at: DateTime<Utc>,
}

#[derive(Deserialize)]
pub struct IdentityLinkRequest {
    resolution_key: String,
    donor_identity: String,
    method: LinkMethod,
    linked_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
pub struct DonationRequest {
    transaction_id: String,
    donor_identity: Option<String>,
    resolution_key: Option<String>,
    amount_cents: i64,
    donated_at: DateTime<Utc>,
}

#[derive(Deserialize)]
pub struct ProfileRequest {
    #[serde(default)]
    topics: Vec<String>,
}

#[derive(Deserialize)]
pub struct AlertStatusRequest {
    status: String,
}

#[derive(Deserialize)]
pub struct TrendsQuery {
    trending: Option<bool>,
    limit: Option<usize>,
}

// --- Helpers ---

fn bad_request(message: impl Into<String>) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({"error": message.into()})),
    )
        .into_response()
}

fn error_response(e: &PulseError, what: &str) -> Response {
    match (e, e.class()) {
        (PulseError::Unlinkable(_), _) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({"error": e.to_string()})),
        )
            .into_response(),
        (_, ErrorClass::DataQuality) => bad_request(e.to_string()),
        (_, ErrorClass::Transient) => {
            warn!(error = %e, "Store unavailable while trying to {what}");
            StatusCode::SERVICE_UNAVAILABLE.into_response()
        }
        _ => {
            warn!(error = %e, "Failed to {what}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

// --- Ingestion ---

pub async fn api_ingest_mention(
    State(state): State<Arc<AppState>>,
    Json(mention): Json<Mention>,
) -> impl IntoResponse {
    if let Err(e) = mention.validate() {
        return bad_request(e.to_string());
    }
    match state.store.upsert_mention(&mention).await {
        Ok(created) => {
            let status = if created {
                StatusCode::CREATED
            } else {
                StatusCode::OK
            };
            (status, Json(json!({"created": created}))).into_response()
        }
        Err(e) => error_response(&e, "ingest mention"),
    }
}

pub async fn api_append_touchpoint(
    State(state): State<Arc<AppState>>,
    Json(body): Json<TouchpointRequest>,
) -> impl IntoResponse {
    let (donor_identity, link_method) = match (
        body.donor_identity.filter(|d| !d.trim().is_empty()),
        body.link_method,
        body.resolution_key,
    ) {
        (Some(donor), Some(method), _) => (donor, method),
        (_, _, Some(key)) => match resolve_donor(state.store.as_ref(), &key).await {
            Ok(link) => (link.donor_identity, link.method),
            Err(e) => return error_response(&e, "resolve touchpoint identity"),
        },
        _ => {
            return bad_request(
                "either donor_identity with link_method, or resolution_key, is required",
            )
        }
    };

    let touchpoint = Touchpoint {
        id: Uuid::new_v4(),
        donor_identity,
        touchpoint_type: body.touchpoint_type,
        campaign_id: body.campaign_id,
        link_method,
        occurred_at: body.occurred_at,
    };
    match state.store.append_touchpoint(&touchpoint).await {
        Ok(()) => (StatusCode::CREATED, Json(json!({"id": touchpoint.id}))).into_response(),
        Err(e) => error_response(&e, "append touchpoint"),
    }
}

pub async fn api_link_identity(
    State(state): State<Arc<AppState>>,
    Json(body): Json<IdentityLinkRequest>,
) -> impl IntoResponse {
    if body.resolution_key.trim().is_empty() || body.donor_identity.trim().is_empty() {
        return bad_request("resolution_key and donor_identity must be non-empty");
    }
    let link = IdentityLink {
        resolution_key: body.resolution_key,
        donor_identity: body.donor_identity,
        method: body.method,
        linked_at: body.linked_at.unwrap_or_else(Utc::now),
    };
    match state.store.link_identity(&link).await {
        Ok(accepted) => {
            if !accepted {
                info!(
                    resolution_key = %link.resolution_key,
                    "Probabilistic link refused, a deterministic link exists"
                );
            }
            Json(json!({"accepted": accepted})).into_response()
        }
        Err(e) => error_response(&e, "link identity"),
    }
}

pub async fn api_record_donation(
    State(state): State<Arc<AppState>>,
    Json(body): Json<DonationRequest>,
) -> impl IntoResponse {
    if body.transaction_id.trim().is_empty() {
        return bad_request("transaction_id must be non-empty");
    }
    if body.amount_cents < 0 {
        return bad_request("amount_cents must not be negative");
    }

    let donor_identity = match (body.donor_identity, body.resolution_key) {
        (Some(donor), _) if !donor.trim().is_empty() => Some(donor),
        (_, Some(key)) => match resolve_deterministic(state.store.as_ref(), &key).await {
            Ok(link) => Some(link.donor_identity),
            Err(PulseError::Unlinkable(_)) => {
                debug!(transaction_id = %body.transaction_id, "Donation not linkable, will be attributed as organic");
                None
            }
            Err(e) => return error_response(&e, "resolve donor identity"),
        },
        _ => None,
    };

    let donation = Donation {
        transaction_id: body.transaction_id,
        donor_identity,
        amount_cents: body.amount_cents,
        donated_at: body.donated_at,
    };
    match state.store.record_donation(&donation).await {
        Ok(()) => (
            StatusCode::CREATED,
            Json(json!({
                "transaction_id": donation.transaction_id,
                "linked": donation.donor_identity.is_some(),
            })),
        )
            .into_response(),
        Err(e) => error_response(&e, "record donation"),
    }
}

// --- Watchlists ---

pub async fn api_upsert_watchlist_entry(
    State(state): State<Arc<AppState>>,
    Json(entry): Json<WatchlistEntry>,
) -> impl IntoResponse {
    if let Err(e) = entry.validate() {
        return bad_request(e.to_string());
    }
    match state.store.upsert_watchlist_entry(&entry).await {
        Ok(()) => Json(entry).into_response(),
        Err(e) => error_response(&e, "save watchlist entry"),
    }
}

pub async fn api_deactivate_watchlist_entry(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    match state.store.deactivate_watchlist_entry(id).await {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => error_response(&e, "deactivate watchlist entry"),
    }
}

pub async fn api_upsert_organization_profile(
    State(state): State<Arc<AppState>>,
    Path(organization_id): Path<Uuid>,
    Json(body): Json<ProfileRequest>,
) -> impl IntoResponse {
    let profile = OrganizationProfile {
        organization_id,
        topics: body
            .topics
            .into_iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect(),
    };
    match state.store.upsert_organization_profile(&profile).await {
        Ok(()) => Json(profile).into_response(),
        Err(e) => error_response(&e, "save organization profile"),
    }
}

// --- Queries ---

pub async fn api_trends(
    State(state): State<Arc<AppState>>,
    Query(params): Query<TrendsQuery>,
) -> impl IntoResponse {
    let limit = params
        .limit
        .unwrap_or(DEFAULT_TRENDS_LIMIT)
        .min(MAX_TRENDS_LIMIT);
    // A trending flag is only current while the aggregator still refreshes the row.
    let trending = params.trending.unwrap_or(false);
    let since = trending.then(|| activity_cutoff(Utc::now()));
    match state.store.list_trends(trending, since, limit).await
    {
        Ok(trends) => Json(trends).into_response(),
        Err(e) => error_response(&e, "load trends"),
    }
}

pub async fn api_unread_alerts(
    State(state): State<Arc<AppState>>,
    Path(organization_id): Path<Uuid>,
) -> impl IntoResponse {
    match state.store.unread_alerts(organization_id).await {
        Ok(alerts) => Json(alerts).into_response(),
        Err(e) => error_response(&e, "load alerts"),
    }
}

pub async fn api_set_alert_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(body): Json<AlertStatusRequest>,
) -> impl IntoResponse {
    let status = match AlertStatus::parse(body.status.trim()) {
        Some(s @ (AlertStatus::Read | AlertStatus::Dismissed)) => s,
        _ => return bad_request("status must be 'read' or 'dismissed'"),
    };
    match state.store.set_alert_status(id, status).await {
        Ok(true) => Json(json!({"id": id, "status": status})).into_response(),
        Ok(false) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => error_response(&e, "update alert status"),
    }
}

pub async fn api_attribution(
    State(state): State<Arc<AppState>>,
    Path(transaction_id): Path<String>,
) -> impl IntoResponse {
    match state.store.get_attribution(&transaction_id).await {
        Ok(Some(record)) => Json(record).into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => error_response(&e, "load attribution"),
    }
}

pub async fn api_jobs(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.store.all_job_health().await {
        Ok(health) => Json(health).into_response(),
        Err(e) => error_response(&e, "load job health"),
    }
}

//! HTTP surface tests against the in-memory store.

use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use chrono::{Duration, Utc};
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use pulse_api::{router, AppState};
use pulse_common::{
    Alert, AlertStatus, AlertType, AlertWrite, AttributionRecord, EntityTrend, EntityType,
    IdentityLink, LinkMethod,
};
use pulse_store::{
    AlertStore, AttributionStore, DonationStore, MemoryStore, TouchpointStore, TrendStore,
    WatchlistStore,
};

fn app(store: &Arc<MemoryStore>) -> Router {
    router(Arc::new(AppState {
        store: store.clone(),
    }))
}

async fn send(app: Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(b) => builder
            .header("content-type", "application/json")
            .body(Body::from(b.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

fn mention_body(source_id: &str, sentiment: f64) -> Value {
    json!({
        "entity_name": "Gaza",
        "entity_type": "location",
        "source_type": "news",
        "source_id": source_id,
        "mentioned_at": Utc::now(),
        "sentiment": sentiment,
    })
}

#[tokio::test]
async fn mention_ingest_is_deduplicated() {
    let store = Arc::new(MemoryStore::new());

    let (status, body) = send(app(&store), "POST", "/api/mentions", Some(mention_body("a-1", 0.2))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["created"], true);

    let (status, body) = send(app(&store), "POST", "/api/mentions", Some(mention_body("a-1", -0.4))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["created"], false);
    assert_eq!(store.mention_count(), 1);
}

#[tokio::test]
async fn invalid_mention_is_rejected() {
    let store = Arc::new(MemoryStore::new());

    let (status, body) = send(app(&store), "POST", "/api/mentions", Some(mention_body("a-1", 1.5))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("sentiment"));

    let mut blank = mention_body("a-2", 0.0);
    blank["entity_name"] = json!("  ");
    let (status, _) = send(app(&store), "POST", "/api/mentions", Some(blank)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(store.mention_count(), 0);
}

#[tokio::test]
async fn touchpoint_resolves_through_identity_link() {
    let store = Arc::new(MemoryStore::new());

    let (status, body) = send(
        app(&store),
        "POST",
        "/api/identity-links",
        Some(json!({"resolution_key": "rc:spring", "donor_identity": "donor-7", "method": "refcode"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["accepted"], true);

    let (status, _) = send(
        app(&store),
        "POST",
        "/api/touchpoints",
        Some(json!({
            "resolution_key": "rc:spring",
            "touchpoint_type": "email",
            "campaign_id": "spring-appeal",
            "occurred_at": Utc::now() - Duration::hours(2),
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let touches = store
        .touchpoints_for_donors(&["donor-7".to_string()], Utc::now())
        .await
        .unwrap();
    assert_eq!(touches.len(), 1);
    assert_eq!(touches[0].link_method, LinkMethod::Refcode);
}

#[tokio::test]
async fn touchpoint_with_unknown_key_is_unprocessable() {
    let store = Arc::new(MemoryStore::new());
    let (status, _) = send(
        app(&store),
        "POST",
        "/api/touchpoints",
        Some(json!({
            "resolution_key": "rc:unknown",
            "touchpoint_type": "sms",
            "occurred_at": Utc::now(),
        })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn probabilistic_link_does_not_replace_deterministic() {
    let store = Arc::new(MemoryStore::new());
    store
        .link_identity(&IdentityLink {
            resolution_key: "phone:ab12".into(),
            donor_identity: "donor-1".into(),
            method: LinkMethod::PhoneHash,
            linked_at: Utc::now(),
        })
        .await
        .unwrap();

    let (status, body) = send(
        app(&store),
        "POST",
        "/api/identity-links",
        Some(json!({"resolution_key": "phone:ab12", "donor_identity": "donor-2", "method": "probabilistic"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["accepted"], false);
    let link = store.resolve_identity("phone:ab12").await.unwrap().unwrap();
    assert_eq!(link.donor_identity, "donor-1");
}

#[tokio::test]
async fn donation_with_unlinkable_key_is_recorded_unlinked() {
    let store = Arc::new(MemoryStore::new());
    let (status, body) = send(
        app(&store),
        "POST",
        "/api/donations",
        Some(json!({
            "transaction_id": "txn-1",
            "resolution_key": "rc:nobody",
            "amount_cents": 1500,
            "donated_at": Utc::now(),
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["linked"], false);

    let pending = store.pending_donations(10).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].donor_identity, None);

    let (status, _) = send(
        app(&store),
        "POST",
        "/api/donations",
        Some(json!({"transaction_id": "txn-2", "amount_cents": -5, "donated_at": Utc::now()})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn alert_status_can_be_marked_read() {
    let store = Arc::new(MemoryStore::new());
    let org = Uuid::new_v4();
    let now = Utc::now();
    let alert = Alert {
        id: Uuid::new_v4(),
        organization_id: org,
        watchlist_entry_id: Uuid::new_v4(),
        entity_name: "CAIR".into(),
        entity_type: EntityType::Organization,
        alert_type: AlertType::Trending,
        actionable_score: 62.5,
        velocity: 80.0,
        current_mentions: 12,
        sample_sources: vec!["a-1".into()],
        day: now.date_naive(),
        created_at: now,
        updated_at: now,
        status: AlertStatus::Unread,
    };
    assert_eq!(store.upsert_alert(&alert).await.unwrap(), AlertWrite::Created);

    let (status, body) = send(app(&store), "GET", &format!("/api/organizations/{org}/alerts"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);

    let uri = format!("/api/alerts/{}/status", alert.id);
    let (status, _) = send(app(&store), "POST", &uri, Some(json!({"status": "unread"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, body) = send(app(&store), "POST", &uri, Some(json!({"status": "read"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "read");

    let (_, body) = send(app(&store), "GET", &format!("/api/organizations/{org}/alerts"), None).await;
    assert!(body.as_array().unwrap().is_empty());

    let missing = format!("/api/alerts/{}/status", Uuid::new_v4());
    let (status, _) = send(app(&store), "POST", &missing, Some(json!({"status": "dismissed"}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn attribution_lookup_returns_record_or_404() {
    let store = Arc::new(MemoryStore::new());
    let (status, _) = send(app(&store), "GET", "/api/attributions/txn-9", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    store
        .upsert_attribution(&AttributionRecord {
            transaction_id: "txn-9".into(),
            is_organic: true,
            touch_count: 0,
            first_touch_channel: "direct".into(),
            first_touch_campaign: None,
            first_touch_weight: 1.0,
            middle_touches: vec![],
            middle_touches_weight: 0.0,
            last_touch_channel: "direct".into(),
            last_touch_campaign: None,
            last_touch_weight: 0.0,
            attributed_at: Utc::now(),
        })
        .await
        .unwrap();
    let (status, body) = send(app(&store), "GET", "/api/attributions/txn-9", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["is_organic"], true);
    assert_eq!(body["first_touch_channel"], "direct");
}

#[tokio::test]
async fn watchlist_entry_is_validated_and_deactivated() {
    let store = Arc::new(MemoryStore::new());
    let id = Uuid::new_v4();
    let entry = json!({
        "id": id,
        "organization_id": Uuid::new_v4(),
        "entity_name": "CAIR",
        "entity_type": null,
        "aliases": ["Council on American-Islamic Relations"],
        "alert_threshold": 40.0,
        "is_active": true,
    });

    let mut bad = entry.clone();
    bad["alert_threshold"] = json!(140.0);
    let (status, _) = send(app(&store), "POST", "/api/watchlist", Some(bad)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(app(&store), "POST", "/api/watchlist", Some(entry)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(store.active_watchlist().await.unwrap().len(), 1);

    let (status, _) = send(app(&store), "POST", &format!("/api/watchlist/{id}/deactivate"), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(store.active_watchlist().await.unwrap().is_empty());
}

#[tokio::test]
async fn trends_and_jobs_are_listed() {
    let store = Arc::new(MemoryStore::new());
    let (status, body) = send(app(&store), "GET", "/api/trends?trending=true&limit=5", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.as_array().unwrap().is_empty());

    let (status, body) = send(app(&store), "GET", "/api/jobs", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.is_array());
}

#[tokio::test]
async fn trending_listing_leaves_out_rows_no_longer_refreshed() {
    let store = Arc::new(MemoryStore::new());
    let stale = EntityTrend {
        entity_name: "Gaza".into(),
        entity_type: EntityType::Location,
        mentions_1h: 2,
        mentions_6h: 6,
        mentions_24h: 6,
        mentions_7d: 6,
        velocity: 500.0,
        momentum: 0.0,
        previous_velocity: 0.0,
        is_trending: true,
        sentiment_avg: 0.0,
        sentiment_change: 0.0,
        calculated_at: Utc::now() - Duration::days(2),
    };
    assert!(store.upsert_trend(&stale).await.unwrap());

    let (status, body) = send(app(&store), "GET", "/api/trends?trending=true", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.as_array().unwrap().is_empty());

    let (_, body) = send(app(&store), "GET", "/api/trends", None).await;
    assert_eq!(body.as_array().unwrap().len(), 1);
    assert_eq!(body[0]["entity_name"], "Gaza");
}

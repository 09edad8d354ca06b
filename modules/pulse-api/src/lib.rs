use std::sync::Arc;

use axum::{
    http::{header, HeaderValue},
    routing::{get, post},
    Router,
};
use tower_http::set_header::SetResponseHeaderLayer;

use pulse_store::Store;

pub mod rest;

pub struct AppState {
    pub store: Arc<dyn Store>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health check
        .route("/", get(|| async { "ok" }))
        // Ingestion
        .route("/api/mentions", post(rest::api_ingest_mention))
        .route("/api/touchpoints", post(rest::api_append_touchpoint))
        .route("/api/identity-links", post(rest::api_link_identity))
        .route("/api/donations", post(rest::api_record_donation))
        // Watchlists
        .route("/api/watchlist", post(rest::api_upsert_watchlist_entry))
        .route(
            "/api/watchlist/{id}/deactivate",
            post(rest::api_deactivate_watchlist_entry),
        )
        .route(
            "/api/organizations/{id}/profile",
            post(rest::api_upsert_organization_profile),
        )
        // Queries
        .route("/api/trends", get(rest::api_trends))
        .route("/api/organizations/{id}/alerts", get(rest::api_unread_alerts))
        .route("/api/alerts/{id}/status", post(rest::api_set_alert_status))
        .route(
            "/api/attributions/{transaction_id}",
            get(rest::api_attribution),
        )
        .route("/api/jobs", get(rest::api_jobs))
        .with_state(state)
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        ))
        // Method and path only; query strings may carry donor identifiers
        .layer(
            tower_http::trace::TraceLayer::new_for_http().make_span_with(
                |request: &axum::http::Request<_>| {
                    tracing::info_span!(
                        "http_request",
                        method = %request.method(),
                        path = %request.uri().path(),
                    )
                },
            ),
        )
}

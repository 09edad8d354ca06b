use sqlx::PgPool;
use tracing::info;

use pulse_common::Result;

use crate::postgres::db_err;

/// Idempotent schema setup. Safe to run at every startup.
const SCHEMA: &[&str] = &[
    // Append-only mention log, deduplicated on the source item.
    r#"
    CREATE TABLE IF NOT EXISTS mentions (
        entity_name   TEXT             NOT NULL,
        entity_type   TEXT             NOT NULL,
        source_type   TEXT             NOT NULL,
        source_id     TEXT             NOT NULL,
        mentioned_at  TIMESTAMPTZ      NOT NULL,
        sentiment     DOUBLE PRECISION NOT NULL CHECK (sentiment BETWEEN -1 AND 1),
        ingested_at   TIMESTAMPTZ      NOT NULL DEFAULT now(),
        PRIMARY KEY (entity_name, source_id, source_type)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS mentions_recent_idx ON mentions (mentioned_at)",
    "CREATE INDEX IF NOT EXISTS mentions_entity_idx ON mentions (entity_name, entity_type, mentioned_at)",
    r#"
    CREATE TABLE IF NOT EXISTS entity_trends (
        entity_name        TEXT             NOT NULL,
        entity_type        TEXT             NOT NULL,
        mentions_1h        BIGINT           NOT NULL,
        mentions_6h        BIGINT           NOT NULL,
        mentions_24h       BIGINT           NOT NULL,
        mentions_7d        BIGINT           NOT NULL,
        velocity           DOUBLE PRECISION NOT NULL,
        momentum           DOUBLE PRECISION NOT NULL DEFAULT 0,
        previous_velocity  DOUBLE PRECISION NOT NULL DEFAULT 0,
        is_trending        BOOLEAN          NOT NULL,
        sentiment_avg      DOUBLE PRECISION NOT NULL,
        sentiment_change   DOUBLE PRECISION NOT NULL,
        calculated_at      TIMESTAMPTZ      NOT NULL,
        PRIMARY KEY (entity_name, entity_type)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS entity_trends_trending_idx ON entity_trends (is_trending, momentum DESC)",
    r#"
    CREATE TABLE IF NOT EXISTS anomalies (
        entity_name     TEXT             NOT NULL,
        entity_type     TEXT             NOT NULL,
        anomaly_type    TEXT             NOT NULL,
        day             DATE             NOT NULL,
        z_score         DOUBLE PRECISION,
        current_value   DOUBLE PRECISION NOT NULL,
        baseline_value  DOUBLE PRECISION NOT NULL,
        severity        TEXT             NOT NULL,
        detected_at     TIMESTAMPTZ      NOT NULL,
        PRIMARY KEY (entity_name, entity_type, anomaly_type, day)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS watchlist_entries (
        id               UUID             PRIMARY KEY,
        organization_id  UUID             NOT NULL,
        entity_name      TEXT             NOT NULL,
        entity_type      TEXT,
        aliases          TEXT[]           NOT NULL DEFAULT '{}',
        alert_threshold  DOUBLE PRECISION NOT NULL,
        sentiment_alert  BOOLEAN          NOT NULL DEFAULT false,
        is_active        BOOLEAN          NOT NULL DEFAULT true,
        updated_at       TIMESTAMPTZ      NOT NULL DEFAULT now()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS watchlist_entries_org_idx ON watchlist_entries (organization_id) WHERE is_active",
    r#"
    CREATE TABLE IF NOT EXISTS organization_profiles (
        organization_id  UUID    PRIMARY KEY,
        topics           TEXT[]  NOT NULL DEFAULT '{}'
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS alerts (
        id                  UUID             PRIMARY KEY,
        organization_id     UUID             NOT NULL,
        watchlist_entry_id  UUID             NOT NULL REFERENCES watchlist_entries(id),
        entity_name         TEXT             NOT NULL,
        entity_type         TEXT             NOT NULL,
        alert_type          TEXT             NOT NULL,
        actionable_score    DOUBLE PRECISION NOT NULL,
        velocity            DOUBLE PRECISION NOT NULL,
        current_mentions    BIGINT           NOT NULL,
        sample_sources      TEXT[]           NOT NULL DEFAULT '{}',
        day                 DATE             NOT NULL,
        created_at          TIMESTAMPTZ      NOT NULL,
        updated_at          TIMESTAMPTZ      NOT NULL,
        status              TEXT             NOT NULL DEFAULT 'unread',
        UNIQUE (organization_id, entity_name, day)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS alerts_unread_idx ON alerts (organization_id) WHERE status = 'unread'",
    r#"
    CREATE TABLE IF NOT EXISTS touchpoints (
        id               UUID         PRIMARY KEY,
        donor_identity   TEXT         NOT NULL,
        touchpoint_type  TEXT         NOT NULL,
        campaign_id      TEXT,
        link_method      TEXT         NOT NULL,
        occurred_at      TIMESTAMPTZ  NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS touchpoints_donor_idx ON touchpoints (donor_identity, occurred_at)",
    r#"
    CREATE TABLE IF NOT EXISTS identity_links (
        resolution_key  TEXT         PRIMARY KEY,
        donor_identity  TEXT         NOT NULL,
        method          TEXT         NOT NULL,
        linked_at       TIMESTAMPTZ  NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS donations (
        transaction_id  TEXT         PRIMARY KEY,
        donor_identity  TEXT,
        amount_cents    BIGINT       NOT NULL,
        donated_at      TIMESTAMPTZ  NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS attribution_records (
        transaction_id         TEXT             PRIMARY KEY,
        is_organic             BOOLEAN          NOT NULL,
        touch_count            BIGINT           NOT NULL,
        first_touch_channel    TEXT             NOT NULL,
        first_touch_campaign   TEXT,
        first_touch_weight     DOUBLE PRECISION NOT NULL,
        middle_touches         JSONB            NOT NULL DEFAULT '[]',
        middle_touches_weight  DOUBLE PRECISION NOT NULL,
        last_touch_channel     TEXT             NOT NULL,
        last_touch_campaign    TEXT,
        last_touch_weight      DOUBLE PRECISION NOT NULL,
        attributed_at          TIMESTAMPTZ      NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS job_leases (
        job_type     TEXT         PRIMARY KEY,
        holder       UUID         NOT NULL,
        acquired_at  TIMESTAMPTZ  NOT NULL,
        expires_at   TIMESTAMPTZ  NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS job_health (
        job_type              TEXT         PRIMARY KEY,
        consecutive_failures  BIGINT       NOT NULL DEFAULT 0,
        disabled              BOOLEAN      NOT NULL DEFAULT false,
        last_run_at           TIMESTAMPTZ,
        last_summary          JSONB
    )
    "#,
];

pub async fn migrate(pool: &PgPool) -> Result<()> {
    info!("Running pulse schema migrations...");
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await.map_err(db_err)?;
    }
    info!(statements = SCHEMA.len(), "Schema migrations complete");
    Ok(())
}

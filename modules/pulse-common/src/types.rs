use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{PulseError, Result};

// --- Mentions ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Person,
    Organization,
    Topic,
    Location,
    Legislation,
    Event,
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityType::Person => write!(f, "person"),
            EntityType::Organization => write!(f, "organization"),
            EntityType::Topic => write!(f, "topic"),
            EntityType::Location => write!(f, "location"),
            EntityType::Legislation => write!(f, "legislation"),
            EntityType::Event => write!(f, "event"),
        }
    }
}

impl EntityType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "person" => Some(Self::Person),
            "organization" | "org" => Some(Self::Organization),
            "topic" => Some(Self::Topic),
            "location" | "place" => Some(Self::Location),
            "legislation" | "bill" => Some(Self::Legislation),
            "event" => Some(Self::Event),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    News,
    Social,
    Legislative,
    Rss,
    Other,
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceType::News => write!(f, "news"),
            SourceType::Social => write!(f, "social"),
            SourceType::Legislative => write!(f, "legislative"),
            SourceType::Rss => write!(f, "rss"),
            SourceType::Other => write!(f, "other"),
        }
    }
}

impl SourceType {
    pub fn from_str_loose(s: &str) -> Self {
        match s {
            "news" | "article" => Self::News,
            "social" | "bluesky" | "twitter" | "reddit" => Self::Social,
            "legislative" | "bill" => Self::Legislative,
            "rss" | "feed" => Self::Rss,
            _ => Self::Other,
        }
    }
}

/// One observed occurrence of an entity in a content item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mention {
    pub entity_name: String,
    pub entity_type: EntityType,
    pub source_type: SourceType,
    pub source_id: String,
    pub mentioned_at: DateTime<Utc>,
    /// In [-1, 1].
    pub sentiment: f64,
}

impl Mention {
    pub fn key(&self) -> EntityKey {
        EntityKey::new(&self.entity_name, self.entity_type)
    }

    /// Natural identity of a mention. Re-ingesting the same source item updates in place.
    pub fn dedup_key(&self) -> (String, String, SourceType) {
        (
            self.entity_name.clone(),
            self.source_id.clone(),
            self.source_type,
        )
    }

    pub fn validate(&self) -> Result<()> {
        if self.entity_name.trim().is_empty() {
            return Err(PulseError::InvalidRecord("mention has empty entity_name".into()));
        }
        if self.source_id.trim().is_empty() {
            return Err(PulseError::InvalidRecord(format!(
                "mention of '{}' has empty source_id",
                self.entity_name
            )));
        }
        if !self.sentiment.is_finite() || !(-1.0..=1.0).contains(&self.sentiment) {
            return Err(PulseError::InvalidRecord(format!(
                "mention of '{}' from {} has sentiment {} outside [-1, 1]",
                self.entity_name, self.source_id, self.sentiment
            )));
        }
        Ok(())
    }
}

/// `(entity_name, entity_type)`: the identity of a tracked entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityKey {
    pub entity_name: String,
    pub entity_type: EntityType,
}

impl EntityKey {
    pub fn new(entity_name: &str, entity_type: EntityType) -> Self {
        Self {
            entity_name: entity_name.to_string(),
            entity_type,
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.entity_name, self.entity_type)
    }
}

/// An entity seen in the activity window, with its mention count there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityActivity {
    pub key: EntityKey,
    pub mentions: u32,
}

// --- Trends ---

/// Mention counts over the trailing trend windows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowCounts {
    pub mentions_1h: u32,
    pub mentions_6h: u32,
    pub mentions_24h: u32,
    pub mentions_7d: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityTrend {
    pub entity_name: String,
    pub entity_type: EntityType,
    pub mentions_1h: u32,
    pub mentions_6h: u32,
    pub mentions_24h: u32,
    pub mentions_7d: u32,
    /// Percent change of the 6h hourly rate against the 24h hourly rate.
    pub velocity: f64,
    /// Change in velocity since the last run that saw different counts.
    pub momentum: f64,
    pub previous_velocity: f64,
    pub is_trending: bool,
    pub sentiment_avg: f64,
    pub sentiment_change: f64,
    pub calculated_at: DateTime<Utc>,
}

impl EntityTrend {
    pub fn key(&self) -> EntityKey {
        EntityKey::new(&self.entity_name, self.entity_type)
    }

    pub fn counts(&self) -> WindowCounts {
        WindowCounts {
            mentions_1h: self.mentions_1h,
            mentions_6h: self.mentions_6h,
            mentions_24h: self.mentions_24h,
            mentions_7d: self.mentions_7d,
        }
    }
}

// --- Anomalies ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyType {
    VelocitySpike,
    SentimentShift,
    MentionSpike,
}

impl fmt::Display for AnomalyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnomalyType::VelocitySpike => write!(f, "velocity_spike"),
            AnomalyType::SentimentShift => write!(f, "sentiment_shift"),
            AnomalyType::MentionSpike => write!(f, "mention_spike"),
        }
    }
}

impl AnomalyType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "velocity_spike" => Some(Self::VelocitySpike),
            "sentiment_shift" => Some(Self::SentimentShift),
            "mention_spike" => Some(Self::MentionSpike),
            _ => None,
        }
    }
}

/// Ordered: `Medium < High < Critical`. Medium is recorded but never surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Medium => write!(f, "medium"),
            Severity::High => write!(f, "high"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

impl Severity {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }

    pub fn is_surfaced(&self) -> bool {
        *self >= Severity::High
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anomaly {
    pub entity_name: String,
    pub entity_type: EntityType,
    pub anomaly_type: AnomalyType,
    /// `None` when the baseline had zero variance.
    pub z_score: Option<f64>,
    pub current_value: f64,
    pub baseline_value: f64,
    pub severity: Severity,
    /// UTC day the anomaly was detected on. Part of the upsert key.
    pub day: NaiveDate,
    pub detected_at: DateTime<Utc>,
}

impl Anomaly {
    pub fn key(&self) -> EntityKey {
        EntityKey::new(&self.entity_name, self.entity_type)
    }
}

// --- Watchlists ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchlistEntry {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub entity_name: String,
    /// When set, only entities of this type match.
    pub entity_type: Option<EntityType>,
    #[serde(default)]
    pub aliases: Vec<String>,
    /// Actionable score (0–100) an entity must exceed before an alert is created.
    pub alert_threshold: f64,
    #[serde(default)]
    pub sentiment_alert: bool,
    pub is_active: bool,
}

impl WatchlistEntry {
    pub fn validate(&self) -> Result<()> {
        if self.entity_name.trim().is_empty() {
            return Err(PulseError::InvalidRecord(format!(
                "watchlist entry {} has empty entity_name",
                self.id
            )));
        }
        if !self.alert_threshold.is_finite() || !(0.0..=100.0).contains(&self.alert_threshold) {
            return Err(PulseError::InvalidRecord(format!(
                "watchlist entry {} has alert_threshold {} outside [0, 100]",
                self.id, self.alert_threshold
            )));
        }
        Ok(())
    }

    /// The entity name followed by every non-blank alias.
    pub fn search_terms(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.entity_name.as_str())
            .chain(self.aliases.iter().map(String::as_str))
            .filter(|t| !t.trim().is_empty())
    }
}

/// Declared mission topics of an organization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrganizationProfile {
    pub organization_id: Uuid,
    #[serde(default)]
    pub topics: Vec<String>,
}

// --- Alerts ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    Spike,
    Breaking,
    SentimentShift,
    TrendingSpike,
    VolumeSpike,
    Trending,
}

impl fmt::Display for AlertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertType::Spike => write!(f, "spike"),
            AlertType::Breaking => write!(f, "breaking"),
            AlertType::SentimentShift => write!(f, "sentiment_shift"),
            AlertType::TrendingSpike => write!(f, "trending_spike"),
            AlertType::VolumeSpike => write!(f, "volume_spike"),
            AlertType::Trending => write!(f, "trending"),
        }
    }
}

impl AlertType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "spike" => Some(Self::Spike),
            "breaking" => Some(Self::Breaking),
            "sentiment_shift" => Some(Self::SentimentShift),
            "trending_spike" => Some(Self::TrendingSpike),
            "volume_spike" => Some(Self::VolumeSpike),
            "trending" => Some(Self::Trending),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    Unread,
    Read,
    Dismissed,
}

impl fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertStatus::Unread => write!(f, "unread"),
            AlertStatus::Read => write!(f, "read"),
            AlertStatus::Dismissed => write!(f, "dismissed"),
        }
    }
}

impl AlertStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "unread" => Some(Self::Unread),
            "read" => Some(Self::Read),
            "dismissed" => Some(Self::Dismissed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub watchlist_entry_id: Uuid,
    pub entity_name: String,
    pub entity_type: EntityType,
    pub alert_type: AlertType,
    pub actionable_score: f64,
    pub velocity: f64,
    pub current_mentions: u32,
    pub sample_sources: Vec<String>,
    /// Dedup bucket: one alert per `(organization_id, entity_name, day)`.
    pub day: NaiveDate,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub status: AlertStatus,
}

impl Alert {
    pub fn bucket(&self) -> AlertBucket {
        AlertBucket {
            organization_id: self.organization_id,
            entity_name: self.entity_name.clone(),
            day: self.day,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AlertBucket {
    pub organization_id: Uuid,
    pub entity_name: String,
    pub day: NaiveDate,
}

/// Whether an alert upsert inserted a new row or refreshed the bucket's row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertWrite {
    Created,
    Updated,
}

/// Past alert outcomes for one organization and entity type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResponseCounts {
    pub read: u32,
    pub dismissed: u32,
    pub unread: u32,
}

// --- Touchpoints & identity ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TouchpointType {
    AdClick,
    Sms,
    Email,
    Organic,
}

impl fmt::Display for TouchpointType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TouchpointType::AdClick => write!(f, "ad_click"),
            TouchpointType::Sms => write!(f, "sms"),
            TouchpointType::Email => write!(f, "email"),
            TouchpointType::Organic => write!(f, "organic"),
        }
    }
}

impl TouchpointType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ad_click" => Some(Self::AdClick),
            "sms" => Some(Self::Sms),
            "email" => Some(Self::Email),
            "organic" => Some(Self::Organic),
            _ => None,
        }
    }
}

/// How a touchpoint or resolution key was tied to a donor identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkMethod {
    Refcode,
    ClickId,
    PhoneHash,
    Probabilistic,
}

impl fmt::Display for LinkMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkMethod::Refcode => write!(f, "refcode"),
            LinkMethod::ClickId => write!(f, "click_id"),
            LinkMethod::PhoneHash => write!(f, "phone_hash"),
            LinkMethod::Probabilistic => write!(f, "probabilistic"),
        }
    }
}

impl LinkMethod {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "refcode" => Some(Self::Refcode),
            "click_id" => Some(Self::ClickId),
            "phone_hash" => Some(Self::PhoneHash),
            "probabilistic" => Some(Self::Probabilistic),
            _ => None,
        }
    }

    pub fn is_deterministic(&self) -> bool {
        !matches!(self, LinkMethod::Probabilistic)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Touchpoint {
    pub id: Uuid,
    pub donor_identity: String,
    pub touchpoint_type: TouchpointType,
    pub campaign_id: Option<String>,
    pub link_method: LinkMethod,
    pub occurred_at: DateTime<Utc>,
}

impl Touchpoint {
    pub fn channel(&self) -> String {
        self.touchpoint_type.to_string()
    }
}

/// Resolution key (refcode, click id, phone hash) → donor identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityLink {
    pub resolution_key: String,
    pub donor_identity: String,
    pub method: LinkMethod,
    pub linked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Donation {
    pub transaction_id: String,
    /// `None` when the donation could not be tied to any donor identity.
    pub donor_identity: Option<String>,
    pub amount_cents: i64,
    pub donated_at: DateTime<Utc>,
}

// --- Attribution ---

/// Channel credited when a donation has no preceding touchpoints.
pub const DIRECT_CHANNEL: &str = "direct";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TouchCredit {
    pub channel: String,
    pub campaign_id: Option<String>,
    pub weight: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributionRecord {
    pub transaction_id: String,
    pub is_organic: bool,
    pub touch_count: u32,
    pub first_touch_channel: String,
    pub first_touch_campaign: Option<String>,
    pub first_touch_weight: f64,
    pub middle_touches: Vec<TouchCredit>,
    pub middle_touches_weight: f64,
    pub last_touch_channel: String,
    pub last_touch_campaign: Option<String>,
    /// Zero when first and last are the same single touch; its full credit is on the first-touch weight.
    pub last_touch_weight: f64,
    pub attributed_at: DateTime<Utc>,
}

impl AttributionRecord {
    pub fn total_weight(&self) -> f64 {
        self.first_touch_weight + self.middle_touches_weight + self.last_touch_weight
    }

    /// One credit per distinct touch, in time order.
    pub fn credits(&self) -> Vec<TouchCredit> {
        let mut out = vec![TouchCredit {
            channel: self.first_touch_channel.clone(),
            campaign_id: self.first_touch_campaign.clone(),
            weight: self.first_touch_weight,
        }];
        if self.touch_count <= 1 {
            return out;
        }
        out.extend(self.middle_touches.iter().cloned());
        out.push(TouchCredit {
            channel: self.last_touch_channel.clone(),
            campaign_id: self.last_touch_campaign.clone(),
            weight: self.last_touch_weight,
        });
        out
    }
}

// --- Jobs ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    TrendAggregation,
    AnomalyDetection,
    WatchlistMatching,
    Attribution,
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobType::TrendAggregation => write!(f, "trend_aggregation"),
            JobType::AnomalyDetection => write!(f, "anomaly_detection"),
            JobType::WatchlistMatching => write!(f, "watchlist_matching"),
            JobType::Attribution => write!(f, "attribution"),
        }
    }
}

impl JobType {
    pub const ALL: [JobType; 4] = [
        JobType::TrendAggregation,
        JobType::AnomalyDetection,
        JobType::WatchlistMatching,
        JobType::Attribution,
    ];

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "trend_aggregation" | "trends" => Some(Self::TrendAggregation),
            "anomaly_detection" | "anomalies" => Some(Self::AnomalyDetection),
            "watchlist_matching" | "match" => Some(Self::WatchlistMatching),
            "attribution" | "attribute" => Some(Self::Attribution),
            _ => None,
        }
    }
}

/// At-most-one-run record for a job type. Expired leases may be taken over.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobLease {
    pub job_type: JobType,
    pub holder: Uuid,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobHealth {
    pub job_type: JobType,
    pub consecutive_failures: u32,
    pub disabled: bool,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_summary: Option<RunSummary>,
}

const MAX_SUMMARY_NOTES: usize = 20;

/// Counts from one batch run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub job: JobType,
    pub processed: u32,
    pub skipped: u32,
    pub deferred: u32,
    pub errored: u32,
    /// The run stopped at its time budget; remaining items wait for the next run.
    pub truncated: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub notes: Vec<String>,
}

impl RunSummary {
    pub fn new(job: JobType, started_at: DateTime<Utc>) -> Self {
        Self {
            job,
            processed: 0,
            skipped: 0,
            deferred: 0,
            errored: 0,
            truncated: false,
            started_at,
            finished_at: None,
            notes: Vec::new(),
        }
    }

    pub fn note(&mut self, note: impl Into<String>) {
        if self.notes.len() < MAX_SUMMARY_NOTES {
            self.notes.push(note.into());
        }
    }

    pub fn attempted(&self) -> u32 {
        self.processed + self.skipped + self.deferred + self.errored
    }

    /// Every attempted item failed (errored or deferred).
    pub fn all_failed(&self) -> bool {
        self.attempted() > 0 && self.processed == 0 && self.skipped == 0
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "\n=== {} run complete ===", self.job)?;
        writeln!(f, "Processed: {}", self.processed)?;
        writeln!(f, "Skipped:   {}", self.skipped)?;
        writeln!(f, "Deferred:  {}", self.deferred)?;
        writeln!(f, "Errored:   {}", self.errored)?;
        if self.truncated {
            writeln!(f, "Stopped at time budget; next run continues")?;
        }
        for note in &self.notes {
            writeln!(f, "  - {note}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn mention(sentiment: f64) -> Mention {
        Mention {
            entity_name: "Gaza".into(),
            entity_type: EntityType::Location,
            source_type: SourceType::News,
            source_id: "article-1".into(),
            mentioned_at: Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
            sentiment,
        }
    }

    #[test]
    fn mention_sentiment_bounds() {
        assert!(mention(-1.0).validate().is_ok());
        assert!(mention(1.0).validate().is_ok());
        assert!(mention(1.2).validate().is_err());
        assert!(mention(f64::NAN).validate().is_err());
    }

    #[test]
    fn watchlist_terms_skip_blank_aliases() {
        let entry = WatchlistEntry {
            id: Uuid::new_v4(),
            organization_id: Uuid::new_v4(),
            entity_name: "CAIR".into(),
            entity_type: None,
            aliases: vec!["".into(), "Council on American-Islamic Relations".into()],
            alert_threshold: 40.0,
            sentiment_alert: false,
            is_active: true,
        };
        let terms: Vec<_> = entry.search_terms().collect();
        assert_eq!(terms, vec!["CAIR", "Council on American-Islamic Relations"]);
    }

    #[test]
    fn single_touch_credits_once() {
        let record = AttributionRecord {
            transaction_id: "t1".into(),
            is_organic: false,
            touch_count: 1,
            first_touch_channel: "sms".into(),
            first_touch_campaign: None,
            first_touch_weight: 1.0,
            middle_touches: vec![],
            middle_touches_weight: 0.0,
            last_touch_channel: "sms".into(),
            last_touch_campaign: None,
            last_touch_weight: 0.0,
            attributed_at: Utc::now(),
        };
        let credits = record.credits();
        assert_eq!(credits.len(), 1);
        assert_eq!(credits[0].weight, 1.0);
    }

    #[test]
    fn summary_failure_requires_no_progress() {
        let mut s = RunSummary::new(JobType::TrendAggregation, Utc::now());
        assert!(!s.all_failed());
        s.errored = 2;
        assert!(s.all_failed());
        s.skipped = 1;
        assert!(!s.all_failed());
    }

    #[test]
    fn severity_ordering() {
        assert!(Severity::Critical > Severity::High);
        assert!(!Severity::Medium.is_surfaced());
        assert!(Severity::High.is_surfaced());
    }
}

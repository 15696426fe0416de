// src/store/mod.rs
//! Data model and repository traits. The pipeline talks to storage through
//! these traits only; the bundled in-memory implementation backs tests and
//! local runs, while production injects a database-backed implementation.
//!
//! Every write that could race (webhook vs. recovery, concurrent
//! translations, quota increments, feed-item inserts) is expressed as a
//! conditional operation here, never as read-modify-write in the callers.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::is_failure_marker;
use crate::limits::tier::UsageMetric;

pub use memory::InMemoryStore;

// ---------------------------------------------------------------------------
// Content items
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Video,
    Article,
    SocialPost,
    Podcast,
}

impl ContentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::Video => "video",
            ContentKind::Article => "article",
            ContentKind::SocialPost => "social_post",
            ContentKind::Podcast => "podcast",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentStatus {
    Pending,
    Extracting,
    Transcribing,
    Analyzing,
    Complete,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentItem {
    pub id: String,
    pub url: String,
    pub kind: ContentKind,
    /// `None` until extraction completes; a sentinel failure marker on error.
    pub extracted_text: Option<String>,
    pub status: ContentStatus,
    pub owner: String,
    pub duration_secs: Option<u32>,
    pub speaker_count: Option<u32>,
    pub display_language: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ContentItem {
    pub fn new(url: &str, kind: ContentKind, owner: &str) -> Self {
        Self {
            id: content_id(url, owner),
            url: url.to_string(),
            kind,
            extracted_text: None,
            status: ContentStatus::Pending,
            owner: owner.to_string(),
            duration_secs: None,
            speaker_count: None,
            display_language: None,
            created_at: Utc::now(),
        }
    }

    /// Text present and not a sentinel.
    pub fn text_ready(&self) -> bool {
        self.extracted_text
            .as_deref()
            .map(|t| !is_failure_marker(t))
            .unwrap_or(false)
    }

    pub fn has_failed(&self) -> bool {
        self.extracted_text
            .as_deref()
            .map(is_failure_marker)
            .unwrap_or(false)
    }
}

/// Short, stable id derived from the submission. Collisions are irrelevant at
/// this entropy; the nanosecond component keeps resubmits distinct.
pub fn content_id(url: &str, owner: &str) -> String {
    use sha2::{Digest, Sha256};
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    hasher.update(owner.as_bytes());
    hasher.update(nanos.to_le_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(16);
    for b in digest.iter().take(8) {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

// ---------------------------------------------------------------------------
// Summaries
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Supported,
    Disputed,
    Unverified,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Overview {
    pub synopsis: String,
    #[serde(default)]
    pub key_points: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Triage {
    /// 0-100 overall content quality.
    pub quality_score: u8,
    pub clickbait: Severity,
    /// Short free-text label, e.g. "tutorial", "opinion".
    pub category: String,
    pub rationale: String,
    pub recommendation: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claim {
    pub claim: String,
    pub verdict: Verdict,
    #[serde(default)]
    pub issue: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactCheck {
    #[serde(default)]
    pub claims: Vec<Claim>,
    /// 0-100 overall reliability.
    pub reliability_score: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionItem {
    pub title: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionItems {
    #[serde(default)]
    pub items: Vec<ActionItem>,
}

/// Fixed order the summary's `processing_status` advances through.
pub const SECTION_SEQUENCE: [&str; 6] = [
    "overview",
    "triage",
    "fact_check",
    "action_items",
    "mid_summary",
    "detailed_summary",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummaryStatus {
    Pending,
    Overview,
    Triage,
    FactCheck,
    ActionItems,
    MidSummary,
    DetailedSummary,
    Translating,
    Complete,
    Error,
}

impl SummaryStatus {
    fn for_section(name: &str) -> SummaryStatus {
        match name {
            "overview" => SummaryStatus::Overview,
            "triage" => SummaryStatus::Triage,
            "fact_check" => SummaryStatus::FactCheck,
            "action_items" => SummaryStatus::ActionItems,
            "mid_summary" => SummaryStatus::MidSummary,
            "detailed_summary" => SummaryStatus::DetailedSummary,
            _ => SummaryStatus::Pending,
        }
    }
}

/// One analysis-section value, written incrementally as each call lands.
#[derive(Debug, Clone)]
pub enum SectionPayload {
    Overview(Overview),
    Triage(Triage),
    FactCheck(FactCheck),
    ActionItems(ActionItems),
    MidSummary(String),
    DetailedSummary(String),
    Tone(String),
    Topics(Vec<String>),
    Tags(Vec<String>),
}

impl SectionPayload {
    pub fn section_name(&self) -> &'static str {
        match self {
            SectionPayload::Overview(_) => "overview",
            SectionPayload::Triage(_) => "triage",
            SectionPayload::FactCheck(_) => "fact_check",
            SectionPayload::ActionItems(_) => "action_items",
            SectionPayload::MidSummary(_) => "mid_summary",
            SectionPayload::DetailedSummary(_) => "detailed_summary",
            SectionPayload::Tone(_) => "tone",
            SectionPayload::Topics(_) => "topics",
            SectionPayload::Tags(_) => "tags",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Summary {
    pub content_id: String,
    pub language: String,
    pub overview: Option<Overview>,
    pub triage: Option<Triage>,
    pub fact_check: Option<FactCheck>,
    pub action_items: Option<ActionItems>,
    pub mid_summary: Option<String>,
    pub detailed_summary: Option<String>,
    pub tone: Option<String>,
    pub topics: Option<Vec<String>>,
    pub tags: Option<Vec<String>>,
    pub status: SummaryStatus,
    pub model: Option<String>,
    pub error_cause: Option<String>,
    #[serde(default)]
    pub failed_sections: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

impl Summary {
    pub fn placeholder(content_id: &str, language: &str, model: Option<String>) -> Self {
        Self {
            content_id: content_id.to_string(),
            language: language.to_string(),
            overview: None,
            triage: None,
            fact_check: None,
            action_items: None,
            mid_summary: None,
            detailed_summary: None,
            tone: None,
            topics: None,
            tags: None,
            status: SummaryStatus::Pending,
            model,
            error_cause: None,
            failed_sections: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    fn section_filled(&self, name: &str) -> bool {
        match name {
            "overview" => self.overview.is_some(),
            "triage" => self.triage.is_some(),
            "fact_check" => self.fact_check.is_some(),
            "action_items" => self.action_items.is_some(),
            "mid_summary" => self.mid_summary.is_some(),
            "detailed_summary" => self.detailed_summary.is_some(),
            _ => false,
        }
    }

    /// All six required sections have a non-null value.
    pub fn required_sections_complete(&self) -> bool {
        SECTION_SEQUENCE.iter().all(|s| self.section_filled(s))
    }

    pub fn apply(&mut self, payload: SectionPayload) {
        match payload {
            SectionPayload::Overview(v) => self.overview = Some(v),
            SectionPayload::Triage(v) => self.triage = Some(v),
            SectionPayload::FactCheck(v) => self.fact_check = Some(v),
            SectionPayload::ActionItems(v) => self.action_items = Some(v),
            SectionPayload::MidSummary(v) => self.mid_summary = Some(v),
            SectionPayload::DetailedSummary(v) => self.detailed_summary = Some(v),
            SectionPayload::Tone(v) => self.tone = Some(v),
            SectionPayload::Topics(v) => self.topics = Some(v),
            SectionPayload::Tags(v) => self.tags = Some(v),
        }
        self.updated_at = Utc::now();
    }

    /// Move `status` to the first still-missing section in the fixed
    /// sequence, or `Complete` once every required section is filled.
    /// Terminal states are left alone.
    pub fn advance_status(&mut self) {
        if matches!(
            self.status,
            SummaryStatus::Translating | SummaryStatus::Complete | SummaryStatus::Error
        ) {
            return;
        }
        match SECTION_SEQUENCE.iter().find(|s| !self.section_filled(s)) {
            Some(next) => self.status = SummaryStatus::for_section(next),
            None => self.status = SummaryStatus::Complete,
        }
    }
}

/// Outcome of the compare-and-set that starts a translation.
#[derive(Debug, Clone)]
pub enum TranslationTicket {
    /// This caller owns the translation; a `translating` placeholder exists.
    Started,
    /// A completed summary already exists for the pair.
    AlreadyComplete(Summary),
    /// Another translation is in flight; retry later.
    InFlight,
}

// ---------------------------------------------------------------------------
// Transcription jobs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionJob {
    pub content_id: String,
    pub provider_job_id: String,
    pub submitted_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Feed subscriptions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedKind {
    PodcastRss,
    YoutubeAtom,
}

impl FeedKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedKind::PodcastRss => "podcast_rss",
            FeedKind::YoutubeAtom => "youtube_atom",
        }
    }
}

/// Credential sealed at rest; opened only when the feed is fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedCredential {
    pub nonce: String,
    pub data: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedSubscription {
    pub id: String,
    pub owner: String,
    pub url: String,
    pub kind: FeedKind,
    pub cadence_hours: u32,
    pub last_checked_at: Option<DateTime<Utc>>,
    /// Publish timestamp of the newest item already seen.
    pub watermark: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
    pub active: bool,
    pub credential: Option<SealedCredential>,
}

impl FeedSubscription {
    pub fn new(owner: &str, url: &str, kind: FeedKind, cadence_hours: u32) -> Self {
        Self {
            id: content_id(url, owner),
            owner: owner.to_string(),
            url: url.to_string(),
            kind,
            cadence_hours: cadence_hours.max(1),
            last_checked_at: None,
            watermark: None,
            consecutive_failures: 0,
            last_error: None,
            active: true,
            credential: None,
        }
    }

    pub fn due(&self, now: DateTime<Utc>) -> bool {
        if !self.active {
            return false;
        }
        match self.last_checked_at {
            None => true,
            Some(checked) => now - checked >= chrono::Duration::hours(self.cadence_hours as i64),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedItem {
    pub subscription_id: String,
    pub url: String,
    pub title: String,
    pub published_at: DateTime<Utc>,
    pub audio_url: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct FailureOutcome {
    pub consecutive_failures: u32,
    pub deactivated: bool,
}

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    /// Raw tier value, e.g. "free" | "plus" | "pro".
    pub tier: String,
    /// Expiry for time-boxed passes; expired passes read as the free tier.
    pub tier_expires_at: Option<DateTime<Utc>>,
}

impl UserProfile {
    pub fn free(id: &str) -> Self {
        Self {
            id: id.to_string(),
            tier: "free".to_string(),
            tier_expires_at: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Repository traits
// ---------------------------------------------------------------------------

#[async_trait]
pub trait ContentStore: Send + Sync {
    async fn insert_content(&self, item: ContentItem) -> Result<()>;
    async fn content(&self, id: &str) -> Result<Option<ContentItem>>;
    async fn set_status(&self, id: &str, status: ContentStatus) -> Result<()>;

    /// Write text/duration only if `extracted_text` is still null. Returns
    /// whether this call won the write. Resolves the webhook/recovery race
    /// without a shared lock.
    async fn set_extracted_text_if_absent(
        &self,
        id: &str,
        text: &str,
        duration_secs: Option<u32>,
        speaker_count: Option<u32>,
    ) -> Result<bool>;

    async fn set_display_language(&self, id: &str, language: &str) -> Result<()>;

    async fn upsert_job(&self, job: TranscriptionJob) -> Result<()>;
    async fn job_by_provider_id(&self, provider_job_id: &str) -> Result<Option<TranscriptionJob>>;
    async fn remove_job(&self, content_id: &str) -> Result<()>;
    /// Jobs whose content item still has null text, oldest first.
    async fn unresolved_jobs(&self) -> Result<Vec<TranscriptionJob>>;
}

#[async_trait]
pub trait SummaryStore: Send + Sync {
    /// Insert a placeholder if the (content, language) row is missing;
    /// returns the current row either way.
    async fn upsert_placeholder(
        &self,
        content_id: &str,
        language: &str,
        model: Option<String>,
    ) -> Result<Summary>;

    async fn summary(&self, content_id: &str, language: &str) -> Result<Option<Summary>>;
    async fn completed_summaries(&self, content_id: &str) -> Result<Vec<Summary>>;

    /// Incremental section write; advances `status` and returns it.
    async fn store_section(
        &self,
        content_id: &str,
        language: &str,
        payload: SectionPayload,
    ) -> Result<SummaryStatus>;

    async fn record_section_error(
        &self,
        content_id: &str,
        language: &str,
        section: &str,
        cause: &str,
    ) -> Result<()>;

    async fn set_status(
        &self,
        content_id: &str,
        language: &str,
        status: SummaryStatus,
        cause: Option<String>,
    ) -> Result<()>;

    /// Compare-and-set entry into the `translating` state.
    async fn begin_translation(&self, content_id: &str, language: &str)
        -> Result<TranslationTicket>;

    /// Full-row upsert used when a translation merge lands.
    async fn replace_summary(&self, summary: Summary) -> Result<()>;
}

#[async_trait]
pub trait FeedStore: Send + Sync {
    async fn insert_subscription(&self, sub: FeedSubscription) -> Result<()>;
    async fn subscription(&self, id: &str) -> Result<Option<FeedSubscription>>;
    async fn remove_subscription(&self, id: &str) -> Result<()>;
    async fn list_due(&self, kind: FeedKind, now: DateTime<Utc>) -> Result<Vec<FeedSubscription>>;

    /// Success resets the failure counter to zero and advances the watermark
    /// when one is provided.
    async fn record_success(
        &self,
        id: &str,
        checked_at: DateTime<Utc>,
        watermark: Option<DateTime<Utc>>,
    ) -> Result<()>;

    /// Failure bumps the consecutive counter and deactivates the
    /// subscription once the counter reaches `threshold`.
    async fn record_failure(
        &self,
        id: &str,
        checked_at: DateTime<Utc>,
        error: &str,
        threshold: u32,
    ) -> Result<FailureOutcome>;

    /// Returns false when the (subscription, url) pair already exists.
    async fn insert_item(&self, item: FeedItem) -> Result<bool>;
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn upsert_user(&self, user: UserProfile) -> Result<()>;
    async fn user(&self, id: &str) -> Result<Option<UserProfile>>;
}

#[async_trait]
pub trait UsageStore: Send + Sync {
    /// Atomically increment the (user, period, metric) counter iff it is
    /// below `limit`. Returns whether the increment happened.
    async fn increment_if_below(
        &self,
        user: &str,
        period: &str,
        metric: UsageMetric,
        limit: u32,
    ) -> Result<bool>;

    async fn current_count(&self, user: &str, period: &str, metric: UsageMetric) -> Result<u32>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_advances_through_sequence() {
        let mut s = Summary::placeholder("c1", "en", None);
        s.advance_status();
        assert_eq!(s.status, SummaryStatus::Overview);

        s.apply(SectionPayload::Overview(Overview {
            synopsis: "x".into(),
            key_points: vec![],
        }));
        s.advance_status();
        assert_eq!(s.status, SummaryStatus::Triage);

        // Out-of-order completion: detailed summary lands before triage.
        s.apply(SectionPayload::DetailedSummary("long".into()));
        s.advance_status();
        assert_eq!(s.status, SummaryStatus::Triage);
    }

    #[test]
    fn complete_only_after_all_six() {
        let mut s = Summary::placeholder("c1", "en", None);
        s.apply(SectionPayload::Overview(Overview {
            synopsis: "x".into(),
            key_points: vec![],
        }));
        s.apply(SectionPayload::Triage(Triage {
            quality_score: 80,
            clickbait: Severity::Low,
            category: "tutorial".into(),
            rationale: "r".into(),
            recommendation: "watch".into(),
        }));
        s.apply(SectionPayload::FactCheck(FactCheck {
            claims: vec![],
            reliability_score: 70,
        }));
        s.apply(SectionPayload::ActionItems(ActionItems { items: vec![] }));
        s.apply(SectionPayload::MidSummary("mid".into()));
        s.advance_status();
        assert_ne!(s.status, SummaryStatus::Complete);

        s.apply(SectionPayload::DetailedSummary("detail".into()));
        s.advance_status();
        assert_eq!(s.status, SummaryStatus::Complete);
    }

    #[test]
    fn failure_marker_is_not_ready_text() {
        let mut item = ContentItem::new("https://example.com/a", ContentKind::Article, "u1");
        assert!(!item.text_ready());
        item.extracted_text = Some(crate::error::failure_marker(
            crate::error::FailureStage::Extraction,
            "EMPTY",
        ));
        assert!(!item.text_ready());
        assert!(item.has_failed());
        item.extracted_text = Some("real text".into());
        assert!(item.text_ready());
    }

    #[test]
    fn subscription_due_respects_cadence() {
        let now = Utc::now();
        let mut sub = FeedSubscription::new("u1", "https://feed", FeedKind::PodcastRss, 6);
        assert!(sub.due(now));
        sub.last_checked_at = Some(now - chrono::Duration::hours(2));
        assert!(!sub.due(now));
        sub.last_checked_at = Some(now - chrono::Duration::hours(7));
        assert!(sub.due(now));
        sub.active = false;
        assert!(!sub.due(now));
    }
}

// src/extract/mod.rs
//! Extraction dispatch: classify a submitted URL, run the matching
//! extractor with bounded retries, and write either the extracted text or a
//! sentinel failure marker onto the content item. Podcast audio is routed
//! into the transcription state machine instead of producing text here.

pub mod article;
pub mod social;
pub mod video;

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use metrics::counter;
use once_cell::sync::OnceCell;
use thiserror::Error;
use tracing::warn;
use url::Url;

use crate::context::PipelineContext;
use crate::error::{failure_marker, FailureStage, PipelineError};
use crate::store::{ContentItem, ContentKind, ContentStatus};

const VIDEO_HOSTS: [&str; 3] = ["youtube.com", "youtu.be", "vimeo.com"];
const SOCIAL_HOSTS: [&str; 6] = [
    "twitter.com",
    "x.com",
    "threads.net",
    "bsky.app",
    "linkedin.com",
    "instagram.com",
];
const PODCAST_HOSTS: [&str; 5] = [
    "podcasts.apple.com",
    "anchor.fm",
    "buzzsprout.com",
    "transistor.fm",
    "libsyn.com",
];
const AUDIO_EXTENSIONS: [&str; 6] = [".mp3", ".m4a", ".wav", ".aac", ".ogg", ".flac"];

fn host_matches(host: &str, candidates: &[&str]) -> bool {
    candidates
        .iter()
        .any(|c| host == *c || host.ends_with(&format!(".{c}")))
}

/// Classify a URL into exactly one content kind. Rules are ordered: video
/// hosts first, then social hosts, then the podcast/audio heuristic, else
/// article.
pub fn classify(url: &str) -> Result<ContentKind, PipelineError> {
    let parsed =
        Url::parse(url).map_err(|_| PipelineError::PermanentInput(format!("malformed URL: {url}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(PipelineError::PermanentInput(format!(
            "unsupported scheme: {}",
            parsed.scheme()
        )));
    }
    let host = parsed
        .host_str()
        .unwrap_or("")
        .trim_start_matches("www.")
        .trim_start_matches("m.")
        .to_ascii_lowercase();
    if host.is_empty() {
        return Err(PipelineError::PermanentInput("URL has no host".to_string()));
    }

    if host_matches(&host, &VIDEO_HOSTS) {
        return Ok(ContentKind::Video);
    }
    if host_matches(&host, &SOCIAL_HOSTS) {
        return Ok(ContentKind::SocialPost);
    }
    let path = parsed.path().to_ascii_lowercase();
    if host_matches(&host, &PODCAST_HOSTS) || AUDIO_EXTENSIONS.iter().any(|e| path.ends_with(e)) {
        return Ok(ContentKind::Podcast);
    }
    Ok(ContentKind::Article)
}

// ---------------------------------------------------------------------------
// Extractor trait + typed failures
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct ExtractionMeta {
    pub duration_secs: Option<u32>,
    pub author: Option<String>,
    pub thumbnail_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Extraction {
    pub text: String,
    pub meta: ExtractionMeta,
}

#[derive(Debug, Clone, Error)]
pub enum ExtractError {
    #[error("network: {0}")]
    Network(String),
    #[error("provider blocked the request: {0}")]
    Blocked(String),
    #[error("no usable text")]
    Empty,
    #[error("timed out")]
    Timeout,
    #[error("unsupported content: {0}")]
    Unsupported(String),
}

impl ExtractError {
    pub fn reason_code(&self) -> &'static str {
        match self {
            ExtractError::Network(_) => "NETWORK",
            ExtractError::Blocked(_) => "BLOCKED",
            ExtractError::Empty => "EMPTY",
            ExtractError::Timeout => "TIMEOUT",
            ExtractError::Unsupported(_) => "UNSUPPORTED",
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, ExtractError::Network(_) | ExtractError::Timeout)
    }
}

/// Map an HTTP status from a third-party provider into a typed failure.
pub(crate) fn error_for_status(status: reqwest::StatusCode) -> ExtractError {
    if status.is_server_error() || status.as_u16() == 429 {
        return ExtractError::Network(format!("status {status}"));
    }
    match status.as_u16() {
        404 | 410 => ExtractError::Unsupported(format!("status {status}")),
        _ => ExtractError::Blocked(format!("status {status}")),
    }
}

#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, item: &ContentItem) -> Result<Extraction, ExtractError>;
    fn name(&self) -> &'static str;
}

/// Retry transient failures up to `attempts`, with a linearly increasing
/// delay between attempts. Permanent failures return immediately.
pub async fn with_retry<T, F, Fut>(
    attempts: u32,
    base_delay: Duration,
    mut op: F,
) -> Result<T, ExtractError>
where
    F: FnMut(u32) -> Fut,
    Fut: std::future::Future<Output = Result<T, ExtractError>>,
{
    let attempts = attempts.max(1);
    let mut last = ExtractError::Network("no attempt ran".to_string());
    for attempt in 1..=attempts {
        match op(attempt).await {
            Ok(v) => return Ok(v),
            Err(e) if e.is_transient() && attempt < attempts => {
                tokio::time::sleep(base_delay * attempt).await;
                last = e;
            }
            Err(e) => return Err(e),
        }
    }
    Err(last)
}

// ---------------------------------------------------------------------------
// Scraped-text normalization
// ---------------------------------------------------------------------------

/// Normalize scraped HTML/text: entity decode, tag strip, quote
/// normalization, whitespace collapse, length cap.
pub fn normalize_scraped_text(s: &str, max_chars: usize) -> String {
    // 1) HTML entity decode
    let mut out = html_escape::decode_html_entities(s).to_string();

    // 2) Strip HTML tags
    static RE_TAGS: OnceCell<regex::Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| regex::Regex::new(r"(?is)</?[^>]+>").unwrap());
    out = re_tags.replace_all(&out, " ").to_string();

    // 3) Normalize typographic quotes to ASCII
    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    // 4) Collapse runs of spaces/tabs, keep paragraph breaks
    static RE_SPACES: OnceCell<regex::Regex> = OnceCell::new();
    let re_spaces = RE_SPACES.get_or_init(|| regex::Regex::new(r"[ \t]+").unwrap());
    out = re_spaces.replace_all(&out, " ").to_string();
    static RE_BREAKS: OnceCell<regex::Regex> = OnceCell::new();
    let re_breaks = RE_BREAKS.get_or_init(|| regex::Regex::new(r"\s*\n\s*(\s*\n\s*)+").unwrap());
    out = re_breaks.replace_all(&out, "\n\n").to_string();
    out = out.trim().to_string();

    if out.chars().count() > max_chars {
        out = out.chars().take(max_chars).collect();
    }
    out
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionOutcome {
    TextReady,
    TranscriptionPending,
    Failed,
}

/// Run the matching extractor for `content_id` and persist the result.
pub async fn run_extraction(
    ctx: &PipelineContext,
    content_id: &str,
) -> Result<ExtractionOutcome, PipelineError> {
    let item = ctx
        .contents
        .content(content_id)
        .await?
        .ok_or_else(|| PipelineError::PermanentInput(format!("unknown content {content_id}")))?;

    if item.text_ready() {
        return Ok(ExtractionOutcome::TextReady);
    }
    if item.has_failed() {
        return Ok(ExtractionOutcome::Failed);
    }

    ctx.contents
        .set_status(content_id, ContentStatus::Extracting)
        .await?;

    if item.kind == ContentKind::Podcast {
        return match crate::transcribe::submit(ctx, &item).await {
            Ok(()) => Ok(ExtractionOutcome::TranscriptionPending),
            Err(e) => {
                warn!(content_id, error = %e, "transcription submit failed");
                Ok(ExtractionOutcome::Failed)
            }
        };
    }

    let extractor = match item.kind {
        ContentKind::Video => &ctx.extractors.video,
        ContentKind::SocialPost => &ctx.extractors.social,
        _ => &ctx.extractors.article,
    };

    let cfg = &ctx.config.extraction;
    let result = with_retry(cfg.attempts, Duration::from_millis(cfg.retry_delay_ms), |_| {
        extractor.extract(&item)
    })
    .await
    .and_then(|ex| {
        if ex.text.trim().is_empty() {
            Err(ExtractError::Empty)
        } else {
            Ok(ex)
        }
    });

    match result {
        Ok(extraction) => {
            ctx.contents
                .set_extracted_text_if_absent(
                    content_id,
                    &extraction.text,
                    extraction.meta.duration_secs,
                    None,
                )
                .await?;
            counter!("extraction_ok_total", "kind" => item.kind.as_str()).increment(1);
            Ok(ExtractionOutcome::TextReady)
        }
        Err(e) => {
            warn!(content_id, kind = item.kind.as_str(), error = %e, "extraction failed");
            counter!("extraction_failed_total", "reason" => e.reason_code()).increment(1);
            ctx.contents
                .set_extracted_text_if_absent(
                    content_id,
                    &failure_marker(FailureStage::Extraction, e.reason_code()),
                    None,
                    None,
                )
                .await?;
            ctx.contents
                .set_status(content_id, ContentStatus::Error)
                .await?;
            Ok(ExtractionOutcome::Failed)
        }
    }
}

// ---------------------------------------------------------------------------
// Test double
// ---------------------------------------------------------------------------

/// Scripted extractor: pops one queued result per call; when the script is
/// empty it repeats the last configured result.
pub struct ScriptedExtractor {
    script: Mutex<VecDeque<Result<Extraction, ExtractError>>>,
    fallback: Result<Extraction, ExtractError>,
}

impl ScriptedExtractor {
    pub fn ok(text: &str) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Ok(Extraction {
                text: text.to_string(),
                meta: ExtractionMeta::default(),
            }),
        }
    }

    pub fn failing(err: ExtractError) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Err(err),
        }
    }

    pub fn push(&self, result: Result<Extraction, ExtractError>) {
        self.script.lock().expect("script").push_back(result);
    }
}

#[async_trait]
impl Extractor for ScriptedExtractor {
    async fn extract(&self, _item: &ContentItem) -> Result<Extraction, ExtractError> {
        if let Some(next) = self.script.lock().expect("script").pop_front() {
            return next;
        }
        self.fallback.clone()
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

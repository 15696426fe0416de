// src/transcribe/mod.rs
//! Async transcription state machine. Submission stores a provider job id
//! and waits for a webhook; a scheduled reconcile pass recovers jobs whose
//! webhook never arrived. The webhook and the reconcile pass run in
//! different invocations, so the race between them is resolved with a
//! conditional text write instead of a lock.

use std::fmt::Write as _;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use metrics::counter;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::context::PipelineContext;
use crate::error::{failure_marker, FailureStage, PipelineError};
use crate::store::{ContentItem, ContentStatus, SummaryStatus, TranscriptionJob};

// ---------------------------------------------------------------------------
// Provider types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Utterance {
    pub speaker: String,
    /// Offset from the start of the audio, in milliseconds.
    #[serde(rename = "start")]
    pub start_ms: u64,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderJobStatus {
    Processing,
    Completed,
    Error,
}

#[derive(Debug, Clone)]
pub struct ProviderJob {
    pub id: String,
    pub status: ProviderJobStatus,
    pub utterances: Vec<Utterance>,
    pub audio_duration_secs: Option<u32>,
    pub error: Option<String>,
}

#[async_trait]
pub trait TranscriptionClient: Send + Sync {
    /// Request speaker-diarized transcription; returns the provider job id.
    async fn submit(&self, audio_url: &str) -> Result<String>;
    /// Poll the provider's job-status endpoint directly.
    async fn job(&self, provider_job_id: &str) -> Result<ProviderJob>;
    fn name(&self) -> &'static str;
}

/// Inbound webhook body: `{transcript_id, status, utterances[], audio_duration}`.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookPayload {
    pub transcript_id: String,
    pub status: String,
    #[serde(default)]
    pub utterances: Vec<Utterance>,
    #[serde(default)]
    pub audio_duration: Option<u32>,
    #[serde(default)]
    pub error: Option<String>,
}

// ---------------------------------------------------------------------------
// Transcript formatting
// ---------------------------------------------------------------------------

/// Render utterances as `[MM:SS] Speaker X: text` blocks and count distinct
/// speakers.
pub fn format_transcript(utterances: &[Utterance]) -> (String, u32) {
    let mut out = String::new();
    let mut speakers: Vec<&str> = Vec::new();
    for u in utterances {
        let text = u.text.trim();
        if text.is_empty() {
            continue;
        }
        if !speakers.contains(&u.speaker.as_str()) {
            speakers.push(&u.speaker);
        }
        let total_secs = u.start_ms / 1000;
        if !out.is_empty() {
            out.push_str("\n\n");
        }
        let _ = write!(
            &mut out,
            "[{:02}:{:02}] Speaker {}: {}",
            total_secs / 60,
            total_secs % 60,
            u.speaker,
            text
        );
    }
    (out, speakers.len() as u32)
}

// ---------------------------------------------------------------------------
// State transitions
// ---------------------------------------------------------------------------

/// Submit a content item's audio for transcription.
pub async fn submit(ctx: &PipelineContext, item: &ContentItem) -> Result<(), PipelineError> {
    let Some(client) = ctx.transcriber.as_ref() else {
        fail_transcription(ctx, &item.id, "NOT_CONFIGURED", "transcription provider not configured")
            .await?;
        return Err(PipelineError::ProviderRejected(
            "transcription provider not configured".to_string(),
        ));
    };

    match client.submit(&item.url).await {
        Ok(provider_job_id) => {
            ctx.contents
                .upsert_job(TranscriptionJob {
                    content_id: item.id.clone(),
                    provider_job_id,
                    submitted_at: Utc::now(),
                })
                .await?;
            ctx.contents
                .set_status(&item.id, ContentStatus::Transcribing)
                .await?;
            counter!("transcription_submitted_total").increment(1);
            Ok(())
        }
        Err(e) => {
            warn!(content_id = item.id.as_str(), error = %e, "transcription submit failed");
            fail_transcription(ctx, &item.id, "SUBMIT_FAILED", &e.to_string()).await?;
            Err(PipelineError::Transient(format!("transcription submit: {e}")))
        }
    }
}

/// Resolve a provider webhook. Idempotent: duplicate or late deliveries
/// lose the conditional write and become no-ops.
pub async fn handle_webhook(ctx: &PipelineContext, payload: WebhookPayload) -> Result<()> {
    let Some(job) = ctx
        .contents
        .job_by_provider_id(&payload.transcript_id)
        .await?
    else {
        // Unknown or already-resolved job; ack and move on.
        info!(transcript_id = payload.transcript_id.as_str(), "webhook for unknown job");
        return Ok(());
    };

    match payload.status.as_str() {
        "completed" => {
            resolve_completed(
                ctx,
                &job,
                &payload.utterances,
                payload.audio_duration,
                "webhook",
            )
            .await
        }
        "error" => {
            let cause = payload.error.as_deref().unwrap_or("provider reported failure");
            fail_transcription(ctx, &job.content_id, "PROVIDER_ERROR", cause).await?;
            ctx.contents.remove_job(&job.content_id).await?;
            Ok(())
        }
        other => {
            warn!(status = other, "unexpected webhook status");
            Ok(())
        }
    }
}

/// Shared completion path for the webhook and the recovery poll. Returns
/// whether this call performed the write (and therefore triggered analysis).
async fn resolve_completed(
    ctx: &PipelineContext,
    job: &TranscriptionJob,
    utterances: &[Utterance],
    audio_duration: Option<u32>,
    via: &'static str,
) -> Result<()> {
    let (transcript, speaker_count) = format_transcript(utterances);
    if transcript.is_empty() {
        fail_transcription(ctx, &job.content_id, "EMPTY", "provider returned no utterances").await?;
        ctx.contents.remove_job(&job.content_id).await?;
        return Ok(());
    }

    let wrote = ctx
        .contents
        .set_extracted_text_if_absent(
            &job.content_id,
            &transcript,
            audio_duration,
            Some(speaker_count),
        )
        .await?;
    if !wrote {
        info!(content_id = job.content_id.as_str(), via, "transcript already saved; skipping");
        return Ok(());
    }

    ctx.contents.remove_job(&job.content_id).await?;
    ctx.contents
        .set_status(&job.content_id, ContentStatus::Analyzing)
        .await?;
    counter!("transcription_completed_total", "via" => via).increment(1);
    info!(content_id = job.content_id.as_str(), via, speaker_count, "transcript saved");

    // Winning the write is what makes the analysis trigger exactly-once.
    // Analysis failures are reported but never re-fail the transcription.
    if let Err(e) =
        crate::analyze::run_analysis(ctx, &job.content_id, &ctx.config.default_language).await
    {
        warn!(content_id = job.content_id.as_str(), error = %e, "analysis after transcription failed");
    }
    Ok(())
}

/// Write the sentinel failure marker and a failed summary row. The marker
/// write is conditional, so a late failure can never clobber a transcript
/// that already landed.
async fn fail_transcription(
    ctx: &PipelineContext,
    content_id: &str,
    reason: &str,
    cause: &str,
) -> Result<()> {
    let wrote = ctx
        .contents
        .set_extracted_text_if_absent(
            content_id,
            &failure_marker(FailureStage::Transcription, reason),
            None,
            None,
        )
        .await?;
    if !wrote {
        return Ok(());
    }
    ctx.contents
        .set_status(content_id, ContentStatus::Error)
        .await?;
    let lang = ctx.config.default_language.clone();
    ctx.summaries
        .upsert_placeholder(content_id, &lang, None)
        .await?;
    ctx.summaries
        .set_status(
            content_id,
            &lang,
            SummaryStatus::Error,
            Some(format!("transcription failed: {cause}")),
        )
        .await?;
    counter!("transcription_failed_total", "reason" => reason.to_string()).increment(1);
    Ok(())
}

// ---------------------------------------------------------------------------
// Recovery (reconcile) pass
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Clone, Copy)]
pub struct RecoveryReport {
    pub examined: usize,
    pub recovered: usize,
    pub failed: usize,
    pub still_processing: usize,
    /// Eligible jobs beyond the batch cap, deferred to the next run.
    pub deferred: usize,
}

enum MemberOutcome {
    Recovered,
    Failed,
    StillProcessing,
}

/// Reconcile transcriptions whose webhook never arrived. Invoked from the
/// podcast feed poller's scheduled run; safe to call repeatedly.
///
/// Two-tier window: inside the grace period nothing happens; between grace
/// and the hard limit the provider is polled; past the hard limit the job is
/// permanently failed without polling.
pub async fn reconcile_pending(ctx: &PipelineContext, now: DateTime<Utc>) -> Result<RecoveryReport> {
    let grace = chrono::Duration::minutes(ctx.config.recovery.grace_minutes);
    let hard = chrono::Duration::minutes(ctx.config.recovery.hard_minutes);
    let cap = ctx.config.recovery.batch_cap;

    let eligible: Vec<TranscriptionJob> = ctx
        .contents
        .unresolved_jobs()
        .await?
        .into_iter()
        .filter(|j| now - j.submitted_at > grace)
        .collect();

    let deferred = eligible.len().saturating_sub(cap);
    let batch: Vec<TranscriptionJob> = eligible.into_iter().take(cap).collect();

    let mut report = RecoveryReport {
        examined: batch.len(),
        deferred,
        ..Default::default()
    };

    // Whole batch in parallel; one member's failure must not abort siblings.
    let outcomes = join_all(batch.iter().map(|job| reconcile_one(ctx, job, now, hard))).await;
    for outcome in outcomes {
        match outcome {
            MemberOutcome::Recovered => report.recovered += 1,
            MemberOutcome::Failed => report.failed += 1,
            MemberOutcome::StillProcessing => report.still_processing += 1,
        }
    }

    if report.examined > 0 || report.deferred > 0 {
        info!(
            examined = report.examined,
            recovered = report.recovered,
            failed = report.failed,
            still_processing = report.still_processing,
            deferred = report.deferred,
            "transcription reconcile pass"
        );
    }
    counter!("transcription_recovered_total").increment(report.recovered as u64);
    Ok(report)
}

async fn reconcile_one(
    ctx: &PipelineContext,
    job: &TranscriptionJob,
    now: DateTime<Utc>,
    hard: chrono::Duration,
) -> MemberOutcome {
    let content_id = job.content_id.as_str();
    let age = now - job.submitted_at;

    if age >= hard {
        // Permanent failure; no poll even when credentials exist.
        let failed = fail_transcription(ctx, content_id, "RECOVERY_TIMEOUT", "webhook never arrived")
            .await
            .is_ok();
        let _ = ctx.contents.remove_job(content_id).await;
        if failed {
            return MemberOutcome::Failed;
        }
        return MemberOutcome::StillProcessing;
    }

    let Some(client) = ctx.transcriber.as_ref() else {
        // No provider credentials: cannot poll, keep waiting for the webhook.
        return MemberOutcome::StillProcessing;
    };

    match client.job(&job.provider_job_id).await {
        Ok(provider_job) => match provider_job.status {
            ProviderJobStatus::Processing => MemberOutcome::StillProcessing,
            ProviderJobStatus::Completed => {
                // Silent recovery: the webhook was lost but the job succeeded.
                match resolve_completed(
                    ctx,
                    job,
                    &provider_job.utterances,
                    provider_job.audio_duration_secs,
                    "recovery",
                )
                .await
                {
                    Ok(()) => MemberOutcome::Recovered,
                    Err(e) => {
                        warn!(content_id, error = %e, "recovery write failed");
                        MemberOutcome::StillProcessing
                    }
                }
            }
            ProviderJobStatus::Error => {
                let cause = provider_job
                    .error
                    .unwrap_or_else(|| "provider reported failure".to_string());
                if let Err(e) = fail_transcription(ctx, content_id, "PROVIDER_ERROR", &cause).await {
                    warn!(content_id, error = %e, "failure write failed");
                    return MemberOutcome::StillProcessing;
                }
                let _ = ctx.contents.remove_job(content_id).await;
                MemberOutcome::Failed
            }
        },
        Err(e) => {
            warn!(content_id, error = %e, "recovery poll failed; will retry next run");
            MemberOutcome::StillProcessing
        }
    }
}

// ---------------------------------------------------------------------------
// HTTP client (AssemblyAI-style API)
// ---------------------------------------------------------------------------

pub struct HttpTranscriptionClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    webhook_url: Option<String>,
}

impl HttpTranscriptionClient {
    pub fn new(base_url: &str, api_key: &str, webhook_url: Option<String>) -> Self {
        let http = reqwest::Client::builder()
            .user_agent("insight-pipeline/0.1")
            .connect_timeout(Duration::from_secs(4))
            .timeout(Duration::from_secs(30))
            .build()
            .expect("reqwest client");
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            webhook_url,
        }
    }

    /// `None` when `TRANSCRIBE_API_KEY` is absent; the pipeline then treats
    /// transcription as unconfigured.
    pub fn from_env() -> Option<Self> {
        let key = std::env::var("TRANSCRIBE_API_KEY").ok()?;
        if key.is_empty() {
            return None;
        }
        let base = std::env::var("TRANSCRIBE_API_URL")
            .unwrap_or_else(|_| "https://api.assemblyai.com/v2".to_string());
        let webhook = std::env::var("TRANSCRIBE_WEBHOOK_URL").ok();
        Some(Self::new(&base, &key, webhook))
    }
}

#[derive(Serialize)]
struct SubmitReq<'a> {
    audio_url: &'a str,
    speaker_labels: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    webhook_url: Option<&'a str>,
}

#[derive(Deserialize)]
struct SubmitResp {
    id: String,
}

#[derive(Deserialize)]
struct JobResp {
    id: String,
    status: String,
    #[serde(default)]
    utterances: Option<Vec<Utterance>>,
    #[serde(default)]
    audio_duration: Option<u32>,
    #[serde(default)]
    error: Option<String>,
}

#[async_trait]
impl TranscriptionClient for HttpTranscriptionClient {
    async fn submit(&self, audio_url: &str) -> Result<String> {
        let req = SubmitReq {
            audio_url,
            speaker_labels: true,
            webhook_url: self.webhook_url.as_deref(),
        };
        let resp = self
            .http
            .post(format!("{}/transcript", self.base_url))
            .header("authorization", &self.api_key)
            .json(&req)
            .send()
            .await?
            .error_for_status()?;
        let body: SubmitResp = resp.json().await?;
        Ok(body.id)
    }

    async fn job(&self, provider_job_id: &str) -> Result<ProviderJob> {
        let resp = self
            .http
            .get(format!("{}/transcript/{provider_job_id}", self.base_url))
            .header("authorization", &self.api_key)
            .send()
            .await?
            .error_for_status()?;
        let body: JobResp = resp.json().await?;
        let status = match body.status.as_str() {
            "completed" => ProviderJobStatus::Completed,
            "error" => ProviderJobStatus::Error,
            _ => ProviderJobStatus::Processing,
        };
        Ok(ProviderJob {
            id: body.id,
            status,
            utterances: body.utterances.unwrap_or_default(),
            audio_duration_secs: body.audio_duration,
            error: body.error,
        })
    }

    fn name(&self) -> &'static str {
        "http_transcription"
    }
}

// ---------------------------------------------------------------------------
// Test double
// ---------------------------------------------------------------------------

/// Programmable provider: submissions hand out sequential job ids; poll
/// results are set per job id. Poll calls are recorded so tests can assert
/// that resolved jobs are never re-queried.
#[derive(Default)]
pub struct MockTranscriptionClient {
    state: std::sync::Mutex<MockTranscriptionState>,
}

#[derive(Default)]
struct MockTranscriptionState {
    next_id: u32,
    jobs: std::collections::HashMap<String, ProviderJob>,
    polls: Vec<String>,
}

impl MockTranscriptionClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_job(&self, provider_job_id: &str, job: ProviderJob) {
        self.state
            .lock()
            .expect("mock transcriber")
            .jobs
            .insert(provider_job_id.to_string(), job);
    }

    pub fn polls(&self) -> Vec<String> {
        self.state.lock().expect("mock transcriber").polls.clone()
    }
}

#[async_trait]
impl TranscriptionClient for MockTranscriptionClient {
    async fn submit(&self, _audio_url: &str) -> Result<String> {
        let mut g = self.state.lock().expect("mock transcriber");
        g.next_id += 1;
        let id = format!("job-{}", g.next_id);
        g.jobs.insert(
            id.clone(),
            ProviderJob {
                id: id.clone(),
                status: ProviderJobStatus::Processing,
                utterances: Vec::new(),
                audio_duration_secs: None,
                error: None,
            },
        );
        Ok(id)
    }

    async fn job(&self, provider_job_id: &str) -> Result<ProviderJob> {
        let mut g = self.state.lock().expect("mock transcriber");
        g.polls.push(provider_job_id.to_string());
        g.jobs
            .get(provider_job_id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("unknown job {provider_job_id}"))
    }

    fn name(&self) -> &'static str {
        "mock_transcription"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utt(speaker: &str, start_ms: u64, text: &str) -> Utterance {
        Utterance {
            speaker: speaker.to_string(),
            start_ms,
            text: text.to_string(),
        }
    }

    #[test]
    fn formats_timestamps_and_counts_speakers() {
        let (text, speakers) = format_transcript(&[
            utt("A", 0, "Welcome back."),
            utt("B", 65_000, "Thanks for having me."),
            utt("A", 125_500, "Let's begin."),
        ]);
        assert_eq!(speakers, 2);
        let blocks: Vec<&str> = text.split("\n\n").collect();
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[0], "[00:00] Speaker A: Welcome back.");
        assert_eq!(blocks[1], "[01:05] Speaker B: Thanks for having me.");
        assert_eq!(blocks[2], "[02:05] Speaker A: Let's begin.");
    }

    #[test]
    fn empty_utterances_are_skipped() {
        let (text, speakers) = format_transcript(&[utt("A", 0, "   "), utt("B", 1000, "hi")]);
        assert_eq!(speakers, 1);
        assert_eq!(text, "[00:01] Speaker B: hi");
    }
}

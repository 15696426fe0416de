// src/translate.rs
//! Translation service: extracts the human-language subset of a completed
//! summary, translates it with model fallback, and merges the result back
//! without disturbing numeric scores or enum fields.
//!
//! The merge is defensive by construction: a field from the model is used
//! only when it is present and of the right type, so the merged summary is
//! never structurally worse than its source.

use std::time::Duration;

use anyhow::Context as _;
use chrono::Utc;
use metrics::counter;
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::ai::complete_json_with_fallback;
use crate::analyze::prompts;
use crate::context::PipelineContext;
use crate::error::PipelineError;
use crate::limits::tier::{allows_translation, effective_tier, monthly_limit, UsageMetric};
use crate::sanitize;
use crate::store::{Summary, SummaryStatus, TranslationTicket, UserProfile};

/// Per-field cap applied when sanitizing payload strings.
const FIELD_CAP: usize = 8_000;

#[derive(Debug, Clone, Serialize)]
pub struct PayloadClaim {
    pub claim: String,
    pub issue: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PayloadAction {
    pub title: String,
    pub description: String,
}

/// Free-text fields only. Scores, severities and verdicts never enter the
/// translation payload, so the model cannot invent new enum values.
#[derive(Debug, Clone, Serialize)]
pub struct TranslatablePayload {
    pub overview_synopsis: Option<String>,
    pub overview_key_points: Option<Vec<String>>,
    pub triage_rationale: Option<String>,
    pub triage_recommendation: Option<String>,
    pub claims: Option<Vec<PayloadClaim>>,
    pub action_items: Option<Vec<PayloadAction>>,
    pub mid_summary: Option<String>,
    pub detailed_summary: Option<String>,
}

fn clean(s: &str) -> String {
    sanitize::sanitize(s, FIELD_CAP)
}

/// Pull the translatable subset out of a summary, sanitizing every string.
pub fn extract_translatable(source: &Summary) -> TranslatablePayload {
    TranslatablePayload {
        overview_synopsis: source.overview.as_ref().map(|o| clean(&o.synopsis)),
        overview_key_points: source
            .overview
            .as_ref()
            .map(|o| o.key_points.iter().map(|p| clean(p)).collect()),
        triage_rationale: source.triage.as_ref().map(|t| clean(&t.rationale)),
        triage_recommendation: source.triage.as_ref().map(|t| clean(&t.recommendation)),
        claims: source.fact_check.as_ref().map(|f| {
            f.claims
                .iter()
                .map(|c| PayloadClaim {
                    claim: clean(&c.claim),
                    issue: c.issue.as_deref().map(clean),
                })
                .collect()
        }),
        action_items: source.action_items.as_ref().map(|a| {
            a.items
                .iter()
                .map(|i| PayloadAction {
                    title: clean(&i.title),
                    description: clean(&i.description),
                })
                .collect()
        }),
        mid_summary: source.mid_summary.as_deref().map(clean),
        detailed_summary: source.detailed_summary.as_deref().map(clean),
    }
}

fn take_str(v: &Value, key: &str) -> Option<String> {
    v.get(key)?.as_str().map(|s| s.to_string())
}

/// Merge a translated payload over `source`. Every field falls back to the
/// original value when the translated one is absent or of the wrong type.
pub fn merge_translated(source: &Summary, translated: &Value, language: &str) -> Summary {
    let mut out = source.clone();
    out.language = language.to_string();
    out.updated_at = Utc::now();

    if let Some(ov) = out.overview.as_mut() {
        if let Some(s) = take_str(translated, "overview_synopsis") {
            ov.synopsis = s;
        }
        if let Some(arr) = translated.get("overview_key_points").and_then(Value::as_array) {
            for (i, item) in arr.iter().enumerate().take(ov.key_points.len()) {
                if let Some(s) = item.as_str() {
                    ov.key_points[i] = s.to_string();
                }
            }
        }
    }

    if let Some(tr) = out.triage.as_mut() {
        if let Some(s) = take_str(translated, "triage_rationale") {
            tr.rationale = s;
        }
        if let Some(s) = take_str(translated, "triage_recommendation") {
            tr.recommendation = s;
        }
    }

    if let Some(fc) = out.fact_check.as_mut() {
        if let Some(arr) = translated.get("claims").and_then(Value::as_array) {
            for (i, item) in arr.iter().enumerate().take(fc.claims.len()) {
                if let Some(s) = item.get("claim").and_then(Value::as_str) {
                    fc.claims[i].claim = s.to_string();
                }
                if fc.claims[i].issue.is_some() {
                    if let Some(s) = item.get("issue").and_then(Value::as_str) {
                        fc.claims[i].issue = Some(s.to_string());
                    }
                }
            }
        }
    }

    if let Some(ai) = out.action_items.as_mut() {
        if let Some(arr) = translated.get("action_items").and_then(Value::as_array) {
            for (i, item) in arr.iter().enumerate().take(ai.items.len()) {
                if let Some(s) = item.get("title").and_then(Value::as_str) {
                    ai.items[i].title = s.to_string();
                }
                if let Some(s) = item.get("description").and_then(Value::as_str) {
                    ai.items[i].description = s.to_string();
                }
            }
        }
    }

    if let Some(s) = take_str(translated, "mid_summary") {
        out.mid_summary = Some(s);
    }
    if let Some(s) = take_str(translated, "detailed_summary") {
        out.detailed_summary = Some(s);
    }

    out
}

#[derive(Debug, Clone)]
pub enum TranslateOutcome {
    Ready(Summary),
    /// A translation for this pair is already in flight; retry later.
    InFlight,
}

/// Translate a completed analysis into `target_language`.
///
/// Precondition order (spec'd): existing completed target → idempotent
/// return; in-flight translation → retry-later; tier gate; completed source
/// in some language → else "analyze first". Quota is only consumed after
/// every precondition has passed.
pub async fn translate(
    ctx: &PipelineContext,
    content_id: &str,
    target_language: &str,
    caller: &UserProfile,
) -> Result<TranslateOutcome, PipelineError> {
    let target = target_language.trim().to_lowercase();
    if target.is_empty() || target.len() > 8 {
        return Err(PipelineError::PermanentInput(format!(
            "invalid target language: {target_language:?}"
        )));
    }

    // (1) + (2) fast path on the existing row.
    if let Some(existing) = ctx.summaries.summary(content_id, &target).await? {
        match existing.status {
            SummaryStatus::Complete => return Ok(TranslateOutcome::Ready(existing)),
            SummaryStatus::Translating => return Ok(TranslateOutcome::InFlight),
            _ => {}
        }
    }

    // (3) tier gate for non-default-language analysis.
    let now = Utc::now();
    let tier = effective_tier(&caller.tier, caller.tier_expires_at, now);
    if target != ctx.config.default_language && !allows_translation(tier) {
        return Err(PipelineError::QuotaExceeded {
            metric: UsageMetric::Translations.as_str().to_string(),
            tier: tier.as_str().to_string(),
            limit: monthly_limit(tier, UsageMetric::Translations),
        });
    }

    // (4) a completed source summary must exist; prefer the default language.
    let completed = ctx.summaries.completed_summaries(content_id).await?;
    let source = completed
        .iter()
        .find(|s| s.language == ctx.config.default_language)
        .or_else(|| completed.first())
        .cloned()
        .ok_or_else(|| {
            PipelineError::PermanentInput("analyze the content before translating".to_string())
        })?;

    // Claim the pair; the store enforces at-most-one row and one owner.
    match ctx.summaries.begin_translation(content_id, &target).await? {
        TranslationTicket::AlreadyComplete(s) => return Ok(TranslateOutcome::Ready(s)),
        TranslationTicket::InFlight => return Ok(TranslateOutcome::InFlight),
        TranslationTicket::Started => {}
    }

    // Quota last: a request rejected above never consumed a unit.
    let decision = ctx
        .usage
        .check_and_increment(caller, UsageMetric::Translations)
        .await?;
    if !decision.allowed {
        ctx.summaries
            .set_status(
                content_id,
                &target,
                SummaryStatus::Error,
                Some("translation quota exhausted".to_string()),
            )
            .await?;
        return Err(PipelineError::QuotaExceeded {
            metric: UsageMetric::Translations.as_str().to_string(),
            tier: decision.tier.as_str().to_string(),
            limit: decision.limit,
        });
    }

    let payload = extract_translatable(&source);
    let payload_json = serde_json::to_string_pretty(&payload)
        .context("serialize translation payload")
        .map_err(PipelineError::Internal)?;
    let user_prompt = prompts::translate(&payload_json, &target);
    let timeout = Duration::from_secs(ctx.config.analysis.call_timeout_secs);

    match complete_json_with_fallback::<Value>(
        ctx.chat.as_ref(),
        &ctx.config.models.translation,
        prompts::TRANSLATE_SYSTEM,
        &user_prompt,
        0.2,
        4_000,
        timeout,
        "translate",
    )
    .await
    {
        Ok((translated, report)) => {
            let mut merged = merge_translated(&source, &translated, &target);
            merged.status = SummaryStatus::Complete;
            merged.model = Some(report.model);
            merged.error_cause = None;
            ctx.summaries.replace_summary(merged.clone()).await?;
            ctx.contents
                .set_display_language(content_id, &target)
                .await?;
            counter!("translations_total", "outcome" => "ok").increment(1);
            Ok(TranslateOutcome::Ready(merged))
        }
        Err(e) => {
            // Leave an error status behind so the UI can offer retry instead
            // of a stuck "translating" state.
            warn!(content_id, target = target.as_str(), error = %e, "translation failed");
            counter!("translations_total", "outcome" => "error").increment(1);
            ctx.summaries
                .set_status(
                    content_id,
                    &target,
                    SummaryStatus::Error,
                    Some(format!("translation failed: {e}")),
                )
                .await?;
            Err(PipelineError::Transient(
                "translation models exhausted".to_string(),
            ))
        }
    }
}

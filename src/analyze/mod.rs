// src/analyze/mod.rs
//! AI analysis orchestrator: a two-phase fan-out/fan-in pipeline per
//! content item.
//!
//! Phase 1 runs cheap pre-processing (tone, search topics) in parallel.
//! Phase 2 runs the six main sections as independent concurrent calls over
//! sanitized, wrapped source text; each section writes to the summary row
//! as soon as it lands, so pollers observe partial results. A section that
//! exhausts its model fallback list is marked failed on its own; siblings
//! are unaffected and the run never aborts mid-phase.

pub mod prompts;

use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Result};
use futures::future::join_all;
use metrics::{counter, histogram};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::ai::complete_json_with_fallback;
use crate::ai::search::dedup_queries;
use crate::context::PipelineContext;
use crate::sanitize;
use crate::store::{
    ActionItems, ContentStatus, FactCheck, Overview, SectionPayload, SummaryStatus, Triage,
};

#[derive(Deserialize, Clone)]
struct ToneResp {
    tone: String,
}

#[derive(Deserialize, Clone)]
struct TopicsResp {
    #[serde(default)]
    topics: Vec<String>,
}

#[derive(Deserialize, Clone)]
struct TextResp {
    summary: String,
}

#[derive(Deserialize, Clone)]
struct TagsResp {
    #[serde(default)]
    tags: Vec<String>,
}

/// Sanitize the raw source and wrap it in the injection-defense boundary.
fn prepare_source(text: &str, max_chars: usize) -> String {
    sanitize::wrap_user_content(&sanitize::sanitize(text, max_chars))
}

/// One phase-2 section: fallback call, parse, incremental write. Failures
/// are recorded against this section only.
async fn run_section<T, F>(
    ctx: &PipelineContext,
    content_id: &str,
    language: &str,
    label: &'static str,
    user_prompt: String,
    max_tokens: u32,
    map: F,
) where
    T: DeserializeOwned,
    F: FnOnce(T) -> SectionPayload,
{
    let timeout = Duration::from_secs(ctx.config.analysis.call_timeout_secs);
    match complete_json_with_fallback::<T>(
        ctx.chat.as_ref(),
        &ctx.config.models.main,
        prompts::BASE_SYSTEM,
        &user_prompt,
        0.3,
        max_tokens,
        timeout,
        label,
    )
    .await
    {
        Ok((value, report)) => {
            match ctx
                .summaries
                .store_section(content_id, language, map(value))
                .await
            {
                Ok(status) => {
                    debug!(content_id, label, model = report.model.as_str(), ?status, "section stored")
                }
                Err(e) => warn!(content_id, label, error = %e, "section write failed"),
            }
        }
        Err(e) => {
            warn!(content_id, label, error = %e, "section failed after fallback");
            counter!("analysis_section_failed_total", "section" => label).increment(1);
            if let Err(e) = ctx
                .summaries
                .record_section_error(content_id, language, label, &e.to_string())
                .await
            {
                warn!(content_id, label, error = %e, "section error write failed");
            }
        }
    }
}

/// Phase-1 / post-processing call against the fast model list; best-effort,
/// never blocks completion.
async fn run_enrichment<T, F>(
    ctx: &PipelineContext,
    content_id: &str,
    language: &str,
    label: &'static str,
    user_prompt: String,
    map: F,
) -> Option<T>
where
    T: DeserializeOwned + Clone,
    F: FnOnce(T) -> SectionPayload,
{
    let timeout = Duration::from_secs(ctx.config.analysis.call_timeout_secs);
    match complete_json_with_fallback::<T>(
        ctx.chat.as_ref(),
        &ctx.config.models.fast,
        prompts::BASE_SYSTEM,
        &user_prompt,
        0.2,
        400,
        timeout,
        label,
    )
    .await
    {
        Ok((value, _)) => {
            if let Err(e) = ctx
                .summaries
                .store_section(content_id, language, map(value.clone()))
                .await
            {
                warn!(content_id, label, error = %e, "enrichment write failed");
            }
            Some(value)
        }
        Err(e) => {
            debug!(content_id, label, error = %e, "enrichment skipped");
            None
        }
    }
}

/// Grounding snippets for fact-checking: up to `max_searches` deduplicated
/// queries, one shared set per run.
async fn gather_search_context(ctx: &PipelineContext, topics: &[String]) -> String {
    let queries = dedup_queries(topics, ctx.config.analysis.max_searches);
    if queries.is_empty() {
        return String::new();
    }

    let results = join_all(queries.iter().map(|q| ctx.search.search(q, 3))).await;
    let mut out = String::new();
    for (query, result) in queries.iter().zip(results) {
        match result {
            Ok(hits) => {
                for hit in hits {
                    out.push_str(&format!("- [{}] {}: {}\n", query, hit.title, hit.snippet));
                }
            }
            Err(e) => warn!(query = query.as_str(), error = %e, "web search failed"),
        }
    }
    out
}

/// Run the full analysis workflow for a content item whose text is ready.
pub async fn run_analysis(ctx: &PipelineContext, content_id: &str, language: &str) -> Result<()> {
    let started = Instant::now();
    let item = ctx
        .contents
        .content(content_id)
        .await?
        .ok_or_else(|| anyhow!("unknown content {content_id}"))?;
    if !item.text_ready() {
        bail!("content {content_id} has no extracted text to analyze");
    }
    let text = item.extracted_text.clone().unwrap_or_default();

    ctx.contents
        .set_status(content_id, ContentStatus::Analyzing)
        .await?;
    ctx.summaries
        .upsert_placeholder(content_id, language, ctx.config.models.main.first().cloned())
        .await?;

    let source = prepare_source(&text, ctx.config.analysis.max_source_chars);

    // Phase 1: cheap pre-processing, in parallel.
    let (_tone, topics) = tokio::join!(
        run_enrichment::<ToneResp, _>(
            ctx,
            content_id,
            language,
            "tone",
            prompts::tone(&source),
            |t| SectionPayload::Tone(t.tone),
        ),
        run_enrichment::<TopicsResp, _>(
            ctx,
            content_id,
            language,
            "topics",
            prompts::topics(&source),
            |t| SectionPayload::Topics(t.topics),
        ),
    );

    let search_topics = topics.map(|t| t.topics).unwrap_or_default();
    let search_context = gather_search_context(ctx, &search_topics).await;

    // Phase 2: the six main sections, fanned out concurrently. Each writes
    // only its own summary field, so no coordination is needed between them.
    tokio::join!(
        run_section::<Overview, _>(
            ctx,
            content_id,
            language,
            "overview",
            prompts::overview(&source),
            1_000,
            SectionPayload::Overview,
        ),
        run_section::<Triage, _>(
            ctx,
            content_id,
            language,
            "triage",
            prompts::triage(&source),
            1_000,
            |mut t: Triage| {
                t.quality_score = t.quality_score.min(100);
                SectionPayload::Triage(t)
            },
        ),
        run_section::<FactCheck, _>(
            ctx,
            content_id,
            language,
            "fact_check",
            prompts::fact_check(&source, &search_context),
            1_500,
            |mut f: FactCheck| {
                f.reliability_score = f.reliability_score.min(100);
                SectionPayload::FactCheck(f)
            },
        ),
        run_section::<ActionItems, _>(
            ctx,
            content_id,
            language,
            "action_items",
            prompts::action_items(&source),
            1_000,
            SectionPayload::ActionItems,
        ),
        run_section::<TextResp, _>(
            ctx,
            content_id,
            language,
            "mid_summary",
            prompts::mid_summary(&source),
            1_500,
            |t| SectionPayload::MidSummary(t.summary),
        ),
        run_section::<TextResp, _>(
            ctx,
            content_id,
            language,
            "detailed_summary",
            prompts::detailed_summary(&source),
            3_000,
            |t| SectionPayload::DetailedSummary(t.summary),
        ),
    );

    // Post-processing: tags extracted from the completed sections.
    let row = ctx
        .summaries
        .summary(content_id, language)
        .await?
        .ok_or_else(|| anyhow!("summary row vanished for {content_id}"))?;
    let digest = [
        row.overview.as_ref().map(|o| o.synopsis.clone()),
        row.mid_summary.clone(),
    ]
    .into_iter()
    .flatten()
    .collect::<Vec<_>>()
    .join("\n\n");
    if !digest.is_empty() {
        run_enrichment::<TagsResp, _>(
            ctx,
            content_id,
            language,
            "tags",
            prompts::tags(&digest),
            |t| SectionPayload::Tags(t.tags),
        )
        .await;
    }

    // Fan-in: complete only when every required section landed.
    let row = ctx
        .summaries
        .summary(content_id, language)
        .await?
        .ok_or_else(|| anyhow!("summary row vanished for {content_id}"))?;
    histogram!("analysis_run_ms").record(started.elapsed().as_millis() as f64);

    if row.required_sections_complete() {
        ctx.summaries
            .set_status(content_id, language, SummaryStatus::Complete, None)
            .await?;
        ctx.contents
            .set_status(content_id, ContentStatus::Complete)
            .await?;
        if item.display_language.is_none() {
            ctx.contents
                .set_display_language(content_id, language)
                .await?;
        }
        counter!("analysis_runs_total", "outcome" => "complete").increment(1);
    } else {
        let cause = if row.failed_sections.is_empty() {
            "analysis incomplete".to_string()
        } else {
            format!("sections failed: {}", row.failed_sections.join(", "))
        };
        ctx.summaries
            .set_status(content_id, language, SummaryStatus::Error, Some(cause))
            .await?;
        ctx.contents
            .set_status(content_id, ContentStatus::Error)
            .await?;
        counter!("analysis_runs_total", "outcome" => "partial").increment(1);
    }
    Ok(())
}

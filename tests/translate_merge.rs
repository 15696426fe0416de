// tests/translate_merge.rs
//
// Translation service: precondition ordering, idempotence under repeat
// requests, tier gating, quota accounting, and the merge's domination
// property (merged output is never structurally worse than the source).

use std::sync::Arc;

use chrono::Utc;
use insight_pipeline::ai::search::MockSearchClient;
use insight_pipeline::ai::MockChatClient;
use insight_pipeline::config::PipelineConfig;
use insight_pipeline::context::{ExtractorSet, PipelineContext};
use insight_pipeline::error::PipelineError;
use insight_pipeline::extract::ScriptedExtractor;
use insight_pipeline::feeds::ScriptedFeedFetcher;
use insight_pipeline::limits::tier::{current_period, UsageMetric};
use insight_pipeline::notify::NotifierMux;
use insight_pipeline::store::{
    ActionItem, ActionItems, Claim, ContentItem, ContentKind, ContentStore, FactCheck,
    InMemoryStore, Overview, SectionPayload, Severity, SummaryStatus, SummaryStore, Triage,
    UsageStore, UserProfile, Verdict,
};
use insight_pipeline::translate::{
    extract_translatable, merge_translated, translate, TranslateOutcome,
};

struct Harness {
    ctx: Arc<PipelineContext>,
    store: Arc<InMemoryStore>,
    chat: Arc<MockChatClient>,
}

fn harness() -> Harness {
    let store = InMemoryStore::shared();
    let chat = Arc::new(MockChatClient::new());
    let ctx = PipelineContext::assemble(
        PipelineConfig::default_with_language(),
        store.clone(),
        chat.clone(),
        Arc::new(MockSearchClient::default()),
        None,
        ExtractorSet {
            video: Arc::new(ScriptedExtractor::ok("unused")),
            article: Arc::new(ScriptedExtractor::ok("unused")),
            social: Arc::new(ScriptedExtractor::ok("unused")),
        },
        Arc::new(ScriptedFeedFetcher::new()),
        NotifierMux::noop(),
    );
    Harness { ctx, store, chat }
}

fn pro_user(id: &str) -> UserProfile {
    UserProfile {
        id: id.to_string(),
        tier: "pro".into(),
        tier_expires_at: None,
    }
}

/// Content with a completed English summary, built through the store API.
async fn completed_content(h: &Harness) -> String {
    let item = ContentItem::new("https://example.com/a", ContentKind::Article, "u1");
    let id = item.id.clone();
    h.store.insert_content(item).await.unwrap();

    h.ctx
        .summaries
        .upsert_placeholder(&id, "en", Some("gpt-4o".into()))
        .await
        .unwrap();
    for payload in [
        SectionPayload::Overview(Overview {
            synopsis: "An article about batteries.".into(),
            key_points: vec!["density".into(), "cost".into()],
        }),
        SectionPayload::Triage(Triage {
            quality_score: 77,
            clickbait: Severity::Medium,
            category: "news".into(),
            rationale: "Solid sourcing.".into(),
            recommendation: "Read the middle section.".into(),
        }),
        SectionPayload::FactCheck(FactCheck {
            claims: vec![Claim {
                claim: "Energy density doubled since 2015.".into(),
                verdict: Verdict::Disputed,
                issue: Some("Figure refers to lab cells only.".into()),
            }],
            reliability_score: 64,
        }),
        SectionPayload::ActionItems(ActionItems {
            items: vec![ActionItem {
                title: "Check the cited paper".into(),
                description: "Find the original 2015 baseline.".into(),
            }],
        }),
        SectionPayload::MidSummary("A mid-length summary.".into()),
        SectionPayload::DetailedSummary("A detailed summary.".into()),
    ] {
        h.ctx.summaries.store_section(&id, "en", payload).await.unwrap();
    }
    let row = h.ctx.summaries.summary(&id, "en").await.unwrap().unwrap();
    assert_eq!(row.status, SummaryStatus::Complete);
    id
}

#[test]
fn payload_excludes_scores_and_enums() {
    let h = harness();
    let rt = tokio::runtime::Runtime::new().unwrap();
    let id = rt.block_on(completed_content(&h));
    let source = rt
        .block_on(h.ctx.summaries.summary(&id, "en"))
        .unwrap()
        .unwrap();

    let payload = serde_json::to_value(extract_translatable(&source)).unwrap();
    let rendered = payload.to_string();
    assert!(!rendered.contains("quality_score"));
    assert!(!rendered.contains("reliability_score"));
    assert!(!rendered.contains("verdict"));
    assert!(!rendered.contains("clickbait"));
    // Free text is present.
    assert!(rendered.contains("An article about batteries."));
    assert!(rendered.contains("Figure refers to lab cells only."));
}

#[test]
fn merge_dominates_the_source_under_partial_and_malformed_output() {
    let h = harness();
    let rt = tokio::runtime::Runtime::new().unwrap();
    let id = rt.block_on(completed_content(&h));
    let source = rt
        .block_on(h.ctx.summaries.summary(&id, "en"))
        .unwrap()
        .unwrap();

    // Partially translated, partially wrong-typed model output.
    let translated = serde_json::json!({
        "overview_synopsis": "Ein Artikel über Batterien.",
        "overview_key_points": ["Dichte", 42],          // second entry wrong type
        "triage_rationale": null,                        // null → keep original
        "mid_summary": "Eine mittellange Zusammenfassung.",
        "detailed_summary": 17,                          // wrong type → keep original
        "claims": [{"claim": "Energiedichte seit 2015 verdoppelt."}],
    });

    let merged = merge_translated(&source, &translated, "de");
    assert_eq!(merged.language, "de");

    let ov = merged.overview.as_ref().unwrap();
    assert_eq!(ov.synopsis, "Ein Artikel über Batterien.");
    assert_eq!(ov.key_points, vec!["Dichte".to_string(), "cost".to_string()]);

    let tr = merged.triage.as_ref().unwrap();
    assert_eq!(tr.rationale, "Solid sourcing."); // original kept
    assert_eq!(tr.quality_score, 77); // never entered the payload

    let fc = merged.fact_check.as_ref().unwrap();
    assert_eq!(fc.claims[0].claim, "Energiedichte seit 2015 verdoppelt.");
    assert_eq!(fc.claims[0].verdict, Verdict::Disputed); // enum untouched
    assert_eq!(
        fc.claims[0].issue.as_deref(),
        Some("Figure refers to lab cells only.") // missing in output → original
    );

    assert_eq!(merged.mid_summary.as_deref(), Some("Eine mittellange Zusammenfassung."));
    assert_eq!(merged.detailed_summary.as_deref(), Some("A detailed summary."));
}

#[tokio::test]
async fn translate_end_to_end_then_idempotent_repeat() {
    let h = harness();
    let id = completed_content(&h).await;
    h.chat.on_prompt(
        "Target language: de",
        r#"{"overview_synopsis":"Ein Artikel über Batterien.","mid_summary":"Mittel.","detailed_summary":"Ausführlich."}"#,
    );

    let user = pro_user("u1");
    let out = translate(&h.ctx, &id, "de", &user).await.unwrap();
    let TranslateOutcome::Ready(summary) = out else {
        panic!("expected a completed translation");
    };
    assert_eq!(summary.language, "de");
    assert_eq!(summary.status, SummaryStatus::Complete);
    assert_eq!(
        summary.overview.as_ref().unwrap().synopsis,
        "Ein Artikel über Batterien."
    );

    let item = h.ctx.contents.content(&id).await.unwrap().unwrap();
    assert_eq!(item.display_language.as_deref(), Some("de"));

    // Second request is answered from the stored row, no extra model calls.
    let calls_before = h.chat.calls_matching("Target language: de");
    let out2 = translate(&h.ctx, &id, "de", &user).await.unwrap();
    assert!(matches!(out2, TranslateOutcome::Ready(_)));
    assert_eq!(h.chat.calls_matching("Target language: de"), calls_before);
}

#[tokio::test]
async fn in_flight_translation_returns_retry_later() {
    let h = harness();
    let id = completed_content(&h).await;

    // Simulate a concurrent request that already claimed the pair.
    h.ctx.summaries.begin_translation(&id, "fr").await.unwrap();

    let out = translate(&h.ctx, &id, "fr", &pro_user("u1")).await.unwrap();
    assert!(matches!(out, TranslateOutcome::InFlight));
}

#[tokio::test]
async fn free_tier_cannot_request_non_default_language() {
    let h = harness();
    let id = completed_content(&h).await;

    let err = translate(&h.ctx, &id, "de", &UserProfile::free("u1")).await;
    assert!(matches!(err, Err(PipelineError::QuotaExceeded { .. })));
    // The gate rejected before any row was claimed.
    assert!(h.ctx.summaries.summary(&id, "de").await.unwrap().is_none());
}

#[tokio::test]
async fn translation_requires_a_completed_analysis_first() {
    let h = harness();
    let item = ContentItem::new("https://example.com/b", ContentKind::Article, "u1");
    let id = item.id.clone();
    h.store.insert_content(item).await.unwrap();

    let err = translate(&h.ctx, &id, "de", &pro_user("u1")).await;
    assert!(matches!(err, Err(PipelineError::PermanentInput(_))));
}

#[tokio::test]
async fn exhausted_quota_is_rejected_and_leaves_a_retryable_row() {
    let h = harness();
    let id = completed_content(&h).await;
    let user = pro_user("u1");

    // Park the monthly counter at the pro limit (200).
    let period = current_period(Utc::now());
    for _ in 0..200 {
        h.store
            .increment_if_below(&user.id, &period, UsageMetric::Translations, 200)
            .await
            .unwrap();
    }

    let err = translate(&h.ctx, &id, "de", &user).await;
    assert!(matches!(err, Err(PipelineError::QuotaExceeded { .. })));

    let row = h.ctx.summaries.summary(&id, "de").await.unwrap().unwrap();
    assert_eq!(row.status, SummaryStatus::Error);
}

#[tokio::test]
async fn model_failure_marks_the_row_error_not_stuck_translating() {
    let h = harness();
    let id = completed_content(&h).await;
    h.chat.fail_model("gpt-4o-mini");
    h.chat.fail_model("gpt-3.5-turbo");

    let err = translate(&h.ctx, &id, "de", &pro_user("u1")).await;
    assert!(matches!(err, Err(PipelineError::Transient(_))));

    let row = h.ctx.summaries.summary(&id, "de").await.unwrap().unwrap();
    assert_eq!(row.status, SummaryStatus::Error);
    assert!(row.error_cause.as_deref().unwrap().contains("translation failed"));

    // A retry after the failure is allowed to claim the row again.
    h.chat.clear_rules();
    h.chat.on_prompt("Target language: de", r#"{"mid_summary":"Mittel."}"#);
    let out = translate(&h.ctx, &id, "de", &pro_user("u1")).await.unwrap();
    assert!(matches!(out, TranslateOutcome::Ready(_)));
}

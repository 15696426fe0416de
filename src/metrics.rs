// src/metrics.rs
//! Prometheus wiring: recorder install, one-time series registration, and
//! the `/metrics` router.

use axum::{routing::get, Router};
use metrics::{describe_counter, describe_gauge, describe_histogram, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

/// One-time metrics registration (so series show up on /metrics).
pub fn ensure_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("ai_calls_total", "AI calls by label and outcome.");
        describe_counter!("ai_tokens_total", "Prompt/completion tokens consumed.");
        describe_histogram!("ai_call_latency_ms", "AI call latency in milliseconds.");
        describe_counter!(
            "sanitize_injection_detected_total",
            "Injection signatures blocked in source text."
        );
        describe_counter!(
            "sanitize_output_leakage_total",
            "Compliance signatures observed in model output."
        );
        describe_counter!("extraction_ok_total", "Successful extractions by kind.");
        describe_counter!("extraction_failed_total", "Extraction failures by reason.");
        describe_counter!("transcription_submitted_total", "Transcriptions submitted.");
        describe_counter!(
            "transcription_completed_total",
            "Transcripts saved, by webhook or recovery."
        );
        describe_counter!("transcription_failed_total", "Transcription failures by reason.");
        describe_counter!(
            "transcription_recovered_total",
            "Transcripts recovered after a lost webhook."
        );
        describe_counter!("analysis_runs_total", "Analysis runs by outcome.");
        describe_counter!(
            "analysis_section_failed_total",
            "Sections that exhausted their model fallback list."
        );
        describe_histogram!("analysis_run_ms", "Wall-clock analysis run time.");
        describe_counter!("translations_total", "Translation runs by outcome.");
        describe_counter!("feed_poll_runs_total", "Feed poll runs by kind.");
        describe_counter!("feed_items_new_total", "New feed items inserted.");
        describe_counter!("feed_poll_failures_total", "Per-subscription poll failures.");
        describe_counter!(
            "feed_subscriptions_deactivated_total",
            "Subscriptions deactivated by the failure breaker."
        );
        describe_histogram!("feed_parse_ms", "Feed parse time in milliseconds.");
        describe_counter!("rate_limit_rejected_total", "Requests rejected by the rate limiter.");
        describe_counter!("usage_gate_rejected_total", "Requests rejected by the usage gate.");
        describe_gauge!(
            "transcription_recovery_grace_secs",
            "Grace window before recovery polling starts."
        );
    });
}

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the Prometheus recorder and publish static gauges.
    pub fn init(recovery_grace_secs: u64) -> Self {
        // Use default buckets to avoid API differences across crate versions.
        let builder = PrometheusBuilder::new();

        let handle = builder
            .install_recorder()
            .expect("prometheus: install recorder");

        ensure_described();
        gauge!("transcription_recovery_grace_secs").set(recovery_grace_secs as f64);

        Self { handle }
    }

    /// Router exposing `/metrics` in the Prometheus exposition format.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}

//! Content Insight Pipeline — Binary Entrypoint
//! Boots the Axum HTTP server, wires the pipeline context, and spawns the
//! feed poll schedulers.

use shuttle_axum::ShuttleAxum;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use insight_pipeline::config::PipelineConfig;
use insight_pipeline::context::PipelineContext;
use insight_pipeline::feeds::scheduler::{spawn_feed_scheduler, PollSchedulerCfg};
use insight_pipeline::store::FeedKind;

/// Enable compact tracing logs in development only.
/// Activation requires BOTH:
///   - dev environment (debug build OR SHUTTLE_ENV in {local, development, dev})
///   - PIPELINE_DEV_LOG=1
fn enable_dev_tracing() {
    let dev_flag = std::env::var("PIPELINE_DEV_LOG")
        .ok()
        .is_some_and(|v| v == "1");

    let is_dev_env = cfg!(debug_assertions)
        || matches!(
            std::env::var("SHUTTLE_ENV")
                .unwrap_or_default()
                .to_ascii_lowercase()
                .as_str(),
            "local" | "development" | "dev"
        );

    if !(dev_flag && is_dev_env) {
        return;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("insight_pipeline=info,warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .init();
}

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();

    enable_dev_tracing();

    let config = PipelineConfig::load();
    let metrics =
        insight_pipeline::metrics::Metrics::init(config.recovery.grace_minutes as u64 * 60);

    let ctx = PipelineContext::from_env(config);

    // One scheduled loop per feed kind; the podcast loop also reconciles
    // stuck transcriptions.
    let poll_cfg = PollSchedulerCfg {
        interval_secs: ctx.config.feeds.poll_interval_secs,
    };
    spawn_feed_scheduler(ctx.clone(), FeedKind::PodcastRss, poll_cfg);
    spawn_feed_scheduler(ctx.clone(), FeedKind::YoutubeAtom, poll_cfg);

    let router = insight_pipeline::create_router(ctx).merge(metrics.router());

    Ok(router.into())
}

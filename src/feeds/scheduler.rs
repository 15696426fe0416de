// src/feeds/scheduler.rs
//! Background poll loops, one per feed kind. The podcast loop also owns the
//! transcription reconcile pass (§ recovery of webhooks that never arrived).

use std::sync::Arc;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::context::PipelineContext;
use crate::store::FeedKind;

#[derive(Clone, Copy, Debug)]
pub struct PollSchedulerCfg {
    pub interval_secs: u64,
}

/// Spawn the interval loop for one feed kind.
pub fn spawn_feed_scheduler(
    ctx: Arc<PipelineContext>,
    kind: FeedKind,
    cfg: PollSchedulerCfg,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(cfg.interval_secs));
        loop {
            ticker.tick().await;
            let now = Utc::now();

            if let Err(e) = super::poll_feeds(&ctx, kind, now).await {
                warn!(kind = kind.as_str(), error = %e, "feed poll run failed");
            }

            if kind == FeedKind::PodcastRss {
                if let Err(e) = crate::transcribe::reconcile_pending(&ctx, Utc::now()).await {
                    warn!(error = %e, "transcription reconcile failed");
                }
            }
        }
    })
}

// src/feeds/mod.rs
//! Scheduled feed polling: select due subscriptions, fetch and parse each
//! feed, insert items newer than the watermark, and track consecutive
//! failures with circuit breaking. New items are batched per owning user:
//! one notification per user per run, never one per item.

pub mod credential;
pub mod podcast_rss;
pub mod scheduler;
pub mod youtube_atom;

use std::collections::BTreeMap;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use metrics::counter;
use tracing::{info, warn};

use crate::context::PipelineContext;
use crate::notify::{DigestItem, FeedDigestEvent};
use crate::store::{FeedItem, FeedKind, FeedSubscription};

#[derive(Debug, Clone, PartialEq)]
pub struct FeedEntry {
    pub title: String,
    pub url: String,
    pub published_at: DateTime<Utc>,
    pub audio_url: Option<String>,
}

#[async_trait]
pub trait FeedFetcher: Send + Sync {
    /// Fetch and parse one subscription's feed. `auth`, when present, is
    /// sent as the Authorization header (private feeds).
    async fn fetch(&self, sub: &FeedSubscription, auth: Option<&str>) -> Result<Vec<FeedEntry>>;
}

pub struct HttpFeedFetcher {
    http: reqwest::Client,
}

impl HttpFeedFetcher {
    pub fn new() -> Self {
        let http = reqwest::Client::builder()
            .user_agent("insight-pipeline/0.1")
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(20))
            .build()
            .expect("reqwest client");
        Self { http }
    }
}

impl Default for HttpFeedFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FeedFetcher for HttpFeedFetcher {
    async fn fetch(&self, sub: &FeedSubscription, auth: Option<&str>) -> Result<Vec<FeedEntry>> {
        let mut req = self.http.get(&sub.url);
        if let Some(auth) = auth {
            req = req.header("authorization", auth);
        }
        let body = req.send().await?.error_for_status()?.text().await?;
        match sub.kind {
            FeedKind::PodcastRss => podcast_rss::parse(&body),
            FeedKind::YoutubeAtom => youtube_atom::parse(&body),
        }
    }
}

/// Scripted fetcher for tests: queued results per feed URL, recorded fetches.
#[derive(Default)]
pub struct ScriptedFeedFetcher {
    script: Mutex<HashMap<String, VecDeque<Result<Vec<FeedEntry>, String>>>>,
    fetched: Mutex<Vec<String>>,
}

impl ScriptedFeedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, url: &str, result: Result<Vec<FeedEntry>, String>) {
        self.script
            .lock()
            .expect("feed script")
            .entry(url.to_string())
            .or_default()
            .push_back(result);
    }

    pub fn fetched(&self) -> Vec<String> {
        self.fetched.lock().expect("feed fetched").clone()
    }
}

#[async_trait]
impl FeedFetcher for ScriptedFeedFetcher {
    async fn fetch(&self, sub: &FeedSubscription, _auth: Option<&str>) -> Result<Vec<FeedEntry>> {
        self.fetched
            .lock()
            .expect("feed fetched")
            .push(sub.url.clone());
        let next = self
            .script
            .lock()
            .expect("feed script")
            .get_mut(&sub.url)
            .and_then(|q| q.pop_front());
        match next {
            Some(Ok(entries)) => Ok(entries),
            Some(Err(e)) => Err(anyhow!(e)),
            None => Err(anyhow!("unscripted fetch for {}", sub.url)),
        }
    }
}

// ---------------------------------------------------------------------------
// Poll run
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Clone, Copy)]
pub struct PollReport {
    pub polled: usize,
    pub new_items: usize,
    pub failures: usize,
    pub deactivated: usize,
    pub notified_users: usize,
}

struct SubOutcome {
    owner: String,
    feed_url: String,
    inserted: Vec<FeedItem>,
    failed: bool,
    deactivated: bool,
}

/// Poll every due subscription of `kind` once. Members run concurrently and
/// independently; one subscription's failure never aborts its siblings.
pub async fn poll_feeds(
    ctx: &PipelineContext,
    kind: FeedKind,
    now: DateTime<Utc>,
) -> Result<PollReport> {
    let due = ctx.feeds.list_due(kind, now).await?;
    let outcomes = join_all(due.iter().map(|sub| poll_one(ctx, sub, now))).await;

    let mut report = PollReport {
        polled: outcomes.len(),
        ..Default::default()
    };

    // Batch new items per owning user: one notification per user per run.
    let mut per_user: BTreeMap<String, Vec<DigestItem>> = BTreeMap::new();
    for outcome in outcomes {
        if outcome.failed {
            report.failures += 1;
        }
        if outcome.deactivated {
            report.deactivated += 1;
        }
        report.new_items += outcome.inserted.len();
        for item in outcome.inserted {
            per_user.entry(outcome.owner.clone()).or_default().push(DigestItem {
                feed: outcome.feed_url.clone(),
                title: item.title,
                url: item.url,
            });
        }
    }

    for (user, items) in per_user {
        let event = FeedDigestEvent {
            user,
            items,
            ts: now,
        };
        ctx.notifier.notify(&event).await;
        report.notified_users += 1;
    }

    counter!("feed_poll_runs_total", "kind" => kind.as_str()).increment(1);
    counter!("feed_items_new_total", "kind" => kind.as_str()).increment(report.new_items as u64);
    info!(
        target: "feeds",
        kind = kind.as_str(),
        polled = report.polled,
        new_items = report.new_items,
        failures = report.failures,
        deactivated = report.deactivated,
        "feed poll run"
    );
    Ok(report)
}

async fn poll_one(ctx: &PipelineContext, sub: &FeedSubscription, now: DateTime<Utc>) -> SubOutcome {
    let mut outcome = SubOutcome {
        owner: sub.owner.clone(),
        feed_url: sub.url.clone(),
        inserted: Vec::new(),
        failed: false,
        deactivated: false,
    };

    // Private feeds: open the sealed credential only at call time.
    let auth = match (&sub.credential, credential::master_key_from_env()) {
        (Some(sealed), Some(key)) => match credential::open(sealed, &key) {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(sub = sub.id.as_str(), error = %e, "credential open failed");
                outcome.failed = true;
                outcome.deactivated = record_failure(ctx, sub, now, &e.to_string()).await;
                return outcome;
            }
        },
        (Some(_), None) => {
            warn!(sub = sub.id.as_str(), "sealed credential but no master key configured");
            None
        }
        (None, _) => None,
    };

    let entries = match ctx.feed_fetcher.fetch(sub, auth.as_deref()).await {
        Ok(entries) => entries,
        Err(e) => {
            outcome.failed = true;
            outcome.deactivated = record_failure(ctx, sub, now, &e.to_string()).await;
            return outcome;
        }
    };

    // Items strictly newer than the watermark are "new". Feeds that backdate
    // item timestamps can slip past this comparison; semantics kept as-is
    // pending a product decision.
    let floor = sub
        .watermark
        .unwrap_or_else(|| DateTime::<Utc>::from_timestamp(0, 0).unwrap_or_default());
    let mut newest: Option<DateTime<Utc>> = None;
    for entry in entries {
        if entry.published_at <= floor {
            continue;
        }
        let item = FeedItem {
            subscription_id: sub.id.clone(),
            url: entry.url,
            title: entry.title,
            published_at: entry.published_at,
            audio_url: entry.audio_url,
        };
        // Duplicates (same subscription + item URL) are ignored here.
        match ctx.feeds.insert_item(item.clone()).await {
            Ok(true) => {
                newest = Some(newest.map_or(item.published_at, |n| n.max(item.published_at)));
                outcome.inserted.push(item);
            }
            Ok(false) => {}
            Err(e) => warn!(sub = sub.id.as_str(), error = %e, "feed item insert failed"),
        }
    }

    if let Err(e) = ctx.feeds.record_success(&sub.id, now, newest).await {
        warn!(sub = sub.id.as_str(), error = %e, "feed success write failed");
    }
    outcome
}

async fn record_failure(
    ctx: &PipelineContext,
    sub: &FeedSubscription,
    now: DateTime<Utc>,
    error: &str,
) -> bool {
    counter!("feed_poll_failures_total").increment(1);
    match ctx
        .feeds
        .record_failure(&sub.id, now, error, ctx.config.feeds.failure_threshold)
        .await
    {
        Ok(outcome) => {
            if outcome.deactivated {
                warn!(
                    sub = sub.id.as_str(),
                    failures = outcome.consecutive_failures,
                    "subscription deactivated after repeated failures"
                );
                counter!("feed_subscriptions_deactivated_total").increment(1);
            }
            outcome.deactivated
        }
        Err(e) => {
            warn!(sub = sub.id.as_str(), error = %e, "feed failure write failed");
            false
        }
    }
}

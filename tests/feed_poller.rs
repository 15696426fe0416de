// tests/feed_poller.rs
//
// Feed poller behavior: watermark-based new-item detection, duplicate
// suppression, the consecutive-failure circuit breaker (scenario: a feed
// failing 7 times is deactivated and not fetched on run 8), and per-user
// notification batching.

use std::sync::{Arc, Mutex};

use chrono::{Duration, TimeZone, Utc};
use insight_pipeline::ai::search::MockSearchClient;
use insight_pipeline::ai::MockChatClient;
use insight_pipeline::config::PipelineConfig;
use insight_pipeline::context::{ExtractorSet, PipelineContext};
use insight_pipeline::extract::ScriptedExtractor;
use insight_pipeline::feeds::{poll_feeds, FeedEntry, ScriptedFeedFetcher};
use insight_pipeline::notify::{FeedDigestEvent, Notifier, NotifierMux};
use insight_pipeline::store::{FeedKind, FeedStore, FeedSubscription, InMemoryStore};

/// Sink that records every delivered digest event.
#[derive(Default)]
struct RecordingSink {
    events: Mutex<Vec<FeedDigestEvent>>,
}

impl RecordingSink {
    fn events(&self) -> Vec<FeedDigestEvent> {
        self.events.lock().unwrap().clone()
    }
}

/// Local newtype so the foreign `Notifier` trait can be implemented for a
/// shared `Arc<RecordingSink>` without tripping the orphan rule.
struct RecordingSinkHandle(Arc<RecordingSink>);

#[async_trait::async_trait]
impl Notifier for RecordingSinkHandle {
    async fn notify(&self, event: &FeedDigestEvent) -> anyhow::Result<()> {
        self.0.events.lock().unwrap().push(event.clone());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

struct Harness {
    ctx: Arc<PipelineContext>,
    store: Arc<InMemoryStore>,
    fetcher: Arc<ScriptedFeedFetcher>,
    sink: Arc<RecordingSink>,
}

fn harness() -> Harness {
    let store = InMemoryStore::shared();
    let fetcher = Arc::new(ScriptedFeedFetcher::new());
    let sink = Arc::new(RecordingSink::default());
    let ctx = PipelineContext::assemble(
        PipelineConfig::default_with_language(),
        store.clone(),
        Arc::new(MockChatClient::new()),
        Arc::new(MockSearchClient::default()),
        None,
        ExtractorSet {
            video: Arc::new(ScriptedExtractor::ok("unused")),
            article: Arc::new(ScriptedExtractor::ok("unused")),
            social: Arc::new(ScriptedExtractor::ok("unused")),
        },
        fetcher.clone(),
        NotifierMux::noop().with_sink(Box::new(RecordingSinkHandle(sink.clone()))),
    );
    Harness {
        ctx,
        store,
        fetcher,
        sink,
    }
}

fn entry(title: &str, url: &str, ts_offset_hours: i64) -> FeedEntry {
    FeedEntry {
        title: title.to_string(),
        url: url.to_string(),
        published_at: Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap()
            + Duration::hours(ts_offset_hours),
        audio_url: Some(format!("{url}.mp3")),
    }
}

async fn subscribe(h: &Harness, owner: &str, url: &str) -> String {
    let sub = FeedSubscription::new(owner, url, FeedKind::PodcastRss, 1);
    let id = sub.id.clone();
    h.store.insert_subscription(sub).await.unwrap();
    id
}

#[tokio::test]
async fn watermark_advances_and_old_items_are_skipped() {
    let h = harness();
    let sub_id = subscribe(&h, "u1", "https://pod.example/feed").await;
    let now = Utc.with_ymd_and_hms(2026, 6, 2, 0, 0, 0).unwrap();

    h.fetcher.push(
        "https://pod.example/feed",
        Ok(vec![
            entry("Ep 1", "https://pod.example/ep1", 0),
            entry("Ep 2", "https://pod.example/ep2", 1),
        ]),
    );
    let report = poll_feeds(&h.ctx, FeedKind::PodcastRss, now).await.unwrap();
    assert_eq!(report.new_items, 2);

    let sub = h.store.subscription(&sub_id).await.unwrap().unwrap();
    assert_eq!(
        sub.watermark.unwrap(),
        Utc.with_ymd_and_hms(2026, 6, 1, 13, 0, 0).unwrap()
    );

    // Next run: the old two plus one genuinely new item.
    h.fetcher.push(
        "https://pod.example/feed",
        Ok(vec![
            entry("Ep 1", "https://pod.example/ep1", 0),
            entry("Ep 2", "https://pod.example/ep2", 1),
            entry("Ep 3", "https://pod.example/ep3", 2),
        ]),
    );
    let later = now + Duration::hours(2);
    let report = poll_feeds(&h.ctx, FeedKind::PodcastRss, later).await.unwrap();
    assert_eq!(report.new_items, 1, "only the item past the watermark is new");

    let items = h.store.feed_items();
    assert_eq!(items.len(), 3);
    assert!(items.iter().any(|i| i.audio_url.as_deref() == Some("https://pod.example/ep3.mp3")));
}

#[tokio::test]
async fn duplicate_item_urls_are_ignored_on_insert() {
    let h = harness();
    subscribe(&h, "u1", "https://pod.example/feed").await;
    let now = Utc.with_ymd_and_hms(2026, 6, 2, 0, 0, 0).unwrap();

    // The same URL twice in one document (feeds do this).
    h.fetcher.push(
        "https://pod.example/feed",
        Ok(vec![
            entry("Ep 1", "https://pod.example/ep1", 0),
            entry("Ep 1 (repost)", "https://pod.example/ep1", 1),
        ]),
    );
    let report = poll_feeds(&h.ctx, FeedKind::PodcastRss, now).await.unwrap();
    assert_eq!(report.new_items, 1);
    assert_eq!(h.store.feed_items().len(), 1);
}

#[tokio::test]
async fn scenario_c_seven_failures_deactivate_and_run_eight_skips() {
    let h = harness();
    let sub_id = subscribe(&h, "u1", "https://flaky.example/feed").await;
    let mut now = Utc.with_ymd_and_hms(2026, 6, 2, 0, 0, 0).unwrap();

    for run in 1..=7u32 {
        h.fetcher.push(
            "https://flaky.example/feed",
            Err(format!("connection refused (run {run})")),
        );
        poll_feeds(&h.ctx, FeedKind::PodcastRss, now).await.unwrap();

        let sub = h.store.subscription(&sub_id).await.unwrap().unwrap();
        assert_eq!(sub.consecutive_failures, run, "counter strictly increases");
        if run < 7 {
            assert!(sub.active, "must not deactivate before the threshold");
        } else {
            assert!(!sub.active, "deactivates the instant the counter reaches 7");
        }
        now += Duration::hours(2);
    }

    assert_eq!(h.fetcher.fetched().len(), 7);

    // Run 8: the deactivated subscription is not selected, let alone fetched.
    let report = poll_feeds(&h.ctx, FeedKind::PodcastRss, now).await.unwrap();
    assert_eq!(report.polled, 0);
    assert_eq!(h.fetcher.fetched().len(), 7);
}

#[tokio::test]
async fn one_success_resets_the_failure_counter_to_zero() {
    let h = harness();
    let sub_id = subscribe(&h, "u1", "https://pod.example/feed").await;
    let mut now = Utc.with_ymd_and_hms(2026, 6, 2, 0, 0, 0).unwrap();

    for _ in 0..2 {
        h.fetcher.push("https://pod.example/feed", Err("boom".into()));
        poll_feeds(&h.ctx, FeedKind::PodcastRss, now).await.unwrap();
        now += Duration::hours(2);
    }
    let sub = h.store.subscription(&sub_id).await.unwrap().unwrap();
    assert_eq!(sub.consecutive_failures, 2);
    assert!(sub.last_error.as_deref().unwrap().contains("boom"));

    h.fetcher.push(
        "https://pod.example/feed",
        Ok(vec![entry("Ep 1", "https://pod.example/ep1", 0)]),
    );
    poll_feeds(&h.ctx, FeedKind::PodcastRss, now).await.unwrap();

    let sub = h.store.subscription(&sub_id).await.unwrap().unwrap();
    assert_eq!(sub.consecutive_failures, 0, "resets to exactly zero");
    assert!(sub.active);
    assert!(sub.last_error.is_none());
}

#[tokio::test]
async fn cadence_gates_polling() {
    let h = harness();
    let sub_id = subscribe(&h, "u1", "https://pod.example/feed").await;
    let now = Utc.with_ymd_and_hms(2026, 6, 2, 0, 0, 0).unwrap();

    h.fetcher.push("https://pod.example/feed", Ok(vec![]));
    let report = poll_feeds(&h.ctx, FeedKind::PodcastRss, now).await.unwrap();
    assert_eq!(report.polled, 1);

    // Checked moments ago: not due.
    let report = poll_feeds(&h.ctx, FeedKind::PodcastRss, now + Duration::minutes(10))
        .await
        .unwrap();
    assert_eq!(report.polled, 0);

    let sub = h.store.subscription(&sub_id).await.unwrap().unwrap();
    assert!(sub.last_checked_at.is_some());
}

#[tokio::test]
async fn one_notification_per_user_per_run() {
    let h = harness();
    // Two feeds for alice, one for bob; all with new items in one run.
    subscribe(&h, "alice", "https://a1.example/feed").await;
    subscribe(&h, "alice", "https://a2.example/feed").await;
    subscribe(&h, "bob", "https://b.example/feed").await;
    let now = Utc.with_ymd_and_hms(2026, 6, 2, 0, 0, 0).unwrap();

    h.fetcher.push(
        "https://a1.example/feed",
        Ok(vec![entry("A1-1", "https://a1.example/1", 0), entry("A1-2", "https://a1.example/2", 1)]),
    );
    h.fetcher.push(
        "https://a2.example/feed",
        Ok(vec![entry("A2-1", "https://a2.example/1", 0)]),
    );
    h.fetcher.push(
        "https://b.example/feed",
        Ok(vec![entry("B-1", "https://b.example/1", 0)]),
    );

    let report = poll_feeds(&h.ctx, FeedKind::PodcastRss, now).await.unwrap();
    assert_eq!(report.new_items, 4);
    assert_eq!(report.notified_users, 2);

    let events = h.sink.events();
    assert_eq!(events.len(), 2, "one digest per user, not one per item");
    let alice = events.iter().find(|e| e.user == "alice").unwrap();
    assert_eq!(alice.items.len(), 3);
    let bob = events.iter().find(|e| e.user == "bob").unwrap();
    assert_eq!(bob.items.len(), 1);
}

#[tokio::test]
async fn one_failing_subscription_does_not_abort_its_siblings() {
    let h = harness();
    subscribe(&h, "u1", "https://dead.example/feed").await;
    subscribe(&h, "u1", "https://live.example/feed").await;
    let now = Utc.with_ymd_and_hms(2026, 6, 2, 0, 0, 0).unwrap();

    h.fetcher.push("https://dead.example/feed", Err("404".into()));
    h.fetcher.push(
        "https://live.example/feed",
        Ok(vec![entry("Ep", "https://live.example/1", 0)]),
    );

    let report = poll_feeds(&h.ctx, FeedKind::PodcastRss, now).await.unwrap();
    assert_eq!(report.polled, 2);
    assert_eq!(report.failures, 1);
    assert_eq!(report.new_items, 1, "the healthy sibling still lands its item");
}

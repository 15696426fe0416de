// src/store/memory.rs
//! In-memory store backing tests and local runs. One mutex over the whole
//! state keeps the conditional operations atomic; nothing here awaits while
//! holding the lock.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::*;
use crate::limits::tier::UsageMetric;

#[derive(Default)]
struct Inner {
    contents: HashMap<String, ContentItem>,
    jobs: HashMap<String, TranscriptionJob>,
    summaries: HashMap<(String, String), Summary>,
    subscriptions: HashMap<String, FeedSubscription>,
    items: Vec<FeedItem>,
    item_keys: HashSet<(String, String)>,
    users: HashMap<String, UserProfile>,
    usage: HashMap<(String, String, &'static str), u32>,
}

#[derive(Default)]
pub struct InMemoryStore {
    inner: Mutex<Inner>,
}

impl InMemoryStore {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("store mutex poisoned")
    }

    /// Test helper: all feed items inserted so far.
    pub fn feed_items(&self) -> Vec<FeedItem> {
        self.lock().items.clone()
    }
}

#[async_trait]
impl ContentStore for InMemoryStore {
    async fn insert_content(&self, item: ContentItem) -> Result<()> {
        self.lock().contents.insert(item.id.clone(), item);
        Ok(())
    }

    async fn content(&self, id: &str) -> Result<Option<ContentItem>> {
        Ok(self.lock().contents.get(id).cloned())
    }

    async fn set_status(&self, id: &str, status: ContentStatus) -> Result<()> {
        let mut g = self.lock();
        let item = g
            .contents
            .get_mut(id)
            .ok_or_else(|| anyhow!("unknown content {id}"))?;
        item.status = status;
        Ok(())
    }

    async fn set_extracted_text_if_absent(
        &self,
        id: &str,
        text: &str,
        duration_secs: Option<u32>,
        speaker_count: Option<u32>,
    ) -> Result<bool> {
        let mut g = self.lock();
        let item = g
            .contents
            .get_mut(id)
            .ok_or_else(|| anyhow!("unknown content {id}"))?;
        if item.extracted_text.is_some() {
            return Ok(false);
        }
        item.extracted_text = Some(text.to_string());
        if duration_secs.is_some() {
            item.duration_secs = duration_secs;
        }
        if speaker_count.is_some() {
            item.speaker_count = speaker_count;
        }
        Ok(true)
    }

    async fn set_display_language(&self, id: &str, language: &str) -> Result<()> {
        let mut g = self.lock();
        let item = g
            .contents
            .get_mut(id)
            .ok_or_else(|| anyhow!("unknown content {id}"))?;
        item.display_language = Some(language.to_string());
        Ok(())
    }

    async fn upsert_job(&self, job: TranscriptionJob) -> Result<()> {
        self.lock().jobs.insert(job.content_id.clone(), job);
        Ok(())
    }

    async fn job_by_provider_id(&self, provider_job_id: &str) -> Result<Option<TranscriptionJob>> {
        Ok(self
            .lock()
            .jobs
            .values()
            .find(|j| j.provider_job_id == provider_job_id)
            .cloned())
    }

    async fn remove_job(&self, content_id: &str) -> Result<()> {
        self.lock().jobs.remove(content_id);
        Ok(())
    }

    async fn unresolved_jobs(&self) -> Result<Vec<TranscriptionJob>> {
        let g = self.lock();
        let mut jobs: Vec<TranscriptionJob> = g
            .jobs
            .values()
            .filter(|j| {
                g.contents
                    .get(&j.content_id)
                    .map(|c| c.extracted_text.is_none())
                    .unwrap_or(false)
            })
            .cloned()
            .collect();
        jobs.sort_by_key(|j| j.submitted_at);
        Ok(jobs)
    }
}

#[async_trait]
impl SummaryStore for InMemoryStore {
    async fn upsert_placeholder(
        &self,
        content_id: &str,
        language: &str,
        model: Option<String>,
    ) -> Result<Summary> {
        let mut g = self.lock();
        let key = (content_id.to_string(), language.to_string());
        let row = g
            .summaries
            .entry(key)
            .or_insert_with(|| Summary::placeholder(content_id, language, model));
        Ok(row.clone())
    }

    async fn summary(&self, content_id: &str, language: &str) -> Result<Option<Summary>> {
        Ok(self
            .lock()
            .summaries
            .get(&(content_id.to_string(), language.to_string()))
            .cloned())
    }

    async fn completed_summaries(&self, content_id: &str) -> Result<Vec<Summary>> {
        Ok(self
            .lock()
            .summaries
            .values()
            .filter(|s| s.content_id == content_id && s.status == SummaryStatus::Complete)
            .cloned()
            .collect())
    }

    async fn store_section(
        &self,
        content_id: &str,
        language: &str,
        payload: SectionPayload,
    ) -> Result<SummaryStatus> {
        let mut g = self.lock();
        let key = (content_id.to_string(), language.to_string());
        let row = g
            .summaries
            .get_mut(&key)
            .ok_or_else(|| anyhow!("no summary row for {content_id}/{language}"))?;
        row.apply(payload);
        row.advance_status();
        Ok(row.status)
    }

    async fn record_section_error(
        &self,
        content_id: &str,
        language: &str,
        section: &str,
        cause: &str,
    ) -> Result<()> {
        let mut g = self.lock();
        let key = (content_id.to_string(), language.to_string());
        let row = g
            .summaries
            .get_mut(&key)
            .ok_or_else(|| anyhow!("no summary row for {content_id}/{language}"))?;
        if !row.failed_sections.iter().any(|s| s == section) {
            row.failed_sections.push(section.to_string());
        }
        row.error_cause = Some(cause.to_string());
        row.updated_at = Utc::now();
        Ok(())
    }

    async fn set_status(
        &self,
        content_id: &str,
        language: &str,
        status: SummaryStatus,
        cause: Option<String>,
    ) -> Result<()> {
        let mut g = self.lock();
        let key = (content_id.to_string(), language.to_string());
        let row = g
            .summaries
            .get_mut(&key)
            .ok_or_else(|| anyhow!("no summary row for {content_id}/{language}"))?;
        row.status = status;
        if cause.is_some() {
            row.error_cause = cause;
        }
        row.updated_at = Utc::now();
        Ok(())
    }

    async fn begin_translation(
        &self,
        content_id: &str,
        language: &str,
    ) -> Result<TranslationTicket> {
        let mut g = self.lock();
        let key = (content_id.to_string(), language.to_string());
        match g.summaries.get_mut(&key) {
            Some(row) => match row.status {
                SummaryStatus::Complete => Ok(TranslationTicket::AlreadyComplete(row.clone())),
                SummaryStatus::Translating => Ok(TranslationTicket::InFlight),
                _ => {
                    // Failed or stale row: this caller takes it over.
                    row.status = SummaryStatus::Translating;
                    row.error_cause = None;
                    row.updated_at = Utc::now();
                    Ok(TranslationTicket::Started)
                }
            },
            None => {
                let mut row = Summary::placeholder(content_id, language, None);
                row.status = SummaryStatus::Translating;
                g.summaries.insert(key, row);
                Ok(TranslationTicket::Started)
            }
        }
    }

    async fn replace_summary(&self, summary: Summary) -> Result<()> {
        let key = (summary.content_id.clone(), summary.language.clone());
        self.lock().summaries.insert(key, summary);
        Ok(())
    }
}

#[async_trait]
impl FeedStore for InMemoryStore {
    async fn insert_subscription(&self, sub: FeedSubscription) -> Result<()> {
        self.lock().subscriptions.insert(sub.id.clone(), sub);
        Ok(())
    }

    async fn subscription(&self, id: &str) -> Result<Option<FeedSubscription>> {
        Ok(self.lock().subscriptions.get(id).cloned())
    }

    async fn remove_subscription(&self, id: &str) -> Result<()> {
        self.lock().subscriptions.remove(id);
        Ok(())
    }

    async fn list_due(&self, kind: FeedKind, now: DateTime<Utc>) -> Result<Vec<FeedSubscription>> {
        let mut due: Vec<FeedSubscription> = self
            .lock()
            .subscriptions
            .values()
            .filter(|s| s.kind == kind && s.due(now))
            .cloned()
            .collect();
        due.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(due)
    }

    async fn record_success(
        &self,
        id: &str,
        checked_at: DateTime<Utc>,
        watermark: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let mut g = self.lock();
        let sub = g
            .subscriptions
            .get_mut(id)
            .ok_or_else(|| anyhow!("unknown subscription {id}"))?;
        sub.last_checked_at = Some(checked_at);
        sub.consecutive_failures = 0;
        sub.last_error = None;
        if watermark.is_some() {
            sub.watermark = watermark;
        }
        Ok(())
    }

    async fn record_failure(
        &self,
        id: &str,
        checked_at: DateTime<Utc>,
        error: &str,
        threshold: u32,
    ) -> Result<FailureOutcome> {
        let mut g = self.lock();
        let sub = g
            .subscriptions
            .get_mut(id)
            .ok_or_else(|| anyhow!("unknown subscription {id}"))?;
        sub.last_checked_at = Some(checked_at);
        sub.consecutive_failures += 1;
        sub.last_error = Some(error.to_string());
        let deactivated = sub.active && sub.consecutive_failures >= threshold;
        if deactivated {
            sub.active = false;
        }
        Ok(FailureOutcome {
            consecutive_failures: sub.consecutive_failures,
            deactivated,
        })
    }

    async fn insert_item(&self, item: FeedItem) -> Result<bool> {
        let mut g = self.lock();
        let key = (item.subscription_id.clone(), item.url.clone());
        if !g.item_keys.insert(key) {
            return Ok(false);
        }
        g.items.push(item);
        Ok(true)
    }
}

#[async_trait]
impl UserStore for InMemoryStore {
    async fn upsert_user(&self, user: UserProfile) -> Result<()> {
        self.lock().users.insert(user.id.clone(), user);
        Ok(())
    }

    async fn user(&self, id: &str) -> Result<Option<UserProfile>> {
        Ok(self.lock().users.get(id).cloned())
    }
}

#[async_trait]
impl UsageStore for InMemoryStore {
    async fn increment_if_below(
        &self,
        user: &str,
        period: &str,
        metric: UsageMetric,
        limit: u32,
    ) -> Result<bool> {
        let mut g = self.lock();
        let key = (user.to_string(), period.to_string(), metric.as_str());
        let count = g.usage.entry(key).or_insert(0);
        if *count >= limit {
            return Ok(false);
        }
        *count += 1;
        Ok(true)
    }

    async fn current_count(&self, user: &str, period: &str, metric: UsageMetric) -> Result<u32> {
        Ok(self
            .lock()
            .usage
            .get(&(user.to_string(), period.to_string(), metric.as_str()))
            .copied()
            .unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ContentItem, ContentKind};

    #[tokio::test]
    async fn conditional_text_write_is_first_wins() {
        let store = InMemoryStore::shared();
        let item = ContentItem::new("https://example.com/p.mp3", ContentKind::Podcast, "u1");
        let id = item.id.clone();
        store.insert_content(item).await.unwrap();

        assert!(store
            .set_extracted_text_if_absent(&id, "first", Some(120), Some(2))
            .await
            .unwrap());
        assert!(!store
            .set_extracted_text_if_absent(&id, "second", None, None)
            .await
            .unwrap());

        let item = store.content(&id).await.unwrap().unwrap();
        assert_eq!(item.extracted_text.as_deref(), Some("first"));
        assert_eq!(item.duration_secs, Some(120));
    }

    #[tokio::test]
    async fn feed_item_insert_dedupes_on_sub_and_url() {
        let store = InMemoryStore::shared();
        let item = FeedItem {
            subscription_id: "s1".into(),
            url: "https://pod/ep1".into(),
            title: "Ep 1".into(),
            published_at: Utc::now(),
            audio_url: None,
        };
        assert!(store.insert_item(item.clone()).await.unwrap());
        assert!(!store.insert_item(item).await.unwrap());
    }

    #[tokio::test]
    async fn begin_translation_is_exclusive() {
        let store = InMemoryStore::shared();
        let first = store.begin_translation("c1", "de").await.unwrap();
        assert!(matches!(first, TranslationTicket::Started));
        let second = store.begin_translation("c1", "de").await.unwrap();
        assert!(matches!(second, TranslationTicket::InFlight));
    }
}

// src/notify/mod.rs
//! Notification sinks for feed digests. The mux fans one event out to every
//! configured sink and swallows sink failures; notifications are
//! best-effort and never fail a poll run.

pub mod email;
pub mod webhook;

use chrono::{DateTime, Utc};
use tracing::warn;

#[derive(Debug, Clone)]
pub struct DigestItem {
    pub feed: String,
    pub title: String,
    pub url: String,
}

/// One event per user per poll run, carrying every new item at once.
#[derive(Debug, Clone)]
pub struct FeedDigestEvent {
    pub user: String,
    pub items: Vec<DigestItem>,
    pub ts: DateTime<Utc>,
}

#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: &FeedDigestEvent) -> anyhow::Result<()>;
    fn name(&self) -> &'static str;
}

pub struct NotifierMux {
    sinks: Vec<Box<dyn Notifier>>,
}

impl NotifierMux {
    /// Build from env: `NOTIFY_WEBHOOK_URL` enables the webhook sink,
    /// `SMTP_HOST` (plus friends) enables email.
    pub fn from_env() -> Self {
        let mut sinks: Vec<Box<dyn Notifier>> = Vec::new();
        if let Ok(url) = std::env::var("NOTIFY_WEBHOOK_URL") {
            if !url.is_empty() {
                sinks.push(Box::new(webhook::WebhookNotifier::new(url)));
            }
        }
        if let Some(sender) = email::EmailSender::from_env() {
            sinks.push(Box::new(sender));
        }
        Self { sinks }
    }

    pub fn noop() -> Self {
        Self { sinks: Vec::new() }
    }

    pub fn with_sink(mut self, sink: Box<dyn Notifier>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub async fn notify(&self, event: &FeedDigestEvent) {
        for sink in &self.sinks {
            if let Err(e) = sink.notify(event).await {
                warn!(sink = sink.name(), user = event.user.as_str(), error = %e, "notification failed");
            }
        }
    }
}

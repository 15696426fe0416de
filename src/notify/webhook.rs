// src/notify/webhook.rs
//! Generic JSON webhook sink with bounded retries and backoff.

use anyhow::{anyhow, Result};
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;

use super::{FeedDigestEvent, Notifier};

pub struct WebhookNotifier {
    endpoint: String,
    client: Client,
    timeout: Duration,
    max_retries: u8,
}

impl WebhookNotifier {
    pub fn new(endpoint: String) -> Self {
        Self {
            endpoint,
            client: Client::new(),
            timeout: Duration::from_secs(5),
            max_retries: 3,
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }

    pub fn with_retries(mut self, retries: u8) -> Self {
        self.max_retries = retries;
        self
    }
}

#[derive(Serialize)]
struct WirePayload<'a> {
    user: &'a str,
    item_count: usize,
    items: Vec<WireItem<'a>>,
    timestamp: String,
}

#[derive(Serialize)]
struct WireItem<'a> {
    feed: &'a str,
    title: &'a str,
    url: &'a str,
}

#[async_trait::async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, event: &FeedDigestEvent) -> Result<()> {
        let payload = WirePayload {
            user: &event.user,
            item_count: event.items.len(),
            items: event
                .items
                .iter()
                .map(|i| WireItem {
                    feed: &i.feed,
                    title: &i.title,
                    url: &i.url,
                })
                .collect(),
            timestamp: event.ts.to_rfc3339(),
        };

        let mut attempt: u8 = 0;
        loop {
            attempt += 1;
            let res = self
                .client
                .post(&self.endpoint)
                .timeout(self.timeout)
                .json(&payload)
                .send()
                .await;

            match res {
                Ok(rsp) => {
                    if let Err(e) = rsp.error_for_status_ref() {
                        if attempt < self.max_retries {
                            tokio::time::sleep(Duration::from_millis(500u64 << (attempt - 1)))
                                .await;
                            continue;
                        }
                        return Err(anyhow!("webhook HTTP error: {e}"));
                    }
                    return Ok(());
                }
                Err(e) => {
                    if attempt < self.max_retries {
                        tokio::time::sleep(Duration::from_millis(500u64 << (attempt - 1))).await;
                        continue;
                    }
                    return Err(anyhow!("webhook request failed: {e}"));
                }
            }
        }
    }

    fn name(&self) -> &'static str {
        "webhook"
    }
}

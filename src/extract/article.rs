// src/extract/article.rs
//! Article extraction via a generic web-scraping provider.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{error_for_status, normalize_scraped_text, ExtractError, Extraction, ExtractionMeta, Extractor};
use crate::store::ContentItem;

pub struct ArticleScrapeExtractor {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    max_chars: usize,
}

impl ArticleScrapeExtractor {
    pub fn new(endpoint: &str, api_key: &str, attempt_timeout: Duration, max_chars: usize) -> Self {
        let http = reqwest::Client::builder()
            .user_agent("insight-pipeline/0.1")
            .connect_timeout(Duration::from_secs(4))
            .timeout(attempt_timeout)
            .build()
            .expect("reqwest client");
        Self {
            http,
            endpoint: endpoint.to_string(),
            api_key: api_key.to_string(),
            max_chars,
        }
    }

    pub fn from_env(attempt_timeout: Duration, max_chars: usize) -> Self {
        let endpoint = std::env::var("SCRAPE_API_URL")
            .unwrap_or_else(|_| "https://api.scraperapi.example/scrape".to_string());
        let key = std::env::var("SCRAPE_API_KEY").unwrap_or_default();
        Self::new(&endpoint, &key, attempt_timeout, max_chars)
    }
}

#[derive(Serialize)]
struct ScrapeReq<'a> {
    url: &'a str,
}

#[derive(Deserialize)]
struct ScrapeResp {
    #[serde(default)]
    content: String,
    #[serde(default)]
    author: Option<String>,
}

#[async_trait]
impl Extractor for ArticleScrapeExtractor {
    async fn extract(&self, item: &ContentItem) -> Result<Extraction, ExtractError> {
        let resp = self
            .http
            .post(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .json(&ScrapeReq { url: &item.url })
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ExtractError::Timeout
                } else {
                    ExtractError::Network(e.to_string())
                }
            })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(error_for_status(status));
        }

        let body: ScrapeResp = resp
            .json()
            .await
            .map_err(|e| ExtractError::Network(format!("scrape body: {e}")))?;

        let text = normalize_scraped_text(&body.content, self.max_chars);
        if text.is_empty() {
            return Err(ExtractError::Empty);
        }

        Ok(Extraction {
            text,
            meta: ExtractionMeta {
                duration_secs: None,
                author: body.author,
                thumbnail_url: None,
            },
        })
    }

    fn name(&self) -> &'static str {
        "article_scrape"
    }
}

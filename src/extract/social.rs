// src/extract/social.rs
//! Social-post extraction: same scraping provider as articles, different
//! endpoint shape (a single post plus author/thread context).

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use super::{error_for_status, normalize_scraped_text, ExtractError, Extraction, ExtractionMeta, Extractor};
use crate::store::ContentItem;

pub struct SocialPostExtractor {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl SocialPostExtractor {
    pub fn new(endpoint: &str, api_key: &str, attempt_timeout: Duration) -> Self {
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
        }
    }

    pub fn from_env(attempt_timeout: Duration) -> Self {
        let endpoint = std::env::var("SOCIAL_API_URL")
            .unwrap_or_else(|_| "https://api.scraperapi.example/post".to_string());
        let key = std::env::var("SCRAPE_API_KEY").unwrap_or_default();
        Self::new(&endpoint, &key, attempt_timeout)
    }
}

#[derive(Deserialize)]
struct PostResp {
    #[serde(default)]
    text: String,
    #[serde(default)]
    author: Option<String>,
    /// Replies by the same author, appended in thread order.
    #[serde(default)]
    thread: Vec<String>,
}

#[async_trait]
impl Extractor for SocialPostExtractor {
    async fn extract(&self, item: &ContentItem) -> Result<Extraction, ExtractError> {
        let resp = self
            .http
            .get(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .query(&[("url", item.url.as_str())])
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

        let body: PostResp = resp
            .json()
            .await
            .map_err(|e| ExtractError::Network(format!("post body: {e}")))?;

        let mut parts = vec![body.text];
        parts.extend(body.thread);
        let combined = parts
            .iter()
            .map(|p| normalize_scraped_text(p, 5_000))
            .filter(|p| !p.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n");
        if combined.is_empty() {
            return Err(ExtractError::Empty);
        }

        let author = body.author;
        Ok(Extraction {
            text: combined,
            meta: ExtractionMeta {
                duration_secs: None,
                author,
                thumbnail_url: None,
            },
        })
    }

    fn name(&self) -> &'static str {
        "social_post"
    }
}

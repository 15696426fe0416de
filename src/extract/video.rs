// src/extract/video.rs
//! Video transcript extraction via a metadata/transcript provider
//! (Supadata-style JSON API keyed by URL).

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use super::{error_for_status, ExtractError, Extraction, ExtractionMeta, Extractor};
use crate::store::ContentItem;

pub struct VideoTranscriptExtractor {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl VideoTranscriptExtractor {
    pub fn new(base_url: &str, api_key: &str, attempt_timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .user_agent("insight-pipeline/0.1")
            .connect_timeout(Duration::from_secs(4))
            .timeout(attempt_timeout)
            .build()
            .expect("reqwest client");
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }

    pub fn from_env(attempt_timeout: Duration) -> Self {
        let base = std::env::var("VIDEO_API_URL")
            .unwrap_or_else(|_| "https://api.supadata.ai/v1".to_string());
        let key = std::env::var("VIDEO_API_KEY").unwrap_or_default();
        Self::new(&base, &key, attempt_timeout)
    }
}

#[derive(Deserialize)]
struct TranscriptSegment {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct TranscriptResp {
    #[serde(default)]
    content: Vec<TranscriptSegment>,
    #[serde(default)]
    duration: Option<u32>,
    #[serde(default)]
    author: Option<String>,
    #[serde(default)]
    thumbnail: Option<String>,
}

#[async_trait]
impl Extractor for VideoTranscriptExtractor {
    async fn extract(&self, item: &ContentItem) -> Result<Extraction, ExtractError> {
        let resp = self
            .http
            .get(format!("{}/transcript", self.base_url))
            .header("x-api-key", &self.api_key)
            .query(&[("url", item.url.as_str()), ("text", "true")])
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

        let body: TranscriptResp = resp
            .json()
            .await
            .map_err(|e| ExtractError::Network(format!("transcript body: {e}")))?;

        let text = body
            .content
            .iter()
            .map(|s| s.text.trim())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        if text.is_empty() {
            return Err(ExtractError::Empty);
        }

        Ok(Extraction {
            text,
            meta: ExtractionMeta {
                duration_secs: body.duration,
                author: body.author,
                thumbnail_url: body.thumbnail,
            },
        })
    }

    fn name(&self) -> &'static str {
        "video_transcript"
    }
}

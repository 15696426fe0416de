// src/ai/search.rs
//! Web-search grounding for the fact-check section. Queries are deduplicated
//! by near-identity before any network call so the shared per-item search
//! budget is not wasted on rephrasings.

use std::sync::Mutex;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;

/// Two queries at or above this similarity are considered the same search.
const DEDUP_SIMILARITY: f64 = 0.82;

#[derive(Debug, Clone)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

#[async_trait]
pub trait SearchClient: Send + Sync {
    async fn search(&self, query: &str, max_hits: usize) -> Result<Vec<SearchHit>>;
    fn name(&self) -> &'static str;
}

/// Drop near-duplicate queries (case-insensitive, whitespace-collapsed
/// Levenshtein similarity), keep first occurrences, cap at `max`.
pub fn dedup_queries(queries: &[String], max: usize) -> Vec<String> {
    let mut kept: Vec<String> = Vec::new();
    for q in queries {
        let norm = normalize(q);
        if norm.is_empty() {
            continue;
        }
        let dup = kept
            .iter()
            .any(|k| strsim::normalized_levenshtein(&normalize(k), &norm) >= DEDUP_SIMILARITY);
        if !dup {
            kept.push(q.trim().to_string());
        }
        if kept.len() == max {
            break;
        }
    }
    kept
}

fn normalize(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

// ---------------------------------------------------------------------------
// HTTP implementation (generic JSON search API with an API-key header)
// ---------------------------------------------------------------------------

pub struct HttpSearchClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl HttpSearchClient {
    pub fn new(endpoint: &str, api_key: &str, timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .user_agent("insight-pipeline/0.1")
            .connect_timeout(Duration::from_secs(4))
            .timeout(timeout)
            .build()
            .expect("reqwest client");
        Self {
            http,
            endpoint: endpoint.to_string(),
            api_key: api_key.to_string(),
        }
    }

    /// Reads `SEARCH_ENDPOINT` and `SEARCH_API_KEY`; returns `None` when the
    /// service is not configured (fact-checking then runs ungrounded).
    pub fn from_env() -> Option<Self> {
        let endpoint = std::env::var("SEARCH_ENDPOINT").ok()?;
        let key = std::env::var("SEARCH_API_KEY").unwrap_or_default();
        Some(Self::new(&endpoint, &key, Duration::from_secs(15)))
    }
}

#[derive(Deserialize)]
struct WireHit {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    snippet: String,
}

#[derive(Deserialize)]
struct WireSearchResp {
    #[serde(default)]
    results: Vec<WireHit>,
}

#[async_trait]
impl SearchClient for HttpSearchClient {
    async fn search(&self, query: &str, max_hits: usize) -> Result<Vec<SearchHit>> {
        let resp = self
            .http
            .get(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .query(&[("q", query)])
            .send()
            .await?
            .error_for_status()?;
        let body: WireSearchResp = resp.json().await?;
        Ok(body
            .results
            .into_iter()
            .take(max_hits)
            .map(|h| SearchHit {
                title: h.title,
                url: h.url,
                snippet: h.snippet,
            })
            .collect())
    }

    fn name(&self) -> &'static str {
        "http_search"
    }
}

/// Used when no search service is configured.
pub struct NoopSearchClient;

#[async_trait]
impl SearchClient for NoopSearchClient {
    async fn search(&self, _query: &str, _max_hits: usize) -> Result<Vec<SearchHit>> {
        Ok(Vec::new())
    }

    fn name(&self) -> &'static str {
        "noop_search"
    }
}

/// Test double: canned hits, records every query it receives.
#[derive(Default)]
pub struct MockSearchClient {
    hits: Vec<SearchHit>,
    queries: Mutex<Vec<String>>,
}

impl MockSearchClient {
    pub fn with_hits(hits: Vec<SearchHit>) -> Self {
        Self {
            hits,
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().expect("mock queries").clone()
    }
}

#[async_trait]
impl SearchClient for MockSearchClient {
    async fn search(&self, query: &str, max_hits: usize) -> Result<Vec<SearchHit>> {
        self.queries
            .lock()
            .expect("mock queries")
            .push(query.to_string());
        Ok(self.hits.iter().take(max_hits).cloned().collect())
    }

    fn name(&self) -> &'static str {
        "mock_search"
    }
}

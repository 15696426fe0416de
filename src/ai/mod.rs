// src/ai/mod.rs
//! AI provider abstraction: a chat-completion client trait, an
//! OpenAI-compatible HTTP implementation, a deterministic mock for tests,
//! and the generic fallback runner that consumes an ordered model list.
//!
//! Adding a model is a data change (another name in the list), not a code
//! change.

pub mod search;

use std::sync::Mutex;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use metrics::{counter, histogram};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Clone, Error)]
pub enum AiCallError {
    #[error("http status {0}")]
    Status(u16),
    #[error("network: {0}")]
    Network(String),
    #[error("timed out")]
    Timeout,
    #[error("empty completion")]
    Empty,
    #[error("malformed completion: {0}")]
    Malformed(String),
}

impl AiCallError {
    fn outcome(&self) -> &'static str {
        match self {
            AiCallError::Status(_) => "status",
            AiCallError::Network(_) => "network",
            AiCallError::Timeout => "timeout",
            AiCallError::Empty => "empty",
            AiCallError::Malformed(_) => "malformed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub system: String,
    pub user: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Debug, Clone)]
pub struct ChatOutcome {
    pub text: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn complete(&self, req: &ChatRequest) -> Result<ChatOutcome, AiCallError>;
    fn name(&self) -> &'static str;
}

/// Attempt metadata returned alongside a successful fallback run.
#[derive(Debug, Clone)]
pub struct AttemptReport {
    pub model: String,
    pub latency_ms: u64,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

/// Try each model in order until one returns parseable JSON. Non-2xx,
/// empty, timed-out and unparseable completions all advance the chain.
/// Every attempt, successful or not, is logged with latency, token
/// counts and status for cost accounting.
pub async fn complete_json_with_fallback<T: DeserializeOwned>(
    client: &dyn ChatClient,
    models: &[String],
    system: &str,
    user: &str,
    temperature: f32,
    max_tokens: u32,
    call_timeout: Duration,
    label: &str,
) -> Result<(T, AttemptReport)> {
    for model in models {
        let req = ChatRequest {
            model: model.clone(),
            system: system.to_string(),
            user: user.to_string(),
            temperature,
            max_tokens,
        };

        let started = Instant::now();
        let result = match tokio::time::timeout(call_timeout, client.complete(&req)).await {
            Ok(r) => r,
            Err(_) => Err(AiCallError::Timeout),
        };
        let latency_ms = started.elapsed().as_millis() as u64;
        histogram!("ai_call_latency_ms", "label" => label.to_string()).record(latency_ms as f64);

        let outcome = match result {
            Ok(o) if o.text.trim().is_empty() => Err(AiCallError::Empty),
            other => other,
        };

        match outcome {
            Ok(o) => match extract_json::<T>(&o.text) {
                Ok(value) => {
                    crate::sanitize::scan_output(&o.text, label);
                    info!(
                        target: "ai",
                        label,
                        model = model.as_str(),
                        latency_ms,
                        prompt_tokens = o.prompt_tokens,
                        completion_tokens = o.completion_tokens,
                        "ai call ok"
                    );
                    counter!("ai_calls_total", "label" => label.to_string(), "outcome" => "ok")
                        .increment(1);
                    counter!("ai_tokens_total", "kind" => "prompt")
                        .increment(o.prompt_tokens as u64);
                    counter!("ai_tokens_total", "kind" => "completion")
                        .increment(o.completion_tokens as u64);
                    return Ok((
                        value,
                        AttemptReport {
                            model: model.clone(),
                            latency_ms,
                            prompt_tokens: o.prompt_tokens,
                            completion_tokens: o.completion_tokens,
                        },
                    ));
                }
                Err(e) => {
                    warn!(
                        target: "ai",
                        label,
                        model = model.as_str(),
                        latency_ms,
                        prompt_tokens = o.prompt_tokens,
                        completion_tokens = o.completion_tokens,
                        error = %e,
                        "ai call unparseable; falling back"
                    );
                    counter!("ai_calls_total", "label" => label.to_string(), "outcome" => e.outcome())
                        .increment(1);
                }
            },
            Err(e) => {
                warn!(
                    target: "ai",
                    label,
                    model = model.as_str(),
                    latency_ms,
                    error = %e,
                    "ai call failed; falling back"
                );
                counter!("ai_calls_total", "label" => label.to_string(), "outcome" => e.outcome())
                    .increment(1);
            }
        }
    }
    Err(anyhow!("all models exhausted for {label}"))
}

/// Strip a single markdown code fence (with optional info string).
pub fn strip_code_fences(text: &str) -> &str {
    let t = text.trim();
    let Some(rest) = t.strip_prefix("```") else {
        return t;
    };
    let body = match rest.split_once('\n') {
        Some((_, body)) => body,
        None => rest,
    };
    body.strip_suffix("```").unwrap_or(body).trim()
}

/// Parse a model completion into `T`: direct parse, then fence-stripped,
/// then the outermost `{...}` block.
pub fn extract_json<T: DeserializeOwned>(text: &str) -> Result<T, AiCallError> {
    let stripped = strip_code_fences(text);
    if let Ok(v) = serde_json::from_str::<T>(stripped) {
        return Ok(v);
    }
    if let (Some(start), Some(end)) = (stripped.find('{'), stripped.rfind('}')) {
        if start < end {
            if let Ok(v) = serde_json::from_str::<T>(&stripped[start..=end]) {
                return Ok(v);
            }
        }
    }
    Err(AiCallError::Malformed(
        stripped.chars().take(120).collect::<String>(),
    ))
}

// ---------------------------------------------------------------------------
// OpenAI-compatible HTTP client
// ---------------------------------------------------------------------------

pub struct OpenAiCompatClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl OpenAiCompatClient {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .user_agent("insight-pipeline/0.1")
            .connect_timeout(Duration::from_secs(4))
            .timeout(timeout)
            .build()
            .expect("reqwest client");
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }

    /// Reads `AI_BASE_URL` (default OpenAI) and `AI_API_KEY`.
    pub fn from_env() -> Self {
        let base = std::env::var("AI_BASE_URL")
            .unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
        let key = std::env::var("AI_API_KEY").unwrap_or_default();
        Self::new(&base, &key, Duration::from_secs(60))
    }
}

#[derive(Serialize)]
struct WireMsg<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct WireReq<'a> {
    model: &'a str,
    messages: Vec<WireMsg<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

#[derive(Deserialize)]
struct WireChoiceMsg {
    content: String,
}

#[derive(Deserialize)]
struct WireChoice {
    message: WireChoiceMsg,
}

#[derive(Deserialize)]
struct WireResp {
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[async_trait]
impl ChatClient for OpenAiCompatClient {
    async fn complete(&self, req: &ChatRequest) -> Result<ChatOutcome, AiCallError> {
        if self.api_key.is_empty() {
            return Err(AiCallError::Network("missing AI_API_KEY".to_string()));
        }

        let wire = WireReq {
            model: &req.model,
            messages: vec![
                WireMsg {
                    role: "system",
                    content: &req.system,
                },
                WireMsg {
                    role: "user",
                    content: &req.user,
                },
            ],
            temperature: req.temperature,
            max_tokens: req.max_tokens,
        };

        let resp = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&wire)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AiCallError::Timeout
                } else {
                    AiCallError::Network(e.to_string())
                }
            })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(AiCallError::Status(status.as_u16()));
        }

        let body: WireResp = resp
            .json()
            .await
            .map_err(|e| AiCallError::Malformed(e.to_string()))?;
        let text = body
            .choices
            .first()
            .map(|c| c.message.content.clone())
            .unwrap_or_default();
        let usage = body.usage.unwrap_or(WireUsage {
            prompt_tokens: 0,
            completion_tokens: 0,
        });
        Ok(ChatOutcome {
            text,
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
        })
    }

    fn name(&self) -> &'static str {
        "openai_compat"
    }
}

// ---------------------------------------------------------------------------
// Deterministic mock for tests
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct MockRule {
    /// Exact model name match; `None` matches every model.
    pub model: Option<String>,
    /// Substring match against the user prompt; `None` matches everything.
    pub prompt_contains: Option<String>,
    pub reply: Result<String, AiCallError>,
}

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub model: String,
    pub user: String,
}

/// Scripted mock: first matching rule wins; unmatched calls return `Empty`
/// so a test cannot silently succeed on a prompt it never scripted.
#[derive(Default)]
pub struct MockChatClient {
    rules: Mutex<Vec<MockRule>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl MockChatClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_rule(&self, rule: MockRule) {
        self.rules.lock().expect("mock rules").push(rule);
    }

    pub fn clear_rules(&self) {
        self.rules.lock().expect("mock rules").clear();
    }

    /// Reply with `body` whenever the user prompt contains `marker`.
    pub fn on_prompt(&self, marker: &str, body: &str) {
        self.push_rule(MockRule {
            model: None,
            prompt_contains: Some(marker.to_string()),
            reply: Ok(body.to_string()),
        });
    }

    /// Make every call against `model` fail with a 500.
    pub fn fail_model(&self, model: &str) {
        self.push_rule(MockRule {
            model: Some(model.to_string()),
            prompt_contains: None,
            reply: Err(AiCallError::Status(500)),
        });
    }

    /// Fail calls against `model` whose prompt contains `marker`.
    pub fn fail_model_prompt(&self, model: &str, marker: &str) {
        self.push_rule(MockRule {
            model: Some(model.to_string()),
            prompt_contains: Some(marker.to_string()),
            reply: Err(AiCallError::Status(500)),
        });
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().expect("mock calls").clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().expect("mock calls").len()
    }

    pub fn calls_matching(&self, marker: &str) -> usize {
        self.calls
            .lock()
            .expect("mock calls")
            .iter()
            .filter(|c| c.user.contains(marker))
            .count()
    }
}

#[async_trait]
impl ChatClient for MockChatClient {
    async fn complete(&self, req: &ChatRequest) -> Result<ChatOutcome, AiCallError> {
        self.calls.lock().expect("mock calls").push(RecordedCall {
            model: req.model.clone(),
            user: req.user.clone(),
        });

        let rules = self.rules.lock().expect("mock rules");
        for rule in rules.iter() {
            let model_ok = rule.model.as_deref().map(|m| m == req.model).unwrap_or(true);
            let prompt_ok = rule
                .prompt_contains
                .as_deref()
                .map(|m| req.user.contains(m))
                .unwrap_or(true);
            if model_ok && prompt_ok {
                return rule.reply.clone().map(|text| ChatOutcome {
                    text,
                    prompt_tokens: 100,
                    completion_tokens: 50,
                });
            }
        }
        Err(AiCallError::Empty)
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Deserialize, PartialEq, Debug)]
    struct Probe {
        ok: bool,
    }

    #[test]
    fn fence_stripping() {
        assert_eq!(strip_code_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fences("```\n{}\n```"), "{}");
        assert_eq!(strip_code_fences("  {\"a\":1} "), "{\"a\":1}");
    }

    #[test]
    fn extract_json_tolerates_prose_around_braces() {
        let p: Probe = extract_json("Here you go: {\"ok\": true} - enjoy!").unwrap();
        assert!(p.ok);
        assert!(extract_json::<Probe>("no json at all").is_err());
    }

    #[tokio::test]
    async fn fallback_advances_past_failing_model() {
        let mock = MockChatClient::new();
        mock.fail_model("a");
        mock.on_prompt("probe", "{\"ok\": true}");

        let models = vec!["a".to_string(), "b".to_string()];
        let (p, report) = complete_json_with_fallback::<Probe>(
            &mock,
            &models,
            "sys",
            "probe please",
            0.2,
            100,
            Duration::from_secs(5),
            "test",
        )
        .await
        .unwrap();
        assert!(p.ok);
        assert_eq!(report.model, "b");
        assert_eq!(mock.call_count(), 2);
    }

    #[tokio::test]
    async fn fallback_exhaustion_is_an_error() {
        let mock = MockChatClient::new();
        mock.fail_model("a");
        mock.fail_model("b");
        let models = vec!["a".to_string(), "b".to_string()];
        let err = complete_json_with_fallback::<Probe>(
            &mock,
            &models,
            "sys",
            "u",
            0.2,
            100,
            Duration::from_secs(5),
            "test",
        )
        .await;
        assert!(err.is_err());
    }
}

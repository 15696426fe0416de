// src/config.rs
//! Pipeline configuration: TOML file with env overrides. Missing files and
//! out-of-range values fall back to defaults so a bad deploy cannot take the
//! service down.

use serde::{Deserialize, Serialize};
use std::{env, fs, path::Path};

pub const DEFAULT_CONFIG_PATH: &str = "config/pipeline.toml";
pub const ENV_CONFIG_PATH: &str = "PIPELINE_CONFIG_PATH";
pub const ENV_DEFAULT_LANGUAGE: &str = "PIPELINE_DEFAULT_LANGUAGE";

fn default_fast_models() -> Vec<String> {
    vec!["gpt-4o-mini".into(), "gpt-3.5-turbo".into()]
}
fn default_main_models() -> Vec<String> {
    vec!["gpt-4o".into(), "gpt-4o-mini".into()]
}
fn default_translation_models() -> Vec<String> {
    vec!["gpt-4o-mini".into(), "gpt-3.5-turbo".into()]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    /// Cheap/fast models for phase-1 pre-processing and tag extraction.
    #[serde(default = "default_fast_models")]
    pub fast: Vec<String>,
    /// Main analysis models, tried in order.
    #[serde(default = "default_main_models")]
    pub main: Vec<String>,
    /// Translation models: primary then secondary.
    #[serde(default = "default_translation_models")]
    pub translation: Vec<String>,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            fast: default_fast_models(),
            main: default_main_models(),
            translation: default_translation_models(),
        }
    }
}

fn default_call_timeout_secs() -> u64 {
    45
}
fn default_max_source_chars() -> usize {
    24_000
}
fn default_max_searches() -> usize {
    3
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Hard wall-clock timeout per AI call.
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
    /// Length cap applied by the sanitizer to source text.
    #[serde(default = "default_max_source_chars")]
    pub max_source_chars: usize,
    /// Upper bound on fact-check web searches per content item.
    #[serde(default = "default_max_searches")]
    pub max_searches: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            call_timeout_secs: default_call_timeout_secs(),
            max_source_chars: default_max_source_chars(),
            max_searches: default_max_searches(),
        }
    }
}

fn default_grace_minutes() -> i64 {
    20
}
fn default_hard_minutes() -> i64 {
    120
}
fn default_recovery_batch_cap() -> usize {
    5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryConfig {
    /// Age before a silent transcription is eligible for recovery polling.
    #[serde(default = "default_grace_minutes")]
    pub grace_minutes: i64,
    /// Age past which a transcription is permanently failed.
    #[serde(default = "default_hard_minutes")]
    pub hard_minutes: i64,
    /// Max transcriptions reconciled per scheduled run.
    #[serde(default = "default_recovery_batch_cap")]
    pub batch_cap: usize,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            grace_minutes: default_grace_minutes(),
            hard_minutes: default_hard_minutes(),
            batch_cap: default_recovery_batch_cap(),
        }
    }
}

fn default_extract_attempts() -> u32 {
    3
}
fn default_retry_delay_ms() -> u64 {
    750
}
fn default_attempt_timeout_secs() -> u64 {
    20
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    #[serde(default = "default_extract_attempts")]
    pub attempts: u32,
    /// Base delay between attempts; grows linearly with the attempt number.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_attempt_timeout_secs")]
    pub attempt_timeout_secs: u64,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            attempts: default_extract_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            attempt_timeout_secs: default_attempt_timeout_secs(),
        }
    }
}

fn default_failure_threshold() -> u32 {
    7
}
fn default_poll_interval_secs() -> u64 {
    900
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedsConfig {
    /// Consecutive failures after which a subscription is deactivated.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Scheduler tick for each feed kind.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

impl Default for FeedsConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            poll_interval_secs: default_poll_interval_secs(),
        }
    }
}

fn default_submit_max() -> u32 {
    30
}
fn default_translate_max() -> u32 {
    10
}
fn default_rate_window_secs() -> u64 {
    60
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateConfig {
    #[serde(default = "default_submit_max")]
    pub submit_max: u32,
    #[serde(default = "default_translate_max")]
    pub translate_max: u32,
    #[serde(default = "default_rate_window_secs")]
    pub window_secs: u64,
}

impl Default for RateConfig {
    fn default() -> Self {
        Self {
            submit_max: default_submit_max(),
            translate_max: default_translate_max(),
            window_secs: default_rate_window_secs(),
        }
    }
}

fn default_language() -> String {
    "en".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PipelineConfig {
    #[serde(default)]
    pub models: ModelsConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub recovery: RecoveryConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub feeds: FeedsConfig,
    #[serde(default)]
    pub rate: RateConfig,
    #[serde(default = "default_language")]
    pub default_language: String,
}

impl PipelineConfig {
    /// Load from `PIPELINE_CONFIG_PATH` (or the default path), then apply
    /// env overrides and sanity clamps.
    pub fn load() -> Self {
        let path = env::var(ENV_CONFIG_PATH).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let mut cfg = Self::load_from_file(&path).unwrap_or_else(|e| {
            tracing::info!(path, error = %e, "pipeline config not loaded; using defaults");
            Self::default_with_language()
        });

        if let Ok(lang) = env::var(ENV_DEFAULT_LANGUAGE) {
            let lang = lang.trim().to_lowercase();
            if !lang.is_empty() {
                cfg.default_language = lang;
            }
        }

        cfg.sanitize();
        cfg
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let data = fs::read_to_string(path)?;
        let mut cfg: PipelineConfig = toml::from_str(&data)?;
        if cfg.default_language.is_empty() {
            cfg.default_language = default_language();
        }
        cfg.sanitize();
        Ok(cfg)
    }

    /// `Default::default()` leaves `default_language` empty (serde quirk);
    /// use this for a fully-populated default config.
    pub fn default_with_language() -> Self {
        let mut cfg = Self::default();
        cfg.default_language = default_language();
        cfg
    }

    fn sanitize(&mut self) {
        if self.models.main.is_empty() {
            self.models.main = default_main_models();
        }
        if self.models.fast.is_empty() {
            self.models.fast = default_fast_models();
        }
        if self.models.translation.is_empty() {
            self.models.translation = default_translation_models();
        }
        if self.recovery.grace_minutes <= 0 {
            self.recovery.grace_minutes = default_grace_minutes();
        }
        if self.recovery.hard_minutes <= 0 {
            self.recovery.hard_minutes = default_hard_minutes();
        }
        if self.recovery.grace_minutes > self.recovery.hard_minutes {
            // swap to keep a valid two-tier window
            std::mem::swap(&mut self.recovery.grace_minutes, &mut self.recovery.hard_minutes);
        }
        if self.recovery.batch_cap == 0 {
            self.recovery.batch_cap = default_recovery_batch_cap();
        }
        if self.extraction.attempts == 0 {
            self.extraction.attempts = 1;
        }
        if self.feeds.failure_threshold == 0 {
            self.feeds.failure_threshold = default_failure_threshold();
        }
    }
}

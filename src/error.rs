// src/error.rs
//! Failure taxonomy shared across the pipeline, plus the sentinel marker
//! format stored in a content item's text field when a stage fails.

use thiserror::Error;

/// Prefix of the sentinel stored in `ContentItem::extracted_text` on failure.
pub const FAILURE_PREFIX: &str = "PROCESSING_FAILED";

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Network errors, 5xx responses, timeouts. Retry with backoff up to a
    /// bounded attempt count.
    #[error("transient failure: {0}")]
    Transient(String),

    /// Malformed URL, unsupported content type, empty extracted text. Never
    /// retried; surfaced to the user as-is.
    #[error("invalid input: {0}")]
    PermanentInput(String),

    /// 4xx from a third party (e.g. a blocked scrape). Never retried.
    #[error("provider rejected the request: {0}")]
    ProviderRejected(String),

    /// Tier or usage gate said no. Carries enough for an upgrade hint.
    #[error("{metric} quota exhausted on the {tier} tier (limit {limit}); upgrade to raise the limit")]
    QuotaExceeded {
        metric: String,
        tier: String,
        limit: u32,
    },

    /// Unexpected internal error; logged with full context, surfaced generically.
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl PipelineError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, PipelineError::Transient(_))
    }

    /// Short machine-readable label used in logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Transient(_) => "transient",
            PipelineError::PermanentInput(_) => "permanent_input",
            PipelineError::ProviderRejected(_) => "provider_rejected",
            PipelineError::QuotaExceeded { .. } => "quota_exceeded",
            PipelineError::Internal(_) => "internal",
        }
    }
}

/// Pipeline stage embedded in a sentinel failure marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureStage {
    Extraction,
    Transcription,
    Analysis,
    Translation,
}

impl FailureStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureStage::Extraction => "EXTRACTION",
            FailureStage::Transcription => "TRANSCRIPTION",
            FailureStage::Analysis => "ANALYSIS",
            FailureStage::Translation => "TRANSLATION",
        }
    }

    fn from_str(s: &str) -> Option<Self> {
        match s {
            "EXTRACTION" => Some(FailureStage::Extraction),
            "TRANSCRIPTION" => Some(FailureStage::Transcription),
            "ANALYSIS" => Some(FailureStage::Analysis),
            "TRANSLATION" => Some(FailureStage::Translation),
            _ => None,
        }
    }
}

/// Build `PROCESSING_FAILED::<STAGE>::<REASON>`.
pub fn failure_marker(stage: FailureStage, reason: &str) -> String {
    // Reason is a short code; strip the separator so the marker stays parseable.
    let reason = reason.replace("::", ":");
    format!("{FAILURE_PREFIX}::{}::{}", stage.as_str(), reason)
}

pub fn is_failure_marker(text: &str) -> bool {
    text.starts_with(FAILURE_PREFIX)
}

/// Split a sentinel back into (stage, reason). Returns `None` for ordinary text.
pub fn parse_failure_marker(text: &str) -> Option<(FailureStage, &str)> {
    let rest = text.strip_prefix(FAILURE_PREFIX)?.strip_prefix("::")?;
    let (stage, reason) = rest.split_once("::")?;
    Some((FailureStage::from_str(stage)?, reason))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marker_roundtrip() {
        let m = failure_marker(FailureStage::Transcription, "RECOVERY_TIMEOUT");
        assert!(is_failure_marker(&m));
        let (stage, reason) = parse_failure_marker(&m).unwrap();
        assert_eq!(stage, FailureStage::Transcription);
        assert_eq!(reason, "RECOVERY_TIMEOUT");
    }

    #[test]
    fn ordinary_text_is_not_a_marker() {
        assert!(!is_failure_marker("a perfectly fine transcript"));
        assert!(parse_failure_marker("PROCESSING_FAILED:oops").is_none());
    }

    #[test]
    fn reason_separator_is_neutralized() {
        let m = failure_marker(FailureStage::Extraction, "A::B");
        let (_, reason) = parse_failure_marker(&m).unwrap();
        assert_eq!(reason, "A:B");
    }
}

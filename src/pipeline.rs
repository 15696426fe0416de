// src/pipeline.rs
//! End-to-end driver for a newly submitted content item:
//! extraction → (audio detours through transcription) → analysis.

use tracing::info;

use crate::context::PipelineContext;
use crate::error::PipelineError;
use crate::extract::{run_extraction, ExtractionOutcome};

/// Run the pipeline for a freshly inserted content item. For audio content
/// this ends at "transcription submitted"; the webhook or the recovery
/// poll continues the run later.
pub async fn process_new_content(
    ctx: &PipelineContext,
    content_id: &str,
) -> Result<(), PipelineError> {
    match run_extraction(ctx, content_id).await? {
        ExtractionOutcome::TextReady => {
            crate::analyze::run_analysis(ctx, content_id, &ctx.config.default_language)
                .await
                .map_err(PipelineError::Internal)?;
            Ok(())
        }
        ExtractionOutcome::TranscriptionPending => {
            info!(content_id, "awaiting transcription webhook");
            Ok(())
        }
        ExtractionOutcome::Failed => Ok(()),
    }
}

// src/lib.rs
// Public library surface for integration tests (and potential reuse).

pub mod api;
pub mod config;
pub mod context;
pub mod error;
pub mod limits;
pub mod metrics;
pub mod pipeline;
pub mod sanitize;
pub mod store;

// Content processing pipeline (extraction, transcription, analysis, translation)
pub mod ai;
pub mod analyze;
pub mod extract;
pub mod transcribe;
pub mod translate;

// Scheduled feed polling & notifications
pub mod feeds;
pub mod notify;

// ---- Re-exports for stable public API ----
pub use crate::api::create_router;
pub use crate::config::PipelineConfig;
pub use crate::context::{ExtractorSet, PipelineContext};
pub use crate::error::PipelineError;
pub use crate::pipeline::process_new_content;

// Mock clients used by integration tests and local smoke runs.
pub use crate::ai::search::MockSearchClient;
pub use crate::ai::MockChatClient;
pub use crate::transcribe::MockTranscriptionClient;

// src/context.rs
//! Shared wiring for the pipeline: configuration, injected stores, and the
//! external-service clients. Handlers, schedulers and tests all run against
//! the same `PipelineContext`; tests swap the clients for mocks.

use std::sync::Arc;
use std::time::Duration;

use crate::ai::search::{HttpSearchClient, NoopSearchClient, SearchClient};
use crate::ai::{ChatClient, OpenAiCompatClient};
use crate::config::PipelineConfig;
use crate::extract::article::ArticleScrapeExtractor;
use crate::extract::social::SocialPostExtractor;
use crate::extract::video::VideoTranscriptExtractor;
use crate::extract::Extractor;
use crate::feeds::{FeedFetcher, HttpFeedFetcher};
use crate::limits::{FixedWindowLimiter, UsageGate};
use crate::notify::NotifierMux;
use crate::store::{
    ContentStore, FeedStore, InMemoryStore, SummaryStore, UserStore,
};
use crate::transcribe::{HttpTranscriptionClient, TranscriptionClient};

pub struct ExtractorSet {
    pub video: Arc<dyn Extractor>,
    pub article: Arc<dyn Extractor>,
    pub social: Arc<dyn Extractor>,
}

pub struct PipelineContext {
    pub config: PipelineConfig,
    pub contents: Arc<dyn ContentStore>,
    pub summaries: Arc<dyn SummaryStore>,
    pub feeds: Arc<dyn FeedStore>,
    pub users: Arc<dyn UserStore>,
    pub usage: UsageGate,
    pub rate: FixedWindowLimiter,
    pub chat: Arc<dyn ChatClient>,
    pub search: Arc<dyn SearchClient>,
    pub transcriber: Option<Arc<dyn TranscriptionClient>>,
    pub extractors: ExtractorSet,
    pub feed_fetcher: Arc<dyn FeedFetcher>,
    pub notifier: Arc<NotifierMux>,
}

impl PipelineContext {
    /// Production wiring: HTTP clients from env, in-memory stores as the
    /// default backing (a database-backed store is injected the same way).
    pub fn from_env(config: PipelineConfig) -> Arc<Self> {
        let store = InMemoryStore::shared();
        let attempt_timeout = Duration::from_secs(config.extraction.attempt_timeout_secs);
        let max_chars = config.analysis.max_source_chars;

        let chat: Arc<dyn ChatClient> = Arc::new(OpenAiCompatClient::from_env());
        let search: Arc<dyn SearchClient> = match HttpSearchClient::from_env() {
            Some(client) => Arc::new(client),
            None => Arc::new(NoopSearchClient),
        };
        let transcriber: Option<Arc<dyn TranscriptionClient>> = HttpTranscriptionClient::from_env()
            .map(|c| Arc::new(c) as Arc<dyn TranscriptionClient>);

        let extractors = ExtractorSet {
            video: Arc::new(VideoTranscriptExtractor::from_env(attempt_timeout)),
            article: Arc::new(ArticleScrapeExtractor::from_env(attempt_timeout, max_chars)),
            social: Arc::new(SocialPostExtractor::from_env(attempt_timeout)),
        };

        Self::assemble(
            config,
            store,
            chat,
            search,
            transcriber,
            extractors,
            Arc::new(HttpFeedFetcher::new()),
            NotifierMux::from_env(),
        )
    }

    /// Shared assembly used by `from_env` and by tests injecting mocks.
    #[allow(clippy::too_many_arguments)]
    pub fn assemble(
        config: PipelineConfig,
        store: Arc<InMemoryStore>,
        chat: Arc<dyn ChatClient>,
        search: Arc<dyn SearchClient>,
        transcriber: Option<Arc<dyn TranscriptionClient>>,
        extractors: ExtractorSet,
        feed_fetcher: Arc<dyn FeedFetcher>,
        notifier: NotifierMux,
    ) -> Arc<Self> {
        crate::metrics::ensure_described();
        Arc::new(Self {
            config,
            contents: store.clone(),
            summaries: store.clone(),
            feeds: store.clone(),
            users: store.clone(),
            usage: UsageGate::new(store),
            rate: FixedWindowLimiter::in_memory(),
            chat,
            search,
            transcriber,
            extractors,
            feed_fetcher,
            notifier: Arc::new(notifier),
        })
    }
}

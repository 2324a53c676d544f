use crate::core::config::Settings;
use crate::core::types::Document;
use crate::error::PipelineError;
use crate::extract::{Fetcher, HttpFetcher};
use crate::llm::{CompletionBackend, GroqBackend, LlmService};
use crate::memory::ResearchMemory;
use crate::search::SearchRegistry;
use std::sync::Arc;

/// Shared application state: one instance per process, cloned into every
/// tool call. Pipeline runs contend only on `memory`.
#[derive(Clone)]
pub struct AppState {
    pub http_client: reqwest::Client,
    pub settings: Arc<Settings>,
    pub llm: Arc<LlmService>,
    pub search: Arc<SearchRegistry>,
    pub fetcher: Arc<dyn Fetcher>,
    pub memory: Arc<ResearchMemory>,
    /// Per-URL fetched-document cache; repeated runs on overlapping topics
    /// skip the network for already-seen pages.
    pub document_cache: moka::future::Cache<String, Document>,
    /// Global cap on concurrent outbound fetches.
    pub outbound_limit: Arc<tokio::sync::Semaphore>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("providers", &self.search.provider_names())
            .finish()
    }
}

impl AppState {
    /// Production wiring: Groq LLM, configured search providers, HTTP
    /// fetcher, persistent memory.
    pub async fn initialize(settings: Settings) -> Result<Self, PipelineError> {
        settings.validate()?;

        let http_client = reqwest::Client::builder()
            .build()
            .map_err(|e| PipelineError::Config(format!("http client build failed: {e}")))?;

        let backend: Arc<dyn CompletionBackend> =
            Arc::new(GroqBackend::new(http_client.clone(), &settings));
        let llm = Arc::new(LlmService::new(backend, &settings));
        let search = Arc::new(SearchRegistry::from_settings(http_client.clone(), &settings));
        let fetcher: Arc<dyn Fetcher> = Arc::new(HttpFetcher::new(http_client.clone()));
        let memory = Arc::new(ResearchMemory::open(&settings).await?);

        Ok(Self::with_components(
            http_client,
            settings,
            llm,
            search,
            fetcher,
            memory,
        ))
    }

    /// Explicit wiring; tests inject stub backends here.
    pub fn with_components(
        http_client: reqwest::Client,
        settings: Settings,
        llm: Arc<LlmService>,
        search: Arc<SearchRegistry>,
        fetcher: Arc<dyn Fetcher>,
        memory: Arc<ResearchMemory>,
    ) -> Self {
        let document_cache = moka::future::Cache::builder()
            .max_capacity(10_000)
            .time_to_live(std::time::Duration::from_secs(settings.cache_ttl_secs))
            .build();
        let outbound_limit = Arc::new(tokio::sync::Semaphore::new(
            settings.max_concurrent_requests.max(1),
        ));
        Self {
            http_client,
            settings: Arc::new(settings),
            llm,
            search,
            fetcher,
            memory,
            document_cache,
            outbound_limit,
        }
    }
}

use thiserror::Error;

/// Errors surfaced by the pipeline and its stages.
///
/// Per-item failures (a URL that will not fetch, a document whose summary
/// call errored) are recorded on the per-item results and never reach this
/// type. Everything listed here terminates the current pipeline run.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Bad caller input (empty topic, too many URLs, empty document list).
    #[error("ValidationError: {0}")]
    Validation(String),

    /// Every registered search provider failed for the composed query.
    #[error("SearchFailure: {0}")]
    Search(String),

    /// No valid URL survived validation, or every fetch failed.
    #[error("ExtractionFailure: {0}")]
    Extraction(String),

    /// LLM call exhausted its retries.
    #[error("LLMFailure: {0}")]
    Llm(String),

    /// LLM provider kept answering 429 through every retry.
    #[error("RateLimitExceeded: {0}")]
    RateLimit(String),

    /// The run overran its deadline.
    #[error("TimeoutError: {0}")]
    Timeout(String),

    /// Persistence I/O in the memory subsystem.
    #[error("MemoryError: {0}")]
    Memory(String),

    /// Missing or unusable credentials / settings.
    #[error("ConfigError: {0}")]
    Config(String),
}

impl PipelineError {
    /// `true` for the LLM family (plain failure and its rate-limit subtype).
    pub fn is_llm(&self) -> bool {
        matches!(self, Self::Llm(_) | Self::RateLimit(_))
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

use crate::error::PipelineError;
use std::path::PathBuf;

// ---------------------------------------------------------------------------
// Settings — environment-based configuration (.env supported via dotenvy)
// ---------------------------------------------------------------------------

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_or(key: &str, default: &str) -> String {
    env_string(key).unwrap_or_else(|| default.to_string())
}

fn env_parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env_string(key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_bool_or(key: &str, default: bool) -> bool {
    match env_string(key) {
        Some(v) => !matches!(
            v.to_ascii_lowercase().as_str(),
            "0" | "false" | "no" | "off" | "disabled"
        ),
        None => default,
    }
}

/// All runtime configuration, resolved once at startup.
///
/// `GROQ_API_KEY` is required, as is at least one search-provider key
/// (`TAVILY_API_KEY`, `SERPER_API_KEY`, `BRAVE_API_KEY`). Everything else
/// has a default.
#[derive(Debug, Clone)]
pub struct Settings {
    // LLM provider (OpenAI-compatible chat completions)
    pub groq_api_key: String,
    pub llm_base_url: String,
    pub llm_model: String,
    pub llm_temperature: f64,
    pub llm_max_tokens: u32,
    pub llm_rate_limit: usize,
    pub llm_max_retries: usize,
    pub llm_timeout_secs: u64,
    pub llm_batch_concurrency: usize,

    // Search providers
    pub tavily_api_key: Option<String>,
    pub serper_api_key: Option<String>,
    pub brave_api_key: Option<String>,
    pub preferred_provider: String,
    pub search_timeout_secs: u64,
    pub max_sources: usize,

    // Extraction
    pub extract_timeout_secs: u64,
    pub extract_max_retries: usize,
    pub max_concurrent_extractions: usize,

    // Summarization
    pub max_concurrent_summaries: usize,
    pub max_summary_length: usize,

    // Memory & caching
    pub memory_dir: PathBuf,
    pub embedding_model: String,
    pub enable_caching: bool,
    pub enable_vector_store: bool,
    pub cache_ttl_secs: u64,

    // Artifacts
    pub reports_dir: PathBuf,
    pub dump_stages: bool,

    // Global
    pub max_concurrent_requests: usize,
    pub pipeline_deadline_secs: u64,
}

impl Settings {
    /// Resolve settings from the process environment. Call
    /// `dotenvy::dotenv()` first when a `.env` file should be honored.
    pub fn from_env() -> Self {
        let data_dir = PathBuf::from(env_or("DATA_DIR", "data"));
        Self {
            groq_api_key: env_or("GROQ_API_KEY", ""),
            llm_base_url: env_or("LLM_BASE_URL", "https://api.groq.com/openai/v1"),
            llm_model: env_or("LLM_MODEL", "llama-3.1-8b-instant"),
            llm_temperature: env_parse_or("LLM_TEMPERATURE", 0.1),
            llm_max_tokens: env_parse_or("LLM_MAX_TOKENS", 4_000),
            llm_rate_limit: env_parse_or("LLM_RATE_LIMIT", 30),
            llm_max_retries: env_parse_or("LLM_MAX_RETRIES", 3),
            llm_timeout_secs: env_parse_or("LLM_TIMEOUT", 60),
            llm_batch_concurrency: env_parse_or("LLM_BATCH_CONCURRENCY", 3),

            tavily_api_key: env_string("TAVILY_API_KEY"),
            serper_api_key: env_string("SERPER_API_KEY"),
            brave_api_key: env_string("BRAVE_API_KEY"),
            preferred_provider: env_or("SEARCH_PREFERRED_PROVIDER", "tavily"),
            search_timeout_secs: env_parse_or("SEARCH_TIMEOUT", 30),
            max_sources: env_parse_or("MAX_SOURCES", 20),

            extract_timeout_secs: env_parse_or("EXTRACT_TIMEOUT", 30),
            extract_max_retries: env_parse_or("EXTRACT_MAX_RETRIES", 2),
            max_concurrent_extractions: env_parse_or("MAX_CONCURRENT_EXTRACTIONS", 5),

            max_concurrent_summaries: env_parse_or("MAX_CONCURRENT_SUMMARIES", 3),
            max_summary_length: env_parse_or("MAX_SUMMARY_LENGTH", 500),

            memory_dir: env_string("MEMORY_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| data_dir.join("memory")),
            // Default adapted to the Model2Vec backend; see DESIGN.md.
            embedding_model: env_or("EMBEDDING_MODEL", "minishlab/potion-base-8M"),
            enable_caching: env_bool_or("ENABLE_CACHING", true),
            enable_vector_store: env_bool_or("ENABLE_VECTOR_STORE", true),
            cache_ttl_secs: env_parse_or("CACHE_TTL", 3_600),

            reports_dir: env_string("REPORTS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| data_dir.join("reports")),
            dump_stages: env_bool_or("DUMP_STAGES", false),

            max_concurrent_requests: env_parse_or("MAX_CONCURRENT_REQUESTS", 10),
            pipeline_deadline_secs: env_parse_or("PIPELINE_DEADLINE", 600),
        }
    }

    /// Startup validation: the LLM key and at least one search key must be
    /// present.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.groq_api_key.is_empty() {
            return Err(PipelineError::Config(
                "GROQ_API_KEY is not set".to_string(),
            ));
        }
        if self.tavily_api_key.is_none()
            && self.serper_api_key.is_none()
            && self.brave_api_key.is_none()
        {
            return Err(PipelineError::Config(
                "no search provider configured — set at least one of TAVILY_API_KEY, \
                 SERPER_API_KEY, BRAVE_API_KEY"
                    .to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_requires_llm_key() {
        let mut s = Settings::from_env();
        s.groq_api_key = String::new();
        s.tavily_api_key = Some("t".into());
        assert!(matches!(s.validate(), Err(PipelineError::Config(_))));
    }

    #[test]
    fn validate_requires_a_search_key() {
        let mut s = Settings::from_env();
        s.groq_api_key = "gk".into();
        s.tavily_api_key = None;
        s.serper_api_key = None;
        s.brave_api_key = None;
        assert!(matches!(s.validate(), Err(PipelineError::Config(_))));
    }
}

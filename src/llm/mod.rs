//! LLM adapter: prompted completions over an OpenAI-compatible chat API
//! (Groq by default) with sliding-window rate limiting, retry with
//! exponential backoff, token budgeting and ordered batch execution.

use crate::core::config::Settings;
use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Sampling parameters for one completion call.
#[derive(Debug, Clone)]
pub struct LlmParams {
    pub temperature: f64,
    pub max_tokens: u32,
    pub top_p: f64,
    pub frequency_penalty: f64,
    pub presence_penalty: f64,
    /// Model override; `None` uses the configured default.
    pub model: Option<String>,
}

impl Default for LlmParams {
    fn default() -> Self {
        Self {
            temperature: 0.3,
            max_tokens: 2_000,
            top_p: 0.9,
            frequency_penalty: 0.1,
            presence_penalty: 0.1,
            model: None,
        }
    }
}

impl LlmParams {
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// Outcome of a single backend attempt. The service turns these into the
/// retry policy: 429 honors the server delay, everything else backs off
/// exponentially.
#[derive(Debug)]
pub enum BackendError {
    RateLimited { retry_after_secs: u64 },
    Retriable(String),
    Timeout,
}

/// One attempt against a concrete completion provider. Retries, rate
/// limiting and batching live in [`LlmService`], not here, so tests can
/// substitute a scripted backend.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn complete(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
        params: &LlmParams,
    ) -> std::result::Result<String, BackendError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Groq backend (OpenAI-compatible chat completions)
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

pub struct GroqBackend {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    default_model: String,
    timeout: Duration,
}

impl GroqBackend {
    pub fn new(client: reqwest::Client, settings: &Settings) -> Self {
        Self {
            client,
            base_url: settings.llm_base_url.trim_end_matches('/').to_string(),
            api_key: settings.groq_api_key.clone(),
            default_model: settings.llm_model.clone(),
            timeout: Duration::from_secs(settings.llm_timeout_secs),
        }
    }
}

#[async_trait]
impl CompletionBackend for GroqBackend {
    async fn complete(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
        params: &LlmParams,
    ) -> std::result::Result<String, BackendError> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = system_prompt {
            messages.push(serde_json::json!({"role": "system", "content": system}));
        }
        messages.push(serde_json::json!({"role": "user", "content": prompt}));

        let payload = serde_json::json!({
            "model": params.model.as_deref().unwrap_or(self.default_model.as_str()),
            "messages": messages,
            "temperature": params.temperature,
            "max_tokens": params.max_tokens,
            "top_p": params.top_p,
            "frequency_penalty": params.frequency_penalty,
            "presence_penalty": params.presence_penalty,
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .timeout(self.timeout)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    BackendError::Timeout
                } else {
                    BackendError::Retriable(format!("request failed: {e}"))
                }
            })?;

        let status = response.status();
        if status.as_u16() == 429 {
            let retry_after_secs = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(60);
            return Err(BackendError::RateLimited { retry_after_secs });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Retriable(format!(
                "API error {status}: {body}"
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| BackendError::Retriable(format!("bad response body: {e}")))?;
        let content = parsed
            .choices
            .first()
            .and_then(|c| c.message.content.as_deref())
            .unwrap_or("")
            .trim()
            .to_string();

        if content.is_empty() {
            return Err(BackendError::Retriable("empty model response".to_string()));
        }
        Ok(content)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Service: rate limiting + retries + batching on top of any backend
// ─────────────────────────────────────────────────────────────────────────────

pub struct LlmService {
    backend: Arc<dyn CompletionBackend>,
    /// Timestamps of requests issued in the last sliding minute.
    request_log: Mutex<Vec<Instant>>,
    rate_limit_requests: usize,
    max_retries: usize,
    batch_concurrency: usize,
}

impl LlmService {
    pub fn new(backend: Arc<dyn CompletionBackend>, settings: &Settings) -> Self {
        Self {
            backend,
            request_log: Mutex::new(Vec::new()),
            rate_limit_requests: settings.llm_rate_limit.max(1),
            max_retries: settings.llm_max_retries,
            batch_concurrency: settings.llm_batch_concurrency.max(1),
        }
    }

    /// Generate one completion, waiting out the local rate limit and
    /// retrying per policy: up to `max_retries + 1` attempts, `retry-after`
    /// on 429, `2^attempt` seconds otherwise.
    pub async fn completion(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
        params: &LlmParams,
    ) -> Result<String> {
        self.wait_for_rate_limit().await;

        let mut last_error = String::new();
        for attempt in 0..=self.max_retries {
            self.record_request().await;
            match self.backend.complete(prompt, system_prompt, params).await {
                Ok(content) => return Ok(content),
                Err(BackendError::RateLimited { retry_after_secs }) => {
                    warn!("LLM rate limited, retry-after {}s", retry_after_secs);
                    if attempt < self.max_retries {
                        tokio::time::sleep(Duration::from_secs(retry_after_secs)).await;
                        continue;
                    }
                    return Err(PipelineError::RateLimit(
                        "provider rate limit exhausted all retries".to_string(),
                    ));
                }
                Err(BackendError::Timeout) => {
                    last_error = "request timed out".to_string();
                }
                Err(BackendError::Retriable(msg)) => {
                    last_error = msg;
                }
            }
            if attempt < self.max_retries {
                let delay = Duration::from_secs(1 << attempt);
                warn!(
                    "LLM attempt {}/{} failed ({}), retrying in {:?}",
                    attempt + 1,
                    self.max_retries + 1,
                    last_error,
                    delay
                );
                tokio::time::sleep(delay).await;
            }
        }
        Err(PipelineError::Llm(format!(
            "all attempts failed: {last_error}"
        )))
    }

    /// Run several prompts with bounded concurrency. Results preserve the
    /// input order; a failed prompt yields an `"ERROR: …"` string instead
    /// of failing the batch. Task starts are staggered to smooth the rate
    /// limiter.
    pub async fn batch(
        &self,
        prompts: Vec<String>,
        system_prompt: Option<&str>,
        params: &LlmParams,
    ) -> Vec<String> {
        let total = prompts.len();
        info!("LLM batch of {} prompts", total);

        let results: Vec<String> = stream::iter(prompts.into_iter().enumerate())
            .map(|(index, prompt)| async move {
                tokio::time::sleep(Duration::from_millis(500 * index as u64)).await;
                match self.completion(&prompt, system_prompt, params).await {
                    Ok(content) => content,
                    Err(e) => format!("ERROR: {e}"),
                }
            })
            .buffered(self.batch_concurrency)
            .collect()
            .await;

        let success = results.iter().filter(|r| !r.starts_with("ERROR:")).count();
        info!("LLM batch done: {}/{} succeeded", success, total);
        results
    }

    /// Probe the backend with a one-line prompt.
    pub async fn test_connection(&self) -> bool {
        match self
            .completion(
                crate::prompts::CONNECTION_TEST_PROMPT,
                Some("Tu es un assistant de test."),
                &LlmParams::default().with_max_tokens(16),
            )
            .await
        {
            Ok(reply) => reply.to_lowercase().contains("ok"),
            Err(e) => {
                warn!("LLM connection test failed: {}", e);
                false
            }
        }
    }

    async fn record_request(&self) {
        self.request_log.lock().await.push(Instant::now());
    }

    /// Purge timestamps older than the 60 s window; when at capacity, sleep
    /// until the oldest entry falls out.
    async fn wait_for_rate_limit(&self) {
        let wait = {
            let mut log = self.request_log.lock().await;
            let now = Instant::now();
            log.retain(|ts| now.duration_since(*ts) < Duration::from_secs(60));
            if log.len() >= self.rate_limit_requests {
                log.iter()
                    .min()
                    .map(|oldest| Duration::from_secs(60).saturating_sub(now.duration_since(*oldest)))
            } else {
                None
            }
        };
        if let Some(wait) = wait {
            if !wait.is_zero() {
                info!("rate limit window full, waiting {:.1}s", wait.as_secs_f64());
                tokio::time::sleep(wait).await;
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Token accounting
// ─────────────────────────────────────────────────────────────────────────────

/// Rough token estimate: one token per four characters.
pub fn estimate_tokens(text: &str) -> usize {
    text.len() / 4
}

/// Trim trailing sentences until the estimate fits `max_tokens`, with a
/// 10 % safety margin.
pub fn truncate_to_tokens(text: &str, max_tokens: usize) -> String {
    let estimated = estimate_tokens(text);
    if estimated <= max_tokens {
        return text.to_string();
    }

    let ratio = max_tokens as f64 / estimated as f64;
    let target_length = (text.len() as f64 * ratio * 0.9) as usize;

    let mut truncated = String::new();
    for sentence in split_sentences(text) {
        if truncated.len() + sentence.len() > target_length {
            break;
        }
        truncated.push_str(sentence);
    }
    truncated.trim().to_string()
}

/// Split into sentences, keeping the terminating punctuation attached.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    let bytes = text.as_bytes();
    for (i, b) in bytes.iter().enumerate() {
        if matches!(b, b'.' | b'!' | b'?') {
            let next_is_boundary = bytes.get(i + 1).is_none_or(|c| c.is_ascii_whitespace());
            if next_is_boundary {
                out.push(&text[start..=i.min(text.len() - 1)]);
                start = i + 1;
            }
        }
    }
    if start < text.len() {
        out.push(&text[start..]);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Echoes the prompt; fails on prompts containing "échec".
    struct EchoBackend;

    #[async_trait]
    impl CompletionBackend for EchoBackend {
        async fn complete(
            &self,
            prompt: &str,
            _system_prompt: Option<&str>,
            _params: &LlmParams,
        ) -> std::result::Result<String, BackendError> {
            if prompt.contains("échec") {
                Err(BackendError::Retriable("scripted failure".to_string()))
            } else {
                Ok(prompt.to_string())
            }
        }
    }

    fn service() -> LlmService {
        let mut settings = Settings::from_env();
        settings.llm_max_retries = 0;
        settings.llm_rate_limit = 100;
        settings.llm_batch_concurrency = 3;
        LlmService::new(Arc::new(EchoBackend), &settings)
    }

    #[tokio::test]
    async fn batch_preserves_order_and_maps_errors() {
        let service = service();
        let results = service
            .batch(
                vec!["premier".to_string(), "échec".to_string(), "troisième".to_string()],
                None,
                &LlmParams::default(),
            )
            .await;
        assert_eq!(results.len(), 3);
        assert_eq!(results[0], "premier");
        assert!(results[1].starts_with("ERROR:"));
        assert_eq!(results[2], "troisième");
    }

    #[tokio::test]
    async fn failed_completion_is_an_llm_failure() {
        let service = service();
        let err = service
            .completion("échec", None, &LlmParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Llm(_)));
    }

    #[test]
    fn estimate_is_quarter_length() {
        assert_eq!(estimate_tokens("abcdefgh"), 2);
    }

    #[test]
    fn truncate_keeps_short_text() {
        let text = "Une phrase courte.";
        assert_eq!(truncate_to_tokens(text, 100), text);
    }

    #[test]
    fn truncate_drops_trailing_sentences() {
        let text = "Première phrase assez longue pour compter. Deuxième phrase. ".repeat(50);
        let truncated = truncate_to_tokens(&text, 50);
        assert!(estimate_tokens(&truncated) <= 50);
        assert!(truncated.ends_with('.'));
    }

    #[test]
    fn sentences_keep_punctuation() {
        let parts = split_sentences("Un. Deux! Trois?");
        assert_eq!(parts.len(), 3);
        assert!(parts[0].ends_with('.'));
    }
}

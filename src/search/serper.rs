use super::{host_of, parse_published_date, ProviderError, SearchProvider};
use crate::core::types::{SearchDepth, SearchResult};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

const BASE_URL: &str = "https://google.serper.dev";

#[derive(Debug, Deserialize)]
struct SerperResponse {
    #[serde(default)]
    organic: Vec<SerperItem>,
}

#[derive(Debug, Deserialize)]
struct SerperItem {
    #[serde(default)]
    title: String,
    #[serde(default)]
    link: String,
    #[serde(default)]
    snippet: String,
    #[serde(default)]
    date: Option<String>,
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    position: Option<u32>,
}

pub struct SerperProvider {
    client: reqwest::Client,
    api_key: String,
    timeout: Duration,
}

impl SerperProvider {
    pub fn new(client: reqwest::Client, api_key: String, timeout: Duration) -> Self {
        Self {
            client,
            api_key,
            timeout,
        }
    }
}

#[async_trait]
impl SearchProvider for SerperProvider {
    fn name(&self) -> &'static str {
        "serper"
    }

    async fn search(
        &self,
        query: &str,
        max_results: usize,
        _depth: SearchDepth,
    ) -> Result<Vec<SearchResult>, ProviderError> {
        let payload = serde_json::json!({
            "q": query,
            "num": max_results.min(100),
            "gl": "fr",
            "hl": "fr",
        });

        let response = self
            .client
            .post(format!("{BASE_URL}/search"))
            .header("X-API-KEY", &self.api_key)
            .timeout(self.timeout)
            .json(&payload)
            .send()
            .await
            .map_err(|e| ProviderError(format!("serper request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError(format!("serper error {status}: {body}")));
        }

        let parsed: SerperResponse = response
            .json()
            .await
            .map_err(|e| ProviderError(format!("serper parse error: {e}")))?;

        Ok(parsed
            .organic
            .into_iter()
            .filter(|item| !item.link.is_empty())
            .map(|item| {
                let source = item
                    .source
                    .filter(|s| !s.is_empty())
                    .unwrap_or_else(|| host_of(&item.link));
                SearchResult {
                    title: item.title,
                    snippet: item.snippet,
                    published_date: item.date.as_deref().and_then(parse_published_date),
                    source,
                    // SERP rank folded into [0, 1] like a provider score.
                    score: item.position.map(|p| (p as f64 / 100.0).clamp(0.0, 1.0)),
                    url: item.link,
                }
            })
            .collect())
    }
}

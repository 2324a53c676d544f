use super::{host_of, parse_published_date, ProviderError, SearchProvider};
use crate::core::types::{SearchDepth, SearchResult};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

const BASE_URL: &str = "https://api.tavily.com";

#[derive(Debug, Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<TavilyItem>,
}

#[derive(Debug, Deserialize)]
struct TavilyItem {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    published_date: Option<String>,
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    score: Option<f64>,
}

pub struct TavilyProvider {
    client: reqwest::Client,
    api_key: String,
    timeout: Duration,
}

impl TavilyProvider {
    pub fn new(client: reqwest::Client, api_key: String, timeout: Duration) -> Self {
        Self {
            client,
            api_key,
            timeout,
        }
    }
}

#[async_trait]
impl SearchProvider for TavilyProvider {
    fn name(&self) -> &'static str {
        "tavily"
    }

    async fn search(
        &self,
        query: &str,
        max_results: usize,
        depth: SearchDepth,
    ) -> Result<Vec<SearchResult>, ProviderError> {
        let payload = serde_json::json!({
            "api_key": self.api_key,
            "query": query,
            "search_depth": match depth {
                SearchDepth::Basic => "basic",
                SearchDepth::Advanced => "advanced",
            },
            "max_results": max_results.min(20),
            "include_answer": true,
            "include_images": false,
            "include_raw_content": false,
        });

        let response = self
            .client
            .post(format!("{BASE_URL}/search"))
            .timeout(self.timeout)
            .json(&payload)
            .send()
            .await
            .map_err(|e| ProviderError(format!("tavily request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError(format!("tavily error {status}: {body}")));
        }

        let parsed: TavilyResponse = response
            .json()
            .await
            .map_err(|e| ProviderError(format!("tavily parse error: {e}")))?;

        Ok(parsed
            .results
            .into_iter()
            .filter(|item| !item.url.is_empty())
            .map(|item| {
                let source = item
                    .source
                    .filter(|s| !s.is_empty())
                    .unwrap_or_else(|| host_of(&item.url));
                SearchResult {
                    title: item.title,
                    url: item.url,
                    snippet: item.content,
                    published_date: item.published_date.as_deref().and_then(parse_published_date),
                    source,
                    score: item.score.map(|s| s.clamp(0.0, 1.0)),
                }
            })
            .collect())
    }
}

use super::{host_of, parse_published_date, ProviderError, SearchProvider};
use crate::core::types::{SearchDepth, SearchResult};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

const BASE_URL: &str = "https://api.search.brave.com/res/v1/web/search";

#[derive(Debug, Deserialize)]
struct BraveResponse {
    #[serde(default)]
    web: Option<BraveWeb>,
}

#[derive(Debug, Deserialize)]
struct BraveWeb {
    #[serde(default)]
    results: Vec<BraveItem>,
}

#[derive(Debug, Deserialize)]
struct BraveItem {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    page_age: Option<String>,
}

pub struct BraveProvider {
    client: reqwest::Client,
    api_key: String,
    timeout: Duration,
}

impl BraveProvider {
    pub fn new(client: reqwest::Client, api_key: String, timeout: Duration) -> Self {
        Self {
            client,
            api_key,
            timeout,
        }
    }
}

#[async_trait]
impl SearchProvider for BraveProvider {
    fn name(&self) -> &'static str {
        "brave"
    }

    async fn search(
        &self,
        query: &str,
        max_results: usize,
        _depth: SearchDepth,
    ) -> Result<Vec<SearchResult>, ProviderError> {
        let count = max_results.min(20).to_string();
        let response = self
            .client
            .get(BASE_URL)
            .query(&[("q", query), ("count", count.as_str())])
            .header("X-Subscription-Token", &self.api_key)
            .header("Accept", "application/json")
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| ProviderError(format!("brave request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError(format!("brave error {status}: {body}")));
        }

        let parsed: BraveResponse = response
            .json()
            .await
            .map_err(|e| ProviderError(format!("brave parse error: {e}")))?;

        Ok(parsed
            .web
            .map(|w| w.results)
            .unwrap_or_default()
            .into_iter()
            .filter(|item| !item.url.is_empty())
            .map(|item| SearchResult {
                title: item.title,
                snippet: item.description,
                published_date: item.page_age.as_deref().and_then(parse_published_date),
                source: host_of(&item.url),
                score: None,
                url: item.url,
            })
            .collect())
    }
}

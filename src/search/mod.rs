//! Web-search provider adapters and the failover registry.
//!
//! Each adapter normalizes its provider's response into [`SearchResult`];
//! the registry tries the preferred provider first, then the remaining
//! providers in registration order, and fails only when every one of them
//! failed.

pub mod brave;
pub mod serper;
pub mod tavily;

use crate::core::config::Settings;
use crate::core::types::{SearchDepth, SearchResult};
use crate::error::PipelineError;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
#[error("{0}")]
pub struct ProviderError(pub String);

#[async_trait]
pub trait SearchProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn search(
        &self,
        query: &str,
        max_results: usize,
        depth: SearchDepth,
    ) -> Result<Vec<SearchResult>, ProviderError>;
}

/// Provider registry with preferred-first failover.
pub struct SearchRegistry {
    providers: Vec<Arc<dyn SearchProvider>>,
    preferred: String,
}

impl SearchRegistry {
    pub fn new(preferred: impl Into<String>) -> Self {
        Self {
            providers: Vec::new(),
            preferred: preferred.into(),
        }
    }

    /// Register every provider that has credentials, in the fixed order
    /// tavily, serper, brave.
    pub fn from_settings(client: reqwest::Client, settings: &Settings) -> Self {
        let mut registry = Self::new(settings.preferred_provider.clone());
        let timeout = std::time::Duration::from_secs(settings.search_timeout_secs);

        if let Some(key) = &settings.tavily_api_key {
            registry.register(Arc::new(tavily::TavilyProvider::new(
                client.clone(),
                key.clone(),
                timeout,
            )));
        }
        if let Some(key) = &settings.serper_api_key {
            registry.register(Arc::new(serper::SerperProvider::new(
                client.clone(),
                key.clone(),
                timeout,
            )));
        }
        if let Some(key) = &settings.brave_api_key {
            registry.register(Arc::new(brave::BraveProvider::new(
                client, key.clone(), timeout,
            )));
        }

        info!("search providers registered: {:?}", registry.provider_names());
        registry
    }

    pub fn register(&mut self, provider: Arc<dyn SearchProvider>) {
        self.providers.push(provider);
    }

    pub fn provider_names(&self) -> Vec<&'static str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Run the query with failover. Returns the results together with the
    /// name of the provider that answered.
    pub async fn search(
        &self,
        query: &str,
        max_results: usize,
        depth: SearchDepth,
    ) -> Result<(Vec<SearchResult>, String), PipelineError> {
        if self.providers.is_empty() {
            return Err(PipelineError::Search(
                "no search provider registered".to_string(),
            ));
        }

        let mut ordered: Vec<&Arc<dyn SearchProvider>> = Vec::with_capacity(self.providers.len());
        for p in &self.providers {
            if p.name() == self.preferred {
                ordered.insert(0, p);
            } else {
                ordered.push(p);
            }
        }

        let mut last_error = String::new();
        for provider in ordered {
            match provider.search(query, max_results, depth).await {
                Ok(results) if !results.is_empty() => {
                    info!(
                        "search via {}: {} results for '{}'",
                        provider.name(),
                        results.len(),
                        query
                    );
                    return Ok((results, provider.name().to_string()));
                }
                Ok(_) => {
                    warn!("search via {}: no results", provider.name());
                    last_error = format!("{}: no results", provider.name());
                }
                Err(e) => {
                    warn!("search via {} failed: {}", provider.name(), e);
                    last_error = format!("{}: {}", provider.name(), e);
                }
            }
        }

        Err(PipelineError::Search(format!(
            "all providers failed for '{query}' (last: {last_error})"
        )))
    }
}

/// Permissive date parsing for provider-supplied publication dates.
pub(crate) fn parse_published_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(&raw.replace('Z', "+00:00")) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|ndt| ndt.and_utc());
    }
    None
}

/// Host portion of a URL, used when the provider does not name the source.
pub(crate) fn host_of(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_string()))
        .unwrap_or_default()
}

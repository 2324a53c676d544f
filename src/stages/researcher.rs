//! Researcher stage: topic → ranked search results.
//!
//! Keyword augmentation via one low-temperature LLM call (with a lexical
//! fallback), query composition with an optional recency hint, provider
//! failover through the registry, and the weighted relevance ranking.

use crate::core::types::{ResearchOutput, ResearchQuery, SearchDepth, SearchResult};
use crate::error::Result;
use crate::llm::{LlmParams, LlmService};
use crate::prompts;
use crate::search::SearchRegistry;
use chrono::{Datelike, Utc};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Results scoring below this are dropped.
const MIN_RELEVANCE_SCORE: f64 = 0.1;

const STOP_WORDS: &[&str] = &[
    "le", "la", "les", "de", "du", "des", "et", "ou", "sur", "dans", "avec", "pour", "par", "en",
    "à", "un", "une", "ce", "cette", "ces",
];

/// Stop words filtered out of LLM keyword responses.
const KEYWORD_RESPONSE_STOP_WORDS: &[&str] = &["et", "ou", "le", "la", "les", "de", "du", "des"];

pub struct Researcher {
    llm: Arc<LlmService>,
    search: Arc<SearchRegistry>,
}

impl Researcher {
    pub fn new(llm: Arc<LlmService>, search: Arc<SearchRegistry>) -> Self {
        Self { llm, search }
    }

    /// Run the stage. The returned output carries the effective query, i.e.
    /// the input with derived keywords filled in when augmentation ran.
    pub async fn run(&self, query: &ResearchQuery) -> Result<ResearchOutput> {
        let start = Instant::now();
        info!("research start: '{}'", query.topic);

        let mut effective = query.clone();
        if keywords_are_weak(&effective.keywords) {
            effective.keywords = self.derive_keywords(&effective.topic).await;
            info!("derived keywords: {:?}", effective.keywords);
        }

        let search_query = compose_query(&effective);
        info!("composed query: '{}'", search_query);

        let (raw_results, engine) = self
            .search
            .search(&search_query, effective.max_results, effective.search_depth)
            .await?;
        let total_found = raw_results.len();

        let ranked = rank_results(raw_results, &effective.topic, &effective.keywords);
        let mut results = ranked;
        results.truncate(effective.max_results);

        info!(
            "research done: {}/{} results kept in {:.2}s via {}",
            results.len(),
            total_found,
            start.elapsed().as_secs_f64(),
            engine
        );

        Ok(ResearchOutput {
            query: effective,
            results,
            total_found,
            search_time: start.elapsed().as_secs_f64(),
            search_engine: engine,
            timestamp: Utc::now(),
        })
    }

    /// One deterministic LLM call; lexical fallback on any failure.
    async fn derive_keywords(&self, topic: &str) -> Vec<String> {
        let params = LlmParams::default()
            .with_temperature(0.3)
            .with_max_tokens(150);
        match self
            .llm
            .completion(
                &prompts::keyword_extraction(topic),
                Some(prompts::SYSTEM_RESEARCHER),
                &params,
            )
            .await
        {
            Ok(response) => {
                let keywords = parse_keywords_response(&response);
                if keywords.is_empty() {
                    fallback_keywords(topic)
                } else {
                    keywords
                }
            }
            Err(e) => {
                warn!("keyword extraction failed ({}), using fallback", e);
                fallback_keywords(topic)
            }
        }
    }
}

/// Keywords count as weak when absent or all shorter than three characters.
fn keywords_are_weak(keywords: &[String]) -> bool {
    keywords.is_empty() || keywords.iter().all(|kw| kw.chars().count() < 3)
}

/// Topic, then keywords not already present in it; advanced depth appends
/// the current and previous year as a recency hint.
fn compose_query(query: &ResearchQuery) -> String {
    let topic_lower = query.topic.to_lowercase();
    let mut terms = vec![query.topic.clone()];
    for kw in &query.keywords {
        if !topic_lower.contains(&kw.to_lowercase()) {
            terms.push(kw.clone());
        }
    }
    let mut composed = terms.join(" ");

    if query.search_depth == SearchDepth::Advanced {
        let year = Utc::now().year();
        composed.push_str(&format!(" {} {}", year, year - 1));
    }
    composed.trim().to_string()
}

/// Split on commas, strip numbering and bullet prefixes, drop stop words
/// and one-character entries, cap at seven.
fn parse_keywords_response(response: &str) -> Vec<String> {
    let mut response = response.trim();
    for prefix in ["mots-clés:", "keywords:", "réponse:", "voici:", "liste:"] {
        if response.to_lowercase().starts_with(prefix) {
            response = response[prefix.len()..].trim_start();
        }
    }

    response
        .split(',')
        .map(|kw| {
            kw.trim()
                .trim_matches(|c: char| c.is_ascii_digit() || "-.•\t\n ".contains(c))
                .to_string()
        })
        .filter(|kw| {
            kw.chars().count() >= 2
                && !KEYWORD_RESPONSE_STOP_WORDS.contains(&kw.to_lowercase().as_str())
        })
        .take(7)
        .collect()
}

/// Lexical fallback: lowercase topic tokens, stop words removed, minimum
/// three characters, capped at five.
fn fallback_keywords(topic: &str) -> Vec<String> {
    topic
        .to_lowercase()
        .split_whitespace()
        .filter(|w| w.chars().count() >= 3 && !STOP_WORDS.contains(w))
        .take(5)
        .map(|w| w.to_string())
        .collect()
}

/// Weighted relevance: term presence in title+snippet (0.6), in title
/// alone (0.3), recency (0.1); averaged with the provider score when one
/// exists, capped at 1.0, thresholded and sorted descending (stable, so
/// ties keep provider order).
fn rank_results(results: Vec<SearchResult>, topic: &str, keywords: &[String]) -> Vec<SearchResult> {
    let mut scoring_terms: Vec<String> = vec![topic.to_lowercase()];
    scoring_terms.extend(keywords.iter().map(|kw| kw.to_lowercase()));

    let total = results.len();
    let mut scored: Vec<SearchResult> = results
        .into_iter()
        .map(|mut result| {
            result.score = Some(relevance_score(&result, &scoring_terms));
            result
        })
        .filter(|r| r.score.unwrap_or(0.0) >= MIN_RELEVANCE_SCORE)
        .collect();

    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    info!("ranking kept {}/{} results", scored.len(), total);
    scored
}

fn relevance_score(result: &SearchResult, scoring_terms: &[String]) -> f64 {
    if scoring_terms.is_empty() {
        return result.score.unwrap_or(0.0).clamp(0.0, 1.0);
    }

    let title_lower = result.title.to_lowercase();
    let text_lower = format!("{} {}", title_lower, result.snippet.to_lowercase());

    let text_matches = scoring_terms.iter().filter(|t| text_lower.contains(*t)).count();
    let title_matches = scoring_terms
        .iter()
        .filter(|t| title_lower.contains(*t))
        .count();

    let mut score = (text_matches as f64 / scoring_terms.len() as f64) * 0.6
        + (title_matches as f64 / scoring_terms.len() as f64) * 0.3;

    if let Some(published) = result.published_date {
        let days_old = (Utc::now() - published).num_days().max(0) as f64;
        score += (1.0 - days_old / 365.0).max(0.0) * 0.1;
    }

    if let Some(provider_score) = result.score {
        if provider_score > 0.0 {
            score = (score + provider_score) / 2.0;
        }
    }

    score.min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn result(title: &str, snippet: &str) -> SearchResult {
        SearchResult {
            title: title.to_string(),
            snippet: snippet.to_string(),
            url: "https://example.com".to_string(),
            ..SearchResult::default()
        }
    }

    #[test]
    fn parses_comma_separated_keywords() {
        let parsed = parse_keywords_response(
            "mots-clés: intelligence artificielle, 1. emploi, - automatisation, et, a",
        );
        assert_eq!(
            parsed,
            vec!["intelligence artificielle", "emploi", "automatisation"]
        );
    }

    #[test]
    fn keyword_parse_caps_at_seven() {
        let parsed = parse_keywords_response("un1, deux, trois, quatre, cinq, six, sept, huit, neuf");
        assert_eq!(parsed.len(), 7);
    }

    #[test]
    fn fallback_drops_stop_words_and_caps_at_five() {
        let kws = fallback_keywords("l'impact de la technologie sur le marché du travail en France");
        assert!(kws.len() <= 5);
        assert!(!kws.contains(&"la".to_string()));
        assert!(kws.contains(&"technologie".to_string()));
    }

    #[test]
    fn composed_query_skips_redundant_keywords() {
        let query = ResearchQuery::new(
            "énergie solaire",
            vec!["photovoltaïque".to_string()],
            5,
            SearchDepth::Basic,
        )
        .unwrap();
        assert_eq!(compose_query(&query), "énergie solaire photovoltaïque");
    }

    #[test]
    fn advanced_depth_appends_recency_hint() {
        let query =
            ResearchQuery::new("énergie solaire", vec![], 5, SearchDepth::Advanced).unwrap();
        let composed = compose_query(&query);
        let year = Utc::now().year();
        assert!(composed.contains(&year.to_string()));
        assert!(composed.contains(&(year - 1).to_string()));
    }

    #[test]
    fn scores_stay_in_unit_interval_and_rank_by_relevance() {
        let terms = vec!["solaire".to_string(), "photovoltaïque".to_string()];
        let relevant = result("Énergie solaire photovoltaïque", "panneaux solaire rendement");
        let vague = result("Actualités", "rien de particulier ici");

        let hi = relevance_score(&relevant, &terms);
        let lo = relevance_score(&vague, &terms);
        assert!((0.0..=1.0).contains(&hi));
        assert!(hi > lo);
    }

    #[test]
    fn provider_score_is_averaged_in() {
        let terms = vec!["solaire".to_string()];
        let mut r = result("solaire", "solaire");
        let base = relevance_score(&r, &terms);
        r.score = Some(0.1);
        let averaged = relevance_score(&r, &terms);
        assert!(averaged < base);
    }

    #[test]
    fn recent_results_outrank_old_ones() {
        let terms = vec!["solaire".to_string()];
        let mut fresh = result("solaire", "solaire");
        fresh.published_date = Some(Utc::now() - Duration::days(10));
        let mut stale = result("solaire", "solaire");
        stale.published_date = Some(Utc::now() - Duration::days(900));
        assert!(relevance_score(&fresh, &terms) > relevance_score(&stale, &terms));
    }

    #[test]
    fn low_scores_are_filtered() {
        let ranked = rank_results(
            vec![result("sans rapport", "aucun terme commun")],
            "fusion nucléaire",
            &["tokamak".to_string()],
        );
        assert!(ranked.is_empty());
    }
}

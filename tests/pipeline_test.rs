//! End-to-end pipeline scenarios over stubbed search, fetch and LLM
//! backends. No network, no model downloads: the memory runs on the
//! in-memory index with the deterministic hash embedder.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use veilleur::core::types::*;
use veilleur::core::{AppState, Settings};
use veilleur::error::PipelineError;
use veilleur::extract::{ExtractError, FetchedPage, Fetcher};
use veilleur::llm::{BackendError, CompletionBackend, LlmParams, LlmService};
use veilleur::memory::{HashEmbedder, MemIndex, ResearchMemory};
use veilleur::search::{ProviderError, SearchProvider, SearchRegistry};
use veilleur::stages::{ExtractorStage, Researcher, SummarizerStage};
use veilleur::tools;

// ─────────────────────────────────────────────────────────────────────────────
// Stubs
// ─────────────────────────────────────────────────────────────────────────────

/// Scripted LLM: answers by prompt family, counts calls per family.
#[derive(Default)]
struct StubLlm {
    total_calls: AtomicUsize,
    chunk_calls: AtomicUsize,
    synthesis_calls: AtomicUsize,
}

#[async_trait]
impl CompletionBackend for StubLlm {
    async fn complete(
        &self,
        prompt: &str,
        _system_prompt: Option<&str>,
        _params: &LlmParams,
    ) -> Result<String, BackendError> {
        self.total_calls.fetch_add(1, Ordering::SeqCst);

        let reply = if prompt.contains("RÉSUMÉ DU CHUNK:") {
            self.chunk_calls.fetch_add(1, Ordering::SeqCst);
            "Ce segment décrit la progression du solaire et ses contraintes de réseau."
                .to_string()
        } else if prompt.contains("SYNTHÈSE FINALE:") {
            self.synthesis_calls.fetch_add(1, Ordering::SeqCst);
            "RÉSUMÉ EXÉCUTIF: Le document couvre la montée du solaire en Europe.\n\
             RÉSUMÉ DÉTAILLÉ:\nLe texte détaille les capacités installées et les \
             contraintes d'intégration au réseau électrique.\n\
             POINTS CLÉS:\n- La capacité solaire double tous les trois ans\n\
             - Les réseaux restent le principal goulot d'étranglement\n\
             SENTIMENT: Neutre CRÉDIBILITÉ: 7/10"
                .to_string()
        } else if prompt.contains("Mots-clés pour") {
            "solaire, photovoltaïque, réseau électrique".to_string()
        } else if prompt.contains("Points conflictuels") && prompt.contains("RÉSUMÉS:") {
            "## Thèmes communs\n- développement du solaire\n- modernisation du réseau\n\
             ## Points de consensus\n- la baisse des coûts est durable\n\
             ## Points conflictuels\n- désaccord sur le rythme de déploiement"
                .to_string()
        } else if prompt.contains("RAPPORT FINAL:") {
            "## Contexte et Dynamique du Marché\nLe solaire progresse rapidement dans \
             toutes les régions étudiées, porté par la baisse des coûts.\n\n\
             ## Contraintes d'Intégration\nLes réseaux électriques imposent des limites \
             concrètes au rythme de déploiement."
                .to_string()
        } else if prompt.contains("ANALYSE THÉMATIQUE:") {
            "Les thèmes dominants sont la compétitivité du solaire et la capacité des \
             réseaux à absorber la production."
                .to_string()
        } else if prompt.contains("DONNÉES D'ANALYSE:") {
            "CONCLUSIONS PRINCIPALES:\n- Le solaire est devenu compétitif sans subventions\n\
             - Les réseaux sont le facteur limitant du déploiement\n\
             INSIGHTS CLÉS:\n- La dynamique des coûts reste favorable au solaire\n\
             RECOMMANDATIONS:\n- Prioriser les investissements de réseau\n\n\
             Le solaire poursuit sa progression, contraint par les réseaux."
                .to_string()
        } else if prompt.contains("ÉVALUATION:") {
            "SENTIMENT: Positif - ton factuel et optimiste\nCRÉDIBILITÉ: 8/10 - sources citées"
                .to_string()
        } else if prompt.contains("ANALYSE DÉTAILLÉE:") {
            "Le document analyse le déploiement du solaire.\n\
             - Le coût du solaire a chuté de moitié en cinq ans\n\
             - Le réseau électrique doit être renforcé rapidement"
                .to_string()
        } else if prompt.contains("RÉSUMÉ EXÉCUTIF:") {
            "Le document montre la progression rapide du solaire et ses effets sur le réseau."
                .to_string()
        } else {
            "OK".to_string()
        };
        Ok(reply)
    }
}

/// Search provider answering a fixed result list, or failing.
struct StubSearch {
    name: &'static str,
    results: Vec<SearchResult>,
    fail: bool,
    calls: AtomicUsize,
}

impl StubSearch {
    fn ok(name: &'static str, results: Vec<SearchResult>) -> Self {
        Self {
            name,
            results,
            fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    fn failing(name: &'static str) -> Self {
        Self {
            name,
            results: Vec::new(),
            fail: true,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl SearchProvider for StubSearch {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn search(
        &self,
        _query: &str,
        max_results: usize,
        _depth: SearchDepth,
    ) -> Result<Vec<SearchResult>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(ProviderError("provider down".to_string()));
        }
        Ok(self.results.iter().take(max_results).cloned().collect())
    }
}

/// Fetcher with a scripted url → page map; unknown URLs answer HTTP 500.
struct StubFetcher {
    pages: Vec<(String, String)>,
    calls: AtomicUsize,
}

impl StubFetcher {
    fn new(pages: Vec<(String, String)>) -> Self {
        Self {
            pages,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Fetcher for StubFetcher {
    async fn fetch(&self, url: &str, _timeout: Duration) -> Result<FetchedPage, ExtractError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.pages.iter().find(|(u, _)| u == url) {
            Some((_, body)) => Ok(FetchedPage {
                status: 200,
                content_type: "text/plain".to_string(),
                body: body.clone().into_bytes(),
            }),
            None => Err(ExtractError(format!("HTTP 500 for {url}"))),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Harness
// ─────────────────────────────────────────────────────────────────────────────

fn search_result(title: &str, url: &str) -> SearchResult {
    SearchResult {
        title: title.to_string(),
        url: url.to_string(),
        snippet: "déploiement du solaire et capacité du réseau électrique".to_string(),
        published_date: None,
        source: "example.com".to_string(),
        score: None,
    }
}

/// A ~400-word article mentioning the stubbed keywords.
fn article(seed: &str) -> String {
    format!(
        "Introduction. Le solaire photovoltaïque transforme le réseau électrique {seed}. {}",
        "Les installations progressent chaque trimestre et les acteurs du marché \
         adaptent leurs stratégies au nouveau contexte énergétique. "
            .repeat(40)
    )
}

fn test_settings() -> Settings {
    let mut settings = Settings::from_env();
    settings.groq_api_key = "test-key".to_string();
    settings.tavily_api_key = Some("test-key".to_string());
    settings.extract_max_retries = 0;
    settings.extract_timeout_secs = 5;
    settings.llm_max_retries = 0;
    settings.pipeline_deadline_secs = 60;
    settings
}

struct Harness {
    state: AppState,
    llm: Arc<StubLlm>,
    fetcher: Arc<StubFetcher>,
    _memory_dir: tempfile::TempDir,
}

async fn harness(providers: Vec<Arc<dyn SearchProvider>>, pages: Vec<(String, String)>) -> Harness {
    let memory_dir = tempfile::tempdir().unwrap();
    let settings = test_settings();

    let llm_backend = Arc::new(StubLlm::default());
    let llm = Arc::new(LlmService::new(llm_backend.clone(), &settings));

    let mut registry = SearchRegistry::new("tavily");
    for provider in providers {
        registry.register(provider);
    }

    let fetcher = Arc::new(StubFetcher::new(pages));
    let memory = Arc::new(
        ResearchMemory::with_backends(
            Arc::new(HashEmbedder::default()),
            Arc::new(MemIndex::new()),
            memory_dir.path().to_path_buf(),
        )
        .await
        .unwrap(),
    );

    let state = AppState::with_components(
        reqwest::Client::new(),
        settings,
        llm,
        Arc::new(registry),
        fetcher.clone(),
        memory,
    );

    Harness {
        state,
        llm: llm_backend,
        fetcher,
        _memory_dir: memory_dir,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// S1 — cache hit short-circuits everything
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn s1_cache_hit_returns_stored_markdown_without_any_call() {
    let h = harness(
        vec![Arc::new(StubSearch::ok(
            "tavily",
            vec![search_result("solaire", "https://example.com/a")],
        ))],
        vec![],
    )
    .await;

    // Seed the cache with a pre-built report.
    let summary = DocumentSummary {
        document_id: "doc_1".to_string(),
        title: "Source".to_string(),
        url: "https://example.com/a".to_string(),
        executive_summary: "Résumé.".to_string(),
        detailed_summary: "Détail.".to_string(),
        key_points: Vec::new(),
        sentiment: None,
        credibility_score: Some(0.8),
        processed_at: chrono::Utc::now(),
        processing_time: 0.1,
    };
    let synthesizer = veilleur::stages::SynthesizerStage::new(h.state.llm.clone());
    let report = synthesizer
        .run(&GlobalSynthesisInput {
            summarization_output: SummarizationOutput {
                summaries: vec![summary],
                total_documents: 1,
                total_processing_time: 0.1,
                average_credibility: Some(0.8),
                common_themes: Vec::new(),
                consensus_points: Vec::new(),
                conflicting_views: Vec::new(),
            },
            original_topic: "climate policy".to_string(),
            report_type: ReportType::Detailed,
            report_format: ReportFormat::Markdown,
        })
        .await
        .unwrap()
        .final_report;
    h.state.memory.cache_put("climate policy", &report).await.unwrap();

    let llm_calls_before = h.llm.total_calls.load(Ordering::SeqCst);
    let result =
        tools::research_complete_pipeline_with_memory(&h.state, "climate policy", 3, true)
            .await
            .unwrap();

    assert_eq!(
        &result,
        report.formatted_outputs.get("markdown").unwrap(),
        "cache hit must return the stored markdown byte-for-byte"
    );
    assert_eq!(h.fetcher.calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.llm.total_calls.load(Ordering::SeqCst), llm_calls_before);
}

// ─────────────────────────────────────────────────────────────────────────────
// S2 — fresh run over two sources
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn s2_fresh_run_builds_report_from_two_sources() {
    let topic = "essor de l'énergie solaire";
    let h = harness(
        vec![Arc::new(StubSearch::ok(
            "tavily",
            vec![
                search_result("Le solaire en Europe", "https://example.com/un"),
                search_result("Réseau et solaire", "https://example.org/deux"),
            ],
        ))],
        vec![
            ("https://example.com/un".to_string(), article("premier")),
            ("https://example.org/deux".to_string(), article("second")),
        ],
    )
    .await;

    let markdown = tools::research_complete_pipeline_with_memory(&h.state, topic, 3, true)
        .await
        .unwrap();
    assert!(markdown.contains("## Résumé Exécutif"));
    assert!(markdown.contains("## Sources"));

    let report = h
        .state
        .memory
        .cache_get(topic, Some(f64::INFINITY))
        .await
        .expect("report must be cached after the run");

    assert_eq!(report.sources.len(), 2);
    assert!((2..=3).contains(&report.main_sections.len()));
    assert!((report.completeness_score - 0.4).abs() < 1e-9);

    // confidence = 0.4·completeness + 0.4·reliability + 0.2·coherence
    let coherence = (report.main_sections.len() as f64 / 3.0).min(1.0);
    assert!(coherence >= 2.0 / 3.0);
    let expected_confidence = 0.4 * report.completeness_score + 0.4 * 0.8 + 0.2 * coherence;
    assert!((report.confidence_score - expected_confidence).abs() < 1e-9);
    assert!((0.0..=1.0).contains(&report.confidence_score));

    // Report word count law.
    let recount = veilleur::report::report_word_count(
        &report.introduction,
        &report.conclusion,
        &report.executive_summary.summary_text,
        &report.main_sections,
    );
    assert_eq!(report.word_count, recount);
}

// ─────────────────────────────────────────────────────────────────────────────
// S3 — duplicate content is dropped before summarization
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn s3_identical_content_from_two_hosts_reaches_summarizer_once() {
    let topic = "stockage de l'énergie solaire";
    let same_article = article("identique");
    let h = harness(
        vec![Arc::new(StubSearch::ok(
            "tavily",
            vec![
                search_result("Solaire A", "https://site-a.example/page"),
                search_result("Solaire B", "https://site-b.example/page"),
            ],
        ))],
        vec![
            ("https://site-a.example/page".to_string(), same_article.clone()),
            ("https://site-b.example/page".to_string(), same_article.clone()),
        ],
    )
    .await;

    // The extractor itself succeeds on both URLs.
    let extraction = ExtractorStage::new(
        h.fetcher.clone(),
        Duration::from_secs(5),
        0,
        4,
    )
    .run(ExtractionInput {
        urls: vec![
            "https://site-a.example/page".to_string(),
            "https://site-b.example/page".to_string(),
        ],
        content_filters: ContentFilters::default(),
    })
    .await
    .unwrap();
    assert_eq!(extraction.successful_extractions, 2);
    assert_eq!(
        extraction.total_urls,
        extraction.successful_extractions + extraction.failed_extractions
    );

    // The pipeline deduplicates before the summarizer: one source only.
    tools::research_complete_pipeline_with_memory(&h.state, topic, 3, true)
        .await
        .unwrap();
    let report = h
        .state
        .memory
        .cache_get(topic, Some(f64::INFINITY))
        .await
        .unwrap();
    assert_eq!(report.sources.len(), 1);
}

// ─────────────────────────────────────────────────────────────────────────────
// S4 — oversized document goes through the chunked path
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn s4_large_document_fans_out_chunk_calls_plus_synthesis() {
    let big_content = (0..120)
        .map(|i| {
            format!(
                "Paragraphe {i}. Le solaire photovoltaïque alimente le réseau électrique \
                 et modifie l'équilibre du système dans la durée. Les gestionnaires \
                 adaptent leurs plans d'investissement en conséquence."
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n");
    assert!(big_content.len() >= 24_000);

    let chunks =
        veilleur::chunking::chunk_text(&big_content, veilleur::chunking::ChunkStrategy::by_name("default"));
    assert!(chunks.len() >= 6, "expected ≥ 6 chunks, got {}", chunks.len());

    let h = harness(vec![], vec![]).await;
    let document = Document {
        title: "Grand dossier solaire".to_string(),
        url: "https://example.com/dossier".to_string(),
        content: big_content,
        doc_type: DocumentType::Article,
        author: None,
        published_date: None,
        word_count: 0,
        language: "fr".to_string(),
    };

    let summarizer = SummarizerStage::new(h.state.llm.clone(), 3);
    let output = summarizer
        .run(&[document], &SummaryOptions::default())
        .await
        .unwrap();

    assert_eq!(h.llm.chunk_calls.load(Ordering::SeqCst), chunks.len());
    assert_eq!(h.llm.synthesis_calls.load(Ordering::SeqCst), 1);
    assert!(!output.summaries[0].detailed_summary.is_empty());
}

// ─────────────────────────────────────────────────────────────────────────────
// S5 — provider failover
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn s5_failing_preferred_provider_fails_over_to_secondary() {
    let secondary_results = vec![
        search_result("Solaire 1", "https://example.com/1"),
        search_result("Solaire 2", "https://example.com/2"),
        search_result("Solaire 3", "https://example.com/3"),
    ];

    let h = harness(
        vec![
            Arc::new(StubSearch::failing("tavily")),
            Arc::new(StubSearch::ok("serper", secondary_results)),
        ],
        vec![],
    )
    .await;

    let query = ResearchQuery::new(
        "énergie solaire",
        vec!["solaire".to_string(), "réseau".to_string()],
        5,
        SearchDepth::Basic,
    )
    .unwrap();
    let researcher = Researcher::new(h.state.llm.clone(), h.state.search.clone());
    let output = researcher.run(&query).await.unwrap();

    assert_eq!(output.search_engine, "serper");
    assert_eq!(output.results.len(), 3);
    assert!(output.results.len() <= query.max_results);
    assert!(output
        .results
        .iter()
        .all(|r| (0.0..=1.0).contains(&r.score.unwrap())));
}

#[tokio::test]
async fn all_providers_failing_is_a_search_failure() {
    let h = harness(
        vec![
            Arc::new(StubSearch::failing("tavily")),
            Arc::new(StubSearch::failing("serper")),
        ],
        vec![],
    )
    .await;

    let err = tools::research_complete_pipeline_with_memory(&h.state, "énergie solaire", 3, false)
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Search(_)));
    assert!(err.to_string().starts_with("SearchFailure:"));
}

// ─────────────────────────────────────────────────────────────────────────────
// S6 — every extraction fails
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn s6_all_extractions_failing_aborts_without_persisting_a_report() {
    let topic = "hydrogène vert industriel";
    let h = harness(
        vec![Arc::new(StubSearch::ok(
            "tavily",
            vec![
                search_result("hydrogène vert solaire", "https://down.example/a"),
                search_result("hydrogène industriel solaire", "https://down.example/b"),
            ],
        ))],
        // No scripted pages: every fetch answers HTTP 500.
        vec![],
    )
    .await;

    let err = tools::research_complete_pipeline_with_memory(&h.state, topic, 3, true)
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Extraction(_)));
    assert!(err.to_string().starts_with("ExtractionFailure:"));

    // Error entry in the conversation log, no cached report.
    let history = h.state.memory.recent_conversations(5).await;
    assert_eq!(history.len(), 1);
    assert!(history[0].assistant.contains("ExtractionFailure"));
    assert!(h
        .state
        .memory
        .cache_get(topic, Some(f64::INFINITY))
        .await
        .is_none());
}

// ─────────────────────────────────────────────────────────────────────────────
// Stability and tool surface
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn repeated_runs_with_cache_return_byte_identical_markdown() {
    let topic = "solaire et agriculture";
    let h = harness(
        vec![Arc::new(StubSearch::ok(
            "tavily",
            vec![search_result("Agrivoltaïsme solaire", "https://example.com/agri")],
        ))],
        vec![("https://example.com/agri".to_string(), article("agricole"))],
    )
    .await;

    let first = tools::research_complete_pipeline_with_memory(&h.state, topic, 3, true)
        .await
        .unwrap();
    let second = tools::research_complete_pipeline_with_memory(&h.state, topic, 3, true)
        .await
        .unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn memory_tools_report_search_results_and_history() {
    let topic = "géothermie et solaire hybride";
    let h = harness(
        vec![Arc::new(StubSearch::ok(
            "tavily",
            vec![search_result("Hybride solaire", "https://example.com/h")],
        ))],
        vec![("https://example.com/h".to_string(), article("hybride"))],
    )
    .await;

    tools::research_complete_pipeline_with_memory(&h.state, topic, 3, true)
        .await
        .unwrap();

    let found = tools::search_in_memory(&h.state, "solaire réseau", 5)
        .await
        .unwrap();
    assert!(found.contains("Résultats en mémoire"));

    let history = tools::get_research_history(&h.state, 5).await.unwrap();
    assert!(history.contains(topic));

    // clear_memory without confirmation is a no-op.
    tools::clear_memory(&h.state, false).await.unwrap();
    assert!(tools::get_research_history(&h.state, 5)
        .await
        .unwrap()
        .contains(topic));

    // Confirmed clear drops history and cache, keeps the corpus.
    tools::clear_memory(&h.state, true).await.unwrap();
    assert!(tools::get_research_history(&h.state, 5)
        .await
        .unwrap()
        .contains("Aucune recherche"));
    assert!(h.state.memory.corpus_size().await.unwrap() > 0);
    assert!(h.state.memory.cache_get(topic, Some(f64::INFINITY)).await.is_none());
}

//! Prompt templates for every LLM call in the pipeline.
//!
//! The templates keep labeled sections (`POINTS CLÉS`, `SENTIMENT:`,
//! `CRÉDIBILITÉ:`, `## THÈME …`) because the stage parsers anchor on them.
//! Register is French; the parsers accept English markers as well.

use crate::core::types::DocumentSummary;

pub const SYSTEM_RESEARCHER: &str = "Tu es un expert en analyse sémantique spécialisé dans \
     l'extraction de mots-clés pour la recherche web.";

pub const SYSTEM_SUMMARIZER: &str = "Tu es un agent d'analyse IA expert en synthèse de documents, \
     extraction de points clés et évaluation de crédibilité.";

pub const SYSTEM_ANALYST: &str =
    "Tu es un expert en analyse comparative de documents.";

pub const SYSTEM_SYNTHESIZER: &str = "Tu es un expert en synthèse de recherche et rédaction de rapports finaux. \
     Tu excelles dans la création de documents structurés, professionnels et \
     basés sur des analyses multiples.";

pub fn keyword_extraction(topic: &str) -> String {
    format!(
        "Analyse le sujet de recherche suivant et extrais 3-7 mots-clés pertinents \
         qui amélioreront la recherche web.\n\n\
         Sujet: {topic}\n\n\
         Règles:\n\
         1. Extrais des mots-clés spécifiques et techniques liés au sujet\n\
         2. Évite les mots trop génériques (analyse, étude, recherche)\n\
         3. Privilégie les synonymes et termes alternatifs\n\
         4. Évite de répéter les mots déjà présents dans le sujet\n\n\
         Format de réponse: uniquement une liste de mots-clés séparés par des \
         virgules, sans numérotation.\n\n\
         Mots-clés pour \"{topic}\":"
    )
}

pub fn executive_summary(title: &str, author: &str, url: &str, content: &str) -> String {
    format!(
        "Crée un résumé exécutif concis du document suivant.\n\n\
         DOCUMENT:\nTitre: {title}\nAuteur: {author}\nURL: {url}\n\n\
         CONTENU:\n{content}\n\n\
         INSTRUCTIONS:\n\
         1. Rédige un résumé exécutif de 2-3 phrases maximum\n\
         2. Capture l'essence et les points les plus importants\n\
         3. Focus sur les conclusions et impacts principaux\n\n\
         RÉSUMÉ EXÉCUTIF:"
    )
}

pub fn detailed_analysis(title: &str, author: &str, url: &str, content: &str) -> String {
    format!(
        "Effectue une analyse détaillée du document suivant.\n\n\
         DOCUMENT:\nTitre: {title}\nAuteur: {author}\nURL: {url}\n\n\
         CONTENU:\n{content}\n\n\
         ANALYSE DEMANDÉE:\n\
         1. **RÉSUMÉ DÉTAILLÉ** (2-3 paragraphes)\n\
         2. **POINTS CLÉS** (3-5 points, format: - Point clé)\n\
         3. **ARGUMENTS PRINCIPAUX**\n\
         4. **DONNÉES ET STATISTIQUES**\n\
         5. **LIMITATIONS**\n\n\
         Structure ta réponse avec des sections claires et des listes à puces.\n\n\
         ANALYSE DÉTAILLÉE:"
    )
}

pub fn sentiment_analysis(title: &str, content: &str) -> String {
    format!(
        "Évalue le sentiment et la crédibilité du document suivant.\n\n\
         DOCUMENT:\nTitre: {title}\nContenu: {content}\n\n\
         Format de réponse:\n\
         SENTIMENT: [Positif/Neutre/Négatif] - [Justification]\n\
         CRÉDIBILITÉ: [Score]/10 - [Justification]\n\
         BIAIS: [Description des biais identifiés]\n\n\
         ÉVALUATION:"
    )
}

pub fn chunk_summary(title: &str, chunk_id: usize, total_chunks: usize, chunk: &str) -> String {
    format!(
        "Résume le chunk suivant du document.\n\n\
         CHUNK {chunk_id}/{total_chunks} du document \"{title}\" :\n\n{chunk}\n\n\
         INSTRUCTIONS:\n\
         1. Résume ce chunk en 5-7 phrases claires et informatives\n\
         2. Garde uniquement les informations essentielles\n\
         3. Utilise un style neutre et professionnel\n\n\
         RÉSUMÉ DU CHUNK:"
    )
}

pub fn chunk_synthesis(title: &str, url: &str, partial_summaries: &str) -> String {
    format!(
        "Crée un résumé unifié à partir des analyses partielles suivantes.\n\n\
         ANALYSES PARTIELLES:\n{partial_summaries}\n\n\
         DOCUMENT ORIGINAL:\nTitre: {title}\nURL: {url}\n\n\
         Structure attendue:\n\
         RÉSUMÉ EXÉCUTIF: (2-3 phrases)\n\
         RÉSUMÉ DÉTAILLÉ: (2-3 paragraphes)\n\
         POINTS CLÉS: (liste à puces, format: - Point clé)\n\
         SENTIMENT: [Positif/Neutre/Négatif] CRÉDIBILITÉ: [Score]/10\n\n\
         SYNTHÈSE FINALE:"
    )
}

pub fn global_analysis(all_summaries: &str) -> String {
    format!(
        "Analyse les résumés de documents suivants et identifie:\n\n\
         1. **Thèmes communs** : les sujets qui reviennent dans plusieurs documents\n\
         2. **Points de consensus** : les idées sur lesquelles les sources s'accordent\n\
         3. **Points conflictuels** : les idées contradictoires entre les sources\n\n\
         RÉSUMÉS:\n{all_summaries}\n\n\
         Format ta réponse avec des sections claires et des listes à puces."
    )
}

pub fn final_synthesis(
    topic: &str,
    document_summaries: &str,
    common_themes: &[String],
    consensus_points: &[String],
    conflicting_views: &[String],
) -> String {
    format!(
        "Crée un rapport final complet basé sur les résumés de documents suivants.\n\n\
         SUJET DE RECHERCHE: {topic}\n\n\
         RÉSUMÉS DE DOCUMENTS ANALYSÉS:\n{document_summaries}\n\n\
         ANALYSE GLOBALE EXISTANTE:\n\
         - Thèmes communs: {themes}\n\
         - Points de consensus: {consensus}\n\
         - Points conflictuels: {conflicts}\n\n\
         INSTRUCTIONS:\n\
         Organise le rapport en sections thématiques introduites par des titres \
         Markdown de niveau 2 (## Titre). Synthétise les informations de manière \
         cohérente, présente les différentes perspectives quand elles existent et \
         termine par les implications principales.\n\n\
         RAPPORT FINAL:",
        themes = common_themes.join(", "),
        consensus = consensus_points.join(", "),
        conflicts = conflicting_views.join(", "),
    )
}

pub fn thematic_analysis(topic: &str, summaries: &str) -> String {
    format!(
        "Organise et analyse les informations suivantes par thèmes cohérents.\n\n\
         SUJET: {topic}\nRÉSUMÉS: {summaries}\n\n\
         INSTRUCTIONS:\n\
         1. Identifie 3-6 thèmes principaux qui émergent des résumés\n\
         2. Pour chaque thème, synthétise les informations de toutes les sources\n\
         3. Classe les thèmes par ordre d'importance\n\n\
         ANALYSE THÉMATIQUE:"
    )
}

pub fn report_executive_summary(topic: &str, analysis_data: &str) -> String {
    format!(
        "Crée un résumé exécutif percutant basé sur les analyses suivantes.\n\n\
         SUJET: {topic}\n\n\
         DONNÉES D'ANALYSE:\n{analysis_data}\n\n\
         INSTRUCTIONS:\n\
         CONCLUSIONS PRINCIPALES: (3-5 points, format: - Point)\n\
         INSIGHTS CLÉS: (liste à puces)\n\
         RECOMMANDATIONS: (2-4 actions concrètes, liste à puces)\n\
         SYNTHÈSE NARRATIVE: (2-3 paragraphes)\n\n\
         RÉSUMÉ EXÉCUTIF:"
    )
}

/// One compact block per summary, fed to the synthesis prompts.
pub fn compile_document_summaries(summaries: &[DocumentSummary]) -> String {
    summaries
        .iter()
        .enumerate()
        .map(|(i, s)| {
            let points: Vec<&str> = s.key_points.iter().map(|kp| kp.title.as_str()).collect();
            format!(
                "Document {n}: {title}\nURL: {url}\nRésumé exécutif: {exec}\n\
                 Résumé détaillé: {detail}\nCrédibilité: {cred}\nPoints clés: {points}",
                n = i + 1,
                title = s.title,
                url = s.url,
                exec = s.executive_summary,
                detail = s.detailed_summary,
                cred = s
                    .credibility_score
                    .map(|c| format!("{c:.2}"))
                    .unwrap_or_else(|| "n/a".to_string()),
                points = points.join(", "),
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub const CONNECTION_TEST_PROMPT: &str =
    "Test de connexion. Réponds juste 'OK'.";

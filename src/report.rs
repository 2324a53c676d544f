//! Deterministic report renderings: markdown, plain text, HTML.
//!
//! All three share the same structural order — title block, executive
//! summary, introduction, main sections, key themes, conclusion,
//! methodology, sources — so the formats differ only in markup.

use crate::core::types::{FinalReport, ReportSection};

/// Whitespace-token count over the report's contributing fields.
pub fn report_word_count(
    introduction: &str,
    conclusion: &str,
    summary_text: &str,
    sections: &[ReportSection],
) -> usize {
    introduction.split_whitespace().count()
        + conclusion.split_whitespace().count()
        + summary_text.split_whitespace().count()
        + sections
            .iter()
            .map(|s| s.content.split_whitespace().count())
            .sum::<usize>()
}

fn bullet_list(items: &[String]) -> String {
    items
        .iter()
        .map(|item| format!("- {item}"))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn render_markdown(report: &FinalReport) -> String {
    let mut out = String::new();

    out.push_str(&format!(
        "# {}\n\n**Sujet:** {}  \n**Date de génération:** {}  \n**ID du rapport:** {}\n\n---\n\n",
        report.title,
        report.topic,
        report.generated_at.format("%d/%m/%Y %H:%M"),
        report.report_id
    ));

    out.push_str(&format!(
        "## Résumé Exécutif\n\n{}\n\n### Conclusions Principales\n{}\n\n\
         ### Insights Clés\n{}\n\n### Recommandations\n{}\n\n---\n\n",
        report.executive_summary.summary_text,
        bullet_list(&report.executive_summary.key_findings),
        bullet_list(&report.executive_summary.main_insights),
        bullet_list(&report.executive_summary.recommendations),
    ));

    out.push_str(&format!("## Introduction\n\n{}\n\n---\n\n", report.introduction));

    for section in &report.main_sections {
        out.push_str(&format!("## {}\n\n{}\n\n---\n\n", section.title, section.content));
    }

    if !report.key_themes.is_empty() {
        out.push_str(&format!(
            "## Thèmes Principaux\n\n{}\n\n---\n\n",
            bullet_list(&report.key_themes)
        ));
    }

    out.push_str(&format!("## Conclusion\n\n{}\n\n---\n\n", report.conclusion));

    out.push_str(&format!(
        "## Méthodologie\n\n**Approche:** {}  \n**Sources analysées:** {}  \n\
         **Score de confiance:** {:.2}/1.0\n\n### Méthodes d'Analyse\n{}\n\n\
         ### Limitations\n{}\n\n---\n\n## Sources\n\n",
        report.methodology.research_approach,
        report.methodology.sources_count,
        report.confidence_score,
        bullet_list(&report.methodology.analysis_methods),
        bullet_list(&report.methodology.limitations),
    ));

    for (i, source) in report.sources.iter().enumerate() {
        out.push_str(&format!("{}. **{}**  \n   URL: {}  \n", i + 1, source.title, source.url));
        if let Some(credibility) = source.credibility_score {
            out.push_str(&format!("   Crédibilité: {credibility:.2}/1.0  \n"));
        }
        out.push('\n');
    }

    out
}

pub fn render_text(report: &FinalReport) -> String {
    let underline = |text: &str| "-".repeat(text.chars().count());
    let mut out = String::new();

    out.push_str(&format!(
        "{}\n{}\n\nSujet: {}\nDate: {}\nID: {}\n\n",
        report.title,
        "=".repeat(report.title.chars().count()),
        report.topic,
        report.generated_at.format("%d/%m/%Y %H:%M"),
        report.report_id
    ));

    out.push_str(&format!(
        "RÉSUMÉ EXÉCUTIF\n{}\n\n{}\n\nCONCLUSIONS PRINCIPALES:\n{}\n\n",
        underline("RÉSUMÉ EXÉCUTIF"),
        report.executive_summary.summary_text,
        report
            .executive_summary
            .key_findings
            .iter()
            .map(|f| format!("• {f}"))
            .collect::<Vec<_>>()
            .join("\n"),
    ));

    out.push_str(&format!(
        "INTRODUCTION\n{}\n\n{}\n\n",
        underline("INTRODUCTION"),
        report.introduction
    ));

    for section in &report.main_sections {
        let heading = section.title.to_uppercase();
        out.push_str(&format!(
            "{}\n{}\n\n{}\n\n",
            heading,
            underline(&heading),
            section.content
        ));
    }

    if !report.key_themes.is_empty() {
        out.push_str(&format!(
            "THÈMES PRINCIPAUX\n{}\n\n{}\n\n",
            underline("THÈMES PRINCIPAUX"),
            report
                .key_themes
                .iter()
                .map(|t| format!("• {t}"))
                .collect::<Vec<_>>()
                .join("\n")
        ));
    }

    out.push_str(&format!(
        "CONCLUSION\n{}\n\n{}\n\n",
        underline("CONCLUSION"),
        report.conclusion
    ));

    out.push_str(&format!(
        "MÉTHODOLOGIE\n{}\n\nApproche: {}\nSources analysées: {}\nScore de confiance: {:.2}/1.0\n\nSOURCES\n{}\n\n",
        underline("MÉTHODOLOGIE"),
        report.methodology.research_approach,
        report.methodology.sources_count,
        report.confidence_score,
        underline("SOURCES"),
    ));
    for (i, source) in report.sources.iter().enumerate() {
        out.push_str(&format!("{}. {} — {}\n", i + 1, source.title, source.url));
    }

    out
}

pub fn render_html(report: &FinalReport) -> String {
    let escape = |text: &str| {
        text.replace('&', "&amp;")
            .replace('<', "&lt;")
            .replace('>', "&gt;")
    };
    let list_items = |items: &[String]| {
        items
            .iter()
            .map(|item| format!("<li>{}</li>", escape(item)))
            .collect::<String>()
    };

    let mut out = format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<title>{title}</title>\n<meta charset=\"utf-8\">\n\
         <style>\nbody {{ font-family: Arial, sans-serif; margin: 40px; line-height: 1.6; }}\n\
         h1 {{ color: #333; border-bottom: 2px solid #333; }}\n\
         h2 {{ color: #666; border-bottom: 1px solid #ccc; }}\n\
         .metadata {{ background: #f5f5f5; padding: 15px; border-radius: 5px; }}\n\
         .section {{ margin: 20px 0; }}\n</style>\n</head>\n<body>\n\
         <h1>{title}</h1>\n\
         <div class=\"metadata\">\n<strong>Sujet:</strong> {topic}<br>\n\
         <strong>Date:</strong> {date}<br>\n\
         <strong>Score de confiance:</strong> {confidence:.2}/1.0\n</div>\n",
        title = escape(&report.title),
        topic = escape(&report.topic),
        date = report.generated_at.format("%d/%m/%Y %H:%M"),
        confidence = report.confidence_score,
    );

    out.push_str(&format!(
        "<h2>Résumé Exécutif</h2>\n<p>{}</p>\n\
         <h3>Conclusions Principales</h3>\n<ul>{}</ul>\n\
         <h3>Insights Clés</h3>\n<ul>{}</ul>\n\
         <h3>Recommandations</h3>\n<ul>{}</ul>\n",
        escape(&report.executive_summary.summary_text),
        list_items(&report.executive_summary.key_findings),
        list_items(&report.executive_summary.main_insights),
        list_items(&report.executive_summary.recommendations),
    ));

    out.push_str(&format!(
        "<h2>Introduction</h2>\n<p>{}</p>\n",
        escape(&report.introduction)
    ));

    for section in &report.main_sections {
        out.push_str(&format!(
            "<h2>{}</h2>\n<div class=\"section\">{}</div>\n",
            escape(&section.title),
            escape(&section.content).replace('\n', "<br>")
        ));
    }

    if !report.key_themes.is_empty() {
        out.push_str(&format!(
            "<h2>Thèmes Principaux</h2>\n<ul>{}</ul>\n",
            list_items(&report.key_themes)
        ));
    }

    out.push_str(&format!(
        "<h2>Conclusion</h2>\n<p>{}</p>\n<h2>Méthodologie</h2>\n\
         <p>{} — {} sources analysées.</p>\n<h2>Sources</h2>\n<ol>\n",
        escape(&report.conclusion),
        escape(&report.methodology.research_approach),
        report.methodology.sources_count,
    ));

    for source in &report.sources {
        out.push_str(&format!(
            "<li><strong>{}</strong><br><a href=\"{}\">{}</a>{}</li>\n",
            escape(&source.title),
            escape(&source.url),
            escape(&source.url),
            source
                .credibility_score
                .map(|c| format!("<br>Crédibilité: {c:.2}/1.0"))
                .unwrap_or_default(),
        ));
    }
    out.push_str("</ol>\n</body>\n</html>\n");

    out
}

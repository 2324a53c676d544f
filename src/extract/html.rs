//! HTML content extraction: main-content selection, plain-text conversion
//! with paragraph breaks, and metadata (title / author / publication date).

use chrono::{DateTime, Utc};
use scraper::{ElementRef, Html, Selector};

/// Main-content candidates, tried in order before falling back to `<body>`.
const CONTENT_SELECTORS: &[&str] = &[
    "article",
    "[role=\"main\"]",
    "main",
    ".content",
    ".post-content",
    ".entry-content",
    ".article-content",
    "#content",
    ".main-content",
];

/// Elements whose text never belongs to the article body.
const EXCLUDED_TAGS: &[&str] = &[
    "script", "style", "noscript", "nav", "header", "footer", "aside", "form", "svg", "canvas",
    "iframe",
];

/// Block-level tags that terminate a paragraph when walking the tree.
const BLOCK_TAGS: &[&str] = &[
    "p", "div", "section", "li", "h1", "h2", "h3", "h4", "h5", "h6", "blockquote", "pre", "tr",
    "br",
];

#[derive(Debug, Default)]
pub struct HtmlExtraction {
    pub title: String,
    pub text: String,
    pub author: Option<String>,
    pub published_date: Option<DateTime<Utc>>,
}

pub fn extract(html: &str) -> HtmlExtraction {
    let document = Html::parse_document(html);

    HtmlExtraction {
        title: extract_title(&document),
        text: extract_main_text(&document),
        author: extract_author(&document),
        published_date: extract_published_date(&document),
    }
}

fn select_first<'a>(document: &'a Html, css: &str) -> Option<ElementRef<'a>> {
    let selector = Selector::parse(css).ok()?;
    document.select(&selector).next()
}

fn extract_main_text(document: &Html) -> String {
    let root = CONTENT_SELECTORS
        .iter()
        .find_map(|css| select_first(document, css))
        .or_else(|| select_first(document, "body"));

    let Some(root) = root else {
        return String::new();
    };

    let mut paragraphs: Vec<String> = Vec::new();
    let mut current = String::new();
    walk(&root, &mut paragraphs, &mut current);
    if !current.trim().is_empty() {
        paragraphs.push(current);
    }

    paragraphs
        .iter()
        .map(|p| p.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Depth-first text collection, skipping excluded subtrees and flushing a
/// paragraph at every block-level boundary.
fn walk(element: &ElementRef<'_>, paragraphs: &mut Vec<String>, current: &mut String) {
    for child in element.children() {
        if let Some(child_element) = ElementRef::wrap(child) {
            let tag = child_element.value().name();
            if EXCLUDED_TAGS.contains(&tag) {
                continue;
            }
            let is_block = BLOCK_TAGS.contains(&tag);
            if is_block && !current.trim().is_empty() {
                paragraphs.push(std::mem::take(current));
            }
            walk(&child_element, paragraphs, current);
            if is_block && !current.trim().is_empty() {
                paragraphs.push(std::mem::take(current));
            }
        } else if let Some(text) = child.value().as_text() {
            current.push_str(&text.text);
            current.push(' ');
        }
    }
}

/// `<title>` → `og:title` → first `<h1>`.
fn extract_title(document: &Html) -> String {
    if let Some(node) = select_first(document, "title") {
        let text = node.text().collect::<String>().trim().to_string();
        if !text.is_empty() {
            return text;
        }
    }
    if let Some(node) = select_first(document, "meta[property=\"og:title\"]") {
        if let Some(content) = node.value().attr("content") {
            let content = content.trim();
            if !content.is_empty() {
                return content.to_string();
            }
        }
    }
    if let Some(node) = select_first(document, "h1") {
        let text = node.text().collect::<String>().trim().to_string();
        if !text.is_empty() {
            return text;
        }
    }
    "Titre non trouvé".to_string()
}

/// `meta[name=author]` → schema.org `itemprop=author` → common byline classes.
fn extract_author(document: &Html) -> Option<String> {
    if let Some(node) = select_first(document, "meta[name=\"author\"]") {
        if let Some(content) = node.value().attr("content") {
            let content = content.trim();
            if !content.is_empty() {
                return Some(content.to_string());
            }
        }
    }
    if let Some(node) = select_first(document, "[itemprop=\"author\"]") {
        let text = node.text().collect::<String>().trim().to_string();
        if !text.is_empty() {
            return Some(text);
        }
    }
    for css in [".author", ".byline", ".post-author", ".article-author"] {
        if let Some(node) = select_first(document, css) {
            let text = node.text().collect::<String>().trim().to_string();
            if !text.is_empty() && text.len() < 100 {
                return Some(text);
            }
        }
    }
    None
}

/// `article:published_time` meta → schema.org `datePublished`.
fn extract_published_date(document: &Html) -> Option<DateTime<Utc>> {
    if let Some(node) = select_first(document, "meta[property=\"article:published_time\"]") {
        if let Some(content) = node.value().attr("content") {
            if let Some(date) = crate::search::parse_published_date(content) {
                return Some(date);
            }
        }
    }
    if let Some(node) = select_first(document, "[itemprop=\"datePublished\"]") {
        let raw = node
            .value()
            .attr("datetime")
            .map(|s| s.to_string())
            .unwrap_or_else(|| node.text().collect::<String>());
        return crate::search::parse_published_date(&raw);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
        <html><head>
          <title>Un article de fond</title>
          <meta name="author" content="Marie Martin">
          <meta property="article:published_time" content="2024-03-10T09:30:00Z">
        </head><body>
          <nav>Accueil | Contact</nav>
          <article>
            <h1>Un article de fond</h1>
            <p>Premier paragraphe avec du contenu.</p>
            <script>console.log("bruit");</script>
            <p>Second paragraphe, plus détaillé.</p>
          </article>
          <footer>Mentions légales</footer>
        </body></html>"#;

    #[test]
    fn picks_article_over_body() {
        let out = extract(PAGE);
        assert!(out.text.contains("Premier paragraphe"));
        assert!(!out.text.contains("Mentions légales"));
        assert!(!out.text.contains("console.log"));
    }

    #[test]
    fn preserves_paragraph_breaks() {
        let out = extract(PAGE);
        assert!(out.text.contains("\n\n"));
    }

    #[test]
    fn reads_metadata() {
        let out = extract(PAGE);
        assert_eq!(out.title, "Un article de fond");
        assert_eq!(out.author.as_deref(), Some("Marie Martin"));
        assert!(out.published_date.is_some());
    }

    #[test]
    fn falls_back_to_og_title_then_h1() {
        let html = r#"<html><head><meta property="og:title" content="Depuis OG"></head>
                      <body><p>corps</p></body></html>"#;
        assert_eq!(extract(html).title, "Depuis OG");

        let html = "<html><body><h1>Depuis H1</h1><p>corps</p></body></html>";
        assert_eq!(extract(html).title, "Depuis H1");
    }
}

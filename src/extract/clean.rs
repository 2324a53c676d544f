//! Text cleanup applied to every extracted document before filtering.

use regex::Regex;
use std::sync::OnceLock;

/// Marker appended when content is cut at the configured maximum length.
pub const TRUNCATION_MARKER: &str = "... [Contenu tronqué]";

fn re_spaces() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[ \t]+").unwrap())
}

fn re_newlines() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\n{3,}").unwrap())
}

/// Normalize extracted text: drop control characters (tab and newline
/// excepted), collapse space/tab runs, trim each line, and cap blank runs
/// at one empty line.
pub fn clean_text(content: &str) -> String {
    if content.is_empty() {
        return String::new();
    }

    let without_controls: String = content
        .chars()
        .filter(|c| !c.is_control() || *c == '\t' || *c == '\n')
        .collect();

    let collapsed = re_spaces().replace_all(&without_controls, " ");

    let trimmed_lines: Vec<&str> = collapsed.lines().map(str::trim).collect();
    let joined = trimmed_lines.join("\n");

    re_newlines().replace_all(&joined, "\n\n").trim().to_string()
}

/// Cut `content` at `max_length` characters, appending the truncation
/// marker. Returns the (possibly shortened) text and whether it was cut.
pub fn enforce_max_length(content: String, max_length: usize) -> (String, bool) {
    if content.chars().count() <= max_length {
        return (content, false);
    }
    let mut cut: String = content.chars().take(max_length).collect();
    cut.push_str(TRUNCATION_MARKER);
    (cut, true)
}

pub fn count_words(text: &str) -> usize {
    text.split_whitespace().count()
}

//! Text normalization applied to every section body.
//!
//! Each pass is a function `&str -> String` applied in sequence.

use std::sync::LazyLock;

use regex::Regex;

/// Run the full cleanup pipeline on a section's raw Markdown body.
pub(crate) fn run_pipeline(md: &str) -> String {
    let mut result = md.to_string();

    result = strip_html_comments(&result);
    result = strip_leftover_html(&result);
    result = normalize_whitespace(&result);
    result = clean_blank_lines(&result);

    result.trim_matches('\n').to_string()
}

// ---------------------------------------------------------------------------
// Pass 1: HTML comments
// ---------------------------------------------------------------------------

/// Remove `<!-- ... -->` comments, including multi-line ones.
fn strip_html_comments(md: &str) -> String {
    static COMMENT_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?s)<!--.*?-->").expect("valid regex"));

    COMMENT_RE.replace_all(md, "").to_string()
}

// ---------------------------------------------------------------------------
// Pass 2: Strip leftover layout HTML
// ---------------------------------------------------------------------------

/// Remove layout-only HTML tags outside code blocks, keeping their text.
fn strip_leftover_html(md: &str) -> String {
    static HTML_TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"</?(?:div|span|section|article|aside|header|footer|figure|figcaption|details|summary)(?:\s[^>]*)?>").expect("valid regex")
    });

    let mut lines = Vec::new();
    let mut in_code_block = false;

    for line in md.lines() {
        if is_fence(line) {
            in_code_block = !in_code_block;
            lines.push(line.to_string());
            continue;
        }
        if in_code_block {
            lines.push(line.to_string());
        } else {
            lines.push(HTML_TAG_RE.replace_all(line, "").to_string());
        }
    }

    lines.join("\n")
}

// ---------------------------------------------------------------------------
// Pass 3: Trailing whitespace
// ---------------------------------------------------------------------------

fn normalize_whitespace(md: &str) -> String {
    md.lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
}

// ---------------------------------------------------------------------------
// Pass 4: Blank-line runs
// ---------------------------------------------------------------------------

/// Collapse runs of 3+ blank lines into a single blank line.
fn clean_blank_lines(md: &str) -> String {
    static MULTI_BLANK_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\n{3,}").expect("valid regex"));

    MULTI_BLANK_RE.replace_all(md, "\n\n").to_string()
}

/// Whether a line opens or closes a fenced code block.
pub(crate) fn is_fence(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with("```") || trimmed.starts_with("~~~")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_blank_lines_collapses_excess() {
        let input = "Line 1\n\n\n\n\nLine 2";
        assert_eq!(clean_blank_lines(input), "Line 1\n\nLine 2");
    }

    #[test]
    fn clean_blank_lines_keeps_double() {
        let input = "Line 1\n\nLine 2";
        assert_eq!(clean_blank_lines(input), input);
    }

    #[test]
    fn strip_leftover_html_removes_div_tags() {
        let input = "<div class=\"note\">Important info</div>\n\nMore text";
        let result = strip_leftover_html(input);
        assert!(result.contains("Important info"));
        assert!(!result.contains("<div"));
    }

    #[test]
    fn strip_leftover_html_preserves_code_blocks() {
        let input = "```html\n<div>Preserved</div>\n```\n\nText";
        let result = strip_leftover_html(input);
        assert!(result.contains("<div>Preserved</div>"));
    }

    #[test]
    fn comments_are_removed() {
        let input = "Before <!-- hidden\nnote --> after";
        assert_eq!(strip_html_comments(input), "Before  after");
    }

    #[test]
    fn pipeline_trims_outer_blank_lines() {
        let input = "\n\nBody text   \n\n\n\nMore\n\n";
        assert_eq!(run_pipeline(input), "Body text\n\nMore");
    }
}

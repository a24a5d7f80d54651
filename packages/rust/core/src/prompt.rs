//! Prompt construction and response parsing.
//!
//! Every request is framed the same way: the section's own text sits in an
//! AUTHORITATIVE SOURCE TEXT fence and every context block in a labeled
//! ADVISORY CONTEXT fence. The system instructions tell the model that the
//! source text wins any contradiction.

use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;

use cogreader_shared::{ReaderError, Result};

use crate::context::BlockKind;
use crate::summarizer::{SummaryOutput, SummaryRequest, SummaryTask};

const TRUNCATION_MARKER: &str = "\n\n[... source text truncated ...]";

/// System instructions shared by every task.
pub const SYSTEM_PROMPT: &str = "You are a careful reader building an understanding of a document \
one section at a time.

Authority rule: the text inside AUTHORITATIVE SOURCE TEXT is the ground truth for the section \
you are summarizing. Everything inside ADVISORY CONTEXT (summaries of other sections, earlier \
summaries of this section, glossary entries) is background only. When the advisory context \
disagrees with the source text, follow the source text and do not repeat the contradicted claim.

Reply with a single JSON object and nothing else:
{\"summary\": \"<summary>\", \"key_concepts\": [\"<concept>\", ...]}";

/// Render the user message for a request.
pub fn render_user_prompt(request: &SummaryRequest) -> String {
    let mut out = String::new();

    out.push_str(&format!("Task: {}\n", task_instruction(request)));
    out.push_str(&format!("Section: {} (id: {})\n", request.title, request.section_id));
    out.push_str(&format!("Reading pass: {} ({} context)\n", request.pass, request.mode));
    out.push_str(&format!(
        "Return at most {} key concepts, most important first.\n\n",
        request.max_key_concepts
    ));

    for block in &request.context {
        out.push_str(&format!("=== ADVISORY CONTEXT: {} ===\n", block.label));
        out.push_str(block.text.trim());
        out.push_str("\n=== END ADVISORY CONTEXT ===\n\n");
    }

    if request.task != SummaryTask::Synthesis {
        out.push_str("=== AUTHORITATIVE SOURCE TEXT ===\n");
        out.push_str(&truncate_source(&request.source_text, request.max_source_chars));
        out.push_str("\n=== END AUTHORITATIVE SOURCE TEXT ===\n");
    }

    out
}

fn task_instruction(request: &SummaryRequest) -> &'static str {
    match request.task {
        SummaryTask::Section => {
            "Summarize the section from its source text, using the context only to situate it."
        }
        SummaryTask::AncestorUpdate => {
            "Revise the summary of this section. Its own source text is authoritative; the \
             subsection summaries describe material read since and should be folded in."
        }
        SummaryTask::Synthesis => {
            "This section has no text of its own. Synthesize its summary from the child section \
             summaries; ancestor summaries are background only."
        }
    }
}

/// Truncate on a char boundary, appending a marker when anything was cut.
pub fn truncate_source(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        None => text.to_string(),
        Some((byte_idx, _)) => format!("{}{TRUNCATION_MARKER}", &text[..byte_idx]),
    }
}

// ---------------------------------------------------------------------------
// Response parsing
// ---------------------------------------------------------------------------

static FENCED_JSON_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```(?:json)?\s*(\{.*?\})\s*```").expect("fenced json regex"));

static KEY_CONCEPTS_LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^\s*(?:\*\*)?key concepts(?:\*\*)?\s*:\s*(.*)$").expect("key concepts regex")
});

#[derive(Deserialize)]
struct RawResponse {
    #[serde(default)]
    summary: String,
    #[serde(default)]
    key_concepts: Vec<String>,
}

/// Parse a model reply: bare JSON, fenced JSON, or prose with a `Key concepts:` line.
pub fn parse_response(raw: &str, max_key_concepts: usize) -> Result<SummaryOutput> {
    let trimmed = raw.trim();

    let parsed = serde_json::from_str::<RawResponse>(trimmed)
        .ok()
        .or_else(|| {
            FENCED_JSON_RE
                .captures(trimmed)
                .and_then(|c| serde_json::from_str::<RawResponse>(&c[1]).ok())
        })
        .or_else(|| {
            let start = trimmed.find('{')?;
            let end = trimmed.rfind('}')?;
            serde_json::from_str::<RawResponse>(trimmed.get(start..=end)?).ok()
        });

    let (summary, concepts) = match parsed {
        Some(r) => (r.summary, r.key_concepts),
        None => parse_plain(trimmed),
    };

    let summary = summary.trim().to_string();
    if summary.is_empty() {
        return Err(ReaderError::Summarization("model returned an empty summary".into()));
    }

    Ok(SummaryOutput {
        summary,
        key_concepts: dedup_concepts(concepts, max_key_concepts),
    })
}

fn parse_plain(text: &str) -> (String, Vec<String>) {
    match KEY_CONCEPTS_LINE_RE.captures(text) {
        Some(caps) => {
            let Some(whole) = caps.get(0) else {
                return (text.to_string(), Vec::new());
            };
            let summary = format!("{}{}", &text[..whole.start()], &text[whole.end()..]);
            let concepts = caps[1]
                .split([',', ';'])
                .map(|c| c.trim().trim_matches(|ch: char| ch == '*' || ch == '`').to_string())
                .collect();
            (summary, concepts)
        }
        None => (text.to_string(), Vec::new()),
    }
}

/// Trim, drop blanks and case-insensitive duplicates, keep order, cap at `max`.
pub fn dedup_concepts(concepts: Vec<String>, max: usize) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    concepts
        .into_iter()
        .map(|c| c.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|c| !c.is_empty())
        .filter(|c| seen.insert(c.to_lowercase()))
        .take(max)
        .collect()
}

/// Whether any block in the request carries child material to synthesize from.
pub(crate) fn has_child_material(request: &SummaryRequest) -> bool {
    request.context.iter().any(|b| b.kind == BlockKind::Child)
}

//! Summarizer collaborators.
//!
//! The engine only sees the [`Summarizer`] trait. Implementations here:
//! - [`DryRunSummarizer`]: offline, deterministic, extractive
//! - [`CachedSummarizer`]: wraps another summarizer with the storage cache
//!
//! The HTTP-backed model client lives in [`crate::openrouter`].

use std::collections::HashSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use cogreader_shared::{ContextMode, Result, SectionId};
use cogreader_storage::Storage;

use crate::context::{BlockKind, ContextBlock};
use crate::prompt;

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

/// Why the summarizer is being called.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummaryTask {
    /// First summary of a leaf or content-bearing section in this pass.
    Section,
    /// Revision of a content-bearing ancestor after a descendant changed.
    AncestorUpdate,
    /// Deferred synthesis of a content-less section from its children.
    Synthesis,
}

impl SummaryTask {
    /// Storage key for the summary cache.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Section => "section",
            Self::AncestorUpdate => "ancestor_update",
            Self::Synthesis => "synthesis",
        }
    }
}

/// One summarizer invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryRequest {
    pub task: SummaryTask,
    pub pass: u32,
    pub mode: ContextMode,
    pub section_id: SectionId,
    pub title: String,
    /// The section's own text; authoritative. Empty for synthesis.
    pub source_text: String,
    pub context: Vec<ContextBlock>,
    pub max_key_concepts: usize,
    pub max_source_chars: usize,
}

/// What a summarizer returns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryOutput {
    pub summary: String,
    #[serde(default)]
    pub key_concepts: Vec<String>,
}

/// A (possibly remote, possibly stochastic) summarization function.
///
/// Retries and timeouts are the implementation's concern; an `Err` is
/// final for that invocation.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, request: &SummaryRequest) -> Result<SummaryOutput>;

    /// Model or implementation identifier, recorded in manifests and cache keys.
    fn name(&self) -> &str;
}

// ---------------------------------------------------------------------------
// Dry run
// ---------------------------------------------------------------------------

/// Offline extractive summarizer.
///
/// Reads only the authoritative text (or, for synthesis, the child
/// summaries), so context can never leak into its output.
#[derive(Debug, Clone)]
pub struct DryRunSummarizer {
    sentences: usize,
}

impl DryRunSummarizer {
    pub fn new() -> Self {
        Self { sentences: 2 }
    }
}

impl Default for DryRunSummarizer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Summarizer for DryRunSummarizer {
    async fn summarize(&self, request: &SummaryRequest) -> Result<SummaryOutput> {
        let material = match request.task {
            SummaryTask::Synthesis if prompt::has_child_material(request) => request
                .context
                .iter()
                .filter(|b| b.kind == BlockKind::Child)
                .map(|b| lead_sentences(&b.text, 1))
                .collect::<Vec<_>>()
                .join(" "),
            SummaryTask::Synthesis => String::new(),
            _ => prompt::truncate_source(&request.source_text, request.max_source_chars),
        };

        let mut summary = lead_sentences(&material, self.sentences);
        if request.task == SummaryTask::AncestorUpdate {
            let covered: Vec<&str> = request
                .context
                .iter()
                .filter(|b| b.kind == BlockKind::Descendant)
                .filter_map(|b| b.label.rsplit(" > ").next())
                .collect();
            if !covered.is_empty() {
                summary = format!("{summary} Covers: {}.", covered.join(", "));
            }
        }
        if summary.trim().is_empty() {
            summary = format!("{} (no content).", request.title);
        }

        let key_concepts =
            prompt::dedup_concepts(capitalised_terms(&material), request.max_key_concepts);
        Ok(SummaryOutput { summary, key_concepts })
    }

    fn name(&self) -> &str {
        "dry-run"
    }
}

/// The first `n` sentences, whitespace-collapsed.
fn lead_sentences(text: &str, n: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut end = flat.len();
    let mut found = 0;
    for (i, c) in flat.char_indices() {
        if matches!(c, '.' | '!' | '?') && flat[i + 1..].starts_with(' ') {
            found += 1;
            if found == n {
                end = i + 1;
                break;
            }
        }
    }
    flat[..end].to_string()
}

const COMMON_WORDS: &[&str] = &[
    "The", "This", "That", "These", "Those", "When", "Where", "What", "Which", "While", "With",
    "From", "Into", "After", "Before", "During", "Here", "There", "Then", "Also", "Some", "Each",
    "Every", "Both", "All", "Any", "But", "And", "For", "Not", "You", "Your", "Our", "Its", "Use",
    "See", "Note", "If", "It", "In", "On", "To", "A", "An", "Of", "Or", "By", "As", "At", "Is",
];

/// Capitalised words that are not sentence-initial, in order of appearance.
fn capitalised_terms(text: &str) -> Vec<String> {
    let common: HashSet<&str> = COMMON_WORDS.iter().copied().collect();
    let mut terms = Vec::new();

    for line in text.lines() {
        let words: Vec<&str> = line.split_whitespace().collect();
        for (i, word) in words.iter().enumerate() {
            if i == 0 || words[i - 1].ends_with(['.', '!', '?', ':']) {
                continue;
            }
            let clean = word.trim_matches(|c: char| !c.is_alphanumeric());
            if clean.chars().count() < 2 || common.contains(clean) {
                continue;
            }
            if clean.chars().next().is_some_and(char::is_uppercase) {
                terms.push(clean.to_string());
            }
        }
    }
    terms
}

// ---------------------------------------------------------------------------
// Caching
// ---------------------------------------------------------------------------

/// Compute a prompt hash for cache keying.
pub fn prompt_hash(model: &str, request: &SummaryRequest) -> String {
    let mut hasher = Sha256::new();
    hasher.update(model.as_bytes());
    hasher.update([0u8]);
    hasher.update(prompt::SYSTEM_PROMPT.as_bytes());
    hasher.update([0u8]);
    hasher.update(prompt::render_user_prompt(request).as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Serves repeated prompts from the summary cache.
///
/// Cache read or write errors are logged and otherwise ignored.
pub struct CachedSummarizer<S> {
    inner: S,
    storage: Storage,
}

impl<S: Summarizer> CachedSummarizer<S> {
    pub fn new(inner: S, storage: Storage) -> Self {
        Self { inner, storage }
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }
}

#[async_trait]
impl<S: Summarizer> Summarizer for CachedSummarizer<S> {
    async fn summarize(&self, request: &SummaryRequest) -> Result<SummaryOutput> {
        let model = self.inner.name();
        let hash = prompt_hash(model, request);

        match self.storage.get_cached_summary(&hash, model).await {
            Ok(Some(cached)) => match serde_json::from_str::<SummaryOutput>(&cached) {
                Ok(output) => {
                    debug!(
                        section_id = %request.section_id,
                        task = request.task.as_str(),
                        "summary cache hit"
                    );
                    return Ok(output);
                }
                Err(e) => warn!(error = %e, "discarding unreadable cache entry"),
            },
            Ok(None) => {}
            Err(e) => warn!(error = %e, "summary cache read failed"),
        }

        let output = self.inner.summarize(request).await?;

        match serde_json::to_string(&output) {
            Ok(json) => {
                if let Err(e) = self
                    .storage
                    .set_cached_summary(&hash, model, request.task.as_str(), &json)
                    .await
                {
                    warn!(error = %e, "summary cache write failed");
                }
            }
            Err(e) => warn!(error = %e, "could not serialize summary for cache"),
        }

        Ok(output)
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

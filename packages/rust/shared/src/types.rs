//! Reading artifacts: summaries, glossary, and the final knowledge record.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::tree::SectionId;

/// Current schema version of `knowledge.json` and `manifest.json`.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// RunId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper for reading-run identifiers (time-sortable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    /// Generate a new time-sortable run identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RunId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ---------------------------------------------------------------------------
// ContextMode
// ---------------------------------------------------------------------------

/// Which context payload accompanies a section in a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextMode {
    /// Ancestor and prior-sibling summaries only.
    Cumulative,
    /// Cumulative plus the previous pass's summary and a glossary prefix.
    Enriched,
}

impl ContextMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cumulative => "cumulative",
            Self::Enriched => "enriched",
        }
    }
}

impl std::fmt::Display for ContextMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Summary
// ---------------------------------------------------------------------------

/// The current understanding of one section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub section_id: SectionId,
    pub summary_text: String,
    /// Ordered, deduplicated, bounded.
    #[serde(default)]
    pub key_concepts: Vec<String>,
    /// Pass that produced this version.
    pub pass_number: u32,
    /// In-pass incremental updates applied since creation.
    #[serde(default)]
    pub revision_count: u32,
    /// Set when the section's own summarization failed and this is a placeholder.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub degraded: bool,
}

impl Summary {
    pub fn new(section_id: SectionId, summary_text: String, key_concepts: Vec<String>, pass_number: u32) -> Self {
        Self {
            section_id,
            summary_text,
            key_concepts,
            pass_number,
            revision_count: 0,
            degraded: false,
        }
    }

    /// Empty stand-in recorded when summarization fails.
    pub fn placeholder(section_id: SectionId, pass_number: u32) -> Self {
        Self {
            section_id,
            summary_text: String::new(),
            key_concepts: Vec::new(),
            pass_number,
            revision_count: 0,
            degraded: true,
        }
    }

    /// Whether this summary carries no information.
    pub fn is_empty(&self) -> bool {
        self.summary_text.trim().is_empty()
    }
}

/// Exactly one [`Summary`] per section id; inserts replace.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SummaryTable {
    entries: BTreeMap<SectionId, Summary>,
}

impl SummaryTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<&Summary> {
        self.entries.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Store a summary, returning the version it replaced.
    pub fn insert(&mut self, summary: Summary) -> Option<Summary> {
        self.entries.insert(summary.section_id.clone(), summary)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Summaries ordered by section id.
    pub fn iter(&self) -> impl Iterator<Item = &Summary> {
        self.entries.values()
    }

    /// Ids of sections holding a placeholder.
    pub fn degraded_ids(&self) -> Vec<SectionId> {
        self.entries
            .values()
            .filter(|s| s.degraded)
            .map(|s| s.section_id.clone())
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Glossary
// ---------------------------------------------------------------------------

/// A concept surfaced by one or more sections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlossaryEntry {
    /// Normalized key (lowercase, single-spaced).
    pub concept_id: String,
    /// Display form as first written.
    pub term: String,
    #[serde(default)]
    pub definition_text: String,
    /// Section with the lowest `sequence_index` that named the concept.
    pub first_section_id: SectionId,
    pub related_section_ids: BTreeSet<SectionId>,
}

/// Concept entries in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Glossary {
    entries: Vec<GlossaryEntry>,
}

impl Glossary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, concept_id: &str) -> Option<&GlossaryEntry> {
        self.entries.iter().find(|e| e.concept_id == concept_id)
    }

    pub fn get_mut(&mut self, concept_id: &str) -> Option<&mut GlossaryEntry> {
        self.entries.iter_mut().find(|e| e.concept_id == concept_id)
    }

    pub fn push(&mut self, entry: GlossaryEntry) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[GlossaryEntry] {
        &self.entries
    }

    pub fn entries_mut(&mut self) -> impl Iterator<Item = &mut GlossaryEntry> {
        self.entries.iter_mut()
    }

    /// The first `k` entries in insertion order.
    pub fn prefix(&self, k: usize) -> &[GlossaryEntry] {
        &self.entries[..k.min(self.entries.len())]
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn into_entries(self) -> Vec<GlossaryEntry> {
        self.entries
    }
}

// ---------------------------------------------------------------------------
// Pass reports
// ---------------------------------------------------------------------------

/// Counters for one sequential traversal.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PassReport {
    pub pass: u32,
    pub mode: Option<ContextMode>,
    pub summarizer_calls: usize,
    /// Direct section/synthesis failures that left a placeholder.
    pub failures: usize,
    /// Ancestor revisions that failed; the previous version was kept.
    pub update_failures: usize,
    pub ancestor_updates: usize,
    pub deferred_syntheses: usize,
    /// Content-less ancestors whose update was postponed at least once.
    pub deferred_dirty: usize,
    /// Sections whose summary text differs from the previous pass.
    pub revised_sections: usize,
    pub degraded_count: usize,
}

// ---------------------------------------------------------------------------
// CognitiveKnowledge
// ---------------------------------------------------------------------------

/// Nested navigation entry mirroring the section tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutlineEntry {
    pub id: SectionId,
    pub title: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub summary: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<OutlineEntry>,
}

/// Aggregate counts over the final table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeStats {
    pub section_count: usize,
    /// Mean summary length in characters.
    pub mean_summary_length: f64,
    pub concept_count: usize,
    pub max_depth: u32,
    pub passes: u32,
    pub degraded_count: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub degraded_section_ids: Vec<SectionId>,
}

/// The final artifact handed to downstream dataset builders.
///
/// Field order is part of the schema; bump [`CURRENT_SCHEMA_VERSION`]
/// on any incompatible change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CognitiveKnowledge {
    pub schema_version: u32,
    pub document_title: String,
    pub document_summary: String,
    pub summaries: SummaryTable,
    pub glossary: Vec<GlossaryEntry>,
    /// Section ids grouped by depth, each group in document order.
    pub depth_index: BTreeMap<u32, Vec<SectionId>>,
    /// Parent id → ordered child ids.
    pub hierarchy: BTreeMap<SectionId, Vec<SectionId>>,
    pub outline: OutlineEntry,
    pub passes: Vec<PassReport>,
    pub stats: KnowledgeStats,
}

// ---------------------------------------------------------------------------
// RunManifest
// ---------------------------------------------------------------------------

/// Checksum record for one written artifact file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactMeta {
    pub filename: String,
    pub sha256: String,
    pub size_bytes: usize,
}

/// The `manifest.json` stored next to each run's artifacts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunManifest {
    /// Schema version for forward compatibility.
    pub schema_version: u32,
    pub run_id: RunId,
    /// Input document path or label.
    pub source: String,
    pub document_title: String,
    /// Tool version that produced the run.
    pub tool_version: String,
    /// Summarizer name/model.
    pub model: String,
    pub passes: u32,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub section_count: usize,
    pub degraded_count: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<ArtifactMeta>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_id_roundtrip() {
        let id = RunId::new();
        let s = id.to_string();
        let parsed: RunId = s.parse().expect("parse RunId");
        assert_eq!(id, parsed);
    }

    #[test]
    fn table_replaces_instead_of_appending() {
        let mut table = SummaryTable::new();
        table.insert(Summary::new("a".into(), "first".into(), vec![], 1));
        let old = table.insert(Summary::new("a".into(), "second".into(), vec![], 2));
        assert_eq!(old.map(|s| s.summary_text), Some("first".to_string()));
        assert_eq!(table.len(), 1);
        assert_eq!(table.get("a").unwrap().summary_text, "second");
    }

    #[test]
    fn placeholder_is_degraded_and_empty() {
        let mut table = SummaryTable::new();
        table.insert(Summary::placeholder("x".into(), 1));
        table.insert(Summary::new("y".into(), "ok".into(), vec![], 1));
        let s = table.get("x").unwrap();
        assert!(s.is_empty());
        assert!(s.degraded);
        assert_eq!(table.degraded_ids(), vec![SectionId::from("x")]);
    }

    #[test]
    fn degraded_flag_omitted_when_false() {
        let s = Summary::new("a".into(), "text".into(), vec!["Term".into()], 1);
        let json = serde_json::to_string(&s).unwrap();
        assert!(!json.contains("degraded"));
        let back: Summary = serde_json::from_str(&json).unwrap();
        assert_eq!(back, s);
    }

    #[test]
    fn glossary_prefix_is_bounded() {
        let mut glossary = Glossary::new();
        for i in 0..3 {
            glossary.push(GlossaryEntry {
                concept_id: format!("c{i}"),
                term: format!("C{i}"),
                definition_text: String::new(),
                first_section_id: "root".into(),
                related_section_ids: BTreeSet::new(),
            });
        }
        assert_eq!(glossary.prefix(2).len(), 2);
        assert_eq!(glossary.prefix(10).len(), 3);
        assert_eq!(glossary.prefix(2)[1].concept_id, "c1");
        assert!(glossary.get("c2").is_some());
    }

    #[test]
    fn context_mode_serializes_snake_case() {
        let json = serde_json::to_string(&ContextMode::Enriched).unwrap();
        assert_eq!(json, "\"enriched\"");
    }
}

//! Final knowledge synthesis.
//!
//! Pure and deterministic: no summarizer calls, no clock, no randomness.

use std::collections::BTreeMap;

use tracing::{info, instrument};

use cogreader_shared::{
    CURRENT_SCHEMA_VERSION, CognitiveKnowledge, Glossary, KnowledgeStats, PassReport, SectionId,
    SectionTree, SummaryTable,
};

use crate::outline;

/// Derive the [`CognitiveKnowledge`] artifact from the final table.
#[instrument(skip_all, fields(sections = tree.len(), concepts = glossary.len()))]
pub fn synthesize(
    tree: &SectionTree,
    table: SummaryTable,
    glossary: Glossary,
    passes: Vec<PassReport>,
) -> CognitiveKnowledge {
    let mut depth_index: BTreeMap<u32, Vec<SectionId>> = BTreeMap::new();
    let mut hierarchy: BTreeMap<SectionId, Vec<SectionId>> = BTreeMap::new();
    for section in tree.document_order() {
        depth_index
            .entry(section.depth)
            .or_default()
            .push(section.id.clone());
        if section.has_children() {
            hierarchy.insert(section.id.clone(), section.ordered_child_ids.clone());
        }
    }

    let document_summary = table
        .get(tree.root().id.as_str())
        .map(|s| s.summary_text.clone())
        .unwrap_or_default();

    let mean_summary_length = if table.is_empty() {
        0.0
    } else {
        table
            .iter()
            .map(|s| s.summary_text.chars().count())
            .sum::<usize>() as f64
            / table.len() as f64
    };

    // Document order, not id order.
    let degraded_section_ids: Vec<SectionId> = tree
        .document_order()
        .filter(|s| table.get(s.id.as_str()).is_some_and(|sum| sum.degraded))
        .map(|s| s.id.clone())
        .collect();

    let stats = KnowledgeStats {
        section_count: tree.len(),
        mean_summary_length,
        concept_count: glossary.len(),
        max_depth: tree.max_depth(),
        passes: passes.len() as u32,
        degraded_count: degraded_section_ids.len(),
        degraded_section_ids,
    };

    info!(
        degraded = stats.degraded_count,
        mean_len = format!("{:.1}", stats.mean_summary_length),
        "knowledge synthesized"
    );

    CognitiveKnowledge {
        schema_version: CURRENT_SCHEMA_VERSION,
        document_title: tree.title().to_string(),
        document_summary,
        outline: outline::build_outline(tree, &table),
        summaries: table,
        glossary: glossary.into_entries(),
        depth_index,
        hierarchy,
        passes,
        stats,
    }
}

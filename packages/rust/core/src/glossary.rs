//! Concept glossary accumulation.
//!
//! After each pass the key concepts of every summary are merged into the
//! run's [`Glossary`]. Entries are created in document order, related
//! section sets only grow, and definitions follow the most recent writer.

use std::collections::BTreeSet;

use async_trait::async_trait;
use tracing::{debug, instrument, warn};

use cogreader_shared::{Glossary, GlossaryEntry, Result, SectionTree, Summary, SummaryTable};

/// Refines a concept's definition from the summaries that mention it.
#[async_trait]
pub trait DefinitionGenerator: Send + Sync {
    async fn define(&self, term: &str, related: &[&Summary]) -> Result<String>;
}

/// Lowercase, single-spaced key for a concept.
pub fn normalize_concept(term: &str) -> String {
    term.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Merge one pass's key concepts into `glossary`.
///
/// Returns the number of new entries.
pub fn merge_pass(glossary: &mut Glossary, tree: &SectionTree, table: &SummaryTable) -> usize {
    let mut added = 0;

    for section in tree.document_order() {
        let Some(summary) = table.get(section.id.as_str()) else {
            continue;
        };

        for term in &summary.key_concepts {
            let concept_id = normalize_concept(term);
            if concept_id.is_empty() {
                continue;
            }
            let definition = heuristic_definition(term, &summary.summary_text);

            match glossary.get_mut(&concept_id) {
                Some(entry) => {
                    entry.related_section_ids.insert(section.id.clone());
                    let first_seq = tree
                        .get(entry.first_section_id.as_str())
                        .map(|s| s.sequence_index)
                        .unwrap_or(u32::MAX);
                    if section.sequence_index < first_seq {
                        entry.first_section_id = section.id.clone();
                    }
                    if !definition.is_empty() {
                        entry.definition_text = definition;
                    }
                }
                None => {
                    glossary.push(GlossaryEntry {
                        concept_id,
                        term: term.trim().to_string(),
                        definition_text: definition,
                        first_section_id: section.id.clone(),
                        related_section_ids: BTreeSet::from([section.id.clone()]),
                    });
                    added += 1;
                }
            }
        }
    }

    debug!(added, total = glossary.len(), "glossary merged");
    added
}

/// The summary sentence that mentions `term`, else the first sentence.
fn heuristic_definition(term: &str, summary_text: &str) -> String {
    let needle = term.to_lowercase();
    let sentences: Vec<&str> = summary_text
        .split_inclusive(['.', '!', '?'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();

    sentences
        .iter()
        .find(|s| s.to_lowercase().contains(&needle))
        .or_else(|| sentences.first())
        .map(|s| s.to_string())
        .unwrap_or_default()
}

/// Ask `generator` for a refined definition of every concept.
///
/// Failures keep the heuristic definition. Returns how many entries were refined.
#[instrument(skip_all, fields(concepts = glossary.len()))]
pub async fn refine_definitions(
    glossary: &mut Glossary,
    table: &SummaryTable,
    generator: &dyn DefinitionGenerator,
) -> usize {
    let mut refined = 0;

    for entry in glossary.entries_mut() {
        let related: Vec<&Summary> = entry
            .related_section_ids
            .iter()
            .filter_map(|id| table.get(id.as_str()))
            .filter(|s| !s.is_empty())
            .collect();
        if related.is_empty() {
            continue;
        }

        match generator.define(&entry.term, &related).await {
            Ok(definition) => {
                entry.definition_text = definition;
                refined += 1;
            }
            Err(e) => {
                warn!(concept = %entry.concept_id, error = %e, "definition refinement failed");
            }
        }
    }

    refined
}

#[cfg(test)]
mod tests {
    use super::*;
    use cogreader_shared::{ReaderError, Section, SectionId};

    fn section(id: &str, depth: u32, parent: Option<&str>, children: &[&str], seq: u32) -> Section {
        Section {
            id: id.into(),
            title: id.into(),
            text: "text".into(),
            depth,
            parent_id: parent.map(SectionId::from),
            ordered_child_ids: children.iter().map(|c| SectionId::from(*c)).collect(),
            sequence_index: seq,
        }
    }

    fn tree() -> SectionTree {
        SectionTree::new(
            "Doc",
            vec![
                section("root", 0, None, &["a", "b"], 0),
                section("a", 1, Some("root"), &[], 1),
                section("b", 1, Some("root"), &[], 2),
            ],
        )
        .unwrap()
    }

    fn summary(id: &str, text: &str, concepts: &[&str]) -> Summary {
        Summary::new(id.into(), text.into(), concepts.iter().map(|c| c.to_string()).collect(), 1)
    }

    #[test]
    fn normalizes_concepts() {
        assert_eq!(normalize_concept("  Borrow   Checker "), "borrow checker");
    }

    #[test]
    fn first_section_is_earliest_and_related_grows() {
        let tree = tree();
        let mut glossary = Glossary::new();

        let mut pass1 = SummaryTable::new();
        pass1.insert(summary("b", "B talks about Traits. More.", &["Traits"]));
        assert_eq!(merge_pass(&mut glossary, &tree, &pass1), 1);
        assert_eq!(glossary.get("traits").unwrap().first_section_id.as_str(), "b");

        let mut pass2 = SummaryTable::new();
        pass2.insert(summary("a", "A introduces traits early.", &["traits"]));
        assert_eq!(merge_pass(&mut glossary, &tree, &pass2), 0);

        let entry = glossary.get("traits").unwrap();
        assert_eq!(entry.first_section_id.as_str(), "a");
        assert_eq!(entry.term, "Traits");
        let related: Vec<&str> = entry.related_section_ids.iter().map(|s| s.as_str()).collect();
        assert_eq!(related, vec!["a", "b"]);
        assert_eq!(entry.definition_text, "A introduces traits early.");
    }

    #[test]
    fn insertion_follows_document_order() {
        let tree = tree();
        let mut glossary = Glossary::new();
        let mut table = SummaryTable::new();
        table.insert(summary("b", "Zeta.", &["Zeta"]));
        table.insert(summary("root", "Alpha and Omega.", &["Omega", "Alpha"]));
        merge_pass(&mut glossary, &tree, &table);

        let ids: Vec<&str> = glossary.entries().iter().map(|e| e.concept_id.as_str()).collect();
        assert_eq!(ids, vec!["omega", "alpha", "zeta"]);
    }

    #[test]
    fn heuristic_definition_prefers_mentioning_sentence() {
        assert_eq!(
            heuristic_definition("Cargo", "Setup is easy. Cargo builds crates."),
            "Cargo builds crates."
        );
        assert_eq!(heuristic_definition("Nope", "First. Second."), "First.");
        assert_eq!(heuristic_definition("x", ""), "");
    }

    struct Scripted;

    #[async_trait]
    impl DefinitionGenerator for Scripted {
        async fn define(&self, term: &str, _related: &[&Summary]) -> Result<String> {
            if term == "Bad" {
                Err(ReaderError::Summarization("nope".into()))
            } else {
                Ok(format!("{term} refined"))
            }
        }
    }

    #[tokio::test]
    async fn refinement_errors_keep_heuristic_definition() {
        let tree = tree();
        let mut glossary = Glossary::new();
        let mut table = SummaryTable::new();
        table.insert(summary("a", "Good and Bad things.", &["Good", "Bad"]));
        merge_pass(&mut glossary, &tree, &table);

        let refined = refine_definitions(&mut glossary, &table, &Scripted).await;
        assert_eq!(refined, 1);
        assert_eq!(glossary.get("good").unwrap().definition_text, "Good refined");
        assert_eq!(glossary.get("bad").unwrap().definition_text, "Good and Bad things.");
    }
}

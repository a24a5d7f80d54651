//! Context window construction.
//!
//! A [`ContextBuilder`] turns the current state of a pass (the in-progress
//! summary table, and in enriched mode the previous pass's table and the
//! glossary) into labeled blocks that accompany a section's own text.
//! Blocks only ever carry derived material: summaries and definitions,
//! never source text.

use serde::Serialize;

use cogreader_shared::{ContextMode, Glossary, Section, SectionId, SectionTree, SummaryTable};

/// What a context block was derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    Ancestor,
    PriorSibling,
    PriorPass,
    Glossary,
    /// Processed descendant of a section under revision.
    Descendant,
    /// Direct child of a content-less section under synthesis.
    Child,
}

/// A labeled piece of supporting material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContextBlock {
    pub kind: BlockKind,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section_id: Option<SectionId>,
    pub text: String,
}

impl ContextBlock {
    fn for_section(kind: BlockKind, label: String, section: &Section, text: &str) -> Self {
        Self {
            kind,
            label,
            section_id: Some(section.id.clone()),
            text: text.to_string(),
        }
    }
}

/// Builds context blocks over one immutable tree.
#[derive(Debug, Clone, Copy)]
pub struct ContextBuilder<'a> {
    tree: &'a SectionTree,
    max_ancestors: usize,
    glossary_limit: usize,
}

impl<'a> ContextBuilder<'a> {
    pub fn new(tree: &'a SectionTree, max_ancestors: usize, glossary_limit: usize) -> Self {
        Self {
            tree,
            max_ancestors,
            glossary_limit,
        }
    }

    /// Context for summarizing `section` directly.
    ///
    /// Cumulative blocks come first: ancestor summaries root-most first,
    /// then summaries of earlier siblings. Enriched mode appends the
    /// section's own summary from the previous pass and a glossary prefix,
    /// each when available. Anything without a non-empty summary is skipped.
    pub fn build_context(
        &self,
        section: &Section,
        table: &SummaryTable,
        mode: ContextMode,
        prior_pass: Option<&SummaryTable>,
        glossary: Option<&Glossary>,
    ) -> Vec<ContextBlock> {
        let mut blocks = self.ancestor_blocks(section, table);
        blocks.extend(self.sibling_blocks(section, table));

        if mode == ContextMode::Enriched {
            if let Some(previous) = prior_pass
                .and_then(|t| t.get(section.id.as_str()))
                .filter(|s| !s.is_empty())
            {
                blocks.push(ContextBlock::for_section(
                    BlockKind::PriorPass,
                    format!(
                        "Previous-pass summary of this section (pass {})",
                        previous.pass_number
                    ),
                    section,
                    &previous.summary_text,
                ));
            }

            if let Some(block) = glossary.and_then(|g| self.glossary_block(g)) {
                blocks.push(block);
            }
        }

        blocks
    }

    /// Summaries of the nearest `max_ancestors` ancestors, root-most first.
    pub fn ancestor_blocks(&self, section: &Section, table: &SummaryTable) -> Vec<ContextBlock> {
        let mut chain = self.tree.ancestors(section.id.as_str());
        chain.truncate(self.max_ancestors);

        chain
            .into_iter()
            .rev()
            .filter_map(|ancestor| {
                let summary = table.get(ancestor.id.as_str()).filter(|s| !s.is_empty())?;
                Some(ContextBlock::for_section(
                    BlockKind::Ancestor,
                    format!("Ancestor summary: {} (depth {})", ancestor.title, ancestor.depth),
                    ancestor,
                    &summary.summary_text,
                ))
            })
            .collect()
    }

    /// Summaries of siblings that precede `section`, in document order.
    fn sibling_blocks(&self, section: &Section, table: &SummaryTable) -> Vec<ContextBlock> {
        self.tree
            .prior_siblings(section.id.as_str())
            .into_iter()
            .filter_map(|sibling| {
                let summary = table.get(sibling.id.as_str()).filter(|s| !s.is_empty())?;
                Some(ContextBlock::for_section(
                    BlockKind::PriorSibling,
                    format!("Earlier sibling summary: {}", sibling.title),
                    sibling,
                    &summary.summary_text,
                ))
            })
            .collect()
    }

    /// Current summaries of every processed descendant, in document order.
    pub fn descendant_blocks(&self, section: &Section, table: &SummaryTable) -> Vec<ContextBlock> {
        self.tree
            .descendants(section.id.as_str())
            .into_iter()
            .filter_map(|d| {
                let summary = table.get(d.id.as_str()).filter(|s| !s.is_empty())?;
                Some(ContextBlock::for_section(
                    BlockKind::Descendant,
                    format!(
                        "Subsection summary: {}",
                        self.tree.breadcrumb(d.id.as_str()).join(" > ")
                    ),
                    d,
                    &summary.summary_text,
                ))
            })
            .collect()
    }

    /// Summaries of direct children, in document order.
    pub fn child_blocks(&self, section: &Section, table: &SummaryTable) -> Vec<ContextBlock> {
        self.tree
            .children(section.id.as_str())
            .into_iter()
            .filter_map(|child| {
                let summary = table.get(child.id.as_str()).filter(|s| !s.is_empty())?;
                Some(ContextBlock::for_section(
                    BlockKind::Child,
                    format!("Child section summary: {}", child.title),
                    child,
                    &summary.summary_text,
                ))
            })
            .collect()
    }

    fn glossary_block(&self, glossary: &Glossary) -> Option<ContextBlock> {
        let entries = glossary.prefix(self.glossary_limit);
        if entries.is_empty() {
            return None;
        }

        let text = entries
            .iter()
            .map(|e| {
                if e.definition_text.is_empty() {
                    format!("- {}", e.term)
                } else {
                    format!("- {}: {}", e.term, e.definition_text)
                }
            })
            .collect::<Vec<_>>()
            .join("\n");

        Some(ContextBlock {
            kind: BlockKind::Glossary,
            label: format!("Glossary (first {} concepts)", entries.len()),
            section_id: None,
            text,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cogreader_shared::{GlossaryEntry, Summary};
    use std::collections::BTreeSet;

    fn section(
        id: &str,
        text: &str,
        depth: u32,
        parent: Option<&str>,
        children: &[&str],
        seq: u32,
    ) -> Section {
        Section {
            id: id.into(),
            title: id.to_uppercase(),
            text: text.into(),
            depth,
            parent_id: parent.map(SectionId::from),
            ordered_child_ids: children.iter().map(|c| SectionId::from(*c)).collect(),
            sequence_index: seq,
        }
    }

    /// root → a → (a1, a2), root → b
    fn tree() -> SectionTree {
        SectionTree::new(
            "Doc",
            vec![
                section("root", "Root text.", 0, None, &["a", "b"], 0),
                section("a", "A text.", 1, Some("root"), &["a1", "a2"], 1),
                section("a1", "A1 text.", 2, Some("a"), &[], 2),
                section("a2", "A2 text.", 2, Some("a"), &[], 3),
                section("b", "B text.", 1, Some("root"), &[], 4),
            ],
        )
        .unwrap()
    }

    fn summary(id: &str, text: &str, pass: u32) -> Summary {
        Summary::new(id.into(), text.into(), vec![], pass)
    }

    #[test]
    fn cumulative_orders_ancestors_then_siblings() {
        let tree = tree();
        let mut table = SummaryTable::new();
        table.insert(summary("root", "root sum", 1));
        table.insert(summary("a", "a sum", 1));
        table.insert(summary("a1", "a1 sum", 1));

        let builder = ContextBuilder::new(&tree, 8, 10);
        let blocks = builder.build_context(
            tree.get("a2").unwrap(),
            &table,
            ContextMode::Cumulative,
            None,
            None,
        );

        let kinds: Vec<BlockKind> = blocks.iter().map(|b| b.kind).collect();
        assert_eq!(kinds, vec![BlockKind::Ancestor, BlockKind::Ancestor, BlockKind::PriorSibling]);
        assert_eq!(blocks[0].text, "root sum");
        assert_eq!(blocks[1].text, "a sum");
        assert_eq!(blocks[2].text, "a1 sum");
    }

    #[test]
    fn missing_and_empty_summaries_are_omitted() {
        let tree = tree();
        let mut table = SummaryTable::new();
        table.insert(Summary::placeholder("root".into(), 1));

        let builder = ContextBuilder::new(&tree, 8, 10);
        let blocks = builder.build_context(
            tree.get("a1").unwrap(),
            &table,
            ContextMode::Cumulative,
            None,
            None,
        );
        assert!(blocks.is_empty());

        let root_blocks =
            builder.build_context(tree.root(), &table, ContextMode::Cumulative, None, None);
        assert!(root_blocks.is_empty());
    }

    #[test]
    fn ancestor_truncation_keeps_nearest() {
        let tree = tree();
        let mut table = SummaryTable::new();
        table.insert(summary("root", "root sum", 1));
        table.insert(summary("a", "a sum", 1));

        let builder = ContextBuilder::new(&tree, 1, 10);
        let blocks = builder.ancestor_blocks(tree.get("a1").unwrap(), &table);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].section_id.as_ref().unwrap().as_str(), "a");
    }

    #[test]
    fn enriched_adds_prior_pass_and_glossary() {
        let tree = tree();
        let table = SummaryTable::new();
        let mut prior = SummaryTable::new();
        prior.insert(summary("b", "b from pass one", 1));

        let mut glossary = Glossary::new();
        for (i, term) in ["Alpha", "Beta", "Gamma"].iter().enumerate() {
            glossary.push(GlossaryEntry {
                concept_id: term.to_lowercase(),
                term: term.to_string(),
                definition_text: if i == 0 { "first letter".into() } else { String::new() },
                first_section_id: "a".into(),
                related_section_ids: BTreeSet::from([SectionId::from("a")]),
            });
        }

        let builder = ContextBuilder::new(&tree, 8, 2);
        let b = tree.get("b").unwrap();
        let blocks =
            builder.build_context(b, &table, ContextMode::Enriched, Some(&prior), Some(&glossary));

        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].kind, BlockKind::PriorPass);
        assert_eq!(blocks[0].text, "b from pass one");
        assert_eq!(blocks[1].kind, BlockKind::Glossary);
        assert_eq!(blocks[1].text, "- Alpha: first letter\n- Beta");

        // Cumulative mode ignores enrichment inputs.
        let plain = builder.build_context(
            b,
            &table,
            ContextMode::Cumulative,
            Some(&prior),
            Some(&glossary),
        );
        assert!(plain.is_empty());
    }

    #[test]
    fn descendant_and_child_blocks() {
        let tree = tree();
        let mut table = SummaryTable::new();
        table.insert(summary("a", "a sum", 1));
        table.insert(summary("a1", "a1 sum", 1));
        table.insert(summary("b", "b sum", 1));

        let builder = ContextBuilder::new(&tree, 8, 10);
        let desc = builder.descendant_blocks(tree.root(), &table);
        let ids: Vec<&str> = desc.iter().map(|b| b.section_id.as_ref().unwrap().as_str()).collect();
        assert_eq!(ids, vec!["a", "a1", "b"]);
        assert!(desc[1].label.contains("ROOT > A > A1"));

        let children = builder.child_blocks(tree.get("a").unwrap(), &table);
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].kind, BlockKind::Child);
    }
}

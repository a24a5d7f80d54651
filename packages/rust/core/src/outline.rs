//! Outline builder.
//!
//! Mirrors the section tree as nested [`OutlineEntry`] values carrying each
//! section's final summary, for navigation in `knowledge.json`.

use tracing::{debug, instrument};

use cogreader_shared::{OutlineEntry, Section, SectionTree, SummaryTable};

/// Build the outline rooted at the document root.
#[instrument(skip_all, fields(sections = tree.len()))]
pub fn build_outline(tree: &SectionTree, table: &SummaryTable) -> OutlineEntry {
    let outline = entry_for(tree, table, tree.root());
    debug!(entries = count_entries(&outline), "outline built");
    outline
}

fn entry_for(tree: &SectionTree, table: &SummaryTable, section: &Section) -> OutlineEntry {
    OutlineEntry {
        id: section.id.clone(),
        title: section.title.clone(),
        summary: table
            .get(section.id.as_str())
            .map(|s| s.summary_text.clone())
            .unwrap_or_default(),
        children: tree
            .children(section.id.as_str())
            .into_iter()
            .map(|child| entry_for(tree, table, child))
            .collect(),
    }
}

/// Total entries including `entry` itself.
pub fn count_entries(entry: &OutlineEntry) -> usize {
    1 + entry.children.iter().map(count_entries).sum::<usize>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use cogreader_shared::{SectionId, Summary};

    fn section(id: &str, depth: u32, parent: Option<&str>, children: &[&str], seq: u32) -> Section {
        Section {
            id: id.into(),
            title: format!("Title {id}"),
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
                section("root", 0, None, &["b", "a"], 0),
                section("b", 1, Some("root"), &["b1"], 1),
                section("b1", 2, Some("b"), &[], 2),
                section("a", 1, Some("root"), &[], 3),
            ],
        )
        .unwrap()
    }

    #[test]
    fn outline_keeps_document_order_not_alphabetical() {
        let tree = tree();
        let mut table = SummaryTable::new();
        table.insert(Summary::new("b1".into(), "Deep.".into(), vec![], 1));

        let outline = build_outline(&tree, &table);
        assert_eq!(outline.id.as_str(), "root");
        let ids: Vec<&str> = outline.children.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
        assert_eq!(outline.children[0].children[0].summary, "Deep.");
        assert_eq!(count_entries(&outline), 4);
    }
}

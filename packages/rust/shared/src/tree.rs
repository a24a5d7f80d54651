//! The immutable section tree every reading pass walks.
//!
//! A [`SectionTree`] is produced once by a parser and never mutated
//! afterwards. Construction sorts sections into document order and runs
//! [`SectionTree::validate`], so every tree in circulation satisfies the
//! structural invariants (single root, consistent links, pre-order
//! `sequence_index`).

use std::borrow::Borrow;
use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::{ReaderError, Result};

// ---------------------------------------------------------------------------
// SectionId
// ---------------------------------------------------------------------------

/// Stable identifier of a section, unique within one tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SectionId(pub String);

impl SectionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for SectionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl Borrow<str> for SectionId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

// ---------------------------------------------------------------------------
// Section
// ---------------------------------------------------------------------------

/// How a section participates in a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionKind {
    /// Own text, no children.
    Leaf,
    /// Own text and children; summarized directly, then revised as children land.
    ContentBearingParent,
    /// Children but no own text; synthesized after all children are summarized.
    ContentlessParent,
}

/// A node of the document hierarchy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub id: SectionId,
    pub title: String,
    /// Own content; may be empty.
    #[serde(default)]
    pub text: String,
    /// Root is depth 0.
    pub depth: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<SectionId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ordered_child_ids: Vec<SectionId>,
    /// Global pre-order position, assigned once by the parser.
    pub sequence_index: u32,
}

impl Section {
    /// Whether the section carries any non-whitespace text of its own.
    pub fn has_text(&self) -> bool {
        !self.text.trim().is_empty()
    }

    pub fn has_children(&self) -> bool {
        !self.ordered_child_ids.is_empty()
    }

    pub fn kind(&self) -> SectionKind {
        match (self.has_text(), self.has_children()) {
            (false, true) => SectionKind::ContentlessParent,
            (true, true) => SectionKind::ContentBearingParent,
            _ => SectionKind::Leaf,
        }
    }
}

// ---------------------------------------------------------------------------
// SectionTree
// ---------------------------------------------------------------------------

/// Serialized shape of a tree: `{"title": .., "sections": [..]}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct TreeRepr {
    title: String,
    sections: Vec<Section>,
}

/// A validated, read-only section tree in document order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "TreeRepr", into = "TreeRepr")]
pub struct SectionTree {
    title: String,
    /// Sorted by `sequence_index`.
    sections: Vec<Section>,
    index: HashMap<SectionId, usize>,
}

impl TryFrom<TreeRepr> for SectionTree {
    type Error = ReaderError;

    fn try_from(repr: TreeRepr) -> Result<Self> {
        Self::new(repr.title, repr.sections)
    }
}

impl From<SectionTree> for TreeRepr {
    fn from(tree: SectionTree) -> Self {
        Self {
            title: tree.title,
            sections: tree.sections,
        }
    }
}

impl SectionTree {
    /// Build a tree, sort it into document order and validate it.
    pub fn new(title: impl Into<String>, mut sections: Vec<Section>) -> Result<Self> {
        sections.sort_by_key(|s| s.sequence_index);

        let mut index = HashMap::with_capacity(sections.len());
        for (i, section) in sections.iter().enumerate() {
            if index.insert(section.id.clone(), i).is_some() {
                return Err(ReaderError::structure(format!(
                    "duplicate section id '{}'",
                    section.id
                )));
            }
        }

        let tree = Self {
            title: title.into(),
            sections,
            index,
        };
        tree.validate()?;
        Ok(tree)
    }

    /// Parse a JSON-serialized tree.
    pub fn from_json(json: &str) -> Result<Self> {
        let repr: TreeRepr = serde_json::from_str(json)
            .map_err(|e| ReaderError::parse(format!("invalid section tree JSON: {e}")))?;
        Self::new(repr.title, repr.sections)
    }

    /// Check every structural invariant.
    ///
    /// Fails on: empty tree, zero or several roots, dangling or asymmetric
    /// parent/child links, wrong depths, nodes unreachable from the root
    /// (cycles), and `sequence_index` values that are not strictly
    /// increasing in pre-order.
    pub fn validate(&self) -> Result<()> {
        if self.sections.is_empty() {
            return Err(ReaderError::structure("section tree is empty"));
        }

        let roots: Vec<&Section> = self
            .sections
            .iter()
            .filter(|s| s.parent_id.is_none())
            .collect();
        let root = match roots.as_slice() {
            [root] => *root,
            [] => return Err(ReaderError::structure("section tree has no root")),
            many => {
                return Err(ReaderError::structure(format!(
                    "section tree has {} roots",
                    many.len()
                )));
            }
        };
        if root.depth != 0 {
            return Err(ReaderError::structure(format!(
                "root '{}' has depth {} (expected 0)",
                root.id, root.depth
            )));
        }

        for section in &self.sections {
            if let Some(parent_id) = &section.parent_id {
                let parent = self.get(parent_id.as_str()).ok_or_else(|| {
                    ReaderError::structure(format!(
                        "section '{}' references missing parent '{parent_id}'",
                        section.id
                    ))
                })?;
                if !parent.ordered_child_ids.contains(&section.id) {
                    return Err(ReaderError::structure(format!(
                        "section '{}' is not listed among the children of '{parent_id}'",
                        section.id
                    )));
                }
                if section.depth != parent.depth + 1 {
                    return Err(ReaderError::structure(format!(
                        "section '{}' has depth {} under parent of depth {}",
                        section.id, section.depth, parent.depth
                    )));
                }
            }

            let mut seen = HashSet::new();
            for child_id in &section.ordered_child_ids {
                if !seen.insert(child_id) {
                    return Err(ReaderError::structure(format!(
                        "section '{}' lists child '{child_id}' twice",
                        section.id
                    )));
                }
                let child = self.get(child_id.as_str()).ok_or_else(|| {
                    ReaderError::structure(format!(
                        "section '{}' references missing child '{child_id}'",
                        section.id
                    ))
                })?;
                if child.parent_id.as_ref() != Some(&section.id) {
                    return Err(ReaderError::structure(format!(
                        "child '{child_id}' does not point back to parent '{}'",
                        section.id
                    )));
                }
            }
        }

        // Pre-order walk from the root: reaches everything exactly once and
        // sees strictly increasing sequence indices.
        let mut visited = 0usize;
        let mut last: Option<u32> = None;
        let mut stack = vec![root];
        while let Some(section) = stack.pop() {
            visited += 1;
            if visited > self.sections.len() {
                return Err(ReaderError::structure("cycle detected in section tree"));
            }
            if let Some(prev) = last {
                if section.sequence_index <= prev {
                    return Err(ReaderError::structure(format!(
                        "section '{}' has sequence_index {} out of document order (previous {prev})",
                        section.id, section.sequence_index
                    )));
                }
            }
            last = Some(section.sequence_index);
            for child_id in section.ordered_child_ids.iter().rev() {
                if let Some(child) = self.get(child_id.as_str()) {
                    stack.push(child);
                }
            }
        }
        if visited != self.sections.len() {
            return Err(ReaderError::structure(format!(
                "{} section(s) unreachable from root (cycle or detached subtree)",
                self.sections.len() - visited
            )));
        }

        Ok(())
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    /// Replace the document title.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn len(&self) -> usize {
        self.sections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    /// The single root section. Validation guarantees it exists and,
    /// being first in pre-order, it sorts first.
    pub fn root(&self) -> &Section {
        &self.sections[0]
    }

    pub fn get(&self, id: &str) -> Option<&Section> {
        self.index.get(id).map(|&i| &self.sections[i])
    }

    /// All sections in ascending `sequence_index` order.
    pub fn document_order(&self) -> impl Iterator<Item = &Section> {
        self.sections.iter()
    }

    pub fn parent(&self, id: &str) -> Option<&Section> {
        self.get(id)
            .and_then(|s| s.parent_id.as_ref())
            .and_then(|p| self.get(p.as_str()))
    }

    /// Ancestors from the immediate parent up to the root.
    pub fn ancestors(&self, id: &str) -> Vec<&Section> {
        let mut chain = Vec::new();
        let mut current = self.parent(id);
        while let Some(section) = current {
            chain.push(section);
            current = self.parent(section.id.as_str());
        }
        chain
    }

    /// Direct children in document order.
    pub fn children(&self, id: &str) -> Vec<&Section> {
        self.get(id)
            .map(|s| {
                s.ordered_child_ids
                    .iter()
                    .filter_map(|c| self.get(c.as_str()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Siblings that precede `id` in document order.
    pub fn prior_siblings(&self, id: &str) -> Vec<&Section> {
        let Some(section) = self.get(id) else {
            return Vec::new();
        };
        let Some(parent) = self.parent(id) else {
            return Vec::new();
        };
        parent
            .ordered_child_ids
            .iter()
            .filter_map(|c| self.get(c.as_str()))
            .filter(|s| s.sequence_index < section.sequence_index)
            .collect()
    }

    /// All descendants of `id` in document order.
    pub fn descendants(&self, id: &str) -> Vec<&Section> {
        let mut out = Vec::new();
        let mut stack: Vec<&Section> = self.children(id).into_iter().rev().collect();
        while let Some(section) = stack.pop() {
            out.push(section);
            for child in self.children(section.id.as_str()).into_iter().rev() {
                stack.push(child);
            }
        }
        out
    }

    /// Titles from the root down to `id`, inclusive.
    pub fn breadcrumb(&self, id: &str) -> Vec<&str> {
        let mut titles: Vec<&str> = self
            .ancestors(id)
            .iter()
            .rev()
            .map(|s| s.title.as_str())
            .collect();
        if let Some(section) = self.get(id) {
            titles.push(section.title.as_str());
        }
        titles
    }

    /// Largest depth present in the tree.
    pub fn max_depth(&self) -> u32 {
        self.sections.iter().map(|s| s.depth).max().unwrap_or(0)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

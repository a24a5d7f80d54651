//! Document → section tree parsing.
//!
//! Turns a Markdown document into a validated [`SectionTree`]: ATX headings
//! open sections, nesting follows heading levels, and text before the first
//! heading belongs to a synthetic document root. JSON input is accepted
//! verbatim as a serialized tree.

mod cleanup;

use std::collections::HashSet;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, instrument};

use cogreader_shared::{ReaderError, Result, Section, SectionId, SectionTree};

/// Id given to the synthetic document root.
pub const ROOT_ID: &str = "root";

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Options for Markdown parsing.
#[derive(Debug, Clone, Default)]
pub struct ParseOptions {
    /// Overrides every other title source.
    pub title: Option<String>,
    /// Used when neither front matter nor a lone H1 provides a title.
    pub fallback_title: String,
}

// ---------------------------------------------------------------------------
// Regex patterns (compiled once)
// ---------------------------------------------------------------------------

/// Matches an ATX heading, capturing the hashes and the text without closing hashes.
static HEADING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(#{1,6})\s+(.+?)(?:\s+#+)?\s*$").expect("heading regex")
});

/// Matches `title: "Value"` inside front matter.
static FM_TITLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^title:\s*["']?(.*?)["']?\s*$"#).expect("front matter title regex")
});

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Load a section tree from disk.
///
/// `.json` files are read as a serialized tree; anything else is parsed as
/// Markdown with the file stem as fallback title. `title` overrides the
/// document title in both cases.
#[instrument(skip_all, fields(path = %path.display()))]
pub fn load_tree(path: &Path, title: Option<&str>) -> Result<SectionTree> {
    let content = std::fs::read_to_string(path).map_err(|e| ReaderError::io(path, e))?;

    let is_json = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"));

    if is_json {
        let tree = SectionTree::from_json(&content)?;
        return Ok(match title {
            Some(title) => tree.with_title(title),
            None => tree,
        });
    }

    let fallback_title = path
        .file_stem()
        .map(|s| s.to_string_lossy().replace(['-', '_'], " "))
        .unwrap_or_else(|| "Untitled".to_string());

    parse_markdown(
        &content,
        &ParseOptions {
            title: title.map(String::from),
            fallback_title,
        },
    )
}

/// Parse a Markdown document into a validated section tree.
#[instrument(skip(md), fields(len = md.len()))]
pub fn parse_markdown(md: &str, opts: &ParseOptions) -> Result<SectionTree> {
    let (front_title, body) = split_front_matter(md);
    let (preamble, mut headings) = scan_headings(body);

    // A document that opens with its only H1 is titled by it; the H1's
    // body merges into the root and its subsections move up a level.
    let mut root_text = preamble;
    let mut h1_title = None;
    let h1_count = headings.iter().filter(|h| h.level == 1).count();
    if h1_count == 1 && headings.first().is_some_and(|h| h.level == 1) && root_text.trim().is_empty() {
        let h1 = headings.remove(0);
        h1_title = Some(h1.title);
        root_text = h1.body;
    }

    let title = opts
        .title
        .clone()
        .or(front_title)
        .or(h1_title)
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| {
            if opts.fallback_title.is_empty() {
                "Untitled".to_string()
            } else {
                opts.fallback_title.clone()
            }
        });

    let sections = build_sections(&title, &root_text, headings);
    debug!(sections = sections.len(), %title, "markdown parsed");

    SectionTree::new(title, sections)
}

// ---------------------------------------------------------------------------
// Scanning
// ---------------------------------------------------------------------------

/// A heading with the raw body lines that follow it.
#[derive(Debug)]
struct RawHeading {
    level: usize,
    title: String,
    body: String,
}

/// Strip a leading `---` front matter block, returning its `title:` if any.
fn split_front_matter(md: &str) -> (Option<String>, &str) {
    let Some(rest) = md.strip_prefix("---\n").or_else(|| md.strip_prefix("---\r\n")) else {
        return (None, md);
    };

    let mut offset = 0;
    let mut title = None;
    for line in rest.split_inclusive('\n') {
        offset += line.len();
        let trimmed = line.trim_end();
        if trimmed == "---" || trimmed == "..." {
            return (title, &rest[offset..]);
        }
        if let Some(caps) = FM_TITLE_RE.captures(trimmed) {
            title = Some(caps[1].to_string());
        }
    }

    // Unterminated block: treat it as ordinary content.
    (None, md)
}

/// Split the body into preamble text and headings, ignoring `#` lines inside code fences.
fn scan_headings(body: &str) -> (String, Vec<RawHeading>) {
    let mut preamble = Vec::new();
    let mut headings: Vec<RawHeading> = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut in_fence = false;

    for line in body.lines() {
        if cleanup::is_fence(line) {
            in_fence = !in_fence;
        } else if !in_fence {
            if let Some(caps) = HEADING_RE.captures(line) {
                flush_body(&mut headings, &mut preamble, &mut current);
                headings.push(RawHeading {
                    level: caps[1].len(),
                    title: caps[2].trim().to_string(),
                    body: String::new(),
                });
                continue;
            }
        }
        current.push(line);
    }
    flush_body(&mut headings, &mut preamble, &mut current);

    (preamble.join("\n"), headings)
}

fn flush_body<'a>(headings: &mut [RawHeading], preamble: &mut Vec<&'a str>, current: &mut Vec<&'a str>) {
    match headings.last_mut() {
        Some(h) => h.body = current.join("\n"),
        None => preamble.append(current),
    }
    current.clear();
}

// ---------------------------------------------------------------------------
// Tree construction
// ---------------------------------------------------------------------------

/// Nest headings by level under a synthetic root, assigning ids and
/// pre-order sequence indices.
fn build_sections(title: &str, root_text: &str, headings: Vec<RawHeading>) -> Vec<Section> {
    let mut sections = vec![Section {
        id: SectionId::from(ROOT_ID),
        title: title.to_string(),
        text: cleanup::run_pipeline(root_text),
        depth: 0,
        parent_id: None,
        ordered_child_ids: Vec::new(),
        sequence_index: 0,
    }];
    let mut used_ids: HashSet<String> = HashSet::from([ROOT_ID.to_string()]);
    // (heading level, index into `sections`)
    let mut stack: Vec<(usize, usize)> = vec![(0, 0)];

    for heading in headings {
        while stack.last().is_some_and(|&(level, _)| level >= heading.level) {
            stack.pop();
        }
        let parent_idx = stack.last().map(|&(_, idx)| idx).unwrap_or(0);

        let parent_path = if parent_idx == 0 {
            String::new()
        } else {
            format!("{}/", sections[parent_idx].id)
        };
        let id = unique_id(&format!("{parent_path}{}", slugify(&heading.title)), &mut used_ids);

        let idx = sections.len();
        let section = Section {
            id: SectionId::from(id),
            title: heading.title,
            text: cleanup::run_pipeline(&heading.body),
            depth: sections[parent_idx].depth + 1,
            parent_id: Some(sections[parent_idx].id.clone()),
            ordered_child_ids: Vec::new(),
            sequence_index: idx as u32,
        };
        sections[parent_idx].ordered_child_ids.push(section.id.clone());
        sections.push(section);
        stack.push((heading.level, idx));
    }

    sections
}

/// Reserve `base`, or `base-2`, `base-3`, ... if already taken.
fn unique_id(base: &str, used: &mut HashSet<String>) -> String {
    if used.insert(base.to_string()) {
        return base.to_string();
    }
    let mut n = 2;
    loop {
        let candidate = format!("{base}-{n}");
        if used.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}

/// Kebab-case slug of a heading title.
pub fn slugify(title: &str) -> String {
    let slug = title
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("-");

    if slug.is_empty() {
        "section".to_string()
    } else {
        slug
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

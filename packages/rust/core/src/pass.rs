//! One sequential reading pass.
//!
//! Sections are visited in ascending `sequence_index`. Leaves and
//! content-bearing sections are summarized on the spot and every ancestor
//! is then brought up to date, nearest first. Content-less sections wait
//! in a pending set and are synthesized after the main walk, deepest-last
//! sections first, once every content-less section below them is done.
//!
//! The pass owns its [`SummaryTable`] for its whole duration and returns it.

use std::collections::{BinaryHeap, HashMap, HashSet};

use tracing::{debug, error, info, instrument, warn};

use cogreader_shared::{
    ContextMode, Glossary, PassReport, ReadingConfig, Result, Section, SectionKind, SectionTree,
    Summary, SummaryTable,
};

use crate::context::{ContextBlock, ContextBuilder};
use crate::pipeline::ReadingProgress;
use crate::summarizer::{Summarizer, SummaryOutput, SummaryRequest, SummaryTask};

/// Per-section lifecycle within a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionState {
    Unvisited,
    Processing,
    /// Content-less section waiting on its subtree.
    Pending,
    Summarized,
}

/// Inputs that vary from pass to pass.
#[derive(Debug, Clone, Copy)]
pub struct PassInput<'a> {
    pub pass: u32,
    pub mode: ContextMode,
    /// The complete table of the previous pass.
    pub prior: Option<&'a SummaryTable>,
    /// Glossary to inject; `None` disables injection.
    pub glossary: Option<&'a Glossary>,
}

/// Result of one pass.
#[derive(Debug, Clone)]
pub struct PassOutcome {
    pub table: SummaryTable,
    pub report: PassReport,
}

/// Runs single passes over one tree with one summarizer.
pub struct PassExecutor<'a> {
    tree: &'a SectionTree,
    summarizer: &'a dyn Summarizer,
    context: ContextBuilder<'a>,
    max_key_concepts: usize,
    max_source_chars: usize,
    progress: &'a dyn ReadingProgress,
}

/// Mutable state of a pass in flight.
struct PassState<'t, 'i> {
    input: PassInput<'i>,
    table: SummaryTable,
    report: PassReport,
    states: HashMap<&'t str, SectionState>,
    /// Content-less sections whose subtree changed since they were last touched.
    dirty: HashSet<&'t str>,
}

impl<'a> PassExecutor<'a> {
    pub fn new(
        tree: &'a SectionTree,
        summarizer: &'a dyn Summarizer,
        config: &ReadingConfig,
        progress: &'a dyn ReadingProgress,
    ) -> Self {
        Self {
            tree,
            summarizer,
            context: ContextBuilder::new(tree, config.max_ancestors, config.glossary_limit),
            max_key_concepts: config.max_key_concepts,
            max_source_chars: config.max_source_chars,
            progress,
        }
    }

    /// Run one full pass and return the new table.
    #[instrument(
        skip_all,
        fields(pass = input.pass, mode = %input.mode, sections = self.tree.len())
    )]
    pub async fn run(&self, input: PassInput<'_>) -> PassOutcome {
        let mut st = PassState {
            input,
            table: SummaryTable::new(),
            report: PassReport {
                pass: input.pass,
                mode: Some(input.mode),
                ..Default::default()
            },
            states: self
                .tree
                .document_order()
                .map(|s| (s.id.as_str(), SectionState::Unvisited))
                .collect(),
            dirty: HashSet::new(),
        };

        let total = self.tree.len();
        let mut done = 0;

        // Main traversal.
        let mut pending: Vec<&'a Section> = Vec::new();
        for section in self.tree.document_order() {
            if section.kind() == SectionKind::ContentlessParent {
                debug!(section_id = %section.id, "deferring content-less section");
                st.states.insert(section.id.as_str(), SectionState::Pending);
                pending.push(section);
                continue;
            }

            done += 1;
            self.progress.section_progress(input.pass, done, total, &section.title);

            st.states.insert(section.id.as_str(), SectionState::Processing);
            self.summarize_section(&mut st, section).await;
            st.states.insert(section.id.as_str(), SectionState::Summarized);
            self.update_ancestors(&mut st, section).await;
        }

        // Deferred synthesis.
        let mut remaining: HashMap<&str, usize> = pending
            .iter()
            .map(|s| (s.id.as_str(), self.pending_below(&st, s)))
            .collect();
        let mut ready: BinaryHeap<(u32, &'a str)> = pending
            .iter()
            .filter(|s| remaining.get(s.id.as_str()) == Some(&0))
            .map(|s| (s.sequence_index, s.id.as_str()))
            .collect();

        while let Some((_, id)) = ready.pop() {
            let Some(section) = self.tree.get(id) else {
                continue;
            };

            done += 1;
            self.progress.section_progress(input.pass, done, total, &section.title);

            self.synthesize(&mut st, section).await;
            st.states.insert(id, SectionState::Summarized);
            self.update_ancestors(&mut st, section).await;

            for ancestor in self.tree.ancestors(id) {
                if let Some(count) = remaining.get_mut(ancestor.id.as_str()) {
                    *count = count.saturating_sub(1);
                    if *count == 0 {
                        ready.push((ancestor.sequence_index, ancestor.id.as_str()));
                    }
                }
            }
        }

        st.report.deferred_dirty = st.dirty.len();
        st.report.degraded_count = st.table.degraded_ids().len();
        debug_assert!(st.states.values().all(|s| *s == SectionState::Summarized));

        info!(
            calls = st.report.summarizer_calls,
            failures = st.report.failures,
            update_failures = st.report.update_failures,
            deferred = st.report.deferred_syntheses,
            degraded = st.report.degraded_count,
            "pass complete"
        );

        PassOutcome {
            table: st.table,
            report: st.report,
        }
    }

    /// Content-less descendants of `section` still pending.
    fn pending_below(&self, st: &PassState<'_, '_>, section: &Section) -> usize {
        self.tree
            .descendants(section.id.as_str())
            .iter()
            .filter(|d| st.states.get(d.id.as_str()) == Some(&SectionState::Pending))
            .count()
    }

    fn request(
        &self,
        st: &PassState<'_, '_>,
        task: SummaryTask,
        section: &Section,
        context: Vec<ContextBlock>,
    ) -> SummaryRequest {
        SummaryRequest {
            task,
            pass: st.input.pass,
            mode: st.input.mode,
            section_id: section.id.clone(),
            title: section.title.clone(),
            source_text: if task == SummaryTask::Synthesis {
                String::new()
            } else {
                section.text.clone()
            },
            context,
            max_key_concepts: self.max_key_concepts,
            max_source_chars: self.max_source_chars,
        }
    }

    async fn call(
        &self,
        st: &mut PassState<'_, '_>,
        request: &SummaryRequest,
    ) -> Result<SummaryOutput> {
        st.report.summarizer_calls += 1;
        self.summarizer.summarize(request).await
    }

    /// Summarize a leaf or content-bearing section from its own text.
    async fn summarize_section(&self, st: &mut PassState<'_, '_>, section: &Section) {
        let context = self.context.build_context(
            section,
            &st.table,
            st.input.mode,
            st.input.prior,
            st.input.glossary,
        );
        let request = self.request(st, SummaryTask::Section, section, context);
        self.store_or_placeholder(st, section, &request).await;
    }

    /// Synthesize a content-less section from its children.
    async fn synthesize(&self, st: &mut PassState<'_, '_>, section: &Section) {
        let mut context = self.context.ancestor_blocks(section, &st.table);
        context.extend(self.context.child_blocks(section, &st.table));

        let request = self.request(st, SummaryTask::Synthesis, section, context);
        st.report.deferred_syntheses += 1;
        self.store_or_placeholder(st, section, &request).await;
    }

    async fn store_or_placeholder(
        &self,
        st: &mut PassState<'_, '_>,
        section: &Section,
        request: &SummaryRequest,
    ) {
        let pass = st.input.pass;
        let summary = match self.call(st, request).await {
            Ok(out) => Summary::new(section.id.clone(), out.summary, out.key_concepts, pass),
            Err(e) => {
                // A broken backend degrades the section like any other failure; only the
                // log level differs.
                if e.is_fatal() {
                    error!(
                        section_id = %section.id,
                        task = request.task.as_str(),
                        pass,
                        error = %e,
                        "summarizer returned a non-summarization error, recording placeholder"
                    );
                } else {
                    warn!(
                        section_id = %section.id,
                        task = request.task.as_str(),
                        pass,
                        error = %e,
                        "summarization failed, recording placeholder"
                    );
                }
                st.report.failures += 1;
                Summary::placeholder(section.id.clone(), pass)
            }
        };
        st.table.insert(summary);
    }

    /// Bring every ancestor of `section` up to date, immediate parent first.
    async fn update_ancestors(&self, st: &mut PassState<'a, '_>, section: &Section) {
        for ancestor in self.tree.ancestors(section.id.as_str()) {
            match ancestor.kind() {
                SectionKind::ContentlessParent => {
                    st.dirty.insert(ancestor.id.as_str());
                }
                _ => self.revise(st, ancestor).await,
            }
        }
    }

    /// Recompute a content-bearing ancestor from its text and processed descendants.
    async fn revise(&self, st: &mut PassState<'_, '_>, ancestor: &Section) {
        let descendants = self.context.descendant_blocks(ancestor, &st.table);
        if descendants.is_empty() {
            debug!(section_id = %ancestor.id, "no descendant material, skipping revision");
            return;
        }

        let request = self.request(st, SummaryTask::AncestorUpdate, ancestor, descendants);
        match self.call(st, &request).await {
            Ok(out) => {
                let revisions = st
                    .table
                    .get(ancestor.id.as_str())
                    .map(|s| s.revision_count + 1)
                    .unwrap_or(0);
                let mut summary =
                    Summary::new(ancestor.id.clone(), out.summary, out.key_concepts, st.input.pass);
                summary.revision_count = revisions;
                st.table.insert(summary);
                st.report.ancestor_updates += 1;
            }
            Err(e) => {
                warn!(
                    section_id = %ancestor.id,
                    pass = st.input.pass,
                    error = %e,
                    "ancestor revision failed, keeping previous summary"
                );
                st.report.update_failures += 1;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

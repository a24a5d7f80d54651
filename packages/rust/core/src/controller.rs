//! Multi-pass reading.
//!
//! [`Reader::run`] executes exactly `num_passes` passes. Pass 1 reads with
//! cumulative context only; later passes add the previous pass's summary
//! and the accumulated glossary when enrichment is enabled. The glossary
//! is merged after every pass and the final table is the last pass's.

use std::collections::BTreeSet;

use tracing::{info, instrument};

use cogreader_shared::{
    ContextMode, Glossary, PassReport, ReadingConfig, Result, SectionId, SectionTree, SummaryTable,
};

use crate::glossary;
use crate::pass::{PassExecutor, PassInput};
use crate::pipeline::ReadingProgress;
use crate::summarizer::Summarizer;

/// Everything the passes produced.
#[derive(Debug, Clone)]
pub struct ReadOutcome {
    pub table: SummaryTable,
    pub glossary: Glossary,
    pub reports: Vec<PassReport>,
}

/// Section-level differences between two consecutive tables.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableDiff {
    /// Present in both with different summary text or concepts.
    pub changed: Vec<SectionId>,
    pub unchanged: Vec<SectionId>,
    /// Present only in the newer table.
    pub added: Vec<SectionId>,
}

/// Compare two pass tables by section.
pub fn diff_tables(previous: &SummaryTable, current: &SummaryTable) -> TableDiff {
    let mut diff = TableDiff::default();

    for summary in current.iter() {
        let id = summary.section_id.clone();
        match previous.get(id.as_str()) {
            None => diff.added.push(id),
            Some(old)
                if old.summary_text != summary.summary_text
                    || old.key_concepts != summary.key_concepts =>
            {
                diff.changed.push(id)
            }
            Some(_) => diff.unchanged.push(id),
        }
    }

    diff
}

/// Drives the pass executor across a whole run.
pub struct Reader<'a> {
    tree: &'a SectionTree,
    summarizer: &'a dyn Summarizer,
    config: &'a ReadingConfig,
    progress: &'a dyn ReadingProgress,
}

impl<'a> Reader<'a> {
    pub fn new(
        tree: &'a SectionTree,
        summarizer: &'a dyn Summarizer,
        config: &'a ReadingConfig,
        progress: &'a dyn ReadingProgress,
    ) -> Self {
        Self {
            tree,
            summarizer,
            config,
            progress,
        }
    }

    /// Context mode for a 1-based pass number.
    pub fn mode_for(&self, pass: u32) -> ContextMode {
        if pass > 1 && self.config.enriched_context {
            ContextMode::Enriched
        } else {
            ContextMode::Cumulative
        }
    }

    /// Validate, then run every pass.
    ///
    /// Configuration and structural problems fail here before any
    /// summarizer call; summarization failures never do.
    #[instrument(skip_all, fields(passes = self.config.num_passes, sections = self.tree.len()))]
    pub async fn run(&self) -> Result<ReadOutcome> {
        self.config.validate()?;
        self.tree.validate()?;

        let executor = PassExecutor::new(self.tree, self.summarizer, self.config, self.progress);
        let mut glossary = Glossary::new();
        let mut reports = Vec::with_capacity(self.config.num_passes as usize);
        let mut previous: Option<SummaryTable> = None;
        let mut related_before: Vec<(String, BTreeSet<SectionId>)> = Vec::new();

        for pass in 1..=self.config.num_passes {
            let mode = self.mode_for(pass);
            self.progress.phase(&format!("Pass {pass}/{} ({mode})", self.config.num_passes));

            let inject = mode == ContextMode::Enriched && self.config.inject_glossary;
            let input = PassInput {
                pass,
                mode,
                prior: previous.as_ref().filter(|_| mode == ContextMode::Enriched),
                glossary: inject.then_some(&glossary),
            };

            let outcome = executor.run(input).await;
            let mut report = outcome.report;

            if let Some(prev) = &previous {
                let diff = diff_tables(prev, &outcome.table);
                report.revised_sections = diff.changed.len();
                info!(
                    pass,
                    changed = diff.changed.len(),
                    unchanged = diff.unchanged.len(),
                    added = diff.added.len(),
                    "pass-to-pass diff"
                );
            }

            let added = glossary::merge_pass(&mut glossary, self.tree, &outcome.table);
            debug_assert!(related_before.iter().all(|(id, before)| {
                glossary
                    .get(id)
                    .is_some_and(|e| e.related_section_ids.is_superset(before))
            }));
            related_before = glossary
                .entries()
                .iter()
                .map(|e| (e.concept_id.clone(), e.related_section_ids.clone()))
                .collect();

            info!(pass, %mode, new_concepts = added, concepts = glossary.len(), "pass merged");

            reports.push(report);
            previous = Some(outcome.table);
        }

        Ok(ReadOutcome {
            table: previous.unwrap_or_default(),
            glossary,
            reports,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::BlockKind;
    use crate::pass::tests::{Recorder, content_tree, section};
    use crate::pipeline::SilentProgress;
    use crate::summarizer::SummaryTask;
    use cogreader_shared::{ReaderError, Summary};

    fn config(passes: u32) -> ReadingConfig {
        ReadingConfig {
            num_passes: passes,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn second_pass_sees_prior_summary_and_glossary() {
        let tree = content_tree();
        let rec = Recorder::default();
        let cfg = config(2);
        let out = Reader::new(&tree, &rec, &cfg, &SilentProgress).run().await.unwrap();

        assert_eq!(out.reports.len(), 2);
        assert_eq!(out.reports[0].mode, Some(ContextMode::Cumulative));
        assert_eq!(out.reports[1].mode, Some(ContextMode::Enriched));

        let calls = rec.calls.lock().unwrap();
        let pass1_a2 = calls
            .iter()
            .find(|r| {
                r.pass == 1 && r.task == SummaryTask::Section && r.section_id.as_str() == "A2"
            })
            .unwrap();
        assert!(
            pass1_a2
                .context
                .iter()
                .all(|b| b.kind != BlockKind::PriorPass && b.kind != BlockKind::Glossary)
        );

        let pass2_a2 = calls
            .iter()
            .find(|r| {
                r.pass == 2 && r.task == SummaryTask::Section && r.section_id.as_str() == "A2"
            })
            .unwrap();
        let prior = pass2_a2.context.iter().find(|b| b.kind == BlockKind::PriorPass).unwrap();
        assert_eq!(prior.text, "section:A2#7");

        let glossary_block = pass2_a2
            .context
            .iter()
            .find(|b| b.kind == BlockKind::Glossary)
            .unwrap();
        for id in ["root", "A", "A1", "A2"] {
            assert!(
                glossary_block.text.contains(&format!("Concept {id}")),
                "missing concept for {id}"
            );
        }
        drop(calls);

        // Final table is pass 2's.
        assert!(out.table.iter().all(|s| s.pass_number == 2));
        assert_eq!(out.table.len(), tree.len());
    }

    #[tokio::test]
    async fn glossary_injection_can_be_disabled() {
        let tree = content_tree();
        let rec = Recorder::default();
        let cfg = ReadingConfig {
            num_passes: 2,
            inject_glossary: false,
            ..Default::default()
        };
        Reader::new(&tree, &rec, &cfg, &SilentProgress).run().await.unwrap();

        let calls = rec.calls.lock().unwrap();
        assert!(calls.iter().all(|r| r.context.iter().all(|b| b.kind != BlockKind::Glossary)));
        assert!(calls.iter().any(|r| r.context.iter().any(|b| b.kind == BlockKind::PriorPass)));
    }

    #[tokio::test]
    async fn cumulative_only_run_never_enriches() {
        let tree = content_tree();
        let rec = Recorder::default();
        let cfg = ReadingConfig {
            num_passes: 1,
            enriched_context: false,
            inject_glossary: false,
            ..Default::default()
        };
        let reader = Reader::new(&tree, &rec, &cfg, &SilentProgress);
        assert_eq!(reader.mode_for(3), ContextMode::Cumulative);
        reader.run().await.unwrap();
    }

    #[tokio::test]
    async fn every_section_has_one_summary_for_any_pass_count() {
        let tree = content_tree();
        for passes in 1..=3 {
            let rec = Recorder::default();
            let cfg = config(passes);
            let out = Reader::new(&tree, &rec, &cfg, &SilentProgress).run().await.unwrap();
            assert_eq!(out.table.len(), tree.len());
            for section in tree.document_order() {
                assert!(out.table.contains(section.id.as_str()));
            }
            assert_eq!(out.reports.len(), passes as usize);
        }
    }

    #[tokio::test]
    async fn invalid_config_fails_before_any_call() {
        let tree = content_tree();
        let rec = Recorder::default();
        let cfg = config(0);
        let err = Reader::new(&tree, &rec, &cfg, &SilentProgress).run().await.unwrap_err();
        assert!(matches!(err, ReaderError::Config { .. }));
        assert!(rec.trace().is_empty());
    }

    #[tokio::test]
    async fn zero_source_budget_fails_before_any_call() {
        let tree = content_tree();
        let rec = Recorder::default();
        let cfg = ReadingConfig {
            num_passes: 1,
            max_source_chars: 0,
            ..Default::default()
        };
        let err = Reader::new(&tree, &rec, &cfg, &SilentProgress).run().await.unwrap_err();
        assert!(matches!(err, ReaderError::Config { .. }));
        assert!(rec.trace().is_empty());
    }

    #[tokio::test]
    async fn failure_is_counted_and_run_completes() {
        let tree = content_tree();
        let rec = Recorder::failing(vec![(SummaryTask::Section, "A1")]);
        let cfg = config(2);
        let out = Reader::new(&tree, &rec, &cfg, &SilentProgress).run().await.unwrap();

        assert_eq!(out.table.degraded_ids(), vec![SectionId::from("A1")]);
        assert!(out.reports.iter().all(|r| r.degraded_count == 1));
        assert!(out.glossary.get("concept a1").is_none());
    }

    #[tokio::test]
    async fn glossary_related_sections_never_shrink() {
        // Pass 1 names the concept in A1 only; a later table names it in A.
        let tree = content_tree();
        let rec = Recorder::default();
        let cfg = config(1);
        let first = Reader::new(&tree, &rec, &cfg, &SilentProgress).run().await.unwrap();

        let mut glossary = first.glossary.clone();
        let before = glossary.get("concept a1").unwrap().related_section_ids.clone();

        let mut next = SummaryTable::new();
        next.insert(Summary::new("A".into(), "A again.".into(), vec!["Concept A1".into()], 2));
        glossary::merge_pass(&mut glossary, &tree, &next);

        let after = &glossary.get("concept a1").unwrap().related_section_ids;
        assert!(after.is_superset(&before));
        assert_eq!(glossary.get("concept a1").unwrap().first_section_id.as_str(), "A");
    }

    #[test]
    fn diff_reports_changed_unchanged_added() {
        let mut prev = SummaryTable::new();
        prev.insert(Summary::new("a".into(), "same".into(), vec![], 1));
        prev.insert(Summary::new("b".into(), "old".into(), vec![], 1));

        let mut next = SummaryTable::new();
        next.insert(Summary::new("a".into(), "same".into(), vec![], 2));
        next.insert(Summary::new("b".into(), "new".into(), vec![], 2));
        next.insert(Summary::new("c".into(), "fresh".into(), vec![], 2));

        let diff = diff_tables(&prev, &next);
        assert_eq!(diff.unchanged, vec![SectionId::from("a")]);
        assert_eq!(diff.changed, vec![SectionId::from("b")]);
        assert_eq!(diff.added, vec![SectionId::from("c")]);
    }

    #[tokio::test]
    async fn deep_trees_truncate_ancestor_context() {
        let tree = SectionTree::new(
            "Doc",
            vec![
                section("root", "r.", 0, None, &["l1"], 0),
                section("l1", "1.", 1, Some("root"), &["l2"], 1),
                section("l2", "2.", 2, Some("l1"), &["l3"], 2),
                section("l3", "3.", 3, Some("l2"), &[], 3),
            ],
        )
        .unwrap();
        let rec = Recorder::default();
        let cfg = ReadingConfig {
            num_passes: 1,
            max_ancestors: 2,
            ..Default::default()
        };
        Reader::new(&tree, &rec, &cfg, &SilentProgress).run().await.unwrap();

        let calls = rec.calls.lock().unwrap();
        let l3 = calls.iter().find(|r| r.section_id.as_str() == "l3").unwrap();
        let ids: Vec<&str> = l3
            .context
            .iter()
            .filter_map(|b| b.section_id.as_ref())
            .map(|s| s.as_str())
            .collect();
        assert_eq!(ids, vec!["l1", "l2"]);
    }
}

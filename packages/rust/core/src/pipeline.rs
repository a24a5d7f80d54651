//! End-to-end `read` pipeline.
//!
//! Document → section tree → passes → knowledge → run directory.

use std::path::PathBuf;
use std::time::Instant;

use chrono::Utc;
use tracing::{info, instrument, warn};

use cogreader_shared::{CognitiveKnowledge, ReadingConfig, Result, RunId, RunManifest};
use cogreader_storage::Storage;

use crate::assembler::{self, AssembleConfig};
use crate::controller::Reader;
use crate::glossary::{self, DefinitionGenerator};
use crate::summarizer::Summarizer;
use crate::synthesis;

/// Configuration for the `read_document` pipeline.
#[derive(Debug, Clone)]
pub struct ReadConfig {
    /// Markdown file or serialized section tree (`.json`).
    pub input: PathBuf,
    /// Overrides the title derived from the document.
    pub title: Option<String>,
    /// Root directory for run output.
    pub output_root: PathBuf,
    pub reading: ReadingConfig,
    /// Tool version string.
    pub tool_version: String,
}

/// Optional collaborators of a run.
#[derive(Clone, Copy, Default)]
pub struct ReadExtras<'a> {
    /// Refines glossary definitions after the last pass.
    pub definitions: Option<&'a dyn DefinitionGenerator>,
    /// Records the run in the history table.
    pub history: Option<&'a Storage>,
}

/// Result of the `read_document` pipeline.
#[derive(Debug)]
pub struct ReadResult {
    pub run_id: RunId,
    /// Path to the assembled run directory.
    pub run_dir: PathBuf,
    pub manifest: RunManifest,
    pub knowledge: CognitiveKnowledge,
    /// Total elapsed time.
    pub elapsed: std::time::Duration,
}

/// Progress callback for reporting pipeline status.
pub trait ReadingProgress: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called after each section of a pass is settled.
    fn section_progress(&self, pass: u32, current: usize, total: usize, title: &str);
    /// Called when the pipeline completes.
    fn done(&self, result: &ReadResult);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ReadingProgress for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn section_progress(&self, _pass: u32, _current: usize, _total: usize, _title: &str) {}
    fn done(&self, _result: &ReadResult) {}
}

/// Run the full `read` pipeline.
///
/// 1. Load and structurally validate the section tree
/// 2. Validate the reading configuration
/// 3. Run every pass
/// 4. Refine glossary definitions (optional)
/// 5. Synthesize knowledge
/// 6. Assemble the run directory
#[instrument(skip_all, fields(input = %config.input.display(), passes = config.reading.num_passes))]
pub async fn read_document(
    config: &ReadConfig,
    summarizer: &dyn Summarizer,
    extras: ReadExtras<'_>,
    progress: &dyn ReadingProgress,
) -> Result<ReadResult> {
    let start = Instant::now();
    let started_at = Utc::now();
    let run_id = RunId::new();

    // --- Phase 1: Load ---
    progress.phase("Parsing document");
    let tree = cogreader_markdown::load_tree(&config.input, config.title.as_deref())?;
    config.reading.validate()?;

    info!(
        %run_id,
        title = %tree.title(),
        sections = tree.len(),
        max_depth = tree.max_depth(),
        summarizer = summarizer.name(),
        "starting read pipeline"
    );

    let source = config.input.display().to_string();
    if let Some(storage) = extras.history {
        if let Err(e) = storage
            .insert_run(
                &run_id.to_string(),
                &source,
                tree.title(),
                config.reading.num_passes,
                summarizer.name(),
            )
            .await
        {
            warn!(error = %e, "could not record run start");
        }
    }

    // --- Phase 2: Passes ---
    let outcome = Reader::new(&tree, summarizer, &config.reading, progress)
        .run()
        .await?;
    let mut glossary = outcome.glossary;

    // --- Phase 3: Definitions ---
    if let Some(generator) = extras.definitions.filter(|_| !glossary.is_empty()) {
        progress.phase("Refining glossary definitions");
        let refined = glossary::refine_definitions(&mut glossary, &outcome.table, generator).await;
        info!(refined, concepts = glossary.len(), "glossary definitions refined");
    }

    // --- Phase 4: Synthesis ---
    progress.phase("Synthesizing knowledge");
    let knowledge = synthesis::synthesize(&tree, outcome.table, glossary, outcome.reports);

    // --- Phase 5: Assembly ---
    progress.phase("Writing artifacts");
    let assemble_config = AssembleConfig {
        run_id: run_id.clone(),
        source,
        output_root: config.output_root.clone(),
        tool_version: config.tool_version.clone(),
        model: summarizer.name().to_string(),
        started_at,
    };
    let assembled = assembler::assemble(&assemble_config, &tree, &knowledge)?;

    if let Some(storage) = extras.history {
        if let Err(e) = storage
            .finish_run(
                &run_id.to_string(),
                knowledge.stats.section_count,
                knowledge.stats.degraded_count,
            )
            .await
        {
            warn!(error = %e, "could not record run completion");
        }
    }

    let elapsed = start.elapsed();
    info!(
        %run_id,
        sections = knowledge.stats.section_count,
        degraded = knowledge.stats.degraded_count,
        concepts = knowledge.stats.concept_count,
        elapsed_ms = elapsed.as_millis() as u64,
        "read pipeline complete"
    );

    let result = ReadResult {
        run_id,
        run_dir: assembled.run_dir,
        manifest: assembled.manifest,
        knowledge,
        elapsed,
    };
    progress.done(&result);
    Ok(result)
}

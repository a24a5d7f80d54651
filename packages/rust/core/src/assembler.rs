//! Run directory assembler.
//!
//! Writes the synthesized knowledge, a per-section JSONL export, and the
//! run manifest to `<output_root>/<run_id>/`.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument};

use cogreader_shared::{
    ArtifactMeta, CURRENT_SCHEMA_VERSION, CognitiveKnowledge, ReaderError, Result, RunId,
    RunManifest, SectionId, SectionTree,
};

pub const KNOWLEDGE_FILE: &str = "knowledge.json";
pub const SUMMARIES_FILE: &str = "summaries.jsonl";
pub const MANIFEST_FILE: &str = "manifest.json";

/// Run-level metadata recorded in the manifest.
#[derive(Debug, Clone)]
pub struct AssembleConfig {
    pub run_id: RunId,
    /// Input document path or label.
    pub source: String,
    /// Root directory for run output (e.g., `var/runs/`).
    pub output_root: PathBuf,
    pub tool_version: String,
    /// Summarizer name/model.
    pub model: String,
    pub started_at: DateTime<Utc>,
}

/// Output from a successful assembly.
#[derive(Debug, Clone)]
pub struct AssembleResult {
    /// Path to the run directory.
    pub run_dir: PathBuf,
    pub manifest: RunManifest,
}

/// One line of `summaries.jsonl`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionRecord {
    pub id: SectionId,
    /// Titles from the root down to this section.
    pub path: Vec<String>,
    pub title: String,
    pub depth: u32,
    pub summary: String,
    pub key_concepts: Vec<String>,
    pub degraded: bool,
}

/// Assemble a run directory.
///
/// ```text
/// <output_root>/<run_id>/
/// ├── knowledge.json
/// ├── summaries.jsonl
/// └── manifest.json
/// ```
#[instrument(skip_all, fields(run_id = %config.run_id, sections = tree.len()))]
pub fn assemble(
    config: &AssembleConfig,
    tree: &SectionTree,
    knowledge: &CognitiveKnowledge,
) -> Result<AssembleResult> {
    let run_dir = config.output_root.join(config.run_id.to_string());
    std::fs::create_dir_all(&run_dir).map_err(|e| ReaderError::io(&run_dir, e))?;

    info!(path = %run_dir.display(), "assembling run directory");

    let knowledge_json = to_pretty_json(knowledge)?;
    let records = section_records(tree, knowledge);
    let mut summaries_jsonl = String::new();
    for record in &records {
        let line = serde_json::to_string(record)
            .map_err(|e| ReaderError::validation(format!("JSON serialization failed: {e}")))?;
        summaries_jsonl.push_str(&line);
        summaries_jsonl.push('\n');
    }

    let artifacts = vec![
        write_artifact(&run_dir, KNOWLEDGE_FILE, &knowledge_json)?,
        write_artifact(&run_dir, SUMMARIES_FILE, &summaries_jsonl)?,
    ];

    let manifest = RunManifest {
        schema_version: CURRENT_SCHEMA_VERSION,
        run_id: config.run_id.clone(),
        source: config.source.clone(),
        document_title: knowledge.document_title.clone(),
        tool_version: config.tool_version.clone(),
        model: config.model.clone(),
        passes: knowledge.stats.passes,
        started_at: config.started_at,
        completed_at: Utc::now(),
        section_count: knowledge.stats.section_count,
        degraded_count: knowledge.stats.degraded_count,
        artifacts,
    };
    write_artifact(&run_dir, MANIFEST_FILE, &to_pretty_json(&manifest)?)?;

    info!(
        records = records.len(),
        degraded = manifest.degraded_count,
        path = %run_dir.display(),
        "run assembly complete"
    );

    Ok(AssembleResult { run_dir, manifest })
}

/// Flatten the knowledge into per-section records in document order.
pub fn section_records(tree: &SectionTree, knowledge: &CognitiveKnowledge) -> Vec<SectionRecord> {
    tree.document_order()
        .map(|section| {
            let summary = knowledge.summaries.get(section.id.as_str());
            SectionRecord {
                id: section.id.clone(),
                path: tree
                    .breadcrumb(section.id.as_str())
                    .into_iter()
                    .map(String::from)
                    .collect(),
                title: section.title.clone(),
                depth: section.depth,
                summary: summary.map(|s| s.summary_text.clone()).unwrap_or_default(),
                key_concepts: summary.map(|s| s.key_concepts.clone()).unwrap_or_default(),
                degraded: summary.is_none_or(|s| s.degraded),
            }
        })
        .collect()
}

/// Verify that a run directory is well-formed and its checksums match.
pub fn validate_run_dir(run_dir: &Path) -> Result<RunManifest> {
    let manifest_path = run_dir.join(MANIFEST_FILE);
    if !manifest_path.exists() {
        return Err(ReaderError::validation(format!("missing {MANIFEST_FILE}")));
    }

    let content =
        std::fs::read_to_string(&manifest_path).map_err(|e| ReaderError::io(&manifest_path, e))?;
    let manifest: RunManifest = serde_json::from_str(&content)
        .map_err(|e| ReaderError::validation(format!("invalid {MANIFEST_FILE}: {e}")))?;

    if manifest.schema_version != CURRENT_SCHEMA_VERSION {
        return Err(ReaderError::validation(format!(
            "unsupported schema_version: {} (expected {})",
            manifest.schema_version, CURRENT_SCHEMA_VERSION
        )));
    }

    for artifact in &manifest.artifacts {
        let path = run_dir.join(&artifact.filename);
        let bytes = std::fs::read(&path).map_err(|e| ReaderError::io(&path, e))?;
        if sha256_hex(&bytes) != artifact.sha256 {
            return Err(ReaderError::validation(format!(
                "checksum mismatch for {}",
                artifact.filename
            )));
        }
    }

    let knowledge_path = run_dir.join(KNOWLEDGE_FILE);
    let knowledge =
        std::fs::read_to_string(&knowledge_path).map_err(|e| ReaderError::io(&knowledge_path, e))?;
    let knowledge: CognitiveKnowledge = serde_json::from_str(&knowledge)
        .map_err(|e| ReaderError::validation(format!("invalid {KNOWLEDGE_FILE}: {e}")))?;
    if knowledge.summaries.len() != manifest.section_count {
        return Err(ReaderError::validation(format!(
            "{KNOWLEDGE_FILE} has {} summaries, manifest records {}",
            knowledge.summaries.len(),
            manifest.section_count
        )));
    }

    Ok(manifest)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Write one file atomically (temp then rename) and checksum it.
fn write_artifact(dir: &Path, filename: &str, content: &str) -> Result<ArtifactMeta> {
    let target = dir.join(filename);
    let temp = dir.join(format!(".{filename}.tmp"));

    std::fs::write(&temp, content).map_err(|e| ReaderError::io(&temp, e))?;
    std::fs::rename(&temp, &target).map_err(|e| ReaderError::io(&target, e))?;

    debug!(file = %filename, size = content.len(), "wrote artifact");

    Ok(ArtifactMeta {
        filename: filename.to_string(),
        sha256: sha256_hex(content.as_bytes()),
        size_bytes: content.len(),
    })
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

fn to_pretty_json<T: Serialize>(data: &T) -> Result<String> {
    serde_json::to_string_pretty(data)
        .map_err(|e| ReaderError::validation(format!("JSON serialization failed: {e}")))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synthesis::synthesize;
    use cogreader_shared::{Glossary, PassReport, Section, Summary, SummaryTable};

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "cogreader-assembler-test-{}",
            uuid::Uuid::now_v7()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn make_config(output_root: &Path) -> AssembleConfig {
        AssembleConfig {
            run_id: RunId::new(),
            source: "guide.md".into(),
            output_root: output_root.into(),
            tool_version: "0.1.0-test".into(),
            model: "dry-run".into(),
            started_at: Utc::now(),
        }
    }

    fn section(
        id: &str,
        title: &str,
        depth: u32,
        parent: Option<&str>,
        children: &[&str],
        seq: u32,
    ) -> Section {
        Section {
            id: id.into(),
            title: title.into(),
            text: "body".into(),
            depth,
            parent_id: parent.map(SectionId::from),
            ordered_child_ids: children.iter().map(|c| SectionId::from(*c)).collect(),
            sequence_index: seq,
        }
    }

    fn fixture() -> (SectionTree, CognitiveKnowledge) {
        let tree = SectionTree::new(
            "Guide",
            vec![
                section("root", "Guide", 0, None, &["install"], 0),
                section("install", "Installation", 1, Some("root"), &["install/linux"], 1),
                section("install/linux", "Linux", 2, Some("install"), &[], 2),
            ],
        )
        .unwrap();
        let mut table = SummaryTable::new();
        table.insert(Summary::new("root".into(), "A guide.".into(), vec!["Guide".into()], 1));
        table.insert(Summary::new("install".into(), "How to install.".into(), vec![], 1));
        table.insert(Summary::placeholder("install/linux".into(), 1));
        let knowledge = synthesize(&tree, table, Glossary::new(), vec![PassReport::default()]);
        (tree, knowledge)
    }

    #[test]
    fn assemble_writes_all_artifacts() {
        let root = temp_dir();
        let config = make_config(&root);
        let (tree, knowledge) = fixture();

        let result = assemble(&config, &tree, &knowledge).unwrap();

        assert_eq!(result.run_dir, root.join(config.run_id.to_string()));
        for file in [KNOWLEDGE_FILE, SUMMARIES_FILE, MANIFEST_FILE] {
            assert!(result.run_dir.join(file).exists(), "missing {file}");
        }
        assert_eq!(result.manifest.artifacts.len(), 2);
        assert_eq!(result.manifest.section_count, 3);
        assert_eq!(result.manifest.degraded_count, 1);
        assert_eq!(result.manifest.document_title, "Guide");

        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn summaries_jsonl_is_in_document_order() {
        let root = temp_dir();
        let (tree, knowledge) = fixture();
        let result = assemble(&make_config(&root), &tree, &knowledge).unwrap();

        let content = std::fs::read_to_string(result.run_dir.join(SUMMARIES_FILE)).unwrap();
        let records: Vec<SectionRecord> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["root", "install", "install/linux"]);
        assert_eq!(records[2].path, vec!["Guide", "Installation", "Linux"]);
        assert!(records[2].degraded);
        assert!(!records[1].degraded);
        assert_eq!(records[0].key_concepts, vec!["Guide"]);

        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn no_temp_files_left_behind() {
        let root = temp_dir();
        let (tree, knowledge) = fixture();
        let result = assemble(&make_config(&root), &tree, &knowledge).unwrap();

        let leftovers: Vec<_> = std::fs::read_dir(&result.run_dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());

        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn validate_accepts_fresh_run_and_rejects_tampering() {
        let root = temp_dir();
        let (tree, knowledge) = fixture();
        let result = assemble(&make_config(&root), &tree, &knowledge).unwrap();

        let manifest = validate_run_dir(&result.run_dir).unwrap();
        assert_eq!(manifest.run_id, result.manifest.run_id);

        std::fs::write(result.run_dir.join(SUMMARIES_FILE), "{}\n").unwrap();
        let err = validate_run_dir(&result.run_dir).unwrap_err();
        assert!(err.to_string().contains("checksum mismatch"));

        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn validate_missing_manifest() {
        let root = temp_dir();
        assert!(validate_run_dir(&root).is_err());
        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn knowledge_json_is_byte_identical_for_identical_input() {
        let (tree, a) = fixture();
        let (_, b) = fixture();
        assert_eq!(to_pretty_json(&a).unwrap(), to_pretty_json(&b).unwrap());
        assert_eq!(section_records(&tree, &a), section_records(&tree, &b));
    }
}

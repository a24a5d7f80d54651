//! Shared types, error model, and configuration for cogreader.
//!
//! This crate is the foundation depended on by all other cogreader crates.
//! It provides:
//! - [`ReaderError`], the unified error type
//! - The section tree ([`Section`], [`SectionTree`]) with structural validation
//! - Reading artifacts ([`Summary`], [`SummaryTable`], [`Glossary`], [`CognitiveKnowledge`])
//! - Configuration ([`AppConfig`], [`ReadingConfig`], config loading)

pub mod config;
pub mod error;
pub mod tree;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, CacheConfig, DefaultsConfig, MAX_PASSES, OpenRouterConfig, ReadingConfig,
    config_dir, config_file_path, init_config, load_config, load_config_from, validate_api_key,
};
pub use error::{ReaderError, Result};
pub use tree::{Section, SectionId, SectionKind, SectionTree};
pub use types::{
    ArtifactMeta, CURRENT_SCHEMA_VERSION, CognitiveKnowledge, ContextMode, Glossary,
    GlossaryEntry, KnowledgeStats, OutlineEntry, PassReport, RunId, RunManifest, Summary,
    SummaryTable,
};

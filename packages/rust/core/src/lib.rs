//! Core reading engine for cogreader.
//!
//! This crate ties together the section tree, the summarizer
//! collaborators, and the multi-pass reading algorithm into the end-to-end
//! `read_document` workflow that produces a [`cogreader_shared::CognitiveKnowledge`]
//! artifact.

pub mod assembler;
pub mod context;
pub mod controller;
pub mod glossary;
pub mod openrouter;
pub mod outline;
pub mod pass;
pub mod pipeline;
pub mod prompt;
pub mod summarizer;
pub mod synthesis;

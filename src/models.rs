//! Core data models used throughout the pipeline.
//!
//! These types represent the documents and chunks that flow from the
//! repository loader through the chunker into the vector index, and the
//! retrieval results handed back to a conversation session.

use serde::Serialize;

use crate::language::Language;

/// One file loaded from a fetched repository tree.
#[derive(Debug, Clone)]
pub struct Document {
    /// Path relative to the repository root, `/`-separated.
    pub path: String,
    pub content: String,
    /// `None` for plain-text formats.
    pub language: Option<Language>,
}

/// A bounded slice of a document's text, the unit of retrieval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub id: String,
    pub source_path: String,
    pub sequence_index: i64,
    pub text: String,
    pub hash: String,
}

/// A chunk returned from the vector index for a query.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievedChunk {
    pub chunk_id: String,
    pub source_path: String,
    pub sequence_index: i64,
    pub text: String,
    /// Cosine similarity to the query.
    pub score: f32,
}

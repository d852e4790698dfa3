//! Core data models used throughout Storyloom.
//!
//! These types represent the documents, chunks, and stories that flow through
//! the ingestion, retrieval, and generation pipeline.

/// A corpus document registered in SQLite.
///
/// Identity is (filename, file_hash): re-ingesting identical content is a
/// no-op, changed content under the same filename creates a new row.
/// Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub id: String,
    pub filename: String,
    pub file_hash: String,
    pub created_at: i64,
}

/// A bounded span of a document's text, the unit of embedding and retrieval.
///
/// `embedding` is `None` until the embedding endpoint has been reached for
/// this chunk; such chunks are reported as pending and skipped by the index.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub chunk_index: i64,
    pub text: String,
    pub embedding: Option<Vec<f32>>,
}

/// A persisted generation record. Append-only: never mutated after creation,
/// except the explicit `memory_added` transition.
#[derive(Debug, Clone)]
pub struct Story {
    pub id: String,
    pub prompt: String,
    pub response: String,
    pub system_prompt: Option<String>,
    pub style: Option<String>,
    pub created_at: i64,
    pub mode: String,
    pub memory_added: bool,
}

/// A document resolved from retrieval, carrying the chunk excerpts that
/// matched the query in rank order (most relevant first).
#[derive(Debug, Clone)]
pub struct ContextDocument {
    pub document: Document,
    /// Matched chunk texts, best rank first.
    pub excerpts: Vec<String>,
    /// Similarity score of the document's best chunk.
    pub score: f32,
}

/// The outcome of a completion call, held by the caller until persisted.
///
/// Kept separate from [`Story`] so a persistence failure preserves the
/// generated text and persistence alone can be retried.
#[derive(Debug, Clone)]
pub struct GeneratedStory {
    pub prompt: String,
    pub response: String,
    pub system_prompt: Option<String>,
    pub style: Option<String>,
    pub mode: String,
    pub document_ids: Vec<String>,
}

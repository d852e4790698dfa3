//! In-memory vector index over document chunks.
//!
//! Process-lifetime state with an explicit lifecycle: [`VectorIndex::load`]
//! rebuilds the index from the persisted `chunks` table at startup, ingestion
//! inserts into the live instance, and the instance is passed explicitly to
//! the retriever. No module-level singletons.
//!
//! Dimensionality is pinned by the first inserted vector and enforced for
//! every later insert and query, since mixing embedding models silently
//! corrupts similarity ordering.

use sqlx::{Row, SqlitePool};

use crate::embedding::{blob_to_vec, cosine_similarity};
use crate::errors::{IndexError, StorageError};

/// One indexed chunk.
#[derive(Debug, Clone)]
struct IndexEntry {
    chunk_id: String,
    document_id: String,
    text: String,
    vector: Vec<f32>,
}

/// A scored hit returned from [`VectorIndex::search`].
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk_id: String,
    pub document_id: String,
    pub text: String,
    pub score: f32,
}

/// In-memory nearest-neighbor index, cosine similarity, exact scan.
#[derive(Debug, Default)]
pub struct VectorIndex {
    dims: Option<usize>,
    entries: Vec<IndexEntry>,
}

impl VectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the index from the `chunks` table. Chunks without an embedding
    /// (pending) are skipped.
    pub async fn load(pool: &SqlitePool) -> Result<Self, StorageError> {
        let rows = sqlx::query(
            r#"
            SELECT c.id, c.document_id, c.text, c.embedding
            FROM chunks c
            JOIN documents d ON d.id = c.document_id
            WHERE c.embedding IS NOT NULL
            ORDER BY d.created_at, c.document_id, c.chunk_index
            "#,
        )
        .fetch_all(pool)
        .await?;

        let mut index = Self::new();
        for row in &rows {
            let blob: Vec<u8> = row.get("embedding");
            let vector = blob_to_vec(&blob);
            // A stored vector of foreign dimensionality means the corpus was
            // embedded with a different model; surface that as corruption.
            index
                .insert(
                    row.get("id"),
                    row.get("document_id"),
                    row.get("text"),
                    vector,
                )
                .map_err(|e| StorageError::Database(e.to_string()))?;
        }

        Ok(index)
    }

    /// Insert one embedded chunk. The first insert pins the index
    /// dimensionality for its lifetime.
    pub fn insert(
        &mut self,
        chunk_id: String,
        document_id: String,
        text: String,
        vector: Vec<f32>,
    ) -> Result<(), IndexError> {
        match self.dims {
            None => self.dims = Some(vector.len()),
            Some(expected) if expected != vector.len() => {
                return Err(IndexError::DimensionMismatch {
                    expected,
                    got: vector.len(),
                });
            }
            Some(_) => {}
        }

        self.entries.push(IndexEntry {
            chunk_id,
            document_id,
            text,
            vector,
        });
        Ok(())
    }

    /// Return the `k` most similar chunks, descending by cosine similarity,
    /// ties broken by insertion order (stable). An empty index returns an
    /// empty vec, never an error.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<ScoredChunk> {
        if k == 0 || self.entries.is_empty() {
            return Vec::new();
        }

        let mut scored: Vec<(usize, f32)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, e)| (i, cosine_similarity(query, &e.vector)))
            .collect();

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        scored.truncate(k);

        scored
            .into_iter()
            .map(|(i, score)| {
                let e = &self.entries[i];
                ScoredChunk {
                    chunk_id: e.chunk_id.clone(),
                    document_id: e.document_id.clone(),
                    text: e.text.clone(),
                    score,
                }
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Dimensionality pinned by the first insert, if any.
    pub fn dims(&self) -> Option<usize> {
        self.dims
    }
}

//! SQLite-backed document and story stores.
//!
//! [`DocumentStore`] owns document identity and chunk persistence;
//! [`StoryStore`] owns the append-only story log and its provenance
//! associations. Both wrap the shared connection pool and surface
//! [`StorageError`] so callers can distinguish persistence failures from
//! generation failures.

use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::embedding::{blob_to_vec, vec_to_blob};
use crate::errors::StorageError;
use crate::models::{Chunk, Document, GeneratedStory, Story};

/// Persists document metadata and content-hash identity.
#[derive(Clone)]
pub struct DocumentStore {
    pool: SqlitePool,
}

impl DocumentStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Register a document by (filename, content). Returns the stored row and
    /// whether it was newly created.
    ///
    /// Dedup is a single constraint-backed operation: the insert ignores the
    /// (filename, file_hash) conflict and the follow-up select returns
    /// whichever row won, so concurrent ingestion of the same file never
    /// produces duplicates.
    pub async fn ingest(
        &self,
        filename: &str,
        content: &str,
    ) -> Result<(Document, bool), StorageError> {
        let file_hash = content_hash(content);
        let id = Uuid::new_v4().to_string();
        let now = chrono::Utc::now().timestamp();

        let result = sqlx::query(
            r#"
            INSERT INTO documents (id, filename, file_hash, created_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(filename, file_hash) DO NOTHING
            "#,
        )
        .bind(&id)
        .bind(filename)
        .bind(&file_hash)
        .bind(now)
        .execute(&self.pool)
        .await?;

        let created = result.rows_affected() > 0;

        let row = sqlx::query(
            "SELECT id, filename, file_hash, created_at FROM documents \
             WHERE filename = ? AND file_hash = ?",
        )
        .bind(filename)
        .bind(&file_hash)
        .fetch_one(&self.pool)
        .await?;

        Ok((document_from_row(&row), created))
    }

    pub async fn get(&self, id: &str) -> Result<Option<Document>, StorageError> {
        let row = sqlx::query("SELECT id, filename, file_hash, created_at FROM documents WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(document_from_row))
    }

    pub async fn list(&self) -> Result<Vec<Document>, StorageError> {
        let rows = sqlx::query(
            "SELECT id, filename, file_hash, created_at FROM documents ORDER BY filename, created_at",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(document_from_row).collect())
    }

    /// Remove a document; its chunks go with it (cascade). Fails if a story
    /// still references it, so provenance rows are never silently orphaned.
    pub async fn remove(&self, id: &str) -> Result<(), StorageError> {
        let result = sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("document {}", id)));
        }
        Ok(())
    }

    /// Persist the chunks of a newly created document in one transaction.
    pub async fn insert_chunks(&self, chunks: &[Chunk]) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await?;

        for chunk in chunks {
            let blob = chunk.embedding.as_deref().map(vec_to_blob);
            sqlx::query(
                "INSERT INTO chunks (id, document_id, chunk_index, text, embedding) \
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&chunk.id)
            .bind(&chunk.document_id)
            .bind(chunk.chunk_index)
            .bind(&chunk.text)
            .bind(blob)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Chunks still waiting for an embedding vector.
    pub async fn pending_chunks(&self) -> Result<Vec<Chunk>, StorageError> {
        let rows = sqlx::query(
            "SELECT id, document_id, chunk_index, text FROM chunks \
             WHERE embedding IS NULL ORDER BY document_id, chunk_index",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| Chunk {
                id: row.get("id"),
                document_id: row.get("document_id"),
                chunk_index: row.get("chunk_index"),
                text: row.get("text"),
                embedding: None,
            })
            .collect())
    }

    pub async fn set_chunk_embedding(
        &self,
        chunk_id: &str,
        vector: &[f32],
    ) -> Result<(), StorageError> {
        let result = sqlx::query("UPDATE chunks SET embedding = ? WHERE id = ?")
            .bind(vec_to_blob(vector))
            .bind(chunk_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("chunk {}", chunk_id)));
        }
        Ok(())
    }

    /// All chunks of a document, in order. Used by `docs show`.
    pub async fn chunks_for_document(&self, document_id: &str) -> Result<Vec<Chunk>, StorageError> {
        let rows = sqlx::query(
            "SELECT id, document_id, chunk_index, text, embedding FROM chunks \
             WHERE document_id = ? ORDER BY chunk_index",
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let blob: Option<Vec<u8>> = row.get("embedding");
                Chunk {
                    id: row.get("id"),
                    document_id: row.get("document_id"),
                    chunk_index: row.get("chunk_index"),
                    text: row.get("text"),
                    embedding: blob.as_deref().map(blob_to_vec),
                }
            })
            .collect())
    }
}

/// Persists generation results with their provenance, append-only.
#[derive(Clone)]
pub struct StoryStore {
    pool: SqlitePool,
}

impl StoryStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Persist a story and its document associations in a single transaction:
    /// either both land or neither does. The input is borrowed, so on failure
    /// the caller still holds the generated text and can retry persistence
    /// without re-calling the completion endpoint.
    pub async fn save(&self, story: &GeneratedStory) -> Result<Story, StorageError> {
        let id = Uuid::new_v4().to_string();
        let now = chrono::Utc::now().timestamp();

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO stories (id, prompt, response, system_prompt, style, created_at, mode, memory_added)
            VALUES (?, ?, ?, ?, ?, ?, ?, 0)
            "#,
        )
        .bind(&id)
        .bind(&story.prompt)
        .bind(&story.response)
        .bind(&story.system_prompt)
        .bind(&story.style)
        .bind(now)
        .bind(&story.mode)
        .execute(&mut *tx)
        .await?;

        for document_id in &story.document_ids {
            sqlx::query("INSERT INTO story_documents (story_id, document_id) VALUES (?, ?)")
                .bind(&id)
                .bind(document_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;

        Ok(Story {
            id,
            prompt: story.prompt.clone(),
            response: story.response.clone(),
            system_prompt: story.system_prompt.clone(),
            style: story.style.clone(),
            created_at: now,
            mode: story.mode.clone(),
            memory_added: false,
        })
    }

    pub async fn get(&self, id: &str) -> Result<Option<Story>, StorageError> {
        let row = sqlx::query(
            "SELECT id, prompt, response, system_prompt, style, created_at, mode, memory_added \
             FROM stories WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(story_from_row))
    }

    pub async fn list(&self, limit: i64, offset: i64) -> Result<Vec<Story>, StorageError> {
        let rows = sqlx::query(
            "SELECT id, prompt, response, system_prompt, style, created_at, mode, memory_added \
             FROM stories ORDER BY created_at DESC, id LIMIT ? OFFSET ?",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(story_from_row).collect())
    }

    pub async fn by_style(
        &self,
        style: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Story>, StorageError> {
        let rows = sqlx::query(
            "SELECT id, prompt, response, system_prompt, style, created_at, mode, memory_added \
             FROM stories WHERE style = ? ORDER BY created_at DESC, id LIMIT ? OFFSET ?",
        )
        .bind(style)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(story_from_row).collect())
    }

    /// Substring search over prompt and response.
    pub async fn search(
        &self,
        query: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Story>, StorageError> {
        let pattern = format!("%{}%", query);
        let rows = sqlx::query(
            "SELECT id, prompt, response, system_prompt, style, created_at, mode, memory_added \
             FROM stories WHERE prompt LIKE ? OR response LIKE ? \
             ORDER BY created_at DESC, id LIMIT ? OFFSET ?",
        )
        .bind(&pattern)
        .bind(&pattern)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(story_from_row).collect())
    }

    /// The documents that contributed context to a story (provenance join).
    pub async fn documents(&self, story_id: &str) -> Result<Vec<Document>, StorageError> {
        let rows = sqlx::query(
            r#"
            SELECT d.id, d.filename, d.file_hash, d.created_at
            FROM documents d
            JOIN story_documents sd ON d.id = sd.document_id
            WHERE sd.story_id = ?
            ORDER BY d.filename
            "#,
        )
        .bind(story_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(document_from_row).collect())
    }

    /// The explicit "commit to long-term memory" transition. The only
    /// mutation a story ever sees.
    pub async fn mark_memory_added(&self, story_id: &str) -> Result<(), StorageError> {
        let result = sqlx::query("UPDATE stories SET memory_added = 1 WHERE id = ?")
            .bind(story_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("story {}", story_id)));
        }
        Ok(())
    }
}

/// SHA-256 hex digest of document content.
pub fn content_hash(content: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn document_from_row(row: &sqlx::sqlite::SqliteRow) -> Document {
    Document {
        id: row.get("id"),
        filename: row.get("filename"),
        file_hash: row.get("file_hash"),
        created_at: row.get("created_at"),
    }
}

fn story_from_row(row: &sqlx::sqlite::SqliteRow) -> Story {
    let memory_added: i64 = row.get("memory_added");
    Story {
        id: row.get("id"),
        prompt: row.get("prompt"),
        response: row.get("response"),
        system_prompt: row.get("system_prompt"),
        style: row.get("style"),
        created_at: row.get("created_at"),
        mode: row.get("mode"),
        memory_added: memory_added != 0,
    }
}

use anyhow::Result;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;

    // Create stories table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS stories (
            id TEXT PRIMARY KEY,
            prompt TEXT NOT NULL,
            response TEXT NOT NULL,
            system_prompt TEXT,
            style TEXT,
            created_at INTEGER NOT NULL,
            mode TEXT NOT NULL,
            memory_added INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(&pool)
    .await?;

    // Create documents table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id TEXT PRIMARY KEY,
            filename TEXT NOT NULL,
            file_hash TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            UNIQUE(filename, file_hash)
        )
        "#,
    )
    .execute(&pool)
    .await?;

    // Create story_documents association table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS story_documents (
            story_id TEXT NOT NULL,
            document_id TEXT NOT NULL,
            PRIMARY KEY (story_id, document_id),
            FOREIGN KEY (story_id) REFERENCES stories(id),
            FOREIGN KEY (document_id) REFERENCES documents(id)
        )
        "#,
    )
    .execute(&pool)
    .await?;

    // Create chunks table (persisted index state; embedding NULL until embedded)
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            id TEXT PRIMARY KEY,
            document_id TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            text TEXT NOT NULL,
            embedding BLOB,
            UNIQUE(document_id, chunk_index),
            FOREIGN KEY (document_id) REFERENCES documents(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(&pool)
    .await?;

    // Create indexes
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_document_id ON chunks(document_id)")
        .execute(&pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_stories_created_at ON stories(created_at DESC)")
        .execute(&pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_stories_style ON stories(style)")
        .execute(&pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_story_documents_document ON story_documents(document_id)",
    )
    .execute(&pool)
    .await?;

    pool.close().await;
    Ok(())
}

//! Corpus ingestion.
//!
//! Walks the configured docs directory, extracts plain text, registers each
//! file with the [`DocumentStore`] (content-hash dedup: unchanged files are
//! a no-op and are never re-embedded), then chunks, embeds, and persists the
//! chunks of newly created documents. Embedding failure is non-fatal: chunks
//! land with NULL embeddings and `loom embed` backfills them later.

use anyhow::{bail, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::PathBuf;
use walkdir::WalkDir;

use crate::chunk::chunk_text;
use crate::config::{ChunkingConfig, Config, DocsConfig};
use crate::db;
use crate::embedding::{Embedder, HttpEmbedder};
use crate::extract::extract_file;
use crate::index::VectorIndex;
use crate::store::DocumentStore;

/// Counters printed after an ingest run.
#[derive(Debug, Default)]
pub struct IngestSummary {
    pub scanned: u64,
    pub new_documents: u64,
    pub duplicates: u64,
    pub skipped: u64,
    pub chunks_written: u64,
    pub embedded: u64,
    pub pending: u64,
}

/// `loom ingest` entry point.
pub async fn run_ingest(config: &Config, dry_run: bool) -> Result<()> {
    let files = scan_docs(&config.docs)?;

    if dry_run {
        println!("ingest (dry-run)");
        println!("  files found: {}", files.len());
        let mut estimated = 0usize;
        for (path, _) in &files {
            if let Ok(text) = extract_file(path) {
                estimated += chunk_text(
                    "tmp",
                    &text,
                    config.chunking.chunk_chars,
                    config.chunking.overlap_chars,
                )
                .len();
            }
        }
        println!("  estimated chunks: {}", estimated);
        return Ok(());
    }

    let pool = db::connect(config).await?;
    let store = DocumentStore::new(pool.clone());
    let embedder = HttpEmbedder::new(&config.embedding)?;

    let mut summary = IngestSummary::default();

    for (path, rel) in &files {
        summary.scanned += 1;

        let text = match extract_file(path) {
            Ok(text) => text,
            Err(e) => {
                eprintln!("Warning: skipping {}: {}", rel, e);
                summary.skipped += 1;
                continue;
            }
        };
        if text.trim().is_empty() {
            summary.skipped += 1;
            continue;
        }

        let (document, created) = store.ingest(rel, &text).await?;
        if !created {
            summary.duplicates += 1;
            continue;
        }
        summary.new_documents += 1;

        let (written, embedded, pending) =
            chunk_embed_store(&store, &config.chunking, &embedder, None, &document.id, &text)
                .await?;
        summary.chunks_written += written as u64;
        summary.embedded += embedded as u64;
        summary.pending += pending as u64;
    }

    println!("ingest {}", config.docs.root.display());
    println!("  scanned: {} files", summary.scanned);
    println!("  new documents: {}", summary.new_documents);
    println!("  unchanged (deduplicated): {}", summary.duplicates);
    println!("  skipped: {}", summary.skipped);
    println!("  chunks written: {}", summary.chunks_written);
    println!("  embedded: {}", summary.embedded);
    println!("  embeddings pending: {}", summary.pending);
    println!("ok");

    pool.close().await;
    Ok(())
}

/// `loom embed` entry point: embed chunks whose vectors are still missing.
pub async fn run_embed_backfill(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = DocumentStore::new(pool.clone());
    let embedder = HttpEmbedder::new(&config.embedding)?;

    let pending = store.pending_chunks().await?;

    if pending.is_empty() {
        println!("embed");
        println!("  all chunks up to date");
        pool.close().await;
        return Ok(());
    }

    let total = pending.len();
    let mut embedded = 0u64;
    let mut failed = 0u64;

    for batch in pending.chunks(config.embedding.batch_size.max(1)) {
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();

        match embedder.embed(&texts).await {
            Ok(vectors) => {
                for (chunk, vector) in batch.iter().zip(vectors.iter()) {
                    store.set_chunk_embedding(&chunk.id, vector).await?;
                    embedded += 1;
                }
            }
            Err(e) => {
                eprintln!("Warning: embedding batch failed: {}", e);
                failed += batch.len() as u64;
            }
        }
    }

    println!("embed");
    println!("  total pending: {}", total);
    println!("  embedded: {}", embedded);
    println!("  failed: {}", failed);

    pool.close().await;
    Ok(())
}

/// Chunk `text`, embed the chunks, persist them, and (when a live index is
/// supplied) insert the embedded chunks into it.
///
/// Returns (chunks written, embedded, pending). Embedding failure downgrades
/// to pending rather than failing the ingest.
pub async fn chunk_embed_store(
    store: &DocumentStore,
    chunking: &ChunkingConfig,
    embedder: &dyn Embedder,
    index: Option<&mut VectorIndex>,
    document_id: &str,
    text: &str,
) -> Result<(usize, usize, usize)> {
    let mut chunks = chunk_text(document_id, text, chunking.chunk_chars, chunking.overlap_chars);
    if chunks.is_empty() {
        return Ok((0, 0, 0));
    }

    let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
    let mut pending = 0usize;

    match embedder.embed(&texts).await {
        Ok(vectors) => {
            for (chunk, vector) in chunks.iter_mut().zip(vectors.into_iter()) {
                chunk.embedding = Some(vector);
            }
        }
        Err(e) => {
            eprintln!(
                "Warning: embedding failed for document {}: {} (chunks left pending)",
                document_id, e
            );
            pending = chunks.len();
        }
    }

    store.insert_chunks(&chunks).await?;

    let embedded = chunks.len() - pending;
    if let Some(index) = index {
        for chunk in &chunks {
            if let Some(vector) = &chunk.embedding {
                if let Err(e) = index.insert(
                    chunk.id.clone(),
                    chunk.document_id.clone(),
                    chunk.text.clone(),
                    vector.clone(),
                ) {
                    eprintln!("Warning: chunk {} not indexed: {}", chunk.id, e);
                }
            }
        }
    }

    Ok((chunks.len(), embedded, pending))
}

/// Walk the docs root applying include/exclude globs. Returns (absolute path,
/// relative path) pairs in deterministic order.
pub fn scan_docs(docs: &DocsConfig) -> Result<Vec<(PathBuf, String)>> {
    if !docs.root.exists() {
        bail!("docs root does not exist: {}", docs.root.display());
    }

    let include_set = build_globset(&docs.include_globs)?;

    let mut default_excludes = vec!["**/.git/**".to_string()];
    default_excludes.extend(docs.exclude_globs.clone());
    let exclude_set = build_globset(&default_excludes)?;

    let mut files = Vec::new();

    for entry in WalkDir::new(&docs.root) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(&docs.root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().replace('\\', "/");

        if exclude_set.is_match(&rel_str) {
            continue;
        }
        if !include_set.is_match(&rel_str) {
            continue;
        }

        files.push((path.to_path_buf(), rel_str));
    }

    files.sort_by(|a, b| a.1.cmp(&b.1));

    Ok(files)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn docs_config(root: &std::path::Path) -> DocsConfig {
        DocsConfig {
            root: root.to_path_buf(),
            include_globs: vec!["**/*.txt".to_string(), "**/*.md".to_string()],
            exclude_globs: vec!["**/drafts/**".to_string()],
        }
    }

    #[test]
    fn test_scan_docs_filters_and_sorts() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("b.txt"), "b").unwrap();
        std::fs::write(tmp.path().join("a.md"), "a").unwrap();
        std::fs::write(tmp.path().join("c.png"), "c").unwrap();
        std::fs::create_dir_all(tmp.path().join("drafts")).unwrap();
        std::fs::write(tmp.path().join("drafts/d.txt"), "d").unwrap();

        let files = scan_docs(&docs_config(tmp.path())).unwrap();
        let rels: Vec<&str> = files.iter().map(|(_, r)| r.as_str()).collect();
        assert_eq!(rels, vec!["a.md", "b.txt"]);
    }

    #[test]
    fn test_scan_docs_missing_root() {
        let tmp = tempfile::tempdir().unwrap();
        let missing = tmp.path().join("nope");
        assert!(scan_docs(&docs_config(&missing)).is_err());
    }
}

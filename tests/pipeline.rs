//! End-to-end pipeline tests against a mock completion server.
//!
//! A tiny in-process axum server stands in for the llama.cpp endpoint so the
//! retrieve → generate → persist flow runs for real, network call included.

use std::path::Path;

use async_trait::async_trait;
use axum::{routing::post, Json, Router};
use storyloom::config::{
    ChunkingConfig, CompletionConfig, Config, DbConfig, DocsConfig, EmbeddingConfig,
    RetrievalConfig, ServerConfig,
};
use storyloom::db;
use storyloom::embedding::Embedder;
use storyloom::errors::IndexError;
use storyloom::generate::{CompletionClient, GenerationMode, StoryStyle};
use storyloom::index::VectorIndex;
use storyloom::migrate;
use storyloom::pipeline::{run_generation, GenerationRequest, PipelineError};
use storyloom::store::{DocumentStore, StoryStore};

const MOCK_STORY: &str = "Once upon a time, a lighthouse keeper found a map.";

/// Serve `POST /v1/chat/completions` with a fixed completion; returns the
/// base URL.
async fn spawn_mock_completion_server() -> String {
    let app = Router::new().route(
        "/v1/chat/completions",
        post(|Json(_body): Json<serde_json::Value>| async {
            Json(serde_json::json!({
                "choices": [
                    { "message": { "role": "assistant", "content": MOCK_STORY } }
                ]
            }))
        }),
    );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    format!("http://{}/v1", addr)
}

fn test_config(root: &Path, completion_base_url: &str) -> Config {
    Config {
        db: DbConfig {
            path: root.join("data/loom.sqlite"),
        },
        docs: DocsConfig {
            root: root.join("docs"),
            include_globs: vec!["**/*.txt".to_string()],
            exclude_globs: vec![],
        },
        chunking: ChunkingConfig::default(),
        retrieval: RetrievalConfig::default(),
        embedding: EmbeddingConfig::default(),
        completion: CompletionConfig {
            base_url: completion_base_url.to_string(),
            model: "test-model".to_string(),
            temperature: 0.9,
            top_p: 0.95,
            max_tokens: 256,
            timeout_secs: 5,
        },
        server: ServerConfig::default(),
    }
}

struct StubEmbedder {
    vector: Vec<f32>,
}

#[async_trait]
impl Embedder for StubEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, IndexError> {
        Ok(texts.iter().map(|_| self.vector.clone()).collect())
    }

    fn dims(&self) -> usize {
        self.vector.len()
    }
}

struct FailingEmbedder;

#[async_trait]
impl Embedder for FailingEmbedder {
    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, IndexError> {
        Err(IndexError::Embedding("connection refused".to_string()))
    }

    fn dims(&self) -> usize {
        2
    }
}

#[tokio::test]
async fn test_generation_succeeds_with_empty_index() {
    let tmp = tempfile::tempdir().unwrap();
    let base_url = spawn_mock_completion_server().await;
    let cfg = test_config(tmp.path(), &base_url);
    migrate::run_migrations(&cfg).await.unwrap();
    let pool = db::connect(&cfg).await.unwrap();

    let documents = DocumentStore::new(pool.clone());
    let stories = StoryStore::new(pool.clone());
    let index = VectorIndex::new();
    let embedder = StubEmbedder { vector: vec![1.0, 0.0] };
    let client = CompletionClient::new(&cfg.completion).unwrap();

    let report = run_generation(
        &cfg,
        &index,
        &embedder,
        &client,
        &documents,
        &stories,
        GenerationRequest {
            prompt: "a lighthouse keeper finds a map",
            style: Some(StoryStyle::Storyteller),
            system_prompt: None,
            mode: GenerationMode::Rag,
        },
    )
    .await
    .unwrap();

    // Zero indexed documents is a valid degraded corpus, not a failure.
    assert_eq!(report.story.response, MOCK_STORY);
    assert!(report.context.is_empty());
    assert!(!report.degraded);

    let persisted = stories.get(&report.story.id).await.unwrap().unwrap();
    assert_eq!(persisted.response, MOCK_STORY);
    assert_eq!(persisted.mode, "rag");
    assert!(!persisted.memory_added);
    assert!(stories.documents(&report.story.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_rag_generation_records_provenance() {
    let tmp = tempfile::tempdir().unwrap();
    let base_url = spawn_mock_completion_server().await;
    let cfg = test_config(tmp.path(), &base_url);
    migrate::run_migrations(&cfg).await.unwrap();
    let pool = db::connect(&cfg).await.unwrap();

    let documents = DocumentStore::new(pool.clone());
    let stories = StoryStore::new(pool.clone());

    let (doc_a, _) = documents.ingest("sea.txt", "about the sea").await.unwrap();
    let (doc_b, _) = documents.ingest("maps.txt", "about maps").await.unwrap();

    let mut index = VectorIndex::new();
    index
        .insert("c1".into(), doc_a.id.clone(), "about the sea".into(), vec![1.0, 0.0])
        .unwrap();
    index
        .insert("c2".into(), doc_b.id.clone(), "about maps".into(), vec![0.9, 0.1])
        .unwrap();

    let embedder = StubEmbedder { vector: vec![1.0, 0.0] };
    let client = CompletionClient::new(&cfg.completion).unwrap();

    let report = run_generation(
        &cfg,
        &index,
        &embedder,
        &client,
        &documents,
        &stories,
        GenerationRequest {
            prompt: "a lighthouse keeper finds a map",
            style: Some(StoryStyle::Storyteller),
            system_prompt: None,
            mode: GenerationMode::Rag,
        },
    )
    .await
    .unwrap();

    assert_eq!(report.context.len(), 2);

    let linked = stories.documents(&report.story.id).await.unwrap();
    assert_eq!(linked.len(), 2);
    let mut filenames: Vec<&str> = linked.iter().map(|d| d.filename.as_str()).collect();
    filenames.sort();
    assert_eq!(filenames, vec!["maps.txt", "sea.txt"]);
}

#[tokio::test]
async fn test_retrieval_failure_degrades_to_prompt_only() {
    let tmp = tempfile::tempdir().unwrap();
    let base_url = spawn_mock_completion_server().await;
    let cfg = test_config(tmp.path(), &base_url);
    migrate::run_migrations(&cfg).await.unwrap();
    let pool = db::connect(&cfg).await.unwrap();

    let documents = DocumentStore::new(pool.clone());
    let stories = StoryStore::new(pool.clone());

    let (doc, _) = documents.ingest("sea.txt", "about the sea").await.unwrap();
    let mut index = VectorIndex::new();
    index
        .insert("c1".into(), doc.id, "about the sea".into(), vec![1.0, 0.0])
        .unwrap();

    let client = CompletionClient::new(&cfg.completion).unwrap();

    let report = run_generation(
        &cfg,
        &index,
        &FailingEmbedder,
        &client,
        &documents,
        &stories,
        GenerationRequest {
            prompt: "p",
            style: None,
            system_prompt: Some("You narrate."),
            mode: GenerationMode::Rag,
        },
    )
    .await
    .unwrap();

    assert!(report.degraded);
    assert!(report.context.is_empty());
    assert_eq!(report.story.response, MOCK_STORY);
    assert!(stories.documents(&report.story.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_generation_failure_is_fatal_and_persists_nothing() {
    let tmp = tempfile::tempdir().unwrap();
    // Nothing listens on port 1; the completion call fails fast.
    let cfg = test_config(tmp.path(), "http://127.0.0.1:1/v1");
    migrate::run_migrations(&cfg).await.unwrap();
    let pool = db::connect(&cfg).await.unwrap();

    let documents = DocumentStore::new(pool.clone());
    let stories = StoryStore::new(pool.clone());
    let index = VectorIndex::new();
    let embedder = StubEmbedder { vector: vec![1.0, 0.0] };
    let client = CompletionClient::new(&cfg.completion).unwrap();

    let err = run_generation(
        &cfg,
        &index,
        &embedder,
        &client,
        &documents,
        &stories,
        GenerationRequest {
            prompt: "p",
            style: None,
            system_prompt: None,
            mode: GenerationMode::Direct,
        },
    )
    .await
    .unwrap_err();

    assert!(matches!(err, PipelineError::Generation(_)));

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM stories")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 0, "abandoned request must leave no side effects");
}

#[tokio::test]
async fn test_persistence_failure_preserves_generated_story() {
    let tmp = tempfile::tempdir().unwrap();
    let base_url = spawn_mock_completion_server().await;
    let cfg = test_config(tmp.path(), &base_url);
    migrate::run_migrations(&cfg).await.unwrap();
    let pool = db::connect(&cfg).await.unwrap();

    let documents = DocumentStore::new(pool.clone());
    let stories = StoryStore::new(pool.clone());

    let (doc, _) = documents.ingest("sea.txt", "about the sea").await.unwrap();
    let mut index = VectorIndex::new();
    index
        .insert("c1".into(), doc.id, "about the sea".into(), vec![1.0, 0.0])
        .unwrap();

    // Sabotage the association table so the save transaction fails after the
    // story insert.
    sqlx::query("DROP TABLE story_documents")
        .execute(&pool)
        .await
        .unwrap();

    let embedder = StubEmbedder { vector: vec![1.0, 0.0] };
    let client = CompletionClient::new(&cfg.completion).unwrap();

    let err = run_generation(
        &cfg,
        &index,
        &embedder,
        &client,
        &documents,
        &stories,
        GenerationRequest {
            prompt: "p",
            style: None,
            system_prompt: None,
            mode: GenerationMode::Rag,
        },
    )
    .await
    .unwrap_err();

    match err {
        PipelineError::Persistence { story, .. } => {
            // The completion result survives the failed save.
            assert_eq!(story.response, MOCK_STORY);
            assert_eq!(story.document_ids.len(), 1);
        }
        other => panic!("expected persistence error, got: {}", other),
    }

    // The story insert was rolled back with the transaction.
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM stories")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 0);
}

#[tokio::test]
async fn test_commit_to_memory() {
    let tmp = tempfile::tempdir().unwrap();
    let base_url = spawn_mock_completion_server().await;
    let cfg = test_config(tmp.path(), &base_url);
    std::fs::create_dir_all(&cfg.docs.root).unwrap();
    migrate::run_migrations(&cfg).await.unwrap();
    let pool = db::connect(&cfg).await.unwrap();

    let documents = DocumentStore::new(pool.clone());
    let stories = StoryStore::new(pool.clone());
    let mut index = VectorIndex::new();
    let embedder = StubEmbedder { vector: vec![1.0, 0.0] };
    let client = CompletionClient::new(&cfg.completion).unwrap();

    let report = run_generation(
        &cfg,
        &index,
        &embedder,
        &client,
        &documents,
        &stories,
        GenerationRequest {
            prompt: "p",
            style: Some(StoryStyle::Noir),
            system_prompt: None,
            mode: GenerationMode::Direct,
        },
    )
    .await
    .unwrap();

    let document = storyloom::pipeline::commit_to_memory(
        &cfg,
        &mut index,
        &embedder,
        &documents,
        &stories,
        &report.story.id,
    )
    .await
    .unwrap();

    // The story text landed in the corpus and in the live index.
    assert_eq!(document.filename, format!("memory/story_{}.txt", report.story.id));
    assert!(cfg.docs.root.join(&document.filename).exists());
    assert!(!index.is_empty());

    let story = stories.get(&report.story.id).await.unwrap().unwrap();
    assert!(story.memory_added);

    // Committing again is a dedup no-op but keeps the flag set.
    storyloom::pipeline::commit_to_memory(
        &cfg,
        &mut index,
        &embedder,
        &documents,
        &stories,
        &report.story.id,
    )
    .await
    .unwrap();

    let doc_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(doc_count, 1);
}

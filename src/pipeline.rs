//! End-to-end generation workflow: retrieve → generate → persist.
//!
//! One request runs sequentially through the three stages; retrieval must
//! finish before generation starts, generation before persistence. Nothing
//! is written until the final atomic save, so a request abandoned at a
//! network call leaves no side effects.
//!
//! Failure policy per stage:
//! - retrieval failure degrades to generation with no context (a valid mode),
//! - generation failure is fatal to the request,
//! - persistence failure is fatal but carries the generated story so the
//!   caller can retry the save without re-calling the completion endpoint.

use std::fmt;

use crate::config::Config;
use crate::embedding::Embedder;
use crate::errors::{GenerationError, StorageError};
use crate::generate::{compose_prompt, CompletionClient, GenerationMode, StoryStyle};
use crate::index::VectorIndex;
use crate::ingest::chunk_embed_store;
use crate::models::{ContextDocument, Document, GeneratedStory, Story};
use crate::retrieve::Retriever;
use crate::store::{DocumentStore, StoryStore};

/// A pipeline failure, tagged with the stage that failed.
#[derive(Debug)]
pub enum PipelineError {
    Generation(GenerationError),
    /// Persistence failed after a successful generation; the generated story
    /// is preserved here so persistence alone can be retried.
    Persistence {
        story: Box<GeneratedStory>,
        source: StorageError,
    },
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::Generation(e) => write!(f, "generation stage failed: {}", e),
            PipelineError::Persistence { source, .. } => {
                write!(f, "persistence stage failed (story text preserved): {}", source)
            }
        }
    }
}

impl std::error::Error for PipelineError {}

/// What a successful request produced.
#[derive(Debug)]
pub struct GenerationReport {
    pub story: Story,
    /// Context that actually reached the model, best rank first.
    pub context: Vec<ContextDocument>,
    /// True when RAG was requested but retrieval failed and the request fell
    /// back to prompt-only generation.
    pub degraded: bool,
}

/// Inputs for one generation request.
pub struct GenerationRequest<'a> {
    pub prompt: &'a str,
    pub style: Option<StoryStyle>,
    pub system_prompt: Option<&'a str>,
    pub mode: GenerationMode,
}

/// Run one request end to end against the shared stores and the live index.
pub async fn run_generation(
    config: &Config,
    index: &VectorIndex,
    embedder: &dyn Embedder,
    client: &CompletionClient,
    documents: &DocumentStore,
    stories: &StoryStore,
    request: GenerationRequest<'_>,
) -> Result<GenerationReport, PipelineError> {
    // Stage 1: retrieval (degrades to empty context, never fatal).
    let mut degraded = false;
    let context = match request.mode {
        GenerationMode::Direct => Vec::new(),
        GenerationMode::Rag => {
            let retriever = Retriever::new(index, embedder, documents);
            match retriever.retrieve(request.prompt, config.retrieval.k).await {
                Ok(context) => context,
                Err(e) => {
                    eprintln!("Warning: retrieval failed, generating without context: {}", e);
                    degraded = true;
                    Vec::new()
                }
            }
        }
    };

    // Stage 2: generation.
    let composed = compose_prompt(
        request.prompt,
        request.style,
        request.system_prompt,
        context,
        config.retrieval.max_context_chars,
    );

    let response = client
        .generate(composed.system.as_deref(), &composed.user)
        .await
        .map_err(PipelineError::Generation)?;

    // Stage 3: atomic persistence of story + provenance.
    let generated = GeneratedStory {
        prompt: request.prompt.to_string(),
        response,
        system_prompt: composed.system.clone(),
        style: request.style.map(|s| s.as_str().to_string()),
        mode: request.mode.as_str().to_string(),
        document_ids: composed
            .kept_context
            .iter()
            .map(|c| c.document.id.clone())
            .collect(),
    };

    let story = stories
        .save(&generated)
        .await
        .map_err(|source| PipelineError::Persistence {
            story: Box::new(generated.clone()),
            source,
        })?;

    Ok(GenerationReport {
        story,
        context: composed.kept_context,
        degraded,
    })
}

/// The explicit "commit to long-term memory" operation.
///
/// Writes the story text into the corpus under `memory/`, ingests it through
/// the normal dedup path so future retrieval can draw on it, and only then
/// flips `memory_added`. A story whose re-embedding failed outright is never
/// marked as remembered.
pub async fn commit_to_memory(
    config: &Config,
    index: &mut VectorIndex,
    embedder: &dyn Embedder,
    documents: &DocumentStore,
    stories: &StoryStore,
    story_id: &str,
) -> anyhow::Result<Document> {
    let story = stories
        .get(story_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("story not found: {}", story_id))?;

    let memory_dir = config.docs.root.join("memory");
    std::fs::create_dir_all(&memory_dir)?;

    let timestamp = chrono::DateTime::from_timestamp(story.created_at, 0)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| story.created_at.to_string());
    let body = format!("[Time: {}]\n\n{}\n", timestamp, story.response);

    let rel = format!("memory/story_{}.txt", story.id);
    std::fs::write(config.docs.root.join(&rel), &body)?;

    let (document, created) = documents.ingest(&rel, &body).await?;
    if created {
        chunk_embed_store(
            documents,
            &config.chunking,
            embedder,
            Some(index),
            &document.id,
            &body,
        )
        .await?;
    }

    stories.mark_memory_added(&story.id).await?;

    Ok(document)
}

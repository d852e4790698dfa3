//! # Storyloom CLI (`loom`)
//!
//! The `loom` binary is the primary interface for Storyloom. It provides
//! commands for database initialization, corpus ingestion, story generation,
//! browsing, analytics, and the read-only HTTP browser.
//!
//! ## Usage
//!
//! ```bash
//! loom --config ./config/loom.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `loom init` | Create the SQLite database and run schema migrations |
//! | `loom ingest` | Scan the docs directory, dedup, chunk, and embed |
//! | `loom embed` | Backfill embeddings for pending chunks |
//! | `loom generate "<prompt>"` | Generate and persist a story |
//! | `loom stories list` | Browse persisted stories |
//! | `loom stories show <id>` | One story with its source documents |
//! | `loom stories export` | Export all stories as JSON or CSV |
//! | `loom docs` | List the ingested corpus |
//! | `loom memory <story-id>` | Commit a story to long-term memory |
//! | `loom stats` | Corpus and story-log statistics |
//! | `loom status` | Health of docs dir, database, and model servers |
//! | `loom serve` | Start the read-only HTTP browser API |

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use storyloom::config;
use storyloom::db;
use storyloom::embedding::HttpEmbedder;
use storyloom::generate::{CompletionClient, GenerationMode, StoryStyle};
use storyloom::index::VectorIndex;
use storyloom::migrate;
use storyloom::pipeline::{self, GenerationRequest, PipelineError};
use storyloom::store::{DocumentStore, StoryStore};
use storyloom::{browse, ingest, server, status};

/// Storyloom — a local-first retrieval-augmented story generator.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file with the docs directory, database path, and model endpoints.
#[derive(Parser)]
#[command(
    name = "loom",
    about = "Storyloom — a local-first retrieval-augmented story generator",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/loom.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables (stories,
    /// documents, story_documents, chunks). Idempotent.
    Init,

    /// Ingest the configured docs directory.
    ///
    /// Walks the docs root, extracts text from txt/md/pdf/docx files,
    /// registers each file by (filename, content hash), and chunks and embeds
    /// new documents. Unchanged files are a no-op.
    Ingest {
        /// Show file and chunk counts without writing to the database.
        #[arg(long)]
        dry_run: bool,
    },

    /// Embed chunks whose vectors are still missing.
    ///
    /// Ingestion leaves chunks pending when the embedding server is down;
    /// this backfills them.
    Embed,

    /// Generate a story and persist it with provenance.
    Generate {
        /// The scene description or writing prompt.
        prompt: String,

        /// Storytelling style: storyteller, chronicler, or noir.
        #[arg(long, default_value = "storyteller")]
        style: String,

        /// Generation mode: `rag` (retrieve document context) or `direct`.
        #[arg(long, default_value = "rag")]
        mode: String,

        /// Custom system prompt, prepended to the style directive.
        #[arg(long)]
        system_prompt: Option<String>,

        /// Override the number of chunks retrieved for context.
        #[arg(short, long)]
        k: Option<usize>,
    },

    /// Browse persisted stories.
    Stories {
        #[command(subcommand)]
        action: StoriesAction,
    },

    /// List the ingested document corpus.
    Docs,

    /// Commit a story to long-term memory.
    ///
    /// Writes the story text into the corpus, indexes it for future
    /// retrieval, and marks the story as remembered. Accepts an id prefix.
    Memory {
        /// Story id (or unambiguous prefix).
        story_id: String,
    },

    /// Corpus and story-log statistics.
    Stats,

    /// Health of the docs directory, database, and model servers.
    Status,

    /// Start the read-only HTTP browser API.
    Serve,
}

/// Story browsing subcommands.
#[derive(Subcommand)]
enum StoriesAction {
    /// List stories, newest first.
    List {
        /// Maximum number of stories to show.
        #[arg(long, default_value_t = 20)]
        limit: i64,

        /// Number of stories to skip.
        #[arg(long, default_value_t = 0)]
        offset: i64,

        /// Only show stories generated with this style.
        #[arg(long)]
        style: Option<String>,

        /// Substring search over prompts and responses.
        #[arg(long)]
        search: Option<String>,
    },

    /// Show one story in full, including its source documents.
    Show {
        /// Story id (or unambiguous prefix).
        id: String,
    },

    /// Export all stories.
    Export {
        /// Export format: json or csv.
        #[arg(long, default_value = "json")]
        format: String,

        /// Write to this file instead of stdout.
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest { dry_run } => {
            ingest::run_ingest(&cfg, dry_run).await?;
        }
        Commands::Embed => {
            ingest::run_embed_backfill(&cfg).await?;
        }
        Commands::Generate {
            prompt,
            style,
            mode,
            system_prompt,
            k,
        } => {
            run_generate(&cfg, &prompt, &style, &mode, system_prompt.as_deref(), k).await?;
        }
        Commands::Stories { action } => match action {
            StoriesAction::List {
                limit,
                offset,
                style,
                search,
            } => {
                browse::run_list(&cfg, limit, offset, style, search).await?;
            }
            StoriesAction::Show { id } => {
                browse::run_show(&cfg, &id).await?;
            }
            StoriesAction::Export { format, output } => {
                browse::run_export(&cfg, &format, output.as_deref()).await?;
            }
        },
        Commands::Docs => {
            browse::run_docs(&cfg).await?;
        }
        Commands::Memory { story_id } => {
            run_memory(&cfg, &story_id).await?;
        }
        Commands::Stats => {
            browse::run_stats(&cfg).await?;
        }
        Commands::Status => {
            status::run_status(&cfg).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}

async fn run_generate(
    cfg: &config::Config,
    prompt: &str,
    style: &str,
    mode: &str,
    system_prompt: Option<&str>,
    k: Option<usize>,
) -> anyhow::Result<()> {
    let style = StoryStyle::parse(style).ok_or_else(|| {
        anyhow::anyhow!(
            "Unknown style: '{}'. Available: storyteller, chronicler, noir",
            style
        )
    })?;
    let mode = GenerationMode::parse(mode)
        .ok_or_else(|| anyhow::anyhow!("Unknown mode: '{}'. Use rag or direct.", mode))?;

    let mut cfg = cfg.clone();
    if let Some(k) = k {
        if k == 0 {
            anyhow::bail!("-k must be >= 1");
        }
        cfg.retrieval.k = k;
    }

    let pool = db::connect(&cfg).await?;
    let documents = DocumentStore::new(pool.clone());
    let stories = StoryStore::new(pool.clone());

    // Explicit index lifecycle: rebuild from the chunks table for this
    // process, then hand the instance to the pipeline.
    let index = VectorIndex::load(&pool).await?;
    let embedder = HttpEmbedder::new(&cfg.embedding)?;
    let client = CompletionClient::new(&cfg.completion)?;

    let request = GenerationRequest {
        prompt,
        style: Some(style),
        system_prompt,
        mode,
    };

    let report = match pipeline::run_generation(
        &cfg, &index, &embedder, &client, &documents, &stories, request,
    )
    .await
    {
        Ok(report) => report,
        Err(PipelineError::Persistence { story, source }) => {
            // The completion succeeded; don't lose it.
            eprintln!("Error: story could not be persisted: {}", source);
            eprintln!("Generated text follows so it is not lost:");
            println!("{}", story.response);
            std::process::exit(1);
        }
        Err(e) => return Err(e.into()),
    };

    println!("{}", report.story.response);
    println!();

    if report.degraded {
        eprintln!("note: retrieval was unavailable; story generated without document context");
    }

    if report.context.is_empty() {
        println!("--- Sources: none ---");
    } else {
        println!("--- Sources ({}) ---", report.context.len());
        for ctx in &report.context {
            println!("  [{:.2}] {}", ctx.score, ctx.document.filename);
        }
    }
    println!();
    println!("story id: {}", report.story.id);

    pool.close().await;
    Ok(())
}

async fn run_memory(cfg: &config::Config, story_id: &str) -> anyhow::Result<()> {
    let pool = db::connect(cfg).await?;
    let documents = DocumentStore::new(pool.clone());
    let stories = StoryStore::new(pool.clone());

    let mut index = VectorIndex::load(&pool).await?;
    let embedder = HttpEmbedder::new(&cfg.embedding)?;

    let story_id = resolve_story_id(&pool, story_id).await?;
    let document = pipeline::commit_to_memory(
        cfg,
        &mut index,
        &embedder,
        &documents,
        &stories,
        &story_id,
    )
    .await?;

    println!("story {} committed to memory as {}", story_id, document.filename);

    pool.close().await;
    Ok(())
}

async fn resolve_story_id(pool: &sqlx::SqlitePool, id: &str) -> anyhow::Result<String> {
    let matches: Vec<String> =
        sqlx::query_scalar("SELECT id FROM stories WHERE id = ? OR id LIKE ? LIMIT 2")
            .bind(id)
            .bind(format!("{}%", id))
            .fetch_all(pool)
            .await?;

    match matches.as_slice() {
        [only] => Ok(only.clone()),
        [] => anyhow::bail!("story not found: {}", id),
        _ => anyhow::bail!("ambiguous story id prefix: {}", id),
    }
}

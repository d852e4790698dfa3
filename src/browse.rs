//! Read-only story browsing, export, and analytics.
//!
//! Everything here consumes the story log and its provenance joins; nothing
//! mutates the stores. Used by the `loom stories` / `loom stats` commands and
//! by the HTTP server.

use anyhow::{bail, Result};
use serde::Serialize;
use sqlx::{Row, SqlitePool};
use std::path::Path;

use crate::config::Config;
use crate::db;
use crate::models::Story;
use crate::store::StoryStore;

/// A story with its provenance, as exposed to the browser and exports.
#[derive(Debug, Clone, Serialize)]
pub struct StoryRecord {
    pub id: String,
    pub prompt: String,
    pub response: String,
    pub system_prompt: Option<String>,
    pub style: Option<String>,
    pub created_at: String, // ISO8601
    pub mode: String,
    pub memory_added: bool,
    /// Filenames of the documents that contributed context.
    pub documents: Vec<String>,
}

impl StoryRecord {
    pub async fn build(store: &StoryStore, story: Story) -> Result<Self> {
        let documents = store
            .documents(&story.id)
            .await?
            .into_iter()
            .map(|d| d.filename)
            .collect();

        Ok(Self {
            id: story.id,
            prompt: story.prompt,
            response: story.response,
            system_prompt: story.system_prompt,
            style: story.style,
            created_at: format_ts_iso(story.created_at),
            mode: story.mode,
            memory_added: story.memory_added,
            documents,
        })
    }
}

/// `loom stories list` — paginated listing with optional style filter and
/// substring search.
pub async fn run_list(
    config: &Config,
    limit: i64,
    offset: i64,
    style: Option<String>,
    search: Option<String>,
) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = StoryStore::new(pool.clone());

    let stories = match (&search, &style) {
        (Some(query), _) => store.search(query, limit, offset).await?,
        (None, Some(style)) => store.by_style(style, limit, offset).await?,
        (None, None) => store.list(limit, offset).await?,
    };

    if stories.is_empty() {
        println!("No stories found.");
        pool.close().await;
        return Ok(());
    }

    for story in &stories {
        let style_display = story.style.as_deref().unwrap_or("-");
        let memory = if story.memory_added { "memory" } else { "" };
        println!(
            "{}  {}  [{} / {}] {}",
            &story.id[..8],
            format_ts_iso(story.created_at),
            style_display,
            story.mode,
            memory
        );
        println!("    prompt: {}", excerpt(&story.prompt, 96));
        println!("    story:  {}", excerpt(&story.response, 96));
        println!();
    }

    pool.close().await;
    Ok(())
}

/// `loom stories show <id>` — full story with provenance. Accepts an id
/// prefix as long as it is unambiguous.
pub async fn run_show(config: &Config, id: &str) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = StoryStore::new(pool.clone());

    let story = match resolve_story(&store, &pool, id).await? {
        Some(story) => story,
        None => {
            pool.close().await;
            bail!("story not found: {}", id);
        }
    };
    let record = StoryRecord::build(&store, story).await?;

    println!("--- Story {} ---", record.id);
    println!("created:      {}", record.created_at);
    println!("mode:         {}", record.mode);
    println!("style:        {}", record.style.as_deref().unwrap_or("-"));
    println!("memory_added: {}", if record.memory_added { "yes" } else { "no" });
    if let Some(ref sp) = record.system_prompt {
        println!("system:       {}", excerpt(sp, 120));
    }
    println!();
    println!("--- Prompt ---");
    println!("{}", record.prompt);
    println!();
    println!("--- Response ---");
    println!("{}", record.response);
    println!();

    if record.documents.is_empty() {
        println!("--- Sources: none ---");
    } else {
        println!("--- Sources ({}) ---", record.documents.len());
        for filename in &record.documents {
            println!("  {}", filename);
        }
    }

    pool.close().await;
    Ok(())
}

/// `loom stories export` — all stories, newest first, as JSON or CSV.
///
/// Writes to `output` when given, stdout otherwise.
pub async fn run_export(config: &Config, format: &str, output: Option<&Path>) -> Result<()> {
    match format {
        "json" | "csv" => {}
        other => bail!("Unsupported export format: {}. Use json or csv.", other),
    }

    let pool = db::connect(config).await?;
    let store = StoryStore::new(pool.clone());

    let stories = store.list(i64::MAX, 0).await?;
    let mut records = Vec::with_capacity(stories.len());
    for story in stories {
        records.push(StoryRecord::build(&store, story).await?);
    }

    let rendered = match format {
        "json" => serde_json::to_string_pretty(&records)?,
        _ => render_csv(&records),
    };

    match output {
        Some(path) => {
            std::fs::write(path, &rendered)?;
            println!("exported {} stories to {}", records.len(), path.display());
        }
        None => println!("{}", rendered),
    }

    pool.close().await;
    Ok(())
}

fn render_csv(records: &[StoryRecord]) -> String {
    let mut out = String::from(
        "id,prompt,response,system_prompt,style,created_at,mode,memory_added,documents\n",
    );
    for r in records {
        let row = [
            r.id.clone(),
            r.prompt.clone(),
            r.response.clone(),
            r.system_prompt.clone().unwrap_or_default(),
            r.style.clone().unwrap_or_default(),
            r.created_at.clone(),
            r.mode.clone(),
            r.memory_added.to_string(),
            r.documents.join(";"),
        ];
        let escaped: Vec<String> = row.iter().map(|f| csv_field(f)).collect();
        out.push_str(&escaped.join(","));
        out.push('\n');
    }
    out
}

fn csv_field(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// `loom docs` — list the ingested corpus.
pub async fn run_docs(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = crate::store::DocumentStore::new(pool.clone());

    let documents = store.list().await?;
    if documents.is_empty() {
        println!("No documents ingested.");
        pool.close().await;
        return Ok(());
    }

    println!("{:<10} {:<40} {:<12} INGESTED", "ID", "FILENAME", "HASH");
    for doc in &documents {
        println!(
            "{:<10} {:<40} {:<12} {}",
            &doc.id[..8],
            doc.filename,
            &doc.file_hash[..10],
            format_ts_iso(doc.created_at)
        );
    }

    pool.close().await;
    Ok(())
}

/// Database-wide analytics, shared by `loom stats` and `GET /stats`.
#[derive(Debug, Serialize)]
pub struct Statistics {
    pub total_stories: i64,
    pub total_documents: i64,
    pub stories_in_memory: i64,
    pub avg_response_chars: i64,
    pub stories_by_style: Vec<(String, i64)>,
    pub stories_by_mode: Vec<(String, i64)>,
    pub stories_last_7_days: Vec<(String, i64)>,
    pub most_used_documents: Vec<(String, i64)>,
}

pub async fn gather_statistics(pool: &SqlitePool) -> Result<Statistics> {
    let total_stories: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM stories")
        .fetch_one(pool)
        .await?;

    let total_documents: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
        .fetch_one(pool)
        .await?;

    let stories_in_memory: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM stories WHERE memory_added = 1")
            .fetch_one(pool)
            .await?;

    let avg_response_chars: i64 =
        sqlx::query_scalar("SELECT CAST(COALESCE(AVG(LENGTH(response)), 0) AS INTEGER) FROM stories")
            .fetch_one(pool)
            .await?;

    let stories_by_style = two_column(
        pool,
        "SELECT COALESCE(style, '(none)'), COUNT(*) FROM stories GROUP BY style ORDER BY COUNT(*) DESC",
    )
    .await?;

    let stories_by_mode = two_column(
        pool,
        "SELECT mode, COUNT(*) FROM stories GROUP BY mode ORDER BY COUNT(*) DESC",
    )
    .await?;

    let stories_last_7_days = two_column(
        pool,
        "SELECT strftime('%Y-%m-%d', created_at, 'unixepoch') AS day, COUNT(*) \
         FROM stories GROUP BY day ORDER BY day DESC LIMIT 7",
    )
    .await?;

    let most_used_documents = two_column(
        pool,
        "SELECT d.filename, COUNT(*) AS usage_count \
         FROM documents d JOIN story_documents sd ON d.id = sd.document_id \
         GROUP BY d.id ORDER BY usage_count DESC, d.filename LIMIT 5",
    )
    .await?;

    Ok(Statistics {
        total_stories,
        total_documents,
        stories_in_memory,
        avg_response_chars,
        stories_by_style,
        stories_by_mode,
        stories_last_7_days,
        most_used_documents,
    })
}

async fn two_column(pool: &SqlitePool, sql: &str) -> Result<Vec<(String, i64)>> {
    let rows = sqlx::query(sql).fetch_all(pool).await?;
    Ok(rows
        .iter()
        .map(|row| (row.get::<String, _>(0), row.get::<i64, _>(1)))
        .collect())
}

/// `loom stats` — print the analytics summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let stats = gather_statistics(&pool).await?;

    println!("Storyloom — Stats");
    println!("=================");
    println!();
    println!("  Stories:          {}", stats.total_stories);
    println!("  Documents:        {}", stats.total_documents);
    println!("  In memory:        {}", stats.stories_in_memory);
    println!("  Avg story length: {} chars", stats.avg_response_chars);

    if !stats.stories_by_style.is_empty() {
        println!();
        println!("  By style:");
        for (style, count) in &stats.stories_by_style {
            println!("    {:<16} {}", style, count);
        }
    }

    if !stats.stories_by_mode.is_empty() {
        println!();
        println!("  By mode:");
        for (mode, count) in &stats.stories_by_mode {
            println!("    {:<16} {}", mode, count);
        }
    }

    if !stats.stories_last_7_days.is_empty() {
        println!();
        println!("  Recent activity:");
        for (day, count) in &stats.stories_last_7_days {
            println!("    {}  {}", day, count);
        }
    }

    if !stats.most_used_documents.is_empty() {
        println!();
        println!("  Most used documents:");
        for (filename, count) in &stats.most_used_documents {
            println!("    {:<32} {}", filename, count);
        }
    }

    pool.close().await;
    Ok(())
}

/// Look a story up by full id, falling back to unique-prefix match.
async fn resolve_story(
    store: &StoryStore,
    pool: &SqlitePool,
    id: &str,
) -> Result<Option<Story>> {
    if let Some(story) = store.get(id).await? {
        return Ok(Some(story));
    }

    let matches: Vec<String> =
        sqlx::query_scalar("SELECT id FROM stories WHERE id LIKE ? LIMIT 2")
            .bind(format!("{}%", id))
            .fetch_all(pool)
            .await?;

    match matches.as_slice() {
        [only] => Ok(store.get(only).await?),
        [_, _, ..] => bail!("ambiguous story id prefix: {}", id),
        [] => Ok(None),
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| ts.to_string())
}

fn excerpt(text: &str, max_chars: usize) -> String {
    let flat = text.replace('\n', " ");
    let trimmed = flat.trim();
    if trimmed.chars().count() <= max_chars {
        return trimmed.to_string();
    }
    let cut: String = trimmed.chars().take(max_chars).collect();
    format!("{}…", cut)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_csv_field_escaping() {
        assert_eq!(csv_field("plain"), "plain");
        assert_eq!(csv_field("a,b"), "\"a,b\"");
        assert_eq!(csv_field("say \"hi\""), "\"say \"\"hi\"\"\"");
        assert_eq!(csv_field("line\nbreak"), "\"line\nbreak\"");
    }

    #[test]
    fn test_excerpt_truncates_on_char_boundary() {
        assert_eq!(excerpt("short", 10), "short");
        let long = "é".repeat(20);
        let cut = excerpt(&long, 10);
        assert!(cut.starts_with(&"é".repeat(10)));
        assert!(cut.ends_with('…'));
    }
}

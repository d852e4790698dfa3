use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub docs: DocsConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    pub completion: CompletionConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

/// Local document corpus settings.
#[derive(Debug, Deserialize, Clone)]
pub struct DocsConfig {
    /// Root directory scanned by `loom ingest`.
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
}

fn default_include_globs() -> Vec<String> {
    vec![
        "**/*.txt".to_string(),
        "**/*.md".to_string(),
        "**/*.pdf".to_string(),
        "**/*.docx".to_string(),
    ]
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    /// Window size in characters.
    #[serde(default = "default_chunk_chars")]
    pub chunk_chars: usize,
    /// Overlap carried from the end of one window into the next.
    #[serde(default = "default_overlap_chars")]
    pub overlap_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_chars: default_chunk_chars(),
            overlap_chars: default_overlap_chars(),
        }
    }
}

fn default_chunk_chars() -> usize {
    500
}
fn default_overlap_chars() -> usize {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Number of chunks fetched from the vector index per query.
    #[serde(default = "default_k")]
    pub k: usize,
    /// Character budget for retrieved context in the composed prompt.
    #[serde(default = "default_max_context_chars")]
    pub max_context_chars: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            k: default_k(),
            max_context_chars: default_max_context_chars(),
        }
    }
}

fn default_k() -> usize {
    3
}
fn default_max_context_chars() -> usize {
    6000
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// OpenAI-compatible API root, e.g. `http://localhost:8000/v1`.
    #[serde(default = "default_embedding_base_url")]
    pub base_url: String,
    pub model: String,
    pub dims: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_embed_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: default_embedding_base_url(),
            model: "all-MiniLM-L6-v2".to_string(),
            dims: 384,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_embed_timeout_secs(),
        }
    }
}

fn default_embedding_base_url() -> String {
    "http://localhost:8000/v1".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_embed_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct CompletionConfig {
    /// OpenAI-compatible API root of the local llama.cpp-style server.
    #[serde(default = "default_completion_base_url")]
    pub base_url: String,
    /// Alias of the loaded model to request.
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_top_p")]
    pub top_p: f64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_completion_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_completion_base_url() -> String {
    "http://localhost:8000/v1".to_string()
}
fn default_temperature() -> f64 {
    0.9
}
fn default_top_p() -> f64 {
    0.95
}
fn default_max_tokens() -> u32 {
    1500
}
fn default_completion_timeout_secs() -> u64 {
    300
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7341".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.chunking.chunk_chars == 0 {
        anyhow::bail!("chunking.chunk_chars must be > 0");
    }
    if config.chunking.overlap_chars >= config.chunking.chunk_chars {
        anyhow::bail!("chunking.overlap_chars must be smaller than chunk_chars");
    }
    if config.retrieval.k == 0 {
        anyhow::bail!("retrieval.k must be >= 1");
    }
    if config.embedding.dims == 0 {
        anyhow::bail!("embedding.dims must be > 0");
    }
    if config.embedding.model.is_empty() {
        anyhow::bail!("embedding.model must be specified");
    }
    if config.completion.model.is_empty() {
        anyhow::bail!("completion.model must be specified");
    }
    if !(0.0..=2.0).contains(&config.completion.temperature) {
        anyhow::bail!("completion.temperature must be in [0.0, 2.0]");
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("loom.toml");
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_minimal_config_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_config(
            tmp.path(),
            r#"
[db]
path = "stories.sqlite"

[docs]
root = "./docs"

[embedding]
model = "all-MiniLM-L6-v2"
dims = 384

[completion]
model = "local-llama"
"#,
        );
        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.chunking.chunk_chars, 500);
        assert_eq!(cfg.chunking.overlap_chars, 50);
        assert_eq!(cfg.retrieval.k, 3);
        assert_eq!(cfg.completion.max_tokens, 1500);
        assert!(cfg.docs.include_globs.iter().any(|g| g.ends_with("*.txt")));
    }

    #[test]
    fn test_overlap_must_be_smaller_than_window() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_config(
            tmp.path(),
            r#"
[db]
path = "stories.sqlite"

[docs]
root = "./docs"

[chunking]
chunk_chars = 100
overlap_chars = 100

[embedding]
model = "m"
dims = 8

[completion]
model = "local-llama"
"#,
        );
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn test_zero_dims_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_config(
            tmp.path(),
            r#"
[db]
path = "stories.sqlite"

[docs]
root = "./docs"

[embedding]
model = "m"
dims = 0

[completion]
model = "local-llama"
"#,
        );
        assert!(load_config(&path).is_err());
    }
}

//! Health overview of the pieces a generation request depends on.
//!
//! `loom status` checks the docs directory, the database, the completion
//! server (including whether the configured model alias is actually loaded),
//! and the embedding server. A failing line tells the user which stage of a
//! future request would break.

use anyhow::Result;

use crate::config::Config;
use crate::db;
use crate::embedding::{Embedder, HttpEmbedder};
use crate::generate::CompletionClient;

pub async fn run_status(config: &Config) -> Result<()> {
    println!("{:<14} {:<10} DETAIL", "COMPONENT", "STATUS");

    // Docs directory
    if config.docs.root.exists() {
        println!(
            "{:<14} {:<10} {}",
            "docs",
            "OK",
            config.docs.root.display()
        );
    } else {
        println!(
            "{:<14} {:<10} root does not exist: {}",
            "docs",
            "FAIL",
            config.docs.root.display()
        );
    }

    // Database
    match check_database(config).await {
        Ok((stories, documents)) => println!(
            "{:<14} {:<10} {} stories, {} documents",
            "database", "OK", stories, documents
        ),
        Err(e) => println!("{:<14} {:<10} {}", "database", "FAIL", e),
    }

    // Completion server
    match CompletionClient::new(&config.completion) {
        Ok(client) => match client.list_models().await {
            Ok(models) => {
                if models.iter().any(|m| m == client.model()) {
                    println!(
                        "{:<14} {:<10} model '{}' loaded",
                        "completion",
                        "OK",
                        client.model()
                    );
                } else {
                    println!(
                        "{:<14} {:<10} model '{}' not in loaded models: {:?}",
                        "completion",
                        "FAIL",
                        client.model(),
                        models
                    );
                }
            }
            Err(e) => println!("{:<14} {:<10} {}", "completion", "FAIL", e),
        },
        Err(e) => println!("{:<14} {:<10} {}", "completion", "FAIL", e),
    }

    // Embedding server
    match HttpEmbedder::new(&config.embedding) {
        Ok(embedder) => match embedder.embed_query("storyloom healthcheck").await {
            Ok(vector) => {
                if vector.len() == config.embedding.dims {
                    println!(
                        "{:<14} {:<10} {} dims via {}",
                        "embedding",
                        "OK",
                        vector.len(),
                        config.embedding.model
                    );
                } else {
                    println!(
                        "{:<14} {:<10} server returned {} dims, config says {}",
                        "embedding",
                        "FAIL",
                        vector.len(),
                        config.embedding.dims
                    );
                }
            }
            Err(e) => println!("{:<14} {:<10} {}", "embedding", "FAIL", e),
        },
        Err(e) => println!("{:<14} {:<10} {}", "embedding", "FAIL", e),
    }

    Ok(())
}

async fn check_database(config: &Config) -> Result<(i64, i64)> {
    let pool = db::connect(config).await?;
    let stories: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM stories")
        .fetch_one(&pool)
        .await?;
    let documents: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
        .fetch_one(&pool)
        .await?;
    pool.close().await;
    Ok((stories, documents))
}

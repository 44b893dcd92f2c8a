//! Service statistics overview.
//!
//! Prints a quick summary of cached documents, logged queries, and the
//! remote vector index. Used by `docqa stats` to give confidence that
//! ingestion and indexing are working as expected.

use anyhow::Result;

use crate::config::Config;
use crate::db;
use crate::index::{PineconeIndex, VectorIndex};
use crate::models::IndexStats;

/// Run the stats command: query the database and index and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(&config.db.path).await?;

    let cached_documents: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM document_cache")
        .fetch_one(&pool)
        .await?;

    let logged_queries: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM query_log")
        .fetch_one(&pool)
        .await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("docqa Service Stats");
    println!("===================");
    println!();
    println!("  Database:          {}", config.db.path.display());
    println!("  Size:              {}", format_bytes(db_size));
    println!();
    println!("  Cached documents:  {}", cached_documents);
    println!("  Logged queries:    {}", logged_queries);
    println!();

    // Index stats are advisory; an unreachable index is reported, not fatal.
    match PineconeIndex::connect(&config.pinecone, config.gemini.dims).await {
        Ok(index) => match index.stats().await {
            IndexStats::Ready {
                total_vectors,
                dimension,
                index_fullness,
            } => {
                println!("  Index vectors:     {}", total_vectors);
                println!("  Index dimension:   {}", dimension);
                println!("  Index fullness:    {:.1}%", index_fullness * 100.0);
            }
            IndexStats::Unavailable { error } => {
                println!("  Index:             unavailable ({})", error);
            }
        },
        Err(e) => {
            println!("  Index:             unavailable ({})", e);
        }
    }

    println!();

    pool.close().await;
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

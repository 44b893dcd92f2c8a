use anyhow::Result;
use sqlx::SqlitePool;

/// Create the document cache and query log tables. Idempotent.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // One row per distinct document URL once successfully ingested; the sole
    // gate deciding whether re-ingestion is skipped.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS document_cache (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            document_url TEXT NOT NULL,
            document_hash TEXT NOT NULL UNIQUE,
            processed_at INTEGER NOT NULL,
            chunk_count INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS query_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            document_url TEXT NOT NULL,
            question TEXT NOT NULL,
            answer TEXT NOT NULL,
            sources TEXT NOT NULL,
            processing_time_ms INTEGER NOT NULL,
            confidence_score TEXT,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_document_cache_url ON document_cache(document_url)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_query_log_url ON query_log(document_url)")
        .execute(pool)
        .await?;

    Ok(())
}

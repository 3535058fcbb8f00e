//! Document management commands: `documents`, `get`, and `delete`.
//!
//! These only touch the store; no embedding service is started.
//!
//! ```bash
//! docintel documents
//! docintel get 550e8400-e29b-41d4-a716-446655440000
//! docintel delete 550e8400-e29b-41d4-a716-446655440000
//! ```

use anyhow::{bail, Result};

use docintel_core::store::{ChunkFilter, Store};

use crate::config::Config;
use crate::db;
use crate::migrate;
use crate::sqlite_store::SqliteStore;

async fn open_store(config: &Config) -> Result<SqliteStore> {
    let pool = db::connect(config).await?;
    migrate::migrate_pool(&pool).await?;
    Ok(SqliteStore::new(pool))
}

/// `docintel documents`: list ingested documents, newest first.
pub async fn run_list(config: &Config, json: bool) -> Result<()> {
    let store = open_store(config).await?;
    let docs = store.list_documents().await?;
    store.pool().close().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&docs)?);
        return Ok(());
    }

    if docs.is_empty() {
        println!("No documents.");
        return Ok(());
    }

    println!(
        "{:<36}  {:<10} {:>6} {:>10}  {}",
        "ID", "DOMAIN", "PAGES", "SIZE", "TITLE"
    );
    for doc in &docs {
        println!(
            "{:<36}  {:<10} {:>6} {:>10}  {}",
            doc.id,
            doc.domain,
            doc.page_count,
            format_bytes(doc.size_bytes),
            doc.title
        );
    }
    println!();
    println!("{} document(s)", docs.len());
    Ok(())
}

/// `docintel get <id>`: print metadata, chunks, and the full text.
pub async fn run_get(config: &Config, id: &str) -> Result<()> {
    let store = open_store(config).await?;
    let doc = store.get_document(id).await?;
    let chunks = store.get_chunks(&ChunkFilter::document(id)).await?;
    store.pool().close().await;

    let doc = match doc {
        Some(d) => d,
        None => bail!("document not found: {}", id),
    };

    println!("--- Document ---");
    println!("id:           {}", doc.id);
    println!("title:        {}", doc.title);
    println!("domain:       {}", doc.domain);
    println!("pages:        {}", doc.page_count);
    println!("size:         {}", format_bytes(doc.size_bytes));
    println!(
        "created_at:   {}",
        chrono::DateTime::from_timestamp(doc.created_at, 0)
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| doc.created_at.to_string())
    );
    println!();

    println!("--- Chunks ({}) ---", chunks.len());
    for chunk in &chunks {
        println!(
            "[chunk {}] pages {}-{}  ~{} tokens{}",
            chunk.chunk_index,
            chunk.start_page,
            chunk.end_page,
            chunk.token_count,
            if chunk.overlap_with_previous {
                "  (overlap)"
            } else {
                ""
            }
        );
    }
    println!();

    println!("--- Text ---");
    println!("{}", doc.full_text);

    Ok(())
}

/// `docintel delete <id>`: remove a document with its chunks and embeddings.
pub async fn run_delete(config: &Config, id: &str) -> Result<()> {
    let store = open_store(config).await?;
    let removed = store.delete_document(id).await?;
    store.pool().close().await;

    if !removed {
        bail!("document not found: {}", id);
    }
    println!("Deleted {}", id);
    Ok(())
}

/// `docintel stats`: row counts and database size.
pub async fn run_stats(config: &Config) -> Result<()> {
    let store = open_store(config).await?;
    let stats = store.stats().await?;
    store.pool().close().await;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("DocIntel — Index Stats");
    println!("======================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!("  Documents:   {}", stats.documents);
    println!("  Chunks:      {}", stats.chunks);
    println!(
        "  Embedded:    {} / {} ({}%)",
        stats.embeddings,
        stats.chunks,
        if stats.chunks > 0 {
            (stats.embeddings * 100) / stats.chunks
        } else {
            0
        }
    );
    println!(
        "  Embeddings:  {}",
        if config.embedding.is_enabled() {
            config.embedding.provider.as_str()
        } else {
            "disabled"
        }
    );
    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

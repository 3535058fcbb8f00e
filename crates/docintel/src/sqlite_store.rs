//! SQLite-backed [`Store`] implementation.
//!
//! Maps each [`Store`] operation onto the schema created by
//! [`crate::migrate`]: `documents`, `chunks`, and `embeddings`. Vectors are
//! stored as little-endian f32 BLOBs next to their model tag.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use docintel_core::embedding::{blob_to_vec, vec_to_blob};
use docintel_core::models::{Chunk, Document, Domain, Embedding, Page};
use docintel_core::store::{ChunkFilter, DocumentSummary, Store, StoreStats};

/// SQLite implementation of the [`Store`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn parse_domain(raw: &str) -> Domain {
    raw.parse().unwrap_or_default()
}

fn row_to_chunk(row: &SqliteRow) -> Chunk {
    let overlap: i64 = row.get("overlap_with_previous");
    Chunk {
        id: row.get("id"),
        document_id: row.get("document_id"),
        chunk_index: row.get("chunk_index"),
        text: row.get("text"),
        start_page: row.get::<i64, _>("start_page") as u32,
        end_page: row.get::<i64, _>("end_page") as u32,
        token_count: row.get::<i64, _>("token_count") as usize,
        overlap_with_previous: overlap != 0,
        hash: row.get("hash"),
    }
}

const CHUNK_COLUMNS: &str = "id, document_id, chunk_index, text, start_page, end_page, \
                             token_count, overlap_with_previous, hash";

#[async_trait]
impl Store for SqliteStore {
    async fn add_document(&self, doc: &Document) -> Result<String> {
        let pages_json = serde_json::to_string(&doc.pages)?;
        sqlx::query(
            r#"
            INSERT INTO documents (id, domain, title, full_text, pages_json,
                                   page_count, size_bytes, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&doc.id)
        .bind(doc.domain.as_str())
        .bind(&doc.title)
        .bind(&doc.full_text)
        .bind(&pages_json)
        .bind(doc.page_count as i64)
        .bind(doc.size_bytes as i64)
        .bind(doc.created_at)
        .execute(&self.pool)
        .await?;

        Ok(doc.id.clone())
    }

    async fn get_document(&self, id: &str) -> Result<Option<Document>> {
        let row = sqlx::query(
            "SELECT id, domain, title, full_text, pages_json, page_count, size_bytes, created_at \
             FROM documents WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let row = match row {
            Some(row) => row,
            None => return Ok(None),
        };

        let pages_json: String = row.get("pages_json");
        let pages: Vec<Page> = serde_json::from_str(&pages_json)
            .with_context(|| format!("corrupt page data for document {}", id))?;
        let domain: String = row.get("domain");

        Ok(Some(Document {
            id: row.get("id"),
            domain: parse_domain(&domain),
            title: row.get("title"),
            full_text: row.get("full_text"),
            pages,
            page_count: row.get::<i64, _>("page_count") as u32,
            size_bytes: row.get::<i64, _>("size_bytes") as u64,
            created_at: row.get("created_at"),
        }))
    }

    async fn list_documents(&self) -> Result<Vec<DocumentSummary>> {
        let rows = sqlx::query(
            "SELECT id, domain, title, page_count, size_bytes, created_at \
             FROM documents ORDER BY created_at DESC, id ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let domain: String = row.get("domain");
                DocumentSummary {
                    id: row.get("id"),
                    title: row.get("title"),
                    domain: parse_domain(&domain),
                    page_count: row.get::<i64, _>("page_count") as u32,
                    size_bytes: row.get::<i64, _>("size_bytes") as u64,
                    created_at: row.get("created_at"),
                }
            })
            .collect())
    }

    async fn delete_document(&self, id: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM embeddings WHERE document_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM chunks WHERE document_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        let removed = sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(removed.rows_affected() > 0)
    }

    async fn add_chunk(&self, chunk: &Chunk) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO chunks (id, document_id, chunk_index, text, start_page, end_page,
                                token_count, overlap_with_previous, hash)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                text = excluded.text,
                start_page = excluded.start_page,
                end_page = excluded.end_page,
                token_count = excluded.token_count,
                overlap_with_previous = excluded.overlap_with_previous,
                hash = excluded.hash
            "#,
        )
        .bind(&chunk.id)
        .bind(&chunk.document_id)
        .bind(chunk.chunk_index)
        .bind(&chunk.text)
        .bind(chunk.start_page as i64)
        .bind(chunk.end_page as i64)
        .bind(chunk.token_count as i64)
        .bind(chunk.overlap_with_previous as i64)
        .bind(&chunk.hash)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_chunk(&self, id: &str) -> Result<Option<Chunk>> {
        let row = sqlx::query(&format!("SELECT {} FROM chunks WHERE id = ?", CHUNK_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(row_to_chunk))
    }

    async fn get_chunks(&self, filter: &ChunkFilter) -> Result<Vec<Chunk>> {
        let rows = match &filter.document_id {
            Some(doc_id) => {
                sqlx::query(&format!(
                    "SELECT {} FROM chunks WHERE document_id = ? ORDER BY chunk_index ASC",
                    CHUNK_COLUMNS
                ))
                .bind(doc_id)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {} FROM chunks ORDER BY document_id ASC, chunk_index ASC",
                    CHUNK_COLUMNS
                ))
                .fetch_all(&self.pool)
                .await?
            }
        };
        Ok(rows.iter().map(row_to_chunk).collect())
    }

    async fn add_embedding(
        &self,
        chunk_id: &str,
        document_id: &str,
        vector: &[f32],
        model: &str,
    ) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let blob = vec_to_blob(vector);

        sqlx::query(
            r#"
            INSERT INTO embeddings (chunk_id, document_id, model, dims, embedding, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(chunk_id) DO UPDATE SET
                document_id = excluded.document_id,
                model = excluded.model,
                dims = excluded.dims,
                embedding = excluded.embedding,
                created_at = excluded.created_at
            "#,
        )
        .bind(chunk_id)
        .bind(document_id)
        .bind(model)
        .bind(vector.len() as i64)
        .bind(&blob)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_embeddings(&self, document_id: Option<&str>) -> Result<Vec<Embedding>> {
        // rowid order keeps ties in insertion order during ranking.
        let rows = match document_id {
            Some(doc_id) => {
                sqlx::query(
                    "SELECT chunk_id, document_id, model, dims, embedding FROM embeddings \
                     WHERE document_id = ? ORDER BY rowid ASC",
                )
                .bind(doc_id)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT chunk_id, document_id, model, dims, embedding FROM embeddings \
                     ORDER BY rowid ASC",
                )
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                Embedding {
                    chunk_id: row.get("chunk_id"),
                    document_id: row.get("document_id"),
                    model: row.get("model"),
                    dims: row.get::<i64, _>("dims") as usize,
                    vector: blob_to_vec(&blob),
                }
            })
            .collect())
    }

    async fn stats(&self) -> Result<StoreStats> {
        let documents: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
            .fetch_one(&self.pool)
            .await?;
        let chunks: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await?;
        let embeddings: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM embeddings")
            .fetch_one(&self.pool)
            .await?;

        Ok(StoreStats {
            documents: documents as u64,
            chunks: chunks as u64,
            embeddings: embeddings as u64,
        })
    }
}

//! Storage abstraction for DocIntel.
//!
//! The [`Store`] trait defines every persistence operation the ingestion and
//! retrieval pipeline needs, so backends (SQLite, in-memory) are pluggable.
//! The pipeline assumes no transactional guarantees across calls.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

use crate::models::{Chunk, Document, Domain, Embedding};

/// Filter for [`Store::get_chunks`].
#[derive(Debug, Clone, Default)]
pub struct ChunkFilter {
    /// Only chunks belonging to this document.
    pub document_id: Option<String>,
}

impl ChunkFilter {
    pub fn document(id: &str) -> Self {
        Self {
            document_id: Some(id.to_string()),
        }
    }
}

/// Lightweight document listing entry (no body text).
#[derive(Debug, Clone, Serialize)]
pub struct DocumentSummary {
    pub id: String,
    pub title: String,
    pub domain: Domain,
    pub page_count: u32,
    pub size_bytes: u64,
    pub created_at: i64,
}

impl From<&Document> for DocumentSummary {
    fn from(doc: &Document) -> Self {
        Self {
            id: doc.id.clone(),
            title: doc.title.clone(),
            domain: doc.domain,
            page_count: doc.page_count,
            size_bytes: doc.size_bytes,
            created_at: doc.created_at,
        }
    }
}

/// Row counts across the store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub documents: u64,
    pub chunks: u64,
    pub embeddings: u64,
}

/// Abstract storage backend.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`add_document`](Store::add_document) | Persist a document record |
/// | [`get_document`](Store::get_document) | Fetch a document by ID |
/// | [`list_documents`](Store::list_documents) | List document summaries, newest first |
/// | [`delete_document`](Store::delete_document) | Remove embeddings, chunks, then the document |
/// | [`add_chunk`](Store::add_chunk) | Persist one chunk |
/// | [`get_chunk`](Store::get_chunk) | Fetch a chunk by ID |
/// | [`get_chunks`](Store::get_chunks) | Fetch chunks, ordered by document then index |
/// | [`add_embedding`](Store::add_embedding) | Store a vector tagged with its model |
/// | [`get_embeddings`](Store::get_embeddings) | Fetch vectors, optionally for one document |
/// | [`stats`](Store::stats) | Row counts |
#[async_trait]
pub trait Store: Send + Sync {
    /// Persist a document. Returns its ID.
    async fn add_document(&self, doc: &Document) -> Result<String>;

    async fn get_document(&self, id: &str) -> Result<Option<Document>>;

    async fn list_documents(&self) -> Result<Vec<DocumentSummary>>;

    /// Delete a document and everything derived from it.
    ///
    /// Embeddings go first, then chunks, then the document row, so no
    /// reader ever observes a chunk whose document is gone. Returns `false`
    /// if the document did not exist.
    async fn delete_document(&self, id: &str) -> Result<bool>;

    async fn add_chunk(&self, chunk: &Chunk) -> Result<()>;

    async fn get_chunk(&self, id: &str) -> Result<Option<Chunk>>;

    async fn get_chunks(&self, filter: &ChunkFilter) -> Result<Vec<Chunk>>;

    /// Store (or replace) the embedding for a chunk.
    async fn add_embedding(
        &self,
        chunk_id: &str,
        document_id: &str,
        vector: &[f32],
        model: &str,
    ) -> Result<()>;

    /// Fetch embeddings, scoped to one document when `document_id` is set.
    async fn get_embeddings(&self, document_id: Option<&str>) -> Result<Vec<Embedding>>;

    async fn stats(&self) -> Result<StoreStats>;
}

//! Typed errors for the ingestion and retrieval pipeline.
//!
//! "Nothing relevant found" and "budget too small" are not errors: the
//! pipeline returns a normal result carrying a fallback prompt instead.

use thiserror::Error;

use docintel_core::embedding::DimensionMismatch;

#[derive(Debug, Error)]
pub enum RagError {
    /// Text extraction failed; ingestion stopped before any chunk was written.
    #[error("text extraction failed: {0}")]
    Extraction(String),

    /// The embedding service was never opened, or has been closed.
    #[error("embedding service unavailable")]
    EmbeddingServiceUnavailable,

    /// An embedding batch failed. Batches before `batch_index` stay persisted.
    #[error("embedding batch {batch_index} failed after {completed}/{total} chunks: {source}")]
    EmbeddingBatch {
        batch_index: usize,
        completed: usize,
        total: usize,
        #[source]
        source: anyhow::Error,
    },

    /// Embedding a query failed.
    #[error("query embedding failed: {0}")]
    QueryEmbedding(#[source] anyhow::Error),

    #[error("operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Dimension(#[from] DimensionMismatch),

    #[error("document not found: {0}")]
    DocumentNotFound(String),

    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

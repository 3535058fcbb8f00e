//! Retrieval orchestrator: ingestion and question answering.
//!
//! # Ingestion
//!
//! ```text
//! bytes ─▶ extract ─▶ chunk ─▶ store doc + chunks ─▶ embed (batches of 8) ─▶ store vectors
//! ```
//!
//! Strictly sequential. Extraction failures abort before anything is
//! written. An embedding batch failure aborts the rest of the ingestion but
//! keeps everything already persisted; there is no rollback.
//!
//! # Query
//!
//! ```text
//! question ─▶ cached query embedding ─▶ similarity search ─▶ history budget
//!          ─▶ document-order sort ─▶ chunk budget ─▶ prompt
//! ```
//!
//! [`RagPipeline::query`] always takes the retrieval path. Callers holding a
//! small document may use [`RagPipeline::simple_context`] instead; see
//! [`RagPipeline::should_use_rag`].

use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use docintel_core::budget::{
    estimate_tokens, fit_chunks, fit_history, fit_whole_document, BudgetConfig, HistoryFit,
};
use docintel_core::chunk::{chunk_pages, ChunkOptions};
use docintel_core::models::{
    ChatMessage, Chunk, Document, Domain, RagMode, RagOptions, RagResult, SearchResult,
};
use docintel_core::prompt::{
    render_document_prompt, render_fallback_prompt, render_prompt, with_history,
};
use docintel_core::embedding::DimensionMismatch;
use docintel_core::search::{search_similar, SearchParams};
use docintel_core::store::Store;

use crate::cache::QueryEmbeddingCache;
use crate::config::{Config, PromptConfig};
use crate::db;
use crate::embedding::{create_backend, EmbeddingService, ModelSpec, ServiceError};
use crate::error::RagError;
use crate::extract::TextExtractor;
use crate::migrate;
use crate::progress::{IngestProgressEvent, IngestProgressReporter};
use crate::sqlite_store::SqliteStore;

/// Chunks sent to the embedding service per request during ingestion.
pub const EMBED_BATCH_SIZE: usize = 8;

/// Documents estimated above this many tokens should use retrieval.
pub const RAG_THRESHOLD_TOKENS: usize = 3000;

/// Whether a document of `document_tokens` is too large for whole-document context.
pub fn should_use_rag(document_tokens: usize) -> bool {
    document_tokens > RAG_THRESHOLD_TOKENS
}

/// Share of the context budget reserved for chat history: 30%.
fn history_budget(max_context_tokens: usize) -> usize {
    max_context_tokens * 3 / 10
}

/// Pipeline settings.
#[derive(Debug, Clone)]
pub struct RagConfig {
    pub chunking: ChunkOptions,
    pub batch_size: usize,
    pub budget: BudgetConfig,
    pub prompt: PromptConfig,
    pub rag_threshold_tokens: usize,
    /// Embed chunks during ingestion. Off when no provider is configured;
    /// documents are then stored without vectors and only whole-document
    /// context works for them.
    pub embed_on_ingest: bool,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            chunking: ChunkOptions::default(),
            batch_size: EMBED_BATCH_SIZE,
            budget: BudgetConfig::default(),
            prompt: PromptConfig::default(),
            rag_threshold_tokens: RAG_THRESHOLD_TOKENS,
            embed_on_ingest: true,
        }
    }
}

impl RagConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            chunking: config.chunking.clone(),
            batch_size: config.embedding.batch_size,
            budget: config.budget.clone(),
            prompt: config.prompt.clone(),
            rag_threshold_tokens: config.retrieval.rag_threshold_tokens,
            embed_on_ingest: config.embedding.is_enabled(),
        }
    }
}

/// A document to ingest.
#[derive(Debug, Clone)]
pub struct DocumentSource {
    pub title: String,
    pub domain: Domain,
    pub bytes: Vec<u8>,
}

pub struct RagPipeline {
    store: Arc<dyn Store>,
    embeddings: Arc<EmbeddingService>,
    cache: QueryEmbeddingCache,
    config: RagConfig,
}

impl RagPipeline {
    pub fn new(store: Arc<dyn Store>, embeddings: Arc<EmbeddingService>, config: RagConfig) -> Self {
        Self {
            store,
            embeddings,
            cache: QueryEmbeddingCache::new(),
            config,
        }
    }

    /// Build the pipeline described by `config`: SQLite store (schema
    /// applied), embedding service opened when a provider is configured.
    pub async fn open(config: &Config) -> anyhow::Result<Self> {
        let pool = db::connect(config).await?;
        migrate::migrate_pool(&pool).await?;
        let store: Arc<dyn Store> = Arc::new(SqliteStore::new(pool));

        let embeddings = Arc::new(EmbeddingService::new(create_backend(&config.embedding)?));
        if config.embedding.is_enabled() {
            embeddings
                .open(ModelSpec::from_config(&config.embedding))
                .await;
        }

        Ok(Self::new(store, embeddings, RagConfig::from_config(config)))
    }

    /// Shut down the embedding service.
    pub async fn close(&self) {
        self.embeddings.close().await;
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn embeddings(&self) -> &Arc<EmbeddingService> {
        &self.embeddings
    }

    pub fn cache(&self) -> &QueryEmbeddingCache {
        &self.cache
    }

    /// Whether a document of `document_tokens` should be answered via
    /// retrieval rather than whole-document context.
    pub fn should_use_rag(&self, document_tokens: usize) -> bool {
        document_tokens > self.config.rag_threshold_tokens
    }

    /// Switch the embedding model. Cached query embeddings belong to the old
    /// model and are dropped.
    pub async fn load_model(&self, spec: ModelSpec) -> Result<(), RagError> {
        self.embeddings
            .load_model(spec)
            .await
            .map_err(query_error)?;
        self.cache.clear().await;
        Ok(())
    }

    // ============ Ingestion ============

    /// Extract, chunk, store, and embed one document.
    pub async fn ingest(
        &self,
        source: DocumentSource,
        extractor: &dyn TextExtractor,
        progress: &dyn IngestProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<Document, RagError> {
        if cancel.is_cancelled() {
            return Err(RagError::Cancelled);
        }

        let extraction = extractor
            .extract(&source.bytes)
            .map_err(|e| RagError::Extraction(e.to_string()))?;
        if extraction.needs_ocr && !extraction.has_text() {
            return Err(RagError::Extraction(format!(
                "{} has no text layer and needs OCR",
                source.title
            )));
        }
        if extraction.needs_ocr {
            tracing::warn!(title = %source.title, "document may need OCR; indexing partial text");
        }

        let full_text = extraction.full_text();
        let document = Document {
            id: uuid::Uuid::new_v4().to_string(),
            domain: source.domain,
            title: source.title,
            full_text,
            page_count: extraction.pages.len() as u32,
            pages: extraction.pages,
            size_bytes: source.bytes.len() as u64,
            created_at: chrono::Utc::now().timestamp(),
        };
        progress.report(IngestProgressEvent::Extracted {
            title: document.title.clone(),
            pages: document.page_count,
        });

        let chunks = chunk_pages(&document.id, &document.pages, &self.config.chunking);

        self.store.add_document(&document).await?;
        for chunk in &chunks {
            self.store.add_chunk(chunk).await?;
        }
        tracing::info!(
            document_id = %document.id,
            pages = document.page_count,
            chunks = chunks.len(),
            "document stored"
        );
        progress.report(IngestProgressEvent::Chunked {
            title: document.title.clone(),
            chunks: chunks.len(),
        });

        if self.config.embed_on_ingest {
            self.embed_chunks(&document, &chunks, progress, cancel)
                .await?;
        } else {
            tracing::warn!(document_id = %document.id, "embedding disabled; chunks stored without vectors");
        }

        progress.report(IngestProgressEvent::Done {
            title: document.title.clone(),
            document_id: document.id.clone(),
        });
        Ok(document)
    }

    async fn embed_chunks(
        &self,
        document: &Document,
        chunks: &[Chunk],
        progress: &dyn IngestProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<(), RagError> {
        let total = chunks.len();
        if total == 0 {
            return Ok(());
        }

        let batch_failed = |batch_index: usize, completed: usize, e: ServiceError| match e {
            ServiceError::Unavailable => RagError::EmbeddingServiceUnavailable,
            other => RagError::EmbeddingBatch {
                batch_index,
                completed,
                total,
                source: other.into(),
            },
        };

        let model = self
            .embeddings
            .active_model()
            .await
            .map_err(|e| batch_failed(0, 0, e))?;

        let mut completed = 0usize;
        for (batch_index, batch) in chunks.chunks(self.config.batch_size.max(1)).enumerate() {
            if cancel.is_cancelled() {
                tracing::info!(document_id = %document.id, completed, total, "ingestion cancelled");
                return Err(RagError::Cancelled);
            }

            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let vectors = self
                .embeddings
                .embed_texts(texts)
                .await
                .map_err(|e| batch_failed(batch_index, completed, e))?;

            for (chunk, vector) in batch.iter().zip(vectors.iter()) {
                self.store
                    .add_embedding(&chunk.id, &chunk.document_id, vector, &model)
                    .await?;
            }

            completed += batch.len();
            tracing::debug!(document_id = %document.id, batch_index, completed, total, "batch embedded");
            progress.report(IngestProgressEvent::Embedding {
                title: document.title.clone(),
                completed,
                total,
            });
        }

        Ok(())
    }

    // ============ Query ============

    /// Answer `question` by chunk retrieval.
    ///
    /// `scope_document_id` (or `options.document_id`) restricts the search to
    /// one document. Prior `history` is included when `options.include_history`
    /// is set. Finding nothing is not an error: the result then carries a
    /// fallback prompt and no sources.
    pub async fn query(
        &self,
        question: &str,
        scope_document_id: Option<&str>,
        options: &RagOptions,
        history: &[ChatMessage],
        cancel: &CancellationToken,
    ) -> Result<RagResult, RagError> {
        let started = Instant::now();
        let scope = scope_document_id.or(options.document_id.as_deref());

        if cancel.is_cancelled() {
            return Err(RagError::Cancelled);
        }
        let query_vec = self
            .cache
            .get_or_compute(question, || self.embeddings.embed_query(question))
            .await
            .map_err(query_error)?;
        let model = self.embeddings.active_model().await.map_err(query_error)?;

        let candidates = self.search(&query_vec, &model, scope, options).await?;

        let history_fit = fit_history_for(options, history);
        // Whatever history did not use goes back to retrieval.
        let retrieval_budget = options.max_context_tokens.saturating_sub(history_fit.tokens);

        let mut ordered = candidates;
        ordered.sort_by(|a, b| {
            a.chunk
                .document_id
                .cmp(&b.chunk.document_id)
                .then(a.chunk.start_page.cmp(&b.chunk.start_page))
        });

        let fit = fit_chunks(ordered.iter().map(|r| &r.chunk), retrieval_budget);
        ordered.truncate(fit.included_chunks);
        let sources = ordered;

        let instructions = self.instructions_for_scope(scope).await?;
        let prompt = if sources.is_empty() {
            render_fallback_prompt(question, instructions)
        } else {
            render_prompt(question, &sources, instructions)
        };
        let prompt = with_history(&history_fit.text, prompt);

        let retrieval_ms = started.elapsed().as_millis() as u64;
        tracing::info!(
            sources = sources.len(),
            truncated = fit.truncated,
            context_tokens = fit.total_tokens + history_fit.tokens,
            retrieval_ms,
            "retrieval complete"
        );

        Ok(RagResult {
            prompt,
            sources,
            retrieval_ms,
            context_tokens: fit.total_tokens + history_fit.tokens,
            mode: RagMode::Rag,
        })
    }

    /// Score stored embeddings against the query, keeping only vectors made
    /// by the active model.
    async fn search(
        &self,
        query_vec: &[f32],
        model: &str,
        scope: Option<&str>,
        options: &RagOptions,
    ) -> Result<Vec<SearchResult>, RagError> {
        let params = SearchParams {
            top_k: options.top_k,
            threshold: options.similarity_threshold,
            document_id: scope.map(str::to_string),
            model: Some(model.to_string()),
        };
        let found = search_similar(self.store.as_ref(), query_vec, &params)
            .await
            .map_err(search_error)?;

        if found.other_model > 0 {
            tracing::warn!(
                stale = found.other_model,
                active_model = model,
                "skipping embeddings from another model; re-ingest to include them"
            );
        }
        Ok(found.results)
    }

    async fn instructions_for_scope(&self, scope: Option<&str>) -> Result<&str, RagError> {
        let domain = match scope {
            Some(id) => self
                .store
                .get_document(id)
                .await?
                .map(|d| d.domain)
                .unwrap_or_default(),
            None => Domain::General,
        };
        Ok(self.config.prompt.instructions_for(domain))
    }

    /// Whole-document context for small documents.
    ///
    /// The document's pages are fitted into `max_tokens`; no embedding or
    /// search takes place and `sources` is empty.
    pub async fn simple_context(
        &self,
        document_id: &str,
        question: &str,
        max_tokens: usize,
    ) -> Result<RagResult, RagError> {
        let started = Instant::now();
        self.whole_document(document_id, question, max_tokens, started)
            .await
    }

    /// [`simple_context`](Self::simple_context) with prior turns prefixed.
    ///
    /// History is fitted under the same 30% reservation as
    /// [`query`](Self::query); the document gets the rest of
    /// `options.max_context_tokens`.
    pub async fn simple_context_with_history(
        &self,
        document_id: &str,
        question: &str,
        options: &RagOptions,
        history: &[ChatMessage],
    ) -> Result<RagResult, RagError> {
        let started = Instant::now();
        let history_fit = fit_history_for(options, history);
        let document_budget = options.max_context_tokens.saturating_sub(history_fit.tokens);

        let mut result = self
            .whole_document(document_id, question, document_budget, started)
            .await?;
        result.prompt = with_history(&history_fit.text, result.prompt);
        result.context_tokens += history_fit.tokens;
        Ok(result)
    }

    async fn whole_document(
        &self,
        document_id: &str,
        question: &str,
        max_tokens: usize,
        started: Instant,
    ) -> Result<RagResult, RagError> {
        let document = self
            .store
            .get_document(document_id)
            .await?
            .ok_or_else(|| RagError::DocumentNotFound(document_id.to_string()))?;

        let fit = fit_whole_document(
            &document.full_text,
            &document.pages,
            max_tokens,
            &self.config.budget,
        );
        if fit.truncated {
            tracing::info!(
                document_id,
                included_pages = fit.included_pages.len(),
                page_count = document.page_count,
                "document truncated to fit context"
            );
        }

        let prompt = render_document_prompt(
            question,
            &fit.context,
            self.config.prompt.instructions_for(document.domain),
        );

        Ok(RagResult {
            prompt,
            sources: Vec::new(),
            retrieval_ms: started.elapsed().as_millis() as u64,
            context_tokens: fit.total_tokens,
            mode: RagMode::Simple,
        })
    }

    /// Estimated token size of a stored document.
    pub async fn document_tokens(&self, document_id: &str) -> Result<usize, RagError> {
        let document = self
            .store
            .get_document(document_id)
            .await?
            .ok_or_else(|| RagError::DocumentNotFound(document_id.to_string()))?;
        Ok(estimate_tokens(&document.full_text))
    }

    /// Delete a document with its chunks and embeddings.
    ///
    /// Cached query embeddings depend only on query text and stay valid.
    pub async fn delete_document(&self, document_id: &str) -> Result<bool, RagError> {
        let removed = self.store.delete_document(document_id).await?;
        if removed {
            tracing::info!(document_id, "document deleted");
        }
        Ok(removed)
    }
}

/// Recent turns within the history reservation, or nothing when history is off.
fn fit_history_for(options: &RagOptions, history: &[ChatMessage]) -> HistoryFit {
    if !options.include_history || history.is_empty() {
        return HistoryFit::default();
    }
    fit_history(
        history,
        history_budget(options.max_context_tokens),
        options.max_history_turns,
    )
}

fn search_error(e: anyhow::Error) -> RagError {
    match e.downcast::<DimensionMismatch>() {
        Ok(mismatch) => RagError::Dimension(mismatch),
        Err(other) => RagError::Storage(other),
    }
}

fn query_error(e: ServiceError) -> RagError {
    match e {
        ServiceError::Unavailable => RagError::EmbeddingServiceUnavailable,
        other => RagError::QueryEmbedding(other.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rag_threshold_is_exclusive() {
        assert!(!should_use_rag(3000));
        assert!(should_use_rag(3001));
        assert!(!should_use_rag(0));
    }

    #[test]
    fn history_takes_thirty_percent() {
        assert_eq!(history_budget(2000), 600);
        assert_eq!(history_budget(15), 4);
        assert_eq!(history_budget(0), 0);
    }
}

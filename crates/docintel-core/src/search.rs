//! Exact vector similarity search.
//!
//! A linear scan over stored embeddings: every candidate is scored with
//! cosine similarity against the query, filtered by threshold, and ranked.
//! There is no approximate index; corpora are expected to hold hundreds to
//! low thousands of chunks.
//!
//! [`search`] is the pure ranking step. [`search_similar`] drives it through
//! a [`Store`], loading embeddings (optionally scoped to one document) and
//! resolving the winning chunks.

use anyhow::Result;
use std::cmp::Ordering;

use crate::embedding::{try_cosine_similarity, DimensionMismatch};
use crate::models::{Embedding, SearchResult};
use crate::store::Store;

/// Ranking parameters for a single search.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchParams {
    /// Maximum results to return.
    pub top_k: usize,
    /// Candidates scoring below this are dropped.
    pub threshold: f32,
    /// Only consider embeddings belonging to this document.
    pub document_id: Option<String>,
    /// Only consider embeddings produced by this model.
    pub model: Option<String>,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            top_k: 5,
            threshold: 0.0,
            document_id: None,
            model: None,
        }
    }
}

/// A scored reference to a stored embedding's chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorHit {
    pub chunk_id: String,
    pub document_id: String,
    pub score: f32,
}

/// Rank `candidates` against `query`.
///
/// Results are sorted by descending score; ties keep their input order.
/// At most `top_k` hits are returned, all scoring `>= threshold`.
///
/// # Errors
///
/// Returns [`DimensionMismatch`] if any considered candidate has a different
/// dimensionality than the query.
pub fn search(
    query: &[f32],
    candidates: &[Embedding],
    params: &SearchParams,
) -> Result<Vec<VectorHit>, DimensionMismatch> {
    if params.top_k == 0 {
        return Ok(Vec::new());
    }

    let mut hits = Vec::new();
    for emb in candidates {
        if let Some(doc) = &params.document_id {
            if &emb.document_id != doc {
                continue;
            }
        }
        if let Some(model) = &params.model {
            if &emb.model != model {
                continue;
            }
        }

        let score = try_cosine_similarity(query, &emb.vector)?;
        if score >= params.threshold {
            hits.push(VectorHit {
                chunk_id: emb.chunk_id.clone(),
                document_id: emb.document_id.clone(),
                score,
            });
        }
    }

    hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
    hits.truncate(params.top_k);
    Ok(hits)
}

/// Output of [`search_similar`].
#[derive(Debug, Clone, Default)]
pub struct SimilarChunks {
    pub results: Vec<SearchResult>,
    /// In-scope embeddings ignored because another model produced them.
    pub other_model: usize,
}

/// Search a [`Store`] and resolve hits into [`SearchResult`]s.
///
/// Embeddings are fetched scoped to `params.document_id` when set. Hits whose
/// chunk has since disappeared from the store are dropped.
///
/// # Errors
///
/// Store failures, and [`DimensionMismatch`] (downcastable from the returned
/// error) when a considered embedding differs in length from `query`.
pub async fn search_similar<S: Store + ?Sized>(
    store: &S,
    query: &[f32],
    params: &SearchParams,
) -> Result<SimilarChunks> {
    let embeddings = store.get_embeddings(params.document_id.as_deref()).await?;
    if embeddings.is_empty() {
        return Ok(SimilarChunks::default());
    }

    let other_model = match &params.model {
        Some(model) => embeddings.iter().filter(|e| &e.model != model).count(),
        None => 0,
    };
    let hits = search(query, &embeddings, params)?;

    let mut results = Vec::with_capacity(hits.len());
    for hit in hits {
        if let Some(chunk) = store.get_chunk(&hit.chunk_id).await? {
            results.push(SearchResult {
                chunk,
                score: hit.score,
            });
        }
    }
    Ok(SimilarChunks {
        results,
        other_model,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Chunk, Document, Domain};
    use crate::store::memory::InMemoryStore;

    fn emb(chunk: &str, doc: &str, v: Vec<f32>) -> Embedding {
        Embedding {
            chunk_id: chunk.to_string(),
            document_id: doc.to_string(),
            model: "test-model".to_string(),
            dims: v.len(),
            vector: v,
        }
    }

    fn params(top_k: usize, threshold: f32) -> SearchParams {
        SearchParams {
            top_k,
            threshold,
            ..Default::default()
        }
    }

    #[test]
    fn test_ranks_closest_first() {
        let candidates = vec![
            emb("c1", "d1", vec![0.95, 0.05, 0.05]),
            emb("c2", "d1", vec![0.05, 0.95, 0.05]),
            emb("c3", "d1", vec![0.05, 0.05, 0.95]),
        ];
        let hits = search(&[1.0, 0.0, 0.0], &candidates, &params(3, 0.0)).unwrap();
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].chunk_id, "c1");
    }

    #[test]
    fn test_scores_non_increasing() {
        let candidates: Vec<Embedding> = (0..20)
            .map(|i| {
                let x = i as f32 / 20.0;
                emb(&format!("c{}", i), "d1", vec![x, 1.0 - x, 0.3])
            })
            .collect();
        let hits = search(&[0.4, 0.6, 0.1], &candidates, &params(20, -1.0)).unwrap();
        for w in hits.windows(2) {
            assert!(w[0].score >= w[1].score);
        }
    }

    #[test]
    fn test_top_k_and_threshold() {
        let candidates = vec![
            emb("c1", "d1", vec![1.0, 0.0]),
            emb("c2", "d1", vec![0.9, 0.1]),
            emb("c3", "d1", vec![0.0, 1.0]),
            emb("c4", "d1", vec![-1.0, 0.0]),
        ];
        let hits = search(&[1.0, 0.0], &candidates, &params(10, 0.5)).unwrap();
        assert_eq!(hits.len(), 2);
        let hits = search(&[1.0, 0.0], &candidates, &params(1, 0.5)).unwrap();
        assert_eq!(hits.len(), 1);
        let hits = search(&[1.0, 0.0], &candidates, &params(0, -1.0)).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn test_ties_keep_input_order() {
        let candidates = vec![
            emb("first", "d1", vec![1.0, 0.0]),
            emb("second", "d1", vec![2.0, 0.0]),
            emb("third", "d1", vec![3.0, 0.0]),
        ];
        let hits = search(&[1.0, 0.0], &candidates, &params(3, 0.0)).unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_document_and_model_filters() {
        let mut other_model = emb("c3", "d1", vec![1.0, 0.0]);
        other_model.model = "old-model".to_string();
        let candidates = vec![
            emb("c1", "d1", vec![0.5, 0.5]),
            emb("c2", "d2", vec![1.0, 0.0]),
            other_model,
        ];
        let p = SearchParams {
            top_k: 5,
            threshold: -1.0,
            document_id: Some("d1".to_string()),
            model: Some("test-model".to_string()),
        };
        let hits = search(&[1.0, 0.0], &candidates, &p).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk_id, "c1");
    }

    #[test]
    fn test_dimension_mismatch_is_error() {
        let candidates = vec![emb("c1", "d1", vec![1.0, 0.0, 0.0])];
        let err = search(&[1.0, 0.0], &candidates, &params(5, 0.0)).unwrap_err();
        assert_eq!(err.expected, 2);
        assert_eq!(err.actual, 3);
    }

    #[test]
    fn test_empty_candidates() {
        assert!(search(&[1.0], &[], &params(5, 0.0)).unwrap().is_empty());
    }

    fn doc(id: &str) -> Document {
        Document {
            id: id.to_string(),
            domain: Domain::General,
            title: id.to_string(),
            full_text: String::new(),
            pages: Vec::new(),
            page_count: 1,
            size_bytes: 0,
            created_at: 0,
        }
    }

    fn chunk(id: &str, doc: &str) -> Chunk {
        Chunk {
            id: id.to_string(),
            document_id: doc.to_string(),
            chunk_index: 0,
            text: format!("text of {}", id),
            start_page: 1,
            end_page: 1,
            token_count: 3,
            overlap_with_previous: false,
            hash: String::new(),
        }
    }

    #[tokio::test]
    async fn test_search_similar_scoped_to_document() {
        let store = InMemoryStore::new();
        for (d, c, v) in [
            ("x", "x1", vec![0.6f32, 0.8]),
            ("y", "y1", vec![1.0f32, 0.0]),
        ] {
            store.add_document(&doc(d)).await.unwrap();
            store.add_chunk(&chunk(c, d)).await.unwrap();
            store.add_embedding(c, d, &v, "test-model").await.unwrap();
        }

        let p = SearchParams {
            top_k: 5,
            threshold: 0.0,
            document_id: Some("x".to_string()),
            model: None,
        };
        let found = search_similar(&store, &[1.0, 0.0], &p).await.unwrap();
        assert_eq!(found.results.len(), 1);
        assert_eq!(found.results[0].chunk.document_id, "x");
        assert_eq!(found.other_model, 0);
    }

    #[tokio::test]
    async fn test_search_similar_counts_other_models() {
        let store = InMemoryStore::new();
        store.add_document(&doc("x")).await.unwrap();
        for (c, model) in [("x1", "test-model"), ("x2", "old-model"), ("x3", "old-model")] {
            store.add_chunk(&chunk(c, "x")).await.unwrap();
            store.add_embedding(c, "x", &[1.0, 0.0], model).await.unwrap();
        }

        let p = SearchParams {
            top_k: 5,
            threshold: 0.0,
            document_id: None,
            model: Some("test-model".to_string()),
        };
        let found = search_similar(&store, &[1.0, 0.0], &p).await.unwrap();
        assert_eq!(found.results.len(), 1);
        assert_eq!(found.results[0].chunk.id, "x1");
        assert_eq!(found.other_model, 2);
    }

    #[tokio::test]
    async fn test_search_similar_dimension_mismatch_downcasts() {
        let store = InMemoryStore::new();
        store.add_document(&doc("x")).await.unwrap();
        store.add_chunk(&chunk("x1", "x")).await.unwrap();
        store
            .add_embedding("x1", "x", &[1.0, 0.0, 0.0], "test-model")
            .await
            .unwrap();

        let err = search_similar(&store, &[1.0, 0.0], &params(5, 0.0))
            .await
            .unwrap_err();
        let mismatch = err.downcast::<DimensionMismatch>().unwrap();
        assert_eq!(mismatch.actual, 3);
    }

    #[tokio::test]
    async fn test_search_similar_empty_store() {
        let store = InMemoryStore::new();
        let found = search_similar(&store, &[1.0, 0.0], &params(5, 0.0))
            .await
            .unwrap();
        assert!(found.results.is_empty());
    }
}

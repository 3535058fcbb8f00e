//! In-memory [`Store`] implementation for testing and WASM targets.
//!
//! Uses `HashMap` and `Vec` behind `std::sync::RwLock`. Insertion order is
//! preserved for chunks and embeddings so search tie-breaking is stable.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::models::{Chunk, Document, Embedding};

use super::{ChunkFilter, DocumentSummary, Store, StoreStats};

/// In-memory store for tests and WASM environments.
pub struct InMemoryStore {
    docs: RwLock<HashMap<String, Document>>,
    chunks: RwLock<Vec<Chunk>>,
    vectors: RwLock<Vec<Embedding>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            docs: RwLock::new(HashMap::new()),
            chunks: RwLock::new(Vec::new()),
            vectors: RwLock::new(Vec::new()),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned<T>(_: T) -> anyhow::Error {
    anyhow!("in-memory store lock poisoned")
}

#[async_trait]
impl Store for InMemoryStore {
    async fn add_document(&self, doc: &Document) -> Result<String> {
        let mut docs = self.docs.write().map_err(poisoned)?;
        docs.insert(doc.id.clone(), doc.clone());
        Ok(doc.id.clone())
    }

    async fn get_document(&self, id: &str) -> Result<Option<Document>> {
        let docs = self.docs.read().map_err(poisoned)?;
        Ok(docs.get(id).cloned())
    }

    async fn list_documents(&self) -> Result<Vec<DocumentSummary>> {
        let docs = self.docs.read().map_err(poisoned)?;
        let mut out: Vec<DocumentSummary> = docs.values().map(DocumentSummary::from).collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        Ok(out)
    }

    async fn delete_document(&self, id: &str) -> Result<bool> {
        self.vectors
            .write()
            .map_err(poisoned)?
            .retain(|e| e.document_id != id);
        self.chunks
            .write()
            .map_err(poisoned)?
            .retain(|c| c.document_id != id);
        let removed = self.docs.write().map_err(poisoned)?.remove(id);
        Ok(removed.is_some())
    }

    async fn add_chunk(&self, chunk: &Chunk) -> Result<()> {
        let mut chunks = self.chunks.write().map_err(poisoned)?;
        chunks.retain(|c| c.id != chunk.id);
        chunks.push(chunk.clone());
        Ok(())
    }

    async fn get_chunk(&self, id: &str) -> Result<Option<Chunk>> {
        let chunks = self.chunks.read().map_err(poisoned)?;
        Ok(chunks.iter().find(|c| c.id == id).cloned())
    }

    async fn get_chunks(&self, filter: &ChunkFilter) -> Result<Vec<Chunk>> {
        let chunks = self.chunks.read().map_err(poisoned)?;
        let mut out: Vec<Chunk> = chunks
            .iter()
            .filter(|c| match &filter.document_id {
                Some(doc) => &c.document_id == doc,
                None => true,
            })
            .cloned()
            .collect();
        out.sort_by(|a, b| {
            a.document_id
                .cmp(&b.document_id)
                .then(a.chunk_index.cmp(&b.chunk_index))
        });
        Ok(out)
    }

    async fn add_embedding(
        &self,
        chunk_id: &str,
        document_id: &str,
        vector: &[f32],
        model: &str,
    ) -> Result<()> {
        let mut vecs = self.vectors.write().map_err(poisoned)?;
        vecs.retain(|e| e.chunk_id != chunk_id);
        vecs.push(Embedding {
            chunk_id: chunk_id.to_string(),
            document_id: document_id.to_string(),
            model: model.to_string(),
            dims: vector.len(),
            vector: vector.to_vec(),
        });
        Ok(())
    }

    async fn get_embeddings(&self, document_id: Option<&str>) -> Result<Vec<Embedding>> {
        let vecs = self.vectors.read().map_err(poisoned)?;
        Ok(vecs
            .iter()
            .filter(|e| document_id.map_or(true, |d| e.document_id == d))
            .cloned()
            .collect())
    }

    async fn stats(&self) -> Result<StoreStats> {
        Ok(StoreStats {
            documents: self.docs.read().map_err(poisoned)?.len() as u64,
            chunks: self.chunks.read().map_err(poisoned)?.len() as u64,
            embeddings: self.vectors.read().map_err(poisoned)?.len() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Domain;

    fn doc(id: &str, created_at: i64) -> Document {
        Document {
            id: id.to_string(),
            domain: Domain::Legal,
            title: format!("Doc {}", id),
            full_text: "body".to_string(),
            pages: Vec::new(),
            page_count: 1,
            size_bytes: 4,
            created_at,
        }
    }

    fn chunk(id: &str, doc: &str, index: i64) -> Chunk {
        Chunk {
            id: id.to_string(),
            document_id: doc.to_string(),
            chunk_index: index,
            text: "body".to_string(),
            start_page: 1,
            end_page: 1,
            token_count: 1,
            overlap_with_previous: false,
            hash: String::new(),
        }
    }

    #[tokio::test]
    async fn test_delete_cascades() {
        let store = InMemoryStore::new();
        store.add_document(&doc("a", 1)).await.unwrap();
        store.add_document(&doc("b", 2)).await.unwrap();
        store.add_chunk(&chunk("a0", "a", 0)).await.unwrap();
        store.add_chunk(&chunk("b0", "b", 0)).await.unwrap();
        store.add_embedding("a0", "a", &[1.0], "m").await.unwrap();
        store.add_embedding("b0", "b", &[1.0], "m").await.unwrap();

        assert!(store.delete_document("a").await.unwrap());
        assert!(!store.delete_document("a").await.unwrap());

        let stats = store.stats().await.unwrap();
        assert_eq!(
            stats,
            StoreStats {
                documents: 1,
                chunks: 1,
                embeddings: 1
            }
        );
        assert!(store.get_chunk("a0").await.unwrap().is_none());
        assert!(store.get_embeddings(Some("a")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_chunks_ordered_and_filtered() {
        let store = InMemoryStore::new();
        store.add_chunk(&chunk("c2", "a", 2)).await.unwrap();
        store.add_chunk(&chunk("c0", "a", 0)).await.unwrap();
        store.add_chunk(&chunk("x0", "b", 0)).await.unwrap();

        let a = store.get_chunks(&ChunkFilter::document("a")).await.unwrap();
        let ids: Vec<&str> = a.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["c0", "c2"]);
        assert_eq!(store.get_chunks(&ChunkFilter::default()).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_embedding_replaced_and_tagged() {
        let store = InMemoryStore::new();
        store.add_embedding("c", "d", &[1.0, 2.0], "old").await.unwrap();
        store.add_embedding("c", "d", &[1.0, 2.0, 3.0], "new").await.unwrap();
        let embs = store.get_embeddings(None).await.unwrap();
        assert_eq!(embs.len(), 1);
        assert_eq!(embs[0].model, "new");
        assert_eq!(embs[0].dims, 3);
    }

    #[tokio::test]
    async fn test_list_documents_newest_first() {
        let store = InMemoryStore::new();
        store.add_document(&doc("old", 10)).await.unwrap();
        store.add_document(&doc("new", 20)).await.unwrap();
        let list = store.list_documents().await.unwrap();
        assert_eq!(list[0].id, "new");
        assert_eq!(list[1].id, "old");
    }
}

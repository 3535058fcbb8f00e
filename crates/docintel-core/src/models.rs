//! Core data models used throughout DocIntel.
//!
//! These types represent the documents, chunks, embeddings, and retrieval
//! results that flow through the ingestion and query pipeline.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Subject-matter tag attached to every ingested document.
///
/// The tag selects which domain instructions the prompt renderer receives;
/// retrieval itself treats all domains identically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Domain {
    Contracts,
    Medical,
    Financial,
    Legal,
    #[default]
    General,
}

impl Domain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Contracts => "contracts",
            Domain::Medical => "medical",
            Domain::Financial => "financial",
            Domain::Legal => "legal",
            Domain::General => "general",
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Domain {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "contracts" | "contract" => Ok(Domain::Contracts),
            "medical" => Ok(Domain::Medical),
            "financial" | "finance" => Ok(Domain::Financial),
            "legal" => Ok(Domain::Legal),
            "general" => Ok(Domain::General),
            other => Err(format!(
                "unknown domain '{}'. Use contracts, medical, financial, legal, or general.",
                other
            )),
        }
    }
}

/// A single page of extracted text. Page numbers are 1-based.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub number: u32,
    pub text: String,
}

impl Page {
    pub fn new(number: u32, text: impl Into<String>) -> Self {
        Self {
            number,
            text: text.into(),
        }
    }
}

/// An ingested document. Immutable once stored, except for deletion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub domain: Domain,
    pub title: String,
    /// Full extracted text, pages joined with `\n\n`.
    pub full_text: String,
    /// Extracted pages, kept so whole-document context can be rebuilt.
    pub pages: Vec<Page>,
    pub page_count: u32,
    pub size_bytes: u64,
    /// Unix timestamp (seconds).
    pub created_at: i64,
}

/// A contiguous slice of a document's text; the unit of retrieval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    /// Zero-based position within the document.
    pub chunk_index: i64,
    pub text: String,
    /// First page spanned (inclusive).
    pub start_page: u32,
    /// Last page spanned (inclusive).
    pub end_page: u32,
    /// Chunker token estimate (`ceil(chars / 4)`).
    pub token_count: usize,
    /// True when this chunk starts with text carried over from the previous chunk.
    pub overlap_with_previous: bool,
    /// SHA-256 of `text`, used to detect stale embeddings.
    pub hash: String,
}

/// A stored embedding vector, tagged with the model that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub chunk_id: String,
    pub document_id: String,
    pub model: String,
    pub dims: usize,
    pub vector: Vec<f32>,
}

/// A chunk paired with its similarity to a query. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub chunk: Chunk,
    /// Cosine similarity in `[-1.0, 1.0]`.
    pub score: f32,
}

/// Who authored a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// A prior chat turn, consumed only for history budgeting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    /// Unix timestamp (seconds).
    #[serde(default)]
    pub timestamp: i64,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            timestamp: chrono::Utc::now().timestamp(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            timestamp: chrono::Utc::now().timestamp(),
        }
    }
}

/// Per-query retrieval options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RagOptions {
    /// Maximum candidates returned by similarity search.
    pub top_k: usize,
    /// Total token budget for retrieved text (and history, when enabled).
    pub max_context_tokens: usize,
    /// Minimum cosine similarity for a candidate to be kept.
    pub similarity_threshold: f32,
    /// Restrict retrieval to a single document.
    pub document_id: Option<String>,
    /// Reserve part of the budget for chat history.
    pub include_history: bool,
    /// Cap on user/assistant turns included from history.
    pub max_history_turns: usize,
}

impl Default for RagOptions {
    fn default() -> Self {
        Self {
            top_k: 5,
            max_context_tokens: 2000,
            similarity_threshold: 0.3,
            document_id: None,
            include_history: true,
            max_history_turns: 3,
        }
    }
}

/// Which context-building path produced a [`RagResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RagMode {
    /// Whole document stuffed into the prompt.
    Simple,
    /// Chunk retrieval.
    Rag,
}

impl fmt::Display for RagMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RagMode::Simple => f.write_str("simple"),
            RagMode::Rag => f.write_str("rag"),
        }
    }
}

/// The assembled prompt plus the sources that made it into the budget.
#[derive(Debug, Clone, Serialize)]
pub struct RagResult {
    pub prompt: String,
    pub sources: Vec<SearchResult>,
    pub retrieval_ms: u64,
    pub context_tokens: usize,
    pub mode: RagMode,
}

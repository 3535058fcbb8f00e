//! # DocIntel
//!
//! **A local-first document question-answering engine.**
//!
//! DocIntel ingests PDF, DOCX, and text documents, splits them into
//! page-aware overlapping chunks, embeds the chunks, and answers questions by
//! retrieving the most similar chunks and packing them into a token-budgeted
//! prompt for a language model.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────────────┐   ┌──────────┐
//! │ Extract  │──▶│  Chunk + Embed       │──▶│  SQLite  │
//! │ PDF/DOCX │   │ (embedding service)  │   │ docs/vec │
//! └──────────┘   └──────────────────────┘   └────┬─────┘
//!                                                │
//!           question ──▶ cache ──▶ search ◀──────┘
//!                                    │
//!                                    ▼
//!                         budget ──▶ prompt
//! ```
//!
//! The pure algorithms (chunking, similarity, budgeting, prompt rendering,
//! the [`store::Store`] trait) live in `docintel-core`. This crate adds the
//! SQLite store, text extraction, the embedding service, the query cache,
//! the [`rag::RagPipeline`] orchestrator, and the `docintel` CLI.
//!
//! ## Quick Start
//!
//! ```bash
//! docintel init
//! docintel ingest ./contracts --domain contracts
//! docintel ask "When can either party terminate?"
//! docintel ask "What is the dosage?" --doc <id>
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`logging`] | `tracing` subscriber setup |
//! | [`error`] | Typed pipeline errors |
//! | [`db`] | SQLite connection pool with WAL mode |
//! | [`migrate`] | Database schema (idempotent) |
//! | [`sqlite_store`] | SQLite implementation of [`store::Store`] |
//! | [`extract`] | Page-aware text extraction for PDF, DOCX, and plain text |
//! | [`embedding`] | Embedding backends and the embedding service actor |
//! | [`cache`] | LRU cache of query embeddings |
//! | [`progress`] | Ingest progress reporting |
//! | [`rag`] | Ingestion and retrieval orchestrator |
//! | [`ingest`] | `docintel ingest` |
//! | [`ask`] | `docintel ask` |
//! | [`documents`] | `docintel documents`, `get`, `delete`, `stats` |

pub mod ask;
pub mod cache;
pub mod config;
pub mod db;
pub mod documents;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod ingest;
pub mod logging;
pub mod migrate;
pub mod progress;
pub mod rag;
pub mod sqlite_store;

pub use docintel_core::models;
pub use docintel_core::store;
pub use error::RagError;
pub use rag::{DocumentSource, RagConfig, RagPipeline};

//! `docintel ask`: build the context prompt for a question.
//!
//! DocIntel does not call a language model; the command prints the prompt
//! (and the sources it was built from) for whatever model the caller uses.
//!
//! With `--doc`, small documents (estimated at or below
//! `retrieval.rag_threshold_tokens`) are sent whole; larger ones go through
//! chunk retrieval scoped to that document. Without `--doc` the whole index
//! is searched. `--history` turns are prefixed in both modes.

use anyhow::{Context, Result};
use std::path::Path;
use tokio_util::sync::CancellationToken;

use docintel_core::models::{ChatMessage, RagResult};

use crate::config::Config;
use crate::rag::RagPipeline;

/// Per-invocation overrides of `[retrieval]`.
#[derive(Debug, Clone, Default)]
pub struct AskOverrides {
    pub top_k: Option<usize>,
    pub max_tokens: Option<usize>,
    pub threshold: Option<f32>,
    pub no_history: bool,
}

/// Read prior turns from a JSON array of `{ "role", "content" }` objects.
pub fn load_history(path: &Path) -> Result<Vec<ChatMessage>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read history file: {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse history file: {}", path.display()))
}

pub async fn ask(
    pipeline: &RagPipeline,
    config: &Config,
    question: &str,
    doc: Option<&str>,
    overrides: &AskOverrides,
    history: &[ChatMessage],
) -> Result<RagResult> {
    let mut options = config.retrieval.rag_options();
    if let Some(k) = overrides.top_k {
        options.top_k = k;
    }
    if let Some(t) = overrides.max_tokens {
        options.max_context_tokens = t;
    }
    if let Some(t) = overrides.threshold {
        options.similarity_threshold = t;
    }
    if overrides.no_history {
        options.include_history = false;
    }

    if let Some(id) = doc {
        let tokens = pipeline.document_tokens(id).await?;
        if !pipeline.should_use_rag(tokens) {
            tracing::debug!(document_id = id, tokens, "document small enough to send whole");
            return Ok(pipeline
                .simple_context_with_history(id, question, &options, history)
                .await?);
        }
    }

    let cancel = CancellationToken::new();
    Ok(pipeline
        .query(question, doc, &options, history, &cancel)
        .await?)
}

pub async fn run_ask(
    config: &Config,
    question: &str,
    doc: Option<String>,
    overrides: AskOverrides,
    history_path: Option<&Path>,
    json: bool,
) -> Result<()> {
    let history = match history_path {
        Some(p) => load_history(p)?,
        None => Vec::new(),
    };

    let pipeline = RagPipeline::open(config).await?;
    let result = ask(&pipeline, config, question, doc.as_deref(), &overrides, &history).await;
    pipeline.close().await;
    let result = result?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    println!(
        "mode: {}  sources: {}  context: {} tokens  retrieval: {} ms",
        result.mode,
        result.sources.len(),
        result.context_tokens,
        result.retrieval_ms
    );
    if !result.sources.is_empty() {
        println!();
        for (i, source) in result.sources.iter().enumerate() {
            println!(
                "  [Source {}] {:.3}  doc {}  pages {}-{}",
                i + 1,
                source.score,
                source.chunk.document_id,
                source.chunk.start_page,
                source.chunk.end_page
            );
        }
    }
    println!();
    println!("--- Prompt ---");
    println!("{}", result.prompt);

    Ok(())
}

//! `docintel ingest`: add files to the index.
//!
//! Accepts a single file or a directory. Directories are walked recursively
//! and every supported file (`.txt`, `.md`, `.pdf`, `.docx`) is ingested in
//! path order; unsupported files are skipped. Ctrl-C cancels between
//! embedding batches.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use docintel_core::models::Domain;
use docintel_core::store::ChunkFilter;

use crate::config::Config;
use crate::error::RagError;
use crate::extract::{extractor_for_path, is_supported};
use crate::progress::{IngestProgressReporter, ProgressMode};
use crate::rag::{DocumentSource, RagPipeline};

/// Files under `path`, sorted. A file path is returned as-is.
pub fn collect_files(path: &Path) -> Result<Vec<PathBuf>> {
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }
    if !path.is_dir() {
        bail!("no such file or directory: {}", path.display());
    }

    let mut files: Vec<PathBuf> = WalkDir::new(path)
        .follow_links(true)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| is_supported(p))
        .collect();
    files.sort();
    Ok(files)
}

fn title_for(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

pub async fn run_ingest(
    config: &Config,
    path: &Path,
    domain: Domain,
    title: Option<String>,
    progress: ProgressMode,
) -> Result<()> {
    let files = collect_files(path)?;
    if files.is_empty() {
        println!("No supported files found in {}", path.display());
        return Ok(());
    }
    if title.is_some() && files.len() > 1 {
        bail!("--title can only be used when ingesting a single file");
    }

    let pipeline = RagPipeline::open(config).await?;
    let reporter = progress.reporter();

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });

    let outcome = ingest_files(
        &pipeline,
        &files,
        domain,
        title.as_deref(),
        reporter.as_ref(),
        &cancel,
    )
    .await;
    pipeline.close().await;
    let summary = outcome?;

    println!();
    println!(
        "ingest: {} ingested, {} failed",
        summary.ingested, summary.failed
    );
    if summary.failed > 0 && summary.ingested == 0 {
        bail!("no documents ingested");
    }
    Ok(())
}

#[derive(Debug, Default, PartialEq, Eq)]
struct IngestSummary {
    ingested: usize,
    failed: usize,
}

/// Ingest `files` in order. Unsupported or unextractable files are counted
/// as failed; any other error stops the run.
async fn ingest_files(
    pipeline: &RagPipeline,
    files: &[PathBuf],
    domain: Domain,
    title: Option<&str>,
    reporter: &dyn IngestProgressReporter,
    cancel: &CancellationToken,
) -> Result<IngestSummary> {
    let mut summary = IngestSummary::default();

    for file in files {
        let extractor = match extractor_for_path(file) {
            Ok(e) => e,
            Err(e) => {
                eprintln!("skip {}: {}", file.display(), e);
                summary.failed += 1;
                continue;
            }
        };
        let bytes = std::fs::read(file)
            .with_context(|| format!("Failed to read {}", file.display()))?;
        let source = DocumentSource {
            title: title.map_or_else(|| title_for(file), str::to_string),
            domain,
            bytes,
        };

        match pipeline
            .ingest(source, extractor.as_ref(), reporter, cancel)
            .await
        {
            Ok(doc) => {
                let chunks = pipeline
                    .store()
                    .get_chunks(&ChunkFilter::document(&doc.id))
                    .await?
                    .len();
                println!(
                    "Ingested {} ({} pages, {} chunks) {}",
                    doc.title, doc.page_count, chunks, doc.id
                );
                summary.ingested += 1;
            }
            Err(RagError::Cancelled) => {
                eprintln!("Cancelled while ingesting {}", file.display());
                bail!(RagError::Cancelled);
            }
            Err(e @ RagError::Extraction(_)) => {
                eprintln!("Error: {}: {}", file.display(), e);
                summary.failed += 1;
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to ingest {}", file.display()));
            }
        }
    }

    Ok(summary)
}

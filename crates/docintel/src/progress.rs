//! Ingest progress reporting.
//!
//! Reports observable progress during `docintel ingest` so users see pages
//! being extracted, chunks being embedded, and when a document is ready for
//! questions. Progress is emitted on **stderr** so stdout remains parseable.

use std::io::Write;

/// A single progress event for one document.
#[derive(Clone, Debug, PartialEq)]
pub enum IngestProgressEvent {
    /// Text extraction finished.
    Extracted { title: String, pages: u32 },
    /// Chunks written to the store; embedding is next.
    Chunked { title: String, chunks: usize },
    /// `completed` of `total` chunks embedded. Sent after every batch.
    Embedding {
        title: String,
        completed: usize,
        total: usize,
    },
    /// Document fully ingested.
    Done { title: String, document_id: String },
}

/// Receives ingest progress. Called from the pipeline.
pub trait IngestProgressReporter: Send + Sync {
    fn report(&self, event: IngestProgressEvent);
}

/// Human-friendly progress on stderr: "ingest contract.pdf  embedding  16 / 40 chunks".
pub struct StderrProgress;

impl IngestProgressReporter for StderrProgress {
    fn report(&self, event: IngestProgressEvent) {
        let line = match &event {
            IngestProgressEvent::Extracted { title, pages } => {
                format!("ingest {}  extracted  {} pages\n", title, format_number(*pages as u64))
            }
            IngestProgressEvent::Chunked { title, chunks } => {
                format!("ingest {}  chunked  {} chunks\n", title, format_number(*chunks as u64))
            }
            IngestProgressEvent::Embedding {
                title,
                completed,
                total,
            } => format!(
                "ingest {}  embedding  {} / {} chunks\n",
                title,
                format_number(*completed as u64),
                format_number(*total as u64)
            ),
            IngestProgressEvent::Done { title, document_id } => {
                format!("ingest {}  done  {}\n", title, document_id)
            }
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl IngestProgressReporter for JsonProgress {
    fn report(&self, event: IngestProgressEvent) {
        let obj = match &event {
            IngestProgressEvent::Extracted { title, pages } => serde_json::json!({
                "event": "progress",
                "document": title,
                "phase": "extracted",
                "pages": pages
            }),
            IngestProgressEvent::Chunked { title, chunks } => serde_json::json!({
                "event": "progress",
                "document": title,
                "phase": "chunked",
                "chunks": chunks
            }),
            IngestProgressEvent::Embedding {
                title,
                completed,
                total,
            } => serde_json::json!({
                "event": "progress",
                "document": title,
                "phase": "embedding",
                "n": completed,
                "total": total
            }),
            IngestProgressEvent::Done { title, document_id } => serde_json::json!({
                "event": "done",
                "document": title,
                "id": document_id
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl IngestProgressReporter for NoProgress {
    fn report(&self, _event: IngestProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn IngestProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

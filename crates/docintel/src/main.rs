//! # DocIntel CLI (`docintel`)
//!
//! ## Usage
//!
//! ```bash
//! docintel --config ./config/docintel.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docintel init` | Create the SQLite database and schema |
//! | `docintel ingest <path>` | Extract, chunk, and embed a file or directory |
//! | `docintel ask "<question>"` | Build the context prompt for a question |
//! | `docintel documents` | List ingested documents |
//! | `docintel get <id>` | Show a document and its chunks |
//! | `docintel delete <id>` | Delete a document, its chunks, and embeddings |
//! | `docintel stats` | Index statistics |

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use docintel::ask::AskOverrides;
use docintel::models::Domain;
use docintel::progress::ProgressMode;
use docintel::{ask, config, documents, ingest, logging, migrate};

/// DocIntel: local-first document question answering.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/docintel.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "docintel",
    about = "DocIntel: local-first document question answering",
    version,
    long_about = "DocIntel extracts text from PDF, DOCX, and plain-text documents, splits it into \
    page-aware chunks, embeds them, and builds token-budgeted prompts from the chunks most \
    similar to a question."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/docintel.toml")]
    config: PathBuf,

    /// Only log warnings and errors.
    #[arg(long, short, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Ingest a file or every supported file under a directory.
    Ingest {
        /// File or directory.
        path: PathBuf,

        /// Document domain: contracts, medical, financial, legal, general.
        #[arg(long, default_value = "general")]
        domain: Domain,

        /// Title for the document (single file only). Defaults to the file name.
        #[arg(long)]
        title: Option<String>,

        /// Emit progress as JSON lines on stderr.
        #[arg(long, conflicts_with = "no_progress")]
        json_progress: bool,

        /// Disable progress output.
        #[arg(long)]
        no_progress: bool,
    },

    /// Build the context prompt for a question.
    Ask {
        /// The question.
        question: String,

        /// Restrict to one document. Small documents are sent whole.
        #[arg(long)]
        doc: Option<String>,

        /// Number of chunks to retrieve.
        #[arg(long)]
        top_k: Option<usize>,

        /// Context token budget.
        #[arg(long)]
        max_tokens: Option<usize>,

        /// Minimum cosine similarity.
        #[arg(long)]
        threshold: Option<f32>,

        /// JSON file with prior conversation turns.
        #[arg(long)]
        history: Option<PathBuf>,

        /// Ignore conversation history.
        #[arg(long)]
        no_history: bool,

        /// Print the result as JSON.
        #[arg(long)]
        json: bool,
    },

    /// List ingested documents.
    Documents {
        #[arg(long)]
        json: bool,
    },

    /// Show a document, its chunks, and its text.
    Get {
        /// Document ID.
        id: String,
    },

    /// Delete a document with its chunks and embeddings.
    Delete {
        /// Document ID.
        id: String,
    },

    /// Show index statistics.
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.quiet);

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest {
            path,
            domain,
            title,
            json_progress,
            no_progress,
        } => {
            let mode = if no_progress {
                ProgressMode::Off
            } else if json_progress {
                ProgressMode::Json
            } else {
                ProgressMode::default_for_tty()
            };
            ingest::run_ingest(&cfg, &path, domain, title, mode).await?;
        }
        Commands::Ask {
            question,
            doc,
            top_k,
            max_tokens,
            threshold,
            history,
            no_history,
            json,
        } => {
            let overrides = AskOverrides {
                top_k,
                max_tokens,
                threshold,
                no_history,
            };
            ask::run_ask(&cfg, &question, doc, overrides, history.as_deref(), json).await?;
        }
        Commands::Documents { json } => {
            documents::run_list(&cfg, json).await?;
        }
        Commands::Get { id } => {
            documents::run_get(&cfg, &id).await?;
        }
        Commands::Delete { id } => {
            documents::run_delete(&cfg, &id).await?;
        }
        Commands::Stats => {
            documents::run_stats(&cfg).await?;
        }
    }

    Ok(())
}

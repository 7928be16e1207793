//! # ragthread CLI
//!
//! Operates on the same per-thread indices the chat backend uses.
//!
//! ## Usage
//!
//! ```bash
//! ragthread --config ./config/ragthread.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ragthread ingest --thread N <file>` | Extract, chunk, embed and append a document |
//! | `ragthread query --thread N "<text>"` | Print the grounding context for a message |
//! | `ragthread has-docs --thread N` | Report whether the thread has an index |
//! | `ragthread documents --thread N` | List the documents in a thread index |
//! | `ragthread forget --thread N <source>` | Rebuild the index without one document |
//! | `ragthread delete --thread N` | Remove the thread's index artifacts |
//!
//! Log verbosity follows `RUST_LOG` (e.g. `RUST_LOG=ragthread=debug`).

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;

use ragthread::config::{self, Config};
use ragthread::core::embedding::Embedder;
use ragthread::core::models::ThreadId;
use ragthread::embedding::{create_embedder, expected_dims};
use ragthread::ingest::IngestionPipeline;
use ragthread::retrieve::RetrievalService;
use ragthread::store::ThreadIndexStore;

/// ragthread: per-conversation document retrieval for RAG chat.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/ragthread.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "ragthread",
    about = "Per-conversation document embedding and retrieval store",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Built-in defaults are used when the file does not exist.
    #[arg(long, global = true, default_value = "./config/ragthread.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest a document into a thread's index.
    ///
    /// The type is taken from the file extension (pdf, txt, docx, md).
    Ingest {
        #[arg(long)]
        thread: ThreadId,
        /// Document to ingest.
        file: PathBuf,
    },

    /// Retrieve grounding context for a message.
    Query {
        #[arg(long)]
        thread: ThreadId,
        /// Number of chunks to retrieve (defaults to `[retrieval].top_k`).
        #[arg(long)]
        top_k: Option<usize>,
        /// The user's message.
        text: String,
    },

    /// Report whether a thread has indexed documents.
    HasDocs {
        #[arg(long)]
        thread: ThreadId,
    },

    /// List the documents in a thread's index.
    Documents {
        #[arg(long)]
        thread: ThreadId,
    },

    /// Remove one document's chunks from a thread's index.
    Forget {
        #[arg(long)]
        thread: ThreadId,
        /// Source filename as shown by `documents`.
        source: String,
    },

    /// Delete a thread's index.
    Delete {
        #[arg(long)]
        thread: ThreadId,
    },
}

fn load(path: &std::path::Path) -> anyhow::Result<Config> {
    if path.exists() {
        config::load_config(path)
    } else {
        info!(path = %path.display(), "config file not found; using defaults");
        Ok(Config::default())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = load(&cli.config)?;

    match cli.command {
        Commands::Ingest { thread, file } => {
            let (store, embedder) = open_with_embedder(&cfg).await?;
            let pipeline = IngestionPipeline::new(
                store,
                embedder,
                cfg.chunking.to_chunker()?,
                cfg.ingest.max_file_size,
            );
            let outcome = pipeline
                .ingest_file(&file, thread)
                .await
                .with_context(|| format!("Failed to ingest {}", file.display()))?;
            println!("ingest {}", outcome.source);
            println!("  thread: {}", outcome.thread_id);
            println!("  chunks added: {}", outcome.chunks_added);
            println!("  first position: {}", outcome.first_position);
            println!("  total entries: {}", outcome.total_entries);
            println!("ok");
        }
        Commands::Query {
            thread,
            top_k,
            text,
        } => {
            let (store, embedder) = open_with_embedder(&cfg).await?;
            let service = RetrievalService::new(store, embedder);
            let top_k = top_k.unwrap_or(cfg.retrieval.top_k);
            let ctx = service.try_retrieve(&text, thread, top_k).await?;
            if ctx.is_empty() {
                println!("No results.");
            } else {
                println!("{}", ctx.context);
                println!();
                let sources: Vec<&str> = ctx.sources.iter().map(String::as_str).collect();
                println!("sources: {}", sources.join(", "));
            }
        }
        // Index-only commands never load the embedding model.
        Commands::HasDocs { thread } => {
            let store = open_store(&cfg)?;
            println!("{}", store.has_documents(thread).await?);
        }
        Commands::Documents { thread } => {
            let store = open_store(&cfg)?;
            let docs = store.documents(thread).await?;
            if docs.is_empty() {
                println!("No documents.");
            }
            for doc in docs {
                println!(
                    "{}  chunks={}  first_position={}",
                    doc.source, doc.chunks, doc.first_position
                );
            }
        }
        Commands::Forget { thread, source } => {
            let store = open_store(&cfg)?;
            let removed = store.remove_source(thread, &source).await?;
            println!("forget {}", source);
            println!("  entries removed: {}", removed);
            println!("ok");
        }
        Commands::Delete { thread } => {
            let store = open_store(&cfg)?;
            store.delete(thread).await?;
            println!("deleted index for thread {}", thread);
        }
    }

    Ok(())
}

fn open_store(cfg: &Config) -> anyhow::Result<ThreadIndexStore> {
    let dims = expected_dims(&cfg.embedding)?;
    Ok(ThreadIndexStore::new(&cfg.storage.index_dir, dims)?)
}

async fn open_with_embedder(
    cfg: &Config,
) -> anyhow::Result<(Arc<ThreadIndexStore>, Arc<dyn Embedder>)> {
    let embedder = create_embedder(&cfg.embedding)
        .await
        .context("Failed to initialize embedding provider")?;
    let store = ThreadIndexStore::new(&cfg.storage.index_dir, embedder.dims())?;
    Ok((Arc::new(store), embedder))
}

//! # ragthread
//!
//! Per-conversation document retrieval for retrieval-augmented chat.
//!
//! Documents uploaded to a conversation thread are extracted, chunked,
//! embedded and appended to that thread's own persistent vector index. At
//! chat time the user's message is embedded and the nearest chunks are
//! returned as a grounding context with their source filenames.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌─────────┐   ┌──────────┐   ┌──────────────────────┐
//! │ Extract  │──▶│  Chunk  │──▶│  Embed   │──▶│ ThreadIndexStore     │
//! │ pdf/docx │   │ 1000/200│   │ Embedder │   │ thread_{id}.index    │
//! │ txt/md   │   └─────────┘   └──────────┘   │ thread_{id}_metadata │
//! └──────────┘                                 └──────────┬───────────┘
//!                                                         │
//!                         query ──▶ Embed ──▶ search ◀────┘
//!                                              │
//!                                              ▼
//!                                  "[From a.pdf]\n..." + sources
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`extract`] | PDF / DOCX / plain-text extraction |
//! | [`embedding`] | Embedding backends (fastembed, OpenAI, Ollama, hashing) |
//! | [`store`] | Persistent per-thread vector index |
//! | [`ingest`] | Upload ingestion pipeline |
//! | [`retrieve`] | Query-time context retrieval |
//!
//! Pure data types, chunking and the flat index live in [`ragthread_core`],
//! re-exported here as [`core`].

pub mod config;
pub mod embedding;
pub mod extract;
pub mod ingest;
pub mod retrieve;
pub mod store;

pub use ragthread_core as core;
pub use ragthread_core::{RagError, Result};

//! Document ingestion pipeline.
//!
//! One upload flows through extraction → chunking → embedding → append.
//! Every stage before the append can reject the document; nothing is
//! visible to readers until the append commits.

use std::path::Path;
use std::sync::Arc;

use ragthread_core::chunk::ChunkerConfig;
use ragthread_core::embedding::{encode_checked, Embedder};
use ragthread_core::models::{DocumentType, IngestOutcome, NewChunk, ThreadId};
use ragthread_core::{RagError, Result};
use tracing::{debug, info, info_span, Instrument};

use crate::extract::extract_text;
use crate::store::ThreadIndexStore;

/// Extracts, chunks, embeds and appends documents to thread indices.
#[derive(Clone)]
pub struct IngestionPipeline {
    store: Arc<ThreadIndexStore>,
    embedder: Arc<dyn Embedder>,
    chunker: ChunkerConfig,
    max_file_size: u64,
}

impl IngestionPipeline {
    pub fn new(
        store: Arc<ThreadIndexStore>,
        embedder: Arc<dyn Embedder>,
        chunker: ChunkerConfig,
        max_file_size: u64,
    ) -> Self {
        Self {
            store,
            embedder,
            chunker,
            max_file_size,
        }
    }

    /// Ingest one uploaded document into the thread's index.
    ///
    /// Every chunk is tagged with `filename` as its source. Uploading the
    /// same file twice stores its chunks twice.
    ///
    /// # Errors
    ///
    /// - [`RagError::ExtractionFailed`] if the bytes cannot be parsed
    /// - [`RagError::EmptyDocument`] if the extracted text is blank
    /// - [`RagError::EmbeddingUnavailable`] if the embedder fails
    /// - [`RagError::PersistenceFailure`] if the commit fails
    pub async fn ingest(
        &self,
        bytes: &[u8],
        doc_type: DocumentType,
        thread_id: ThreadId,
        filename: &str,
    ) -> Result<IngestOutcome> {
        let span = info_span!("ingest", thread_id, source = %filename, doc_type = %doc_type);
        self.ingest_inner(bytes, doc_type, thread_id, filename)
            .instrument(span)
            .await
    }

    async fn ingest_inner(
        &self,
        bytes: &[u8],
        doc_type: DocumentType,
        thread_id: ThreadId,
        filename: &str,
    ) -> Result<IngestOutcome> {
        let text = extract_text(bytes, doc_type)?;
        debug!(bytes = bytes.len(), chars = text.chars().count(), "text extracted");
        if text.trim().is_empty() {
            return Err(RagError::EmptyDocument);
        }

        let chunks = self.chunker.split(&text)?;
        let texts: Vec<String> = chunks.into_iter().map(|c| c.text).collect();
        debug!(chunks = texts.len(), "text chunked");

        let vectors = encode_checked(self.embedder.as_ref(), &texts).await?;

        let new_chunks = texts
            .into_iter()
            .map(|text| NewChunk {
                source: filename.to_string(),
                text,
            })
            .collect();

        let handle = self.store.open_or_create(thread_id).await?;
        let positions = self.store.append(&handle, new_chunks, vectors).await?;

        info!(
            chunks = positions.len(),
            first_position = positions.start,
            total = positions.end,
            "document ingested"
        );

        Ok(IngestOutcome {
            thread_id,
            source: filename.to_string(),
            chunks_added: positions.len(),
            first_position: positions.start,
            total_entries: positions.end,
        })
    }

    /// Ingest with the collaborator's type token (`pdf`, `txt`, `docx`, `md`).
    ///
    /// # Errors
    ///
    /// [`RagError::UnsupportedFormat`] for any other token, otherwise as
    /// [`ingest`](IngestionPipeline::ingest).
    pub async fn ingest_declared(
        &self,
        bytes: &[u8],
        declared_type: &str,
        thread_id: ThreadId,
        filename: &str,
    ) -> Result<IngestOutcome> {
        let doc_type: DocumentType = declared_type.parse()?;
        self.ingest(bytes, doc_type, thread_id, filename).await
    }

    /// Read a file from disk and ingest it under its file name.
    ///
    /// The type is inferred from the extension.
    ///
    /// # Errors
    ///
    /// [`RagError::FileTooLarge`] if the file exceeds the configured limit,
    /// [`RagError::UnsupportedFormat`] for an unknown extension, otherwise as
    /// [`ingest`](IngestionPipeline::ingest).
    pub async fn ingest_file(&self, path: &Path, thread_id: ThreadId) -> Result<IngestOutcome> {
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| RagError::UnsupportedFormat(path.display().to_string()))?;
        let doc_type = DocumentType::from_filename(&filename)?;

        let size = tokio::fs::metadata(path)
            .await
            .map_err(|e| RagError::persistence(path, e))?
            .len();
        if size > self.max_file_size {
            return Err(RagError::FileTooLarge {
                size,
                limit: self.max_file_size,
            });
        }

        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| RagError::persistence(path, e))?;
        self.ingest(&bytes, doc_type, thread_id, &filename).await
    }
}

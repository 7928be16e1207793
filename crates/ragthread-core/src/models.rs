//! Core data models used throughout ragthread.
//!
//! These types describe the chunks, index entries and results that flow
//! through the ingestion and retrieval paths.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::RagError;

/// Identifier of the conversation thread that owns an index.
pub type ThreadId = i64;

/// A document type accepted for ingestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocumentType {
    Pdf,
    Txt,
    Docx,
    Md,
}

impl DocumentType {
    /// Infer the type from a filename's extension.
    pub fn from_filename(filename: &str) -> Result<Self, RagError> {
        let ext = filename
            .rsplit_once('.')
            .map(|(_, ext)| ext)
            .ok_or_else(|| RagError::UnsupportedFormat(filename.to_string()))?;
        ext.parse()
    }

    /// The canonical lowercase token (`"pdf"`, `"txt"`, `"docx"`, `"md"`).
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentType::Pdf => "pdf",
            DocumentType::Txt => "txt",
            DocumentType::Docx => "docx",
            DocumentType::Md => "md",
        }
    }
}

impl FromStr for DocumentType {
    type Err = RagError;

    /// Accepts the type token case-insensitively, with or without a leading dot.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let token = s.trim().trim_start_matches('.').to_ascii_lowercase();
        match token.as_str() {
            "pdf" => Ok(DocumentType::Pdf),
            "txt" => Ok(DocumentType::Txt),
            "docx" => Ok(DocumentType::Docx),
            "md" => Ok(DocumentType::Md),
            _ => Err(RagError::UnsupportedFormat(s.to_string())),
        }
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One metadata record, stored at the same position as its vector.
///
/// The serialized field names form the on-disk metadata format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRecord {
    /// Original filename of the document the chunk came from.
    pub source: String,
    /// Position of the entry within the thread index.
    pub chunk_index: usize,
    /// Raw chunk text.
    pub text: String,
    pub thread_id: ThreadId,
}

/// A chunk waiting to be appended; its position is assigned by the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewChunk {
    pub source: String,
    pub text: String,
}

/// Lifecycle state of a thread index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexState {
    /// No artifacts on disk.
    Absent,
    /// Artifacts exist but hold no entries.
    Created,
    /// At least one entry has been committed.
    Populated,
}

/// A single nearest-neighbour hit.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub record: ChunkRecord,
    /// Squared Euclidean distance to the query.
    pub distance: f32,
}

/// Hits ordered by ascending distance, ties broken by lower position.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchResult {
    pub hits: Vec<SearchHit>,
}

impl SearchResult {
    pub fn len(&self) -> usize {
        self.hits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }
}

/// Grounding context assembled for one chat turn.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RetrievedContext {
    pub context: String,
    pub sources: BTreeSet<String>,
}

impl RetrievedContext {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.context.is_empty()
    }
}

/// Result of a successful ingestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestOutcome {
    pub thread_id: ThreadId,
    pub source: String,
    pub chunks_added: usize,
    /// Position assigned to the first new chunk.
    pub first_position: usize,
    /// Entries in the thread index after the append.
    pub total_entries: usize,
}

/// Per-source summary of a thread index, in first-ingested order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentSummary {
    pub source: String,
    pub chunks: usize,
    pub first_position: usize,
}

/// Group records by source, preserving the order sources first appear.
pub fn summarize_sources(records: &[ChunkRecord]) -> Vec<DocumentSummary> {
    let mut out: Vec<DocumentSummary> = Vec::new();
    for record in records {
        match out.iter_mut().find(|d| d.source == record.source) {
            Some(summary) => summary.chunks += 1,
            None => out.push(DocumentSummary {
                source: record.source.clone(),
                chunks: 1,
                first_position: record.chunk_index,
            }),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(source: &str, idx: usize) -> ChunkRecord {
        ChunkRecord {
            source: source.to_string(),
            chunk_index: idx,
            text: format!("chunk {}", idx),
            thread_id: 1,
        }
    }

    #[test]
    fn test_document_type_tokens() {
        assert_eq!("pdf".parse::<DocumentType>().unwrap(), DocumentType::Pdf);
        assert_eq!(".DOCX".parse::<DocumentType>().unwrap(), DocumentType::Docx);
        assert_eq!("Md".parse::<DocumentType>().unwrap(), DocumentType::Md);
        assert!(matches!(
            "exe".parse::<DocumentType>(),
            Err(RagError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_document_type_from_filename() {
        assert_eq!(
            DocumentType::from_filename("notes.final.TXT").unwrap(),
            DocumentType::Txt
        );
        assert!(DocumentType::from_filename("Makefile").is_err());
    }

    #[test]
    fn test_record_serialized_field_names() {
        let json = serde_json::to_value(record("a.pdf", 4)).unwrap();
        assert_eq!(json["source"], "a.pdf");
        assert_eq!(json["chunk_index"], 4);
        assert_eq!(json["text"], "chunk 4");
        assert_eq!(json["thread_id"], 1);
    }

    #[test]
    fn test_summarize_sources_keeps_first_seen_order() {
        let records = vec![
            record("b.md", 0),
            record("b.md", 1),
            record("a.txt", 2),
            record("b.md", 3),
        ];
        let summary = summarize_sources(&records);
        assert_eq!(summary.len(), 2);
        assert_eq!(summary[0].source, "b.md");
        assert_eq!(summary[0].chunks, 3);
        assert_eq!(summary[1].source, "a.txt");
        assert_eq!(summary[1].first_position, 2);
    }
}

//! Retrieval of grounding context for a chat turn.
//!
//! Embeds the user's query, searches the thread index and assembles the
//! `[From {source}]` context blocks the chat orchestrator prepends to its
//! prompt.

use std::sync::Arc;

use ragthread_core::context::assemble_context;
use ragthread_core::embedding::{encode_query, Embedder};
use ragthread_core::models::{IndexState, RetrievedContext, ThreadId};
use ragthread_core::Result;
use tracing::{debug, warn};

use crate::store::ThreadIndexStore;

/// Number of chunks retrieved when the caller has no preference.
pub const DEFAULT_TOP_K: usize = 3;

/// Query-side service over the shared thread store and embedder.
#[derive(Clone)]
pub struct RetrievalService {
    store: Arc<ThreadIndexStore>,
    embedder: Arc<dyn Embedder>,
}

impl RetrievalService {
    pub fn new(store: Arc<ThreadIndexStore>, embedder: Arc<dyn Embedder>) -> Self {
        Self { store, embedder }
    }

    /// Retrieve the `top_k` nearest chunks for `query`.
    ///
    /// A thread with no indexed entries, or a blank query, yields an empty context
    /// without any embedding work.
    pub async fn try_retrieve(
        &self,
        query: &str,
        thread_id: ThreadId,
        top_k: usize,
    ) -> Result<RetrievedContext> {
        if query.trim().is_empty() {
            return Ok(RetrievedContext::empty());
        }

        let handle = self.store.open_or_create(thread_id).await?;
        if self.store.state(thread_id).await? != IndexState::Populated {
            debug!(thread_id, "no indexed entries for thread");
            return Ok(RetrievedContext::empty());
        }

        let query_vec = encode_query(self.embedder.as_ref(), query).await?;
        let result = self.store.search(&handle, &query_vec, top_k).await?;
        debug!(thread_id, hits = result.len(), "retrieval complete");

        Ok(assemble_context(&result))
    }

    /// Like [`try_retrieve`](RetrievalService::try_retrieve), but any failure
    /// is logged and degrades to an empty context so the chat turn proceeds
    /// ungrounded.
    pub async fn retrieve(&self, query: &str, thread_id: ThreadId, top_k: usize) -> RetrievedContext {
        match self.try_retrieve(query, thread_id, top_k).await {
            Ok(ctx) => ctx,
            Err(e) => {
                warn!(thread_id, error = %e, "retrieval failed; continuing without context");
                RetrievedContext::empty()
            }
        }
    }

    /// True when the thread index holds at least one entry.
    ///
    /// An unreadable index counts as having no documents.
    pub async fn has_documents(&self, thread_id: ThreadId) -> bool {
        match self.store.has_documents(thread_id).await {
            Ok(has) => has,
            Err(e) => {
                warn!(thread_id, error = %e, "could not read thread index");
                false
            }
        }
    }

    /// Remove the thread's index artifacts. Idempotent.
    pub async fn delete_index(&self, thread_id: ThreadId) -> Result<()> {
        self.store.delete(thread_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ragthread_core::embedding::HashingEmbedder;

    fn service(dir: &std::path::Path) -> RetrievalService {
        let store = Arc::new(ThreadIndexStore::new(dir, 16).unwrap());
        RetrievalService::new(store, Arc::new(HashingEmbedder::new(16).unwrap()))
    }

    #[tokio::test]
    async fn test_absent_thread_returns_empty() {
        let tmp = tempfile::TempDir::new().unwrap();
        let service = service(tmp.path());
        let ctx = service.try_retrieve("anything", 5, DEFAULT_TOP_K).await.unwrap();
        assert!(ctx.is_empty());
        assert!(ctx.sources.is_empty());
        assert!(!service.has_documents(5).await);
    }

    #[tokio::test]
    async fn test_corrupt_index_degrades_to_empty() {
        let tmp = tempfile::TempDir::new().unwrap();
        std::fs::write(tmp.path().join("thread_5.index"), b"garbage").unwrap();
        std::fs::write(tmp.path().join("thread_5_metadata.json"), b"{}").unwrap();
        let service = service(tmp.path());

        assert!(service.try_retrieve("q", 5, 3).await.is_err());
        assert!(service.retrieve("q", 5, 3).await.is_empty());
        assert!(!service.has_documents(5).await);
    }

    #[tokio::test]
    async fn test_delete_index_is_idempotent() {
        let tmp = tempfile::TempDir::new().unwrap();
        let service = service(tmp.path());
        service.delete_index(11).await.unwrap();
        service.delete_index(11).await.unwrap();
    }
}

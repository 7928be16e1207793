//! Grounding context assembly.
//!
//! Turns a [`SearchResult`] into the prompt excerpt handed to the chat
//! orchestrator: one `[From {source}]` block per hit, nearest first,
//! separated by a blank line, plus the set of contributing sources.

use std::collections::BTreeSet;

use crate::models::{RetrievedContext, SearchResult};

/// Build the context string and source set for a search result.
///
/// Every hit produces its own block, even when several come from the
/// same source; only the source set is deduplicated.
///
/// # Example
///
/// ```rust
/// use ragthread_core::context::assemble_context;
/// use ragthread_core::models::{ChunkRecord, SearchHit, SearchResult};
///
/// let result = SearchResult {
///     hits: vec![SearchHit {
///         record: ChunkRecord {
///             source: "guide.md".into(),
///             chunk_index: 0,
///             text: "Install with cargo.".into(),
///             thread_id: 1,
///         },
///         distance: 0.1,
///     }],
/// };
/// let ctx = assemble_context(&result);
/// assert_eq!(ctx.context, "[From guide.md]\nInstall with cargo.");
/// assert!(ctx.sources.contains("guide.md"));
/// ```
pub fn assemble_context(result: &SearchResult) -> RetrievedContext {
    let mut sources = BTreeSet::new();
    let blocks: Vec<String> = result
        .hits
        .iter()
        .map(|hit| {
            sources.insert(hit.record.source.clone());
            format!("[From {}]\n{}", hit.record.source, hit.record.text)
        })
        .collect();

    RetrievedContext {
        context: blocks.join("\n\n"),
        sources,
    }
}

//! Persistent per-thread vector index.
//!
//! Every conversation thread owns two artifacts under the configured
//! `index_dir`:
//!
//! | File | Contents |
//! |------|----------|
//! | `thread_{id}.index` | vector store ([`FlatIndex`] binary layout, generation-stamped) |
//! | `thread_{id}_metadata.json` | one [`ChunkRecord`] per vector, same order |
//!
//! # Commit protocol
//!
//! An append of generation `g + 1`:
//!
//! 1. the vector store is written to `thread_{id}.index.tmp`, fsynced and renamed into place,
//! 2. the metadata is written to `thread_{id}_metadata.json.tmp`, fsynced and renamed into place.
//!
//! The metadata rename is the commit point. On load, a vector store one
//! generation ahead of the metadata is an interrupted append and is rolled
//! back by truncating it to the committed prefix. A vector store without
//! metadata is an interrupted first write and is removed.
//!
//! A rebuild ([`ThreadIndexStore::remove_source`]) shrinks the vector store,
//! so truncation cannot undo it. Its metadata is written to the scratch file
//! before the vector store is replaced, and an interrupted rebuild is
//! completed from that file on load.
//!
//! # Concurrency
//!
//! Writers for one thread are serialized by an async mutex whose guard is
//! moved into the blocking persist task, so a dropped caller cannot leave
//! disk and cache out of step. Readers clone the last published
//! `Arc<Snapshot>` and never block on a writer's I/O.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, Write};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use ragthread_core::index::{FlatIndex, NearestNeighbors};
use ragthread_core::models::{
    summarize_sources, ChunkRecord, DocumentSummary, IndexState, NewChunk, SearchHit,
    SearchResult, ThreadId,
};
use ragthread_core::{RagError, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

const METADATA_FORMAT: u32 = 1;

/// How a write is ordered, and so how an interruption is recovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteKind {
    /// Grows the vector store; recovered by truncation.
    Append,
    /// Shrinks the vector store; recovered from the pending metadata.
    Rebuild,
}

/// On-disk metadata store.
#[derive(Debug, Serialize, Deserialize)]
struct MetadataFile {
    format: u32,
    dims: usize,
    generation: u64,
    updated_at: DateTime<Utc>,
    records: Vec<ChunkRecord>,
}

/// Filesystem locations of one thread's artifacts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub vectors: PathBuf,
    pub metadata: PathBuf,
}

impl ArtifactPaths {
    fn new(index_dir: &Path, thread_id: ThreadId) -> Self {
        Self {
            vectors: index_dir.join(format!("thread_{}.index", thread_id)),
            metadata: index_dir.join(format!("thread_{}_metadata.json", thread_id)),
        }
    }

    /// Scratch file a write goes through before being renamed over `path`.
    pub fn tmp_path(path: &Path) -> PathBuf {
        let mut name = path.as_os_str().to_owned();
        name.push(".tmp");
        PathBuf::from(name)
    }
}

/// Committed, immutable view of a thread index.
#[derive(Debug)]
struct Snapshot {
    state: IndexState,
    generation: u64,
    index: FlatIndex,
    records: Vec<ChunkRecord>,
}

impl Snapshot {
    fn absent(dims: usize) -> Self {
        Self {
            state: IndexState::Absent,
            generation: 0,
            index: FlatIndex::new(dims),
            records: Vec::new(),
        }
    }

    fn committed(generation: u64, index: FlatIndex, records: Vec<ChunkRecord>) -> Self {
        let state = if records.is_empty() {
            IndexState::Created
        } else {
            IndexState::Populated
        };
        Self {
            state,
            generation,
            index,
            records,
        }
    }
}

struct ThreadSlot {
    thread_id: ThreadId,
    paths: ArtifactPaths,
    writer: Arc<tokio::sync::Mutex<()>>,
    /// `None` until the artifacts have been loaded.
    snapshot: RwLock<Option<Arc<Snapshot>>>,
}

impl ThreadSlot {
    fn current(&self) -> Option<Arc<Snapshot>> {
        self.snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn publish(&self, snapshot: Snapshot) -> Arc<Snapshot> {
        let snapshot = Arc::new(snapshot);
        *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&snapshot));
        snapshot
    }

    /// Return the cached snapshot, loading it from disk on first use.
    ///
    /// Caller must hold the writer lock.
    fn load_locked(&self, dims: usize) -> Result<Arc<Snapshot>> {
        if let Some(snapshot) = self.current() {
            return Ok(snapshot);
        }
        let snapshot = load_from_disk(&self.paths, self.thread_id, dims)?;
        debug!(
            thread_id = self.thread_id,
            state = ?snapshot.state,
            entries = snapshot.records.len(),
            "thread index loaded"
        );
        Ok(self.publish(snapshot))
    }
}

/// A thread index opened through [`ThreadIndexStore::open_or_create`].
#[derive(Clone)]
pub struct ThreadHandle {
    slot: Arc<ThreadSlot>,
}

impl ThreadHandle {
    pub fn thread_id(&self) -> ThreadId {
        self.slot.thread_id
    }
}

impl std::fmt::Debug for ThreadHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadHandle")
            .field("thread_id", &self.slot.thread_id)
            .finish()
    }
}

/// All thread indices under one directory, with a fixed vector width.
///
/// Artifacts are loaded lazily, once per process, and cached.
pub struct ThreadIndexStore {
    index_dir: PathBuf,
    dims: usize,
    slots: Mutex<HashMap<ThreadId, Arc<ThreadSlot>>>,
}

impl ThreadIndexStore {
    /// # Errors
    ///
    /// [`RagError::InvalidConfiguration`] when `dims` is zero.
    pub fn new(index_dir: impl Into<PathBuf>, dims: usize) -> Result<Self> {
        if dims == 0 {
            return Err(RagError::InvalidConfiguration(
                "index dims must be > 0".to_string(),
            ));
        }
        Ok(Self {
            index_dir: index_dir.into(),
            dims,
            slots: Mutex::new(HashMap::new()),
        })
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn index_dir(&self) -> &Path {
        &self.index_dir
    }

    /// Where the artifacts of `thread_id` live (whether or not they exist).
    pub fn artifact_paths(&self, thread_id: ThreadId) -> ArtifactPaths {
        ArtifactPaths::new(&self.index_dir, thread_id)
    }

    fn slot(&self, thread_id: ThreadId) -> Arc<ThreadSlot> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let slot = slots.entry(thread_id).or_insert_with(|| {
            Arc::new(ThreadSlot {
                thread_id,
                paths: ArtifactPaths::new(&self.index_dir, thread_id),
                writer: Arc::new(tokio::sync::Mutex::new(())),
                snapshot: RwLock::new(None),
            })
        });
        Arc::clone(slot)
    }

    async fn snapshot(&self, slot: &Arc<ThreadSlot>) -> Result<Arc<Snapshot>> {
        if let Some(snapshot) = slot.current() {
            return Ok(snapshot);
        }
        let guard = Arc::clone(&slot.writer).lock_owned().await;
        let task_slot = Arc::clone(slot);
        let dims = self.dims;
        run_blocking(&slot.paths.vectors, move || {
            let _guard = guard;
            task_slot.load_locked(dims)
        })
        .await
    }

    /// Open a thread index, loading its artifacts if present.
    ///
    /// An unknown thread opens as [`IndexState::Absent`]; no files are created.
    ///
    /// # Errors
    ///
    /// [`RagError::IndexCorrupt`] or [`RagError::DimensionMismatch`] when the
    /// stored artifacts are unusable, [`RagError::PersistenceFailure`] on I/O errors.
    pub async fn open_or_create(&self, thread_id: ThreadId) -> Result<ThreadHandle> {
        let slot = self.slot(thread_id);
        self.snapshot(&slot).await?;
        Ok(ThreadHandle { slot })
    }

    pub async fn state(&self, thread_id: ThreadId) -> Result<IndexState> {
        let slot = self.slot(thread_id);
        Ok(self.snapshot(&slot).await?.state)
    }

    /// True when the thread index holds at least one entry.
    pub async fn has_documents(&self, thread_id: ThreadId) -> Result<bool> {
        Ok(self.state(thread_id).await? == IndexState::Populated)
    }

    /// Number of committed entries.
    pub async fn len(&self, thread_id: ThreadId) -> Result<usize> {
        let slot = self.slot(thread_id);
        Ok(self.snapshot(&slot).await?.records.len())
    }

    /// Committed metadata records, in position order.
    pub async fn records(&self, thread_id: ThreadId) -> Result<Vec<ChunkRecord>> {
        let slot = self.slot(thread_id);
        Ok(self.snapshot(&slot).await?.records.clone())
    }

    /// Documents contributing to the index, in first-ingested order.
    pub async fn documents(&self, thread_id: ThreadId) -> Result<Vec<DocumentSummary>> {
        let slot = self.slot(thread_id);
        Ok(summarize_sources(&self.snapshot(&slot).await?.records))
    }

    /// Append chunks and their vectors, returning the positions assigned.
    ///
    /// The batch is committed to both artifacts or not at all. An empty
    /// batch on an absent thread creates empty artifacts; on an existing
    /// thread it is a no-op.
    ///
    /// # Errors
    ///
    /// - [`RagError::MisalignedBatch`] if `chunks` and `vectors` differ in length
    /// - [`RagError::DimensionMismatch`] if any vector has the wrong width
    /// - [`RagError::PersistenceFailure`] if writing fails; the previous state stays committed
    pub async fn append(
        &self,
        handle: &ThreadHandle,
        chunks: Vec<NewChunk>,
        vectors: Vec<Vec<f32>>,
    ) -> Result<Range<usize>> {
        if chunks.len() != vectors.len() {
            return Err(RagError::MisalignedBatch {
                chunks: chunks.len(),
                vectors: vectors.len(),
            });
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != self.dims) {
            return Err(RagError::DimensionMismatch {
                expected: self.dims,
                actual: bad.len(),
            });
        }

        let slot = Arc::clone(&handle.slot);
        let guard = Arc::clone(&slot.writer).lock_owned().await;
        let dims = self.dims;
        let vectors_path = slot.paths.vectors.clone();

        run_blocking(&vectors_path, move || {
            let _guard = guard;
            let current = slot.load_locked(dims)?;
            let start = current.records.len();

            if chunks.is_empty() && current.state != IndexState::Absent {
                return Ok(start..start);
            }

            let mut index = current.index.clone();
            index.add(&vectors)?;

            let mut records = current.records.clone();
            records.extend(chunks.into_iter().enumerate().map(|(i, chunk)| ChunkRecord {
                source: chunk.source,
                chunk_index: start + i,
                text: chunk.text,
                thread_id: slot.thread_id,
            }));

            let generation = current.generation + 1;
            persist(&slot.paths, &index, &records, generation, dims, WriteKind::Append)?;
            let end = records.len();
            slot.publish(Snapshot::committed(generation, index, records));

            info!(
                thread_id = slot.thread_id,
                added = end - start,
                total = end,
                generation,
                "append committed"
            );
            Ok(start..end)
        })
        .await
    }

    /// The `top_k` stored entries nearest to `query`, nearest first.
    ///
    /// Returns an empty result for an absent or empty thread.
    ///
    /// # Errors
    ///
    /// [`RagError::DimensionMismatch`] if `query` has the wrong width.
    pub async fn search(
        &self,
        handle: &ThreadHandle,
        query: &[f32],
        top_k: usize,
    ) -> Result<SearchResult> {
        let snapshot = self.snapshot(&handle.slot).await?;
        if snapshot.state == IndexState::Absent {
            return Ok(SearchResult::default());
        }

        let hits = snapshot
            .index
            .search(query, top_k)?
            .into_iter()
            .filter_map(|n| {
                snapshot.records.get(n.position).map(|record| SearchHit {
                    record: record.clone(),
                    distance: n.distance,
                })
            })
            .collect();
        Ok(SearchResult { hits })
    }

    /// Remove both artifacts of a thread. Deleting an absent thread is a no-op.
    pub async fn delete(&self, thread_id: ThreadId) -> Result<()> {
        let slot = self.slot(thread_id);
        let guard = Arc::clone(&slot.writer).lock_owned().await;
        let dims = self.dims;
        let metadata_path = slot.paths.metadata.clone();

        run_blocking(&metadata_path, move || {
            let _guard = guard;
            remove_artifacts(&slot.paths)?;
            slot.publish(Snapshot::absent(dims));
            info!(thread_id = slot.thread_id, "thread index deleted");
            Ok(())
        })
        .await
    }

    /// Rebuild the thread index without the entries of `source`.
    ///
    /// Stored vectors are reused and positions renumbered contiguously.
    /// Removing the last source deletes the artifacts. Returns the number of
    /// entries removed.
    pub async fn remove_source(&self, thread_id: ThreadId, source: &str) -> Result<usize> {
        let slot = self.slot(thread_id);
        let guard = Arc::clone(&slot.writer).lock_owned().await;
        let dims = self.dims;
        let source = source.to_string();
        let vectors_path = slot.paths.vectors.clone();

        run_blocking(&vectors_path, move || {
            let _guard = guard;
            let current = slot.load_locked(dims)?;

            let keep: Vec<usize> = current
                .records
                .iter()
                .enumerate()
                .filter(|(_, r)| r.source != source)
                .map(|(i, _)| i)
                .collect();
            let removed = current.records.len() - keep.len();
            if removed == 0 {
                return Ok(0);
            }

            if keep.is_empty() {
                remove_artifacts(&slot.paths)?;
                slot.publish(Snapshot::absent(dims));
            } else {
                let index = current.index.select(&keep);
                let records: Vec<ChunkRecord> = keep
                    .iter()
                    .enumerate()
                    .map(|(new_pos, &old_pos)| ChunkRecord {
                        chunk_index: new_pos,
                        ..current.records[old_pos].clone()
                    })
                    .collect();
                let generation = current.generation + 1;
                persist(
                    &slot.paths,
                    &index,
                    &records,
                    generation,
                    dims,
                    WriteKind::Rebuild,
                )?;
                slot.publish(Snapshot::committed(generation, index, records));
            }

            info!(
                thread_id = slot.thread_id,
                source = %source,
                removed,
                "source removed from thread index"
            );
            Ok(removed)
        })
        .await
    }
}

async fn run_blocking<T, F>(path: &Path, f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| RagError::persistence(path, io::Error::other(e)))?
}

// ============ Disk I/O ============

fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(RagError::persistence(path, e)),
    }
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(RagError::persistence(path, e)),
    }
}

fn write_synced(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut file = File::create(path).map_err(|e| RagError::persistence(path, e))?;
    file.write_all(bytes)
        .and_then(|()| file.sync_all())
        .map_err(|e| RagError::persistence(path, e))
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = ArtifactPaths::tmp_path(path);
    write_synced(&tmp, bytes)?;
    fs::rename(&tmp, path).map_err(|e| RagError::persistence(path, e))
}

/// Write generation `generation` of both artifacts.
fn persist(
    paths: &ArtifactPaths,
    index: &FlatIndex,
    records: &[ChunkRecord],
    generation: u64,
    dims: usize,
    kind: WriteKind,
) -> Result<()> {
    if let Some(dir) = paths.metadata.parent() {
        fs::create_dir_all(dir).map_err(|e| RagError::persistence(dir, e))?;
    }

    let metadata = MetadataFile {
        format: METADATA_FORMAT,
        dims,
        generation,
        updated_at: Utc::now(),
        records: records.to_vec(),
    };
    let json = serde_json::to_vec(&metadata)
        .map_err(|e| RagError::persistence(&paths.metadata, e.into()))?;
    let vectors = index.encode(generation);

    match kind {
        WriteKind::Append => {
            write_atomic(&paths.vectors, &vectors)?;
            write_atomic(&paths.metadata, &json)
        }
        WriteKind::Rebuild => {
            let pending = ArtifactPaths::tmp_path(&paths.metadata);
            write_synced(&pending, &json)?;
            if let Err(e) = write_atomic(&paths.vectors, &vectors) {
                // The vector store is untouched, so the rebuild never happened.
                remove_if_exists(&pending)?;
                return Err(e);
            }
            fs::rename(&pending, &paths.metadata)
                .map_err(|e| RagError::persistence(&paths.metadata, e))
        }
    }
}

/// Metadata first: once it is gone the thread reads as absent.
fn remove_artifacts(paths: &ArtifactPaths) -> Result<()> {
    remove_if_exists(&paths.metadata)?;
    remove_if_exists(&paths.vectors)?;
    remove_if_exists(&ArtifactPaths::tmp_path(&paths.metadata))?;
    remove_if_exists(&ArtifactPaths::tmp_path(&paths.vectors))
}

fn corrupt(msg: String) -> RagError {
    RagError::IndexCorrupt(msg)
}

fn parse_metadata(bytes: &[u8], path: &Path) -> Result<MetadataFile> {
    let metadata: MetadataFile = serde_json::from_slice(bytes)
        .map_err(|e| corrupt(format!("{}: {}", path.display(), e)))?;
    if metadata.format != METADATA_FORMAT {
        return Err(corrupt(format!(
            "{}: unsupported metadata format {}",
            path.display(),
            metadata.format
        )));
    }
    Ok(metadata)
}

fn check_records(records: &[ChunkRecord], thread_id: ThreadId) -> Result<()> {
    for (position, record) in records.iter().enumerate() {
        if record.chunk_index != position {
            return Err(corrupt(format!(
                "record at position {} carries chunk_index {}",
                position, record.chunk_index
            )));
        }
        if record.thread_id != thread_id {
            return Err(corrupt(format!(
                "record at position {} belongs to thread {}",
                position, record.thread_id
            )));
        }
    }
    Ok(())
}

/// Pending metadata that completes an interrupted rebuild of `generation`.
fn pending_metadata(
    paths: &ArtifactPaths,
    generation: u64,
    count: usize,
    thread_id: ThreadId,
) -> Option<MetadataFile> {
    let pending = ArtifactPaths::tmp_path(&paths.metadata);
    let bytes = fs::read(&pending).ok()?;
    let metadata = parse_metadata(&bytes, &pending).ok()?;
    let complete = metadata.generation == generation
        && metadata.records.len() == count
        && check_records(&metadata.records, thread_id).is_ok();
    complete.then_some(metadata)
}

fn roll_forward(paths: &ArtifactPaths, thread_id: ThreadId, generation: u64) -> Result<()> {
    warn!(thread_id, generation, "completing interrupted index rebuild");
    let pending = ArtifactPaths::tmp_path(&paths.metadata);
    fs::rename(&pending, &paths.metadata).map_err(|e| RagError::persistence(&paths.metadata, e))
}

fn discard_pending(paths: &ArtifactPaths) {
    let _ = fs::remove_file(ArtifactPaths::tmp_path(&paths.metadata));
}

fn load_from_disk(paths: &ArtifactPaths, thread_id: ThreadId, dims: usize) -> Result<Snapshot> {
    let vector_bytes = read_optional(&paths.vectors)?;
    let metadata_bytes = read_optional(&paths.metadata)?;

    match (vector_bytes, metadata_bytes) {
        (None, None) => {
            discard_pending(paths);
            Ok(Snapshot::absent(dims))
        }
        (None, Some(_)) => Err(corrupt(format!(
            "{} exists without its vector store",
            paths.metadata.display()
        ))),
        (Some(_), None) => {
            warn!(thread_id, "removing vector store of an uncommitted first write");
            remove_if_exists(&paths.vectors)?;
            discard_pending(paths);
            Ok(Snapshot::absent(dims))
        }
        (Some(vector_bytes), Some(metadata_bytes)) => {
            let decoded = FlatIndex::decode(&vector_bytes)?;
            let metadata = parse_metadata(&metadata_bytes, &paths.metadata)?;
            check_dims(metadata.dims, dims)?;
            check_dims(decoded.index.dims(), dims)?;
            check_records(&metadata.records, thread_id)?;

            let mut index = decoded.index;
            let committed = metadata.records.len();

            if decoded.generation == metadata.generation {
                if index.len() != committed {
                    return Err(corrupt(format!(
                        "vector store holds {} entries, metadata {}",
                        index.len(),
                        committed
                    )));
                }
                discard_pending(paths);
                return Ok(Snapshot::committed(
                    metadata.generation,
                    index,
                    metadata.records,
                ));
            }

            if decoded.generation != metadata.generation + 1 {
                return Err(corrupt(format!(
                    "vector store generation {} does not follow metadata generation {}",
                    decoded.generation, metadata.generation
                )));
            }

            if index.len() < committed {
                let Some(pending) =
                    pending_metadata(paths, decoded.generation, index.len(), thread_id)
                else {
                    return Err(corrupt(format!(
                        "interrupted rebuild left {} vectors for {} committed entries",
                        index.len(),
                        committed
                    )));
                };
                roll_forward(paths, thread_id, decoded.generation)?;
                return Ok(Snapshot::committed(
                    decoded.generation,
                    index,
                    pending.records,
                ));
            }

            warn!(
                thread_id,
                discarded = index.len() - committed,
                "rolling back uncommitted append"
            );
            index.truncate(committed);
            write_atomic(&paths.vectors, &index.encode(metadata.generation))?;
            discard_pending(paths);
            Ok(Snapshot::committed(
                metadata.generation,
                index,
                metadata.records,
            ))
        }
    }
}

fn check_dims(stored: usize, configured: usize) -> Result<()> {
    if stored != configured {
        return Err(RagError::DimensionMismatch {
            expected: configured,
            actual: stored,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(source: &str, text: &str) -> NewChunk {
        NewChunk {
            source: source.to_string(),
            text: text.to_string(),
        }
    }

    #[test]
    fn test_artifact_paths() {
        let paths = ArtifactPaths::new(Path::new("/data"), 42);
        assert_eq!(paths.vectors, PathBuf::from("/data/thread_42.index"));
        assert_eq!(paths.metadata, PathBuf::from("/data/thread_42_metadata.json"));
        assert_eq!(
            ArtifactPaths::tmp_path(&paths.metadata),
            PathBuf::from("/data/thread_42_metadata.json.tmp")
        );
    }

    #[test]
    fn test_zero_dims_rejected() {
        assert!(matches!(
            ThreadIndexStore::new("/tmp/unused", 0),
            Err(RagError::InvalidConfiguration(_))
        ));
    }

    #[tokio::test]
    async fn test_open_absent_creates_no_files() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = ThreadIndexStore::new(tmp.path().join("idx"), 4).unwrap();
        let handle = store.open_or_create(1).await.unwrap();
        assert_eq!(handle.thread_id(), 1);
        assert_eq!(store.state(1).await.unwrap(), IndexState::Absent);
        assert!(!tmp.path().join("idx").exists());
    }

    #[tokio::test]
    async fn test_empty_append_creates_empty_index() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = ThreadIndexStore::new(tmp.path(), 4).unwrap();
        let handle = store.open_or_create(3).await.unwrap();
        let positions = store.append(&handle, vec![], vec![]).await.unwrap();
        assert!(positions.is_empty());
        assert_eq!(store.state(3).await.unwrap(), IndexState::Created);
        assert!(!store.has_documents(3).await.unwrap());

        let reopened = ThreadIndexStore::new(tmp.path(), 4).unwrap();
        assert_eq!(reopened.state(3).await.unwrap(), IndexState::Created);
    }

    #[tokio::test]
    async fn test_misaligned_batch_rejected() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = ThreadIndexStore::new(tmp.path(), 2).unwrap();
        let handle = store.open_or_create(1).await.unwrap();
        let err = store
            .append(&handle, vec![chunk("a.txt", "x")], vec![])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RagError::MisalignedBatch {
                chunks: 1,
                vectors: 0
            }
        ));
        assert_eq!(store.state(1).await.unwrap(), IndexState::Absent);
    }

    #[tokio::test]
    async fn test_wrong_width_rejected() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = ThreadIndexStore::new(tmp.path(), 2).unwrap();
        let handle = store.open_or_create(1).await.unwrap();
        let err = store
            .append(&handle, vec![chunk("a.txt", "x")], vec![vec![1.0, 2.0, 3.0]])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RagError::DimensionMismatch {
                expected: 2,
                actual: 3
            }
        ));
    }

    #[tokio::test]
    async fn test_records_carry_thread_and_position() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = ThreadIndexStore::new(tmp.path(), 2).unwrap();
        let handle = store.open_or_create(9).await.unwrap();
        let positions = store
            .append(
                &handle,
                vec![chunk("a.txt", "one"), chunk("a.txt", "two")],
                vec![vec![0.0, 0.0], vec![1.0, 1.0]],
            )
            .await
            .unwrap();
        assert_eq!(positions, 0..2);

        let records = store.records(9).await.unwrap();
        assert_eq!(records[1].chunk_index, 1);
        assert_eq!(records[1].thread_id, 9);
        assert_eq!(records[1].text, "two");
    }

    #[test]
    fn test_check_records_rejects_gaps() {
        let records = vec![ChunkRecord {
            source: "a".into(),
            chunk_index: 1,
            text: "t".into(),
            thread_id: 1,
        }];
        assert!(matches!(
            check_records(&records, 1),
            Err(RagError::IndexCorrupt(_))
        ));
    }
}

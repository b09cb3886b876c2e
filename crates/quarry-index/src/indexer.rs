//! Indexing orchestration.
//!
//! The [`Indexer`] ties the walker, chunker, embedding pool, and vector
//! cache together. Indexing passes are serialized through an internal
//! lock; concurrent callers coalesce onto the same pass rather than
//! embedding the same files twice. Reads (search snapshots, status) stay
//! concurrent throughout.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use quarry_core::{ChunkingMode, EmbeddingRecord, IndexStatus, QuarryConfig, QuarryError};
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::cache::{format_bytes, hash_content, VectorCache};
use crate::chunker::chunk_file;
use crate::embedder::{EmbeddingPool, PendingBatch};
use crate::walker::walk_workspace;

/// What one indexing pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexSummary {
    /// Files found by the walk.
    pub files_scanned: usize,
    /// Files re-chunked and re-embedded.
    pub files_indexed: usize,
    /// Files served from the cache unchanged.
    pub files_cached: usize,
    /// Cache entries dropped for files no longer present.
    pub files_removed: usize,
    /// Chunks successfully embedded this pass.
    pub chunks_embedded: usize,
    /// Chunks that failed to embed this pass.
    pub chunk_failures: usize,
}

/// Snapshot of the index for status reporting.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    /// Overall index state.
    pub status: IndexStatus,
    /// Files with a cache entry.
    pub files_indexed: usize,
    /// Searchable chunks across all files.
    pub chunks_count: usize,
    /// How files are split into chunks.
    pub chunking_mode: ChunkingMode,
    /// Resolved model name.
    pub model: String,
    /// Resolved embedding dimension.
    pub dimension: usize,
    /// Device inference runs on.
    pub device: String,
    /// Whether disk persistence is enabled.
    pub cache_enabled: bool,
    /// Persisted cache size in bytes.
    pub cache_size_bytes: u64,
    /// Persisted cache size, human readable.
    pub cache_size_formatted: String,
}

/// Clears the indexing flag when a pass ends, on every exit path.
struct IndexingGuard<'a>(&'a AtomicBool);

impl Drop for IndexingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Orchestrates indexing passes over a workspace.
pub struct Indexer {
    config: Arc<QuarryConfig>,
    pool: Arc<EmbeddingPool>,
    cache: RwLock<VectorCache>,
    index_lock: Mutex<()>,
    indexing: AtomicBool,
}

impl Indexer {
    /// Create an indexer, loading any persisted cache.
    ///
    /// Cached vectors whose dimension disagrees with the pool's resolved
    /// dimension are evicted up front, so a model or dimension change
    /// triggers re-embedding instead of mixed-dimension search.
    pub fn new(config: Arc<QuarryConfig>, pool: Arc<EmbeddingPool>) -> Self {
        let mut cache = VectorCache::load(
            &config.workspace.cache_directory,
            config.cache.enabled,
        );
        cache.evict_dimension_mismatch(pool.dimension());

        Self {
            config,
            pool,
            cache: RwLock::new(cache),
            index_lock: Mutex::new(()),
            indexing: AtomicBool::new(false),
        }
    }

    /// Index the whole workspace incrementally.
    ///
    /// Unchanged files (by content hash) are skipped; changed and new
    /// files are re-chunked and re-embedded, and entries for deleted
    /// files are dropped. Batches for all changed files are dispatched
    /// before any is awaited, so they run in parallel across the pool.
    ///
    /// Concurrent calls serialize: a second caller waits for the running
    /// pass, then finds its files current and does no embedding work.
    ///
    /// # Errors
    ///
    /// Returns [`QuarryError::FileNotFound`] if the search directory is
    /// missing, [`QuarryError::Worker`] if a worker died mid-batch, and
    /// I/O errors from the cache flush.
    pub async fn index_workspace(&self) -> Result<IndexSummary, QuarryError> {
        let _pass = self.index_lock.lock().await;
        self.indexing.store(true, Ordering::SeqCst);
        let _flag = IndexingGuard(&self.indexing);

        let files = walk_workspace(&self.config.workspace.search_directory)?;
        let mut summary = IndexSummary {
            files_scanned: files.len(),
            ..IndexSummary::default()
        };

        // Decide what changed under a read lock, dispatch everything,
        // then take the write lock only to install results.
        let mut pending: Vec<(PathBuf, String, PendingBatch)> = Vec::new();
        {
            let cache = self.cache.read().await;
            for file in &files {
                let hash = hash_content(&file.content);
                if cache.is_current(&file.path, &hash) {
                    summary.files_cached += 1;
                    continue;
                }
                let chunks = chunk_file(&file.path, &file.content, &self.config.chunking);
                debug!(file = %file.path.display(), chunks = chunks.len(), "indexing file");
                pending.push((file.path.clone(), hash, self.pool.dispatch(chunks)));
            }
        }

        let mut results = Vec::with_capacity(pending.len());
        for (path, hash, batch) in pending {
            let records = batch.wait().await?;
            summary.files_indexed += 1;
            summary.chunks_embedded += records.iter().filter(|r| r.success).count();
            summary.chunk_failures += records.iter().filter(|r| !r.success).count();
            results.push((path, hash, records));
        }

        {
            let mut cache = self.cache.write().await;
            for (path, hash, records) in results {
                cache.insert(path, hash, records);
            }
            let present: std::collections::HashSet<&Path> =
                files.iter().map(|f| f.path.as_path()).collect();
            summary.files_removed = cache.retain_files(|f| present.contains(f));
            cache.flush()?;
        }

        info!(
            scanned = summary.files_scanned,
            indexed = summary.files_indexed,
            cached = summary.files_cached,
            removed = summary.files_removed,
            failures = summary.chunk_failures,
            "indexing pass complete"
        );
        Ok(summary)
    }

    /// Re-index a single file, given its path relative to the search
    /// directory.
    ///
    /// A file that no longer exists has its cache entry dropped; an
    /// unchanged file is a no-op. Returns the number of chunks embedded.
    ///
    /// # Errors
    ///
    /// Returns [`QuarryError::Worker`] if a worker died mid-batch, and
    /// I/O errors from reading the file or flushing the cache.
    pub async fn index_file(&self, path: &Path) -> Result<usize, QuarryError> {
        let _pass = self.index_lock.lock().await;
        self.indexing.store(true, Ordering::SeqCst);
        let _flag = IndexingGuard(&self.indexing);

        let absolute = self.config.workspace.search_directory.join(path);
        let content = match std::fs::read_to_string(&absolute) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let mut cache = self.cache.write().await;
                if cache.remove(path) {
                    debug!(file = %path.display(), "dropped entry for deleted file");
                    cache.flush()?;
                }
                return Ok(0);
            }
            Err(e) => return Err(e.into()),
        };

        let hash = hash_content(&content);
        {
            let cache = self.cache.read().await;
            if cache.is_current(path, &hash) {
                return Ok(0);
            }
        }

        let chunks = chunk_file(path, &content, &self.config.chunking);
        let records = self.pool.process_batch(chunks).await?;
        let embedded = records.iter().filter(|r| r.success).count();

        let mut cache = self.cache.write().await;
        cache.insert(path.to_path_buf(), hash, records);
        cache.flush()?;
        Ok(embedded)
    }

    /// Whether an indexing pass is currently running.
    pub fn is_indexing(&self) -> bool {
        self.indexing.load(Ordering::SeqCst)
    }

    /// A cloned, ordered copy of all searchable records.
    pub async fn snapshot(&self) -> Vec<EmbeddingRecord> {
        let cache = self.cache.read().await;
        cache.vector_store().into_iter().cloned().collect()
    }

    /// Current index state: `indexing` while a pass runs, `ready` once
    /// any records exist, `empty` otherwise.
    pub async fn index_status(&self) -> IndexStatus {
        if self.is_indexing() {
            return IndexStatus::Indexing;
        }
        let cache = self.cache.read().await;
        if cache.chunk_count() > 0 {
            IndexStatus::Ready
        } else {
            IndexStatus::Empty
        }
    }

    /// Full status snapshot for reporting.
    pub async fn status(&self) -> StatusReport {
        let status = self.index_status().await;
        let cache = self.cache.read().await;
        let cache_size_bytes = cache.size_bytes();
        StatusReport {
            status,
            files_indexed: cache.file_count(),
            chunks_count: cache.chunk_count(),
            chunking_mode: self.config.chunking.mode,
            model: self.pool.model_name().to_string(),
            dimension: self.pool.dimension(),
            device: self.pool.device().to_string(),
            cache_enabled: cache.enabled(),
            cache_size_bytes,
            cache_size_formatted: format_bytes(cache_size_bytes),
        }
    }

    /// The embedding pool backing this indexer.
    pub fn pool(&self) -> &Arc<EmbeddingPool> {
        &self.pool
    }

    /// The configuration backing this indexer.
    pub fn config(&self) -> &QuarryConfig {
        &self.config
    }
}

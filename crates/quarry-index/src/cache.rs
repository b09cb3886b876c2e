//! Content-hash keyed vector cache.
//!
//! The cache maps each workspace file to the SHA-256 digest of its
//! content and the embedding records produced from that content. A file
//! whose digest matches its entry is served from memory; any mismatch
//! invalidates the whole entry.
//!
//! The cache persists to `embeddings.json` in the cache directory as a
//! flat array of records, each carrying its file's content hash so the
//! per-file entries can be rebuilt on load. Only successful records are
//! persisted; failures are retried on the next indexing pass. Loading is
//! best-effort: a missing or corrupt file yields an empty cache and a
//! warning, never an error.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use quarry_core::{CacheEntry, EmbeddingRecord, QuarryError};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// File name of the persisted cache inside the cache directory.
pub const CACHE_FILE_NAME: &str = "embeddings.json";

/// SHA-256 hex digest of file content, used to detect changes.
///
/// # Examples
///
/// ```
/// use quarry_index::cache::hash_content;
///
/// let a = hash_content("fn main() {}");
/// let b = hash_content("fn main() {}");
/// assert_eq!(a, b);
/// assert_eq!(a.len(), 64);
/// ```
pub fn hash_content(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// One persisted record: an embedding record plus the content hash of
/// the file it came from.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredRecord {
    content_hash: String,
    #[serde(flatten)]
    record: EmbeddingRecord,
}

/// In-memory vector store with per-file invalidation.
pub struct VectorCache {
    entries: HashMap<PathBuf, CacheEntry>,
    cache_dir: PathBuf,
    enabled: bool,
}

impl VectorCache {
    /// Create an empty cache rooted at `cache_dir`.
    ///
    /// A disabled cache still holds records in memory but never touches
    /// disk.
    pub fn new(cache_dir: impl Into<PathBuf>, enabled: bool) -> Self {
        Self {
            entries: HashMap::new(),
            cache_dir: cache_dir.into(),
            enabled,
        }
    }

    /// Create a cache and populate it from the persisted file, if any.
    ///
    /// A missing, unreadable, or corrupt cache file logs a warning and
    /// starts empty.
    pub fn load(cache_dir: impl Into<PathBuf>, enabled: bool) -> Self {
        let mut cache = Self::new(cache_dir, enabled);
        if !cache.enabled {
            return cache;
        }

        let path = cache.cache_path();
        let data = match std::fs::read_to_string(&path) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return cache,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to read cache file, starting empty");
                return cache;
            }
        };

        let stored: Vec<StoredRecord> = match serde_json::from_str(&data) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to parse cache file, starting empty");
                return cache;
            }
        };

        for StoredRecord {
            content_hash,
            record,
        } in stored
        {
            let entry = cache
                .entries
                .entry(record.file.clone())
                .or_insert_with(|| CacheEntry {
                    content_hash,
                    embedding_records: Vec::new(),
                });
            entry.embedding_records.push(record);
        }

        tracing::debug!(
            files = cache.entries.len(),
            "loaded vector cache from disk"
        );
        cache
    }

    /// Path of the persisted cache file.
    pub fn cache_path(&self) -> PathBuf {
        self.cache_dir.join(CACHE_FILE_NAME)
    }

    /// Whether disk persistence is enabled.
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Whether `file` has an entry matching `content_hash`.
    pub fn is_current(&self, file: &Path, content_hash: &str) -> bool {
        self.entries
            .get(file)
            .is_some_and(|e| e.content_hash == content_hash)
    }

    /// The cached entry for `file`, if any.
    pub fn get(&self, file: &Path) -> Option<&CacheEntry> {
        self.entries.get(file)
    }

    /// Replace the entry for `file` wholesale.
    pub fn insert(
        &mut self,
        file: PathBuf,
        content_hash: String,
        embedding_records: Vec<EmbeddingRecord>,
    ) {
        self.entries.insert(
            file,
            CacheEntry {
                content_hash,
                embedding_records,
            },
        );
    }

    /// Drop the entry for `file`, if present.
    pub fn remove(&mut self, file: &Path) -> bool {
        self.entries.remove(file).is_some()
    }

    /// Drop entries for every file `keep` does not accept. Returns the
    /// number of entries removed.
    pub fn retain_files(&mut self, mut keep: impl FnMut(&Path) -> bool) -> usize {
        let before = self.entries.len();
        self.entries.retain(|file, _| keep(file));
        before - self.entries.len()
    }

    /// Drop entries whose vectors do not have `dimension` components.
    ///
    /// Run after the embedding pool reports its resolved dimension, so a
    /// model or dimension change invalidates stale vectors instead of
    /// mixing them into search. Returns the number of files evicted.
    pub fn evict_dimension_mismatch(&mut self, dimension: usize) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| {
            entry
                .embedding_records
                .iter()
                .filter(|r| r.success)
                .all(|r| r.vector.len() == dimension)
        });
        let evicted = before - self.entries.len();
        if evicted > 0 {
            tracing::info!(evicted, dimension, "evicted cache entries with stale dimension");
        }
        evicted
    }

    /// All successful records, ordered by file path then start line.
    ///
    /// This is the searchable view of the cache; failed records are
    /// excluded.
    pub fn vector_store(&self) -> Vec<&EmbeddingRecord> {
        let mut records: Vec<&EmbeddingRecord> = self
            .entries
            .values()
            .flat_map(|e| e.embedding_records.iter())
            .filter(|r| r.success)
            .collect();
        records.sort_by(|a, b| a.file.cmp(&b.file).then(a.start_line.cmp(&b.start_line)));
        records
    }

    /// Number of files with an entry.
    pub fn file_count(&self) -> usize {
        self.entries.len()
    }

    /// Number of successful records across all entries.
    pub fn chunk_count(&self) -> usize {
        self.entries
            .values()
            .map(|e| e.embedding_records.iter().filter(|r| r.success).count())
            .sum()
    }

    /// Size of the persisted cache file in bytes, 0 if absent.
    pub fn size_bytes(&self) -> u64 {
        std::fs::metadata(self.cache_path())
            .map(|m| m.len())
            .unwrap_or(0)
    }

    /// Write the cache to disk atomically.
    ///
    /// Serializes to a temporary file in the cache directory, then
    /// renames it over `embeddings.json`, so readers never observe a
    /// partial write. A disabled cache is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`QuarryError::Cache`] if the cache directory cannot be
    /// created or the file cannot be written, and
    /// [`QuarryError::Serialization`] if encoding fails.
    pub fn flush(&self) -> Result<(), QuarryError> {
        if !self.enabled {
            return Ok(());
        }

        std::fs::create_dir_all(&self.cache_dir).map_err(|e| {
            QuarryError::Cache(format!(
                "cannot create cache directory {}: {e}",
                self.cache_dir.display()
            ))
        })?;

        let mut stored = Vec::new();
        for entry in self.entries.values() {
            for record in entry.embedding_records.iter().filter(|r| r.success) {
                stored.push(StoredRecord {
                    content_hash: entry.content_hash.clone(),
                    record: record.clone(),
                });
            }
        }
        stored.sort_by(|a, b| {
            a.record
                .file
                .cmp(&b.record.file)
                .then(a.record.start_line.cmp(&b.record.start_line))
        });

        let json = serde_json::to_string(&stored)?;
        let tmp_path = self.cache_dir.join(format!("{CACHE_FILE_NAME}.tmp"));
        std::fs::write(&tmp_path, json).map_err(|e| {
            QuarryError::Cache(format!("cannot write {}: {e}", tmp_path.display()))
        })?;
        std::fs::rename(&tmp_path, self.cache_path()).map_err(|e| {
            QuarryError::Cache(format!(
                "cannot replace {}: {e}",
                self.cache_path().display()
            ))
        })?;

        tracing::debug!(
            files = self.entries.len(),
            records = stored.len(),
            "flushed vector cache"
        );
        Ok(())
    }
}

/// Human-readable byte count, e.g. `1.5 KB`.
///
/// # Examples
///
/// ```
/// use quarry_index::cache::format_bytes;
///
/// assert_eq!(format_bytes(0), "0 B");
/// assert_eq!(format_bytes(1024), "1 KB");
/// assert_eq!(format_bytes(1536), "1.5 KB");
/// ```
pub fn format_bytes(bytes: u64) -> String {
    if bytes == 0 {
        return "0 B".to_string();
    }
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let exponent = (((bytes as f64).ln() / 1024f64.ln()).floor() as usize).min(UNITS.len() - 1);
    let value = bytes as f64 / 1024f64.powi(exponent as i32);
    let mut text = format!("{value:.2}");
    while text.ends_with('0') {
        text.pop();
    }
    if text.ends_with('.') {
        text.pop();
    }
    format!("{text} {}", UNITS[exponent])
}

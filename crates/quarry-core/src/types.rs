use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// A contiguous, possibly overlapping line range of a source file,
/// treated as one retrieval unit.
///
/// Line numbers are 1-based and inclusive. The chunks produced for one
/// file collectively cover every line; consecutive chunks may overlap but
/// never leave a gap.
///
/// # Examples
///
/// ```
/// use std::path::PathBuf;
/// use quarry_core::Chunk;
///
/// let chunk = Chunk {
///     file: PathBuf::from("src/main.rs"),
///     start_line: 1,
///     end_line: 12,
///     text: "fn main() {\n    println!(\"hi\");\n}".into(),
/// };
/// assert!(chunk.start_line <= chunk.end_line);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chunk {
    /// Path to the source file, relative to the workspace root.
    pub file: PathBuf,
    /// First line of the chunk (1-indexed, inclusive).
    pub start_line: u32,
    /// Last line of the chunk (1-indexed, inclusive).
    pub end_line: u32,
    /// Raw chunk text.
    pub text: String,
}

/// One chunk after embedding.
///
/// Failure records carry `success = false`, an empty `vector`, and an
/// error message; they never abort the batch they arrived in.
///
/// # Examples
///
/// ```
/// use std::path::PathBuf;
/// use quarry_core::EmbeddingRecord;
///
/// let record = EmbeddingRecord {
///     file: PathBuf::from("src/lib.rs"),
///     start_line: 1,
///     end_line: 30,
///     content: "pub fn add(a: i32, b: i32) -> i32 { a + b }".into(),
///     vector: vec![0.6, 0.8],
///     success: true,
///     error: None,
/// };
/// assert!(record.success);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddingRecord {
    /// Path to the source file, relative to the workspace root.
    pub file: PathBuf,
    /// First line of the originating chunk (1-indexed, inclusive).
    pub start_line: u32,
    /// Last line of the originating chunk (1-indexed, inclusive).
    pub end_line: u32,
    /// The chunk text that was embedded.
    pub content: String,
    /// Embedding vector; empty when `success` is false.
    #[serde(default)]
    pub vector: Vec<f32>,
    /// Whether embedding succeeded for this chunk.
    pub success: bool,
    /// Error message for failed chunks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl EmbeddingRecord {
    /// Build a successful record from a chunk and its vector.
    pub fn success(chunk: Chunk, vector: Vec<f32>) -> Self {
        Self {
            file: chunk.file,
            start_line: chunk.start_line,
            end_line: chunk.end_line,
            content: chunk.text,
            vector,
            success: true,
            error: None,
        }
    }

    /// Build a failure record from a chunk and an error message.
    pub fn failure(chunk: Chunk, error: impl Into<String>) -> Self {
        Self {
            file: chunk.file,
            start_line: chunk.start_line,
            end_line: chunk.end_line,
            content: chunk.text,
            vector: Vec::new(),
            success: false,
            error: Some(error.into()),
        }
    }
}

/// Per-file cache entry: the content hash at last successful indexing and
/// the embedded chunks produced from that content.
///
/// An entry is valid only while its hash matches the file's current
/// content; any mismatch triggers a full re-chunk and re-embed, replacing
/// the entry wholesale.
///
/// # Examples
///
/// ```
/// use quarry_core::CacheEntry;
///
/// let entry = CacheEntry {
///     content_hash: "d2a8".into(),
///     embedding_records: Vec::new(),
/// };
/// assert!(entry.embedding_records.is_empty());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    /// SHA-256 hex digest of the full file content.
    pub content_hash: String,
    /// Embedded chunks, in file order.
    pub embedding_records: Vec<EmbeddingRecord>,
}

/// A ranked hit returned by the query engine.
///
/// # Examples
///
/// ```
/// use std::path::PathBuf;
/// use quarry_core::SearchResult;
///
/// let hit = SearchResult {
///     file: PathBuf::from("src/auth.rs"),
///     start_line: 10,
///     end_line: 42,
///     snippet: "fn validate_token(token: &str) -> bool { .. }".into(),
///     score: 0.92,
/// };
/// assert!(hit.score > 0.9);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    /// Path to the matched file.
    pub file: PathBuf,
    /// First line of the matched chunk.
    pub start_line: u32,
    /// Last line of the matched chunk.
    pub end_line: u32,
    /// The matched chunk's content.
    pub snippet: String,
    /// Combined semantic + lexical score.
    pub score: f64,
}

/// Indexing state exposed to status reporting.
///
/// `Indexing` while a pass is running, `Ready` once the store holds at
/// least one record, `Empty` otherwise.
///
/// # Examples
///
/// ```
/// use quarry_core::IndexStatus;
///
/// assert_eq!(format!("{}", IndexStatus::Ready), "ready");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexStatus {
    /// No records indexed yet.
    Empty,
    /// An indexing pass is currently running.
    Indexing,
    /// The store holds records and no pass is running.
    Ready,
}

impl fmt::Display for IndexStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexStatus::Empty => write!(f, "empty"),
            IndexStatus::Indexing => write!(f, "indexing"),
            IndexStatus::Ready => write!(f, "ready"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedding_record_serializes_camel_case() {
        let record = EmbeddingRecord {
            file: PathBuf::from("src/lib.rs"),
            start_line: 1,
            end_line: 5,
            content: "fn a() {}".into(),
            vector: vec![1.0, 0.0],
            success: true,
            error: None,
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["startLine"], 1);
        assert_eq!(json["endLine"], 5);
        assert_eq!(json["success"], true);
        // error is omitted when None
        assert!(json.get("error").is_none());
    }

    #[test]
    fn failure_record_has_empty_vector_and_message() {
        let chunk = Chunk {
            file: PathBuf::from("a.rs"),
            start_line: 1,
            end_line: 2,
            text: "broken".into(),
        };
        let record = EmbeddingRecord::failure(chunk, "model error");
        assert!(!record.success);
        assert!(record.vector.is_empty());
        assert_eq!(record.error.as_deref(), Some("model error"));
    }

    #[test]
    fn record_deserializes_without_vector_field() {
        let json = r#"{
            "file": "a.rs",
            "startLine": 1,
            "endLine": 2,
            "content": "x",
            "success": false,
            "error": "boom"
        }"#;
        let record: EmbeddingRecord = serde_json::from_str(json).unwrap();
        assert!(record.vector.is_empty());
        assert!(!record.success);
    }

    #[test]
    fn index_status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&IndexStatus::Indexing).unwrap(),
            "\"indexing\""
        );
    }
}

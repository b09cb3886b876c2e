use std::path::PathBuf;

/// Errors that can occur across the Quarry workspace.
///
/// Each variant wraps a specific error domain. Recoverable conditions
/// (missing cache file, unknown file extension, a single chunk failing to
/// embed) are absorbed where they occur and never reach this type; only
/// failures that break a structural invariant surface here.
///
/// # Examples
///
/// ```
/// use quarry_core::QuarryError;
///
/// let err = QuarryError::Config("semantic_weight must be in 0..=1".into());
/// assert!(err.to_string().contains("semantic_weight"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum QuarryError {
    /// Filesystem I/O failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid or missing configuration, including query/store dimension
    /// mismatches.
    #[error("configuration error: {0}")]
    Config(String),

    /// Embedding a query or loading a model failed.
    #[error("embedding error: {0}")]
    Embedding(String),

    /// A worker unit failed, or no units became ready.
    #[error("worker error: {0}")]
    Worker(String),

    /// The vector cache could not be written.
    #[error("cache error: {0}")]
    Cache(String),

    /// JSON serialization / deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML deserialization failure.
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// A required file was not found.
    #[error("file not found: {}", .0.display())]
    FileNotFound(PathBuf),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_converts() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: QuarryError = io_err.into();
        assert!(err.to_string().contains("gone"));
    }

    #[test]
    fn config_error_displays_message() {
        let err = QuarryError::Config("bad value".into());
        assert_eq!(err.to_string(), "configuration error: bad value");
    }

    #[test]
    fn worker_error_displays_message() {
        let err = QuarryError::Worker("no embedding workers became ready".into());
        assert!(err.to_string().contains("no embedding workers"));
    }

    #[test]
    fn file_not_found_shows_path() {
        let err = QuarryError::FileNotFound(PathBuf::from("/tmp/missing.rs"));
        assert!(err.to_string().contains("/tmp/missing.rs"));
    }
}

//! Deterministic embedding backends for tests.
//!
//! [`HashBackend`] embeds text as a hashed bag of words, so identical
//! text always produces identical vectors (cosine 1.0) without any model
//! download. The factory helpers plug it into an
//! [`EmbeddingPool`](crate::embedder::EmbeddingPool) wherever a real
//! backend would go.

use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use quarry_core::QuarryError;

use crate::model::{BackendFactory, EmbeddingBackend};

/// Hashed bag-of-words embedder. Deterministic, no I/O.
pub struct HashBackend {
    dimension: usize,
    fail_marker: Option<String>,
    delay: Option<Duration>,
}

impl HashBackend {
    /// Create a backend emitting vectors of the given dimension.
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            fail_marker: None,
            delay: None,
        }
    }

    /// Fail any text containing `marker`, for failure-isolation tests.
    pub fn failing_on(dimension: usize, marker: impl Into<String>) -> Self {
        Self {
            fail_marker: Some(marker.into()),
            ..Self::new(dimension)
        }
    }

    /// Sleep for `delay` per embed call, for shutdown-timing tests.
    pub fn with_delay(dimension: usize, delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::new(dimension)
        }
    }
}

impl EmbeddingBackend for HashBackend {
    fn model_name(&self) -> &str {
        "hash-test"
    }

    fn device(&self) -> &str {
        "cpu"
    }

    fn native_dimension(&self) -> usize {
        self.dimension
    }

    fn embed(&mut self, text: &str) -> Result<Vec<f32>, QuarryError> {
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        if let Some(marker) = &self.fail_marker {
            if text.contains(marker.as_str()) {
                return Err(QuarryError::Embedding(format!(
                    "induced failure: text contains '{marker}'"
                )));
            }
        }

        let mut vector = vec![0.0f32; self.dimension];
        for token in text
            .split(|c: char| !c.is_alphanumeric() && c != '_')
            .filter(|t| !t.is_empty())
        {
            let mut hasher = DefaultHasher::new();
            token.hash(&mut hasher);
            vector[(hasher.finish() as usize) % self.dimension] += 1.0;
        }
        Ok(vector)
    }
}

/// Factory producing [`HashBackend`]s.
pub fn hash_backend_factory(dimension: usize) -> BackendFactory {
    Arc::new(move |_config: &quarry_core::EmbeddingConfig| {
        Ok(Box::new(HashBackend::new(dimension)) as Box<dyn EmbeddingBackend>)
    })
}

/// Factory producing backends that sleep `delay` per embed call.
pub fn slow_backend_factory(dimension: usize, delay: Duration) -> BackendFactory {
    Arc::new(move |_config: &quarry_core::EmbeddingConfig| {
        Ok(Box::new(HashBackend::with_delay(dimension, delay)) as Box<dyn EmbeddingBackend>)
    })
}

/// Factory producing backends that fail on texts containing `marker`.
pub fn failing_backend_factory(dimension: usize, marker: &str) -> BackendFactory {
    let marker = marker.to_string();
    Arc::new(move |_config: &quarry_core::EmbeddingConfig| {
        Ok(Box::new(HashBackend::failing_on(dimension, marker.clone())) as Box<dyn EmbeddingBackend>)
    })
}

/// Factory whose first `fail_count` constructions fail, for degraded-pool
/// tests.
pub fn flaky_startup_factory(dimension: usize, fail_count: usize) -> BackendFactory {
    let calls = Arc::new(AtomicUsize::new(0));
    Arc::new(move |_config: &quarry_core::EmbeddingConfig| {
        if calls.fetch_add(1, Ordering::SeqCst) < fail_count {
            return Err(QuarryError::Embedding(
                "induced startup failure".to_string(),
            ));
        }
        Ok(Box::new(HashBackend::new(dimension)) as Box<dyn EmbeddingBackend>)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_text_embeds_identically() {
        let mut backend = HashBackend::new(64);
        let a = backend.embed("fn main() { run(); }").unwrap();
        let b = backend.embed("fn main() { run(); }").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn different_text_embeds_differently() {
        let mut backend = HashBackend::new(64);
        let a = backend.embed("authentication middleware").unwrap();
        let b = backend.embed("parse configuration file").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn marker_triggers_failure() {
        let mut backend = HashBackend::failing_on(64, "BOOM");
        assert!(backend.embed("fine text").is_ok());
        assert!(backend.embed("this will BOOM now").is_err());
    }
}

//! Embedding backends and model-specific post-processing.
//!
//! An [`EmbeddingBackend`] produces a mean-pooled vector at the model's
//! native dimension; the [`EmbeddingStrategy`] resolved from the model
//! name decides what happens next. Matryoshka-capable models get layer
//! normalization, truncation to the nearest supported dimension, and L2
//! normalization; legacy fixed-dimension models are L2-normalized as-is.
//!
//! Backends are constructed through a [`BackendFactory`] once per worker
//! unit — there is no process-wide model singleton.

use std::sync::Arc;

use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use quarry_core::{EmbeddingConfig, QuarryError};

/// Dimensions the Matryoshka truncation supports.
pub const SUPPORTED_DIMENSIONS: [usize; 5] = [64, 128, 256, 512, 768];

/// Fallback target dimension when none is configured.
pub const DEFAULT_DIMENSION: usize = 256;

/// A loaded embedding model owned by a single worker unit.
///
/// `embed` returns the mean-pooled sentence vector at the model's native
/// dimension, before any strategy post-processing.
pub trait EmbeddingBackend: Send {
    /// The resolved model name.
    fn model_name(&self) -> &str;

    /// The device inference actually runs on.
    fn device(&self) -> &str;

    /// Output dimension before post-processing.
    fn native_dimension(&self) -> usize;

    /// Embed one text.
    ///
    /// # Errors
    ///
    /// Returns [`QuarryError::Embedding`] if inference fails for this
    /// text. Callers treat that as a per-chunk failure, never a pool
    /// failure.
    fn embed(&mut self, text: &str) -> Result<Vec<f32>, QuarryError>;
}

/// Constructs one backend per worker unit at pool startup.
pub type BackendFactory =
    Arc<dyn Fn(&EmbeddingConfig) -> Result<Box<dyn EmbeddingBackend>, QuarryError> + Send + Sync>;

/// Post-processing applied to a backend's pooled output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingStrategy {
    /// Layer-norm, truncate to `target`, L2-normalize (MRL slicing).
    Matryoshka {
        /// Truncation target, already clamped to a supported value.
        target: usize,
    },
    /// L2-normalize at the model's native dimension.
    FixedNative,
}

impl EmbeddingStrategy {
    /// Resolve the strategy for a model name and configured dimension.
    ///
    /// Matryoshka-capable families (currently the nomic models) honor the
    /// configured dimension; everything else ignores it.
    ///
    /// # Examples
    ///
    /// ```
    /// use quarry_index::model::EmbeddingStrategy;
    ///
    /// let s = EmbeddingStrategy::resolve("nomic-ai/nomic-embed-text-v1.5", Some(512));
    /// assert_eq!(s, EmbeddingStrategy::Matryoshka { target: 512 });
    ///
    /// let s = EmbeddingStrategy::resolve("all-MiniLM-L6-v2", Some(512));
    /// assert_eq!(s, EmbeddingStrategy::FixedNative);
    /// ```
    pub fn resolve(model_name: &str, configured_dimension: Option<usize>) -> Self {
        if model_name.to_lowercase().contains("nomic") {
            EmbeddingStrategy::Matryoshka {
                target: clamp_dimension(configured_dimension),
            }
        } else {
            EmbeddingStrategy::FixedNative
        }
    }

    /// The output dimension this strategy produces for a given backend.
    pub fn output_dimension(&self, native: usize) -> usize {
        match self {
            EmbeddingStrategy::Matryoshka { target } => (*target).min(native),
            EmbeddingStrategy::FixedNative => native,
        }
    }

    /// Apply the strategy's post-processing to a pooled vector.
    pub fn postprocess(&self, mut vector: Vec<f32>) -> Vec<f32> {
        match self {
            EmbeddingStrategy::Matryoshka { target } => {
                layer_norm(&mut vector);
                vector.truncate((*target).min(vector.len()));
                l2_normalize(&mut vector);
                vector
            }
            EmbeddingStrategy::FixedNative => {
                l2_normalize(&mut vector);
                vector
            }
        }
    }
}

/// Clamp a requested dimension to the nearest supported value.
///
/// `None` means unspecified and yields the default. Ties between two
/// supported values resolve downward.
///
/// # Examples
///
/// ```
/// use quarry_index::model::clamp_dimension;
///
/// assert_eq!(clamp_dimension(Some(256)), 256);
/// assert_eq!(clamp_dimension(Some(300)), 256);
/// assert_eq!(clamp_dimension(Some(4096)), 768);
/// assert_eq!(clamp_dimension(None), 256);
/// ```
pub fn clamp_dimension(requested: Option<usize>) -> usize {
    let Some(requested) = requested else {
        return DEFAULT_DIMENSION;
    };
    SUPPORTED_DIMENSIONS
        .into_iter()
        .min_by_key(|supported| (supported.abs_diff(requested), *supported))
        .unwrap_or(DEFAULT_DIMENSION)
}

/// Layer normalization over the vector: `(x - mean) / sqrt(var + eps)`.
pub fn layer_norm(vector: &mut [f32]) {
    if vector.is_empty() {
        return;
    }
    let n = vector.len() as f32;
    let mean = vector.iter().sum::<f32>() / n;
    let variance = vector.iter().map(|x| (x - mean).powi(2)).sum::<f32>() / n;
    let denom = (variance + 1e-5).sqrt();
    for x in vector.iter_mut() {
        *x = (*x - mean) / denom;
    }
}

/// Scale the vector to unit L2 norm. Zero vectors are left unchanged.
pub fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in vector.iter_mut() {
            *x /= norm;
        }
    }
}

/// Local inference backend using fastembed.
///
/// The model weights download on first use and load once per worker
/// unit; every subsequent embed call reuses the warm model.
pub struct FastembedBackend {
    model: TextEmbedding,
    model_name: String,
    native_dimension: usize,
}

impl FastembedBackend {
    /// Load the model named in `config`.
    ///
    /// # Errors
    ///
    /// Returns [`QuarryError::Config`] for a model name outside the
    /// supported set, or [`QuarryError::Embedding`] if initialization
    /// (including the first-run download) fails.
    pub fn new(config: &EmbeddingConfig) -> Result<Self, QuarryError> {
        let (model, native_dimension) = resolve_fastembed_model(&config.model)?;
        let text_embedding = TextEmbedding::try_new(
            InitOptions::new(model).with_show_download_progress(false),
        )
        .map_err(|e| {
            QuarryError::Embedding(format!(
                "failed to initialize embedding model '{}': {e}",
                config.model
            ))
        })?;

        Ok(Self {
            model: text_embedding,
            model_name: config.model.clone(),
            native_dimension,
        })
    }
}

impl EmbeddingBackend for FastembedBackend {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn device(&self) -> &str {
        "cpu"
    }

    fn native_dimension(&self) -> usize {
        self.native_dimension
    }

    fn embed(&mut self, text: &str) -> Result<Vec<f32>, QuarryError> {
        let mut output = self
            .model
            .embed(vec![text.to_string()], None)
            .map_err(|e| QuarryError::Embedding(format!("inference failed: {e}")))?;
        output
            .pop()
            .ok_or_else(|| QuarryError::Embedding("model returned no embedding".into()))
    }
}

/// A [`BackendFactory`] producing [`FastembedBackend`]s.
pub fn fastembed_factory() -> BackendFactory {
    Arc::new(|config: &EmbeddingConfig| {
        Ok(Box::new(FastembedBackend::new(config)?) as Box<dyn EmbeddingBackend>)
    })
}

fn resolve_fastembed_model(name: &str) -> Result<(EmbeddingModel, usize), QuarryError> {
    let lower = name.to_lowercase();
    if lower.contains("nomic") {
        Ok((EmbeddingModel::NomicEmbedTextV15, 768))
    } else if lower.contains("minilm-l12") {
        Ok((EmbeddingModel::AllMiniLML12V2, 384))
    } else if lower.contains("minilm") {
        Ok((EmbeddingModel::AllMiniLML6V2, 384))
    } else if lower.contains("bge-small") {
        Ok((EmbeddingModel::BGESmallENV15, 384))
    } else if lower.contains("bge-base") {
        Ok((EmbeddingModel::BGEBaseENV15, 768))
    } else {
        Err(QuarryError::Config(format!(
            "unsupported embedding model '{name}': expected a nomic, MiniLM, or BGE model"
        )))
    }
}

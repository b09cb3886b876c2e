//! Semantic code search over a local workspace.
//!
//! `quarry-index` turns a directory of source files into a searchable
//! vector index:
//!
//! - [`walker`] discovers indexable text files, respecting `.gitignore`
//! - [`chunker`] splits files on declaration boundaries into overlapping
//!   line-range chunks
//! - [`embedder`] runs a pool of worker threads, each owning one warm
//!   embedding model
//! - [`model`] resolves backends and model-specific post-processing
//!   (Matryoshka truncation for capable models)
//! - [`cache`] keys vectors by content hash and persists them to
//!   `embeddings.json`
//! - [`indexer`] orchestrates incremental indexing passes
//! - [`search`] ranks chunks by blended cosine and lexical score
//!
//! # Examples
//!
//! ```no_run
//! use std::sync::Arc;
//! use quarry_core::QuarryConfig;
//! use quarry_index::embedder::EmbeddingPool;
//! use quarry_index::indexer::Indexer;
//! use quarry_index::model::fastembed_factory;
//! use quarry_index::search::QueryEngine;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), quarry_core::QuarryError> {
//! let config = Arc::new(QuarryConfig::default());
//! let pool = EmbeddingPool::start(&config.embedding, fastembed_factory()).await?;
//! let indexer = Arc::new(Indexer::new(config, Arc::new(pool)));
//! indexer.index_workspace().await?;
//!
//! let engine = QueryEngine::new(indexer);
//! for hit in engine.search("where do we validate auth tokens").await? {
//!     println!("{}:{} ({:.3})", hit.file.display(), hit.start_line, hit.score);
//! }
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod chunker;
pub mod embedder;
pub mod indexer;
pub mod model;
pub mod search;
pub mod testing;
pub mod walker;

pub use cache::VectorCache;
pub use chunker::chunk_file;
pub use embedder::EmbeddingPool;
pub use indexer::{IndexSummary, Indexer, StatusReport};
pub use model::{fastembed_factory, BackendFactory, EmbeddingBackend, EmbeddingStrategy};
pub use search::QueryEngine;
pub use walker::{walk_workspace, SourceFile};

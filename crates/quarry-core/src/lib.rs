//! Core types, configuration, and error handling for Quarry.
//!
//! This crate provides the shared foundation used by the indexing crate:
//! - [`QuarryError`] — unified error type using `thiserror`
//! - [`QuarryConfig`] — configuration loaded from `.quarry.toml`
//! - Shared types: [`Chunk`], [`EmbeddingRecord`], [`CacheEntry`],
//!   [`SearchResult`], [`IndexStatus`]

mod config;
mod error;
mod types;

pub use config::{
    CacheConfig, ChunkingConfig, ChunkingMode, EmbeddingConfig, QuarryConfig, SearchConfig,
    WorkspaceConfig,
};
pub use error::QuarryError;
pub use types::{CacheEntry, Chunk, EmbeddingRecord, IndexStatus, SearchResult};

/// A convenience `Result` type for Quarry operations.
pub type Result<T> = std::result::Result<T, QuarryError>;

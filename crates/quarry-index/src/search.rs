//! Hybrid semantic + lexical query engine.
//!
//! A query is embedded through the same pool (and therefore the same
//! strategy and dimension) as the indexed chunks, scored against every
//! searchable record by cosine similarity, blended with a lexical score,
//! and ranked. Scoring is a pure function over an immutable snapshot, so
//! searches never block indexing and vice versa.

use std::sync::Arc;

use quarry_core::{QuarryError, SearchConfig, SearchResult};
use tracing::debug;

use crate::indexer::Indexer;

/// Cosine similarity between two vectors.
///
/// Zero vectors (and zero-length vectors) score 0 rather than NaN, so a
/// degenerate embedding can never float to the top of the ranking.
///
/// # Examples
///
/// ```
/// use quarry_index::search::cosine_similarity;
///
/// assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-9);
/// assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
/// assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
/// ```
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += f64::from(*x) * f64::from(*y);
        norm_a += f64::from(*x) * f64::from(*x);
        norm_b += f64::from(*y) * f64::from(*y);
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Lexical score of `content` against `query`, scaled by `boost`.
///
/// Case-insensitive. Content containing the whole query scores 1.0;
/// otherwise the score is the fraction of query tokens present in the
/// content. The result is multiplied by `boost`, so exact matches can
/// outrank near-identical embeddings.
pub fn lexical_score(query: &str, content: &str, boost: f64) -> f64 {
    let query_lower = query.to_lowercase();
    let content_lower = content.to_lowercase();

    let base = if content_lower.contains(&query_lower) {
        1.0
    } else {
        let tokens: Vec<&str> = query_lower
            .split(|c: char| !c.is_alphanumeric() && c != '_')
            .filter(|t| !t.is_empty())
            .collect();
        if tokens.is_empty() {
            return 0.0;
        }
        let matched = tokens
            .iter()
            .filter(|t| content_lower.contains(**t))
            .count();
        matched as f64 / tokens.len() as f64
    };
    base * boost
}

/// Ranks indexed chunks against natural-language queries.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use quarry_index::indexer::Indexer;
/// use quarry_index::search::QueryEngine;
///
/// # async fn example(indexer: Arc<Indexer>) {
/// let engine = QueryEngine::new(indexer);
/// let hits = engine.search("where is the auth middleware").await.unwrap();
/// for hit in hits {
///     println!("{}:{} ({:.3})", hit.file.display(), hit.start_line, hit.score);
/// }
/// # }
/// ```
pub struct QueryEngine {
    indexer: Arc<Indexer>,
}

impl QueryEngine {
    /// Create a query engine over an indexer's store.
    pub fn new(indexer: Arc<Indexer>) -> Self {
        Self { indexer }
    }

    /// Search the index for `query`, returning up to `max_results` hits
    /// ranked by combined score.
    ///
    /// Combined score is `semantic_weight * cosine + (1 - semantic_weight)
    /// * lexical`. Ties break by file path, then start line. An empty or
    /// whitespace query, or an empty index, returns no hits.
    ///
    /// # Errors
    ///
    /// Returns [`QuarryError::Embedding`] if the query cannot be
    /// embedded, [`QuarryError::Worker`] if the pool is gone, and
    /// [`QuarryError::Config`] if the query vector's dimension disagrees
    /// with the pool's resolved dimension.
    pub async fn search(&self, query: &str) -> Result<Vec<SearchResult>, QuarryError> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }

        let snapshot = self.indexer.snapshot().await;
        if snapshot.is_empty() {
            return Ok(Vec::new());
        }

        let pool = self.indexer.pool();
        let query_vector = pool.embed_query(query).await?;
        if query_vector.len() != pool.dimension() {
            return Err(QuarryError::Config(format!(
                "query embedded to {} dimensions but the index holds {}",
                query_vector.len(),
                pool.dimension()
            )));
        }

        let search = &self.indexer.config().search;
        let mut results = rank(query, &query_vector, snapshot.iter(), search);
        results.truncate(search.max_results);
        debug!(query, hits = results.len(), "search complete");
        Ok(results)
    }
}

/// Score and order records against an embedded query.
fn rank<'a>(
    query: &str,
    query_vector: &[f32],
    records: impl Iterator<Item = &'a quarry_core::EmbeddingRecord>,
    config: &SearchConfig,
) -> Vec<SearchResult> {
    let semantic_weight = config.semantic_weight;
    let lexical_weight = 1.0 - semantic_weight;

    let mut results: Vec<SearchResult> = records
        .map(|record| {
            let semantic = cosine_similarity(query_vector, &record.vector);
            let lexical = lexical_score(query, &record.content, config.exact_match_boost);
            SearchResult {
                file: record.file.clone(),
                start_line: record.start_line,
                end_line: record.end_line,
                snippet: record.content.clone(),
                score: semantic_weight * semantic + lexical_weight * lexical,
            }
        })
        .collect();

    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.file.cmp(&b.file))
            .then_with(|| a.start_line.cmp(&b.start_line))
    });
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::EmbeddingPool;
    use crate::testing::hash_backend_factory;
    use quarry_core::{EmbeddingConfig, QuarryConfig};
    use std::fs;
    use std::path::{Path, PathBuf};

    #[test]
    fn cosine_identical_is_one() {
        let v = vec![0.3, -0.4, 0.5];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn cosine_orthogonal_is_zero() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
    }

    #[test]
    fn cosine_is_symmetric() {
        let a = vec![0.2, -0.7, 0.4, 0.1];
        let b = vec![0.9, 0.3, -0.2, 0.5];
        assert_eq!(cosine_similarity(&a, &b), cosine_similarity(&b, &a));

        let c = vec![1.0, 2.0, 3.0];
        let d = vec![-3.0, 0.0, 1.5];
        assert_eq!(cosine_similarity(&c, &d), cosine_similarity(&d, &c));
    }

    #[test]
    fn cosine_zero_vector_is_zero_not_nan() {
        let score = cosine_similarity(&[0.0, 0.0], &[0.0, 0.0]);
        assert_eq!(score, 0.0);
    }

    #[test]
    fn cosine_mismatched_lengths_score_zero() {
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn lexical_whole_query_substring_scores_full() {
        let score = lexical_score("fn parse_config", "pub fn parse_config() {}", 2.0);
        assert_eq!(score, 2.0);
    }

    #[test]
    fn lexical_partial_tokens_score_fractionally() {
        // "parse" matches, "tokens" does not.
        let score = lexical_score("parse tokens", "fn parse_config() {}", 1.0);
        assert!((score - 0.5).abs() < 1e-9);
    }

    #[test]
    fn lexical_is_case_insensitive() {
        let score = lexical_score("PARSE_CONFIG", "fn parse_config() {}", 1.0);
        assert_eq!(score, 1.0);
    }

    #[test]
    fn lexical_no_match_is_zero() {
        assert_eq!(lexical_score("websocket handshake", "fn add(a: i32) {}", 3.0), 0.0);
    }

    async fn engine_over(root: &Path, search: quarry_core::SearchConfig) -> QueryEngine {
        let mut config = QuarryConfig::default();
        config.workspace.search_directory = root.to_path_buf();
        config.workspace.cache_directory = root.join(".quarry");
        config.embedding.model = "hash-test".into();
        config.search = search;

        let embedding = EmbeddingConfig {
            model: "hash-test".into(),
            ..config.embedding.clone()
        };
        let pool = EmbeddingPool::start(&embedding, hash_backend_factory(64))
            .await
            .unwrap();
        let indexer = Indexer::new(std::sync::Arc::new(config), std::sync::Arc::new(pool));
        indexer.index_workspace().await.unwrap();
        QueryEngine::new(std::sync::Arc::new(indexer))
    }

    #[tokio::test]
    async fn exact_content_match_ranks_first() {
        let dir = tempfile::tempdir().unwrap();
        let target = "fn validate_session_token(token: &str) -> bool {\n    token.len() == 64\n}\n";
        fs::write(dir.path().join("auth.rs"), target).unwrap();
        fs::write(
            dir.path().join("math.rs"),
            "fn multiply(a: i64, b: i64) -> i64 {\n    a * b\n}\n",
        )
        .unwrap();

        let engine = engine_over(
            dir.path(),
            quarry_core::SearchConfig {
                max_results: 10,
                semantic_weight: 0.5,
                exact_match_boost: 10.0,
            },
        )
        .await;

        let hits = engine.search("validate_session_token").await.unwrap();
        assert!(!hits.is_empty());
        assert_eq!(hits[0].file, PathBuf::from("auth.rs"));
        assert!(hits[0].score > hits.last().unwrap().score || hits.len() == 1);
    }

    #[tokio::test]
    async fn results_are_truncated_to_max_results() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..5 {
            fs::write(
                dir.path().join(format!("mod{i}.rs")),
                format!("fn handler_{i}() {{\n    dispatch_request_{i}();\n}}\n"),
            )
            .unwrap();
        }

        let engine = engine_over(
            dir.path(),
            quarry_core::SearchConfig {
                max_results: 3,
                semantic_weight: 0.7,
                exact_match_boost: 2.0,
            },
        )
        .await;

        let hits = engine.search("dispatch_request handler").await.unwrap();
        assert_eq!(hits.len(), 3);
    }

    #[tokio::test]
    async fn empty_query_returns_no_hits() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("a.rs"),
            "fn something() {\n    do_the_thing();\n}\n",
        )
        .unwrap();

        let engine = engine_over(dir.path(), quarry_core::SearchConfig::default()).await;
        assert!(engine.search("").await.unwrap().is_empty());
        assert!(engine.search("   \n").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn ties_break_by_file_then_line() {
        let dir = tempfile::tempdir().unwrap();
        // Identical content in two files scores identically.
        let body = "fn shared_helper() {\n    common_behavior();\n}\n";
        fs::write(dir.path().join("b.rs"), body).unwrap();
        fs::write(dir.path().join("a.rs"), body).unwrap();

        let engine = engine_over(dir.path(), quarry_core::SearchConfig::default()).await;
        let hits = engine.search("shared_helper").await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].file, PathBuf::from("a.rs"));
        assert_eq!(hits[1].file, PathBuf::from("b.rs"));
    }
}

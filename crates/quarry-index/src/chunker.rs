//! Boundary-aware line chunking.
//!
//! Splits file text into overlapping chunks, preferring to cut at
//! declaration-like lines (function/class/type keywords at line start).
//! A per-extension pattern table drives the boundary test; unknown
//! extensions fall back to a generic pattern, so chunking never fails.

use std::collections::HashMap;
use std::path::Path;
use std::sync::LazyLock;

use quarry_core::{Chunk, ChunkingConfig, ChunkingMode};
use regex::Regex;

/// Chunks whose trimmed text is this short are discarded as trivial.
const MIN_CHUNK_CHARS: usize = 20;

/// Extension → "likely declaration start" pattern table.
///
/// Data-driven so new languages are a table row, not a control-flow
/// change. Patterns are tested against the trimmed line.
static BOUNDARY_PATTERNS: LazyLock<HashMap<&'static str, Regex>> = LazyLock::new(|| {
    let table: &[(&[&str], &str)] = &[
        (
            &["js", "jsx", "mjs", "cjs"],
            r"^(export\s+)?(async\s+)?(function|class|const|let|var)\s+\w+",
        ),
        (
            &["ts", "tsx"],
            r"^(export\s+)?(async\s+)?(function|class|const|let|var|interface|type)\s+\w+",
        ),
        (&["py", "pyw"], r"^(class|def|async\s+def)\s+\w+"),
        (
            &["java"],
            r"^(public|private|protected)?\s*(static\s+)?(class|interface|enum|void|int|String|boolean)\s+\w+",
        ),
        (&["kt", "kts"], r"^(class|interface|object|fun|val|var)\s+\w+"),
        (&["scala"], r"^(class|object|trait|def|val|var)\s+\w+"),
        (
            &["c"],
            r"^(struct|enum|union|void|int|char|float|double)\s+\w+",
        ),
        (
            &["cpp", "cc", "cxx", "h", "hpp"],
            r"^(class|struct|namespace|template|void|int|bool)\s+\w+",
        ),
        (
            &["cs"],
            r"^(public|private|protected)?\s*(static\s+)?(class|interface|struct|enum|void|int|string|bool)\s+\w+",
        ),
        (&["go"], r"^(func|type|const|var)\s+\w+"),
        (
            &["rs"],
            r"^(pub\s+)?(fn|struct|enum|trait|impl|const|static)\s+\w+",
        ),
        (&["php"], r"^(class|interface|trait|function|const)\s+\w+"),
        (&["rb"], r"^(class|module|def)\s+\w+"),
        (&["rake"], r"^(class|module|def|task)\s+\w+"),
        (
            &["swift"],
            r"^(class|struct|enum|protocol|func|var|let)\s+\w+",
        ),
        (&["r", "R"], r"^(\w+)\s*<-\s*function"),
        (&["lua"], r"^(function|local\s+function)\s+\w+"),
    ];

    let mut map = HashMap::new();
    for (extensions, pattern) in table {
        let regex = Regex::new(pattern).expect("boundary pattern is valid");
        for ext in *extensions {
            map.insert(*ext, regex.clone());
        }
    }
    map
});

/// Fallback for extensions without a table entry.
static GENERIC_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(export\s+)?(async\s+)?(function|class|const|let|var)\s+\w+")
        .expect("generic boundary pattern is valid")
});

/// Get the boundary pattern for a file extension (without the dot).
///
/// Unknown extensions get the generic fallback, never an error.
///
/// # Examples
///
/// ```
/// use quarry_index::chunker::boundary_pattern;
///
/// assert!(boundary_pattern("rs").is_match("pub fn chunk_file() {"));
/// assert!(boundary_pattern("py").is_match("def handler(event):"));
/// assert!(boundary_pattern("zig").is_match("const std = @import(\"std\");"));
/// ```
pub fn boundary_pattern(extension: &str) -> &'static Regex {
    BOUNDARY_PATTERNS
        .get(extension)
        .unwrap_or(&GENERIC_PATTERN)
}

/// Whether files with this extension participate in indexing.
///
/// Everything in the boundary table plus a small plain-text set. Files
/// outside this set are skipped by the walker, not the chunker — chunking
/// itself handles any extension via the fallback pattern.
pub fn is_indexable_extension(extension: &str) -> bool {
    BOUNDARY_PATTERNS.contains_key(extension)
        || matches!(extension, "md" | "txt" | "toml" | "yaml" | "yml" | "json")
}

/// Split file content into overlapping, boundary-aware chunks.
///
/// Scans line by line accumulating a buffer. A split is taken when the
/// trimmed line matches the extension's boundary pattern and the buffer
/// already holds more than `chunk_size / 2` lines, or unconditionally
/// once the buffer reaches `chunk_size + chunk_overlap` lines (hard cap,
/// guarantees progress on pattern-free files). Emitted chunks must have
/// more than 20 trimmed characters; the next buffer is seeded with the
/// trailing `chunk_overlap` lines of the previous one. In
/// [`ChunkingMode::Fixed`] the pattern test is skipped entirely.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use quarry_core::ChunkingConfig;
/// use quarry_index::chunker::chunk_file;
///
/// let content = "fn hello() {\n    println!(\"hello world\");\n}";
/// let chunks = chunk_file(Path::new("src/hello.rs"), content, &ChunkingConfig::default());
/// assert_eq!(chunks.len(), 1);
/// assert_eq!(chunks[0].start_line, 1);
/// assert_eq!(chunks[0].end_line, 3);
/// ```
pub fn chunk_file(file: &Path, content: &str, config: &ChunkingConfig) -> Vec<Chunk> {
    let extension = file
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default();
    let pattern = match config.mode {
        ChunkingMode::Smart => Some(boundary_pattern(extension)),
        ChunkingMode::Fixed => None,
    };

    let lines: Vec<&str> = content.split('\n').collect();
    let hard_cap = config.chunk_size + config.chunk_overlap;
    let mut chunks = Vec::new();
    let mut buffer: Vec<&str> = Vec::new();
    // 0-based index of the first buffered line.
    let mut chunk_start = 0usize;

    for (i, line) in lines.iter().enumerate() {
        buffer.push(line);

        // Boundary splits only once the buffer holds more than half a
        // chunk, so declarations packed at the top of a file don't
        // produce confetti.
        let at_boundary = pattern
            .map(|p| p.is_match(line.trim()) && buffer.len() * 2 > config.chunk_size)
            .unwrap_or(false);

        if at_boundary || buffer.len() >= hard_cap {
            emit(file, &buffer, chunk_start, i, &mut chunks);

            // Seed the next buffer with the trailing overlap lines so
            // context crossing the cut is represented on both sides.
            let tail_start = buffer.len().saturating_sub(config.chunk_overlap);
            buffer.drain(..tail_start);
            chunk_start = i + 1 - buffer.len();
        }
    }

    if !buffer.is_empty() {
        emit(file, &buffer, chunk_start, lines.len() - 1, &mut chunks);
    }

    chunks
}

fn emit(file: &Path, buffer: &[&str], start: usize, end: usize, chunks: &mut Vec<Chunk>) {
    let text = buffer.join("\n");
    if text.trim().len() > MIN_CHUNK_CHARS {
        chunks.push(Chunk {
            file: file.to_path_buf(),
            start_line: start as u32 + 1,
            end_line: end as u32 + 1,
            text,
        });
    }
}

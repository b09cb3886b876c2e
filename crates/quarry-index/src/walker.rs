//! Workspace file discovery.
//!
//! Walks the configured search directory respecting `.gitignore`, and
//! returns the text files the chunker knows how to split. Paths are
//! always relative to the walk root, so the same workspace indexed from
//! two checkouts produces the same keys.

use std::path::{Path, PathBuf};

use quarry_core::QuarryError;

use crate::chunker::is_indexable_extension;

/// Maximum file size to index (1 MB).
const MAX_FILE_SIZE: u64 = 1_048_576;

/// Number of bytes to check for binary detection.
const BINARY_CHECK_SIZE: usize = 8192;

/// A text file discovered during the workspace walk.
///
/// # Examples
///
/// ```
/// use std::path::PathBuf;
/// use quarry_index::walker::SourceFile;
///
/// let file = SourceFile {
///     path: PathBuf::from("src/main.rs"),
///     content: "fn main() {}".to_string(),
/// };
/// assert_eq!(file.path, PathBuf::from("src/main.rs"));
/// ```
#[derive(Debug, Clone)]
pub struct SourceFile {
    /// Path relative to the walk root.
    pub path: PathBuf,
    /// Full file content.
    pub content: String,
}

/// Walk a workspace, respecting `.gitignore`, returning indexable files.
///
/// Skips binary files, files larger than 1 MB, and extensions the
/// chunker has no use for. Returned paths are relative to `root`.
///
/// # Errors
///
/// Returns [`QuarryError::FileNotFound`] if `root` does not exist or is
/// not a directory.
///
/// # Examples
///
/// ```no_run
/// use std::path::Path;
/// use quarry_index::walker::walk_workspace;
///
/// let files = walk_workspace(Path::new(".")).unwrap();
/// for f in &files {
///     println!("{} ({} bytes)", f.path.display(), f.content.len());
/// }
/// ```
pub fn walk_workspace(root: &Path) -> Result<Vec<SourceFile>, QuarryError> {
    if !root.is_dir() {
        return Err(QuarryError::FileNotFound(root.to_path_buf()));
    }

    let walker = ignore::WalkBuilder::new(root).build();
    let mut files = Vec::new();

    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(_) => continue,
        };

        let Some(file_type) = entry.file_type() else {
            continue;
        };
        if !file_type.is_file() {
            continue;
        }

        let path = entry.path();

        let metadata = match std::fs::metadata(path) {
            Ok(m) => m,
            Err(_) => continue,
        };
        if metadata.len() > MAX_FILE_SIZE {
            continue;
        }

        let ext = match path.extension().and_then(|e| e.to_str()) {
            Some(e) => e,
            None => continue,
        };
        if !is_indexable_extension(ext) {
            continue;
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(_) => continue,
        };

        // Null bytes in the first 8KB mean binary content
        let check_len = content.len().min(BINARY_CHECK_SIZE);
        if content.as_bytes()[..check_len].contains(&0) {
            continue;
        }

        let relative = match path.strip_prefix(root) {
            Ok(r) => r.to_path_buf(),
            Err(_) => path.to_path_buf(),
        };

        files.push(SourceFile {
            path: relative,
            content,
        });
    }

    files.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn make_temp_workspace() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();

        fs::create_dir_all(root.join("src")).unwrap();
        fs::write(root.join("src/main.rs"), "fn main() {}").unwrap();
        fs::write(root.join("src/lib.py"), "def hello(): pass").unwrap();
        fs::write(root.join("src/app.ts"), "function run() {}").unwrap();
        fs::write(root.join("src/util.js"), "const x = 1;").unwrap();
        fs::write(root.join("src/main.go"), "package main").unwrap();
        fs::write(root.join("README.md"), "# Hello").unwrap();

        // Extensions the chunker has no pattern or text entry for
        fs::write(root.join("data.csv"), "a,b,c").unwrap();
        fs::write(root.join("image.png"), "not really a png").unwrap();

        dir
    }

    #[test]
    fn walk_finds_indexable_files() {
        let dir = make_temp_workspace();
        let files = walk_workspace(dir.path()).unwrap();

        let paths: Vec<&Path> = files.iter().map(|f| f.path.as_path()).collect();
        assert_eq!(files.len(), 6);
        assert!(paths.contains(&Path::new("src/main.rs")));
        assert!(paths.contains(&Path::new("README.md")));
        assert!(!paths.contains(&Path::new("data.csv")));
        assert!(!paths.contains(&Path::new("image.png")));
    }

    #[test]
    fn walk_returns_sorted_relative_paths() {
        let dir = make_temp_workspace();
        let files = walk_workspace(dir.path()).unwrap();

        let mut sorted = files.clone();
        sorted.sort_by(|a, b| a.path.cmp(&b.path));
        assert_eq!(
            files.iter().map(|f| &f.path).collect::<Vec<_>>(),
            sorted.iter().map(|f| &f.path).collect::<Vec<_>>()
        );
        for f in &files {
            assert!(f.path.is_relative(), "expected relative: {}", f.path.display());
        }
    }

    #[test]
    fn walk_respects_gitignore() {
        let dir = make_temp_workspace();
        let root = dir.path();

        // The ignore crate needs a .git dir to recognize .gitignore files
        fs::create_dir_all(root.join(".git")).unwrap();
        fs::create_dir_all(root.join("build")).unwrap();
        fs::write(root.join("build/output.rs"), "fn ignored() {}").unwrap();
        fs::write(root.join(".gitignore"), "build/\n").unwrap();

        let files = walk_workspace(root).unwrap();
        for f in &files {
            assert!(
                !f.path.starts_with("build"),
                "gitignored file should be skipped: {}",
                f.path.display()
            );
        }
    }

    #[test]
    fn walk_skips_binary_files() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();

        let mut binary_content = b"fn main() { ".to_vec();
        binary_content.push(0);
        binary_content.extend_from_slice(b" }");
        fs::write(root.join("binary.rs"), &binary_content).unwrap();
        fs::write(root.join("normal.rs"), "fn normal() {}").unwrap();

        let files = walk_workspace(root).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, PathBuf::from("normal.rs"));
    }

    #[test]
    fn walk_skips_large_files() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();

        let large_content = "x".repeat(1_048_577);
        fs::write(root.join("huge.rs"), &large_content).unwrap();
        fs::write(root.join("ok.rs"), "fn ok() {}").unwrap();

        let files = walk_workspace(root).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, PathBuf::from("ok.rs"));
    }

    #[test]
    fn missing_root_is_an_error() {
        let err = walk_workspace(Path::new("/definitely/not/here")).unwrap_err();
        assert!(matches!(err, QuarryError::FileNotFound(_)));
    }
}

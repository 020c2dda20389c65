use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::types::IndexStatus;

// ---------------------------------------------------------------------------
// Tuning constants.
//
// The chunking, cache, and ANN values below are part of the observable
// behavior of the index (chunk ids, cache hit rates, candidate counts), so
// changing them invalidates nothing on disk but does change search results.
// ---------------------------------------------------------------------------

pub const CHUNK_SIZE: usize = 1200;
pub const CHUNK_OVERLAP: usize = 200;
/// Chunks shorter than this are merged into their neighbor.
pub const MIN_CHUNK_SIZE: usize = 200;

pub const EMBED_BATCH_SIZE: usize = 16;
pub const FILE_EMBED_CONCURRENCY: usize = 2;

pub const TOP_K: usize = 6;
pub const QUERY_CACHE_TTL_MS: u64 = 600_000;
pub const QUERY_EMBED_CACHE_MAX: usize = 128;
pub const QUERY_RESULT_CACHE_MAX: usize = 64;
/// How many ranked entries a result-cache slot keeps, so later queries with a
/// larger `top_k` can still be served from cache.
pub const QUERY_RESULT_CACHE_TOP_K: usize = 24;

pub const ANN_PROJECTION_DIM: usize = 16;
pub const ANN_MAX_HAMMING_DISTANCE: usize = 3;
pub const ANN_FALLBACK_MIN_CANDIDATES: usize = 32;
pub const ANN_MAX_RERANK_CANDIDATES: usize = 1200;

pub const HEALTH_REFRESH_INTERVAL_MS: u64 = 15_000;
pub const STALE_INDEX_THRESHOLD_MS: u64 = 1_800_000;

/// Hard ceiling: files larger than this are skipped by the scanner.
pub const MAX_FILE_BYTES: u64 = 1_048_576;

/// File names skipped anywhere in the tree regardless of extension.
pub const SKIP_FILES: &[&str] = &[
    ".DS_Store",
    "Thumbs.db",
    "desktop.ini",
    "package-lock.json",
    "pnpm-lock.yaml",
    "yarn.lock",
    "Cargo.lock",
];

/// Extensions eligible for indexing, lowercase, with the leading dot.
pub fn default_include_extensions() -> Vec<String> {
    [
        ".md", ".mdx", ".txt", ".rst", ".ts", ".tsx", ".js", ".jsx", ".mjs", ".cjs", ".json",
        ".yaml", ".yml", ".toml", ".py", ".rs", ".go", ".java", ".rb", ".php", ".c", ".h", ".cpp",
        ".hpp", ".cs", ".swift", ".kt", ".sh", ".sql", ".html", ".css",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Directory *names* never descended into (compared against path components).
pub fn default_exclude_folders() -> Vec<String> {
    [
        ".git",
        "node_modules",
        "target",
        "dist",
        "build",
        "out",
        "coverage",
        ".next",
        ".nuxt",
        ".venv",
        "venv",
        "__pycache__",
        ".idea",
        ".vscode",
        ".rag-ts",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

// ---------------------------------------------------------------------------
// Per-folder configuration and per-call options
// ---------------------------------------------------------------------------

/// Sticky per-folder configuration, merged from `index()` options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FolderConfig {
    pub enabled: bool,
    pub include_extensions: Vec<String>,
    pub exclude_folders: Vec<String>,
}

impl Default for FolderConfig {
    fn default() -> Self {
        Self {
            // A folder that was indexed in a previous process must stay
            // searchable after a restart, so fresh caches start enabled.
            enabled: true,
            include_extensions: default_include_extensions(),
            exclude_folders: default_exclude_folders(),
        }
    }
}

pub type ProgressFn = Arc<dyn Fn(&IndexStatus) + Send + Sync>;

/// Options for one `index()` call. Unset fields fall back to the folder's
/// sticky config or the module defaults.
#[derive(Clone, Default)]
pub struct IndexOptions {
    pub include_extensions: Option<Vec<String>>,
    pub exclude_folders: Option<Vec<String>>,
    pub max_file_size: Option<u64>,
    /// Concurrent file-processing tasks (default 2).
    pub concurrency: Option<usize>,
    /// Texts per embedding request (default 16).
    pub embed_batch_size: Option<usize>,
    /// Redirect the `.rag-ts/` storage directory away from the indexed folder.
    pub output_folder: Option<PathBuf>,
    pub cancel: Option<CancellationToken>,
    /// Invoked with a fresh status snapshot after each processed file and at
    /// phase transitions.
    pub on_progress: Option<ProgressFn>,
}

#[derive(Clone, Default)]
pub struct SearchOptions {
    /// Number of matches to return (default 6).
    pub top_k: Option<usize>,
    /// Must match the `output_folder` the folder was indexed with, if any.
    pub output_folder: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Optional repo-level config file
// ---------------------------------------------------------------------------

/// Subset of folder settings loadable from `.ragkit.json` at the folder root.
/// Used by the CLI; library callers pass options directly.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RepoConfig {
    pub include_extensions: Option<Vec<String>>,
    pub exclude_folders: Option<Vec<String>>,
    pub max_file_size: Option<u64>,
    pub embed_model: Option<String>,
}

/// Lenient load: missing or malformed config means defaults.
pub fn load_repo_config(folder: &Path) -> RepoConfig {
    let path = folder.join(".ragkit.json");
    let Ok(text) = std::fs::read_to_string(&path) else {
        return RepoConfig::default();
    };
    serde_json::from_str::<RepoConfig>(&text).unwrap_or_default()
}

/// Normalize a folder path for use as a cache key and for persisted
/// relative-path joins: forward slashes only, no trailing slash.
pub fn normalize_folder_path(path: &Path) -> String {
    let mut s = path.to_string_lossy().replace('\\', "/");
    while s.len() > 1 && s.ends_with('/') {
        s.pop();
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_trailing_slashes_and_backslashes() {
        assert_eq!(normalize_folder_path(Path::new("/a/b/")), "/a/b");
        assert_eq!(normalize_folder_path(Path::new("/a/b//")), "/a/b");
        assert_eq!(normalize_folder_path(Path::new("/")), "/");
    }

    #[test]
    fn repo_config_defaults_on_garbage() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".ragkit.json"), "{ nope").unwrap();
        let cfg = load_repo_config(dir.path());
        assert!(cfg.include_extensions.is_none());
    }

    #[test]
    fn repo_config_parses_overrides() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(".ragkit.json"),
            r#"{"includeExtensions": [".md"], "maxFileSize": 1024}"#,
        )
        .unwrap();
        let cfg = load_repo_config(dir.path());
        assert_eq!(cfg.include_extensions.unwrap(), vec![".md".to_string()]);
        assert_eq!(cfg.max_file_size, Some(1024));
    }
}

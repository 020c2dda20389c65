use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ---------------------------------------------------------------------------
// Core data model: chunks, symbols, file states, status.
//
// Everything here serializes with camelCase field names because these structs
// ARE the persisted `.rag-db` / `.rag-index` schema (and the JSON surface the
// CLI prints). Renaming a field is a format break.
// ---------------------------------------------------------------------------

/// A point in a source file. `offset` is the byte offset into the file,
/// `line`/`column` are 0-indexed as reported by the parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub line: u32,
    pub column: u32,
    pub offset: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolRange {
    pub start: Position,
    pub end: Position,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SymbolKind {
    Function,
    Class,
    Method,
    Interface,
    Type,
    Enum,
    Module,
    Variable,
    Import,
    Export,
    Other,
}

/// A named code construct extracted from the AST, carried on the chunk that
/// contains its source span.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeSymbol {
    pub name: String,
    pub kind: SymbolKind,
    pub name_range: SymbolRange,
    pub content_range: SymbolRange,
}

/// A bounded, trimmed fragment of a source file with its embedding vector.
///
/// `id` is deterministic: `"{relativePath}::{ordinal}"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chunk {
    pub id: String,
    /// Posix-relative path of the source file within the indexed folder.
    pub file_path: String,
    /// Milliseconds since epoch at index time.
    pub modified_at: u64,
    pub content: String,
    pub embedding: Vec<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbols: Option<Vec<CodeSymbol>>,
}

/// Build the deterministic chunk id for the `ordinal`-th chunk of a file.
pub fn chunk_id(relative_path: &str, ordinal: usize) -> String {
    format!("{relative_path}::{ordinal}")
}

/// Per-file index entry: change-detection metadata plus the ids of the
/// chunks currently derived from the file.
///
/// Invariant: every id in `chunk_ids` exists in the folder's chunk map, and
/// every chunk belongs to exactly one file state. Enforced after each
/// indexing transaction and re-established by the tolerant loader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileState {
    pub modified_at: u64,
    pub size: u64,
    /// SHA-1 hex digest of the raw file bytes at last index time.
    pub content_hash: String,
    pub chunk_ids: Vec<String>,
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexPhase {
    Idle,
    Scanning,
    Embedding,
    Ready,
    Error,
}

/// Snapshot of a folder's index state, returned by `index()` and
/// `get_status()`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexStatus {
    pub folder_path: String,
    pub enabled: bool,
    pub phase: IndexPhase,
    pub total_files: usize,
    pub files_to_embed: usize,
    pub embedded_files: usize,
    pub skipped_unchanged: usize,
    pub total_chunks: usize,
    pub db_size_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_indexed_at: Option<u64>,
    pub stale_warning: bool,
    pub stale_age_ms: u64,
    pub stale_threshold_ms: u64,
    pub file_change_drift: bool,
    pub drift_added_files: usize,
    pub drift_modified_files: usize,
    pub drift_deleted_files: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub drift_checked_at: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub include_extensions: Vec<String>,
    pub exclude_folders: Vec<String>,
    pub cached_folders: Vec<String>,
}

// ---------------------------------------------------------------------------
// Search results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchMatch {
    pub file_path: String,
    /// Cosine similarity, rounded to 3 decimals.
    pub score: f32,
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub matches: Vec<SearchMatch>,
    pub duration_ms: u64,
    pub total_chunks: usize,
}

impl SearchResult {
    pub fn empty(duration_ms: u64, total_chunks: usize) -> Self {
        Self {
            matches: Vec::new(),
            duration_ms,
            total_chunks,
        }
    }
}

/// Convenience alias for the in-memory chunk map keyed by chunk id.
pub type ChunkMap = HashMap<String, std::sync::Arc<Chunk>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_id_is_path_and_ordinal() {
        assert_eq!(chunk_id("src/lib.rs", 0), "src/lib.rs::0");
        assert_eq!(chunk_id("docs/a.md", 12), "docs/a.md::12");
    }

    #[test]
    fn chunk_serializes_camel_case_and_omits_empty_symbols() {
        let c = Chunk {
            id: "a.md::0".into(),
            file_path: "a.md".into(),
            modified_at: 1_700_000_000_000,
            content: "hello".into(),
            embedding: vec![0.5, -0.5],
            symbols: None,
        };
        let v = serde_json::to_value(&c).unwrap();
        assert_eq!(v["filePath"], "a.md");
        assert_eq!(v["modifiedAt"], 1_700_000_000_000u64);
        assert!(v.get("symbols").is_none());
    }

    #[test]
    fn file_state_round_trips() {
        let fs = FileState {
            modified_at: 1,
            size: 2,
            content_hash: "abc".into(),
            chunk_ids: vec!["a.md::0".into()],
        };
        let json = serde_json::to_string(&fs).unwrap();
        assert!(json.contains("contentHash"));
        assert!(json.contains("chunkIds"));
        let back: FileState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, fs);
    }
}

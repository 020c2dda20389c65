use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{RagError, Result};
use crate::types::{Chunk, ChunkMap, FileState};

// ---------------------------------------------------------------------------
// On-disk layout, per indexed folder:
//
//   {storage_path ?? folder_path}/.rag-ts/
//     .rag-db     { "version": 1, "chunks": Chunk[] }
//     .rag-index  { "version": 1, "updatedAt": ms, "files": {rel: FileState} }
//
// Writes go through a temp file + rename so a crash mid-write leaves the
// previous generation intact. Loads are best-effort: anything missing,
// unparseable, or from another schema version is treated as empty and the
// next index run rebuilds from scratch.
// ---------------------------------------------------------------------------

pub const STORAGE_DIR: &str = ".rag-ts";
pub const DB_FILE: &str = ".rag-db";
pub const INDEX_FILE: &str = ".rag-index";
pub const SCHEMA_VERSION: u64 = 1;

/// Resolve the storage directory for a folder, honoring an override.
pub fn storage_root(folder_path: &str, storage_path: Option<&Path>) -> PathBuf {
    match storage_path {
        Some(base) => base.join(STORAGE_DIR),
        None => Path::new(folder_path).join(STORAGE_DIR),
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PersistedDb<'a> {
    version: u64,
    chunks: Vec<&'a Chunk>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PersistedIndex<'a> {
    version: u64,
    updated_at: u64,
    files: &'a HashMap<String, FileState>,
}

/// Result of loading a folder's persisted state.
#[derive(Debug, Default)]
pub struct LoadedState {
    pub chunks: ChunkMap,
    pub file_states: HashMap<String, FileState>,
    pub last_indexed_at: Option<u64>,
}

/// Persist both files. The directory is created as needed; each file is
/// fully rewritten via write-then-rename.
pub async fn save(
    dir: &Path,
    chunks: &ChunkMap,
    file_states: &HashMap<String, FileState>,
    updated_at: u64,
) -> Result<()> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| RagError::Persistence(e.to_string()))?;

    // Deterministic chunk order keeps the file diffable and the size stable
    // for an unchanged corpus.
    let mut ordered: Vec<&Chunk> = chunks.values().map(Arc::as_ref).collect();
    ordered.sort_by(|a, b| a.id.cmp(&b.id));

    let db = serde_json::to_vec(&PersistedDb {
        version: SCHEMA_VERSION,
        chunks: ordered,
    })
    .map_err(|e| RagError::Persistence(e.to_string()))?;
    write_atomic(&dir.join(DB_FILE), &db).await?;

    let index = serde_json::to_vec(&PersistedIndex {
        version: SCHEMA_VERSION,
        updated_at,
        files: file_states,
    })
    .map_err(|e| RagError::Persistence(e.to_string()))?;
    write_atomic(&dir.join(INDEX_FILE), &index).await?;

    Ok(())
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, bytes)
        .await
        .map_err(|e| RagError::Persistence(e.to_string()))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| RagError::Persistence(e.to_string()))?;
    Ok(())
}

/// Best-effort load. Invalid records are dropped, and the chunk/file-state
/// cross references are re-established: file states only keep ids of chunks
/// that loaded, and chunks no file state claims are discarded.
pub async fn load(dir: &Path) -> LoadedState {
    let mut state = LoadedState::default();

    if let Some(root) = read_json(&dir.join(DB_FILE)).await {
        if root.get("version").and_then(Value::as_u64) == Some(SCHEMA_VERSION) {
            if let Some(raw) = root.get("chunks").and_then(Value::as_array) {
                for item in raw {
                    let Ok(chunk) = serde_json::from_value::<Chunk>(item.clone()) else {
                        continue;
                    };
                    if chunk.id.is_empty() {
                        continue;
                    }
                    state.chunks.insert(chunk.id.clone(), Arc::new(chunk));
                }
            }
        }
    }

    if let Some(root) = read_json(&dir.join(INDEX_FILE)).await {
        if root.get("version").and_then(Value::as_u64) == Some(SCHEMA_VERSION) {
            if let Some(files) = root.get("files").and_then(Value::as_object) {
                for (rel, raw) in files {
                    let Ok(mut fs) = serde_json::from_value::<FileState>(raw.clone()) else {
                        continue;
                    };
                    fs.chunk_ids.retain(|id| state.chunks.contains_key(id));
                    state.file_states.insert(rel.clone(), fs);
                }
            }
            state.last_indexed_at = root.get("updatedAt").and_then(Value::as_u64);
        }
    }

    // Drop orphan chunks so the in-memory invariant holds even after a
    // partially corrupted index file.
    let referenced: std::collections::HashSet<&String> = state
        .file_states
        .values()
        .flat_map(|fs| fs.chunk_ids.iter())
        .collect();
    if referenced.len() != state.chunks.len() {
        state.chunks.retain(|id, _| referenced.contains(id));
    }

    state
}

async fn read_json(path: &Path) -> Option<Value> {
    let text = tokio::fs::read_to_string(path).await.ok()?;
    match serde_json::from_str::<Value>(&text) {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::warn!("ignoring corrupt {}: {e}", path.display());
            None
        }
    }
}

/// Size of the persisted chunk database in bytes; 0 when absent.
pub async fn db_size_bytes(dir: &Path) -> u64 {
    tokio::fs::metadata(dir.join(DB_FILE))
        .await
        .map(|m| m.len())
        .unwrap_or(0)
}

/// Remove the storage directory. Best-effort: missing is success.
pub async fn clear(dir: &Path) {
    let _ = tokio::fs::remove_dir_all(dir).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::chunk_id;

    fn sample_chunk(rel: &str, ordinal: usize) -> Chunk {
        Chunk {
            id: chunk_id(rel, ordinal),
            file_path: rel.to_string(),
            modified_at: 1_700_000_000_000,
            content: format!("content of {rel} #{ordinal}"),
            embedding: vec![0.1, 0.2, 0.3],
            symbols: None,
        }
    }

    fn sample_state() -> (ChunkMap, HashMap<String, FileState>) {
        let mut chunks = ChunkMap::new();
        let c0 = sample_chunk("docs/a.md", 0);
        let c1 = sample_chunk("docs/a.md", 1);
        let state = FileState {
            modified_at: 1_700_000_000_000,
            size: 42,
            content_hash: "deadbeef".into(),
            chunk_ids: vec![c0.id.clone(), c1.id.clone()],
        };
        chunks.insert(c0.id.clone(), Arc::new(c0));
        chunks.insert(c1.id.clone(), Arc::new(c1));
        let mut files = HashMap::new();
        files.insert("docs/a.md".to_string(), state);
        (chunks, files)
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join(STORAGE_DIR);
        let (chunks, files) = sample_state();

        save(&dir, &chunks, &files, 123_456).await.unwrap();
        let loaded = load(&dir).await;

        assert_eq!(loaded.chunks.len(), 2);
        assert_eq!(loaded.file_states, files);
        assert_eq!(loaded.last_indexed_at, Some(123_456));
        for (id, chunk) in &chunks {
            assert_eq!(loaded.chunks.get(id).unwrap().as_ref(), chunk.as_ref());
        }
        assert!(db_size_bytes(&dir).await > 0);
    }

    #[tokio::test]
    async fn corrupt_files_load_as_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join(STORAGE_DIR);
        tokio::fs::create_dir_all(&dir).await.unwrap();
        tokio::fs::write(dir.join(DB_FILE), "{ broken").await.unwrap();
        tokio::fs::write(dir.join(INDEX_FILE), "{ broken")
            .await
            .unwrap();

        let loaded = load(&dir).await;
        assert!(loaded.chunks.is_empty());
        assert!(loaded.file_states.is_empty());
        assert!(loaded.last_indexed_at.is_none());
    }

    #[tokio::test]
    async fn missing_directory_loads_as_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let loaded = load(&tmp.path().join("nope").join(STORAGE_DIR)).await;
        assert!(loaded.chunks.is_empty());
        assert_eq!(db_size_bytes(&tmp.path().join("nope")).await, 0);
    }

    #[tokio::test]
    async fn wrong_version_is_ignored() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join(STORAGE_DIR);
        tokio::fs::create_dir_all(&dir).await.unwrap();
        tokio::fs::write(
            dir.join(DB_FILE),
            r#"{"version": 2, "chunks": [{"id": "a::0", "filePath": "a", "modifiedAt": 1, "content": "x", "embedding": [0.1]}]}"#,
        )
        .await
        .unwrap();

        let loaded = load(&dir).await;
        assert!(loaded.chunks.is_empty());
    }

    #[tokio::test]
    async fn invalid_records_are_filtered() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join(STORAGE_DIR);
        tokio::fs::create_dir_all(&dir).await.unwrap();
        // One good chunk, one with a string embedding, one with no id.
        tokio::fs::write(
            dir.join(DB_FILE),
            r#"{"version": 1, "chunks": [
                {"id": "a.md::0", "filePath": "a.md", "modifiedAt": 1, "content": "x", "embedding": [0.1]},
                {"id": "b.md::0", "filePath": "b.md", "modifiedAt": 1, "content": "y", "embedding": "oops"},
                {"filePath": "c.md", "modifiedAt": 1, "content": "z", "embedding": [0.1]}
            ]}"#,
        )
        .await
        .unwrap();
        tokio::fs::write(
            dir.join(INDEX_FILE),
            r#"{"version": 1, "updatedAt": 77, "files": {
                "a.md": {"modifiedAt": 1, "size": 1, "contentHash": "h", "chunkIds": ["a.md::0", "ghost::0"]},
                "bad.md": {"modifiedAt": "nope", "size": 1, "contentHash": "h", "chunkIds": []}
            }}"#,
        )
        .await
        .unwrap();

        let loaded = load(&dir).await;
        assert_eq!(loaded.chunks.len(), 1);
        assert!(loaded.chunks.contains_key("a.md::0"));
        assert_eq!(loaded.file_states.len(), 1);
        // Ghost chunk ids are pruned from the surviving file state.
        assert_eq!(
            loaded.file_states.get("a.md").unwrap().chunk_ids,
            vec!["a.md::0".to_string()]
        );
        assert_eq!(loaded.last_indexed_at, Some(77));
    }

    #[tokio::test]
    async fn orphan_chunks_are_dropped() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join(STORAGE_DIR);
        let (chunks, _) = sample_state();
        // Save chunks with NO file states claiming them.
        save(&dir, &chunks, &HashMap::new(), 1).await.unwrap();
        let loaded = load(&dir).await;
        assert!(loaded.chunks.is_empty());
    }

    #[tokio::test]
    async fn clear_removes_storage_and_tolerates_absence() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join(STORAGE_DIR);
        let (chunks, files) = sample_state();
        save(&dir, &chunks, &files, 1).await.unwrap();
        assert!(dir.exists());
        clear(&dir).await;
        assert!(!dir.exists());
        clear(&dir).await; // second call is a no-op
    }
}

use ignore::WalkBuilder;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use crate::config::SKIP_FILES;
use crate::error::{RagError, Result};
use crate::storage::STORAGE_DIR;

/// A file eligible for indexing, as discovered by `scan_folder`.
#[derive(Debug, Clone)]
pub struct ScannedFile {
    /// Posix-style path relative to the scanned folder.
    pub relative_path: String,
    pub full_path: PathBuf,
    /// Milliseconds since epoch.
    pub modified_at: u64,
    pub size: u64,
}

#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub folder: PathBuf,
    /// Lowercase extensions with leading dot, e.g. `".md"`.
    pub include_extensions: Vec<String>,
    /// Directory names (path components) never descended into.
    pub exclude_folders: Vec<String>,
    pub max_file_size: u64,
}

/// Walk the tree rooted at `opts.folder` and emit candidate files.
///
/// Exclusion is by directory *name* anywhere in the tree; the storage
/// directory is always excluded so an index never indexes itself. Errors on
/// individual entries abort the scan and propagate to the caller.
pub fn scan_folder(opts: &ScanOptions) -> Result<Vec<ScannedFile>> {
    let excluded: HashSet<&str> = opts
        .exclude_folders
        .iter()
        .map(String::as_str)
        .chain(std::iter::once(STORAGE_DIR))
        .collect();
    let include: HashSet<String> = opts
        .include_extensions
        .iter()
        .map(|e| e.to_lowercase())
        .collect();

    let excluded_owned: HashSet<String> = excluded.iter().map(|s| s.to_string()).collect();
    let walker = WalkBuilder::new(&opts.folder)
        .standard_filters(false)
        .follow_links(false)
        .filter_entry(move |entry| {
            if entry.depth() == 0 {
                return true;
            }
            let is_dir = entry.file_type().is_some_and(|ft| ft.is_dir());
            if !is_dir {
                return true;
            }
            let name = entry.file_name().to_string_lossy();
            !excluded_owned.contains(name.as_ref())
        })
        .build();

    let mut out = Vec::new();
    for item in walker {
        let entry = item.map_err(|e| RagError::Scanner(e.to_string()))?;
        if !entry.file_type().is_some_and(|ft| ft.is_file()) {
            continue;
        }

        let name = entry.file_name().to_string_lossy().to_string();
        if SKIP_FILES.contains(&name.as_str()) {
            continue;
        }
        if !include.contains(&extension_of(&name)) {
            continue;
        }

        let meta = entry
            .metadata()
            .map_err(|e| RagError::Scanner(e.to_string()))?;
        let size = meta.len();
        if size > opts.max_file_size {
            continue;
        }

        let full_path = entry.into_path();
        let relative_path = relative_posix(&full_path, &opts.folder)?;
        out.push(ScannedFile {
            relative_path,
            full_path,
            modified_at: modified_ms(&meta),
            size,
        });
    }

    // Stable ordering keeps chunk ids and progress deterministic across runs.
    out.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    Ok(out)
}

/// Lowercased extension including the leading dot; empty for none.
pub(crate) fn extension_of(name: &str) -> String {
    match name.rfind('.') {
        // A leading dot is a hidden file, not an extension.
        Some(idx) if idx > 0 => name[idx..].to_lowercase(),
        _ => String::new(),
    }
}

fn relative_posix(path: &Path, base: &Path) -> Result<String> {
    let rel = path
        .strip_prefix(base)
        .map_err(|e| RagError::Scanner(format!("{}: {e}", path.display())))?;
    Ok(rel.to_string_lossy().replace('\\', "/"))
}

fn modified_ms(meta: &std::fs::Metadata) -> u64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(folder: &Path) -> ScanOptions {
        ScanOptions {
            folder: folder.to_path_buf(),
            include_extensions: vec![".md".into(), ".rs".into()],
            exclude_folders: vec!["skipme".into()],
            max_file_size: 1024,
        }
    }

    #[test]
    fn scans_matching_files_with_posix_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("docs")).unwrap();
        std::fs::write(dir.path().join("docs/a.md"), "alpha").unwrap();
        std::fs::write(dir.path().join("b.rs"), "fn main() {}").unwrap();
        std::fs::write(dir.path().join("c.png"), "binary").unwrap();

        let files = scan_folder(&opts(dir.path())).unwrap();
        let rels: Vec<&str> = files.iter().map(|f| f.relative_path.as_str()).collect();
        assert_eq!(rels, vec!["b.rs", "docs/a.md"]);
        assert!(files.iter().all(|f| f.size > 0 && f.modified_at > 0));
    }

    #[test]
    fn excluded_folders_are_not_descended() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("skipme/deep")).unwrap();
        std::fs::create_dir_all(dir.path().join(".rag-ts")).unwrap();
        std::fs::write(dir.path().join("skipme/deep/x.md"), "x").unwrap();
        std::fs::write(dir.path().join(".rag-ts/y.md"), "y").unwrap();
        std::fs::write(dir.path().join("keep.md"), "k").unwrap();

        let files = scan_folder(&opts(dir.path())).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].relative_path, "keep.md");
    }

    #[test]
    fn skip_files_and_oversized_files_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".DS_Store"), "junk").unwrap();
        std::fs::write(dir.path().join("big.md"), "x".repeat(2048)).unwrap();
        std::fs::write(dir.path().join("ok.md"), "fine").unwrap();

        let files = scan_folder(&opts(dir.path())).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].relative_path, "ok.md");
    }

    #[test]
    fn extension_matching_is_case_insensitive_and_dotfiles_are_not_extensions() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("UPPER.MD"), "upper").unwrap();
        std::fs::write(dir.path().join(".md"), "hidden").unwrap();

        let files = scan_folder(&opts(dir.path())).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].relative_path, "UPPER.MD");
    }
}

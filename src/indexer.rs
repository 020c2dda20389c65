use futures::future::{BoxFuture, Shared};
use futures::{FutureExt, StreamExt};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;

use crate::ann::{AnnParams, LshAnnIndex};
use crate::cache::LruCache;
use crate::chunker::{self, ChunkerOptions};
use crate::config::{
    normalize_folder_path, FolderConfig, IndexOptions, EMBED_BATCH_SIZE, FILE_EMBED_CONCURRENCY,
    HEALTH_REFRESH_INTERVAL_MS, MAX_FILE_BYTES, QUERY_CACHE_TTL_MS, QUERY_EMBED_CACHE_MAX,
    QUERY_RESULT_CACHE_MAX, STALE_INDEX_THRESHOLD_MS,
};
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::extractor::TreeSitterExtractor;
use crate::scanner::{self, ScanOptions, ScannedFile};
use crate::storage::{self, storage_root};
use crate::types::{chunk_id, Chunk, ChunkMap, FileState, IndexPhase, IndexStatus};

// ---------------------------------------------------------------------------
// Per-folder cache and the indexing orchestrator.
//
// Each indexed folder owns one FolderCache for the lifetime of the process.
// All mutable state lives behind a single async mutex so every mutation is
// a discrete cooperative step: a search racing an index run observes either
// the pre- or post-transaction state, never a half-applied one. The
// transaction itself works on cloned maps and commits with one swap.
// ---------------------------------------------------------------------------

static REGISTRY: OnceLock<StdMutex<HashMap<String, Arc<FolderCache>>>> = OnceLock::new();

fn registry() -> &'static StdMutex<HashMap<String, Arc<FolderCache>>> {
    REGISTRY.get_or_init(Default::default)
}

fn cache_key(folder_path: &str, storage: Option<&Path>) -> String {
    match storage {
        Some(s) => format!("{folder_path}\u{1}{}", normalize_folder_path(s)),
        None => folder_path.to_string(),
    }
}

fn cached_folders() -> Vec<String> {
    let mut folders: Vec<String> = registry()
        .lock()
        .expect("folder registry poisoned")
        .values()
        .map(|c| c.folder_path.clone())
        .collect();
    folders.sort();
    folders.dedup();
    folders
}

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn sha1_hex(bytes: &[u8]) -> String {
    use sha1::{Digest, Sha1};
    let mut hasher = Sha1::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for b in digest {
        out.push_str(&format!("{b:02x}"));
    }
    out
}

/// Ranked entry list cached per normalized query, valid only while the
/// folder's `index_revision` still matches.
pub(crate) struct CachedQueryResult {
    pub revision: u64,
    /// `(chunk_id, score)` pairs, best first.
    pub entries: Vec<(String, f32)>,
}

pub(crate) struct FolderState {
    pub config: FolderConfig,
    pub phase: IndexPhase,
    pub message: Option<String>,
    pub total_files: usize,
    pub files_to_embed: usize,
    pub embedded_files: usize,
    pub skipped_unchanged: usize,
    pub db_size_bytes: u64,
    pub last_indexed_at: Option<u64>,
    pub drift_added: usize,
    pub drift_modified: usize,
    pub drift_deleted: usize,
    pub drift_checked_at: Option<u64>,
    pub chunks: ChunkMap,
    pub file_states: HashMap<String, FileState>,
    pub persisted_loaded: bool,
    pub query_embedding_cache: LruCache<String, Vec<f32>>,
    pub query_result_cache: LruCache<String, CachedQueryResult>,
    /// Monotonic token identifying the current indexed data generation.
    pub index_revision: u64,
    pub ann_index: Option<LshAnnIndex>,
}

impl FolderState {
    fn new() -> Self {
        Self {
            config: FolderConfig::default(),
            phase: IndexPhase::Idle,
            message: None,
            total_files: 0,
            files_to_embed: 0,
            embedded_files: 0,
            skipped_unchanged: 0,
            db_size_bytes: 0,
            last_indexed_at: None,
            drift_added: 0,
            drift_modified: 0,
            drift_deleted: 0,
            drift_checked_at: None,
            chunks: ChunkMap::new(),
            file_states: HashMap::new(),
            persisted_loaded: false,
            query_embedding_cache: LruCache::new(QUERY_EMBED_CACHE_MAX, QUERY_CACHE_TTL_MS),
            query_result_cache: LruCache::new(QUERY_RESULT_CACHE_MAX, QUERY_CACHE_TTL_MS),
            index_revision: 0,
            ann_index: None,
        }
    }
}

pub(crate) struct FolderCache {
    pub(crate) folder_path: String,
    storage_override: Option<PathBuf>,
    pub(crate) state: AsyncMutex<FolderState>,
    running_index: StdMutex<Option<Shared<BoxFuture<'static, IndexStatus>>>>,
    running_health: StdMutex<Option<Shared<BoxFuture<'static, ()>>>>,
}

impl FolderCache {
    /// Get or create the singleton cache for `(folder, storage override)`.
    pub(crate) fn acquire(folder: &Path, storage: Option<&Path>) -> Arc<FolderCache> {
        let folder_path = normalize_folder_path(folder);
        let key = cache_key(&folder_path, storage);
        registry()
            .lock()
            .expect("folder registry poisoned")
            .entry(key)
            .or_insert_with(|| {
                Arc::new(FolderCache {
                    folder_path,
                    storage_override: storage.map(Path::to_path_buf),
                    state: AsyncMutex::new(FolderState::new()),
                    running_index: StdMutex::new(None),
                    running_health: StdMutex::new(None),
                })
            })
            .clone()
    }

    pub(crate) fn storage_dir(&self) -> PathBuf {
        storage_root(&self.folder_path, self.storage_override.as_deref())
    }

    /// Load persisted chunks and file states on first use.
    pub(crate) async fn ensure_loaded(&self) {
        let mut st = self.state.lock().await;
        if st.persisted_loaded {
            return;
        }
        let dir = self.storage_dir();
        let loaded = storage::load(&dir).await;
        if !loaded.chunks.is_empty() {
            st.ann_index = LshAnnIndex::build(&loaded.chunks, &AnnParams::default());
        }
        st.chunks = loaded.chunks;
        st.file_states = loaded.file_states;
        st.last_indexed_at = loaded.last_indexed_at;
        st.db_size_bytes = storage::db_size_bytes(&dir).await;
        st.persisted_loaded = true;
        tracing::debug!(
            folder = %self.folder_path,
            chunks = st.chunks.len(),
            files = st.file_states.len(),
            "loaded persisted index"
        );
    }

    pub(crate) fn status_snapshot(&self, st: &FolderState) -> IndexStatus {
        let now = now_ms();
        let (stale_age_ms, stale_warning) = match st.last_indexed_at {
            Some(t) => {
                let age = now.saturating_sub(t);
                (age, age > STALE_INDEX_THRESHOLD_MS)
            }
            None => (0, false),
        };
        IndexStatus {
            folder_path: self.folder_path.clone(),
            enabled: st.config.enabled,
            phase: st.phase,
            total_files: st.total_files,
            files_to_embed: st.files_to_embed,
            embedded_files: st.embedded_files,
            skipped_unchanged: st.skipped_unchanged,
            total_chunks: st.chunks.len(),
            db_size_bytes: st.db_size_bytes,
            last_indexed_at: st.last_indexed_at,
            stale_warning,
            stale_age_ms,
            stale_threshold_ms: STALE_INDEX_THRESHOLD_MS,
            file_change_drift: st.drift_added + st.drift_modified + st.drift_deleted > 0,
            drift_added_files: st.drift_added,
            drift_modified_files: st.drift_modified,
            drift_deleted_files: st.drift_deleted,
            drift_checked_at: st.drift_checked_at,
            message: st.message.clone(),
            include_extensions: st.config.include_extensions.clone(),
            exclude_folders: st.config.exclude_folders.clone(),
            cached_folders: cached_folders(),
        }
    }
}

// ---------------------------------------------------------------------------
// Indexer
// ---------------------------------------------------------------------------

/// Drives the scan → hash → chunk → embed → persist pipeline for folders.
pub struct Indexer {
    provider: Arc<dyn EmbeddingProvider>,
}

impl Indexer {
    pub fn new(provider: Arc<dyn EmbeddingProvider>) -> Self {
        Self { provider }
    }

    /// Index `folder`, incrementally. Concurrent calls for the same folder
    /// share one in-flight transaction; the second caller receives the same
    /// result without duplicating work.
    ///
    /// Failures are reported through the returned status (`phase` and
    /// `message`), never as an `Err`.
    pub async fn index(&self, folder: impl AsRef<Path>, options: IndexOptions) -> IndexStatus {
        let cache = FolderCache::acquire(folder.as_ref(), options.output_folder.as_deref());

        {
            let mut st = cache.state.lock().await;
            if let Some(exts) = &options.include_extensions {
                st.config.include_extensions = exts.clone();
            }
            if let Some(excl) = &options.exclude_folders {
                st.config.exclude_folders = excl.clone();
            }
            st.config.enabled = true;
        }

        let fut = {
            let mut running = cache.running_index.lock().expect("running_index poisoned");
            match running.as_ref() {
                Some(existing) => existing.clone(),
                None => {
                    let fut =
                        run_transaction(cache.clone(), self.provider.clone(), options.clone())
                            .boxed()
                            .shared();
                    *running = Some(fut.clone());
                    fut
                }
            }
        };
        fut.await
    }

    /// Current status with a (throttled) drift refresh. Never mutates the
    /// index.
    pub async fn get_status(
        &self,
        folder: impl AsRef<Path>,
        output_folder: Option<&Path>,
    ) -> IndexStatus {
        get_status(folder, output_folder).await
    }

    /// Drop the in-memory cache and delete the on-disk storage directory.
    pub async fn clear_folder(&self, folder: impl AsRef<Path>, output_folder: Option<&Path>) {
        clear_folder(folder, output_folder).await;
    }
}

/// Status for a folder without needing an embedding provider.
pub async fn get_status(folder: impl AsRef<Path>, output_folder: Option<&Path>) -> IndexStatus {
    let cache = FolderCache::acquire(folder.as_ref(), output_folder);
    cache.ensure_loaded().await;
    refresh_health(&cache).await;
    let st = cache.state.lock().await;
    cache.status_snapshot(&st)
}

/// Forget the folder and remove its storage directory. Best-effort; missing
/// storage counts as success.
pub async fn clear_folder(folder: impl AsRef<Path>, output_folder: Option<&Path>) {
    let folder_path = normalize_folder_path(folder.as_ref());
    let key = cache_key(&folder_path, output_folder);
    let existing = registry()
        .lock()
        .expect("folder registry poisoned")
        .remove(&key);
    let dir = match existing {
        Some(cache) => cache.storage_dir(),
        None => storage_root(&folder_path, output_folder),
    };
    storage::clear(&dir).await;
    tracing::info!(folder = %folder_path, "cleared index");
}

// ---------------------------------------------------------------------------
// The indexing transaction
// ---------------------------------------------------------------------------

async fn run_transaction(
    cache: Arc<FolderCache>,
    provider: Arc<dyn EmbeddingProvider>,
    options: IndexOptions,
) -> IndexStatus {
    let outcome = index_transaction(&cache, provider, &options).await;

    let status = {
        let mut st = cache.state.lock().await;
        match outcome {
            Ok(()) => {
                st.phase = IndexPhase::Ready;
                st.message = None;
                st.last_indexed_at = Some(now_ms());
                // A successful run makes the index fresh by definition, but
                // drift_checked_at is left alone so the next get_status()
                // performs a real scan instead of trusting this transaction
                // for a full throttle interval.
                st.drift_added = 0;
                st.drift_modified = 0;
                st.drift_deleted = 0;
            }
            Err(RagError::Cancelled) => {
                st.phase = IndexPhase::Idle;
                st.message = Some(RagError::Cancelled.to_string());
            }
            Err(e) => {
                st.phase = IndexPhase::Error;
                st.message = Some(e.to_string());
                tracing::warn!(folder = %cache.folder_path, "indexing failed: {e}");
            }
        }
        cache.status_snapshot(&st)
    };

    if let Some(cb) = &options.on_progress {
        cb(&status);
    }
    *cache.running_index.lock().expect("running_index poisoned") = None;
    status
}

enum FileOutcome {
    /// Content hash matched the prior state; only (mtime, size) refreshed.
    Unchanged {
        rel: String,
        modified_at: u64,
        size: u64,
    },
    Indexed {
        rel: String,
        state: FileState,
        chunks: Vec<Chunk>,
    },
}

async fn index_transaction(
    cache: &Arc<FolderCache>,
    provider: Arc<dyn EmbeddingProvider>,
    options: &IndexOptions,
) -> Result<()> {
    let cancel = options.cancel.clone().unwrap_or_default();

    cache.ensure_loaded().await;

    // Snapshot working copies; the live maps stay untouched until commit.
    let (scan_opts, mut work_chunks, mut work_states) = {
        let mut st = cache.state.lock().await;
        st.phase = IndexPhase::Scanning;
        st.message = None;
        st.total_files = 0;
        st.files_to_embed = 0;
        st.embedded_files = 0;
        st.skipped_unchanged = 0;
        let scan_opts = ScanOptions {
            folder: PathBuf::from(&cache.folder_path),
            include_extensions: st.config.include_extensions.clone(),
            exclude_folders: st.config.exclude_folders.clone(),
            max_file_size: options.max_file_size.unwrap_or(MAX_FILE_BYTES),
        };
        (scan_opts, st.chunks.clone(), st.file_states.clone())
    };
    emit_progress(cache, options).await;

    let candidates = scanner::scan_folder(&scan_opts)?;
    if cancel.is_cancelled() {
        return Err(RagError::Cancelled);
    }

    let current_files: HashSet<String> = candidates
        .iter()
        .map(|f| f.relative_path.clone())
        .collect();

    // Deletion pass: drop chunks and state for files gone from disk.
    let mut changed_index = false;
    let deleted: Vec<String> = work_states
        .keys()
        .filter(|rel| !current_files.contains(rel.as_str()))
        .cloned()
        .collect();
    for rel in deleted {
        if let Some(prev) = work_states.remove(&rel) {
            for id in &prev.chunk_ids {
                work_chunks.remove(id);
            }
        }
        changed_index = true;
    }

    // Metadata fast path: identical (mtime, size) means untouched.
    let mut survivors: Vec<ScannedFile> = Vec::new();
    let mut fast_skips = 0usize;
    for candidate in candidates {
        let unchanged = work_states.get(&candidate.relative_path).is_some_and(|prev| {
            prev.modified_at == candidate.modified_at && prev.size == candidate.size
        });
        if unchanged {
            fast_skips += 1;
        } else {
            survivors.push(candidate);
        }
    }

    {
        let mut st = cache.state.lock().await;
        st.total_files = current_files.len();
        st.skipped_unchanged = fast_skips;
        st.files_to_embed = survivors.len();
        st.phase = IndexPhase::Embedding;
    }
    emit_progress(cache, options).await;

    // Read + hash + chunk + embed, bounded by `concurrency`. Any failure
    // aborts the whole transaction before anything is persisted.
    let concurrency = options
        .concurrency
        .unwrap_or(FILE_EMBED_CONCURRENCY)
        .max(1);
    let embed_batch = options.embed_batch_size.unwrap_or(EMBED_BATCH_SIZE).max(1);
    let extractor = Arc::new(TreeSitterExtractor);

    let jobs: Vec<(ScannedFile, Option<String>)> = survivors
        .into_iter()
        .map(|file| {
            let prev_hash = work_states
                .get(&file.relative_path)
                .map(|s| s.content_hash.clone());
            (file, prev_hash)
        })
        .collect();

    let mut stream = futures::stream::iter(jobs.into_iter().map(|(file, prev_hash)| {
        process_file(
            file,
            prev_hash,
            provider.clone(),
            cancel.clone(),
            embed_batch,
            extractor.clone(),
        )
    }))
    .buffer_unordered(concurrency);

    while let Some(result) = stream.next().await {
        match result? {
            FileOutcome::Unchanged {
                rel,
                modified_at,
                size,
            } => {
                if let Some(state) = work_states.get_mut(&rel) {
                    state.modified_at = modified_at;
                    state.size = size;
                }
                let mut st = cache.state.lock().await;
                st.skipped_unchanged += 1;
                st.files_to_embed = st.files_to_embed.saturating_sub(1);
            }
            FileOutcome::Indexed { rel, state, chunks } => {
                if let Some(prev) = work_states.get(&rel) {
                    for id in &prev.chunk_ids {
                        work_chunks.remove(id);
                    }
                }
                for chunk in chunks {
                    work_chunks.insert(chunk.id.clone(), Arc::new(chunk));
                }
                work_states.insert(rel, state);
                changed_index = true;
                let mut st = cache.state.lock().await;
                st.embedded_files += 1;
            }
        }
        emit_progress(cache, options).await;
    }
    drop(stream);

    if cancel.is_cancelled() {
        return Err(RagError::Cancelled);
    }

    // Commit. The chunk map, ANN index, and revision swap in one lock scope
    // so observers never see a partial generation; the disk write happens
    // inside the same scope, making persistence part of the same step from
    // the caller's perspective.
    let mut st = cache.state.lock().await;
    if changed_index {
        let dir = cache.storage_dir();
        let updated_at = now_ms();
        storage::save(&dir, &work_chunks, &work_states, updated_at).await?;
        st.ann_index = LshAnnIndex::build(&work_chunks, &AnnParams::default());
        st.chunks = work_chunks;
        st.file_states = work_states;
        st.index_revision += 1;
        st.db_size_bytes = storage::db_size_bytes(&dir).await;
        tracing::info!(
            folder = %cache.folder_path,
            chunks = st.chunks.len(),
            revision = st.index_revision,
            "index updated"
        );
    } else {
        // Metadata-only refreshes (same hash, new mtime) update the live
        // file states but do not constitute a new data generation: the
        // revision and the on-disk files stay put.
        st.file_states = work_states;
    }

    Ok(())
}

async fn process_file(
    file: ScannedFile,
    prev_hash: Option<String>,
    provider: Arc<dyn EmbeddingProvider>,
    cancel: CancellationToken,
    embed_batch: usize,
    extractor: Arc<TreeSitterExtractor>,
) -> Result<FileOutcome> {
    if cancel.is_cancelled() {
        return Err(RagError::Cancelled);
    }

    let bytes = tokio::fs::read(&file.full_path)
        .await
        .map_err(|e| RagError::Read(format!("{}: {e}", file.relative_path)))?;
    let hash = sha1_hex(&bytes);

    if prev_hash.as_deref() == Some(hash.as_str()) {
        return Ok(FileOutcome::Unchanged {
            rel: file.relative_path,
            modified_at: file.modified_at,
            size: file.size,
        });
    }

    let content = String::from_utf8_lossy(&bytes);
    let chunker_opts = ChunkerOptions {
        file_extension: Some(scanner::extension_of(&file.relative_path)),
        ..ChunkerOptions::default()
    };
    let pieces = chunker::chunk_source(&content, &chunker_opts, extractor.as_ref());

    let texts: Vec<String> = pieces.iter().map(|p| p.content.clone()).collect();
    let mut vectors: Vec<Vec<f32>> = Vec::with_capacity(texts.len());
    for batch in texts.chunks(embed_batch) {
        if cancel.is_cancelled() {
            return Err(RagError::Cancelled);
        }
        vectors.extend(provider.embed(batch, Some(&cancel)).await?);
    }
    if vectors.len() != texts.len() {
        return Err(RagError::Embedding(format!(
            "provider returned {} vectors for {} texts",
            vectors.len(),
            texts.len()
        )));
    }

    let chunks: Vec<Chunk> = pieces
        .into_iter()
        .zip(vectors)
        .enumerate()
        .map(|(ordinal, (piece, embedding))| Chunk {
            id: chunk_id(&file.relative_path, ordinal),
            file_path: file.relative_path.clone(),
            modified_at: file.modified_at,
            content: piece.content,
            embedding,
            symbols: (!piece.symbols.is_empty()).then_some(piece.symbols),
        })
        .collect();

    let state = FileState {
        modified_at: file.modified_at,
        size: file.size,
        content_hash: hash,
        chunk_ids: chunks.iter().map(|c| c.id.clone()).collect(),
    };

    Ok(FileOutcome::Indexed {
        rel: file.relative_path,
        state,
        chunks,
    })
}

async fn emit_progress(cache: &FolderCache, options: &IndexOptions) {
    if let Some(cb) = &options.on_progress {
        let snapshot = {
            let st = cache.state.lock().await;
            cache.status_snapshot(&st)
        };
        cb(&snapshot);
    }
}

// ---------------------------------------------------------------------------
// Health refresh (drift + staleness)
// ---------------------------------------------------------------------------

/// Recompute drift counters, at most once per `HEALTH_REFRESH_INTERVAL_MS`.
/// Concurrent callers share a single in-flight scan. Scan errors zero the
/// counters and never propagate.
pub(crate) async fn refresh_health(cache: &Arc<FolderCache>) {
    {
        let st = cache.state.lock().await;
        if let Some(checked) = st.drift_checked_at {
            if now_ms().saturating_sub(checked) < HEALTH_REFRESH_INTERVAL_MS {
                return;
            }
        }
    }

    let fut = {
        let mut running = cache
            .running_health
            .lock()
            .expect("running_health poisoned");
        match running.as_ref() {
            Some(existing) => existing.clone(),
            None => {
                let fut = drift_scan(cache.clone()).boxed().shared();
                *running = Some(fut.clone());
                fut
            }
        }
    };
    fut.await;
}

async fn drift_scan(cache: Arc<FolderCache>) {
    let scan_opts = {
        let st = cache.state.lock().await;
        ScanOptions {
            folder: PathBuf::from(&cache.folder_path),
            include_extensions: st.config.include_extensions.clone(),
            exclude_folders: st.config.exclude_folders.clone(),
            max_file_size: MAX_FILE_BYTES,
        }
    };

    let scanned = scanner::scan_folder(&scan_opts);

    let mut st = cache.state.lock().await;
    match scanned {
        Ok(files) => {
            let mut added = 0usize;
            let mut modified = 0usize;
            let mut seen: HashSet<&str> = HashSet::with_capacity(files.len());
            for f in &files {
                seen.insert(f.relative_path.as_str());
                match st.file_states.get(&f.relative_path) {
                    None => added += 1,
                    Some(prev) if prev.modified_at != f.modified_at || prev.size != f.size => {
                        modified += 1;
                    }
                    Some(_) => {}
                }
            }
            let deleted = st
                .file_states
                .keys()
                .filter(|rel| !seen.contains(rel.as_str()))
                .count();
            st.drift_added = added;
            st.drift_modified = modified;
            st.drift_deleted = deleted;
        }
        Err(e) => {
            tracing::debug!(folder = %cache.folder_path, "drift scan failed: {e}");
            st.drift_added = 0;
            st.drift_modified = 0;
            st.drift_deleted = 0;
        }
    }
    st.drift_checked_at = Some(now_ms());
    drop(st);

    *cache
        .running_health
        .lock()
        .expect("running_health poisoned") = None;
}

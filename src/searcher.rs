use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use crate::ann::{self, AnnParams};
use crate::config::{SearchOptions, QUERY_RESULT_CACHE_TOP_K, TOP_K};
use crate::embedding::EmbeddingProvider;
use crate::error::Result;
use crate::indexer::{CachedQueryResult, FolderCache};
use crate::types::{Chunk, SearchMatch, SearchResult};

// ---------------------------------------------------------------------------
// Query path: result cache → embedding cache → ANN candidates → cosine
// rerank. Both caches key on the normalized query; result-cache entries
// additionally carry the index revision they were computed against and are
// ignored once the index moves on.
// ---------------------------------------------------------------------------

pub struct Searcher {
    provider: Arc<dyn EmbeddingProvider>,
}

impl Searcher {
    pub fn new(provider: Arc<dyn EmbeddingProvider>) -> Self {
        Self { provider }
    }

    /// Rank indexed chunks against `query`.
    ///
    /// A disabled folder, an empty index, or a blank query yields an empty
    /// result rather than an error; only embedding-provider failures
    /// propagate.
    pub async fn search(
        &self,
        folder: impl AsRef<Path>,
        query: &str,
        options: &SearchOptions,
    ) -> Result<SearchResult> {
        let started = Instant::now();
        let cache = FolderCache::acquire(folder.as_ref(), options.output_folder.as_deref());
        cache.ensure_loaded().await;

        let top_k = options.top_k.unwrap_or(TOP_K).max(1);
        let trimmed = query.trim();

        let mut st = cache.state.lock().await;
        let total_chunks = st.chunks.len();
        if !st.config.enabled || total_chunks == 0 || trimmed.is_empty() {
            return Ok(SearchResult::empty(elapsed_ms(started), total_chunks));
        }

        let query_key = normalize_query(trimmed);

        // Result cache, shadowed by revision: entries from an older index
        // generation are simply skipped, not purged.
        let revision = st.index_revision;
        if let Some(hit) = st.query_result_cache.get(&query_key) {
            if hit.revision == revision && hit.entries.len() >= top_k {
                let entries = hit.entries.clone();
                let matches = materialize(&entries, &st.chunks, top_k);
                return Ok(SearchResult {
                    matches,
                    duration_ms: elapsed_ms(started),
                    total_chunks,
                });
            }
        }

        // Query embedding cache. The provider call happens with the folder
        // lock released so an in-flight index run is not stalled behind it.
        let cached_embedding = st.query_embedding_cache.get(&query_key).cloned();
        let query_vec = match cached_embedding {
            Some(v) => v,
            None => {
                drop(st);
                let mut vectors = self
                    .provider
                    .embed(&[trimmed.to_string()], None)
                    .await?;
                let v = if vectors.is_empty() {
                    Vec::new()
                } else {
                    vectors.swap_remove(0)
                };
                st = cache.state.lock().await;
                st.query_embedding_cache.insert(query_key.clone(), v.clone());
                v
            }
        };

        // Candidate retrieval: ANN buckets when trustworthy, otherwise the
        // full chunk set.
        let params = AnnParams::default();
        let candidates: Vec<Arc<Chunk>> = st
            .ann_index
            .as_ref()
            .and_then(|index| index.query(&query_vec, &st.chunks, &params))
            .unwrap_or_else(|| st.chunks.values().cloned().collect());

        let ranked = ann::rank(&candidates, &query_vec, top_k.max(QUERY_RESULT_CACHE_TOP_K));

        let entries: Vec<(String, f32)> = ranked
            .iter()
            .map(|(chunk, score)| (chunk.id.clone(), *score))
            .collect();
        let revision = st.index_revision;
        st.query_result_cache.insert(
            query_key,
            CachedQueryResult {
                revision,
                entries,
            },
        );

        let matches = ranked
            .into_iter()
            .take(top_k)
            .map(|(chunk, score)| to_match(&chunk, score))
            .collect();

        Ok(SearchResult {
            matches,
            duration_ms: elapsed_ms(started),
            total_chunks,
        })
    }

    /// Render the top matches as a context block for prompt assembly.
    /// Returns an empty string when nothing matches.
    pub async fn get_context_for_query(
        &self,
        folder: impl AsRef<Path>,
        query: &str,
        options: &SearchOptions,
    ) -> Result<String> {
        let result = self.search(folder, query, options).await?;
        if result.matches.is_empty() {
            return Ok(String::new());
        }

        let mut out = String::from("## RAG Context (project files)\n");
        out.push_str("Use the following snippets as additional project context when relevant:\n\n");
        for m in &result.matches {
            out.push_str(&format!("### {}\n{}\n", m.file_path, m.content));
        }
        Ok(out)
    }
}

/// Cache key: lowercased, trimmed, inner whitespace collapsed to single
/// spaces. "Foo  Bar" and "foo bar" share one slot.
fn normalize_query(query: &str) -> String {
    query
        .trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn materialize(
    entries: &[(String, f32)],
    chunks: &crate::types::ChunkMap,
    top_k: usize,
) -> Vec<SearchMatch> {
    entries
        .iter()
        .filter_map(|(id, score)| chunks.get(id).map(|c| to_match(c, *score)))
        .take(top_k)
        .collect()
}

fn to_match(chunk: &Chunk, score: f32) -> SearchMatch {
    SearchMatch {
        file_path: chunk.file_path.clone(),
        score: (score * 1000.0).round() / 1000.0,
        content: chunk.content.clone(),
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

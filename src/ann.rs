use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::config::{
    ANN_FALLBACK_MIN_CANDIDATES, ANN_MAX_HAMMING_DISTANCE, ANN_MAX_RERANK_CANDIDATES,
    ANN_PROJECTION_DIM,
};
use crate::math::{cosine_similarity, projection_matrix};
use crate::types::{Chunk, ChunkMap};

// ---------------------------------------------------------------------------
// Sign-projection LSH.
//
// Chunks hash to a short binary signature (sign of the dot product against
// each random projection row). Near-duplicate embeddings land in the same
// or adjacent buckets, so a query only has to cosine-score the union of a
// few buckets instead of the whole corpus. When buckets are too sparse to
// be trustworthy the query reports `None` and the caller brute-forces.
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct AnnParams {
    /// Signature length in bits.
    pub projection_dim: usize,
    /// Bucket neighborhood radius for candidate retrieval.
    pub max_hamming_distance: usize,
    /// Below this candidate count the bucket union is considered too sparse.
    pub fallback_min_candidates: usize,
    /// Candidate collection stops once this many ids are gathered.
    pub max_rerank_candidates: usize,
}

impl Default for AnnParams {
    fn default() -> Self {
        Self {
            projection_dim: ANN_PROJECTION_DIM,
            max_hamming_distance: ANN_MAX_HAMMING_DISTANCE,
            fallback_min_candidates: ANN_FALLBACK_MIN_CANDIDATES,
            max_rerank_candidates: ANN_MAX_RERANK_CANDIDATES,
        }
    }
}

/// In-memory LSH index over the current chunk set. References chunks by id
/// only; materialization looks ids up in the live map, which tolerates
/// chunks vanishing between candidate selection and rerank.
#[derive(Debug, Clone)]
pub struct LshAnnIndex {
    dimensions: usize,
    projection: Vec<Vec<f32>>,
    buckets: HashMap<String, Vec<String>>,
}

impl LshAnnIndex {
    /// Build an index over `chunks`. The embedding dimensionality is taken
    /// from the first chunk with a non-empty embedding; chunks with a
    /// different dimensionality are skipped. Returns `None` when there is
    /// nothing to index.
    pub fn build(chunks: &ChunkMap, params: &AnnParams) -> Option<Self> {
        let dimensions = chunks
            .values()
            .find(|c| !c.embedding.is_empty())
            .map(|c| c.embedding.len())?;

        let index = Self {
            dimensions,
            projection: projection_matrix(dimensions, params.projection_dim),
            buckets: HashMap::new(),
        };
        let mut buckets: HashMap<String, Vec<String>> = HashMap::new();
        for (id, chunk) in chunks {
            if chunk.embedding.len() != dimensions {
                continue;
            }
            buckets
                .entry(index.signature(&chunk.embedding))
                .or_default()
                .push(id.clone());
        }

        Some(Self { buckets, ..index })
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Binary signature of `embedding`: bit i is 1 iff the dot product with
    /// projection row i is non-negative.
    pub(crate) fn signature(&self, embedding: &[f32]) -> String {
        self.projection
            .iter()
            .map(|row| {
                let dot: f32 = row.iter().zip(embedding.iter()).map(|(a, b)| a * b).sum();
                if dot >= 0.0 {
                    '1'
                } else {
                    '0'
                }
            })
            .collect()
    }

    /// Retrieve candidate chunks within the configured Hamming radius of the
    /// query signature.
    ///
    /// Returns `None` when the query dimensionality does not match the index
    /// or when the bucket union is too sparse; the caller should brute-force
    /// over the full chunk set in that case. Enumeration flips up to two bit
    /// positions, so radius-3 buckets are reached only partially.
    pub fn query(
        &self,
        query_embedding: &[f32],
        chunks: &ChunkMap,
        params: &AnnParams,
    ) -> Option<Vec<Arc<Chunk>>> {
        if query_embedding.len() != self.dimensions {
            return None;
        }

        let base = self.signature(query_embedding);
        let mut full = collect_candidates(self, &base, params);
        full.truncate(params.max_rerank_candidates);

        if full.len() < params.fallback_min_candidates {
            return None;
        }

        Some(
            full.iter()
                .filter_map(|id| chunks.get(id).cloned())
                .collect(),
        )
    }
}

/// Union bucket ids for the base signature and its 1- and 2-bit flips, in
/// increasing Hamming distance, respecting the configured radius.
fn collect_candidates(index: &LshAnnIndex, base: &str, params: &AnnParams) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();

    let absorb = |sig: String, out: &mut Vec<String>, seen: &mut HashSet<String>| -> bool {
        if let Some(ids) = index.buckets.get(&sig) {
            for id in ids {
                if out.len() >= params.max_rerank_candidates {
                    return true;
                }
                if seen.insert(id.clone()) {
                    out.push(id.clone());
                }
            }
        }
        out.len() >= params.max_rerank_candidates
    };

    if absorb(base.to_string(), &mut out, &mut seen) {
        return out;
    }

    let bits: Vec<u8> = base.bytes().collect();
    let flip = |bits: &[u8], i: usize| -> Vec<u8> {
        let mut flipped = bits.to_vec();
        flipped[i] = if flipped[i] == b'1' { b'0' } else { b'1' };
        flipped
    };

    if params.max_hamming_distance >= 1 {
        for i in 0..bits.len() {
            let sig = String::from_utf8(flip(&bits, i)).expect("signature is ascii");
            if absorb(sig, &mut out, &mut seen) {
                return out;
            }
        }
    }

    if params.max_hamming_distance >= 2 {
        for i in 0..bits.len() {
            let one = flip(&bits, i);
            for j in (i + 1)..bits.len() {
                let sig = String::from_utf8(flip(&one, j)).expect("signature is ascii");
                if absorb(sig, &mut out, &mut seen) {
                    return out;
                }
            }
        }
    }

    out
}

/// Exact cosine rerank: score every candidate, drop non-positive scores,
/// sort descending, keep the top `top_k`.
pub fn rank(
    candidates: &[Arc<Chunk>],
    query_embedding: &[f32],
    top_k: usize,
) -> Vec<(Arc<Chunk>, f32)> {
    let mut scored: Vec<(Arc<Chunk>, f32)> = candidates
        .iter()
        .map(|c| {
            (
                c.clone(),
                cosine_similarity(&c.embedding, query_embedding),
            )
        })
        .filter(|(_, score)| *score > 0.0)
        .collect();
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(top_k);
    scored
}

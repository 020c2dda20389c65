// ---------------------------------------------------------------------------
// Vector primitives shared by the ANN index and the reranker.
// ---------------------------------------------------------------------------

/// Cosine similarity between two vectors.
///
/// Returns `-1.0` for mismatched lengths, empty inputs, or a zero norm on
/// either side, so degenerate vectors always sort below every real match.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return -1.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return -1.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Mulberry32: tiny deterministic 32-bit PRNG.
///
/// Projection matrices must be bit-identical across runs and platforms for
/// equal seeds: bucket signatures are derived from them, and a drifting
/// matrix would silently empty every bucket lookup.
pub struct Mulberry32 {
    state: u32,
}

impl Mulberry32 {
    pub fn new(seed: u32) -> Self {
        Self { state: seed }
    }

    /// Next sample in `[0, 1)`.
    pub fn next_f32(&mut self) -> f32 {
        self.state = self.state.wrapping_add(0x6D2B_79F5);
        let mut t = self.state;
        t = (t ^ (t >> 15)).wrapping_mul(t | 1);
        t ^= t.wrapping_add((t ^ (t >> 7)).wrapping_mul(t | 61));
        let out = t ^ (t >> 14);
        (out as f64 / 4_294_967_296.0) as f32
    }
}

/// Seed for the `(dimensions, projection_dim)` pair. The multipliers are the
/// classic spatial-hash primes; collisions between distinct pairs are
/// harmless since each index stores its own matrix.
pub fn projection_seed(dimensions: usize, projection_dim: usize) -> u32 {
    (dimensions as u32)
        .wrapping_mul(73_856_093)
        .wrapping_add((projection_dim as u32).wrapping_mul(19_349_663))
}

/// Deterministic `projection_dim × dimensions` matrix of signed floats in
/// `[-1, 1)`.
pub fn projection_matrix(dimensions: usize, projection_dim: usize) -> Vec<Vec<f32>> {
    let mut rng = Mulberry32::new(projection_seed(dimensions, projection_dim));
    (0..projection_dim)
        .map(|_| (0..dimensions).map(|_| rng.next_f32() * 2.0 - 1.0).collect())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_of_identical_unit_vector_is_one() {
        let v = vec![0.6f32, 0.8];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_of_opposite_vector_is_minus_one() {
        let v = vec![0.3f32, -0.4, 0.5];
        let neg: Vec<f32> = v.iter().map(|x| -x).collect();
        assert!((cosine_similarity(&v, &neg) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_degenerate_inputs_yield_minus_one() {
        assert_eq!(cosine_similarity(&[], &[]), -1.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), -1.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), -1.0);
    }

    #[test]
    fn mulberry32_is_deterministic() {
        let a: Vec<f32> = {
            let mut r = Mulberry32::new(42);
            (0..8).map(|_| r.next_f32()).collect()
        };
        let b: Vec<f32> = {
            let mut r = Mulberry32::new(42);
            (0..8).map(|_| r.next_f32()).collect()
        };
        assert_eq!(a, b);
        assert!(a.iter().all(|x| (0.0..1.0).contains(x)));
        // Different seeds diverge immediately.
        let mut r = Mulberry32::new(43);
        assert_ne!(a[0], r.next_f32());
    }

    #[test]
    fn projection_matrix_shape_and_determinism() {
        let m1 = projection_matrix(384, 16);
        let m2 = projection_matrix(384, 16);
        assert_eq!(m1.len(), 16);
        assert!(m1.iter().all(|row| row.len() == 384));
        assert_eq!(m1, m2);
        assert!(m1
            .iter()
            .flatten()
            .all(|x| (-1.0..1.0).contains(x)));
        assert_ne!(m1, projection_matrix(384, 8));
    }
}

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::Result;

/// Pluggable embedding capability.
///
/// The core holds no knowledge of transport or model; it batches texts,
/// forwards its cancellation token, and expects vectors back in input
/// order.
///
/// Contract:
/// - `vectors.len() == texts.len()`, one vector per input text, same order.
/// - The core never calls `embed` with an empty slice; implementations
///   should still return `Ok(vec![])` for one.
/// - A cancelled token should surface as [`crate::RagError::Cancelled`] so
///   the indexing transaction aborts before persisting.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(
        &self,
        texts: &[String],
        cancel: Option<&CancellationToken>,
    ) -> Result<Vec<Vec<f32>>>;
}

use async_trait::async_trait;
use model2vec_rs::model::StaticModel;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};

// ---------------------------------------------------------------------------
// Local embedding provider backed by a Model2Vec static model.
//
// StaticModel is not Send, so the model lives on a dedicated worker thread
// and requests cross over a channel. Encoding a batch is pure CPU; the
// worker processes one request at a time, which also serializes access the
// way the model requires.
// ---------------------------------------------------------------------------

/// Default HuggingFace model repo for the CLI.
pub const DEFAULT_EMBED_MODEL: &str = "minishlab/potion-retrieval-32M";

struct EmbedRequest {
    texts: Vec<String>,
    reply: oneshot::Sender<Vec<Vec<f32>>>,
}

pub struct StaticModelProvider {
    tx: mpsc::UnboundedSender<EmbedRequest>,
}

impl StaticModelProvider {
    /// Load `model_id` (downloading into the HF cache on first use) and
    /// spawn the worker thread. Fails fast when the model cannot be loaded.
    pub fn load(model_id: &str) -> anyhow::Result<Self> {
        let (tx, mut rx) = mpsc::unbounded_channel::<EmbedRequest>();
        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<anyhow::Result<()>>();
        let model_id = model_id.to_string();

        std::thread::Builder::new()
            .name("ragkit-embed".into())
            .spawn(move || {
                let model = match StaticModel::from_pretrained(&model_id, None, None, None) {
                    Ok(m) => {
                        let _ = ready_tx.send(Ok(()));
                        m
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e.into()));
                        return;
                    }
                };
                while let Some(req) = rx.blocking_recv() {
                    let vectors: Vec<Vec<f32>> = req
                        .texts
                        .iter()
                        .map(|t| model.encode_single(t))
                        .collect();
                    // Receiver gone means the caller was cancelled; keep serving.
                    let _ = req.reply.send(vectors);
                }
            })?;

        ready_rx
            .recv()
            .map_err(|_| anyhow::anyhow!("embedding worker exited during startup"))??;
        Ok(Self { tx })
    }
}

#[async_trait]
impl EmbeddingProvider for StaticModelProvider {
    async fn embed(
        &self,
        texts: &[String],
        cancel: Option<&CancellationToken>,
    ) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        if cancel.is_some_and(|c| c.is_cancelled()) {
            return Err(RagError::Cancelled);
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EmbedRequest {
                texts: texts.to_vec(),
                reply: reply_tx,
            })
            .map_err(|_| RagError::Embedding("embedding worker is gone".into()))?;

        match cancel {
            Some(token) => tokio::select! {
                _ = token.cancelled() => Err(RagError::Cancelled),
                result = reply_rx => {
                    result.map_err(|_| RagError::Embedding("embedding worker dropped request".into()))
                }
            },
            None => reply_rx
                .await
                .map_err(|_| RagError::Embedding("embedding worker dropped request".into())),
        }
    }
}
